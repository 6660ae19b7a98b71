use anyhow::Result;

use polgraph::config::Config;
use polgraph::utils::truncate_text;

pub async fn neighbors(config: &Config, name: String, limit: usize, json: bool) -> Result<()> {
    let service = super::connect(config).await?;
    let graph = service.graph_query.neighbors(&name, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
        return Ok(());
    }

    if graph.is_empty() {
        println!("No graph node for '{name}'.");
        return Ok(());
    }

    println!("Neighbors of '{name}'");
    println!("===================");
    println!("Nodes ({}):", graph.nodes.len());
    for node in &graph.nodes {
        println!("  [{}] {}", node.label.as_str(), node.key);
    }
    println!("Edges ({}):", graph.edges.len());
    for edge in &graph.edges {
        println!(
            "  {} -[{}]-> {} ({} contexts)",
            edge.source,
            edge.edge_type.as_str(),
            edge.target,
            edge.contexts().len()
        );
    }
    Ok(())
}

pub async fn related(config: &Config, name: String, limit: usize, json: bool) -> Result<()> {
    let service = super::connect(config).await?;
    let related = service.statistics.related_entities(&name, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&related)?);
        return Ok(());
    }

    if related.is_empty() {
        println!("No entities co-occur with '{name}'.");
        return Ok(());
    }

    println!("Entities related to '{name}'");
    println!("============================");
    for (rank, entity) in related.iter().enumerate() {
        println!(
            "{:>3}. {} ({}) - {} shared documents",
            rank + 1,
            entity.name,
            entity.entity_type,
            entity.co_occurrence_count
        );
    }
    Ok(())
}

pub async fn stats(config: &Config, top: usize, json: bool) -> Result<()> {
    let service = super::connect(config).await?;
    let stats = service.statistics.entity_statistics(top).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Entity Statistics");
    println!("=================");
    println!("Total entities: {}", stats.total_entities);
    println!("Total mentions: {}", stats.total_mentions);
    println!();
    println!("By type:");
    for (entity_type, count) in &stats.counts_by_type {
        println!("  {entity_type:<14} {count}");
    }
    println!();
    println!("Top {} entities:", stats.top_entities.len());
    for (rank, entity) in stats.top_entities.iter().enumerate() {
        println!(
            "{:>3}. {} ({}) - {} mentions",
            rank + 1,
            entity.name,
            entity.entity_type,
            entity.mention_count
        );
    }
    Ok(())
}

pub async fn entity(config: &Config, name: String, json: bool) -> Result<()> {
    let service = super::connect(config).await?;
    let profiles = service.statistics.entity_profiles(&name).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }

    if profiles.is_empty() {
        println!("Entity not found: {name}");
        return Ok(());
    }

    for profile in &profiles {
        let entity = &profile.entity;
        println!("{} ({}) #{}", entity.name, entity.entity_type, entity.id);
        println!("  Confidence: {:.2}", entity.confidence_score);
        println!("  Mentions:   {} across {} documents", profile.total_mentions(), profile.documents.len());
        if !entity.metadata.is_empty() {
            println!("  Metadata:   {}", serde_json::to_string(&entity.metadata)?);
        }
        for doc in &profile.documents {
            let sentiment = doc
                .sentiment
                .map(|s| format!("{s:+.2}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "    {} x{} sentiment {sentiment}",
                doc.document_id, doc.mention_count
            );
            if let Some(context) = doc.contexts.last() {
                println!("      \"{}\"", truncate_text(context, 120));
            }
        }
        println!();
    }
    Ok(())
}
