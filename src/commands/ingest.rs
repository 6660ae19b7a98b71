use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use polgraph::config::Config;
use polgraph::models::SourceDocument;
use polgraph::pipeline::BatchReport;

/// Input files hold either one document or an array of documents
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum DocumentFile {
    Many(Vec<SourceDocument>),
    One(Box<SourceDocument>),
}

fn read_documents(path: &Path) -> Result<Vec<SourceDocument>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    let parsed: DocumentFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse documents in: {}", path.display()))?;

    Ok(match parsed {
        DocumentFile::Many(documents) => documents,
        DocumentFile::One(document) => vec![*document],
    })
}

/// Collect documents from a JSON file or every `.json` file in a directory
fn collect_documents(input: &Path) -> Result<Vec<SourceDocument>> {
    if !input.is_dir() {
        return read_documents(input);
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
        match read_documents(&path) {
            Ok(mut batch) => documents.append(&mut batch),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping input file"),
        }
    }
    Ok(documents)
}

pub async fn ingest(config: &Config, input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input path does not exist: {}", input.display());
    }

    let documents = collect_documents(&input)?;
    if documents.is_empty() {
        println!("No documents to ingest.");
        return Ok(());
    }

    let service = super::connect(config).await?;
    println!("Ingesting {} documents...", documents.len());

    let report = service.pipeline.ingest_batch(&documents).await;
    print_report(&report);

    if polgraph::metrics::metrics_initialized() {
        match polgraph::metrics::encode_metrics() {
            Ok(text) => tracing::debug!(metrics = %text, "Ingestion metrics"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    if let Some(output) = output {
        let content = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        std::fs::write(&output, content)
            .with_context(|| format!("Failed to write report: {}", output.display()))?;
        println!("Report written to {}", output.display());
    }

    if report.failed() > 0 {
        anyhow::bail!("{} of {} documents failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!();
    println!("Ingestion Results");
    println!("=================");
    for outcome in &report.outcomes {
        let state = outcome.state.map(|s| s.as_str()).unwrap_or("-");
        match &outcome.error {
            Some(error) => println!("  ✗ {} [{state}] {error}", outcome.document_id),
            None if outcome.skipped => println!("  - {} (already completed)", outcome.document_id),
            None => println!(
                "  ✓ {} [{state}] {} entities",
                outcome.document_id, outcome.entities
            ),
        }
        if !outcome.failed_sources.is_empty() {
            println!("      failed sources: {}", outcome.failed_sources.join(", "));
        }
    }
    println!();
    println!("Succeeded:     {}", report.succeeded());
    println!("Failed:        {}", report.failed());
    println!("Graph pending: {}", report.graph_pending());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_single_and_array_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"source_url": "https://example.com/a", "raw_text": "Nancy Pelosi spoke"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"[{"source_url": "https://example.com/b"}, {"source_url": "https://example.com/c", "document_id": "c"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let documents = collect_documents(dir.path()).unwrap();
        assert_eq!(documents.len(), 3);
        assert_eq!(documents[0].raw_text, "Nancy Pelosi spoke");
        assert_eq!(documents[2].id(), "c");
    }
}
