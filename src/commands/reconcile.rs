use anyhow::Result;
use tokio::sync::watch;

use polgraph::config::Config;

/// Run one reconciliation pass, or keep running until Ctrl+C with `watch`
pub async fn reconcile(config: &Config, watch_mode: bool) -> Result<()> {
    let service = super::connect(config).await?;

    if !watch_mode {
        let report = service.reconciler.run_pass().await?;
        println!("Reconciliation pass");
        println!("===================");
        println!("Scanned:       {}", report.scanned);
        println!("Synced:        {}", report.synced);
        println!("Still pending: {}", report.still_pending);
        println!("Failed:        {}", report.failed);
        println!("Errors:        {}", report.errors);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    println!(
        "Reconciling every {}s (Ctrl+C to stop)...",
        config.reconcile_interval().as_secs()
    );
    service.reconciler.run_until(shutdown_rx).await;
    Ok(())
}
