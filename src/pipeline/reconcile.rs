//! Scheduled graph reconciliation
//!
//! Sweeps documents whose relational state is ahead of the graph and replays
//! their persisted graph payload through the [`WriteCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::coordinator::WriteCoordinator;
use crate::config::ReconciliationConfig;
use crate::metrics;
use crate::models::SyncState;
use crate::ontology::OntologyResult;

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub synced: usize,
    pub still_pending: usize,
    pub failed: usize,
    /// Documents whose record could not be read or updated
    pub errors: usize,
}

pub struct Reconciler {
    coordinator: Arc<WriteCoordinator>,
    batch_size: usize,
    interval: Duration,
}

impl Reconciler {
    pub fn new(coordinator: Arc<WriteCoordinator>, config: &ReconciliationConfig) -> Self {
        Self {
            coordinator,
            batch_size: config.batch_size.max(1),
            interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Retry the graph write of up to `batch_size` owed documents
    pub async fn run_pass(&self) -> OntologyResult<ReconcileReport> {
        let relational = self.coordinator.relational();
        let records = relational.pending_graph_syncs(self.batch_size).await?;
        let mut report = ReconcileReport {
            scanned: records.len(),
            ..Default::default()
        };

        for record in records {
            match self.coordinator.reconcile_document(&record.document_id).await {
                Ok(Some(SyncState::GraphSynced)) => report.synced += 1,
                Ok(Some(SyncState::GraphFailed)) => report.failed += 1,
                Ok(Some(_)) => report.still_pending += 1,
                Ok(None) => debug!(document_id = %record.document_id, "Already reconciled"),
                Err(e) => {
                    warn!(document_id = %record.document_id, error = %e, "Reconciliation failed");
                    report.errors += 1;
                }
            }
        }

        let owed = relational.count_sync_state(SyncState::GraphPending).await?
            + relational.count_sync_state(SyncState::RelationalCommitted).await?;
        metrics::set_graph_pending(owed.max(0) as usize);

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                synced = report.synced,
                still_pending = report.still_pending,
                failed = report.failed,
                errors = report.errors,
                "Reconciliation pass finished"
            );
        }
        Ok(report)
    }

    /// Run passes on a fixed interval until `shutdown` flips to true
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_pass().await {
                        warn!(error = %e, "Reconciliation pass aborted");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }
}
