use super::commands::{ChainBuild, ScanReport};
use super::engine::WorkflowEngine;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Periodic trigger that gives newly eligible loans their approval chain.
///
/// Loans skipped for lack of configuration are not retried on their own
/// account; they are simply picked up again by the next scan.
pub struct ChainScheduler {
    engine: Arc<WorkflowEngine>,
}

impl ChainScheduler {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    /// Scans once. A failure on one loan is logged and does not stop the scan.
    pub async fn run_once(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        for loan_id in self.engine.loans_awaiting_chain().await? {
            match self.engine.build_and_assign_chain(loan_id).await {
                Ok(ChainBuild::Created(_)) => report.created.push(loan_id),
                Ok(ChainBuild::Skipped { loan_id, reason }) => report.skipped.push((loan_id, reason)),
                Err(err) => {
                    error!(loan_id, error = %err, "failed to build approval chain");
                    report.failed.push(loan_id);
                }
            }
        }

        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "approval chain scan finished"
        );
        Ok(report)
    }

    /// Runs a scan every `period` until `shutdown` carries `true`.
    pub async fn run_periodic(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.run_once().await {
                        error!(error = %err, "approval chain scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("approval chain scheduler stopped");
                        return;
                    }
                }
            }
        }
    }
}
