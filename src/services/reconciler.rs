use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::{
    config::Config,
    constants::RECONCILE_BATCH_SIZE,
    db::Database,
    error::Result,
    services::{CreationService, ReconcileReport},
};

/// Periodically finishes or fails creations whose request died mid-saga,
/// and purges expired sessions.
pub struct CreationReconciler {
    creations: CreationService,
    db: Database,
    every: Duration,
    stale_after: ChronoDuration,
}

impl CreationReconciler {
    pub fn new(creations: CreationService, db: Database, config: &Config) -> Self {
        Self {
            creations,
            db,
            every: Duration::from_secs(config.reconcile_interval_secs.max(1)),
            stale_after: ChronoDuration::seconds(config.reconcile_stale_after_secs.max(0)),
        }
    }

    pub async fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match self.run_once().await {
                    Ok(report) if report != ReconcileReport::default() => tracing::info!(
                        "Reconciler completed={} failed={}",
                        report.completed,
                        report.failed
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::error!("Reconciler error: {}", e),
                }
            }
        });
    }

    pub async fn run_once(&self) -> Result<ReconcileReport> {
        let now = Utc::now();
        let report = self
            .creations
            .reconcile_stale(now - self.stale_after, RECONCILE_BATCH_SIZE)
            .await?;

        match self.db.delete_expired_sessions(now).await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!("Purged {} expired sessions", purged),
            Err(e) => tracing::warn!("Session purge failed: {}", e),
        }
        Ok(report)
    }
}
