//! Periodic background maintenance.
//!
//! A [`MaintenanceScheduler`] runs the batch intelligence passes
//! (co-occurrence detection, consolidation and deprecation) on an interval.
//! Passes are synchronous and take the write lock per step, so each run is
//! moved onto the blocking pool. Shutting down cancels an in-flight run
//! between write steps and waits for the loop to exit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::KnowledgeGraph;
use crate::error::{Error, Result};
use crate::intelligence::{
    CancelFlag, ConsolidationReport, CoOccurrenceReport, DeprecationReport, Intelligence,
};

/// Which passes run, and how often.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    /// Seconds between runs. The first run happens one interval after spawn.
    pub interval_secs: u64,
    pub co_occurrence: bool,
    pub consolidation: bool,
    pub deprecation: bool,
    /// Overrides `intelligence.consolidation_threshold` when set.
    pub consolidation_threshold: Option<f64>,
    /// Evidence events a solution needs before it can be deprecated.
    pub usage_floor: u64,
    pub effectiveness_floor: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            co_occurrence: true,
            consolidation: true,
            deprecation: true,
            consolidation_threshold: None,
            usage_floor: 3,
            effectiveness_floor: 0.3,
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config(
                "maintenance.interval_secs must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.effectiveness_floor) {
            return Err(Error::Config(format!(
                "maintenance.effectiveness_floor must be in [0, 1], got {}",
                self.effectiveness_floor
            )));
        }
        if let Some(t) = self.consolidation_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::Config(format!(
                    "maintenance.consolidation_threshold must be in [0, 1], got {}",
                    t
                )));
            }
        }
        Ok(())
    }
}

/// What one maintenance run did. Disabled passes are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub co_occurrence: Option<CoOccurrenceReport>,
    pub consolidation: Option<ConsolidationReport>,
    pub deprecation: Option<DeprecationReport>,
    pub cancelled: bool,
}

/// Runs the intelligence passes against a shared graph.
#[derive(Debug, Clone)]
pub struct MaintenanceScheduler {
    kg: Arc<KnowledgeGraph>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(kg: Arc<KnowledgeGraph>, config: MaintenanceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { kg, config })
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Run every enabled pass once, in order, stopping early on cancellation.
    pub fn run_once(&self, cancel: &CancelFlag) -> Result<MaintenanceReport> {
        let started_at = Utc::now();
        let intel = Intelligence::new(&self.kg).with_cancel(cancel.clone());
        let settings = &self.kg.config().intelligence;
        let mut report = MaintenanceReport {
            started_at,
            finished_at: started_at,
            co_occurrence: None,
            consolidation: None,
            deprecation: None,
            cancelled: false,
        };

        if self.config.co_occurrence && !cancel.is_cancelled() {
            let window = settings.co_occurrence_window()?;
            report.co_occurrence = Some(intel.detect_co_occurrence(window)?);
        }
        if self.config.consolidation && !cancel.is_cancelled() {
            let threshold = self
                .config
                .consolidation_threshold
                .unwrap_or(settings.consolidation_threshold);
            report.consolidation = Some(intel.consolidate(threshold)?);
        }
        if self.config.deprecation && !cancel.is_cancelled() {
            report.deprecation = Some(
                intel.deprecate(self.config.usage_floor, self.config.effectiveness_floor)?,
            );
        }

        report.cancelled = cancel.is_cancelled();
        report.finished_at = Utc::now();
        info!(
            created = report.co_occurrence.as_ref().map_or(0, |r| r.created),
            merged = report.consolidation.as_ref().map_or(0, |r| r.merged.len()),
            deprecated = report.deprecation.as_ref().map_or(0, |r| r.deprecated.len()),
            cancelled = report.cancelled,
            "Maintenance run complete"
        );
        Ok(report)
    }

    /// Start the periodic loop on the current tokio runtime.
    ///
    /// Returns `None` if maintenance is disabled.
    pub fn spawn(self) -> Option<MaintenanceHandle> {
        if !self.config.enabled {
            info!("Background maintenance disabled");
            return None;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cancel = CancelFlag::new();
        let runs = Arc::new(AtomicU64::new(0));
        let interval = Duration::from_secs(self.config.interval_secs);

        let loop_cancel = cancel.clone();
        let loop_runs = runs.clone();
        let scheduler = Arc::new(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if loop_cancel.is_cancelled() {
                    break;
                }

                let worker = scheduler.clone();
                let cancel = loop_cancel.clone();
                match tokio::task::spawn_blocking(move || worker.run_once(&cancel)).await {
                    Ok(Ok(report)) => {
                        loop_runs.fetch_add(1, Ordering::SeqCst);
                        debug!(?report, "Maintenance report");
                    }
                    Ok(Err(e)) => warn!(error = %e, "Maintenance run failed"),
                    Err(e) => warn!(error = %e, "Maintenance worker panicked"),
                }
            }
            debug!("Maintenance loop stopped");
        });

        info!(interval_secs = interval.as_secs(), "Background maintenance started");
        Some(MaintenanceHandle {
            shutdown: shutdown_tx,
            cancel,
            runs,
            task,
        })
    }
}

/// Handle to a running maintenance loop.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    cancel: CancelFlag,
    runs: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Completed runs so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Cancel any in-flight run and wait for the loop to exit.
    pub async fn shutdown(self) -> Result<u64> {
        self.cancel.cancel();
        // The loop may already have exited; a closed channel is fine
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Maintenance task failed: {}", e)))?;
        Ok(self.runs.load(Ordering::SeqCst))
    }
}
