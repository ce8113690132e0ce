//! Periodic poll driver
//!
//! Every tick loads the tracked-player set fresh and reconciles each player in
//! its own task, bounded by a semaphore. A player's failure is logged and
//! counted; it never aborts the cycle for anyone else. Shutdown stops new
//! cycles, stops starting new players, and cuts pending backoff sleeps short.
//! Reconciliations already past their upstream calls run to completion.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::reconcile::{CycleOutcome, ReconcileEngine};
use crate::error::{TrackerError, TrackerResult};
use crate::shutdown::ShutdownSignal;
use crate::upstream::{retry_with_backoff, RetryConfig};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub max_concurrent_players: usize,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(240),
            max_concurrent_players: 8,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub players: usize,
    pub events: usize,
    pub baselines: usize,
    pub unchanged: usize,
    pub duplicates: usize,
    pub failures: usize,
    pub cancelled: usize,
    /// Context deliveries that failed across all published events.
    pub delivery_failures: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Unchanged => self.unchanged += 1,
            CycleOutcome::Baseline => self.baselines += 1,
            CycleOutcome::DuplicateMatch => self.duplicates += 1,
            CycleOutcome::Published { report, .. } => {
                self.events += 1;
                self.delivery_failures += report.failed.len();
            }
        }
    }
}

pub struct PollScheduler {
    engine: Arc<ReconcileEngine>,
    config: SchedulerConfig,
}

impl PollScheduler {
    pub fn new(engine: Arc<ReconcileEngine>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Poll until shutdown. The first cycle starts immediately.
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            max_concurrent = self.config.max_concurrent_players,
            "🚀 Poll scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.run_cycle(&shutdown).await {
                warn!(error = %e, "Poll cycle aborted, retrying next tick");
            }

            if shutdown.is_triggered() {
                break;
            }
        }

        info!("🛑 Poll scheduler stopped");
    }

    /// One pass over every tracked player. Fails only if the player set
    /// itself cannot be loaded.
    pub async fn run_cycle(&self, shutdown: &ShutdownSignal) -> TrackerResult<CycleReport> {
        let players = self.engine.store().load_tracked_players().await?;
        let mut report = CycleReport {
            players: players.len(),
            ..Default::default()
        };

        if players.is_empty() {
            debug!("No tracked players, nothing to poll");
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_players.max(1)));
        let mut tasks = JoinSet::new();

        for player in players {
            let engine = self.engine.clone();
            let permits = permits.clone();
            let retry = self.config.retry.clone();
            let mut shutdown = shutdown.clone();

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (player, Err(TrackerError::Cancelled));
                };
                if shutdown.is_triggered() {
                    return (player, Err(TrackerError::Cancelled));
                }

                let label = format!("reconcile {}", player.display_name);
                let result = retry_with_backoff(&label, &retry, &mut shutdown, || {
                    engine.reconcile(&player)
                })
                .await;
                (player, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(&outcome),
                Ok((player, Err(TrackerError::Cancelled))) => {
                    debug!(player = %player.display_name, "Reconciliation cancelled by shutdown");
                    report.cancelled += 1;
                }
                Ok((player, Err(e))) => {
                    warn!(
                        player = %player.display_name,
                        kind = e.kind(),
                        error = %e,
                        "Reconciliation failed, skipping until next cycle"
                    );
                    report.failures += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Reconciliation task panicked");
                    report.failures += 1;
                }
            }
        }

        info!(
            players = report.players,
            events = report.events,
            unchanged = report.unchanged,
            failures = report.failures,
            "✅ Poll cycle complete"
        );
        Ok(report)
    }
}
