//! Event delivery to consuming contexts
//!
//! A sink only knows how to hand one event to one context. `publish` fans an
//! event out to every context watching the player; a failed context is logged
//! and skipped, never retried here and never allowed to undo persisted state.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::models::{ConsumingContext, TrackerEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Context ids that could not be reached.
    pub failed: Vec<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &TrackerEvent, context: &ConsumingContext) -> TrackerResult<()>;

    async fn publish(&self, event: &TrackerEvent, contexts: &[ConsumingContext]) -> PublishReport {
        let mut report = PublishReport::default();
        for context in contexts {
            match self.deliver(event, context).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        player = %event.display_name(),
                        context = %context.context_id,
                        kind = event.kind(),
                        error = %e,
                        "Failed to deliver event"
                    );
                    report.failed.push(context.context_id.clone());
                }
            }
        }
        report
    }
}

/// Writes every event to the log. Useful on its own for a headless tracker.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, event: &TrackerEvent, context: &ConsumingContext) -> TrackerResult<()> {
        match event {
            TrackerEvent::RankedMatch {
                display_name,
                progress,
                record,
                ..
            } => info!(
                player = %display_name,
                context = %context.context_id,
                champion = %record.champion_name,
                win = record.win,
                delta = progress.delta,
                rank = %progress.current,
                "🎮 Ranked match"
            ),
            TrackerEvent::InferredSkip {
                display_name,
                progress,
                ..
            } => info!(
                player = %display_name,
                context = %context.context_id,
                delta = progress.delta,
                rank = %progress.current,
                "👻 Rank moved without a match (dodge or voided game)"
            ),
            TrackerEvent::PlacementProgress {
                display_name,
                placement,
                remake,
                ..
            } => info!(
                player = %display_name,
                context = %context.context_id,
                games = placement.games_played,
                wins = placement.wins,
                losses = placement.losses,
                remake,
                "📋 Placement game"
            ),
            TrackerEvent::PlacementCompleted {
                display_name,
                placement,
                final_rank,
                ..
            } => info!(
                player = %display_name,
                context = %context.context_id,
                wins = placement.wins,
                losses = placement.losses,
                rank = %final_rank,
                "🏁 Placements complete"
            ),
        }
        Ok(())
    }
}

/// One event addressed to one context.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub context: ConsumingContext,
    pub event: TrackerEvent,
}

/// Fans deliveries out on a broadcast channel for renderers to subscribe to.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Delivery>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn deliver(&self, event: &TrackerEvent, context: &ConsumingContext) -> TrackerResult<()> {
        self.tx
            .send(Delivery {
                context: context.clone(),
                event: event.clone(),
            })
            .map(|_| ())
            .map_err(|_| TrackerError::Delivery("no subscribers".to_string()))
    }
}
