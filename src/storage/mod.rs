//! Persistent tracker state
//!
//! The engine reads last-known state and writes one cycle's outcome through
//! `TrackerStore`. A cycle's writes go through `commit_cycle` so that a match
//! row is never stored without the snapshot / placement update it belongs to.

pub mod db_storage;

use async_trait::async_trait;

use crate::error::TrackerResult;
use crate::models::{
    MatchRecord, PlacementState, PlayerId, ProgressDeltaEvent, RankSnapshot, TrackedPlayer,
};
use crate::season::Season;

pub use db_storage::SqliteStore;

/// Everything one reconciliation cycle wants persisted for one player.
#[derive(Debug, Clone)]
pub struct CycleWrite {
    pub player: PlayerId,
    pub record: Option<MatchRecord>,
    pub progress: Option<ProgressDeltaEvent>,
    pub placement: Option<PlacementState>,
}

impl CycleWrite {
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            record: None,
            progress: None,
            placement: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_none() && self.progress.is_none() && self.placement.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The match was already stored; nothing in the write was applied.
    DuplicateMatch,
}

#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Players watched by at least one context, with all of their contexts.
    async fn load_tracked_players(&self) -> TrackerResult<Vec<TrackedPlayer>>;

    async fn load_last_rank(&self, player: &PlayerId) -> TrackerResult<Option<RankSnapshot>>;

    /// Id of the most recently finished stored match.
    async fn load_last_match_id(&self, player: &PlayerId) -> TrackerResult<Option<String>>;

    /// Whether (player, match id) is already stored, regardless of how old it is.
    async fn has_match(&self, player: &PlayerId, match_id: &str) -> TrackerResult<bool>;

    async fn load_placement_state(
        &self,
        player: &PlayerId,
        season: Season,
    ) -> TrackerResult<Option<PlacementState>>;

    /// Idempotent on (player, match id). Returns whether a row was inserted.
    async fn save_match(&self, record: &MatchRecord) -> TrackerResult<bool>;

    async fn save_rank_snapshot(&self, progress: &ProgressDeltaEvent) -> TrackerResult<()>;

    async fn save_placement_state(
        &self,
        player: &PlayerId,
        state: &PlacementState,
    ) -> TrackerResult<()>;

    /// Apply one cycle's writes. Stores with transactions should override this
    /// so a failure part-way leaves nothing behind.
    async fn commit_cycle(&self, write: &CycleWrite) -> TrackerResult<CommitOutcome> {
        if let Some(record) = &write.record {
            if !self.save_match(record).await? {
                return Ok(CommitOutcome::DuplicateMatch);
            }
        }
        if let Some(progress) = &write.progress {
            self.save_rank_snapshot(progress).await?;
        }
        if let Some(placement) = &write.placement {
            self.save_placement_state(&write.player, placement).await?;
        }
        Ok(CommitOutcome::Committed)
    }
}
