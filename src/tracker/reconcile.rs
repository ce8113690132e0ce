//! Per-player reconciliation
//!
//! One cycle for one player:
//! 1. read the last persisted snapshot and match id
//! 2. fetch the current rank and latest match id (details only for a new match)
//! 3. classify the transition and build the cycle's writes + event
//! 4. commit the writes as one unit, then publish
//!
//! Nothing is written before every upstream call has succeeded, so a cycle that
//! fails part-way can be re-run from scratch by the retry loop.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::TrackerResult;
use crate::ladder;
use crate::models::{
    DeltaTag, LadderPosition, MatchLink, MatchRecord, PlacementState, PlayerId,
    ProgressDeltaEvent, RankSnapshot, RankState, TrackedPlayer, TrackerEvent,
};
use crate::notify::{NotificationSink, PublishReport};
use crate::season::Season;
use crate::storage::{CommitOutcome, CycleWrite, TrackerStore};
use crate::upstream::DataSource;

#[derive(Debug, Clone, Copy)]
pub struct ReconcilePolicy {
    /// Placement games before a tier must be assigned.
    pub placement_game_cap: u8,
    /// Games strictly shorter than this are remakes.
    pub remake_threshold_secs: i64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            placement_game_cap: 5,
            remake_threshold_secs: 210,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing new; nothing written.
    Unchanged,
    /// State persisted without an announcement (first sight, season reset).
    Baseline,
    /// The match landed in the store between the lookup and the commit; nothing written.
    DuplicateMatch,
    Published {
        event: TrackerEvent,
        report: PublishReport,
    },
}

impl CycleOutcome {
    pub fn event(&self) -> Option<&TrackerEvent> {
        match self {
            CycleOutcome::Published { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Writes and announcement decided for one cycle.
struct Plan {
    write: CycleWrite,
    event: Option<TrackerEvent>,
}

pub struct ReconcileEngine {
    source: Arc<dyn DataSource>,
    store: Arc<dyn TrackerStore>,
    sink: Arc<dyn NotificationSink>,
    policy: ReconcilePolicy,
}

impl ReconcileEngine {
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<dyn TrackerStore>,
        sink: Arc<dyn NotificationSink>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            source,
            store,
            sink,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn TrackerStore> {
        &self.store
    }

    pub async fn reconcile(&self, player: &TrackedPlayer) -> TrackerResult<CycleOutcome> {
        let id = &player.id;
        let previous = self.store.load_last_rank(id).await?;
        let last_match = self.store.load_last_match_id(id).await?;

        let current = self.source.get_current_rank(id).await?;
        let latest = self.source.get_latest_match_id(id).await?;
        let record = match latest.filter(|m| Some(m) != last_match.as_ref()) {
            Some(match_id) if self.store.has_match(id, &match_id).await? => {
                // upstream fell back to an older game we already hold
                debug!(
                    player = %player.display_name,
                    match_id = %match_id,
                    "Latest match already stored"
                );
                None
            }
            Some(match_id) => Some(self.source.get_match_details(&match_id, id).await?),
            None => None,
        };

        let plan = match previous {
            None => Some(self.first_observation(player, current, record).await?),
            Some(prev) => match prev.state.clone() {
                RankState::Unranked => self.placement_phase(player, prev, current, record).await?,
                RankState::Ranked(old) => {
                    self.ranked_phase(player, prev, old, current, record).await?
                }
            },
        };

        let Some(plan) = plan else {
            debug!(player = %player.display_name, "No change");
            return Ok(CycleOutcome::Unchanged);
        };

        if self.store.commit_cycle(&plan.write).await? == CommitOutcome::DuplicateMatch {
            debug!(player = %player.display_name, "Match already recorded, skipping");
            return Ok(CycleOutcome::DuplicateMatch);
        }

        match plan.event {
            None => Ok(CycleOutcome::Baseline),
            Some(event) => {
                let report = self.sink.publish(&event, &player.contexts).await;
                Ok(CycleOutcome::Published { event, report })
            }
        }
    }

    /// Nothing stored yet: record where the player stands, announce nothing.
    async fn first_observation(
        &self,
        player: &TrackedPlayer,
        current: RankSnapshot,
        record: Option<MatchRecord>,
    ) -> TrackerResult<Plan> {
        let mut write = CycleWrite::new(player.id.clone());
        if current.is_unranked() {
            let season = Season::containing(current.captured_at);
            write.placement = Some(self.placement_for(&player.id, season).await?);
        }
        write.progress = Some(ProgressDeltaEvent::new(
            player.id.clone(),
            0,
            None,
            current.clone(),
            DeltaTag::Baseline,
            link_for(record.as_ref()),
        ));
        write.record = record;

        info!(player = %player.display_name, rank = %current, "📍 Baseline recorded");
        Ok(Plan { write, event: None })
    }

    async fn placement_phase(
        &self,
        player: &TrackedPlayer,
        previous: RankSnapshot,
        current: RankSnapshot,
        record: Option<MatchRecord>,
    ) -> TrackerResult<Option<Plan>> {
        let cap = self.policy.placement_game_cap;
        let mut write = CycleWrite::new(player.id.clone());

        let Some(record) = record else {
            if current.is_unranked() {
                return Ok(None);
            }
            // tier assigned a cycle after the last placement game was seen
            let season = Season::containing(current.captured_at);
            let mut placement = self.placement_for(&player.id, season).await?;
            write.progress = Some(ProgressDeltaEvent::new(
                player.id.clone(),
                0,
                Some(previous),
                current.clone(),
                DeltaTag::PlacementCompleted,
                MatchLink::NoAssociatedMatch,
            ));
            if placement.completed {
                info!(
                    player = %player.display_name,
                    rank = %current,
                    "Tier assigned after announced placements"
                );
                return Ok(Some(Plan { write, event: None }));
            }
            placement.completed = true;
            write.placement = Some(placement);
            return Ok(Some(Plan {
                write,
                event: Some(TrackerEvent::PlacementCompleted {
                    player: player.id.clone(),
                    display_name: player.display_name.clone(),
                    record: None,
                    placement,
                    final_rank: current,
                }),
            }));
        };

        let season = Season::containing(record.game_end);
        let mut placement = self.placement_for(&player.id, season).await?;
        let remake = record.is_remake(self.policy.remake_threshold_secs);
        if !remake {
            placement.record_game(record.win, cap);
        }
        if !current.is_unranked() {
            write.progress = Some(ProgressDeltaEvent::new(
                player.id.clone(),
                0,
                Some(previous),
                current.clone(),
                DeltaTag::PlacementCompleted,
                MatchLink::Match(record.match_id.clone()),
            ));
        }

        if placement.completed {
            // completion already announced this season; keep the game, stay quiet
            write.placement = Some(placement);
            write.record = Some(record);
            return Ok(Some(Plan { write, event: None }));
        }

        let event = if !current.is_unranked() || placement.is_complete(cap) {
            placement.completed = true;
            TrackerEvent::PlacementCompleted {
                player: player.id.clone(),
                display_name: player.display_name.clone(),
                record: Some(record.clone()),
                placement,
                final_rank: current,
            }
        } else {
            TrackerEvent::PlacementProgress {
                player: player.id.clone(),
                display_name: player.display_name.clone(),
                record: record.clone(),
                placement,
                remake,
            }
        };
        write.placement = Some(placement);
        write.record = Some(record);

        Ok(Some(Plan {
            write,
            event: Some(event),
        }))
    }

    async fn ranked_phase(
        &self,
        player: &TrackedPlayer,
        previous: RankSnapshot,
        old: LadderPosition,
        current: RankSnapshot,
        record: Option<MatchRecord>,
    ) -> TrackerResult<Option<Plan>> {
        let mut write = CycleWrite::new(player.id.clone());

        if record.is_none() && previous.same_rank(&current) {
            return Ok(None);
        }

        let new = match &current.state {
            RankState::Ranked(p) => p.clone(),
            RankState::Unranked => {
                // season reset: start over in placements, announce nothing
                let season = Season::containing(current.captured_at);
                write.placement = Some(self.placement_for(&player.id, season).await?);
                write.progress = Some(ProgressDeltaEvent::new(
                    player.id.clone(),
                    0,
                    Some(previous),
                    current,
                    DeltaTag::Baseline,
                    link_for(record.as_ref()),
                ));
                write.record = record;
                info!(player = %player.display_name, "🔄 Rank reset, back in placements");
                return Ok(Some(Plan { write, event: None }));
            }
        };

        let delta = ladder::between(&old, &new);
        if delta.is_data_quality_issue() {
            warn!(
                player = %player.display_name,
                old = %old,
                new = %new,
                "Unrecognized ladder data, using plain point difference"
            );
        }

        let Some(record) = record else {
            let progress = ProgressDeltaEvent::new(
                player.id.clone(),
                delta.points,
                Some(previous),
                current,
                DeltaTag::Inferred,
                MatchLink::NoAssociatedMatch,
            );
            write.progress = Some(progress.clone());
            return Ok(Some(Plan {
                write,
                event: Some(TrackerEvent::InferredSkip {
                    player: player.id.clone(),
                    display_name: player.display_name.clone(),
                    progress,
                }),
            }));
        };

        let progress = ProgressDeltaEvent::new(
            player.id.clone(),
            delta.points,
            Some(previous),
            current,
            DeltaTag::RankedMatch,
            MatchLink::Match(record.match_id.clone()),
        );
        write.progress = Some(progress.clone());
        write.record = Some(record.clone());

        Ok(Some(Plan {
            write,
            event: Some(TrackerEvent::RankedMatch {
                player: player.id.clone(),
                display_name: player.display_name.clone(),
                progress,
                record,
            }),
        }))
    }

    /// Stored counter for the season, seeded from upstream when there is none.
    async fn placement_for(&self, player: &PlayerId, season: Season) -> TrackerResult<PlacementState> {
        if let Some(state) = self.store.load_placement_state(player, season).await? {
            return Ok(state);
        }
        let mut seeded = self.source.get_placement_status(player, season).await?;
        seeded.season = season;
        debug!(
            player = %player,
            season = %season,
            games = seeded.games_played,
            "Seeded placement counter"
        );
        Ok(seeded)
    }
}

fn link_for(record: Option<&MatchRecord>) -> MatchLink {
    match record {
        Some(r) => MatchLink::Match(r.match_id.clone()),
        None => MatchLink::NoAssociatedMatch,
    }
}
