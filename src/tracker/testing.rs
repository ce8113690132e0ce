//! In-memory collaborators and end-to-end engine / scheduler tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::reconcile::{CycleOutcome, ReconcileEngine, ReconcilePolicy};
use super::scheduler::{PollScheduler, SchedulerConfig};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{
    ConsumingContext, DeltaTag, Division, LadderPosition, MatchLink, MatchRecord,
    PlacementState, PlayerId, ProgressDeltaEvent, RankSnapshot, Tier, TrackedPlayer,
    TrackerEvent,
};
use crate::notify::NotificationSink;
use crate::season::Season;
use crate::shutdown::{self, ShutdownSignal};
use crate::storage::TrackerStore;
use crate::upstream::{DataSource, RetryConfig};

#[derive(Debug, Clone, Copy)]
enum Failure {
    NotFound,
    Transient { remaining: u32 },
}

#[derive(Default)]
struct UpstreamPlayer {
    rank: Option<RankSnapshot>,
    latest: Option<String>,
    matches: HashMap<String, MatchRecord>,
    placement: Option<PlacementState>,
    failure: Option<Failure>,
}

#[derive(Default)]
pub(crate) struct FakeSource {
    players: Mutex<HashMap<PlayerId, UpstreamPlayer>>,
}

impl FakeSource {
    fn set_rank(&self, player: &PlayerId, rank: RankSnapshot) {
        self.players.lock().entry(player.clone()).or_default().rank = Some(rank);
    }

    fn play(&self, record: MatchRecord) {
        let mut players = self.players.lock();
        let p = players.entry(record.player_id.clone()).or_default();
        p.latest = Some(record.match_id.clone());
        p.matches.insert(record.match_id.clone(), record);
    }

    fn set_placement(&self, player: &PlayerId, state: PlacementState) {
        self.players.lock().entry(player.clone()).or_default().placement = Some(state);
    }

    fn fail(&self, player: &PlayerId, failure: Failure) {
        self.players.lock().entry(player.clone()).or_default().failure = Some(failure);
    }

    fn check(&self, player: &PlayerId) -> TrackerResult<()> {
        let mut players = self.players.lock();
        let Some(p) = players.get_mut(player) else {
            return Err(TrackerError::NotFound(player.to_string()));
        };
        let failure = p.failure;
        match failure {
            Some(Failure::NotFound) => Err(TrackerError::NotFound(player.to_string())),
            Some(Failure::Transient { remaining }) if remaining > 0 => {
                p.failure = Some(Failure::Transient {
                    remaining: remaining - 1,
                });
                Err(TrackerError::Transient("connection reset".into()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn get_current_rank(&self, player: &PlayerId) -> TrackerResult<RankSnapshot> {
        self.check(player)?;
        Ok(self.players.lock()[player]
            .rank
            .clone()
            .unwrap_or_else(|| RankSnapshot::unranked(at(0))))
    }

    async fn get_latest_match_id(&self, player: &PlayerId) -> TrackerResult<Option<String>> {
        self.check(player)?;
        Ok(self.players.lock()[player].latest.clone())
    }

    async fn get_match_details(
        &self,
        match_id: &str,
        player: &PlayerId,
    ) -> TrackerResult<MatchRecord> {
        self.check(player)?;
        self.players.lock()[player]
            .matches
            .get(match_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(match_id.to_string()))
    }

    async fn get_placement_status(
        &self,
        player: &PlayerId,
        season: Season,
    ) -> TrackerResult<PlacementState> {
        self.check(player)?;
        Ok(self.players.lock()[player]
            .placement
            .unwrap_or_else(|| PlacementState::new(season)))
    }
}

#[derive(Default)]
struct MemoryState {
    players: Vec<TrackedPlayer>,
    snapshots: Vec<ProgressDeltaEvent>,
    matches: Vec<MatchRecord>,
    placements: HashMap<(PlayerId, Season), PlacementState>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    fn track(&self, player: TrackedPlayer) {
        self.state.lock().players.push(player);
    }

    fn snapshots(&self, player: &PlayerId) -> Vec<ProgressDeltaEvent> {
        self.state
            .lock()
            .snapshots
            .iter()
            .filter(|s| &s.player_id == player)
            .cloned()
            .collect()
    }

    fn match_count(&self, player: &PlayerId) -> usize {
        self.state
            .lock()
            .matches
            .iter()
            .filter(|m| &m.player_id == player)
            .count()
    }
}

#[async_trait]
impl TrackerStore for MemoryStore {
    async fn load_tracked_players(&self) -> TrackerResult<Vec<TrackedPlayer>> {
        Ok(self.state.lock().players.clone())
    }

    async fn load_last_rank(&self, player: &PlayerId) -> TrackerResult<Option<RankSnapshot>> {
        Ok(self
            .state
            .lock()
            .snapshots
            .iter()
            .filter(|s| &s.player_id == player)
            .last()
            .map(|s| s.current.clone()))
    }

    async fn load_last_match_id(&self, player: &PlayerId) -> TrackerResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .matches
            .iter()
            .filter(|m| &m.player_id == player)
            .max_by_key(|m| m.game_end)
            .map(|m| m.match_id.clone()))
    }

    async fn has_match(&self, player: &PlayerId, match_id: &str) -> TrackerResult<bool> {
        Ok(self
            .state
            .lock()
            .matches
            .iter()
            .any(|m| &m.player_id == player && m.match_id == match_id))
    }

    async fn load_placement_state(
        &self,
        player: &PlayerId,
        season: Season,
    ) -> TrackerResult<Option<PlacementState>> {
        Ok(self
            .state
            .lock()
            .placements
            .get(&(player.clone(), season))
            .copied())
    }

    async fn save_match(&self, record: &MatchRecord) -> TrackerResult<bool> {
        let mut state = self.state.lock();
        if state
            .matches
            .iter()
            .any(|m| m.player_id == record.player_id && m.match_id == record.match_id)
        {
            return Ok(false);
        }
        state.matches.push(record.clone());
        Ok(true)
    }

    async fn save_rank_snapshot(&self, progress: &ProgressDeltaEvent) -> TrackerResult<()> {
        self.state.lock().snapshots.push(progress.clone());
        Ok(())
    }

    async fn save_placement_state(
        &self,
        player: &PlayerId,
        state: &PlacementState,
    ) -> TrackerResult<()> {
        self.state
            .lock()
            .placements
            .insert((player.clone(), state.season), *state);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    delivered: Mutex<Vec<(String, TrackerEvent)>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<TrackerEvent> {
        self.delivered.lock().iter().map(|(_, e)| e.clone()).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, event: &TrackerEvent, context: &ConsumingContext) -> TrackerResult<()> {
        self.delivered
            .lock()
            .push((context.context_id.clone(), event.clone()));
        Ok(())
    }
}

/// 2026-06-01 00:00 UTC plus `mins`, inside split 2.
fn at(mins: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(mins)
}

fn ranked(tier: Tier, division: Option<Division>, lp: i32, mins: i64) -> RankSnapshot {
    RankSnapshot::ranked(LadderPosition::new(tier, division, lp), at(mins))
}

fn game(player: &PlayerId, id: &str, win: bool, duration_secs: i64, mins: i64) -> MatchRecord {
    MatchRecord {
        player_id: player.clone(),
        match_id: id.to_string(),
        champion_name: "Orianna".to_string(),
        kills: 4,
        deaths: 3,
        assists: 11,
        win,
        game_duration_secs: duration_secs,
        game_end: at(mins),
        queue_id: 420,
        creep_score: 230,
        damage_to_champions: 24000,
        team_damage_share: 0.29,
        kill_participation: 0.6,
    }
}

fn tracked(id: &str) -> TrackedPlayer {
    TrackedPlayer {
        id: PlayerId::new(id),
        display_name: format!("{}-name", id),
        contexts: vec![
            ConsumingContext {
                context_id: "guild-1".into(),
                delivery_target: Some("chan-1".into()),
            },
            ConsumingContext {
                context_id: "guild-2".into(),
                delivery_target: None,
            },
        ],
    }
}

struct Harness {
    source: Arc<FakeSource>,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    engine: Arc<ReconcileEngine>,
}

fn harness() -> Harness {
    let source = Arc::new(FakeSource::default());
    let store = Arc::new(MemoryStore::default());
    let sink = Arc::new(RecordingSink::default());
    let engine = Arc::new(ReconcileEngine::new(
        source.clone(),
        store.clone(),
        sink.clone(),
        ReconcilePolicy::default(),
    ));
    Harness {
        source,
        store,
        sink,
        engine,
    }
}

impl Harness {
    /// Seed a ranked baseline for `player`.
    async fn baseline(&self, player: &TrackedPlayer, rank: RankSnapshot) {
        self.source.set_rank(&player.id, rank);
        let out = self.engine.reconcile(player).await.unwrap();
        assert_eq!(out, CycleOutcome::Baseline);
    }
}

#[tokio::test]
async fn test_first_observation_is_silent_baseline() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Gold, Some(Division::II), 40, 0))
        .await;

    let rows = h.store.snapshots(&p.id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tag, DeltaTag::Baseline);
    assert_eq!(rows[0].delta, 0);
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_no_match_no_change_writes_nothing() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Gold, Some(Division::II), 40, 0))
        .await;

    // same rank, later capture time
    h.source
        .set_rank(&p.id, ranked(Tier::Gold, Some(Division::II), 40, 4));
    let out = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(out, CycleOutcome::Unchanged);
    assert_eq!(h.store.snapshots(&p.id).len(), 1);
    assert_eq!(h.store.match_count(&p.id), 0);
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_ranked_match_division_promotion() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Gold, Some(Division::IV), 80, 0))
        .await;

    h.source.play(game(&p.id, "EUW1_2", true, 1800, 30));
    h.source
        .set_rank(&p.id, ranked(Tier::Gold, Some(Division::III), 20, 31));
    let out = h.engine.reconcile(&p).await.unwrap();

    match out.event() {
        Some(TrackerEvent::RankedMatch {
            progress, record, ..
        }) => {
            assert_eq!(progress.delta, 40);
            assert_eq!(progress.tag, DeltaTag::RankedMatch);
            assert_eq!(progress.link, MatchLink::Match("EUW1_2".into()));
            assert_eq!(record.match_id, "EUW1_2");
        }
        other => panic!("expected ranked match, got {:?}", other),
    }
    assert_eq!(h.store.match_count(&p.id), 1);
    assert_eq!(h.store.snapshots(&p.id).len(), 2);
    // one delivery per watching context
    assert_eq!(h.sink.events().len(), 2);
}

#[tokio::test]
async fn test_tier_promotion_into_apex() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Diamond, Some(Division::I), 90, 0))
        .await;

    h.source.play(game(&p.id, "EUW1_3", true, 1900, 30));
    h.source.set_rank(&p.id, ranked(Tier::Master, None, 10, 31));
    let out = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(out.event().and_then(|e| e.delta()), Some(20));
}

#[tokio::test]
async fn test_rank_change_without_match_is_inferred_skip() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Gold, Some(Division::III), 10, 0))
        .await;

    h.source
        .set_rank(&p.id, ranked(Tier::Gold, Some(Division::IV), 95, 5));
    let out = h.engine.reconcile(&p).await.unwrap();

    match out.event() {
        Some(TrackerEvent::InferredSkip { progress, .. }) => {
            assert_eq!(progress.delta, -15);
            assert_eq!(progress.tag, DeltaTag::Inferred);
            assert_eq!(progress.link, MatchLink::NoAssociatedMatch);
        }
        other => panic!("expected inferred skip, got {:?}", other),
    }
    assert_eq!(h.store.match_count(&p.id), 0);
}

#[tokio::test]
async fn test_points_only_move_is_inferred_skip() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Gold, Some(Division::II), 40, 0))
        .await;
    h.source
        .set_rank(&p.id, ranked(Tier::Gold, Some(Division::II), 55, 5));
    let out = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(out.event().map(|e| e.kind()), Some("inferred_skip"));
    assert_eq!(out.event().and_then(|e| e.delta()), Some(15));
}

#[tokio::test]
async fn test_apex_to_apex_is_linear() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Master, None, 200, 0)).await;
    h.source.play(game(&p.id, "M1", false, 1500, 20));
    h.source.set_rank(&p.id, ranked(Tier::Master, None, 150, 21));
    let out = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(out.event().and_then(|e| e.delta()), Some(-50));
}

#[tokio::test]
async fn test_reobserving_match_does_not_double_apply() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Silver, Some(Division::I), 50, 0))
        .await;

    h.source.play(game(&p.id, "M1", true, 1600, 30));
    h.source
        .set_rank(&p.id, ranked(Tier::Silver, Some(Division::I), 70, 31));
    h.engine.reconcile(&p).await.unwrap();

    // nothing changed upstream since
    let again = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(again, CycleOutcome::Unchanged);
    assert_eq!(h.store.match_count(&p.id), 1);
    assert_eq!(h.store.snapshots(&p.id).len(), 2);
    assert_eq!(h.sink.events().len(), 2);
}

#[tokio::test]
async fn test_older_stored_match_is_not_a_new_match() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Silver, Some(Division::I), 50, 0))
        .await;

    // store holds a newer game; upstream reports an older, already stored one as latest
    h.store.save_match(&game(&p.id, "OLD", true, 1600, 10)).await.unwrap();
    h.store.save_match(&game(&p.id, "NEW", true, 1600, 40)).await.unwrap();
    h.source.play(game(&p.id, "OLD", true, 1600, 10));
    h.source
        .set_rank(&p.id, ranked(Tier::Silver, Some(Division::I), 70, 41));

    let out = h.engine.reconcile(&p).await.unwrap();
    match out.event() {
        Some(TrackerEvent::InferredSkip { progress, .. }) => {
            assert_eq!(progress.delta, 20);
            assert_eq!(progress.link, MatchLink::NoAssociatedMatch);
        }
        other => panic!("expected inferred skip, got {:?}", other),
    }
    assert_eq!(h.store.match_count(&p.id), 2);
    assert_eq!(h.store.snapshots(&p.id).len(), 2);

    // the rank change is recorded once, not on every cycle
    let again = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(again, CycleOutcome::Unchanged);
    assert_eq!(h.store.snapshots(&p.id).len(), 2);
    assert_eq!(h.sink.events().len(), 2);
}

#[tokio::test]
async fn test_unranked_first_observation_seeds_placements() {
    let h = harness();
    let p = tracked("p1");
    let season = Season::containing(at(0));
    let mut upstream = PlacementState::new(season);
    upstream.record_game(true, 5);
    upstream.record_game(true, 5);
    h.source.set_placement(&p.id, upstream);
    h.baseline(&p, RankSnapshot::unranked(at(0))).await;

    let stored = h
        .store
        .load_placement_state(&p.id, season)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.games_played, 2);
    assert_eq!(stored.wins, 2);
}

#[tokio::test]
async fn test_placement_games_count_skip_remakes_and_cap() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, RankSnapshot::unranked(at(0))).await;

    // remake: recorded, not counted
    h.source.play(game(&p.id, "R", false, 180, 10));
    let out = h.engine.reconcile(&p).await.unwrap();
    match out.event() {
        Some(TrackerEvent::PlacementProgress {
            placement, remake, ..
        }) => {
            assert!(*remake);
            assert_eq!(placement.games_played, 0);
        }
        other => panic!("expected placement progress, got {:?}", other),
    }
    assert_eq!(h.store.match_count(&p.id), 1);

    // exactly at the threshold counts
    h.source.play(game(&p.id, "G1", true, 210, 40));
    let out = h.engine.reconcile(&p).await.unwrap();
    match out.event() {
        Some(TrackerEvent::PlacementProgress { placement, .. }) => {
            assert_eq!(placement.games_played, 1);
            assert_eq!(placement.wins, 1);
        }
        other => panic!("expected placement progress, got {:?}", other),
    }

    for (i, win) in [false, true, true].iter().enumerate() {
        h.source
            .play(game(&p.id, &format!("G{}", i + 2), *win, 1700, 80 + i as i64 * 40));
        let out = h.engine.reconcile(&p).await.unwrap();
        assert_eq!(out.event().map(|e| e.kind()), Some("placement_progress"));
    }

    // fifth counted game hits the cap while the tier is still pending
    h.source.play(game(&p.id, "G5", false, 1700, 300));
    let out = h.engine.reconcile(&p).await.unwrap();
    match out.event() {
        Some(TrackerEvent::PlacementCompleted {
            placement,
            final_rank,
            record,
            ..
        }) => {
            assert_eq!(placement.games_played, 5);
            assert_eq!((placement.wins, placement.losses), (3, 2));
            assert!(final_rank.is_unranked());
            assert!(record.is_some());
        }
        other => panic!("expected placement completion, got {:?}", other),
    }

    // no placement event ever carried a delta, and no ranked snapshot was written
    assert!(h.sink.events().iter().all(|e| e.delta().is_none()));
    assert_eq!(h.store.snapshots(&p.id).len(), 1);
}

#[tokio::test]
async fn test_placement_completion_is_announced_once() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, RankSnapshot::unranked(at(0))).await;

    for i in 0..5 {
        h.source
            .play(game(&p.id, &format!("G{}", i), i % 2 == 0, 1700, 30 + i * 40));
        h.engine.reconcile(&p).await.unwrap();
    }
    let completions = |h: &Harness| {
        h.sink
            .events()
            .iter()
            .filter(|e| e.kind() == "placement_completed")
            .count()
    };
    // two contexts per event
    assert_eq!(completions(&h), 2);

    // still unranked: later games and remakes are stored silently
    h.source.play(game(&p.id, "G5", true, 1700, 300));
    assert_eq!(h.engine.reconcile(&p).await.unwrap(), CycleOutcome::Baseline);
    h.source.play(game(&p.id, "R", false, 120, 340));
    assert_eq!(h.engine.reconcile(&p).await.unwrap(), CycleOutcome::Baseline);
    assert_eq!(h.store.match_count(&p.id), 7);

    // tier shows up later without a match: persisted, not announced again
    h.source
        .set_rank(&p.id, ranked(Tier::Gold, Some(Division::IV), 0, 400));
    assert_eq!(h.engine.reconcile(&p).await.unwrap(), CycleOutcome::Baseline);
    assert_eq!(completions(&h), 2);
    let last = h.store.snapshots(&p.id).pop().unwrap();
    assert_eq!(last.tag, DeltaTag::PlacementCompleted);
    assert!(!last.current.is_unranked());

    // and the player is in ranked handling from here
    h.source.play(game(&p.id, "M1", true, 1700, 460));
    h.source
        .set_rank(&p.id, ranked(Tier::Gold, Some(Division::IV), 21, 461));
    let out = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(out.event().and_then(|e| e.delta()), Some(21));
}

#[tokio::test]
async fn test_placement_completes_when_tier_appears() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, RankSnapshot::unranked(at(0))).await;

    h.source.play(game(&p.id, "G1", true, 1700, 30));
    h.source
        .set_rank(&p.id, ranked(Tier::Platinum, Some(Division::III), 0, 31));
    let out = h.engine.reconcile(&p).await.unwrap();
    match out.event() {
        Some(TrackerEvent::PlacementCompleted { final_rank, .. }) => {
            assert!(!final_rank.is_unranked());
        }
        other => panic!("expected placement completion, got {:?}", other),
    }
    let rows = h.store.snapshots(&p.id);
    assert_eq!(rows.last().unwrap().tag, DeltaTag::PlacementCompleted);

    // the next game is handled as a ranked match
    h.source.play(game(&p.id, "G2", true, 1700, 70));
    h.source
        .set_rank(&p.id, ranked(Tier::Platinum, Some(Division::III), 22, 71));
    let out = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(out.event().map(|e| e.kind()), Some("ranked_match"));
    assert_eq!(out.event().and_then(|e| e.delta()), Some(22));
}

#[tokio::test]
async fn test_tier_assigned_without_match_completes_placements() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, RankSnapshot::unranked(at(0))).await;

    h.source
        .set_rank(&p.id, ranked(Tier::Silver, Some(Division::II), 12, 10));
    let out = h.engine.reconcile(&p).await.unwrap();
    match out.event() {
        Some(TrackerEvent::PlacementCompleted { record, .. }) => assert!(record.is_none()),
        other => panic!("expected placement completion, got {:?}", other),
    }
    let last = h.store.snapshots(&p.id).pop().unwrap();
    assert_eq!(last.link, MatchLink::NoAssociatedMatch);
    assert_eq!(last.delta, 0);
}

#[tokio::test]
async fn test_season_reset_rebaselines_silently() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Emerald, Some(Division::IV), 33, 0))
        .await;

    h.source.set_rank(&p.id, RankSnapshot::unranked(at(60)));
    let out = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(out, CycleOutcome::Baseline);
    assert!(h.sink.events().is_empty());
    assert!(h
        .store
        .load_last_rank(&p.id)
        .await
        .unwrap()
        .unwrap()
        .is_unranked());
}

#[tokio::test]
async fn test_unknown_tier_falls_back_to_linear() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Gold, Some(Division::I), 70, 0))
        .await;
    h.source.play(game(&p.id, "M1", true, 1700, 30));
    h.source.set_rank(
        &p.id,
        ranked(Tier::Unknown("MYTHIC".into()), None, 90, 31),
    );
    let out = h.engine.reconcile(&p).await.unwrap();
    assert_eq!(out.event().and_then(|e| e.delta()), Some(20));
}

#[tokio::test]
async fn test_upstream_error_persists_nothing() {
    let h = harness();
    let p = tracked("p1");
    h.baseline(&p, ranked(Tier::Gold, Some(Division::I), 70, 0))
        .await;

    h.source.play(game(&p.id, "M1", true, 1700, 30));
    h.source.fail(&p.id, Failure::NotFound);
    let err = h.engine.reconcile(&p).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound(_)));
    assert_eq!(h.store.match_count(&p.id), 0);
    assert_eq!(h.store.snapshots(&p.id).len(), 1);
}

fn scheduler(h: &Harness) -> PollScheduler {
    PollScheduler::new(
        h.engine.clone(),
        SchedulerConfig {
            interval: Duration::from_secs(240),
            max_concurrent_players: 2,
            retry: RetryConfig {
                max_attempts: 4,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(8),
                max_elapsed: Duration::from_secs(60),
            },
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_empty_player_set_is_noop_cycle() {
    let h = harness();
    let report = scheduler(&h)
        .run_cycle(&ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.players, 0);
    assert_eq!(report.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_player_does_not_block_others() {
    let h = harness();
    for id in ["a", "b", "c"] {
        let p = tracked(id);
        h.source
            .set_rank(&p.id, ranked(Tier::Bronze, Some(Division::II), 10, 0));
        h.store.track(p);
    }
    h.source.fail(&PlayerId::new("b"), Failure::NotFound);

    let report = scheduler(&h)
        .run_cycle(&ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.players, 3);
    assert_eq!(report.baselines, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(h.store.snapshots(&PlayerId::new("a")).len(), 1);
    assert_eq!(h.store.snapshots(&PlayerId::new("c")).len(), 1);
    assert!(h.store.snapshots(&PlayerId::new("b")).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_within_cycle() {
    let h = harness();
    let p = tracked("a");
    h.source
        .set_rank(&p.id, ranked(Tier::Iron, Some(Division::IV), 0, 0));
    h.source.fail(&p.id, Failure::Transient { remaining: 2 });
    h.store.track(p);

    let report = scheduler(&h)
        .run_cycle(&ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.baselines, 1);
    assert_eq!(report.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_count_as_failure() {
    let h = harness();
    let p = tracked("a");
    h.source
        .set_rank(&p.id, ranked(Tier::Iron, Some(Division::IV), 0, 0));
    h.source.fail(&p.id, Failure::Transient { remaining: 100 });
    h.store.track(p.clone());

    let report = scheduler(&h)
        .run_cycle(&ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.failures, 1);
    assert!(h.store.snapshots(&p.id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_the_loop() {
    let h = harness();
    let p = tracked("a");
    h.source
        .set_rank(&p.id, ranked(Tier::Iron, Some(Division::IV), 0, 0));
    h.store.track(p.clone());

    let (handle, signal) = shutdown::channel();
    let sched = Arc::new(scheduler(&h));
    let runner = {
        let sched = sched.clone();
        tokio::spawn(async move { sched.run(signal).await })
    };

    // first tick fires immediately
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.store.snapshots(&p.id).len(), 1);

    handle.trigger();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("scheduler should stop")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_players_in_backoff() {
    let h = harness();
    let p = tracked("a");
    h.source
        .set_rank(&p.id, ranked(Tier::Iron, Some(Division::IV), 0, 0));
    h.source.fail(&p.id, Failure::Transient { remaining: 100 });
    h.store.track(p);

    let (handle, signal) = shutdown::channel();
    let sched = scheduler(&h);
    let cycle = tokio::spawn(async move { sched.run_cycle(&signal).await });
    tokio::task::yield_now().await;
    handle.trigger();

    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.failures, 0);
}
