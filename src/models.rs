use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::season::Season;

/// Competitive tier, lowest first.
///
/// Anything the upstream sends that is not one of the ten known tiers is kept
/// verbatim in `Unknown` so it can be surfaced instead of guessed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tier {
    Iron,
    Bronze,
    Silver,
    Gold,
    Platinum,
    Emerald,
    Diamond,
    Master,
    Grandmaster,
    Challenger,
    Unknown(String),
}

impl Tier {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IRON" => Tier::Iron,
            "BRONZE" => Tier::Bronze,
            "SILVER" => Tier::Silver,
            "GOLD" => Tier::Gold,
            "PLATINUM" => Tier::Platinum,
            "EMERALD" => Tier::Emerald,
            "DIAMOND" => Tier::Diamond,
            "MASTER" => Tier::Master,
            "GRANDMASTER" => Tier::Grandmaster,
            "CHALLENGER" => Tier::Challenger,
            _ => Tier::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Tier::Iron => "IRON",
            Tier::Bronze => "BRONZE",
            Tier::Silver => "SILVER",
            Tier::Gold => "GOLD",
            Tier::Platinum => "PLATINUM",
            Tier::Emerald => "EMERALD",
            Tier::Diamond => "DIAMOND",
            Tier::Master => "MASTER",
            Tier::Grandmaster => "GRANDMASTER",
            Tier::Challenger => "CHALLENGER",
            Tier::Unknown(raw) => raw,
        }
    }

    /// Position on the ladder (1 = Iron, 10 = Challenger). `None` for unknown tiers.
    pub fn order(&self) -> Option<u8> {
        match self {
            Tier::Iron => Some(1),
            Tier::Bronze => Some(2),
            Tier::Silver => Some(3),
            Tier::Gold => Some(4),
            Tier::Platinum => Some(5),
            Tier::Emerald => Some(6),
            Tier::Diamond => Some(7),
            Tier::Master => Some(8),
            Tier::Grandmaster => Some(9),
            Tier::Challenger => Some(10),
            Tier::Unknown(_) => None,
        }
    }

    /// Top three tiers: no divisions, unbounded points.
    pub fn is_apex(&self) -> bool {
        matches!(self, Tier::Master | Tier::Grandmaster | Tier::Challenger)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Tier::Unknown(_))
    }
}

impl From<String> for Tier {
    fn from(raw: String) -> Self {
        Tier::parse(&raw)
    }
}

impl From<Tier> for String {
    fn from(tier: Tier) -> Self {
        tier.as_str().to_string()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-rank inside a non-apex tier. IV is the lowest, I the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Division {
    #[serde(rename = "IV")]
    IV,
    #[serde(rename = "III")]
    III,
    #[serde(rename = "II")]
    II,
    #[serde(rename = "I")]
    I,
}

impl Division {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IV" => Some(Division::IV),
            "III" => Some(Division::III),
            "II" => Some(Division::II),
            "I" => Some(Division::I),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Division::IV => "IV",
            Division::III => "III",
            Division::II => "II",
            Division::I => "I",
        }
    }

    /// 1 for IV up to 4 for I.
    pub fn order(&self) -> u8 {
        match self {
            Division::IV => 1,
            Division::III => 2,
            Division::II => 3,
            Division::I => 4,
        }
    }
}

impl std::fmt::Display for Division {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a ranked player sits on the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderPosition {
    pub tier: Tier,
    /// Always `None` for apex tiers.
    pub division: Option<Division>,
    pub league_points: i32,
}

impl LadderPosition {
    pub fn new(tier: Tier, division: Option<Division>, league_points: i32) -> Self {
        let division = if tier.is_apex() { None } else { division };
        Self {
            tier,
            division,
            league_points,
        }
    }
}

impl std::fmt::Display for LadderPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.division {
            Some(d) => write!(f, "{} {} ({}lp)", self.tier, d, self.league_points),
            None => write!(f, "{} ({}lp)", self.tier, self.league_points),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RankState {
    Unranked,
    Ranked(LadderPosition),
}

/// One immutable observation of a player's rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankSnapshot {
    pub state: RankState,
    pub captured_at: DateTime<Utc>,
}

impl RankSnapshot {
    pub fn unranked(captured_at: DateTime<Utc>) -> Self {
        Self {
            state: RankState::Unranked,
            captured_at,
        }
    }

    pub fn ranked(position: LadderPosition, captured_at: DateTime<Utc>) -> Self {
        Self {
            state: RankState::Ranked(position),
            captured_at,
        }
    }

    pub fn is_unranked(&self) -> bool {
        matches!(self.state, RankState::Unranked)
    }

    pub fn position(&self) -> Option<&LadderPosition> {
        match &self.state {
            RankState::Ranked(p) => Some(p),
            RankState::Unranked => None,
        }
    }

    /// Same tier, division and points. Capture time is ignored.
    pub fn same_rank(&self, other: &RankSnapshot) -> bool {
        self.state == other.state
    }
}

impl std::fmt::Display for RankSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            RankState::Unranked => f.write_str("UNRANKED"),
            RankState::Ranked(p) => write!(f, "{}", p),
        }
    }
}

/// Stable upstream identity of a player (the account PUUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A guild (or any other independent consumer) watching a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumingContext {
    pub context_id: String,
    /// Channel or endpoint the context wants events delivered to, if configured.
    pub delivery_target: Option<String>,
}

/// A player watched by at least one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPlayer {
    pub id: PlayerId,
    pub display_name: String,
    pub contexts: Vec<ConsumingContext>,
}

/// One finished game's stat line for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub player_id: PlayerId,
    pub match_id: String,
    pub champion_name: String,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub win: bool,
    pub game_duration_secs: i64,
    pub game_end: DateTime<Utc>,
    pub queue_id: i32,
    pub creep_score: i32,
    pub damage_to_champions: i64,
    pub team_damage_share: f64,
    pub kill_participation: f64,
}

impl MatchRecord {
    /// Games shorter than the threshold were voided by an early vote.
    pub fn is_remake(&self, threshold_secs: i64) -> bool {
        self.game_duration_secs < threshold_secs
    }
}

/// Placement games played while unranked, for one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementState {
    pub season: Season,
    pub games_played: u8,
    pub wins: u8,
    pub losses: u8,
    /// Set once placement completion has been announced for this season.
    #[serde(default)]
    pub completed: bool,
}

impl PlacementState {
    pub fn new(season: Season) -> Self {
        Self {
            season,
            games_played: 0,
            wins: 0,
            losses: 0,
            completed: false,
        }
    }

    /// Count one game. Returns false without changing anything once `cap` is reached.
    pub fn record_game(&mut self, win: bool, cap: u8) -> bool {
        if self.games_played >= cap {
            return false;
        }
        self.games_played += 1;
        if win {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        true
    }

    pub fn is_complete(&self, cap: u8) -> bool {
        self.games_played >= cap
    }
}

/// Classification of a persisted rank snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaTag {
    /// Rank moved because of an observed ranked game.
    RankedMatch,
    /// Rank moved with no observable game (dodge, voided match).
    Inferred,
    /// Placements finished and a tier was assigned.
    PlacementCompleted,
    /// First observation or re-seed after a reset. Never announced.
    Baseline,
}

impl DeltaTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaTag::RankedMatch => "ranked_match",
            DeltaTag::Inferred => "inferred",
            DeltaTag::PlacementCompleted => "placement_completed",
            DeltaTag::Baseline => "baseline",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ranked_match" => Some(DeltaTag::RankedMatch),
            "inferred" => Some(DeltaTag::Inferred),
            "placement_completed" => Some(DeltaTag::PlacementCompleted),
            "baseline" => Some(DeltaTag::Baseline),
            _ => None,
        }
    }
}

/// What a snapshot row is paired with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLink {
    Match(String),
    NoAssociatedMatch,
}

impl MatchLink {
    pub fn match_id(&self) -> Option<&str> {
        match self {
            MatchLink::Match(id) => Some(id),
            MatchLink::NoAssociatedMatch => None,
        }
    }
}

/// A rank snapshot plus the delta that led to it, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressDeltaEvent {
    pub id: Uuid,
    pub player_id: PlayerId,
    pub delta: i32,
    pub previous: Option<RankSnapshot>,
    pub current: RankSnapshot,
    pub tag: DeltaTag,
    pub link: MatchLink,
}

impl ProgressDeltaEvent {
    pub fn new(
        player_id: PlayerId,
        delta: i32,
        previous: Option<RankSnapshot>,
        current: RankSnapshot,
        tag: DeltaTag,
        link: MatchLink,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            player_id,
            delta,
            previous,
            current,
            tag,
            link,
        }
    }
}

/// Something worth announcing to the contexts watching a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerEvent {
    RankedMatch {
        player: PlayerId,
        display_name: String,
        progress: ProgressDeltaEvent,
        record: MatchRecord,
    },
    InferredSkip {
        player: PlayerId,
        display_name: String,
        progress: ProgressDeltaEvent,
    },
    PlacementProgress {
        player: PlayerId,
        display_name: String,
        record: MatchRecord,
        placement: PlacementState,
        remake: bool,
    },
    PlacementCompleted {
        player: PlayerId,
        display_name: String,
        /// `None` when the tier showed up a cycle after the last placement game.
        record: Option<MatchRecord>,
        placement: PlacementState,
        final_rank: RankSnapshot,
    },
}

impl TrackerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerEvent::RankedMatch { .. } => "ranked_match",
            TrackerEvent::InferredSkip { .. } => "inferred_skip",
            TrackerEvent::PlacementProgress { .. } => "placement_progress",
            TrackerEvent::PlacementCompleted { .. } => "placement_completed",
        }
    }

    pub fn player(&self) -> &PlayerId {
        match self {
            TrackerEvent::RankedMatch { player, .. }
            | TrackerEvent::InferredSkip { player, .. }
            | TrackerEvent::PlacementProgress { player, .. }
            | TrackerEvent::PlacementCompleted { player, .. } => player,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            TrackerEvent::RankedMatch { display_name, .. }
            | TrackerEvent::InferredSkip { display_name, .. }
            | TrackerEvent::PlacementProgress { display_name, .. }
            | TrackerEvent::PlacementCompleted { display_name, .. } => display_name,
        }
    }

    /// Point delta carried by the event, when one was computed.
    pub fn delta(&self) -> Option<i32> {
        match self {
            TrackerEvent::RankedMatch { progress, .. }
            | TrackerEvent::InferredSkip { progress, .. } => Some(progress.delta),
            _ => None,
        }
    }
}
