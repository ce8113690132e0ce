//! SQLite-backed tracker store
//!
//! - WAL mode so readers don't block the per-cycle write
//! - (player, match) primary key makes match inserts idempotent
//! - One IMMEDIATE transaction per reconciliation cycle
//! - Rank history is append-only; the latest row by capture time is "current"

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CommitOutcome, CycleWrite, TrackerStore};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{
    ConsumingContext, DeltaTag, Division, LadderPosition, MatchRecord,
    PlacementState, PlayerId, ProgressDeltaEvent, RankSnapshot, RankState, Tier, TrackedPlayer,
};
use crate::season::Season;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS players (
    player_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS contexts (
    context_id TEXT PRIMARY KEY,
    delivery_target TEXT
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS player_contexts (
    player_id TEXT NOT NULL REFERENCES players(player_id),
    context_id TEXT NOT NULL REFERENCES contexts(context_id),
    added_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (player_id, context_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_player_contexts_context
    ON player_contexts(context_id);

CREATE TABLE IF NOT EXISTS matches (
    player_id TEXT NOT NULL,
    match_id TEXT NOT NULL,
    champion_name TEXT NOT NULL,
    kills INTEGER NOT NULL,
    deaths INTEGER NOT NULL,
    assists INTEGER NOT NULL,
    win INTEGER NOT NULL,
    game_duration_secs INTEGER NOT NULL,
    game_end INTEGER NOT NULL,
    queue_id INTEGER NOT NULL,
    creep_score INTEGER NOT NULL,
    damage_to_champions INTEGER NOT NULL,
    team_damage_share REAL NOT NULL,
    kill_participation REAL NOT NULL,
    payload_json TEXT NOT NULL,
    PRIMARY KEY (player_id, match_id)
);

CREATE INDEX IF NOT EXISTS idx_matches_player_end
    ON matches(player_id, game_end DESC);

CREATE TABLE IF NOT EXISTS rank_snapshots (
    id TEXT NOT NULL UNIQUE,
    player_id TEXT NOT NULL,
    tier TEXT,
    division TEXT,
    league_points INTEGER,
    delta INTEGER NOT NULL,
    tag TEXT NOT NULL,
    match_id TEXT,
    captured_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rank_snapshots_player_time
    ON rank_snapshots(player_id, captured_at DESC);

CREATE TABLE IF NOT EXISTS placement_state (
    player_id TEXT NOT NULL,
    season_key TEXT NOT NULL,
    games_played INTEGER NOT NULL,
    wins INTEGER NOT NULL,
    losses INTEGER NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (player_id, season_key)
) WITHOUT ROWID;
"#;

/// One row of a player's rank history.
#[derive(Debug, Clone, PartialEq)]
pub struct RankHistoryEntry {
    pub id: Uuid,
    pub snapshot: RankSnapshot,
    pub delta: i32,
    pub tag: DeltaTag,
    pub match_id: Option<String>,
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        // in-memory databases report "memory"
        if journal_mode.to_lowercase() != "wal" && db_path != ":memory:" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let players: i64 = conn
            .query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
            .unwrap_or(0);
        info!("📊 Tracker database ready at {} ({} players)", db_path, players);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Start watching a player from a context. Creates the player on first
    /// watch and refreshes its display name otherwise. Returns whether the
    /// association is new.
    pub fn watch_player(
        &self,
        context_id: &str,
        player: &PlayerId,
        display_name: &str,
    ) -> TrackerResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO players (player_id, display_name) VALUES (?1, ?2)
             ON CONFLICT(player_id) DO UPDATE SET display_name = excluded.display_name",
            params![player.as_str(), display_name],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO contexts (context_id) VALUES (?1)",
            params![context_id],
        )?;
        let added = tx.execute(
            "INSERT OR IGNORE INTO player_contexts (player_id, context_id) VALUES (?1, ?2)",
            params![player.as_str(), context_id],
        )?;
        tx.commit()?;

        if added > 0 {
            info!(player = %display_name, context = context_id, "👀 Now watching player");
        }
        Ok(added > 0)
    }

    /// Drop one context's interest in a player. The player's history stays;
    /// it just stops being polled once nobody watches it.
    pub fn unwatch_player(&self, context_id: &str, player: &PlayerId) -> TrackerResult<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM player_contexts WHERE player_id = ?1 AND context_id = ?2",
            params![player.as_str(), context_id],
        )?;
        Ok(removed > 0)
    }

    /// Remove every association of a context (context left / was deleted).
    pub fn unwatch_all(&self, context_id: &str) -> TrackerResult<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM player_contexts WHERE context_id = ?1",
            params![context_id],
        )?;
        Ok(removed)
    }

    pub fn set_delivery_target(&self, context_id: &str, target: Option<&str>) -> TrackerResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO contexts (context_id, delivery_target) VALUES (?1, ?2)
             ON CONFLICT(context_id) DO UPDATE SET delivery_target = excluded.delivery_target",
            params![context_id, target],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn rank_history(
        &self,
        player: &PlayerId,
        limit: usize,
    ) -> TrackerResult<Vec<RankHistoryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, tier, division, league_points, captured_at, delta, tag, match_id
             FROM rank_snapshots
             WHERE player_id = ?1
             ORDER BY captured_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![player.as_str(), limit as i64], |row| {
            let id: String = row.get(0)?;
            let tag: String = row.get(6)?;
            Ok(RankHistoryEntry {
                id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
                snapshot: row_to_snapshot(row, 1)?,
                delta: row.get(5)?,
                tag: DeltaTag::parse(&tag).unwrap_or(DeltaTag::Baseline),
                match_id: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn match_count(&self, player: &PlayerId) -> TrackerResult<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM matches WHERE player_id = ?1",
            params![player.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Columns starting at `first`: tier, division, league_points, captured_at.
fn row_to_snapshot(row: &rusqlite::Row, first: usize) -> rusqlite::Result<RankSnapshot> {
    let tier: Option<String> = row.get(first)?;
    let division: Option<String> = row.get(first + 1)?;
    let league_points: Option<i32> = row.get(first + 2)?;
    let captured_at = millis_to_utc(row.get(first + 3)?);

    Ok(match tier {
        None => RankSnapshot::unranked(captured_at),
        Some(tier) => RankSnapshot::ranked(
            LadderPosition::new(
                Tier::parse(&tier),
                division.as_deref().and_then(Division::parse),
                league_points.unwrap_or(0),
            ),
            captured_at,
        ),
    })
}

fn insert_match(conn: &Connection, record: &MatchRecord) -> TrackerResult<bool> {
    let payload = serde_json::to_string(record).map_err(|e| {
        TrackerError::Persistence(format!("match {} payload: {}", record.match_id, e))
    })?;
    let changes = conn.execute(
        "INSERT OR IGNORE INTO matches
         (player_id, match_id, champion_name, kills, deaths, assists, win, game_duration_secs,
          game_end, queue_id, creep_score, damage_to_champions, team_damage_share,
          kill_participation, payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            record.player_id.as_str(),
            &record.match_id,
            &record.champion_name,
            record.kills,
            record.deaths,
            record.assists,
            record.win,
            record.game_duration_secs,
            record.game_end.timestamp_millis(),
            record.queue_id,
            record.creep_score,
            record.damage_to_champions,
            record.team_damage_share,
            record.kill_participation,
            payload,
        ],
    )?;
    Ok(changes > 0)
}

fn insert_snapshot(conn: &Connection, progress: &ProgressDeltaEvent) -> TrackerResult<()> {
    let (tier, division, league_points) = match &progress.current.state {
        RankState::Unranked => (None, None, None),
        RankState::Ranked(p) => (
            Some(p.tier.as_str().to_string()),
            p.division.map(|d| d.as_str()),
            Some(p.league_points),
        ),
    };
    let match_id = progress.link.match_id();
    conn.execute(
        "INSERT INTO rank_snapshots
         (id, player_id, tier, division, league_points, delta, tag, match_id, captured_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            progress.id.to_string(),
            progress.player_id.as_str(),
            tier,
            division,
            league_points,
            progress.delta,
            progress.tag.as_str(),
            match_id,
            progress.current.captured_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn upsert_placement(
    conn: &Connection,
    player: &PlayerId,
    state: &PlacementState,
) -> TrackerResult<()> {
    conn.execute(
        "INSERT INTO placement_state
         (player_id, season_key, games_played, wins, losses, completed, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(player_id, season_key) DO UPDATE SET
            games_played = excluded.games_played,
            wins = excluded.wins,
            losses = excluded.losses,
            completed = excluded.completed,
            updated_at = excluded.updated_at",
        params![
            player.as_str(),
            state.season.key(),
            state.games_played,
            state.wins,
            state.losses,
            state.completed,
            Utc::now().timestamp(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl TrackerStore for SqliteStore {
    async fn load_tracked_players(&self) -> TrackerResult<Vec<TrackedPlayer>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT p.player_id, p.display_name, c.context_id, c.delivery_target
             FROM players p
             JOIN player_contexts pc ON pc.player_id = p.player_id
             JOIN contexts c ON c.context_id = pc.context_id
             ORDER BY p.player_id, c.context_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                ConsumingContext {
                    context_id: row.get(2)?,
                    delivery_target: row.get(3)?,
                },
            ))
        })?;

        let mut players: BTreeMap<String, TrackedPlayer> = BTreeMap::new();
        for row in rows {
            let (id, display_name, context) = row?;
            players
                .entry(id.clone())
                .or_insert_with(|| TrackedPlayer {
                    id: PlayerId::new(id),
                    display_name,
                    contexts: Vec::new(),
                })
                .contexts
                .push(context);
        }
        Ok(players.into_values().collect())
    }

    async fn load_last_rank(&self, player: &PlayerId) -> TrackerResult<Option<RankSnapshot>> {
        let conn = self.conn.lock();
        let snapshot = conn
            .query_row(
                "SELECT tier, division, league_points, captured_at
                 FROM rank_snapshots
                 WHERE player_id = ?1
                 ORDER BY captured_at DESC, rowid DESC
                 LIMIT 1",
                params![player.as_str()],
                |row| row_to_snapshot(row, 0),
            )
            .optional()?;
        Ok(snapshot)
    }

    async fn load_last_match_id(&self, player: &PlayerId) -> TrackerResult<Option<String>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT match_id FROM matches
                 WHERE player_id = ?1
                 ORDER BY game_end DESC, rowid DESC
                 LIMIT 1",
                params![player.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    async fn has_match(&self, player: &PlayerId, match_id: &str) -> TrackerResult<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM matches WHERE player_id = ?1 AND match_id = ?2",
                params![player.as_str(), match_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn load_placement_state(
        &self,
        player: &PlayerId,
        season: Season,
    ) -> TrackerResult<Option<PlacementState>> {
        let conn = self.conn.lock();
        let state = conn
            .query_row(
                "SELECT games_played, wins, losses, completed FROM placement_state
                 WHERE player_id = ?1 AND season_key = ?2",
                params![player.as_str(), season.key()],
                |row| {
                    Ok(PlacementState {
                        season,
                        games_played: row.get(0)?,
                        wins: row.get(1)?,
                        losses: row.get(2)?,
                        completed: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    async fn save_match(&self, record: &MatchRecord) -> TrackerResult<bool> {
        let conn = self.conn.lock();
        insert_match(&conn, record)
    }

    async fn save_rank_snapshot(&self, progress: &ProgressDeltaEvent) -> TrackerResult<()> {
        let conn = self.conn.lock();
        insert_snapshot(&conn, progress)
    }

    async fn save_placement_state(
        &self,
        player: &PlayerId,
        state: &PlacementState,
    ) -> TrackerResult<()> {
        let conn = self.conn.lock();
        upsert_placement(&conn, player, state)
    }

    async fn commit_cycle(&self, write: &CycleWrite) -> TrackerResult<CommitOutcome> {
        if write.is_empty() {
            return Ok(CommitOutcome::Committed);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(record) = &write.record {
            if !insert_match(&tx, record)? {
                // dropping the transaction rolls it back
                debug!(player = %write.player, match_id = %record.match_id, "Match already stored");
                return Ok(CommitOutcome::DuplicateMatch);
            }
        }
        if let Some(progress) = &write.progress {
            insert_snapshot(&tx, progress)?;
        }
        if let Some(placement) = &write.placement {
            upsert_placement(&tx, &write.player, placement)?;
        }

        tx.commit()?;
        Ok(CommitOutcome::Committed)
    }
}
