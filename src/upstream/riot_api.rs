//! Ranked-game REST client
//!
//! Thin `DataSource` over the league-v4 and match-v5 endpoints. No retries and
//! no pacing live here: rate limiting is applied by `RateLimitedSource` and
//! retries by the scheduler. This module only maps HTTP outcomes onto the
//! retryable / permanent error taxonomy.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header::HeaderMap, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::debug;

use super::DataSource;
use crate::error::{TrackerError, TrackerResult};
use crate::models::{
    Division, LadderPosition, MatchRecord, PlacementState, PlayerId, RankSnapshot, Tier,
};
use crate::season::Season;

const SOLO_QUEUE: &str = "RANKED_SOLO_5x5";
const SOLO_QUEUE_ID: u32 = 420;

#[derive(Debug, Clone)]
pub struct RiotClientConfig {
    pub api_key: String,
    /// Platform host prefix for league data, e.g. `euw1`.
    pub platform: String,
    /// Regional host prefix for match data, e.g. `europe`.
    pub routing: String,
    pub request_timeout: Duration,
    pub placement_game_cap: u8,
}

#[derive(Clone)]
pub struct RiotClient {
    client: Client,
    platform_base: String,
    routing_base: String,
    placement_game_cap: u8,
}

impl RiotClient {
    pub fn new(config: RiotClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers({
                let mut headers = HeaderMap::new();
                headers.insert(
                    "X-Riot-Token",
                    config.api_key.parse().context("Invalid Riot API key")?,
                );
                headers
            })
            .build()
            .context("Failed to build RiotClient")?;

        Ok(Self {
            client,
            platform_base: format!("https://{}.api.riotgames.com", config.platform),
            routing_base: format!("https://{}.api.riotgames.com", config.routing),
            placement_game_cap: config.placement_game_cap,
        })
    }

    #[cfg(test)]
    fn with_base_urls(mut self, platform_base: &str, routing_base: &str) -> Self {
        self.platform_base = platform_base.trim_end_matches('/').to_string();
        self.routing_base = routing_base.trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> TrackerResult<T> {
        debug!(url, "GET");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, what, &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| TrackerError::Malformed(format!("{}: {}", what, e)))
    }

    async fn league_entries(&self, player: &PlayerId) -> TrackerResult<Vec<LeagueEntryDto>> {
        let url = format!(
            "{}/lol/league/v4/entries/by-puuid/{}",
            self.platform_base,
            player.as_str()
        );
        self.get_json(&url, "league entries").await
    }
}

#[async_trait]
impl DataSource for RiotClient {
    async fn get_current_rank(&self, player: &PlayerId) -> TrackerResult<RankSnapshot> {
        let entries = self.league_entries(player).await?;
        snapshot_from_entries(&entries, Utc::now())
    }

    async fn get_latest_match_id(&self, player: &PlayerId) -> TrackerResult<Option<String>> {
        let url = format!(
            "{}/lol/match/v5/matches/by-puuid/{}/ids?queue={}&count=1",
            self.routing_base,
            player.as_str(),
            SOLO_QUEUE_ID
        );
        let ids: Vec<String> = self.get_json(&url, "match ids").await?;
        Ok(ids.into_iter().next())
    }

    async fn get_match_details(
        &self,
        match_id: &str,
        player: &PlayerId,
    ) -> TrackerResult<MatchRecord> {
        let url = format!("{}/lol/match/v5/matches/{}", self.routing_base, match_id);
        let dto: MatchDto = self.get_json(&url, "match details").await?;
        record_from_match(match_id, player, dto)
    }

    async fn get_placement_status(
        &self,
        player: &PlayerId,
        season: Season,
    ) -> TrackerResult<PlacementState> {
        let entries = self.league_entries(player).await?;
        Ok(placement_from_entries(
            &entries,
            season,
            self.placement_game_cap,
        ))
    }
}

/// Map a non-2xx response onto the error taxonomy.
fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    what: &str,
    body: &str,
) -> TrackerError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => TrackerError::RateLimited { retry_after },
        StatusCode::NOT_FOUND => TrackerError::NotFound(what.to_string()),
        StatusCode::REQUEST_TIMEOUT => TrackerError::Transient(format!("{}: {}", what, status)),
        s if s.is_server_error() => TrackerError::Transient(format!("{}: {}", what, status)),
        s => TrackerError::Rejected {
            status: s.as_u16(),
            message: upstream_message(body).unwrap_or_else(|| what.to_string()),
        },
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// `{"status": {"message": "..."}}` error envelope.
fn upstream_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Envelope {
        status: EnvelopeStatus,
    }
    #[derive(Deserialize)]
    struct EnvelopeStatus {
        message: String,
    }
    serde_json::from_str::<Envelope>(body)
        .ok()
        .map(|e| e.status.message)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeagueEntryDto {
    queue_type: String,
    #[serde(default)]
    tier: String,
    #[serde(default)]
    rank: String,
    #[serde(default)]
    league_points: i32,
    #[serde(default)]
    wins: u32,
    #[serde(default)]
    losses: u32,
}

#[derive(Debug, Deserialize)]
struct MatchDto {
    info: MatchInfoDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchInfoDto {
    game_duration: i64,
    #[serde(default)]
    game_end_timestamp: Option<i64>,
    #[serde(default)]
    game_creation: i64,
    #[serde(default)]
    queue_id: i32,
    participants: Vec<ParticipantDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantDto {
    puuid: String,
    #[serde(default)]
    champion_name: String,
    kills: i32,
    deaths: i32,
    assists: i32,
    win: bool,
    #[serde(default)]
    total_minions_killed: i32,
    #[serde(default)]
    neutral_minions_killed: i32,
    #[serde(default)]
    total_damage_dealt_to_champions: i64,
    #[serde(default)]
    challenges: Option<ChallengesDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengesDto {
    #[serde(default)]
    team_damage_percentage: Option<f64>,
    #[serde(default)]
    kill_participation: Option<f64>,
}

fn snapshot_from_entries(
    entries: &[LeagueEntryDto],
    captured_at: DateTime<Utc>,
) -> TrackerResult<RankSnapshot> {
    let Some(entry) = entries.iter().find(|e| e.queue_type == SOLO_QUEUE) else {
        return Ok(RankSnapshot::unranked(captured_at));
    };
    if entry.tier.is_empty() || entry.tier.eq_ignore_ascii_case("UNRANKED") {
        return Ok(RankSnapshot::unranked(captured_at));
    }

    let tier = Tier::parse(&entry.tier);
    let division = Division::parse(&entry.rank);
    if !tier.is_apex() && tier.is_known() && division.is_none() {
        return Err(TrackerError::Malformed(format!(
            "{} entry without a division (rank = {:?})",
            entry.tier, entry.rank
        )));
    }

    Ok(RankSnapshot::ranked(
        LadderPosition::new(tier, division, entry.league_points),
        captured_at,
    ))
}

fn placement_from_entries(entries: &[LeagueEntryDto], season: Season, cap: u8) -> PlacementState {
    let mut state = PlacementState::new(season);
    if let Some(entry) = entries.iter().find(|e| e.queue_type == SOLO_QUEUE) {
        let wins = entry.wins.min(cap as u32) as u8;
        let losses = entry.losses.min((cap - wins) as u32) as u8;
        state.wins = wins;
        state.losses = losses;
        state.games_played = wins + losses;
    }
    state
}

fn record_from_match(match_id: &str, player: &PlayerId, dto: MatchDto) -> TrackerResult<MatchRecord> {
    let info = dto.info;
    let participant = info
        .participants
        .into_iter()
        .find(|p| p.puuid == player.as_str())
        .ok_or_else(|| TrackerError::NotFound(format!("{} not in match {}", player, match_id)))?;

    // gameEndTimestamp is missing on very old matches; fall back to creation + duration
    let end_ms = info
        .game_end_timestamp
        .unwrap_or(info.game_creation + info.game_duration * 1000);
    let game_end = Utc
        .timestamp_millis_opt(end_ms)
        .single()
        .ok_or_else(|| TrackerError::Malformed(format!("bad end timestamp {}", end_ms)))?;

    let challenges = participant.challenges.unwrap_or_default();

    Ok(MatchRecord {
        player_id: player.clone(),
        match_id: match_id.to_string(),
        champion_name: participant.champion_name,
        kills: participant.kills,
        deaths: participant.deaths,
        assists: participant.assists,
        win: participant.win,
        game_duration_secs: info.game_duration,
        game_end,
        queue_id: info.queue_id,
        creep_score: participant.total_minions_killed + participant.neutral_minions_killed,
        damage_to_champions: participant.total_damage_dealt_to_champions,
        team_damage_share: challenges.team_damage_percentage.unwrap_or(0.0),
        kill_participation: challenges.kill_participation.unwrap_or(0.0),
    })
}
