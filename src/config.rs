//! Tracker configuration
//!
//! TOML file for tuning, environment for secrets and deployment paths.
//! Every field has a default so an empty (or missing) file is a valid config.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::tracker::{ReconcilePolicy, SchedulerConfig};
use crate::upstream::riot_api::RiotClientConfig;
use crate::upstream::{RateLimiterConfig, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub poll: PollSection,

    #[serde(default)]
    pub rate_limit: RateLimitSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub policy: PolicySection,

    #[serde(default)]
    pub riot: RiotSection,
}

fn default_database_path() -> String {
    "rankwatch.db".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            poll: PollSection::default(),
            rate_limit: RateLimitSection::default(),
            retry: RetrySection::default(),
            policy: PolicySection::default(),
            riot: RiotSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Players reconciled at the same time.
    #[serde(default = "default_max_concurrent_players")]
    pub max_concurrent_players: usize,
}

fn default_interval_secs() -> u64 {
    240
}

fn default_max_concurrent_players() -> usize {
    8
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_concurrent_players: default_max_concurrent_players(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_requests_per_second() -> f64 {
    20.0
}

fn default_burst() -> u32 {
    100
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_elapsed_ms() -> u64 {
    120_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    #[serde(default = "default_placement_game_cap")]
    pub placement_game_cap: u8,

    #[serde(default = "default_remake_threshold_secs")]
    pub remake_threshold_secs: i64,
}

fn default_placement_game_cap() -> u8 {
    5
}

fn default_remake_threshold_secs() -> i64 {
    210
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            placement_game_cap: default_placement_game_cap(),
            remake_threshold_secs: default_remake_threshold_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiotSection {
    /// Normally supplied through `RIOT_API_KEY` rather than the file.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_platform")]
    pub platform: String,

    #[serde(default = "default_routing")]
    pub routing: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_platform() -> String {
    "euw1".to_string()
}

fn default_routing() -> String {
    "europe".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for RiotSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            platform: default_platform(),
            routing: default_routing(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TrackerConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// File at `path` (or `RANKWATCH_CONFIG_PATH`, or `rankwatch.toml`), then env overrides.
    /// A missing default file is fine; an explicitly named one must exist.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => {
                let default_path = std::env::var("RANKWATCH_CONFIG_PATH")
                    .unwrap_or_else(|_| "rankwatch.toml".to_string());
                Self::load(&default_path).unwrap_or_else(|e| {
                    tracing::debug!("Using default config ({}): {}", default_path, e);
                    Self::default()
                })
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay environment values. Takes a lookup so tests don't touch the process env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("RIOT_API_KEY") {
            self.riot.api_key = key;
        }
        if let Some(region) = non_empty("RIOT_REGION") {
            self.riot.platform = region.to_lowercase();
        }
        if let Some(routing) = non_empty("RIOT_ROUTING") {
            self.riot.routing = routing.to_lowercase();
        }
        if let Some(path) = non_empty("DB_PATH") {
            self.database_path = path;
        }
        if let Some(secs) = non_empty("POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.poll.interval_secs = secs;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.riot.api_key.trim().is_empty() {
            anyhow::bail!("RIOT_API_KEY is not set");
        }
        if self.poll.interval_secs == 0 {
            anyhow::bail!("poll.interval_secs must be positive");
        }
        if self.policy.placement_game_cap == 0 {
            anyhow::bail!("policy.placement_game_cap must be positive");
        }
        Ok(())
    }

    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_second: self.rate_limit.requests_per_second,
            burst: self.rate_limit.burst,
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            max_elapsed: Duration::from_millis(self.retry.max_elapsed_ms),
        }
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            placement_game_cap: self.policy.placement_game_cap,
            remake_threshold_secs: self.policy.remake_threshold_secs,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.poll.interval_secs),
            max_concurrent_players: self.poll.max_concurrent_players,
            retry: self.retry(),
        }
    }

    pub fn riot_client(&self) -> RiotClientConfig {
        RiotClientConfig {
            api_key: self.riot.api_key.clone(),
            platform: self.riot.platform.clone(),
            routing: self.riot.routing.clone(),
            request_timeout: Duration::from_secs(self.riot.request_timeout_secs),
            placement_game_cap: self.policy.placement_game_cap,
        }
    }
}
