//! Upstream ranked-game data.
//!
//! The reconciliation engine only sees the `DataSource` trait. Concrete sources
//! (the REST client, test fakes) are wrapped in `RateLimitedSource` so that every
//! call from every concurrently polled player passes the same token bucket.

pub mod rate_limiter;
pub mod retry;
pub mod riot_api;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::TrackerResult;
use crate::models::{MatchRecord, PlacementState, PlayerId, RankSnapshot};
use crate::season::Season;

pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{retry_with_backoff, RetryConfig};
pub use riot_api::RiotClient;

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Current solo-queue standing. Unranked players yield an unranked snapshot.
    async fn get_current_rank(&self, player: &PlayerId) -> TrackerResult<RankSnapshot>;

    /// Most recent ranked match id, `None` if the player has no ranked games.
    async fn get_latest_match_id(&self, player: &PlayerId) -> TrackerResult<Option<String>>;

    async fn get_match_details(
        &self,
        match_id: &str,
        player: &PlayerId,
    ) -> TrackerResult<MatchRecord>;

    /// Placement progress as known upstream, used to seed a season's counter.
    async fn get_placement_status(
        &self,
        player: &PlayerId,
        season: Season,
    ) -> TrackerResult<PlacementState>;
}

#[async_trait]
impl<T: DataSource + ?Sized> DataSource for Arc<T> {
    async fn get_current_rank(&self, player: &PlayerId) -> TrackerResult<RankSnapshot> {
        (**self).get_current_rank(player).await
    }

    async fn get_latest_match_id(&self, player: &PlayerId) -> TrackerResult<Option<String>> {
        (**self).get_latest_match_id(player).await
    }

    async fn get_match_details(
        &self,
        match_id: &str,
        player: &PlayerId,
    ) -> TrackerResult<MatchRecord> {
        (**self).get_match_details(match_id, player).await
    }

    async fn get_placement_status(
        &self,
        player: &PlayerId,
        season: Season,
    ) -> TrackerResult<PlacementState> {
        (**self).get_placement_status(player, season).await
    }
}

/// Gates every call of the inner source through a shared limiter.
pub struct RateLimitedSource<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S: DataSource> RateLimitedSource<S> {
    pub fn new(inner: S, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<S: DataSource> DataSource for RateLimitedSource<S> {
    async fn get_current_rank(&self, player: &PlayerId) -> TrackerResult<RankSnapshot> {
        self.limiter.acquire().await;
        self.inner.get_current_rank(player).await
    }

    async fn get_latest_match_id(&self, player: &PlayerId) -> TrackerResult<Option<String>> {
        self.limiter.acquire().await;
        self.inner.get_latest_match_id(player).await
    }

    async fn get_match_details(
        &self,
        match_id: &str,
        player: &PlayerId,
    ) -> TrackerResult<MatchRecord> {
        self.limiter.acquire().await;
        self.inner.get_match_details(match_id, player).await
    }

    async fn get_placement_status(
        &self,
        player: &PlayerId,
        season: Season,
    ) -> TrackerResult<PlacementState> {
        self.limiter.acquire().await;
        self.inner.get_placement_status(player, season).await
    }
}
