//! rankwatch library
//!
//! Tracks competitive ranks for a set of watched players: polls the upstream
//! on a fixed period, classifies what changed since the last observation,
//! persists it and fans events out to every context watching the player.

pub mod config;
pub mod error;
pub mod ladder;
pub mod models;
pub mod notify;
pub mod season;
pub mod shutdown;
pub mod storage;
pub mod tracker;
pub mod upstream;

pub use error::{TrackerError, TrackerResult};
