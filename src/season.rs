//! Competitive season splits.
//!
//! A year has three splits with fixed calendar start dates (00:00 UTC). Anything
//! before the first boundary of a year still belongs to the last split of the
//! previous year. Placement counters are keyed by split.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// (month, day) each split starts on.
const SPLIT_STARTS: [(u32, u32); 3] = [(1, 8), (5, 14), (9, 24)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Season {
    pub year: i32,
    /// 1-based split index within the year.
    pub split: u8,
}

impl Season {
    pub fn new(year: i32, split: u8) -> Self {
        Self { year, split }
    }

    pub fn containing(at: DateTime<Utc>) -> Self {
        let year = at.year();
        for (idx, _) in SPLIT_STARTS.iter().enumerate().rev() {
            let split = idx as u8 + 1;
            if at >= split_start(year, split) {
                return Self::new(year, split);
            }
        }
        Self::new(year - 1, SPLIT_STARTS.len() as u8)
    }

    /// Storage key, e.g. `2026-S2`.
    pub fn key(&self) -> String {
        format!("{}-S{}", self.year, self.split)
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} split {}", self.year, self.split)
    }
}

fn split_start(year: i32, split: u8) -> DateTime<Utc> {
    let idx = (split.max(1) as usize - 1).min(SPLIT_STARTS.len() - 1);
    let (month, day) = SPLIT_STARTS[idx];
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
