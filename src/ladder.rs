//! Rank ladder arithmetic
//!
//! Collapses a (tier, division, points) transition into one signed point delta.
//! Rules, in order:
//! 1. apex to apex: plain point difference
//! 2. tier changed: promotion = (100 - old) + new, demotion = -old - (100 - new)
//! 3. division changed inside a tier: same formulas on division order
//! 4. otherwise: plain point difference
//!
//! Unknown tiers never get a guessed direction; they fall back to the plain
//! difference and are flagged so the caller can surface the bad data.

use std::cmp::Ordering;

use crate::models::{Division, LadderPosition, Tier};

/// Points that fill one division.
pub const DIVISION_SPAN: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Promotion,
    Demotion,
    /// Same tier and division (or both apex).
    Within,
    /// Direction could not be established from the data.
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderDelta {
    pub points: i32,
    pub movement: Movement,
}

impl LadderDelta {
    /// True when the delta is the naive fallback because the input was not understood.
    pub fn is_data_quality_issue(&self) -> bool {
        self.movement == Movement::Unresolved
    }
}

/// Delta between two ladder positions.
pub fn between(old: &LadderPosition, new: &LadderPosition) -> LadderDelta {
    compute(
        &old.tier,
        old.division,
        old.league_points,
        &new.tier,
        new.division,
        new.league_points,
    )
}

/// Signed point delta for a raw transition.
pub fn delta(
    old_tier: &Tier,
    old_division: Option<Division>,
    old_points: i32,
    new_tier: &Tier,
    new_division: Option<Division>,
    new_points: i32,
) -> i32 {
    compute(
        old_tier,
        old_division,
        old_points,
        new_tier,
        new_division,
        new_points,
    )
    .points
}

fn compute(
    old_tier: &Tier,
    old_division: Option<Division>,
    old_points: i32,
    new_tier: &Tier,
    new_division: Option<Division>,
    new_points: i32,
) -> LadderDelta {
    let linear = new_points - old_points;

    let (Some(old_order), Some(new_order)) = (old_tier.order(), new_tier.order()) else {
        return LadderDelta {
            points: linear,
            movement: Movement::Unresolved,
        };
    };

    if old_tier.is_apex() && new_tier.is_apex() {
        return LadderDelta {
            points: linear,
            movement: Movement::Within,
        };
    }

    if old_order != new_order {
        return crossing(old_order.cmp(&new_order), old_points, new_points);
    }

    match (old_division, new_division) {
        (Some(od), Some(nd)) if od != nd => crossing(od.order().cmp(&nd.order()), old_points, new_points),
        (Some(_), Some(_)) => LadderDelta {
            points: linear,
            movement: Movement::Within,
        },
        // non-apex tier without a division on one side
        _ => LadderDelta {
            points: linear,
            movement: Movement::Unresolved,
        },
    }
}

/// `old_vs_new` is the ordering of the old rung against the new one.
fn crossing(old_vs_new: Ordering, old_points: i32, new_points: i32) -> LadderDelta {
    match old_vs_new {
        Ordering::Less => LadderDelta {
            points: (DIVISION_SPAN - old_points) + new_points,
            movement: Movement::Promotion,
        },
        Ordering::Greater => LadderDelta {
            points: -old_points - (DIVISION_SPAN - new_points),
            movement: Movement::Demotion,
        },
        Ordering::Equal => LadderDelta {
            points: new_points - old_points,
            movement: Movement::Within,
        },
    }
}
