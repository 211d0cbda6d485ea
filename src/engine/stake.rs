//! Kelly Criterion stake sizing, bounded by per-position and aggregate
//! exposure ceilings.
//!
//! Standard formula:
//!   f* = (b·p − q) / b
//! where
//!   b  = net odds received on the bet (profit per unit staked, i.e. (1/price) − 1)
//!   p  = estimated probability of winning
//!   q  = 1 − p  (probability of losing)
//!
//! We apply a *fractional* Kelly multiplier (0 < multiplier ≤ 1) to reduce
//! variance at the cost of slightly lower expected growth; full Kelly is
//! never used directly.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db::models::{EdgeRecord, StakeReason, StakeRecommendation};

/// Calculate the fractional-Kelly stake fraction.
///
/// # Arguments
/// * `win_prob`    – Estimated probability that the position wins (0.0–1.0).
/// * `entry_price` – Implied break-even probability of the entry odds (0.0–1.0).
/// * `kelly_multiplier` – Fractional Kelly multiplier (0.0–1.0).
///
/// # Returns
/// The fraction of bankroll to stake (0.0–1.0).  Returns `0.0` when
/// expected value is non-positive (i.e. no edge).
pub fn kelly_stake(win_prob: f64, entry_price: f64, kelly_multiplier: f64) -> f64 {
    debug_assert!((0.0..=1.0).contains(&win_prob), "win_prob out of range");
    debug_assert!(
        (0.0..=1.0).contains(&entry_price),
        "entry_price out of range"
    );
    debug_assert!(
        (0.0..=1.0).contains(&kelly_multiplier),
        "kelly_multiplier out of range"
    );

    if entry_price <= 0.0 || entry_price >= 1.0 {
        return 0.0;
    }

    // Net odds per unit staked (e.g. price=0.5238 → odds≈0.909 at -110)
    let b = (1.0 / entry_price) - 1.0;
    let p = win_prob;
    let q = 1.0 - p;

    let f = (b * p - q) / b;

    if f <= 0.0 {
        return 0.0; // no edge
    }

    (f * kelly_multiplier).min(1.0).max(0.0)
}

/// Translate a point-value edge into a win probability above break-even.
/// Playable records always carry a positive raw edge; a non-positive value
/// lands at or below break-even and sizes to zero downstream.
pub fn implied_win_probability(raw_edge: f64, config: &Config) -> f64 {
    (config.breakeven_price + raw_edge * config.prob_per_point).clamp(0.0, 1.0)
}

/// Size a classified edge into a bounded stake recommendation.
///
/// `open_exposure_fraction` is the summed stake fraction of currently open
/// recommendations. A position that would push the aggregate past its
/// ceiling is scaled down to the remaining headroom; if that leaves it below
/// the minimum meaningful size it comes back as zero with an explicit
/// exposure-capped reason rather than an error.
pub fn size(
    record: &EdgeRecord,
    bankroll: f64,
    open_exposure_fraction: f64,
    created_at: DateTime<Utc>,
    config: &Config,
) -> StakeRecommendation {
    let zero = |reason: StakeReason| StakeRecommendation {
        subject_id: record.subject_id.clone(),
        tier: record.tier,
        stake_fraction: 0.0,
        stake_usd: 0.0,
        reason,
        created_at,
    };

    if !record.tier.is_playable() {
        return zero(StakeReason::NoPlay);
    }

    let win_prob = implied_win_probability(record.raw_edge, config);
    let fraction = kelly_stake(win_prob, config.breakeven_price, config.kelly_multiplier)
        .min(config.max_single_position_fraction);
    if fraction <= 0.0 {
        return zero(StakeReason::NoPlay);
    }

    let headroom = (config.max_aggregate_exposure_fraction - open_exposure_fraction).max(0.0);
    let (fraction, reason) = if fraction <= headroom {
        (fraction, StakeReason::Sized)
    } else if headroom >= config.min_stake_fraction {
        (headroom, StakeReason::ExposureScaled)
    } else {
        return zero(StakeReason::ExposureCapped);
    };

    StakeRecommendation {
        subject_id: record.subject_id.clone(),
        tier: record.tier,
        stake_fraction: fraction,
        stake_usd: fraction * bankroll,
        reason,
        created_at,
    }
}
