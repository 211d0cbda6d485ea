//! Edge detection: adjusted model price vs. market price, classified into
//! tiers by magnitude and gated by confidence.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db::models::{EdgeRecord, EdgeTier};
use crate::error::EngineError;

/// Classify a raw edge into a tier. Pure and total: every
/// (edge, confidence) pair maps to exactly one tier.
///
/// Zero and negative edges are always no-play, as is anything at or below
/// the minimum threshold, regardless of confidence. Band upper bounds are
/// inclusive, so a value sitting exactly on a boundary resolves to the
/// lower (more conservative) tier. Confidence below the configured floor
/// downgrades the result one level.
pub fn classify(edge: f64, confidence: f64, config: &Config) -> EdgeTier {
    if !edge.is_finite() || edge <= config.min_edge_points {
        return EdgeTier::NoPlay;
    }
    let tier = if edge <= config.moderate_edge_points {
        EdgeTier::Marginal
    } else if edge <= config.strong_edge_points {
        EdgeTier::Moderate
    } else if edge <= config.very_strong_edge_points {
        EdgeTier::Strong
    } else {
        EdgeTier::VeryStrong
    };
    if confidence < config.confidence_floor {
        tier.downgrade()
    } else {
        tier
    }
}

/// Compare the situationally adjusted model price against the market and
/// produce a fresh `EdgeRecord`. Positive raw edge means the model favors
/// the side the market prices shorter.
pub fn evaluate(
    subject_id: &str,
    model_price: f64,
    market_price: f64,
    adjustment: f64,
    confidence: f64,
    evaluated_at: DateTime<Utc>,
    config: &Config,
) -> Result<EdgeRecord, EngineError> {
    if !model_price.is_finite() || !market_price.is_finite() {
        return Err(EngineError::validation(
            subject_id,
            "model_price and market_price must be finite",
        ));
    }
    if !adjustment.is_finite() {
        return Err(EngineError::validation(subject_id, "adjustment must be finite"));
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(EngineError::validation(
            subject_id,
            "confidence must be within [0.0, 1.0]",
        ));
    }

    let adjusted_model_price = model_price + adjustment;
    let raw_edge = adjusted_model_price - market_price;
    Ok(EdgeRecord {
        subject_id: subject_id.to_string(),
        model_price,
        market_price,
        adjustment,
        raw_edge,
        tier: classify(raw_edge, confidence, config),
        confidence,
        evaluated_at,
    })
}
