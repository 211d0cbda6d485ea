//! Situational adjustment calculator.
//!
//! Turns a subject's active situational events into a single net point
//! adjustment plus an aggregate confidence. The key properties:
//!
//! - **Decay** applies to the *currency* of the information, not to the
//!   existence of the condition: a participant-unavailable event holds a
//!   configured floor indefinitely until a newer event supersedes it, while
//!   an adverse-environment event decays all the way to zero.
//! - **Compounding** damps overlapping events of the same type (a third
//!   simultaneous injury on one unit is partly priced into the second), so
//!   correlated impacts are not double-counted.
//! - **Confidence** weights each event by signal strength, decay, and the
//!   originating source's rolling accuracy. Low-scoring sources still
//!   contribute their point impact, just flagged lower-confidence.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::db::models::{DecayedAdjustment, EventType, SituationalEvent};
use crate::engine::sources::SourceQualityTracker;
use crate::error::EngineError;

/// Net situational adjustment for one subject at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetAdjustment {
    /// Net point-value correction to the model price
    pub points: f64,
    /// Aggregate confidence in [0, 1]; 0.0 for an empty event set
    pub confidence: f64,
    pub breakdown: Vec<DecayedAdjustment>,
    /// Distinct contributing sources, sorted
    pub source_ids: Vec<String>,
}

impl NetAdjustment {
    fn neutral() -> Self {
        NetAdjustment {
            points: 0.0,
            confidence: 0.0,
            breakdown: Vec::new(),
            source_ids: Vec::new(),
        }
    }
}

/// Decay factor in [0, 1] for an event of the given type after `elapsed`.
///
/// `floor + (1 - floor) * 2^(-hours / half_life)`: exactly 1.0 at zero
/// elapsed, strictly decreasing, asymptotic to the type's floor.
pub fn decay_factor(elapsed: Duration, event_type: EventType, config: &Config) -> f64 {
    let hours = (elapsed.num_milliseconds().max(0) as f64) / 3_600_000.0;
    let half_life = config.half_life_hours(event_type);
    let floor = config.decay_floor_for(event_type);
    floor + (1.0 - floor) * (-std::f64::consts::LN_2 * hours / half_life).exp()
}

/// Shared store of situational events. History is append-only; the active
/// view keeps the latest record per `event_id`, so re-reporting a condition
/// re-anchors its decay clock instead of stacking on the stale record.
#[derive(Clone, Default)]
pub struct EventLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

#[derive(Default)]
struct LedgerInner {
    history: Vec<SituationalEvent>,
    active: HashMap<String, SituationalEvent>,
}

impl EventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and record an event. Future timestamps and non-finite
    /// impacts are rejected, never silently dropped.
    pub fn ingest(&self, event: SituationalEvent, now: DateTime<Utc>) -> Result<(), EngineError> {
        if event.event_id.trim().is_empty() {
            return Err(EngineError::validation(&event.subject_id, "empty event_id"));
        }
        if event.subject_id.trim().is_empty() {
            return Err(EngineError::validation(&event.event_id, "empty subject_id"));
        }
        if event.source_id.trim().is_empty() {
            return Err(EngineError::validation(&event.event_id, "empty source_id"));
        }
        if !event.base_impact.is_finite() {
            return Err(EngineError::validation(
                &event.event_id,
                "base_impact is not finite",
            ));
        }
        if event.occurred_at > now {
            return Err(EngineError::validation(
                &event.event_id,
                format!("occurred_at {} is in the future", event.occurred_at),
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        inner.history.push(event.clone());
        match inner.active.get(&event.event_id) {
            // Stale re-delivery of an already-superseded observation
            Some(existing) if existing.occurred_at >= event.occurred_at => {}
            _ => {
                inner.active.insert(event.event_id.clone(), event);
            }
        }
        Ok(())
    }

    /// Current active events for one subject (latest record per condition).
    pub fn active_for_subject(&self, subject_id: &str) -> Vec<SituationalEvent> {
        let inner = self.inner.lock().unwrap();
        inner
            .active
            .values()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect()
    }

    #[allow(dead_code)]
    pub fn history_len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }
}

/// Combine a subject's active events into a net adjustment and confidence.
///
/// Within each event-type group, the largest decayed impact counts in full
/// and every further event is multiplied by the compounding factor. Groups
/// of different types are independent and sum fully.
pub fn net_adjustment(
    events: &[SituationalEvent],
    sources: &SourceQualityTracker,
    now: DateTime<Utc>,
    config: &Config,
) -> NetAdjustment {
    if events.is_empty() {
        return NetAdjustment::neutral();
    }

    let mut by_type: HashMap<EventType, Vec<(&SituationalEvent, f64, f64)>> = HashMap::new();
    for event in events {
        let decay = decay_factor(now - event.occurred_at, event.event_type, config);
        let decayed = event.base_impact * decay;
        by_type
            .entry(event.event_type)
            .or_default()
            .push((event, decay, decayed));
    }

    let mut breakdown = Vec::with_capacity(events.len());
    for group in by_type.values_mut() {
        group.sort_by(|a, b| {
            b.2.abs()
                .partial_cmp(&a.2.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (rank, (event, decay, decayed)) in group.iter().enumerate() {
            let compound = if rank == 0 {
                1.0
            } else {
                config.compounding_factor
            };
            let effective = decayed * compound;
            let source_multiplier = sources.confidence_multiplier(&[event.source_id.clone()]);
            breakdown.push(DecayedAdjustment {
                event_id: event.event_id.clone(),
                event_type: event.event_type,
                decay_factor: *decay,
                effective_impact: effective,
                confidence_weight: (event.signal_strength.weight() * decay * source_multiplier)
                    .clamp(0.0, 1.0),
            });
        }
    }

    let points: f64 = breakdown.iter().map(|d| d.effective_impact).sum();

    // Confidence is the impact-weighted mean of per-event confidences, so a
    // dominant injury from a trusted source is not washed out by a weak
    // weather note.
    let total_weight: f64 = breakdown.iter().map(|d| d.effective_impact.abs()).sum();
    let confidence = if total_weight > 0.0 {
        breakdown
            .iter()
            .map(|d| d.effective_impact.abs() * d.confidence_weight)
            .sum::<f64>()
            / total_weight
    } else {
        0.0
    };

    let mut source_ids: Vec<String> = events.iter().map(|e| e.source_id.clone()).collect();
    source_ids.sort();
    source_ids.dedup();

    NetAdjustment {
        points,
        confidence: confidence.clamp(0.0, 1.0),
        breakdown,
        source_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SignalStrength;
    use approx::assert_relative_eq;
    use clap::Parser;

    fn config() -> Config {
        Config::parse_from(["fairline"])
    }

    fn event(
        event_id: &str,
        event_type: EventType,
        base_impact: f64,
        occurred_at: DateTime<Utc>,
    ) -> SituationalEvent {
        SituationalEvent {
            event_id: event_id.into(),
            subject_id: "nfl-2025-week1-kc-buf".into(),
            event_type,
            base_impact,
            occurred_at,
            source_id: "injury-wire".into(),
            signal_strength: SignalStrength::Strong,
        }
    }

    #[test]
    fn decay_is_one_at_zero_elapsed() {
        let cfg = config();
        for et in [
            EventType::ParticipantUnavailable,
            EventType::ParticipantLimited,
            EventType::AdverseEnvironment,
            EventType::TravelBurden,
            EventType::RestDisadvantage,
        ] {
            assert_relative_eq!(decay_factor(Duration::zero(), et, &cfg), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn decay_is_monotonic_non_increasing() {
        let cfg = config();
        for et in [EventType::ParticipantUnavailable, EventType::AdverseEnvironment] {
            let mut prev = 1.0;
            for hours in [0, 1, 6, 24, 72, 240, 1000] {
                let d = decay_factor(Duration::hours(hours), et, &cfg);
                assert!(d <= prev + 1e-12, "decay increased at {}h for {:?}", hours, et);
                assert!((0.0..=1.0).contains(&d));
                prev = d;
            }
        }
    }

    #[test]
    fn persistent_condition_never_decays_below_floor() {
        let cfg = config();
        let d = decay_factor(
            Duration::days(365),
            EventType::ParticipantUnavailable,
            &cfg,
        );
        assert!(d >= cfg.decay_floor);
        // Time-boxed conditions do go to (effectively) zero
        let w = decay_factor(Duration::days(30), EventType::AdverseEnvironment, &cfg);
        assert!(w < 0.001);
    }

    #[test]
    fn halving_at_the_half_life() {
        let cfg = config();
        let d = decay_factor(Duration::hours(6), EventType::AdverseEnvironment, &cfg);
        assert_relative_eq!(d, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn compounding_damps_overlapping_same_type_events() {
        let cfg = config();
        let sources = SourceQualityTracker::from_config(&cfg);
        let now = Utc::now();
        let events = vec![
            event("lt-out", EventType::ParticipantUnavailable, -2.0, now),
            event("lg-out", EventType::ParticipantUnavailable, -1.5, now),
            event("c-out", EventType::ParticipantUnavailable, -1.0, now),
        ];
        let net = net_adjustment(&events, &sources, now, &cfg);
        // -2.0 + (-1.5 * 0.5) + (-1.0 * 0.5), not the naive -4.5
        assert_relative_eq!(net.points, -3.25, epsilon = 1e-9);
    }

    #[test]
    fn different_types_sum_fully() {
        let cfg = config();
        let sources = SourceQualityTracker::from_config(&cfg);
        let now = Utc::now();
        let events = vec![
            event("qb-out", EventType::ParticipantUnavailable, -3.0, now),
            event("wind", EventType::AdverseEnvironment, -1.0, now),
        ];
        let net = net_adjustment(&events, &sources, now, &cfg);
        assert_relative_eq!(net.points, -4.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_event_set_is_neutral_not_favorable() {
        let cfg = config();
        let sources = SourceQualityTracker::from_config(&cfg);
        let net = net_adjustment(&[], &sources, Utc::now(), &cfg);
        assert_relative_eq!(net.points, 0.0, epsilon = 1e-12);
        assert_relative_eq!(net.confidence, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn decayed_impact_never_exceeds_base() {
        let cfg = config();
        let sources = SourceQualityTracker::from_config(&cfg);
        let now = Utc::now();
        let events = vec![event(
            "qb-out",
            EventType::ParticipantUnavailable,
            -3.0,
            now - Duration::hours(300),
        )];
        let net = net_adjustment(&events, &sources, now, &cfg);
        assert!(net.points.abs() <= 3.0);
        assert!(net.breakdown[0].decay_factor < 1.0);
        assert!(net.breakdown[0].decay_factor >= cfg.decay_floor);
    }

    #[test]
    fn ledger_rejects_future_timestamp() {
        let ledger = EventLedger::new();
        let now = Utc::now();
        let ev = event(
            "qb-out",
            EventType::ParticipantUnavailable,
            -3.0,
            now + Duration::hours(2),
        );
        let err = ledger.ingest(ev, now).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        assert_eq!(ledger.history_len(), 0);
    }

    #[test]
    fn ledger_rejects_non_finite_impact() {
        let ledger = EventLedger::new();
        let now = Utc::now();
        let ev = event("qb-out", EventType::ParticipantUnavailable, f64::NAN, now);
        assert!(ledger.ingest(ev, now).is_err());
    }

    #[test]
    fn newer_event_supersedes_and_reanchors() {
        let ledger = EventLedger::new();
        let now = Utc::now();
        let stale = event(
            "qb-status",
            EventType::ParticipantUnavailable,
            -3.0,
            now - Duration::hours(100),
        );
        let mut fresh = event("qb-status", EventType::ParticipantLimited, -1.5, now);
        fresh.subject_id = stale.subject_id.clone();
        ledger.ingest(stale, now).unwrap();
        ledger.ingest(fresh.clone(), now).unwrap();

        let active = ledger.active_for_subject(&fresh.subject_id);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].event_type, EventType::ParticipantLimited);
        assert_relative_eq!(active[0].base_impact, -1.5, epsilon = 1e-12);
        // History keeps both
        assert_eq!(ledger.history_len(), 2);
    }

    #[test]
    fn stale_redelivery_does_not_replace_newer_record() {
        let ledger = EventLedger::new();
        let now = Utc::now();
        let fresh = event("qb-status", EventType::ParticipantLimited, -1.5, now);
        let stale = event(
            "qb-status",
            EventType::ParticipantUnavailable,
            -3.0,
            now - Duration::hours(100),
        );
        ledger.ingest(fresh.clone(), now).unwrap();
        ledger.ingest(stale, now).unwrap();
        let active = ledger.active_for_subject(&fresh.subject_id);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].event_type, EventType::ParticipantLimited);
    }

    #[test]
    fn unrated_sources_yield_neutral_confidence_weighting() {
        let cfg = config();
        let sources = SourceQualityTracker::from_config(&cfg);
        let now = Utc::now();
        let events = vec![event("qb-out", EventType::ParticipantUnavailable, -3.0, now)];
        let net = net_adjustment(&events, &sources, now, &cfg);
        // strong signal (0.75) x decay 1.0 x neutral multiplier 0.5
        assert_relative_eq!(net.confidence, 0.375, epsilon = 1e-9);
    }

    #[test]
    fn low_accuracy_source_reduces_confidence_not_impact() {
        let cfg = config();
        let trusted = SourceQualityTracker::from_config(&cfg);
        let distrusted = SourceQualityTracker::from_config(&cfg);
        for _ in 0..cfg.min_source_samples {
            trusted.record("injury-wire", 0.0, 0.0, 1000.0);
            distrusted.record("injury-wire", 10.0, 0.0, 1000.0);
        }
        let now = Utc::now();
        let events = vec![event("qb-out", EventType::ParticipantUnavailable, -3.0, now)];

        let good = net_adjustment(&events, &trusted, now, &cfg);
        let bad = net_adjustment(&events, &distrusted, now, &cfg);
        assert_relative_eq!(good.points, bad.points, epsilon = 1e-9);
        assert!(bad.confidence < good.confidence);
    }
}
