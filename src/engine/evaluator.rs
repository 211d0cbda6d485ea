use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::models::{
    CalibrationReport, EdgeRecord, OutcomeRecord, PredictionRecord, PriceQuote,
    SituationalEvent, StakeRecommendation,
};
use crate::db::Database;
use crate::engine::adjustment::{net_adjustment, EventLedger};
use crate::engine::calibration::CalibrationTracker;
use crate::engine::sources::SourceQualityTracker;
use crate::engine::{edge, stake};
use crate::error::EngineError;

/// One quote run end to end: the classified edge and its bounded stake.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub edge: EdgeRecord,
    pub stake: StakeRecommendation,
}

/// The core engine. Wires the event ledger, source scores, edge detection,
/// stake sizing, and calibration together behind shared, injectable stores;
/// cheap to clone, so batch evaluation can fan out across worker tasks.
#[derive(Clone)]
pub struct EdgeEngine {
    config: Config,
    ledger: EventLedger,
    sources: SourceQualityTracker,
    calibration: CalibrationTracker,
    /// Open stake fraction per subject; released when its outcome arrives.
    open_exposure: Arc<Mutex<HashMap<String, f64>>>,
    /// Optional SQLite archive of evaluated records.
    archive: Option<Database>,
}

impl EdgeEngine {
    pub fn new(config: Config) -> Self {
        let sources = SourceQualityTracker::from_config(&config);
        let calibration = CalibrationTracker::new(config.min_report_samples);
        EdgeEngine {
            config,
            ledger: EventLedger::new(),
            sources,
            calibration,
            open_exposure: Arc::new(Mutex::new(HashMap::new())),
            archive: None,
        }
    }

    pub fn with_archive(config: Config, archive: Database) -> Self {
        let mut engine = Self::new(config);
        engine.archive = Some(archive);
        engine
    }

    #[allow(dead_code)]
    pub fn sources(&self) -> &SourceQualityTracker {
        &self.sources
    }

    /// Summed stake fraction of currently open recommendations.
    pub fn open_exposure_fraction(&self) -> f64 {
        self.open_exposure.lock().unwrap().values().sum()
    }

    /// Validate and record a situational event against the current clock.
    pub fn ingest_event(&self, event: SituationalEvent) -> Result<(), EngineError> {
        self.ingest_event_at(event, Utc::now())
    }

    pub fn ingest_event_at(
        &self,
        event: SituationalEvent,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.ledger.ingest(event, now)
    }

    /// Evaluate one subject's quote through the full pipeline: active events
    /// → net adjustment → classified edge → bounded stake → prediction
    /// record. Predictions are write-once, so re-quoting an already
    /// predicted subject fails with a conflict.
    #[allow(dead_code)]
    pub fn evaluate_quote(&self, quote: &PriceQuote) -> Result<Evaluation, EngineError> {
        self.evaluate_quote_at(quote, Utc::now())
    }

    pub fn evaluate_quote_at(
        &self,
        quote: &PriceQuote,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EngineError> {
        if quote.subject_id.trim().is_empty() {
            return Err(EngineError::validation("quote", "empty subject_id"));
        }

        let events = self.ledger.active_for_subject(&quote.subject_id);
        let adjustment = net_adjustment(&events, &self.sources, now, &self.config);
        let edge_record = edge::evaluate(
            &quote.subject_id,
            quote.model_price,
            quote.market_price,
            adjustment.points,
            adjustment.confidence,
            now,
            &self.config,
        )?;

        // Sizing and exposure bookkeeping under one lock so the aggregate
        // ceiling holds even when subjects are evaluated concurrently.
        let stake_rec = {
            let mut open = self.open_exposure.lock().unwrap();
            let open_fraction: f64 = open.values().sum();
            let stake_rec = stake::size(
                &edge_record,
                self.config.bankroll,
                open_fraction,
                now,
                &self.config,
            );

            self.calibration.record_prediction(PredictionRecord {
                subject_id: quote.subject_id.clone(),
                predicted_edge: edge_record.raw_edge,
                adjustment: adjustment.points,
                breakdown: adjustment.breakdown.clone(),
                confidence: adjustment.confidence,
                tier: edge_record.tier,
                stake_fraction: stake_rec.stake_fraction,
                stake_usd: stake_rec.stake_usd,
                source_ids: adjustment.source_ids.clone(),
                recorded_at: now,
            })?;

            if stake_rec.stake_fraction > 0.0 {
                open.insert(quote.subject_id.clone(), stake_rec.stake_fraction);
            }
            stake_rec
        };

        info!(
            "Evaluated {}: raw_edge={:+.2}, tier={:?}, confidence={:.2}, stake={:.4} (${:.2}, {:?})",
            quote.subject_id,
            edge_record.raw_edge,
            edge_record.tier,
            edge_record.confidence,
            stake_rec.stake_fraction,
            stake_rec.stake_usd,
            stake_rec.reason
        );

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.insert_edge_record(&edge_record) {
                warn!("Failed to archive edge record for {}: {}", quote.subject_id, e);
            }
            if let Some(prediction) = self.calibration.prediction(&quote.subject_id) {
                if let Err(e) = archive.insert_prediction(&prediction) {
                    warn!("Failed to archive prediction for {}: {}", quote.subject_id, e);
                }
            }
        }

        Ok(Evaluation {
            edge: edge_record,
            stake: stake_rec,
        })
    }

    /// Evaluate a batch of quotes. Each subject stands alone: a validation
    /// or conflict failure on one never aborts the others.
    pub fn evaluate_batch(&self, quotes: &[PriceQuote]) -> Vec<Result<Evaluation, EngineError>> {
        let now = Utc::now();
        quotes
            .iter()
            .map(|quote| {
                let result = self.evaluate_quote_at(quote, now);
                if let Err(e) = &result {
                    warn!("Evaluation failed for {}: {}", quote.subject_id, e);
                }
                result
            })
            .collect()
    }

    /// Record a resolved outcome: reconciles the prediction, feeds source
    /// scores, and releases the subject's open exposure.
    pub fn record_outcome(&self, outcome: OutcomeRecord) -> Result<(), EngineError> {
        let subject_id = outcome.subject_id.clone();
        let prediction = self.calibration.record_outcome(outcome.clone(), &self.sources)?;
        self.open_exposure.lock().unwrap().remove(&subject_id);

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.insert_outcome(&outcome) {
                warn!("Failed to archive outcome for {}: {}", subject_id, e);
            }
            for source_id in &prediction.source_ids {
                if let Some(score) = self.sources.score(source_id) {
                    if let Err(e) = archive.upsert_source_score(&score) {
                        warn!("Failed to archive source score for {}: {}", source_id, e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Calibration report over the trailing window (None = full history).
    pub fn report(&self, window: Option<Duration>) -> CalibrationReport {
        self.calibration.report(window, Utc::now(), &self.sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ActualResult, EdgeTier, EventType, SignalStrength, StakeReason};
    use approx::assert_relative_eq;
    use clap::Parser;

    fn engine() -> EdgeEngine {
        let mut config = Config::parse_from(["fairline"]);
        config.breakeven_price = 0.5;
        EdgeEngine::new(config)
    }

    fn event(event_id: &str, subject_id: &str, base_impact: f64, now: DateTime<Utc>) -> SituationalEvent {
        SituationalEvent {
            event_id: event_id.into(),
            subject_id: subject_id.into(),
            event_type: EventType::ParticipantUnavailable,
            base_impact,
            occurred_at: now,
            source_id: "injury-wire".into(),
            signal_strength: SignalStrength::VeryStrong,
        }
    }

    fn quote(subject_id: &str, model_price: f64, market_price: f64) -> PriceQuote {
        PriceQuote {
            subject_id: subject_id.into(),
            model_price,
            market_price,
            observed_at: Utc::now(),
        }
    }

    fn outcome(subject_id: &str) -> OutcomeRecord {
        OutcomeRecord {
            subject_id: subject_id.into(),
            actual_result: ActualResult::Win,
            actual_margin: 2.0,
            realized_value: 50.0,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn full_pipeline_applies_adjustment_before_edge() {
        let engine = engine();
        let now = Utc::now();
        engine
            .ingest_event_at(event("qb-out", "kc-buf", -1.0, now), now)
            .unwrap();
        let eval = engine.evaluate_quote_at(&quote("kc-buf", 3.0, 0.5), now).unwrap();
        // (3.0 - 1.0) - 0.5
        assert_relative_eq!(eval.edge.raw_edge, 1.5, epsilon = 1e-9);
        assert_relative_eq!(eval.edge.adjustment, -1.0, epsilon = 1e-9);
        // very-strong signal at zero elapsed with a neutral source: 1.0 * 1.0 * 0.5,
        // equal to the floor, so the moderate band holds
        assert_eq!(eval.edge.tier, EdgeTier::Moderate);
        assert!(eval.stake.stake_fraction > 0.0);
    }

    #[test]
    fn re_quoting_a_subject_conflicts() {
        let engine = engine();
        let now = Utc::now();
        engine.evaluate_quote_at(&quote("kc-buf", 3.0, 0.5), now).unwrap();
        let err = engine
            .evaluate_quote_at(&quote("kc-buf", 3.1, 0.5), now)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePrediction { .. }));
    }

    #[test]
    fn batch_isolates_per_subject_failures() {
        let engine = engine();
        let quotes = vec![
            quote("good-1", 3.0, 0.5),
            PriceQuote {
                subject_id: "poisoned".into(),
                model_price: f64::NAN,
                market_price: 0.5,
                observed_at: Utc::now(),
            },
            quote("good-2", 2.5, 0.5),
        ];
        let results = engine.evaluate_batch(&quotes);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn aggregate_exposure_never_exceeds_ceiling() {
        let engine = engine();
        let now = Utc::now();
        // Each sized stake hits the 0.10 single cap; the fourth subject only
        // gets what headroom remains under the 0.25 aggregate cap.
        for (i, subject) in ["g1", "g2", "g3", "g4"].iter().enumerate() {
            let eval = engine
                .evaluate_quote_at(&quote(subject, 20.0, 0.5), now)
                .unwrap();
            if i < 2 {
                assert_eq!(eval.stake.reason, StakeReason::Sized);
            }
        }
        let total = engine.open_exposure_fraction();
        assert!(total <= 0.25 + 1e-9, "aggregate exposure {} breached cap", total);
    }

    #[test]
    fn capped_out_subject_gets_zero_with_reason() {
        let engine = engine();
        let now = Utc::now();
        for subject in ["g1", "g2"] {
            engine.evaluate_quote_at(&quote(subject, 20.0, 0.5), now).unwrap();
        }
        // 0.20 open; third takes the remaining 0.05 headroom
        let third = engine.evaluate_quote_at(&quote("g3", 20.0, 0.5), now).unwrap();
        assert_eq!(third.stake.reason, StakeReason::ExposureScaled);
        assert_relative_eq!(third.stake.stake_fraction, 0.05, epsilon = 1e-9);
        // Nothing left for the fourth
        let fourth = engine.evaluate_quote_at(&quote("g4", 20.0, 0.5), now).unwrap();
        assert_eq!(fourth.stake.reason, StakeReason::ExposureCapped);
        assert_relative_eq!(fourth.stake.stake_fraction, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn outcome_releases_exposure() {
        let engine = engine();
        let now = Utc::now();
        engine.evaluate_quote_at(&quote("kc-buf", 20.0, 0.5), now).unwrap();
        assert!(engine.open_exposure_fraction() > 0.0);
        engine.record_outcome(outcome("kc-buf")).unwrap();
        assert_relative_eq!(engine.open_exposure_fraction(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn concurrent_duplicate_outcomes_have_one_winner() {
        let engine = engine();
        let now = Utc::now();
        engine.evaluate_quote_at(&quote("kc-buf", 3.0, 0.5), now).unwrap();

        let results: Vec<Result<(), EngineError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let engine = engine.clone();
                    scope.spawn(move || engine.record_outcome(outcome("kc-buf")))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(EngineError::DuplicateOutcome { .. }))));
    }

    #[test]
    fn outcome_feedback_raises_future_confidence() {
        let mut config = Config::parse_from(["fairline"]);
        config.breakeven_price = 0.5;
        config.min_source_samples = 2;
        let engine = EdgeEngine::new(config);
        let now = Utc::now();

        for (i, subject) in ["g1", "g2"].iter().enumerate() {
            let ev = event(&format!("qb-out-{}", i), subject, -1.0, now);
            engine.ingest_event_at(ev, now).unwrap();
            engine.evaluate_quote_at(&quote(subject, 3.0, 0.5), now).unwrap();
            let mut o = outcome(subject);
            o.actual_margin = 1.5; // matches predicted edge exactly
            engine.record_outcome(o).unwrap();
        }

        // Source now has two perfect samples, at the min-sample threshold
        let score = engine.sources().score("injury-wire").unwrap();
        assert!(!score.insufficient_sample);
        assert!(score.accuracy > 0.9);
    }
}
