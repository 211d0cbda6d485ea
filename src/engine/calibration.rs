//! Prediction/outcome reconciliation and calibration reporting.
//!
//! Every evaluation writes a `PredictionRecord`; every resolved event writes
//! an `OutcomeRecord` paired to it by subject. Both are write-once: a
//! duplicate submission is rejected and the original kept. Paired records
//! feed two consumers: the on-demand `CalibrationReport`, and the source
//! quality feedback loop that re-attributes each prediction's error to the
//! sources that contributed to it.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::db::models::{
    ActualResult, CalibrationReport, EdgeTier, OutcomeRecord, PredictionRecord,
};
use crate::engine::sources::SourceQualityTracker;
use crate::error::EngineError;

/// Win-rate above which current weighting is considered healthy.
const STRONG_WIN_RATE: f64 = 0.55;
/// Win-rate below which a tier's band boundaries deserve a second look.
const POOR_WIN_RATE: f64 = 0.45;
/// Pairs a tier needs before its own win-rate is worth commenting on.
const TIER_MIN_SAMPLES: usize = 10;
/// Rolling accuracy bounds that trigger source weighting recommendations.
const TRUSTED_SOURCE_ACCURACY: f64 = 0.7;
const SUSPECT_SOURCE_ACCURACY: f64 = 0.3;

/// Shared, injectable store of predictions and outcomes. All write-once
/// checks happen inside a single critical section, so concurrent duplicate
/// submissions have exactly one winner.
#[derive(Clone)]
pub struct CalibrationTracker {
    inner: Arc<Mutex<TrackerInner>>,
    min_report_samples: usize,
}

#[derive(Default)]
struct TrackerInner {
    predictions: HashMap<String, PredictionRecord>,
    outcomes: HashMap<String, OutcomeRecord>,
}

impl CalibrationTracker {
    pub fn new(min_report_samples: usize) -> Self {
        CalibrationTracker {
            inner: Arc::new(Mutex::new(TrackerInner::default())),
            min_report_samples,
        }
    }

    /// Record a prediction ahead of resolution. Write-once per subject.
    pub fn record_prediction(&self, prediction: PredictionRecord) -> Result<(), EngineError> {
        if prediction.subject_id.trim().is_empty() {
            return Err(EngineError::validation("prediction", "empty subject_id"));
        }
        if !prediction.predicted_edge.is_finite() {
            return Err(EngineError::validation(
                &prediction.subject_id,
                "predicted_edge is not finite",
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.predictions.contains_key(&prediction.subject_id) {
            return Err(EngineError::DuplicatePrediction {
                subject_id: prediction.subject_id,
            });
        }
        inner
            .predictions
            .insert(prediction.subject_id.clone(), prediction);
        Ok(())
    }

    /// Record a resolution against its prediction, then feed each
    /// contributing source's error back into the quality tracker. Returns
    /// the matched prediction so callers can release exposure.
    pub fn record_outcome(
        &self,
        outcome: OutcomeRecord,
        sources: &SourceQualityTracker,
    ) -> Result<PredictionRecord, EngineError> {
        if !outcome.actual_margin.is_finite() || !outcome.realized_value.is_finite() {
            return Err(EngineError::validation(
                &outcome.subject_id,
                "actual_margin and realized_value must be finite",
            ));
        }

        let prediction = {
            let mut inner = self.inner.lock().unwrap();
            let Some(prediction) = inner.predictions.get(&outcome.subject_id).cloned() else {
                return Err(EngineError::MissingPrediction {
                    subject_id: outcome.subject_id,
                });
            };
            if inner.outcomes.contains_key(&outcome.subject_id) {
                return Err(EngineError::DuplicateOutcome {
                    subject_id: outcome.subject_id,
                });
            }
            inner.outcomes.insert(outcome.subject_id.clone(), outcome.clone());
            prediction
        };

        // Close the loop: the prediction's margin error is re-attributed to
        // every source that contributed situational events to it.
        let latency_ms = (outcome.recorded_at - prediction.recorded_at)
            .num_milliseconds()
            .max(0) as f64;
        for source_id in &prediction.source_ids {
            sources.record(
                source_id,
                prediction.predicted_edge,
                outcome.actual_margin,
                latency_ms,
            );
        }
        info!(
            "Outcome reconciled for {}: predicted_edge={:.2}, actual_margin={:.2}, result={:?}",
            prediction.subject_id, prediction.predicted_edge, outcome.actual_margin,
            outcome.actual_result
        );
        Ok(prediction)
    }

    pub fn prediction(&self, subject_id: &str) -> Option<PredictionRecord> {
        self.inner.lock().unwrap().predictions.get(subject_id).cloned()
    }

    #[allow(dead_code)]
    pub fn outcome(&self, subject_id: &str) -> Option<OutcomeRecord> {
        self.inner.lock().unwrap().outcomes.get(subject_id).cloned()
    }

    /// Build a calibration report over the requested window (None = full
    /// history). Works on a snapshot taken at call time, so concurrent
    /// writes never show through mid-computation.
    pub fn report(
        &self,
        window: Option<Duration>,
        now: DateTime<Utc>,
        sources: &SourceQualityTracker,
    ) -> CalibrationReport {
        let pairs: Vec<(PredictionRecord, OutcomeRecord)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .outcomes
                .iter()
                .filter_map(|(subject_id, outcome)| {
                    inner
                        .predictions
                        .get(subject_id)
                        .map(|p| (p.clone(), outcome.clone()))
                })
                .collect()
        };

        let cutoff = window.map(|w| now - w);
        let pairs: Vec<_> = pairs
            .into_iter()
            .filter(|(p, _)| cutoff.map_or(true, |c| p.recorded_at >= c))
            .collect();

        let window_hours = window.map(|w| w.num_hours());
        let sample_count = pairs.len();
        let mut recommendations = Vec::new();

        if sample_count < self.min_report_samples {
            recommendations.push(format!(
                "Insufficient sample to draw conclusions: {} paired records, minimum {}",
                sample_count, self.min_report_samples
            ));
            return CalibrationReport {
                window_hours,
                sample_count,
                insufficient_data: true,
                rmse_margin: None,
                win_rate: None,
                stake_weighted_return: None,
                sources: sources.all_scores(),
                recommendations,
                generated_at: now,
            };
        }

        let rmse = (pairs
            .iter()
            .map(|(p, o)| (p.predicted_edge - o.actual_margin).powi(2))
            .sum::<f64>()
            / sample_count as f64)
            .sqrt();

        let decided: Vec<_> = pairs
            .iter()
            .filter(|(_, o)| o.actual_result != ActualResult::Push)
            .collect();
        let wins = decided
            .iter()
            .filter(|(_, o)| o.actual_result == ActualResult::Win)
            .count();
        let win_rate = if decided.is_empty() {
            0.0
        } else {
            wins as f64 / decided.len() as f64
        };

        // Stake-weighted: larger positions dominate the aggregate figure.
        let total_stake: f64 = pairs.iter().map(|(p, _)| p.stake_usd).sum();
        let total_realized: f64 = pairs.iter().map(|(_, o)| o.realized_value).sum();
        let stake_weighted_return = if total_stake > 0.0 {
            total_realized / total_stake
        } else {
            0.0
        };

        if win_rate >= STRONG_WIN_RATE {
            recommendations.push(format!(
                "Win rate {:.1}% over {} records supports current source weighting",
                win_rate * 100.0,
                sample_count
            ));
        } else if win_rate < POOR_WIN_RATE {
            recommendations.push(format!(
                "Win rate {:.1}% over {} records is below break-even; review adjustment inputs",
                win_rate * 100.0,
                sample_count
            ));
        }

        for tier in [
            EdgeTier::Marginal,
            EdgeTier::Moderate,
            EdgeTier::Strong,
            EdgeTier::VeryStrong,
        ] {
            let tier_pairs: Vec<_> = decided.iter().filter(|(p, _)| p.tier == tier).collect();
            if tier_pairs.len() < TIER_MIN_SAMPLES {
                continue;
            }
            let tier_wins = tier_pairs
                .iter()
                .filter(|(_, o)| o.actual_result == ActualResult::Win)
                .count();
            let tier_rate = tier_wins as f64 / tier_pairs.len() as f64;
            if tier_rate < POOR_WIN_RATE {
                recommendations.push(format!(
                    "{:?} tier wins only {:.1}% of {} records; re-examine its band boundaries",
                    tier,
                    tier_rate * 100.0,
                    tier_pairs.len()
                ));
            }
        }

        for score in sources.all_scores() {
            if score.insufficient_sample {
                continue;
            }
            if score.accuracy >= TRUSTED_SOURCE_ACCURACY {
                recommendations.push(format!(
                    "Increase weight of source {} (accuracy {:.2} over {} samples)",
                    score.source_id, score.accuracy, score.samples
                ));
            } else if score.accuracy <= SUSPECT_SOURCE_ACCURACY {
                recommendations.push(format!(
                    "Reduce weight of source {} (accuracy {:.2} over {} samples)",
                    score.source_id, score.accuracy, score.samples
                ));
            }
        }

        CalibrationReport {
            window_hours,
            sample_count,
            insufficient_data: false,
            rmse_margin: Some(rmse),
            win_rate: Some(win_rate),
            stake_weighted_return: Some(stake_weighted_return),
            sources: sources.all_scores(),
            recommendations,
            generated_at: now,
        }
    }
}
