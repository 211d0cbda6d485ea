//! Rolling per-source accuracy and latency scores.
//!
//! Every reconciled prediction feeds back here: a source whose reported
//! impacts track realized margins earns a higher accuracy score and a larger
//! confidence multiplier for future adjustments. Updates are EWMA-based so
//! scores adapt to recent behavior without being whipped around by a single
//! observation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::Config;
use crate::db::models::SourceScore;

/// Confidence multiplier used until a source has enough reconciled samples
/// to trust its own score. Deliberately mid-range: never 0, never 1.
const NEUTRAL_MULTIPLIER: f64 = 0.5;

/// Shared, injectable store of `SourceScore`s. Created on first observation,
/// updated incrementally, never deleted.
#[derive(Clone)]
pub struct SourceQualityTracker {
    inner: Arc<Mutex<HashMap<String, SourceScore>>>,
    alpha: f64,
    error_scale: f64,
    min_samples: u64,
}

impl SourceQualityTracker {
    pub fn new(alpha: f64, error_scale: f64, min_samples: u64) -> Self {
        SourceQualityTracker {
            inner: Arc::new(Mutex::new(HashMap::new())),
            alpha,
            error_scale,
            min_samples,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.source_smoothing_alpha,
            config.accuracy_error_scale,
            config.min_source_samples,
        )
    }

    /// Reconcile one of the source's predicted values against the confirmed
    /// actual. The observation scores 1.0 at zero error, sliding linearly to
    /// 0.0 at `error_scale` points off.
    pub fn record(&self, source_id: &str, predicted: f64, actual: f64, latency_ms: f64) {
        let observed = 1.0 - ((predicted - actual).abs() / self.error_scale).min(1.0);
        let mut inner = self.inner.lock().unwrap();
        let score = inner
            .entry(source_id.to_string())
            .or_insert_with(|| SourceScore {
                source_id: source_id.to_string(),
                accuracy: 0.0,
                latency_ewma_ms: 0.0,
                samples: 0,
                insufficient_sample: true,
            });
        if score.samples == 0 {
            score.accuracy = observed;
            score.latency_ewma_ms = latency_ms;
        } else {
            score.accuracy = (1.0 - self.alpha) * score.accuracy + self.alpha * observed;
            score.latency_ewma_ms =
                (1.0 - self.alpha) * score.latency_ewma_ms + self.alpha * latency_ms;
        }
        score.samples += 1;
        debug!(
            "SourceScore updated: {} accuracy={:.3} latency_ms={:.0} samples={}",
            source_id, score.accuracy, score.latency_ewma_ms, score.samples
        );
    }

    /// Current score for a source, with the insufficient-sample flag set.
    pub fn score(&self, source_id: &str) -> Option<SourceScore> {
        let inner = self.inner.lock().unwrap();
        inner.get(source_id).map(|s| {
            let mut s = s.clone();
            s.insufficient_sample = s.samples < self.min_samples;
            s
        })
    }

    /// Aggregate confidence multiplier for a set of contributing sources:
    /// the mean of each source's accuracy, substituting the conservative
    /// neutral value for unknown or under-sampled sources.
    pub fn confidence_multiplier(&self, source_ids: &[String]) -> f64 {
        if source_ids.is_empty() {
            return NEUTRAL_MULTIPLIER;
        }
        let inner = self.inner.lock().unwrap();
        let sum: f64 = source_ids
            .iter()
            .map(|id| match inner.get(id) {
                Some(s) if s.samples >= self.min_samples => s.accuracy,
                _ => NEUTRAL_MULTIPLIER,
            })
            .sum();
        sum / source_ids.len() as f64
    }

    /// Snapshot of every tracked score, sorted by source id.
    pub fn all_scores(&self) -> Vec<SourceScore> {
        let inner = self.inner.lock().unwrap();
        let mut scores: Vec<SourceScore> = inner
            .values()
            .map(|s| {
                let mut s = s.clone();
                s.insufficient_sample = s.samples < self.min_samples;
                s
            })
            .collect();
        scores.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        scores
    }
}
