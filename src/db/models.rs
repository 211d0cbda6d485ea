use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of situational condition an event reports.
///
/// Persistent conditions (injuries) hold until superseded by a newer event;
/// time-boxed conditions (weather, travel, rest) lose relevance once the
/// event window passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ParticipantUnavailable,
    ParticipantLimited,
    AdverseEnvironment,
    TravelBurden,
    RestDisadvantage,
}

impl EventType {
    /// Persistent conditions keep a non-zero decay floor: the participant is
    /// still out no matter how stale the report is.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            EventType::ParticipantUnavailable | EventType::ParticipantLimited
        )
    }
}

/// Reported strength of a situational signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl SignalStrength {
    /// Base confidence weight before decay and source-quality scaling.
    pub fn weight(&self) -> f64 {
        match self {
            SignalStrength::Weak => 0.25,
            SignalStrength::Moderate => 0.5,
            SignalStrength::Strong => 0.75,
            SignalStrength::VeryStrong => 1.0,
        }
    }
}

/// A single discrete situational fact (key player out, storm forecast,
/// back-to-back road game, ...). Immutable once recorded; a newer event with
/// the same `event_id` supersedes it in the active ledger view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SituationalEvent {
    /// Identifies the underlying condition, not the observation: re-reporting
    /// the same condition re-anchors its decay clock.
    pub event_id: String,
    /// Matchup/market line the event bears on
    pub subject_id: String,
    pub event_type: EventType,
    /// Signed point impact before decay (negative = hurts the modeled side)
    pub base_impact: f64,
    pub occurred_at: DateTime<Utc>,
    pub source_id: String,
    pub signal_strength: SignalStrength,
}

/// One event's contribution after decay and compounding have been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayedAdjustment {
    pub event_id: String,
    pub event_type: EventType,
    /// Decay factor in [0, 1]; `|effective_impact| <= |base_impact|` always
    pub decay_factor: f64,
    pub effective_impact: f64,
    /// Signal weight x decay x source multiplier, in [0, 1]
    pub confidence_weight: f64,
}

/// Rolling quality score for one upstream data source. Updated incrementally
/// (EWMA) by the calibration feedback path; never recomputed from history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceScore {
    pub source_id: String,
    /// Rolling accuracy in [0, 1]
    pub accuracy: f64,
    /// Rolling prediction-to-outcome latency (milliseconds)
    pub latency_ewma_ms: f64,
    pub samples: u64,
    /// Set at read time when `samples` is below the configured minimum
    #[serde(default)]
    pub insufficient_sample: bool,
}

/// Inbound model/market price pair for one subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub subject_id: String,
    pub model_price: f64,
    pub market_price: f64,
    pub observed_at: DateTime<Utc>,
}

/// Classification tier for a detected edge, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeTier {
    NoPlay,
    Marginal,
    Moderate,
    Strong,
    VeryStrong,
}

impl EdgeTier {
    /// One step toward the conservative end. `NoPlay` stays `NoPlay`.
    pub fn downgrade(self) -> EdgeTier {
        match self {
            EdgeTier::VeryStrong => EdgeTier::Strong,
            EdgeTier::Strong => EdgeTier::Moderate,
            EdgeTier::Moderate => EdgeTier::Marginal,
            EdgeTier::Marginal | EdgeTier::NoPlay => EdgeTier::NoPlay,
        }
    }

    pub fn is_playable(&self) -> bool {
        !matches!(self, EdgeTier::NoPlay)
    }
}

/// One evaluation of a subject's market line at a point in time. Never
/// mutated; re-evaluation produces a fresh record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub subject_id: String,
    pub model_price: f64,
    pub market_price: f64,
    /// Net situational adjustment applied to the model price
    pub adjustment: f64,
    /// (model_price + adjustment) - market_price; positive = model favors
    /// the side the market prices shorter
    pub raw_edge: f64,
    pub tier: EdgeTier,
    /// Aggregate confidence in [0, 1] behind the adjustment
    pub confidence: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// Why a stake recommendation came out the size it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StakeReason {
    /// Fractional Kelly, within all caps
    Sized,
    /// Edge classified no-play; zero stake
    NoPlay,
    /// Scaled down to fit remaining aggregate exposure headroom
    ExposureScaled,
    /// Headroom below the minimum meaningful size; zero stake
    ExposureCapped,
}

/// Bounded stake derived from one `EdgeRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeRecommendation {
    pub subject_id: String,
    pub tier: EdgeTier,
    /// Fraction of bankroll, in [0, max_single_position_fraction]
    pub stake_fraction: f64,
    pub stake_usd: f64,
    pub reason: StakeReason,
    pub created_at: DateTime<Utc>,
}

/// Written before an event resolves; write-once per subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub subject_id: String,
    pub predicted_edge: f64,
    pub adjustment: f64,
    pub breakdown: Vec<DecayedAdjustment>,
    pub confidence: f64,
    pub tier: EdgeTier,
    pub stake_fraction: f64,
    pub stake_usd: f64,
    /// Sources that contributed situational events to this prediction
    pub source_ids: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Result of the position recommended by a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActualResult {
    Win,
    Loss,
    Push,
}

/// Written after resolution; write-once per prediction. A second submission
/// for the same subject is rejected, never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub subject_id: String,
    pub actual_result: ActualResult,
    pub actual_margin: f64,
    /// Realized USD value relative to the recommended position
    pub realized_value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate calibration metrics over a window of paired records.
/// Recomputed on demand; metric fields are `None` below the minimum sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// None = full history
    pub window_hours: Option<i64>,
    pub sample_count: usize,
    pub insufficient_data: bool,
    /// Root-mean-square error of predicted edge vs. actual margin
    pub rmse_margin: Option<f64>,
    /// Fraction of non-push predictions whose recommended side won
    pub win_rate: Option<f64>,
    /// Total realized value over total recommended stake (stake-weighted)
    pub stake_weighted_return: Option<f64>,
    pub sources: Vec<SourceScore>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}
