use clap::Parser;

use crate::db::models::EventType;

/// Sports betting edge detection and calibration engine
#[derive(Parser, Debug, Clone)]
#[command(name = "fairline", version, about)]
pub struct Config {
    /// Bankroll used to convert stake fractions to USD amounts
    #[arg(long, env = "BANKROLL", default_value = "10000.0")]
    pub bankroll: f64,

    /// SQLite archive path
    #[arg(long, env = "DATABASE_PATH", default_value = "fairline.db")]
    pub database_path: String,

    /// Situational events input (JSON lines)
    #[arg(long, env = "EVENTS_FILE")]
    pub events_file: Option<String>,

    /// Model/market price quotes input (JSON lines)
    #[arg(long, env = "QUOTES_FILE")]
    pub quotes_file: Option<String>,

    /// Resolved outcomes input (JSON lines)
    #[arg(long, env = "OUTCOMES_FILE")]
    pub outcomes_file: Option<String>,

    /// Calibration report window in hours (omit for full history)
    #[arg(long, env = "REPORT_WINDOW_HOURS")]
    pub report_window_hours: Option<i64>,

    // ── Situational decay ────────────────────────────────────────────────────
    /// Decay half-life for participant-unavailable events (hours)
    #[arg(long, env = "UNAVAILABLE_HALF_LIFE_HOURS", default_value = "168.0")]
    pub unavailable_half_life_hours: f64,

    /// Decay half-life for participant-limited events (hours)
    #[arg(long, env = "LIMITED_HALF_LIFE_HOURS", default_value = "96.0")]
    pub limited_half_life_hours: f64,

    /// Decay half-life for adverse-environment events (hours)
    #[arg(long, env = "ENVIRONMENT_HALF_LIFE_HOURS", default_value = "6.0")]
    pub environment_half_life_hours: f64,

    /// Decay half-life for travel-burden events (hours)
    #[arg(long, env = "TRAVEL_HALF_LIFE_HOURS", default_value = "48.0")]
    pub travel_half_life_hours: f64,

    /// Decay half-life for rest-disadvantage events (hours)
    #[arg(long, env = "REST_HALF_LIFE_HOURS", default_value = "72.0")]
    pub rest_half_life_hours: f64,

    /// Asymptotic decay floor for persistent conditions (injuries never decay
    /// to zero while the participant remains out)
    #[arg(long, env = "DECAY_FLOOR", default_value = "0.35")]
    pub decay_floor: f64,

    /// Multiplier applied to the second and later overlapping events of the
    /// same type on one subject
    #[arg(long, env = "COMPOUNDING_FACTOR", default_value = "0.5")]
    pub compounding_factor: f64,

    // ── Source quality ───────────────────────────────────────────────────────
    /// Point error at which a source observation scores zero accuracy
    #[arg(long, env = "ACCURACY_ERROR_SCALE", default_value = "7.0")]
    pub accuracy_error_scale: f64,

    /// EWMA smoothing constant for source accuracy/latency updates
    #[arg(long, env = "SOURCE_SMOOTHING_ALPHA", default_value = "0.2")]
    pub source_smoothing_alpha: f64,

    /// Observations required before a source's score replaces the neutral
    /// confidence multiplier
    #[arg(long, env = "MIN_SOURCE_SAMPLES", default_value = "10")]
    pub min_source_samples: u64,

    // ── Edge classification ──────────────────────────────────────────────────
    /// Minimum absolute edge (points) below which everything is no-play
    #[arg(long, env = "MIN_EDGE_POINTS", default_value = "0.5")]
    pub min_edge_points: f64,

    /// Band bound: edges above this classify at least moderate
    #[arg(long, env = "MODERATE_EDGE_POINTS", default_value = "1.0")]
    pub moderate_edge_points: f64,

    /// Band bound: edges above this classify at least strong
    #[arg(long, env = "STRONG_EDGE_POINTS", default_value = "2.0")]
    pub strong_edge_points: f64,

    /// Band bound: edges above this classify very-strong
    #[arg(long, env = "VERY_STRONG_EDGE_POINTS", default_value = "3.0")]
    pub very_strong_edge_points: f64,

    /// Confidence below this downgrades the classified tier one level
    #[arg(long, env = "CONFIDENCE_FLOOR", default_value = "0.5")]
    pub confidence_floor: f64,

    // ── Stake sizing ─────────────────────────────────────────────────────────
    /// Fractional Kelly multiplier (full Kelly is never used directly)
    #[arg(long, env = "KELLY_MULTIPLIER", default_value = "0.5")]
    pub kelly_multiplier: f64,

    /// Implied break-even probability of the assumed entry odds
    /// (0.5238 = standard -110 juice)
    #[arg(long, env = "BREAKEVEN_PRICE", default_value = "0.5238")]
    pub breakeven_price: f64,

    /// Win-probability gain per point of edge
    #[arg(long, env = "PROB_PER_POINT", default_value = "0.025")]
    pub prob_per_point: f64,

    /// Maximum fraction of bankroll on a single position
    #[arg(long, env = "MAX_SINGLE_POSITION_FRACTION", default_value = "0.10")]
    pub max_single_position_fraction: f64,

    /// Maximum summed fraction of bankroll across open positions
    #[arg(long, env = "MAX_AGGREGATE_EXPOSURE_FRACTION", default_value = "0.25")]
    pub max_aggregate_exposure_fraction: f64,

    /// Smallest stake fraction worth recommending after exposure scaling
    #[arg(long, env = "MIN_STAKE_FRACTION", default_value = "0.005")]
    pub min_stake_fraction: f64,

    // ── Calibration reporting ────────────────────────────────────────────────
    /// Paired records required before a report carries metrics
    #[arg(long, env = "MIN_REPORT_SAMPLES", default_value = "20")]
    pub min_report_samples: usize,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bankroll <= 0.0 {
            anyhow::bail!("bankroll must be positive");
        }
        for (name, hl) in [
            ("unavailable_half_life_hours", self.unavailable_half_life_hours),
            ("limited_half_life_hours", self.limited_half_life_hours),
            ("environment_half_life_hours", self.environment_half_life_hours),
            ("travel_half_life_hours", self.travel_half_life_hours),
            ("rest_half_life_hours", self.rest_half_life_hours),
        ] {
            if !hl.is_finite() || hl <= 0.0 {
                anyhow::bail!("{} must be a positive number of hours", name);
            }
        }
        if !(0.0..1.0).contains(&self.decay_floor) {
            anyhow::bail!("decay_floor must be in [0.0, 1.0)");
        }
        if !(0.0..=1.0).contains(&self.compounding_factor) {
            anyhow::bail!("compounding_factor must be between 0.0 and 1.0");
        }
        if self.accuracy_error_scale <= 0.0 {
            anyhow::bail!("accuracy_error_scale must be positive");
        }
        if !(0.0 < self.source_smoothing_alpha && self.source_smoothing_alpha <= 1.0) {
            anyhow::bail!("source_smoothing_alpha must be in (0.0, 1.0]");
        }
        if self.min_edge_points < 0.0 {
            anyhow::bail!("min_edge_points must be non-negative");
        }
        if !(self.min_edge_points < self.moderate_edge_points
            && self.moderate_edge_points < self.strong_edge_points
            && self.strong_edge_points < self.very_strong_edge_points)
        {
            anyhow::bail!(
                "edge bands must be strictly increasing: min < moderate < strong < very_strong"
            );
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            anyhow::bail!("confidence_floor must be between 0.0 and 1.0");
        }
        if !(0.0 < self.kelly_multiplier && self.kelly_multiplier <= 1.0) {
            anyhow::bail!("kelly_multiplier must be in (0.0, 1.0]");
        }
        if !(0.0 < self.breakeven_price && self.breakeven_price < 1.0) {
            anyhow::bail!("breakeven_price must be strictly between 0.0 and 1.0");
        }
        if self.prob_per_point <= 0.0 {
            anyhow::bail!("prob_per_point must be positive");
        }
        if !(0.0..=1.0).contains(&self.max_single_position_fraction) {
            anyhow::bail!("max_single_position_fraction must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.max_aggregate_exposure_fraction) {
            anyhow::bail!("max_aggregate_exposure_fraction must be between 0.0 and 1.0");
        }
        if self.max_single_position_fraction > self.max_aggregate_exposure_fraction {
            anyhow::bail!(
                "max_single_position_fraction cannot exceed max_aggregate_exposure_fraction"
            );
        }
        if self.min_stake_fraction < 0.0 || self.min_stake_fraction > self.max_single_position_fraction
        {
            anyhow::bail!("min_stake_fraction must be in [0.0, max_single_position_fraction]");
        }
        Ok(())
    }

    /// Decay half-life (hours) for the given event type.
    pub fn half_life_hours(&self, event_type: EventType) -> f64 {
        match event_type {
            EventType::ParticipantUnavailable => self.unavailable_half_life_hours,
            EventType::ParticipantLimited => self.limited_half_life_hours,
            EventType::AdverseEnvironment => self.environment_half_life_hours,
            EventType::TravelBurden => self.travel_half_life_hours,
            EventType::RestDisadvantage => self.rest_half_life_hours,
        }
    }

    /// Asymptotic decay floor for the given event type. Time-boxed conditions
    /// decay to zero; persistent ones hold the configured floor.
    pub fn decay_floor_for(&self, event_type: EventType) -> f64 {
        if event_type.is_persistent() {
            self.decay_floor
        } else {
            0.0
        }
    }
}
