use thiserror::Error;

/// Errors the engine can return for a single subject's records.
///
/// Validation failures reject malformed input at the boundary; conflict
/// failures reject duplicate writes and leave the original record untouched.
/// Insufficient-data and exposure-capped conditions are reporting states, not
/// errors, and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("validation failed for {subject}: {reason}")]
    Validation { subject: String, reason: String },

    #[error("prediction already recorded for {subject_id}")]
    DuplicatePrediction { subject_id: String },

    #[error("outcome already recorded for {subject_id}")]
    DuplicateOutcome { subject_id: String },

    #[error("no prediction on record for {subject_id}")]
    MissingPrediction { subject_id: String },
}

impl EngineError {
    pub fn validation(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}
