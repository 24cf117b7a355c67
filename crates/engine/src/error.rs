use thiserror::Error;
use time::Date;

use crate::watering::{MAX_VOLUME_ML, MIN_VOLUME_ML};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Everything the engine can reject.
///
/// Validation errors leave the aggregate untouched. Data-quality problems in
/// stored history never surface here; such entries are kept as stored and
/// skipped with a warning where they are read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Stored token matches neither the current vocabulary nor the legacy table.
    #[error("unknown phase token '{token}'")]
    UnknownPhase { token: String },

    /// A transition target that is not a current-vocabulary phase.
    #[error("'{token}' is not a selectable phase")]
    InvalidPhase { token: String },

    #[error("watering volume {volume_ml} ml out of range [{}, {}]", MIN_VOLUME_ML, MAX_VOLUME_ML)]
    InvalidVolume { volume_ml: i64 },

    #[error("invalid date '{value}'")]
    InvalidDate { value: String },

    #[error("creation date {requested} is after the next phase transition on {next}")]
    CreationDateAfterTransition { requested: Date, next: Date },

    #[error("transition date {requested} precedes the last transition on {last}")]
    TransitionBeforeLast { requested: Date, last: Date },

    #[error("invalid note: {reason}")]
    InvalidNote { reason: String },
}
