use std::time::Duration;

use thiserror::Error;

/// The fetched document does not have the shape of a current-weather observation.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("malformed weather observation: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("weather observation has no weather conditions")]
    NoConditions,

    #[error("timestamp out of range: {epoch} + {offset}s")]
    TimestampOutOfRange { epoch: i64, offset: i64 },
}

/// Why an invocation failed. Every variant fails the run outright.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("weather API was not ready within {waited:?}")]
    Unavailable { waited: Duration },

    #[error("failed to fetch weather data: {0:#}")]
    Fetch(anyhow::Error),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("failed to encode CSV: {0}")]
    Encode(#[from] csv::Error),

    #[error("failed to write to sink: {0}")]
    Sink(#[from] object_store::Error),

    #[error("stage '{stage}' ran before any weather payload was fetched")]
    MissingPayload { stage: &'static str },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
