//! Error types shared by every stage of the colony workflow.

use std::convert::Infallible;

use thiserror::Error;

use crate::session::{ImageId, SessionId};

/// Rejection of caller-supplied input.
///
/// Raised synchronously before any work starts; a validation failure never
/// mutates stored state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// An integer or float parameter lies outside its allowed range.
    #[error("{field} = {value} is outside the allowed range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Adaptive thresholding needs a centered window.
    #[error("adaptive_block_size must be odd, got {0}")]
    EvenBlockSize(i32),

    #[error("min_area ({min_area}) must be smaller than max_area ({max_area})")]
    AreaOrder { min_area: f64, max_area: f64 },

    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },

    /// A colony coordinate pair or radius that cannot describe a point on a plate.
    #[error("malformed colony: {0}")]
    MalformedColony(String),

    #[error("malformed identifier: {0:?}")]
    MalformedId(String),
}

/// Errors returned by the colony core.
#[derive(Error, Debug)]
pub enum ColonyError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Image not found: {0}")]
    ImageNotFound(ImageId),

    /// Image bytes that the decoder could not read.
    ///
    /// Only the affected image fails; batch operations continue with the rest.
    #[error("Failed to decode {filename}: {source}")]
    Decode {
        filename: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The bounded detection queue has no free slot.
    #[error("Detection queue is full")]
    QueueFull,

    /// The worker pool has shut down or a worker dropped its reply.
    #[error("Detection workers are unavailable")]
    WorkerUnavailable,
}

impl From<Infallible> for ColonyError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// Result type for colony operations.
pub type ColonyResult<T> = Result<T, ColonyError>;
