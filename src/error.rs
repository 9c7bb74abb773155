//! Error types shared by the registration and fusion stages.

use crate::model::ModelKind;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while registering or fusing views.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A model was asked to fit fewer matches than it needs.
    #[error("not enough matches for a {model} model: found {found}, need {required}")]
    InsufficientData {
        model: ModelKind,
        found: usize,
        required: usize,
    },

    /// The matches are degenerate for the requested model (colinear, coplanar, zero weight).
    #[error("ill-conditioned {model} fit: {reason}")]
    IllConditioned {
        model: ModelKind,
        reason: &'static str,
    },

    /// A transform could not be inverted.
    #[error("transform is not invertible")]
    NonInvertible,

    /// A weighting layer could not obtain the memory it needs.
    #[error("weight layer `{layer}` exhausted resources: {reason}")]
    ResourceExhaustion { layer: String, reason: String },

    /// An output buffer could not be allocated.
    #[error("failed to allocate {bytes} bytes for {what}")]
    Allocation { what: String, bytes: usize },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
