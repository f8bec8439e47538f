//! Error types for the convolution algebra.

use thiserror::Error;

/// Everything the validation and rewrite paths can reject.
#[derive(Debug, Error)]
pub enum ConvError {
    /// A dimension-number argument is malformed: wrong length, missing or
    /// duplicated axis labels, inconsistent spatial sets.
    #[error("invalid dimension specification: {0}")]
    InvalidSpecification(String),

    /// Operand shapes are incompatible with each other or with the
    /// convolution parameters.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A parameter value is invalid independently of any shape.
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

pub type Result<T> = std::result::Result<T, ConvError>;
