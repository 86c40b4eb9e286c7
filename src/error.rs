//! Error types for the span-boundary scoring core.

use thiserror::Error;

/// Errors raised while constructing or running a boundary model.
///
/// Both kinds are fatal for the call that produced them: a bad parameter is
/// rejected at construction, and a shape mismatch aborts the whole batch
/// rather than truncating or padding to compensate.
#[derive(Debug, Error)]
pub enum BoundaryError {
    /// Invalid construction-time parameter.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the rejected parameter.
        message: String,
    },

    /// Mismatched dimensionality or manifest total at forward/backward time.
    #[error("shape mismatch in {what}: expected {expected}, actual {actual}")]
    Shape {
        /// Which input or dimension disagreed.
        what: &'static str,
        /// The size the component required.
        expected: usize,
        /// The size it was given.
        actual: usize,
    },
}

impl BoundaryError {
    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a Shape error.
    pub fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::Shape {
            what,
            expected,
            actual,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BoundaryError>;
