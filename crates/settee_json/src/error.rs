//! Error types for the JSON layer.

use thiserror::Error;

/// Result type for JSON operations.
pub type JsonResult<T> = Result<T, JsonError>;

/// Errors that can occur while encoding, decoding or reshaping JSON.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JsonError {
    /// Failed to encode a value to bytes.
    #[error("encoding failed: {message}")]
    Encode {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes into a value.
    #[error("decoding failed: {message}")]
    Decode {
        /// Description of the decoding error.
        message: String,
    },

    /// Well-formed JSON that does not have the shape the caller asked for.
    #[error("unexpected shape: expected {expected}")]
    UnexpectedShape {
        /// What the caller expected to find.
        expected: String,
    },
}

impl JsonError {
    /// Create an encoding error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a decoding error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an unexpected shape error.
    pub fn unexpected_shape(expected: impl Into<String>) -> Self {
        Self::UnexpectedShape {
            expected: expected.into(),
        }
    }
}
