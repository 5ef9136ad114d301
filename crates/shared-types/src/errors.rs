//! # Error Types
//!
//! Errors raised while parsing shared identifiers.

use thiserror::Error;

/// Errors that can occur when decoding shared identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SharedTypesError {
    /// Input was not valid hexadecimal.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded byte length does not match the identifier width.
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected width in bytes.
        expected: usize,
        /// Actual decoded width.
        actual: usize,
    },
}
