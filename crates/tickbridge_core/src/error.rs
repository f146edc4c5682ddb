//! # Core Error Types
//!
//! Errors raised while interpreting message payloads.
//!
//! The relay itself never fails: appends and drains are infallible. Only the
//! downstream decoding step can reject a payload.

use thiserror::Error;

/// Errors that can occur while encoding or decoding a payload.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// The payload is not valid UTF-8 text.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The payload is not valid JSON for the expected shape.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for payload operations.
pub type PayloadResult<T> = Result<T, PayloadError>;
