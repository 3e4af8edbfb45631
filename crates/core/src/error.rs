// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for the KITT agent.
//!
//! Mirrors the shape of a typical layered `thiserror` error enum: one
//! variant per failure domain, each carrying a human-readable message.
//! All errors implement `Display` and can be converted to/from `String`
//! for call sites that just need to log or surface them.

use thiserror::Error;

/// Main error type for KITT agent operations.
#[derive(Debug, Error)]
pub enum KittError {
    /// Configuration or parameter validation error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Runtime processing error during normal operation.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A call to an STT, TTS or LLM provider failed (transient or fatal transport error).
    #[error("provider error: {0}")]
    Provider(String),

    /// A subscribed microphone track used a codec other than Opus.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// An Ogg/Opus packet could not be parsed (bad TOC, truncated segment, oversized frame).
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// I/O error (file operations, pipe reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled as part of a coordinated shutdown; never surfaced to users.
    #[error("cancelled")]
    Cancelled,
}

impl KittError {
    /// True for errors that represent a clean, user-invisible shutdown rather than a failure.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience alias for Results using `KittError`.
pub type Result<T> = std::result::Result<T, KittError>;

impl From<KittError> for String {
    fn from(err: KittError) -> Self {
        err.to_string()
    }
}

impl From<String> for KittError {
    fn from(s: String) -> Self {
        Self::Runtime(s)
    }
}

impl From<&str> for KittError {
    fn from(s: &str) -> Self {
        Self::Runtime(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_variant() {
        let err = KittError::Configuration("missing livekit.url".to_string());
        assert_eq!(err.to_string(), "configuration error: missing livekit.url");
    }

    #[test]
    fn cancellation_is_flagged() {
        assert!(KittError::Cancelled.is_cancellation());
        assert!(!KittError::Runtime("x".to_string()).is_cancellation());
    }

    #[test]
    fn string_roundtrip() {
        let err: KittError = "boom".into();
        assert_eq!(err.to_string(), "runtime error: boom");
        let s: String = err.into();
        assert_eq!(s, "runtime error: boom");
    }
}
