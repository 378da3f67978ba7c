use thiserror::Error;

/// Startup-time configuration failure. Never recovered: the binary exits
/// before any request is served.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': {reason}")]
    Malformed {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key}={value} is out of range, expected {expected}")]
    OutOfRange {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("cannot read {key}: {reason}")]
    Unreadable { key: &'static str, reason: String },

    #[error("prompt template '{template}' has no {{prompt}} slot")]
    InvalidTemplate { template: String },
}

/// Failure of a single chat request. Contained by the chat engine.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("tokenization failed: {0}")]
    Encode(String),

    #[error("generation failed: {0}")]
    Generate(String),

    #[error("decoding failed: {0}")]
    Decode(String),

    #[error("tensor backend error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("model backend panicked: {0}")]
    Panicked(String),
}
