//! Error types for the recorder
//!
//! Hooks never surface these to the traced program; they are returned from
//! session setup, sink delivery and session teardown.

use thiserror::Error;

/// Failure reported by the host while inspecting a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Property descriptor unreadable: {0}")]
    UnreadableProperty(String),

    #[error("Host error: {0}")]
    Other(String),
}

/// Failure delivering a batch to a sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink rejected batch {sequence}: {reason}")]
    Rejected { sequence: u64, reason: String },

    #[error("Sink already closed")]
    Closed,

    #[error("Delivery worker panicked")]
    WorkerPanicked,
}

/// Errors from recorder setup and teardown
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for recorder operations
pub type Result<T> = std::result::Result<T, TraceError>;
