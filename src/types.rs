// Common types for the acquisition pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for acquisition operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur during an acquisition session
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("samples [{start}, {stop}) unavailable ({direction}): buffer holds [{oldest}, {newest})")]
    RangeUnavailable {
        start: u64,
        stop: u64,
        oldest: u64,
        newest: u64,
        direction: RangeDirection,
    },

    #[error("non-monotonic block: expected first sample {expected}, got {got}")]
    NonMonotonicBlock { expected: u64, got: u64 },

    #[error("malformed block: {0}")]
    BlockShape(String),

    #[error(
        "buffer underrun for event at sample {event_sample} (code {code}): \
         window starts at {span_start} but oldest retained sample is {oldest}"
    )]
    BufferUnderrun {
        event_sample: u64,
        code: i32,
        span_start: i64,
        oldest: u64,
    },

    #[error("epoch queue full ({capacity} epochs)")]
    QueueFull { capacity: usize },

    #[error("epoch queue empty")]
    QueueEmpty,

    #[error("invalid operation '{operation}' in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed")]
    ChannelClosed,
}

/// Which side of the retained range a failed read fell on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeDirection {
    /// Requested samples were already trimmed
    Past,
    /// Requested samples have not arrived yet
    Future,
}

impl std::fmt::Display for RangeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeDirection::Past => write!(f, "already trimmed"),
            RangeDirection::Future => write!(f, "not yet received"),
        }
    }
}

/// Why a session left the Running state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// stop() was called
    Requested,
    /// The source closed its channel
    EndOfStream,
    /// The configured number of accepted epochs was reached
    TrialLimit,
    /// A structural error terminated ingestion
    Failed,
}

/// Current state of an acquisition session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum StreamState {
    /// Session created, not yet started
    Idle,

    /// Session is ingesting data
    Running { started_at: f64 },

    /// Session has terminated; a stopped session cannot be restarted
    Stopped { reason: StopReason },
}

impl Default for StreamState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Statistics about an acquisition session
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionStats {
    pub blocks_received: u64,
    pub samples_received: u64,
    pub events_detected: u64,
    pub epochs_extracted: u64,
    pub epochs_rejected: u64,
    pub epochs_queued: u64,
    pub epochs_dropped: u64,
    pub epochs_evicted: u64,
    pub underruns: u64,
    pub queue_len: usize,
    pub uptime_seconds: Option<f64>,
}
