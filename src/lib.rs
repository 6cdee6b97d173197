// Real-time epoch extraction from streaming EEG/MEG acquisition
//
// This crate turns a continuous multi-channel sample stream into
// event-locked epochs: trigger transitions are detected on a stimulus
// channel, a fixed window around each event is cut out of a retained sample
// history, optionally decimated and baseline-corrected, screened against
// peak-to-peak amplitude limits, and handed to consumers through a bounded
// queue.
//
// Architecture:
// - `source`: Trait-based system for pluggable acquisition sources (TCP, file replay, in-memory)
// - `buffer`: Absolute-indexed sample history with per-cycle retention trimming
// - `events`: Chunking-invariant trigger edge detection
// - `epoch`: Window extraction, decimation and baseline correction
// - `reject`: Peak-to-peak amplitude screening
// - `queue`: Bounded epoch queue with async consumer wakeups
// - `controller`: Session lifecycle management and coordination

pub mod buffer;
pub mod channels;
pub mod config;
pub mod controller;
pub mod epoch;
pub mod events;
pub mod processor;
pub mod queue;
pub mod reject;
pub mod source;
pub mod types;

pub use buffer::SampleBuffer;
pub use channels::{
    ChannelDescriptor, ChannelKind, ChannelLayout, ChannelPicks, ChannelSelector,
};
pub use config::{RejectLimit, SessionConfig, SessionPlan, TriggerConfig, TriggerMatch};
pub use controller::AcquisitionController;
pub use epoch::{Epoch, EpochExtractor, EpochStatus};
pub use events::{TriggerDetector, TriggerEvent};
pub use processor::{CycleSummary, EpochProcessor, SessionCounters};
pub use queue::{EpochQueue, QueueMetrics};
pub use reject::{RejectionFilter, RejectionReason};
pub use source::{
    create_source, AcquisitionSource, NdjsonFileSource, ReplaySource, SampleBlock, SourceConfig,
    TcpSource,
};
pub use types::{RangeDirection, SessionStats, StopReason, StreamError, StreamResult, StreamState};
