// Pluggable acquisition sources
//
// This module defines the `AcquisitionSource` trait which enables extension
// with new acquisition front-ends without modifying existing code. New
// sources can be added by:
// 1. Implementing the AcquisitionSource trait
// 2. Adding a variant to SourceConfig
// 3. Registering in the factory function
//
// Current implementations:
// - Tcp: live NDJSON feed over a TCP connection
// - NdjsonFile: file-based replay of a recorded session
// - Replay: in-memory array replay (not in SourceConfig; built directly,
//   mainly as a mock client for tests and offline runs)
//
// The wire format is newline-delimited JSON: one `ChannelLayout` header line,
// then one `SampleBlock` per line.

mod file;
mod replay;
mod tcp;

use crate::channels::ChannelLayout;
use crate::types::StreamResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use file::NdjsonFileSource;
pub use replay::ReplaySource;
pub use tcp::TcpSource;

/// A contiguous run of multi-channel samples.
///
/// Blocks from one source tile the session without gaps or overlap:
/// each block's `first_sample` equals the previous block's `end_sample`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleBlock {
    /// Absolute index of the first sample in this block
    pub first_sample: u64,

    /// Multi-channel samples: samples[channel_idx][sample_idx]
    pub samples: Vec<Vec<f32>>,

    /// Sample rate in Hz
    pub sample_rate: f32,
}

impl SampleBlock {
    /// Number of samples per channel in this block
    pub fn num_samples(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Index one past the last sample in this block
    pub fn end_sample(&self) -> u64 {
        self.first_sample + self.num_samples() as u64
    }

    /// Duration of this block in seconds
    pub fn duration_secs(&self) -> f64 {
        self.num_samples() as f64 / self.sample_rate as f64
    }
}

/// Configuration for the serializable source types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    /// TCP connection to a live acquisition server
    #[serde(rename = "tcp")]
    Tcp {
        host: String,
        port: u16,
        #[serde(default)]
        reconnect: bool,
    },

    /// Replay of a recorded NDJSON session file
    #[serde(rename = "file")]
    NdjsonFile {
        path: String,
        /// Delay between blocks in milliseconds (simulates real-time)
        #[serde(default)]
        rate_limit_ms: Option<u64>,
    },
}

/// Trait for all acquisition sources
///
/// Implementers provide a unified interface for connecting to an acquisition
/// front-end and streaming sample blocks through an async channel. Dropping
/// the receiving end, or `start` returning, ends the stream; the driver
/// treats a closed channel as end-of-stream, not as an error.
#[async_trait]
pub trait AcquisitionSource: Send + Sync {
    /// Establish the connection and learn the channel layout
    async fn connect(&mut self) -> StreamResult<()>;

    /// Channel layout of this source; available once connected
    fn layout(&self) -> StreamResult<ChannelLayout>;

    /// Stream sample blocks to the provided channel until end of data or stop
    async fn start(&mut self, sender: mpsc::Sender<SampleBlock>) -> StreamResult<()>;

    /// Stop streaming and release the connection
    async fn stop(&mut self) -> StreamResult<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;
}

/// Factory function to create an AcquisitionSource from configuration
pub fn create_source(config: SourceConfig) -> StreamResult<Box<dyn AcquisitionSource>> {
    match config {
        SourceConfig::Tcp {
            host,
            port,
            reconnect,
        } => Ok(Box::new(TcpSource::new(host, port, reconnect))),

        SourceConfig::NdjsonFile {
            path,
            rate_limit_ms,
        } => Ok(Box::new(NdjsonFileSource::new(path, rate_limit_ms))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_accessors() {
        let block = SampleBlock {
            first_sample: 100,
            samples: vec![vec![0.0; 50], vec![0.0; 50]],
            sample_rate: 250.0,
        };
        assert_eq!(block.num_channels(), 2);
        assert_eq!(block.num_samples(), 50);
        assert_eq!(block.end_sample(), 150);
        assert!((block.duration_secs() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_source_config_json() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"type": "tcp", "host": "127.0.0.1", "port": 5600}"#).unwrap();
        match config {
            SourceConfig::Tcp {
                host,
                port,
                reconnect,
            } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 5600);
                assert!(!reconnect);
            }
            other => panic!("expected tcp config, got {:?}", other),
        }

        let config: SourceConfig =
            serde_json::from_str(r#"{"type": "file", "path": "run.ndjson"}"#).unwrap();
        assert!(matches!(config, SourceConfig::NdjsonFile { .. }));
    }

    #[test]
    fn test_block_round_trips_as_json() {
        let block = SampleBlock {
            first_sample: 7,
            samples: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            sample_rate: 100.0,
        };
        let line = serde_json::to_string(&block).unwrap();
        let back: SampleBlock = serde_json::from_str(&line).unwrap();
        assert_eq!(back.first_sample, 7);
        assert_eq!(back.samples, block.samples);
    }
}
