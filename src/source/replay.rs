// In-memory replay source
//
// Slices a fully resident recording into fixed-size blocks and plays it
// through the source interface, optionally paced to simulate real-time.
// Doubles as the mock client for tests and for feeding the pipeline from
// arrays decoded elsewhere.

use super::{AcquisitionSource, SampleBlock};
use crate::channels::ChannelLayout;
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

pub struct ReplaySource {
    layout: ChannelLayout,
    /// Full recording: data[channel_idx][sample_idx]
    data: Vec<Vec<f32>>,
    chunk_size: usize,
    first_sample: u64,
    rate_limit_ms: Option<u64>,
    position: usize,
    is_connected: bool,
}

impl ReplaySource {
    pub fn new(layout: ChannelLayout, data: Vec<Vec<f32>>, chunk_size: usize) -> Self {
        Self {
            layout,
            data,
            chunk_size,
            first_sample: 0,
            rate_limit_ms: None,
            position: 0,
            is_connected: false,
        }
    }

    /// Replay as if the recording started at this absolute sample index
    pub fn with_first_sample(mut self, first_sample: u64) -> Self {
        self.first_sample = first_sample;
        self
    }

    /// Delay between blocks in milliseconds (simulates real-time)
    pub fn with_rate_limit_ms(mut self, rate_limit_ms: u64) -> Self {
        self.rate_limit_ms = Some(rate_limit_ms);
        self
    }

    fn num_samples(&self) -> usize {
        self.data.first().map(|ch| ch.len()).unwrap_or(0)
    }

    fn next_block(&mut self) -> Option<SampleBlock> {
        let total = self.num_samples();
        if self.position >= total {
            return None;
        }

        let end = (self.position + self.chunk_size).min(total);
        let block = SampleBlock {
            first_sample: self.first_sample + self.position as u64,
            samples: self
                .data
                .iter()
                .map(|ch| ch[self.position..end].to_vec())
                .collect(),
            sample_rate: self.layout.sample_rate,
        };
        self.position = end;
        Some(block)
    }
}

#[async_trait]
impl AcquisitionSource for ReplaySource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.chunk_size == 0 {
            return Err(StreamError::InvalidConfig(
                "replay chunk_size must be at least 1".to_string(),
            ));
        }
        if self.data.len() != self.layout.len() {
            return Err(StreamError::InvalidConfig(format!(
                "replay data has {} channels, layout has {}",
                self.data.len(),
                self.layout.len()
            )));
        }
        let n = self.num_samples();
        if self.data.iter().any(|ch| ch.len() != n) {
            return Err(StreamError::InvalidConfig(
                "replay data channels have unequal lengths".to_string(),
            ));
        }

        self.position = 0;
        self.is_connected = true;
        log::info!(
            "replay source ready: {} channels, {} samples @ {} Hz",
            self.layout.len(),
            n,
            self.layout.sample_rate
        );
        Ok(())
    }

    fn layout(&self) -> StreamResult<ChannelLayout> {
        if !self.is_connected {
            return Err(StreamError::Connection("source not connected".to_string()));
        }
        Ok(self.layout.clone())
    }

    async fn start(&mut self, sender: mpsc::Sender<SampleBlock>) -> StreamResult<()> {
        if !self.is_connected {
            self.connect().await?;
        }

        while let Some(block) = self.next_block() {
            if sender.send(block).await.is_err() {
                log::warn!("replay receiver closed, stopping playback");
                return Ok(());
            }
            if let Some(delay_ms) = self.rate_limit_ms {
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        log::info!("replay finished");
        Ok(())
    }

    async fn stop(&mut self) -> StreamResult<()> {
        self.is_connected = false;
        self.position = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected
    }
}
