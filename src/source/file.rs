// File-based replay of a recorded NDJSON session
//
// The file holds one JSON `ChannelLayout` header line followed by one JSON
// `SampleBlock` per line, the same format the TCP source speaks. Useful for:
// - Testing the pipeline without external hardware
// - Replaying recorded sessions
// - Demo and development

use super::{AcquisitionSource, SampleBlock};
use crate::channels::ChannelLayout;
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

pub struct NdjsonFileSource {
    path: PathBuf,
    rate_limit_ms: Option<u64>,
    layout: Option<ChannelLayout>,
    is_connected: bool,
}

impl NdjsonFileSource {
    pub fn new(path: impl Into<PathBuf>, rate_limit_ms: Option<u64>) -> Self {
        Self {
            path: path.into(),
            rate_limit_ms,
            layout: None,
            is_connected: false,
        }
    }
}

/// Parse and re-validate a layout header line.
fn parse_layout(line: &str) -> StreamResult<ChannelLayout> {
    let parsed: ChannelLayout = serde_json::from_str(line)
        .map_err(|e| StreamError::Parse(format!("invalid layout header: {}", e)))?;
    ChannelLayout::new(parsed.sample_rate, parsed.channels)
}

fn parse_block(line: &str) -> StreamResult<SampleBlock> {
    serde_json::from_str(line).map_err(|e| StreamError::Parse(format!("invalid block: {}", e)))
}

#[async_trait]
impl AcquisitionSource for NdjsonFileSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.is_connected {
            return Ok(());
        }

        let file = File::open(&self.path).await?;
        let mut reader = BufReader::new(file);
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        if n == 0 {
            return Err(StreamError::Parse(format!(
                "{}: file is empty, expected a layout header line",
                self.path.display()
            )));
        }

        let layout = parse_layout(header.trim())?;
        log::info!(
            "connected to file replay: {} ({} channels @ {} Hz)",
            self.path.display(),
            layout.len(),
            layout.sample_rate
        );

        self.layout = Some(layout);
        self.is_connected = true;
        Ok(())
    }

    fn layout(&self) -> StreamResult<ChannelLayout> {
        self.layout
            .clone()
            .ok_or_else(|| StreamError::Connection("source not connected".to_string()))
    }

    async fn start(&mut self, sender: mpsc::Sender<SampleBlock>) -> StreamResult<()> {
        if !self.is_connected {
            self.connect().await?;
        }

        log::info!("starting file replay");

        let file = File::open(&self.path).await?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();

        // skip the layout header
        reader.read_line(&mut line).await?;

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                log::info!("file replay reached EOF");
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }

            match parse_block(line.trim()) {
                Ok(block) => {
                    if sender.send(block).await.is_err() {
                        log::warn!("replay receiver closed, stopping file replay");
                        return Ok(());
                    }
                }
                Err(e) => {
                    log::error!("skipping malformed block line: {}", e);
                    continue;
                }
            }

            if let Some(delay_ms) = self.rate_limit_ms {
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }

    async fn stop(&mut self) -> StreamResult<()> {
        log::info!("stopping file replay");
        self.is_connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelDescriptor;
    use std::io::Write;

    fn write_session(blocks: usize) -> tempfile::NamedTempFile {
        let layout = ChannelLayout::new(
            100.0,
            vec![
                ChannelDescriptor::from_label("Fp1"),
                ChannelDescriptor::from_label("STI 014"),
            ],
        )
        .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", serde_json::to_string(&layout).unwrap()).unwrap();
        for i in 0..blocks {
            let block = SampleBlock {
                first_sample: (i * 4) as u64,
                samples: vec![vec![0.5; 4], vec![0.0; 4]],
                sample_rate: 100.0,
            };
            writeln!(file, "{}", serde_json::to_string(&block).unwrap()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_header_then_blocks() {
        let file = write_session(3);
        let mut source = NdjsonFileSource::new(file.path(), None);
        source.connect().await.unwrap();

        let layout = source.layout().unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.sample_rate, 100.0);

        let (tx, mut rx) = mpsc::channel(8);
        source.start(tx).await.unwrap();

        let mut blocks = Vec::new();
        while let Some(block) = rx.recv().await {
            blocks.push(block);
        }
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].first_sample, 8);
    }

    #[tokio::test]
    async fn test_empty_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut source = NdjsonFileSource::new(file.path(), None);
        assert!(matches!(
            source.connect().await,
            Err(StreamError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_block_is_skipped() {
        let file = write_session(1);
        {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(file.path())
                .unwrap();
            writeln!(f, "not json").unwrap();
            writeln!(
                f,
                "{}",
                serde_json::to_string(&SampleBlock {
                    first_sample: 4,
                    samples: vec![vec![0.0; 4], vec![0.0; 4]],
                    sample_rate: 100.0,
                })
                .unwrap()
            )
            .unwrap();
        }

        let mut source = NdjsonFileSource::new(file.path(), None);
        source.connect().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        source.start(tx).await.unwrap();

        let mut blocks = Vec::new();
        while let Some(block) = rx.recv().await {
            blocks.push(block);
        }
        assert_eq!(blocks.len(), 2);
    }
}
