// TCP socket acquisition source
//
// Connects to a TCP server publishing the NDJSON session format: one
// `ChannelLayout` header line, then one `SampleBlock` per line.

use super::{AcquisitionSource, SampleBlock};
use crate::channels::ChannelLayout;
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub struct TcpSource {
    host: String,
    port: u16,
    reconnect: bool,
    is_connected: bool,
    layout: Option<ChannelLayout>,
    // Reader left over from connect(), consumed by the first start() pass so
    // blocks sent right after the header are not lost.
    reader: Option<BufReader<TcpStream>>,
}

impl TcpSource {
    pub fn new(host: String, port: u16, reconnect: bool) -> Self {
        Self {
            host,
            port,
            reconnect,
            is_connected: false,
            layout: None,
            reader: None,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn dial(&self) -> StreamResult<BufReader<TcpStream>> {
        let stream = TcpStream::connect(&self.addr())
            .await
            .map_err(|e| StreamError::Connection(format!("TCP connection failed: {}", e)))?;
        Ok(BufReader::new(stream))
    }

    /// Read and parse the layout header line from a fresh connection.
    async fn read_header(reader: &mut BufReader<TcpStream>) -> StreamResult<ChannelLayout> {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| StreamError::Connection(format!("TCP header read failed: {}", e)))?;
        if n == 0 {
            return Err(StreamError::Connection(
                "server closed before sending layout header".to_string(),
            ));
        }

        let parsed: ChannelLayout = serde_json::from_str(line.trim())
            .map_err(|e| StreamError::Parse(format!("invalid layout header: {}", e)))?;
        ChannelLayout::new(parsed.sample_rate, parsed.channels)
    }

    fn parse_line(&self, line: &str) -> StreamResult<SampleBlock> {
        serde_json::from_str(line).map_err(|e| StreamError::Parse(format!("invalid block: {}", e)))
    }
}

#[async_trait]
impl AcquisitionSource for TcpSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.is_connected {
            return Ok(());
        }

        log::info!("connecting to TCP source: {}", self.addr());

        let mut reader = self.dial().await?;
        let layout = Self::read_header(&mut reader).await?;
        log::info!(
            "TCP connected: {} channels @ {} Hz",
            layout.len(),
            layout.sample_rate
        );

        self.layout = Some(layout);
        self.reader = Some(reader);
        self.is_connected = true;
        Ok(())
    }

    fn layout(&self) -> StreamResult<ChannelLayout> {
        self.layout
            .clone()
            .ok_or_else(|| StreamError::Connection("source not connected".to_string()))
    }

    async fn start(&mut self, sender: mpsc::Sender<SampleBlock>) -> StreamResult<()> {
        loop {
            let mut reader = match self.reader.take() {
                Some(r) => r,
                None => {
                    // Reconnect path: dial fresh and consume the new header.
                    let mut r = match self.dial().await {
                        Ok(r) => r,
                        Err(e) => {
                            log::error!("TCP connection failed: {}", e);
                            if !self.reconnect {
                                return Err(e);
                            }
                            tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
                            continue;
                        }
                    };
                    match Self::read_header(&mut r).await {
                        Ok(layout) => {
                            if self.layout.as_ref() != Some(&layout) {
                                log::warn!("TCP server layout changed across reconnect");
                            }
                            self.is_connected = true;
                        }
                        Err(e) => {
                            log::error!("TCP header read failed: {}", e);
                            if !self.reconnect {
                                return Err(e);
                            }
                            tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
                            continue;
                        }
                    }
                    r
                }
            };

            log::info!("TCP stream started");

            let mut line = String::new();
            loop {
                line.clear();

                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        log::info!("TCP connection closed by server");
                        break;
                    }
                    Ok(_) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match self.parse_line(line.trim()) {
                            Ok(block) => {
                                if sender.send(block).await.is_err() {
                                    log::warn!("stream receiver closed");
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                log::error!("failed to parse TCP message: {}", e);
                                // keep reading
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("TCP read error: {}", e);
                        break;
                    }
                }
            }

            self.is_connected = false;

            if !self.reconnect {
                log::info!("TCP disconnected, reconnect disabled");
                return Ok(());
            }

            log::info!("TCP disconnected, reconnecting in 2 seconds...");
            tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
        }
    }

    async fn stop(&mut self) -> StreamResult<()> {
        log::info!("stopping TCP stream");
        self.is_connected = false;
        self.reader = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected
    }
}
