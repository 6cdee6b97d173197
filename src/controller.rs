// Acquisition controller - orchestrates one epoching session
//
// The controller manages:
// - Source lifecycle (connect, start, stop)
// - Binding the session configuration to the source layout
// - The producer task that drives the source
// - The ingestion task that runs the per-block processing cycle
// - Session state and statistics
// - Task cancellation via CancellationToken for graceful shutdown
//
// Sessions are one-shot: a stopped controller cannot be restarted. The
// ingestion task is the only writer of the terminal state, so the stop
// reason is always recorded before the epoch queue closes.

use crate::config::SessionConfig;
use crate::processor::{EpochProcessor, SessionCounters};
use crate::queue::EpochQueue;
use crate::source::{create_source, AcquisitionSource, SampleBlock, SourceConfig};
use crate::types::{SessionStats, StopReason, StreamError, StreamResult, StreamState};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::RwLock as TokioRwLock;
use tokio_util::sync::CancellationToken;

pub struct AcquisitionController {
    pub id: String,
    config: SessionConfig,

    source: Arc<TokioRwLock<Box<dyn AcquisitionSource>>>,
    queue: Arc<EpochQueue>,

    state: Arc<RwLock<StreamState>>,
    is_running: Arc<AtomicBool>,
    cancel_token: CancellationToken,

    counters: Arc<SessionCounters>,
    start_time: Arc<RwLock<Option<Instant>>>,
}

impl AcquisitionController {
    /// Create a controller for the given session and source configuration.
    /// The configuration is checked here so misconfiguration fails before
    /// any connection is made.
    pub fn new(config: SessionConfig, source_config: SourceConfig) -> StreamResult<Self> {
        let source = create_source(source_config)?;
        Self::with_source(config, source)
    }

    /// Create a controller around an already built source, e.g. a replay
    /// source carrying in-memory test data.
    pub fn with_source(
        config: SessionConfig,
        source: Box<dyn AcquisitionSource>,
    ) -> StreamResult<Self> {
        config.validate()?;

        let queue = Arc::new(EpochQueue::new(
            config.max_queue_len,
            config.consume_on_read,
        ));

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            source: Arc::new(TokioRwLock::new(source)),
            queue,
            state: Arc::new(RwLock::new(StreamState::Idle)),
            is_running: Arc::new(AtomicBool::new(false)),
            cancel_token: CancellationToken::new(),
            counters: Arc::new(SessionCounters::default()),
            start_time: Arc::new(RwLock::new(None)),
        })
    }

    /// Start the acquisition session.
    ///
    /// Connects the source, binds the configuration to its layout and spawns
    /// the producer and ingestion tasks. Only an Idle session can start; a
    /// stopped one cannot be reused.
    pub async fn start(&mut self) -> StreamResult<()> {
        {
            let state = self.state.read();
            if !matches!(*state, StreamState::Idle) {
                return Err(StreamError::InvalidState {
                    operation: "start",
                    state: format!("{:?}", *state),
                });
            }
        }

        log::info!("starting acquisition session: {}", self.id);

        {
            let mut source = self.source.write().await;
            source.connect().await?;
        }

        let layout = {
            let source = self.source.read().await;
            source.layout()?
        };

        log::info!(
            "source layout: {} channels @ {} Hz",
            layout.len(),
            layout.sample_rate
        );

        let plan = Arc::new(self.config.resolve(&layout)?);
        let mut processor = EpochProcessor::new(
            plan,
            Arc::clone(&self.queue),
            Arc::clone(&self.counters),
            self.config.max_total_epochs,
        );

        let (tx, mut rx) = mpsc::channel::<SampleBlock>(64);

        // Running must be visible before the ingestion task can overwrite it
        // with the terminal state.
        self.is_running.store(true, Ordering::Relaxed);
        *self.start_time.write() = Some(Instant::now());
        *self.state.write() = StreamState::Running {
            started_at: chrono::Utc::now().timestamp() as f64,
        };

        // Producer: drives the source until it finishes or the session is
        // cancelled. Holds the source write lock for the whole session.
        let source = Arc::clone(&self.source);
        let cancel_source = self.cancel_token.clone();
        tokio::spawn(async move {
            let mut source = source.write().await;
            tokio::select! {
                result = source.start(tx) => {
                    if let Err(e) = result {
                        log::error!("source streaming error: {}", e);
                    }
                }
                _ = cancel_source.cancelled() => {
                    log::info!("source streaming cancelled");
                }
            }
        });

        // Ingestion: runs the processing cycle per block and records why the
        // session ended. State is written before the queue closes, so a
        // consumer woken by the close already sees the terminal state.
        let state = Arc::clone(&self.state);
        let is_running = Arc::clone(&self.is_running);
        let queue = Arc::clone(&self.queue);
        let cancel = self.cancel_token.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        log::info!("ingestion cancelled");
                        break StopReason::Requested;
                    }

                    block = rx.recv() => {
                        match block {
                            Some(block) => match processor.process_block(block) {
                                Ok(summary) => {
                                    if summary.trial_limit_reached {
                                        break StopReason::TrialLimit;
                                    }
                                }
                                Err(e) => {
                                    log::error!("session failed: {}", e);
                                    break StopReason::Failed;
                                }
                            },
                            None => {
                                log::info!("source channel closed");
                                break StopReason::EndOfStream;
                            }
                        }
                    }
                }
            };

            *state.write() = StreamState::Stopped { reason };
            is_running.store(false, Ordering::Relaxed);
            queue.close();
            cancel.cancel();
            log::info!("session {} stopped: {:?}", id, reason);
        });

        log::info!("acquisition session started");

        Ok(())
    }

    /// Stop the acquisition session.
    ///
    /// Returns once the source is stopped; the terminal state is recorded by
    /// the ingestion task and may settle shortly after this call.
    pub async fn stop(&mut self) -> StreamResult<()> {
        if !self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        log::info!("stopping acquisition session: {}", self.id);

        // Cancel before locking: the producer task holds the source write
        // lock until it observes the cancellation.
        self.cancel_token.cancel();

        {
            let mut source = self.source.write().await;
            source.stop().await?;
        }

        Ok(())
    }

    /// Cancellation token for external shutdown coordination
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// The queue the session pushes accepted epochs into
    pub fn queue(&self) -> Arc<EpochQueue> {
        Arc::clone(&self.queue)
    }

    pub fn state(&self) -> StreamState {
        self.state.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Snapshot of the session counters and queue metrics
    pub fn stats(&self) -> SessionStats {
        let queue_metrics = self.queue.metrics();
        let uptime_seconds = self
            .start_time
            .read()
            .as_ref()
            .map(|t| t.elapsed().as_secs_f64());

        SessionStats {
            blocks_received: self.counters.blocks_received.load(Ordering::Relaxed),
            samples_received: self.counters.samples_received.load(Ordering::Relaxed),
            events_detected: self.counters.events_detected.load(Ordering::Relaxed),
            epochs_extracted: self.counters.epochs_extracted.load(Ordering::Relaxed),
            epochs_rejected: self.counters.epochs_rejected.load(Ordering::Relaxed),
            epochs_queued: self.counters.epochs_queued.load(Ordering::Relaxed),
            epochs_dropped: queue_metrics.total_dropped,
            epochs_evicted: queue_metrics.total_evicted,
            underruns: self.counters.underruns.load(Ordering::Relaxed),
            queue_len: queue_metrics.current_len,
            uptime_seconds,
        }
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        // Cancelling shuts down both session tasks.
        self.cancel_token.cancel();
        log::debug!("AcquisitionController {} dropped", self.id);
    }
}
