// Per-block processing cycle
//
// One `EpochProcessor` owns the whole detection pipeline of a session:
// sample buffer, trigger detector, extractor and rejection filter. The
// ingestion task feeds it blocks; every block runs one cycle of
// append -> scan -> extract -> screen -> queue -> trim.

use crate::buffer::SampleBuffer;
use crate::config::SessionPlan;
use crate::epoch::EpochExtractor;
use crate::events::TriggerDetector;
use crate::queue::EpochQueue;
use crate::reject::RejectionFilter;
use crate::source::SampleBlock;
use crate::types::StreamResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared between the ingestion task and stats readers
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub blocks_received: AtomicU64,
    pub samples_received: AtomicU64,
    pub events_detected: AtomicU64,
    pub epochs_extracted: AtomicU64,
    pub epochs_rejected: AtomicU64,
    pub epochs_queued: AtomicU64,
    pub underruns: AtomicU64,
}

/// What one processing cycle did
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleSummary {
    pub events_detected: usize,
    pub epochs_queued: usize,
    pub epochs_rejected: usize,
    pub underruns: usize,
    /// The accepted-epoch limit was reached during this cycle
    pub trial_limit_reached: bool,
}

pub struct EpochProcessor {
    plan: Arc<SessionPlan>,
    buffer: SampleBuffer,
    detector: TriggerDetector,
    extractor: EpochExtractor,
    filter: RejectionFilter,
    queue: Arc<EpochQueue>,
    counters: Arc<SessionCounters>,
    max_total_epochs: Option<usize>,
    /// Accepted epochs actually queued this session; dropped pushes do not
    /// advance the trial limit
    queued_total: usize,
}

impl EpochProcessor {
    pub fn new(
        plan: Arc<SessionPlan>,
        queue: Arc<EpochQueue>,
        counters: Arc<SessionCounters>,
        max_total_epochs: Option<usize>,
    ) -> Self {
        let allowed = plan.event_codes.keys().copied().collect();
        Self {
            buffer: SampleBuffer::new(plan.layout.len()),
            detector: TriggerDetector::new(
                plan.trigger_index,
                plan.trigger_match.clone(),
                allowed,
            ),
            extractor: EpochExtractor::new(plan.clone()),
            filter: RejectionFilter::new(plan.clone()),
            plan,
            queue,
            counters,
            max_total_epochs,
            queued_total: 0,
        }
    }

    /// Run one full cycle on an incoming block.
    ///
    /// An error return is structural (bad block shape, sequence gap) and
    /// terminates the session. Per-epoch failures like buffer underruns are
    /// logged, counted and skipped; the session keeps running.
    pub fn process_block(&mut self, block: SampleBlock) -> StreamResult<CycleSummary> {
        let n_samples = block.num_samples() as u64;
        self.buffer.append(block)?;
        self.counters.blocks_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .samples_received
            .fetch_add(n_samples, Ordering::Relaxed);

        let mut summary = CycleSummary::default();

        let events = self.detector.scan(&self.buffer)?;
        summary.events_detected = events.len();
        self.counters
            .events_detected
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        for event in events {
            self.extractor.enqueue(event);
        }

        for result in self.extractor.extract_ready(&self.buffer) {
            match result {
                Ok(mut epoch) => {
                    self.counters.epochs_extracted.fetch_add(1, Ordering::Relaxed);
                    self.filter.evaluate(&mut epoch);

                    if !epoch.is_accepted() {
                        summary.epochs_rejected += 1;
                        self.counters.epochs_rejected.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    match self.queue.push(epoch) {
                        Ok(()) => {
                            summary.epochs_queued += 1;
                            self.counters.epochs_queued.fetch_add(1, Ordering::Relaxed);
                            self.queued_total += 1;

                            if let Some(limit) = self.max_total_epochs {
                                if self.queued_total >= limit {
                                    log::info!("reached epoch limit of {}", limit);
                                    summary.trial_limit_reached = true;
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            // the queue already counted the drop
                            log::warn!("dropping accepted epoch: {}", e);
                        }
                    }
                }
                Err(e) => {
                    log::error!("epoch lost: {}", e);
                    summary.underruns += 1;
                    self.counters.underruns.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.buffer.trim(self.extractor.low_water(&self.buffer));

        Ok(summary)
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }
}
