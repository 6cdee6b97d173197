// Epoch extraction
//
// Turns detected trigger events into fixed-length windows of the picked
// channels. Events wait in a FIFO until the buffer holds their full span;
// ready epochs are cut out, decimated and baseline-corrected in event order.

use crate::buffer::SampleBuffer;
use crate::config::SessionPlan;
use crate::events::TriggerEvent;
use crate::reject::RejectionReason;
use crate::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Lifecycle of an extracted epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EpochStatus {
    /// Cut out of the buffer, not yet screened
    Extracted,
    /// Passed all amplitude criteria
    Accepted,
    /// Failed an amplitude criterion
    Rejected { reason: RejectionReason },
}

/// One event-locked window of the picked channels.
///
/// The data is an independent copy: consumers own their epochs outright and
/// never observe later buffer trims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub event: TriggerEvent,
    /// Condition label from the event-code map
    pub label: String,
    /// Source channel index of each data row
    pub channels: Vec<usize>,
    /// Absolute index of the first (pre-decimation) sample of the window
    pub first_sample: u64,
    /// Picked channels by decimated sample
    pub data: Vec<Vec<f32>>,
    pub status: EpochStatus,
}

impl Epoch {
    pub fn num_channels(&self) -> usize {
        self.data.len()
    }

    pub fn num_samples(&self) -> usize {
        self.data.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn is_accepted(&self) -> bool {
        self.status == EpochStatus::Accepted
    }
}

/// Cuts ready epochs out of the sample buffer
#[derive(Debug)]
pub struct EpochExtractor {
    plan: Arc<SessionPlan>,
    /// Detected events not yet extracted, in sample order
    pending: VecDeque<TriggerEvent>,
}

impl EpochExtractor {
    pub fn new(plan: Arc<SessionPlan>) -> Self {
        Self {
            plan,
            pending: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, event: TriggerEvent) {
        self.pending.push_back(event);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Extract every pending epoch whose span is fully buffered.
    ///
    /// Pending events are ordered by sample index and share one window shape,
    /// so their spans end in the same order: the first event whose span still
    /// reaches past the write head stops the pass. An event whose span start
    /// was already trimmed (or precedes the session origin) yields a
    /// `BufferUnderrun` entry and is discarded; later events are unaffected.
    pub fn extract_ready(&mut self, buffer: &SampleBuffer) -> Vec<StreamResult<Epoch>> {
        let head = buffer.write_head() as i64;
        let oldest = buffer.oldest_retained();
        let mut out = Vec::new();

        while let Some(&event) = self.pending.front() {
            let span_start = event.sample as i64 + self.plan.start_off;
            let span_stop = event.sample as i64 + self.plan.stop_off;

            if span_stop > head {
                break;
            }
            self.pending.pop_front();

            if span_start < oldest as i64 {
                out.push(Err(StreamError::BufferUnderrun {
                    event_sample: event.sample,
                    code: event.code,
                    span_start,
                    oldest,
                }));
                continue;
            }

            out.push(self.cut(event, buffer, span_start as u64, span_stop as u64));
        }

        out
    }

    fn cut(
        &self,
        event: TriggerEvent,
        buffer: &SampleBuffer,
        span_start: u64,
        span_stop: u64,
    ) -> StreamResult<Epoch> {
        let mut data = buffer.read(span_start, span_stop, &self.plan.picks)?;

        if self.plan.decim > 1 {
            for row in &mut data {
                *row = row.iter().step_by(self.plan.decim).copied().collect();
            }
        }

        if let Some(indices) = &self.plan.baseline_decim_indices {
            for row in &mut data {
                let mean = indices.iter().map(|&k| row[k] as f64).sum::<f64>()
                    / indices.len() as f64;
                for v in row.iter_mut() {
                    *v = (*v as f64 - mean) as f32;
                }
            }
        }

        Ok(Epoch {
            event,
            label: self.plan.label_for(event.code),
            channels: self.plan.picks.clone(),
            first_sample: span_start,
            data,
            status: EpochStatus::Extracted,
        })
    }

    /// Retention low-water mark for the per-cycle trim: keep everything from
    /// the earliest pending span start, and always one pre-window of history
    /// behind the head for events detected on upcoming samples.
    pub fn low_water(&self, buffer: &SampleBuffer) -> u64 {
        let head_keep = buffer.write_head().saturating_sub(self.plan.pre_need());
        match self.pending.front() {
            Some(event) => {
                let span_start = (event.sample as i64 + self.plan.start_off).max(0) as u64;
                head_keep.min(span_start)
            }
            None => head_keep,
        }
    }
}
