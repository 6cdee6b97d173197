// Trigger-channel event detection
//
// Scans newly arrived samples of the trigger channel for transitions into a
// matching nonzero code. Detection state (scan cursor and the last effective
// value) survives across blocks, so chunk boundaries never split or duplicate
// an event: a plateau spanning two blocks emits once, at its first sample.

use crate::buffer::SampleBuffer;
use crate::config::TriggerMatch;
use crate::types::StreamResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One detected trigger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Absolute sample index of the transition
    pub sample: u64,
    /// Matched event code (the masked value in mask mode)
    pub code: i32,
}

/// Edge detector over the trigger channel
#[derive(Debug)]
pub struct TriggerDetector {
    channel: usize,
    match_mode: TriggerMatch,
    /// Allow-list for Codes matching
    allowed: BTreeSet<i32>,
    /// All samples below this index have been scanned
    scanned_to: u64,
    /// Effective value of the last scanned sample; session start counts as
    /// baseline, so a matching nonzero first sample is an event
    last_effective: i32,
}

impl TriggerDetector {
    pub fn new(channel: usize, match_mode: TriggerMatch, allowed: BTreeSet<i32>) -> Self {
        Self {
            channel,
            match_mode,
            allowed,
            scanned_to: 0,
            last_effective: 0,
        }
    }

    /// Index below which every sample has been scanned
    pub fn cursor(&self) -> u64 {
        self.scanned_to
    }

    /// The comparison value for debouncing: raw in Codes mode, masked in
    /// Mask mode (so flickering bits outside the mask are not transitions).
    fn effective(&self, raw: i32) -> i32 {
        match self.match_mode {
            TriggerMatch::Codes => raw,
            TriggerMatch::Mask { mask } => ((raw as u32) & mask) as i32,
        }
    }

    fn matches(&self, effective: i32) -> bool {
        if effective == 0 {
            return false;
        }
        match self.match_mode {
            TriggerMatch::Codes => self.allowed.contains(&effective),
            TriggerMatch::Mask { .. } => true,
        }
    }

    /// Scan all samples between the cursor and the write head, emitting an
    /// event at every transition into a matching nonzero value. A transition
    /// between two different nonzero codes emits immediately; no return to
    /// baseline is required. Each sample is scanned exactly once.
    pub fn scan(&mut self, buffer: &SampleBuffer) -> StreamResult<Vec<TriggerEvent>> {
        let head = buffer.write_head();
        let start = self.scanned_to.max(buffer.oldest_retained());
        if start >= head {
            return Ok(Vec::new());
        }

        let raw = buffer.read_channel(self.channel, start, head)?;
        let mut events = Vec::new();

        for (i, &v) in raw.iter().enumerate() {
            let effective = self.effective(v.round() as i32);
            if effective != self.last_effective {
                if self.matches(effective) {
                    let sample = start + i as u64;
                    log::debug!("trigger event: code {} at sample {}", effective, sample);
                    events.push(TriggerEvent {
                        sample,
                        code: effective,
                    });
                }
                self.last_effective = effective;
            }
        }

        self.scanned_to = head;
        Ok(events)
    }
}
