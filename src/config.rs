// Session configuration and its resolved execution plan
//
// `SessionConfig` is the user-facing description of one acquisition session.
// It is validated fail-fast: structural checks run at controller construction,
// and `resolve()` binds the config to a concrete channel layout once the
// source is connected, producing an immutable `SessionPlan` that the pipeline
// components share.

use crate::channels::{ChannelLayout, ChannelPicks, ChannelSelector};
use crate::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How trigger-channel values are matched against event codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TriggerMatch {
    /// A sample matches when it equals one of the configured event codes
    Codes,
    /// The sample is AND-ed with the mask first; any nonzero masked value is
    /// an event and the masked value is the emitted code
    Mask { mask: u32 },
}

impl Default for TriggerMatch {
    fn default() -> Self {
        Self::Codes
    }
}

/// Trigger channel selection and matching mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub channel: ChannelSelector,
    #[serde(default)]
    pub match_mode: TriggerMatch,
}

/// Peak-to-peak amplitude limit for one channel kind, in SI units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectLimit {
    pub kind: crate::channels::ChannelKind,
    pub max_peak_to_peak: f64,
}

/// Configuration of one acquisition session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Event code to condition label, e.g. {1: "auditory/left"}. In Codes
    /// matching mode the keys double as the detection allow-list.
    pub event_codes: BTreeMap<i32, String>,

    /// Epoch window start relative to the event, in seconds (usually negative)
    pub tmin: f64,

    /// Epoch window end relative to the event, in seconds (exclusive)
    pub tmax: f64,

    /// Baseline interval (seconds relative to the event, inclusive endpoints
    /// on the sample grid). None disables baseline correction.
    #[serde(default)]
    pub baseline: Option<(f64, f64)>,

    /// Keep every decim-th sample of the window, counted from its first sample
    #[serde(default = "default_decim")]
    pub decim: usize,

    /// Amplitude criteria, evaluated in declaration order
    #[serde(default)]
    pub reject: Vec<RejectLimit>,

    /// Channels included in extracted epochs
    #[serde(default)]
    pub picks: ChannelPicks,

    pub trigger: TriggerConfig,

    /// Skip bad channels when picks are All or by kind
    #[serde(default = "default_true")]
    pub exclude_bads: bool,

    /// Capacity of the epoch queue
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,

    /// At capacity: evict the oldest queued epoch (true) or fail the push (false)
    #[serde(default = "default_true")]
    pub consume_on_read: bool,

    /// Stop the session automatically after this many accepted epochs
    #[serde(default)]
    pub max_total_epochs: Option<usize>,
}

fn default_decim() -> usize {
    1
}

fn default_max_queue_len() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_codes: BTreeMap::new(),
            tmin: -0.2,
            tmax: 0.5,
            baseline: None,
            decim: 1,
            reject: Vec::new(),
            picks: ChannelPicks::All,
            trigger: TriggerConfig {
                channel: ChannelSelector::Name("STI 014".to_string()),
                match_mode: TriggerMatch::Codes,
            },
            exclude_bads: true,
            max_queue_len: default_max_queue_len(),
            consume_on_read: true,
            max_total_epochs: None,
        }
    }
}

impl SessionConfig {
    /// Structural checks that need no channel layout. Run at controller
    /// construction so misconfiguration fails before any data flows.
    pub fn validate(&self) -> StreamResult<()> {
        if !(self.tmin.is_finite() && self.tmax.is_finite()) {
            return Err(StreamError::InvalidConfig(
                "tmin/tmax must be finite".to_string(),
            ));
        }
        if self.tmin >= self.tmax {
            return Err(StreamError::InvalidConfig(format!(
                "tmin ({}) must be less than tmax ({})",
                self.tmin, self.tmax
            )));
        }
        if self.decim == 0 {
            return Err(StreamError::InvalidConfig(
                "decim must be at least 1".to_string(),
            ));
        }
        if self.max_queue_len == 0 {
            return Err(StreamError::InvalidConfig(
                "max_queue_len must be at least 1".to_string(),
            ));
        }
        if self.max_total_epochs == Some(0) {
            return Err(StreamError::InvalidConfig(
                "max_total_epochs must be at least 1".to_string(),
            ));
        }

        match self.trigger.match_mode {
            TriggerMatch::Codes => {
                if self.event_codes.is_empty() {
                    return Err(StreamError::InvalidConfig(
                        "event_codes is empty; no trigger value could ever match".to_string(),
                    ));
                }
                if self.event_codes.keys().any(|&c| c == 0) {
                    return Err(StreamError::InvalidConfig(
                        "event code 0 is the baseline value and cannot be matched".to_string(),
                    ));
                }
            }
            TriggerMatch::Mask { mask } => {
                if mask == 0 {
                    return Err(StreamError::InvalidConfig(
                        "trigger mask must be nonzero".to_string(),
                    ));
                }
            }
        }

        if let Some((a, b)) = self.baseline {
            if !(a.is_finite() && b.is_finite()) {
                return Err(StreamError::InvalidConfig(
                    "baseline bounds must be finite".to_string(),
                ));
            }
            if a > b {
                return Err(StreamError::InvalidConfig(format!(
                    "baseline start ({}) is after baseline end ({})",
                    a, b
                )));
            }
            if a < self.tmin || b > self.tmax {
                return Err(StreamError::InvalidConfig(format!(
                    "baseline ({}, {}) lies outside the epoch window ({}, {})",
                    a, b, self.tmin, self.tmax
                )));
            }
        }

        for limit in &self.reject {
            if !(limit.max_peak_to_peak.is_finite() && limit.max_peak_to_peak > 0.0) {
                return Err(StreamError::InvalidConfig(format!(
                    "rejection limit for {} must be positive, got {}",
                    limit.kind, limit.max_peak_to_peak
                )));
            }
        }

        Ok(())
    }

    /// Bind the configuration to a source layout.
    pub fn resolve(&self, layout: &ChannelLayout) -> StreamResult<SessionPlan> {
        self.validate()?;

        let trigger_index = self.trigger.channel.resolve(layout)?;
        let picks = self.picks.resolve(layout, self.exclude_bads)?;

        let sf = layout.sample_rate as f64;
        let start_off = (self.tmin * sf).round() as i64;
        let stop_off = (self.tmax * sf).round() as i64;
        if start_off >= stop_off {
            return Err(StreamError::InvalidConfig(format!(
                "window ({}, {}) rounds to zero samples at {} Hz",
                self.tmin, self.tmax, layout.sample_rate
            )));
        }

        let span_len = (stop_off - start_off) as usize;
        let n_decimated = (span_len + self.decim - 1) / self.decim;

        // Which decimated samples fall inside the baseline interval. Fixed for
        // the whole session, so computed once here.
        let baseline_decim_indices = match self.baseline {
            None => None,
            Some((a, b)) => {
                let b0 = (a * sf).round() as i64;
                let b1 = (b * sf).round() as i64;
                let indices: Vec<usize> = (0..n_decimated)
                    .filter(|&k| {
                        let off = start_off + (k * self.decim) as i64;
                        b0 <= off && off <= b1
                    })
                    .collect();
                if indices.is_empty() {
                    return Err(StreamError::InvalidConfig(format!(
                        "baseline ({}, {}) contains no samples after decimation by {}",
                        a, b, self.decim
                    )));
                }
                Some(indices)
            }
        };

        Ok(SessionPlan {
            layout: layout.clone(),
            trigger_index,
            trigger_match: self.trigger.match_mode.clone(),
            event_codes: self.event_codes.clone(),
            picks,
            start_off,
            stop_off,
            decim: self.decim,
            baseline_decim_indices,
            reject: self.reject.clone(),
        })
    }
}

/// Immutable session plan shared by the pipeline components
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub layout: ChannelLayout,
    pub trigger_index: usize,
    pub trigger_match: TriggerMatch,
    pub event_codes: BTreeMap<i32, String>,
    pub picks: Vec<usize>,
    /// Window start offset relative to the event, in samples
    pub start_off: i64,
    /// Window end offset relative to the event, in samples (exclusive)
    pub stop_off: i64,
    pub decim: usize,
    /// Decimated sample positions whose pre-decimation offset falls inside
    /// the baseline interval
    pub baseline_decim_indices: Option<Vec<usize>>,
    pub reject: Vec<RejectLimit>,
}

impl SessionPlan {
    /// Samples of history that must stay behind the write head so that an
    /// event detected on the next sample can still be extracted.
    pub fn pre_need(&self) -> u64 {
        (-self.start_off).max(0) as u64
    }

    /// Window length in raw samples
    pub fn span_len(&self) -> usize {
        (self.stop_off - self.start_off) as usize
    }

    /// Window length after decimation
    pub fn n_decimated(&self) -> usize {
        (self.span_len() + self.decim - 1) / self.decim
    }

    /// Condition label for an event code; codes outside the map (possible
    /// with masked matching) get their numeric value as label.
    pub fn label_for(&self, code: i32) -> String {
        self.event_codes
            .get(&code)
            .cloned()
            .unwrap_or_else(|| code.to_string())
    }
}
