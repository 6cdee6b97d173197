// Channel metadata: kinds, layout, label classification, and pick resolution

use crate::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Standard 10-20 system electrode labels (case-insensitive matching).
const EEG_10_20_LABELS: &[&str] = &[
    // 10-20 standard
    "fp1", "fp2", "f3", "f4", "c3", "c4", "p3", "p4", "o1", "o2", "f7", "f8", "t3", "t4", "t5",
    "t6", "t7", "t8", "p7", "p8", "fz", "cz", "pz", "oz", // 10-10 extensions
    "af3", "af4", "af7", "af8", "afz", "f1", "f2", "f5", "f6", "f9", "f10", "fc1", "fc2", "fc3",
    "fc4", "fc5", "fc6", "fcz", "ft7", "ft8", "ft9", "ft10", "c1", "c2", "c5", "c6", "cp1", "cp2",
    "cp3", "cp4", "cp5", "cp6", "cpz", "tp7", "tp8", "tp9", "tp10", "p1", "p2", "p5", "p6", "p9",
    "p10", "po3", "po4", "po7", "po8", "poz", "o9", "o10", // 10-5 common additions
    "fpz", "nz", "iz", // Common reference labels
    "a1", "a2", "m1", "m2",
];

/// Kind of a recorded channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    #[serde(rename = "mag")]
    Magnetometer,
    #[serde(rename = "grad")]
    Gradiometer,
    #[serde(rename = "eeg")]
    Eeg,
    #[serde(rename = "eog")]
    Eog,
    #[serde(rename = "ecg")]
    Ecg,
    #[serde(rename = "stim")]
    Stim,
    #[serde(rename = "misc")]
    Misc,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelKind::Magnetometer => "mag",
            ChannelKind::Gradiometer => "grad",
            ChannelKind::Eeg => "eeg",
            ChannelKind::Eog => "eog",
            ChannelKind::Ecg => "ecg",
            ChannelKind::Stim => "stim",
            ChannelKind::Misc => "misc",
        };
        write!(f, "{}", s)
    }
}

impl ChannelKind {
    /// Classify a channel label into a kind.
    ///
    /// Priority order:
    /// 1. Type prefix strip (e.g., "EEG Fp1", "EOG Left")
    /// 2. Known pattern match (EOG, ECG, STIM, MEG)
    /// 3. 10-20 system electrode match
    /// 4. Fallback to Misc
    pub fn classify(label: &str) -> ChannelKind {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return ChannelKind::Misc;
        }

        let lower = trimmed.to_lowercase();

        if let Some(kind) = classify_by_prefix(&lower) {
            return kind;
        }

        if let Some(kind) = classify_by_pattern(&lower) {
            return kind;
        }

        if EEG_10_20_LABELS.contains(&lower.as_str()) {
            return ChannelKind::Eeg;
        }

        ChannelKind::Misc
    }

    /// Multiplier converting raw sample values into SI units for this kind.
    ///
    /// EEG/EOG channels are conventionally recorded in microvolts, ECG in
    /// millivolts, magnetometers in femtotesla and planar gradiometers in
    /// fT/cm. Trigger and misc channels are unscaled.
    pub fn default_unit_scale(&self) -> f32 {
        match self {
            ChannelKind::Magnetometer => 1e-15,
            ChannelKind::Gradiometer => 1e-13,
            ChannelKind::Eeg | ChannelKind::Eog => 1e-6,
            ChannelKind::Ecg => 1e-3,
            ChannelKind::Stim | ChannelKind::Misc => 1.0,
        }
    }
}

fn classify_by_prefix(lower: &str) -> Option<ChannelKind> {
    if let Some(rest) = lower.strip_prefix("meg ") {
        return Some(classify_meg_suffix(rest));
    }

    let prefixes: &[(&str, ChannelKind)] = &[
        ("eeg ", ChannelKind::Eeg),
        ("eog ", ChannelKind::Eog),
        ("ecg ", ChannelKind::Ecg),
        ("ekg ", ChannelKind::Ecg),
        ("stim ", ChannelKind::Stim),
        ("misc ", ChannelKind::Misc),
        ("ref ", ChannelKind::Eeg),
    ];

    for &(prefix, kind) in prefixes {
        if lower.starts_with(prefix) {
            return Some(kind);
        }
    }

    None
}

fn classify_by_pattern(lower: &str) -> Option<ChannelKind> {
    // EOG patterns
    if lower == "eog"
        || lower == "veog"
        || lower == "heog"
        || lower.starts_with("eog")
        || lower.ends_with("eog")
    {
        return Some(ChannelKind::Eog);
    }

    // ECG/EKG patterns
    if lower == "ecg" || lower == "ekg" || lower.starts_with("ecg") || lower.starts_with("ekg") {
        return Some(ChannelKind::Ecg);
    }

    // STIM / Status / Trigger patterns
    if lower == "stim"
        || lower == "status"
        || lower == "trigger"
        || lower.starts_with("sti ")
        || lower.starts_with("sti0")
        || lower.starts_with("stim")
        || lower.starts_with("trigger")
        || lower.starts_with("dc")
    {
        return Some(ChannelKind::Stim);
    }

    // MEG patterns (MEG0111, MEG 0111)
    if let Some(rest) = lower.strip_prefix("meg") {
        return Some(classify_meg_suffix(rest));
    }

    None
}

/// Vectorview numbering: the final digit of the coil number is 1 for
/// magnetometers and 2/3 for the two planar gradiometers at the same site.
fn classify_meg_suffix(rest: &str) -> ChannelKind {
    match rest.trim().chars().last() {
        Some('2') | Some('3') => ChannelKind::Gradiometer,
        _ => ChannelKind::Magnetometer,
    }
}

/// Immutable description of one recorded channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub name: String,
    pub kind: ChannelKind,
    /// Raw-unit to SI multiplier, applied when comparing against rejection
    /// thresholds. Stored sample values are never rescaled.
    #[serde(default = "default_unit_scale")]
    pub unit_scale: f32,
    /// Bad channels are skipped by amplitude rejection and excluded from
    /// kind-based picks.
    #[serde(default)]
    pub bad: bool,
}

fn default_unit_scale() -> f32 {
    1.0
}

impl ChannelDescriptor {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unit_scale: kind.default_unit_scale(),
            bad: false,
        }
    }

    /// Build a descriptor by classifying the label.
    pub fn from_label(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = ChannelKind::classify(&name);
        Self::new(name, kind)
    }

    pub fn mark_bad(mut self) -> Self {
        self.bad = true;
        self
    }

    pub fn with_unit_scale(mut self, unit_scale: f32) -> Self {
        self.unit_scale = unit_scale;
        self
    }
}

/// Channel layout of a source, fixed for the whole session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub sample_rate: f32,
    pub channels: Vec<ChannelDescriptor>,
}

impl ChannelLayout {
    pub fn new(sample_rate: f32, channels: Vec<ChannelDescriptor>) -> StreamResult<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(StreamError::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        if channels.is_empty() {
            return Err(StreamError::InvalidConfig(
                "layout has no channels".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for ch in &channels {
            if !seen.insert(ch.name.as_str()) {
                return Err(StreamError::InvalidConfig(format!(
                    "duplicate channel name '{}'",
                    ch.name
                )));
            }
        }

        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Build a layout from bare labels, classifying each one.
    pub fn from_labels(sample_rate: f32, labels: &[String]) -> StreamResult<Self> {
        let channels = labels
            .iter()
            .map(|l| ChannelDescriptor::from_label(l.clone()))
            .collect();
        Self::new(sample_rate, channels)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|ch| ch.name == name)
    }

    pub fn picks_of_kind(&self, kind: ChannelKind) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.kind == kind)
            .map(|(i, _)| i)
            .collect()
    }
}

/// A single channel referenced by position or by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSelector {
    Index(usize),
    Name(String),
}

impl ChannelSelector {
    pub fn resolve(&self, layout: &ChannelLayout) -> StreamResult<usize> {
        match self {
            ChannelSelector::Index(i) => {
                if *i < layout.len() {
                    Ok(*i)
                } else {
                    Err(StreamError::InvalidConfig(format!(
                        "channel index {} out of range ({} channels)",
                        i,
                        layout.len()
                    )))
                }
            }
            ChannelSelector::Name(name) => layout.index_of(name).ok_or_else(|| {
                StreamError::InvalidConfig(format!("unknown channel '{}'", name))
            }),
        }
    }
}

/// Which channels end up in extracted epochs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelPicks {
    /// Every non-trigger channel
    All,
    /// All channels of the listed kinds, in layout order
    Kinds(Vec<ChannelKind>),
    /// Explicitly named channels, in the given order
    Names(Vec<String>),
    /// Explicit channel indices, in the given order
    Indices(Vec<usize>),
}

impl Default for ChannelPicks {
    fn default() -> Self {
        Self::All
    }
}

impl ChannelPicks {
    /// Resolve to concrete channel indices against a layout.
    ///
    /// `All` and `Kinds` skip bad channels when `exclude_bads` is set;
    /// explicitly named or indexed channels are always included.
    pub fn resolve(&self, layout: &ChannelLayout, exclude_bads: bool) -> StreamResult<Vec<usize>> {
        let picks = match self {
            ChannelPicks::All => layout
                .channels
                .iter()
                .enumerate()
                .filter(|(_, ch)| ch.kind != ChannelKind::Stim && !(exclude_bads && ch.bad))
                .map(|(i, _)| i)
                .collect::<Vec<_>>(),

            ChannelPicks::Kinds(kinds) => layout
                .channels
                .iter()
                .enumerate()
                .filter(|(_, ch)| kinds.contains(&ch.kind) && !(exclude_bads && ch.bad))
                .map(|(i, _)| i)
                .collect(),

            ChannelPicks::Names(names) => {
                let mut picks = Vec::with_capacity(names.len());
                for name in names {
                    let idx = layout.index_of(name).ok_or_else(|| {
                        StreamError::InvalidConfig(format!("unknown channel '{}'", name))
                    })?;
                    picks.push(idx);
                }
                picks
            }

            ChannelPicks::Indices(indices) => {
                for &i in indices {
                    if i >= layout.len() {
                        return Err(StreamError::InvalidConfig(format!(
                            "channel index {} out of range ({} channels)",
                            i,
                            layout.len()
                        )));
                    }
                }
                indices.clone()
            }
        };

        if picks.is_empty() {
            return Err(StreamError::InvalidConfig(
                "picks resolve to no channels".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for &i in &picks {
            if !seen.insert(i) {
                return Err(StreamError::InvalidConfig(format!(
                    "channel {} picked more than once",
                    i
                )));
            }
        }

        Ok(picks)
    }
}
