// Peak-to-peak amplitude rejection
//
// Screens extracted epochs against per-kind amplitude limits. Limits are
// evaluated in their declaration order and the first violation wins, so a
// session that lists grad before eeg always reports grad when both would
// fail. Channels flagged bad never participate. The epoch data itself is
// left untouched; rejection only sets the status.

use crate::config::SessionPlan;
use crate::epoch::{Epoch, EpochStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why an epoch failed amplitude screening
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionReason {
    pub kind: crate::channels::ChannelKind,
    /// Name of the offending channel
    pub channel: String,
    /// Measured peak-to-peak amplitude, in SI units
    pub peak_to_peak: f64,
    /// The violated limit, in SI units
    pub limit: f64,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} peak-to-peak {:.3e} exceeds {:.3e} on channel {}",
            self.kind, self.peak_to_peak, self.limit, self.channel
        )
    }
}

/// Applies the session's amplitude criteria to extracted epochs
#[derive(Debug)]
pub struct RejectionFilter {
    plan: Arc<SessionPlan>,
}

impl RejectionFilter {
    pub fn new(plan: Arc<SessionPlan>) -> Self {
        Self { plan }
    }

    /// Screen one epoch, moving its status from Extracted to Accepted or
    /// Rejected. With no configured limits every epoch is accepted.
    pub fn evaluate(&self, epoch: &mut Epoch) {
        for limit in &self.plan.reject {
            for (row, &ch_idx) in epoch.data.iter().zip(&epoch.channels) {
                let desc = &self.plan.layout.channels[ch_idx];
                if desc.kind != limit.kind || desc.bad {
                    continue;
                }

                let ptp = peak_to_peak(row) * desc.unit_scale as f64;
                if ptp > limit.max_peak_to_peak {
                    let reason = RejectionReason {
                        kind: limit.kind,
                        channel: desc.name.clone(),
                        peak_to_peak: ptp,
                        limit: limit.max_peak_to_peak,
                    };
                    log::debug!(
                        "rejecting epoch at sample {}: {}",
                        epoch.event.sample,
                        reason
                    );
                    epoch.status = EpochStatus::Rejected { reason };
                    return;
                }
            }
        }

        epoch.status = EpochStatus::Accepted;
    }
}

fn peak_to_peak(row: &[f32]) -> f64 {
    let (lo, hi) = row
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if hi >= lo {
        (hi - lo) as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelDescriptor, ChannelKind, ChannelLayout};
    use crate::config::{RejectLimit, SessionConfig};
    use crate::events::TriggerEvent;

    fn eeg_layout() -> ChannelLayout {
        ChannelLayout::new(
            100.0,
            vec![
                ChannelDescriptor::new("Fp1", ChannelKind::Eeg).with_unit_scale(1e-6),
                ChannelDescriptor::new("Cz", ChannelKind::Eeg).with_unit_scale(1e-6),
                ChannelDescriptor::new("MEG 0112", ChannelKind::Gradiometer)
                    .with_unit_scale(1e-13),
                ChannelDescriptor::new("STI 014", ChannelKind::Stim),
            ],
        )
        .unwrap()
    }

    fn filter_with(reject: Vec<RejectLimit>) -> RejectionFilter {
        let config = SessionConfig {
            event_codes: [(5, "left".to_string())].into(),
            reject,
            ..Default::default()
        };
        RejectionFilter::new(Arc::new(config.resolve(&eeg_layout()).unwrap()))
    }

    fn eeg_limit(max_uv: f64) -> RejectLimit {
        RejectLimit {
            kind: ChannelKind::Eeg,
            max_peak_to_peak: max_uv * 1e-6,
        }
    }

    /// Epoch over the layout's non-stim channels with the given rows.
    fn epoch(rows: Vec<Vec<f32>>) -> Epoch {
        Epoch {
            event: TriggerEvent { sample: 100, code: 5 },
            label: "left".to_string(),
            channels: vec![0, 1, 2],
            first_sample: 98,
            data: rows,
            status: EpochStatus::Extracted,
        }
    }

    fn flat(n: usize) -> Vec<f32> {
        vec![0.0; n]
    }

    #[test]
    fn test_threshold_rejects_and_accepts() {
        let filter = filter_with(vec![eeg_limit(100.0)]);

        // 150 uV peak-to-peak on an EEG channel: rejected, citing that channel
        let mut over = epoch(vec![
            vec![-75.0, 0.0, 75.0],
            flat(3),
            flat(3),
        ]);
        filter.evaluate(&mut over);
        match &over.status {
            EpochStatus::Rejected { reason } => {
                assert_eq!(reason.kind, ChannelKind::Eeg);
                assert_eq!(reason.channel, "Fp1");
                assert!((reason.peak_to_peak - 150e-6).abs() < 1e-9);
                assert_eq!(reason.limit, 100e-6);
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        // 80 uV stays under the limit
        let mut under = epoch(vec![
            vec![-40.0, 0.0, 40.0],
            flat(3),
            flat(3),
        ]);
        filter.evaluate(&mut under);
        assert_eq!(under.status, EpochStatus::Accepted);
    }

    #[test]
    fn test_exactly_at_limit_is_accepted() {
        let filter = filter_with(vec![eeg_limit(100.0)]);
        let mut epoch = epoch(vec![vec![-50.0, 50.0], flat(2), flat(2)]);
        filter.evaluate(&mut epoch);
        assert_eq!(epoch.status, EpochStatus::Accepted);
    }

    #[test]
    fn test_first_declared_kind_wins() {
        // both the grad and eeg rows violate their limits; the declared
        // order decides which one is reported
        let grad_first = filter_with(vec![
            RejectLimit {
                kind: ChannelKind::Gradiometer,
                max_peak_to_peak: 4000e-13,
            },
            eeg_limit(100.0),
        ]);

        let mut ep = epoch(vec![
            vec![0.0, 200.0],
            flat(2),
            vec![0.0, 5000.0],
        ]);
        grad_first.evaluate(&mut ep);
        match &ep.status {
            EpochStatus::Rejected { reason } => {
                assert_eq!(reason.kind, ChannelKind::Gradiometer)
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        let eeg_first = filter_with(vec![
            eeg_limit(100.0),
            RejectLimit {
                kind: ChannelKind::Gradiometer,
                max_peak_to_peak: 4000e-13,
            },
        ]);
        let mut ep = epoch(vec![
            vec![0.0, 200.0],
            flat(2),
            vec![0.0, 5000.0],
        ]);
        eeg_first.evaluate(&mut ep);
        match &ep.status {
            EpochStatus::Rejected { reason } => assert_eq!(reason.kind, ChannelKind::Eeg),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_channels_skipped() {
        let layout = ChannelLayout::new(
            100.0,
            vec![
                ChannelDescriptor::new("Fp1", ChannelKind::Eeg)
                    .with_unit_scale(1e-6)
                    .mark_bad(),
                ChannelDescriptor::new("Cz", ChannelKind::Eeg).with_unit_scale(1e-6),
                ChannelDescriptor::new("STI 014", ChannelKind::Stim),
            ],
        )
        .unwrap();
        let config = SessionConfig {
            event_codes: [(5, "x".to_string())].into(),
            exclude_bads: false,
            reject: vec![eeg_limit(100.0)],
            ..Default::default()
        };
        let filter = RejectionFilter::new(Arc::new(config.resolve(&layout).unwrap()));

        // a wild bad channel does not reject the epoch
        let mut ep = Epoch {
            event: TriggerEvent { sample: 10, code: 5 },
            label: "x".to_string(),
            channels: vec![0, 1],
            first_sample: 8,
            data: vec![vec![0.0, 100000.0], vec![0.0, 10.0]],
            status: EpochStatus::Extracted,
        };
        filter.evaluate(&mut ep);
        assert_eq!(ep.status, EpochStatus::Accepted);
    }

    #[test]
    fn test_no_limits_accepts_everything() {
        let filter = filter_with(Vec::new());
        let mut ep = epoch(vec![vec![0.0, 1e9], flat(2), flat(2)]);
        filter.evaluate(&mut ep);
        assert_eq!(ep.status, EpochStatus::Accepted);
    }

    #[test]
    fn test_data_never_mutated() {
        let filter = filter_with(vec![eeg_limit(100.0)]);
        let rows = vec![vec![-75.0, 0.0, 75.0], flat(3), flat(3)];
        let mut ep = epoch(rows.clone());
        filter.evaluate(&mut ep);
        assert_eq!(ep.data, rows);
    }
}
