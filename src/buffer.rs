// Indexed multi-channel sample history
//
// Holds the most recent stretch of the incoming signal, addressed by absolute
// sample index from the session origin. Blocks append at the write head,
// epoch extraction reads arbitrary retained spans, and the per-cycle trim
// drops history below the retention low-water mark.

use crate::source::SampleBlock;
use crate::types::{RangeDirection, StreamError, StreamResult};
use std::collections::VecDeque;

/// Ring of retained samples per channel with absolute-index bookkeeping
#[derive(Debug)]
pub struct SampleBuffer {
    channels: Vec<VecDeque<f32>>,
    /// Absolute index of the front sample
    oldest: u64,
    /// Absolute index one past the newest sample (the write head)
    next: u64,
    /// Origin becomes fixed by the first appended block
    primed: bool,
}

impl SampleBuffer {
    pub fn new(n_channels: usize) -> Self {
        Self {
            channels: (0..n_channels).map(|_| VecDeque::new()).collect(),
            oldest: 0,
            next: 0,
            primed: false,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Absolute index of the oldest retained sample
    pub fn oldest_retained(&self) -> u64 {
        self.oldest
    }

    /// Absolute index one past the newest retained sample
    pub fn write_head(&self) -> u64 {
        self.next
    }

    /// Retained samples per channel
    pub fn len(&self) -> usize {
        (self.next - self.oldest) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next == self.oldest
    }

    /// Append one block at the write head.
    ///
    /// The first block fixes the session origin (which may be nonzero, e.g.
    /// when attaching to a stream mid-recording). Every later block must start
    /// exactly at the write head; a gap or rewind is a hard error.
    pub fn append(&mut self, block: SampleBlock) -> StreamResult<()> {
        if block.num_channels() != self.channels.len() {
            return Err(StreamError::BlockShape(format!(
                "block has {} channels, buffer has {}",
                block.num_channels(),
                self.channels.len()
            )));
        }

        let n = block.num_samples();
        for (i, ch) in block.samples.iter().enumerate() {
            if ch.len() != n {
                return Err(StreamError::BlockShape(format!(
                    "ragged block: channel 0 has {} samples, channel {} has {}",
                    n,
                    i,
                    ch.len()
                )));
            }
        }

        if !self.primed {
            self.oldest = block.first_sample;
            self.next = block.first_sample;
            self.primed = true;
        } else if block.first_sample != self.next {
            return Err(StreamError::NonMonotonicBlock {
                expected: self.next,
                got: block.first_sample,
            });
        }

        for (dst, src) in self.channels.iter_mut().zip(block.samples) {
            dst.extend(src);
        }
        self.next += n as u64;

        Ok(())
    }

    /// Copy one channel over [start, stop).
    pub fn read_channel(&self, channel: usize, start: u64, stop: u64) -> StreamResult<Vec<f32>> {
        self.check_range(start, stop)?;
        let a = (start - self.oldest) as usize;
        let b = (stop - self.oldest) as usize;
        Ok(self.channels[channel].range(a..b).copied().collect())
    }

    /// Copy the picked channels over [start, stop), one row per pick.
    pub fn read(&self, start: u64, stop: u64, picks: &[usize]) -> StreamResult<Vec<Vec<f32>>> {
        self.check_range(start, stop)?;
        let a = (start - self.oldest) as usize;
        let b = (stop - self.oldest) as usize;
        Ok(picks
            .iter()
            .map(|&ch| self.channels[ch].range(a..b).copied().collect())
            .collect())
    }

    fn check_range(&self, start: u64, stop: u64) -> StreamResult<()> {
        if start > stop {
            return Err(StreamError::BlockShape(format!(
                "inverted range [{}, {})",
                start, stop
            )));
        }
        if start < self.oldest {
            return Err(StreamError::RangeUnavailable {
                start,
                stop,
                oldest: self.oldest,
                newest: self.next,
                direction: RangeDirection::Past,
            });
        }
        if stop > self.next {
            return Err(StreamError::RangeUnavailable {
                start,
                stop,
                oldest: self.oldest,
                newest: self.next,
                direction: RangeDirection::Future,
            });
        }
        Ok(())
    }

    /// Drop all samples below `before`. Trimming at or below the current
    /// front is a no-op; trimming past the write head clamps to it.
    pub fn trim(&mut self, before: u64) {
        let target = before.min(self.next);
        if target <= self.oldest {
            return;
        }
        let k = (target - self.oldest) as usize;
        for ch in &mut self.channels {
            ch.drain(..k);
        }
        self.oldest = target;
        log::trace!("trimmed {} samples, oldest now {}", k, self.oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(first_sample: u64, samples: Vec<Vec<f32>>) -> SampleBlock {
        SampleBlock {
            first_sample,
            samples,
            sample_rate: 100.0,
        }
    }

    fn ramp(start: u64, n: usize) -> Vec<f32> {
        (0..n).map(|i| (start + i as u64) as f32).collect()
    }

    #[test]
    fn test_append_and_read() {
        let mut buf = SampleBuffer::new(2);
        buf.append(block(0, vec![ramp(0, 5), ramp(100, 5)])).unwrap();
        buf.append(block(5, vec![ramp(5, 3), ramp(105, 3)])).unwrap();

        assert_eq!(buf.write_head(), 8);
        assert_eq!(buf.oldest_retained(), 0);
        assert_eq!(buf.len(), 8);

        let rows = buf.read(2, 6, &[0, 1]).unwrap();
        assert_eq!(rows[0], vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(rows[1], vec![102.0, 103.0, 104.0, 105.0]);

        let row = buf.read_channel(1, 0, 2).unwrap();
        assert_eq!(row, vec![100.0, 101.0]);
    }

    #[test]
    fn test_nonzero_origin() {
        let mut buf = SampleBuffer::new(1);
        buf.append(block(1000, vec![ramp(1000, 4)])).unwrap();

        assert_eq!(buf.oldest_retained(), 1000);
        assert_eq!(buf.write_head(), 1004);
        assert_eq!(buf.read_channel(0, 1001, 1003).unwrap(), vec![1001.0, 1002.0]);

        // reads below the origin report the past direction
        match buf.read_channel(0, 999, 1001) {
            Err(StreamError::RangeUnavailable { direction, .. }) => {
                assert_eq!(direction, RangeDirection::Past)
            }
            other => panic!("expected RangeUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_gap_and_rewind_rejected() {
        let mut buf = SampleBuffer::new(1);
        buf.append(block(0, vec![ramp(0, 4)])).unwrap();

        match buf.append(block(6, vec![ramp(6, 2)])) {
            Err(StreamError::NonMonotonicBlock { expected, got }) => {
                assert_eq!((expected, got), (4, 6));
            }
            other => panic!("expected NonMonotonicBlock, got {:?}", other),
        }

        assert!(matches!(
            buf.append(block(2, vec![ramp(2, 2)])),
            Err(StreamError::NonMonotonicBlock { .. })
        ));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut buf = SampleBuffer::new(2);
        assert!(matches!(
            buf.append(block(0, vec![ramp(0, 4)])),
            Err(StreamError::BlockShape(_))
        ));
        assert!(matches!(
            buf.append(block(0, vec![ramp(0, 4), ramp(0, 3)])),
            Err(StreamError::BlockShape(_))
        ));
    }

    #[test]
    fn test_read_future_direction() {
        let mut buf = SampleBuffer::new(1);
        buf.append(block(0, vec![ramp(0, 4)])).unwrap();

        match buf.read_channel(0, 2, 8) {
            Err(StreamError::RangeUnavailable {
                direction, newest, ..
            }) => {
                assert_eq!(direction, RangeDirection::Future);
                assert_eq!(newest, 4);
            }
            other => panic!("expected RangeUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_trim_is_idempotent() {
        let mut buf = SampleBuffer::new(1);
        buf.append(block(0, vec![ramp(0, 10)])).unwrap();

        buf.trim(4);
        assert_eq!(buf.oldest_retained(), 4);
        assert_eq!(buf.len(), 6);
        let after_first = buf.read_channel(0, 4, 10).unwrap();

        buf.trim(4);
        assert_eq!(buf.oldest_retained(), 4);
        assert_eq!(buf.read_channel(0, 4, 10).unwrap(), after_first);

        // trimming below the front is a no-op too
        buf.trim(2);
        assert_eq!(buf.oldest_retained(), 4);
    }

    #[test]
    fn test_trim_clamps_to_head() {
        let mut buf = SampleBuffer::new(1);
        buf.append(block(0, vec![ramp(0, 6)])).unwrap();

        buf.trim(100);
        assert_eq!(buf.oldest_retained(), 6);
        assert!(buf.is_empty());

        // appends continue seamlessly after a full trim
        buf.append(block(6, vec![ramp(6, 2)])).unwrap();
        assert_eq!(buf.read_channel(0, 6, 8).unwrap(), vec![6.0, 7.0]);
    }

    #[test]
    fn test_empty_block_is_noop() {
        let mut buf = SampleBuffer::new(1);
        buf.append(block(0, vec![ramp(0, 4)])).unwrap();
        buf.append(block(4, vec![vec![]])).unwrap();
        assert_eq!(buf.write_head(), 4);
    }
}
