//! Time-to-byte planning of chunk windows.
//!
//! All boundary arithmetic is done on integers: times are nanoseconds, the
//! payload is measured in bytes, and a point in time `t` maps to byte
//! `t × bytes_per_second / 1e9`. Nominal boundaries are always computed as
//! `index × chunk_duration` so rounding never accumulates across windows.

use std::time::Duration;

use crate::container::Metadata;
use crate::SliceError;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// One planned chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkWindow {
    pub index: usize,
    pub nominal_start: Duration,
    pub nominal_duration: Duration,
    /// Absolute offset of the first payload byte in the source buffer.
    pub byte_start: usize,
    /// Absolute offset one past the last payload byte in the source buffer.
    pub byte_end: usize,
    /// Seconds of audio actually included before `nominal_start`.
    pub applied_overlap_start: f64,
    /// Seconds of audio actually included after the nominal end.
    pub applied_overlap_end: f64,
}

impl ChunkWindow {
    pub fn len(&self) -> usize {
        self.byte_end - self.byte_start
    }

    pub fn is_empty(&self) -> bool {
        self.byte_end == self.byte_start
    }
}

/// Lazy sequence of [`ChunkWindow`]s over one payload.
///
/// The sequence is consumed once. It stops after the last window or after the
/// first error.
#[derive(Clone, Debug)]
pub struct ChunkPlan {
    data_start: usize,
    data_length: u128,
    bytes_per_second: u128,
    frame: u128,
    chunk_nanos: u128,
    overlap_nanos: u128,
    total: Duration,
    next_index: usize,
    // Sub-frame remainder of window 0's start; later snaps are relative to it.
    carry: Option<u128>,
    finished: bool,
}

/// Plan windows of `chunk_duration` over the payload described by `metadata`,
/// extending interior boundaries by `overlap` on each side.
pub fn plan(
    metadata: &Metadata,
    chunk_duration: Duration,
    overlap: Duration,
) -> Result<ChunkPlan, SliceError> {
    let bytes_per_second = u128::from(metadata.bytes_per_second);
    let frame = metadata.frame_alignment as u128;
    let chunk_nanos = chunk_duration.as_nanos();

    // A chunk shorter than one frame could produce an empty window.
    let chunk_bytes_scaled = chunk_nanos
        .checked_mul(bytes_per_second)
        .ok_or(SliceError::InvalidChunkDuration)?;
    if chunk_bytes_scaled < frame * NANOS_PER_SEC {
        return Err(SliceError::InvalidChunkDuration);
    }

    let data_length = metadata.data_length as u128;
    let total_nanos = data_length * NANOS_PER_SEC / bytes_per_second;
    // Overlap past the payload's length changes nothing.
    let overlap_nanos = overlap.as_nanos().min(total_nanos + 1);

    Ok(ChunkPlan {
        data_start: metadata.data_start,
        data_length,
        bytes_per_second,
        frame,
        chunk_nanos,
        overlap_nanos,
        total: nanos_to_duration(total_nanos),
        next_index: 0,
        carry: None,
        finished: false,
    })
}

impl ChunkPlan {
    /// Number of windows a complete plan yields: `⌈total / chunk⌉`.
    pub fn chunk_count(&self) -> usize {
        let scaled_total = self.data_length * NANOS_PER_SEC;
        let per_chunk = self.chunk_nanos * self.bytes_per_second;
        scaled_total.div_ceil(per_chunk) as usize
    }

    /// Playing time of the whole payload.
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    // True when `nanos` lies strictly before the end of the payload.
    fn inside(&self, nanos: u128) -> bool {
        nanos.saturating_mul(self.bytes_per_second) < self.data_length * NANOS_PER_SEC
    }

    fn byte_floor(&self, nanos: u128) -> u128 {
        nanos * self.bytes_per_second / NANOS_PER_SEC
    }

    fn byte_ceil(&self, nanos: u128) -> u128 {
        (nanos * self.bytes_per_second).div_ceil(NANOS_PER_SEC)
    }

    fn snap_down(&self, offset: u128, carry: u128) -> u128 {
        carry + offset.saturating_sub(carry) / self.frame * self.frame
    }

    fn snap_up(&self, offset: u128, carry: u128) -> u128 {
        carry + offset.saturating_sub(carry).div_ceil(self.frame) * self.frame
    }

    // Byte offset of the cut at `nanos`, snapped once so that neighbouring
    // windows share it.
    fn cut(&self, nanos: u128, carry: u128) -> u128 {
        self.snap_down(self.byte_floor(nanos), carry)
    }

    fn window(&mut self, index: usize) -> Result<ChunkWindow, SliceError> {
        let start_nanos = index as u128 * self.chunk_nanos;
        let next_nanos = start_nanos + self.chunk_nanos;
        let is_last = !self.inside(next_nanos);

        let pre = if index == 0 { 0 } else { self.overlap_nanos };
        let post = if !is_last && self.inside(next_nanos + self.overlap_nanos) {
            self.overlap_nanos
        } else {
            0
        };

        let remainder = self.byte_floor(start_nanos) % self.frame;
        let carry = *self.carry.get_or_insert(remainder);

        let start_cut = self.cut(start_nanos, carry);
        let end_cut = if is_last {
            self.data_length
        } else {
            self.cut(next_nanos, carry)
        };

        let start = if pre == 0 {
            start_cut
        } else {
            self.cut(start_nanos.saturating_sub(pre), carry)
        };
        let mut end = if post == 0 {
            end_cut
        } else {
            self.snap_up(self.byte_ceil(next_nanos + post), carry)
        };
        if is_last {
            end = end.min(self.data_length);
        }
        if end > self.data_length {
            return Err(SliceError::PayloadOverrun {
                end: self.data_start + end as usize,
                limit: self.data_start + self.data_length as usize,
            });
        }

        let nominal_start = nanos_to_duration(start_nanos);
        let nominal_end = if is_last {
            self.total
        } else {
            nanos_to_duration(next_nanos)
        };

        let bytes_per_second = self.bytes_per_second as f64;
        let applied_overlap_start = (start_cut - start) as f64 / bytes_per_second;
        let applied_overlap_end = (end - end_cut) as f64 / bytes_per_second;

        debug_assert!(start < end);

        Ok(ChunkWindow {
            index,
            nominal_start,
            nominal_duration: nominal_end.saturating_sub(nominal_start),
            byte_start: self.data_start + start as usize,
            byte_end: self.data_start + end as usize,
            applied_overlap_start,
            applied_overlap_end,
        })
    }
}

impl Iterator for ChunkPlan {
    type Item = Result<ChunkWindow, SliceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let index = self.next_index;
        if !self.inside(index as u128 * self.chunk_nanos) {
            self.finished = true;
            return None;
        }

        self.next_index += 1;
        let window = self.window(index);
        if window.is_err() {
            self.finished = true;
        }
        Some(window)
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    let secs = (nanos / NANOS_PER_SEC) as u64;
    let subsec = (nanos % NANOS_PER_SEC) as u32;
    Duration::new(secs, subsec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::container;

    fn metadata(channels: u16, sample_rate: u32, bits: u16, seconds_x1000: u64) -> Metadata {
        let frame = u64::from(channels) * u64::from(bits.div_ceil(8));
        let len = u64::from(sample_rate) * frame * seconds_x1000 / 1000;
        let buffer = container(channels, sample_rate, bits, &vec![0u8; len as usize], false);
        Metadata::from_buffer(&buffer).unwrap()
    }

    fn windows(meta: &Metadata, chunk: Duration, overlap: Duration) -> Vec<ChunkWindow> {
        plan(meta, chunk, overlap)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn ten_second_mono_in_two_second_chunks() {
        let meta = metadata(1, 44_100, 16, 10_000);
        let plan = plan(&meta, Duration::from_secs(2), Duration::ZERO).unwrap();
        assert_eq!(plan.chunk_count(), 5);
        assert_eq!(plan.total_duration(), Duration::from_secs(10));

        let windows: Vec<_> = plan.collect::<Result<_, _>>().unwrap();
        assert_eq!(windows.len(), 5);
        for (i, window) in windows.iter().enumerate() {
            assert_eq!(window.nominal_start, Duration::from_secs(2 * i as u64));
            assert_eq!(window.nominal_duration, Duration::from_secs(2));
            assert_eq!(window.len(), 176_400);
            assert_eq!(window.applied_overlap_start, 0.0);
            assert_eq!(window.applied_overlap_end, 0.0);
        }
        assert_eq!(windows[4].byte_end, meta.data_end());
    }

    #[test]
    fn last_window_is_clipped_to_remaining_time() {
        let meta = metadata(1, 44_100, 16, 10_000);
        let windows = windows(&meta, Duration::from_secs(3), Duration::ZERO);
        let starts: Vec<_> = windows.iter().map(|w| w.nominal_start.as_secs()).collect();
        let durations: Vec<_> = windows
            .iter()
            .map(|w| w.nominal_duration.as_secs_f64())
            .collect();
        assert_eq!(starts, [0, 3, 6, 9]);
        assert_eq!(durations, [3.0, 3.0, 3.0, 1.0]);
        assert_eq!(windows[3].len(), 88_200);
    }

    #[test]
    fn overlap_extends_interior_boundaries_only() {
        // 8 kHz stereo 16-bit: 32 000 bytes per second, 10 ms = 320 bytes.
        let meta = metadata(2, 8_000, 16, 2_000);
        let windows = windows(&meta, Duration::from_millis(500), Duration::from_millis(10));
        assert_eq!(windows.len(), 4);

        let first = &windows[0];
        assert_eq!(first.byte_start, meta.data_start);
        assert_eq!(first.len(), 16_000 + 320);
        assert_eq!(first.applied_overlap_start, 0.0);
        assert!((first.applied_overlap_end - 0.01).abs() < 1e-9);

        let middle = &windows[1];
        assert_eq!(middle.byte_start, meta.data_start + 16_000 - 320);
        assert_eq!(middle.len(), 16_000 + 640);

        let last = &windows[3];
        assert_eq!(last.byte_end, meta.data_end());
        assert!((last.applied_overlap_start - 0.01).abs() < 1e-9);
        assert_eq!(last.applied_overlap_end, 0.0);
    }

    #[test]
    fn post_overlap_dropped_when_it_would_reach_payload_end() {
        // 1.0 s payload, 0.6 s chunks, 0.4 s overlap: 0.6 + 0.4 is not strictly inside.
        let meta = metadata(1, 1_000, 8, 1_000);
        let windows = windows(&meta, Duration::from_millis(600), Duration::from_millis(400));
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].applied_overlap_end, 0.0);
        assert_eq!(windows[0].byte_end, meta.data_start + 600);
    }

    #[test]
    fn boundaries_snap_to_whole_frames() {
        // 3 channels of 24-bit audio: 9-byte frames, 1 kHz so 1 ms = 9 bytes.
        let meta = metadata(3, 1_000, 24, 1_000);
        let windows = windows(
            &meta,
            Duration::from_micros(333_333),
            Duration::from_micros(1_500),
        );
        for window in &windows {
            assert_eq!((window.byte_start - meta.data_start) % 9, 0);
            assert_eq!((window.byte_end - meta.data_start) % 9, 0);
            assert!(window.byte_end <= meta.data_end());
        }
        // Reported overlap reflects the snapped range, not the requested 1.5 ms.
        let applied = windows[1].applied_overlap_start;
        assert!(applied >= 0.0015, "applied {applied}");
        assert!(applied < 0.0015 + 2.0 * 9.0 / 9_000.0, "applied {applied}");
    }

    #[test]
    fn consecutive_windows_without_overlap_tile_the_payload() {
        let meta = metadata(2, 44_100, 16, 2_345);
        let windows = windows(&meta, Duration::from_millis(700), Duration::ZERO);
        assert_eq!(windows.first().unwrap().byte_start, meta.data_start);
        assert_eq!(windows.last().unwrap().byte_end, meta.data_end());
        for pair in windows.windows(2) {
            assert_eq!(pair[0].byte_end, pair[1].byte_start);
        }
    }

    #[test]
    fn unaligned_boundaries_are_shared_between_neighbours() {
        // 11025 Hz mono 16-bit: 500 ms is 5512.5 frames, so every cut falls mid-frame.
        let meta = metadata(1, 11_025, 16, 2_000);
        let windows = windows(&meta, Duration::from_millis(500), Duration::ZERO);
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].byte_start, meta.data_start);
        assert_eq!(windows[3].byte_end, meta.data_end());
        for pair in windows.windows(2) {
            assert_eq!(pair[0].byte_end, pair[1].byte_start);
        }
        let total: usize = windows.iter().map(ChunkWindow::len).sum();
        assert_eq!(total, meta.data_length);
        for window in &windows {
            assert_eq!(window.applied_overlap_start, 0.0);
            assert_eq!(window.applied_overlap_end, 0.0);
            assert_eq!(window.len() % 2, 0);
        }
    }

    #[test]
    fn odd_frames_without_overlap_concatenate_to_the_payload() {
        let meta = metadata(3, 1_000, 24, 1_000);
        let windows = windows(&meta, Duration::from_micros(333_333), Duration::ZERO);
        let total: usize = windows.iter().map(ChunkWindow::len).sum();
        assert_eq!(total, meta.data_length);
        assert!(windows
            .iter()
            .all(|w| w.applied_overlap_start == 0.0 && w.applied_overlap_end == 0.0));
    }

    #[test]
    fn trimming_applied_overlap_lands_on_the_shared_cut() {
        let meta = metadata(3, 1_000, 24, 1_000);
        let windows = windows(
            &meta,
            Duration::from_micros(333_333),
            Duration::from_micros(1_500),
        );
        let bps = meta.bytes_per_second as f64;
        let cores: Vec<_> = windows
            .iter()
            .map(|w| {
                let head = (w.applied_overlap_start * bps).round() as usize;
                let tail = (w.applied_overlap_end * bps).round() as usize;
                (w.byte_start + head, w.byte_end - tail)
            })
            .collect();
        assert_eq!(cores[0].0, meta.data_start);
        assert_eq!(cores.last().unwrap().1, meta.data_end());
        for pair in cores.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        for (start, end) in cores {
            assert_eq!((start - meta.data_start) % 9, 0);
            assert_eq!((end - meta.data_start) % 9, 0);
        }
    }

    #[test]
    fn oversized_chunk_times_byte_rate_is_rejected() {
        let mut meta = metadata(1, 8_000, 16, 1_000);
        meta.bytes_per_second = u64::MAX;
        let err = plan(&meta, Duration::MAX, Duration::ZERO).unwrap_err();
        assert!(matches!(err, SliceError::InvalidChunkDuration));
    }

    #[test]
    fn overlap_longer_than_the_payload_is_harmless() {
        let mut meta = metadata(1, 8_000, 16, 1_000);
        meta.bytes_per_second = u64::MAX;
        let single = windows(&meta, Duration::from_secs(1), Duration::MAX);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].byte_start, meta.data_start);
        assert_eq!(single[0].byte_end, meta.data_end());

        let meta = metadata(1, 8_000, 16, 1_000);
        let planned = windows(&meta, Duration::from_millis(400), Duration::MAX);
        assert_eq!(planned.len(), 3);
        assert!(planned.iter().all(|w| w.applied_overlap_end == 0.0));
    }

    #[test]
    fn chunk_count_matches_iteration_length() {
        let meta = metadata(1, 22_050, 16, 7_777);
        for millis in [100, 333, 1_000, 2_500, 7_777, 10_000] {
            let plan = plan(&meta, Duration::from_millis(millis), Duration::ZERO).unwrap();
            let expected = plan.chunk_count();
            assert_eq!(plan.count(), expected, "chunk of {millis} ms");
        }
    }

    #[test]
    fn empty_payload_plans_nothing() {
        let meta = metadata(1, 8_000, 16, 0);
        assert_eq!(
            plan(&meta, Duration::from_secs(1), Duration::ZERO)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn rejects_chunk_shorter_than_a_frame() {
        let meta = metadata(1, 8_000, 16, 1_000);
        let err = plan(&meta, Duration::from_nanos(10), Duration::ZERO).unwrap_err();
        assert!(matches!(err, SliceError::InvalidChunkDuration));
    }

    #[test]
    fn plan_is_fused_once_exhausted() {
        let meta = metadata(1, 8_000, 16, 1_000);
        let mut plan = plan(&meta, Duration::from_millis(400), Duration::ZERO).unwrap();
        assert_eq!(plan.by_ref().count(), 3);
        assert!(plan.next().is_none());
        assert!(plan.next().is_none());
    }
}
