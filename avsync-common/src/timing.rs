//! Time unit conversions
//!
//! avsync uses three time representations:
//!
//! 1. **Microseconds (i64)**: chunk and frame timestamps, as delivered by demuxers
//! 2. **Seconds (f64)**: media clock and buffered durations
//! 3. **Sample frames (usize)**: ring buffer sizing, one frame = one sample per channel
//!
//! Interleaved sample counts are frames × channels.

use std::time::Duration;

/// Microseconds per second
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Convert a microsecond timestamp to seconds
pub fn us_to_seconds(us: i64) -> f64 {
    us as f64 / MICROS_PER_SECOND as f64
}

/// Convert seconds to a microsecond timestamp (rounded to nearest)
pub fn seconds_to_us(seconds: f64) -> i64 {
    (seconds * MICROS_PER_SECOND as f64).round() as i64
}

/// Number of sample frames covering `duration` at `sample_rate` (rounded up)
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> usize {
    // Integer math: exact for any millisecond-aligned duration
    let nanos = duration.as_nanos() * sample_rate as u128;
    nanos.div_ceil(1_000_000_000) as usize
}

/// Duration of `frames` sample frames at `sample_rate`
pub fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}

/// Seconds of audio represented by an interleaved sample count
pub fn interleaved_to_seconds(samples: usize, sample_rate: u32, channels: u16) -> f64 {
    let per_second = sample_rate as f64 * channels as f64;
    if per_second == 0.0 {
        return 0.0;
    }
    samples as f64 / per_second
}

/// Microsecond timestamp of the frame `frame_index` frames after `base_us`
pub fn frame_timestamp_us(base_us: i64, frame_index: u64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return base_us;
    }
    base_us + (frame_index as i128 * MICROS_PER_SECOND as i128 / sample_rate as i128) as i64
}
