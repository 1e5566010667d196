//! Media clock
//!
//! Turns the audio output clock into the presentation time the video path
//! renders against.
//!
//! **Estimate:** `max(0, current_time - (output_latency + base_latency))`.
//! The device holds samples internally, so the newest rendered sample is not
//! audible yet; subtracting the latency maps "rendered" to "audible now".
//! Right after start the raw value is negative and is clamped to zero.
//!
//! **Propagation:** the control task publishes `ClockSync` snapshots at a low
//! rate (and immediately on play/pause) over a `watch` channel. The rendering
//! task extrapolates the latest snapshot with its own monotonic clock on every
//! tick. Drift between two snapshots is bounded by how well the two clocks
//! agree and is expected to stay well under 20 ms per second.
//!
//! Uses `tokio::time::Instant` so paused-time tests control both sides.

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

/// Audio output timing as seen by the media clock
pub trait AudioClockSource: Send + Sync {
    /// Seconds of audio rendered by the output so far
    fn current_time(&self) -> f64;

    /// Seconds between a rendered sample and it being audible
    fn output_latency(&self) -> f64;

    /// Fixed processing latency of the output path, in seconds
    fn base_latency(&self) -> f64;
}

/// Latency-compensated presentation time in seconds (never negative)
pub fn estimate_presentation_time(source: &dyn AudioClockSource) -> f64 {
    let latency = source.output_latency() + source.base_latency();
    (source.current_time() - latency).max(0.0)
}

/// Media time measured at a monotonic instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSync {
    pub media_time_seconds: f64,
    pub captured_at: Instant,
    /// Playback was running when captured; a paused clock does not advance
    pub running: bool,
}

impl ClockSync {
    pub fn new(media_time_seconds: f64, captured_at: Instant, running: bool) -> Self {
        Self {
            media_time_seconds,
            captured_at,
            running,
        }
    }

    /// Media time at `now`, advanced by elapsed monotonic time when running
    pub fn extrapolate(&self, now: Instant) -> f64 {
        if !self.running {
            return self.media_time_seconds;
        }
        self.media_time_seconds + now.saturating_duration_since(self.captured_at).as_secs_f64()
    }
}

/// Control-side end: measures the audio clock and publishes snapshots
pub struct ClockPublisher {
    source: std::sync::Arc<dyn AudioClockSource>,
    tx: watch::Sender<ClockSync>,
}

/// Rendering-side end: extrapolates the latest snapshot
#[derive(Clone)]
pub struct ClockFollower {
    rx: watch::Receiver<ClockSync>,
    last: f64,
}

/// Create a connected publisher/follower pair, starting paused at zero
pub fn clock_channel(source: std::sync::Arc<dyn AudioClockSource>) -> (ClockPublisher, ClockFollower) {
    let (tx, rx) = watch::channel(ClockSync::new(0.0, Instant::now(), false));
    (ClockPublisher { source, tx }, ClockFollower { rx, last: 0.0 })
}

impl ClockPublisher {
    /// Measure the audio clock now and publish it
    pub fn publish(&self, running: bool) -> ClockSync {
        let sync = ClockSync::new(
            estimate_presentation_time(self.source.as_ref()),
            Instant::now(),
            running,
        );
        trace!(
            "Clock sync: media_time={:.3}s running={}",
            sync.media_time_seconds,
            running
        );
        self.tx.send_replace(sync);
        sync
    }

    /// Publish an explicit snapshot
    pub fn publish_sync(&self, sync: ClockSync) {
        self.tx.send_replace(sync);
    }

    pub fn follower(&self) -> ClockFollower {
        ClockFollower {
            rx: self.tx.subscribe(),
            last: 0.0,
        }
    }
}

impl ClockFollower {
    /// Monotonic estimate at `now`
    ///
    /// Never returns less than a previous estimate from this follower, so a
    /// sync that lands slightly behind the extrapolation does not step the
    /// video clock backwards.
    pub fn estimate_at(&mut self, now: Instant) -> f64 {
        let estimate = self.peek(now).max(self.last);
        self.last = estimate;
        estimate
    }

    /// Estimate at `now` without the monotonic clamp or any state change
    pub fn peek(&self, now: Instant) -> f64 {
        self.rx.borrow().extrapolate(now)
    }

    pub fn now(&mut self) -> f64 {
        self.estimate_at(Instant::now())
    }

    /// Latest snapshot received
    pub fn latest(&self) -> ClockSync {
        *self.rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.rx.borrow().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedClock {
        current: f64,
        output_latency: f64,
        base_latency: f64,
    }

    impl AudioClockSource for FixedClock {
        fn current_time(&self) -> f64 {
            self.current
        }
        fn output_latency(&self) -> f64 {
            self.output_latency
        }
        fn base_latency(&self) -> f64 {
            self.base_latency
        }
    }

    #[test]
    fn test_estimate_subtracts_latency() {
        let clock = FixedClock {
            current: 2.0,
            output_latency: 0.04,
            base_latency: 0.01,
        };
        assert!((estimate_presentation_time(&clock) - 1.95).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_clamps_to_zero_at_start() {
        let clock = FixedClock {
            current: 0.02,
            output_latency: 0.04,
            base_latency: 0.01,
        };
        assert_eq!(estimate_presentation_time(&clock), 0.0);
    }

    #[test]
    fn test_extrapolation_example() {
        let t0 = Instant::now();
        let sync = ClockSync::new(10.0, t0, true);
        let estimate = sync.extrapolate(t0 + Duration::from_millis(250));
        assert!((estimate - 10.25).abs() < 1e-9);
    }

    #[test]
    fn test_paused_sync_does_not_advance() {
        let t0 = Instant::now();
        let sync = ClockSync::new(3.5, t0, false);
        assert_eq!(sync.extrapolate(t0 + Duration::from_secs(5)), 3.5);
    }

    #[tokio::test]
    async fn test_follower_never_steps_backwards() {
        let source = Arc::new(FixedClock {
            current: 0.0,
            output_latency: 0.0,
            base_latency: 0.0,
        });
        let (publisher, mut follower) = clock_channel(source);
        let t0 = Instant::now();

        publisher.publish_sync(ClockSync::new(1.0, t0, true));
        assert!((follower.estimate_at(t0 + Duration::from_millis(100)) - 1.1).abs() < 1e-9);

        // Sync lands 5 ms behind the extrapolated value
        publisher.publish_sync(ClockSync::new(1.095, t0 + Duration::from_millis(100), true));
        assert!((follower.estimate_at(t0 + Duration::from_millis(100)) - 1.1).abs() < 1e-9);
        assert!(follower.peek(t0 + Duration::from_millis(100)) < 1.1);
    }
}
