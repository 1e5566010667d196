//! Media clock tests against the output clock
//!
//! The output clock is advanced by hand, standing in for a device whose
//! crystal runs slightly off, while tokio time stands in for the render
//! task's monotonic clock.

use avsync_player::audio::OutputClock;
use avsync_player::clock::{clock_channel, estimate_presentation_time, AudioClockSource};
use std::sync::Arc;
use std::time::Duration;

const RATE: u32 = 48_000;

#[tokio::test(start_paused = true)]
async fn test_extrapolation_drift_stays_bounded_between_syncs() {
    let clock = Arc::new(OutputClock::new(RATE, Duration::ZERO));
    clock.set_running(true);
    let source: Arc<dyn AudioClockSource> = clock.clone();
    let (publisher, mut follower) = clock_channel(Arc::clone(&source));
    publisher.publish(true);

    // Device delivers 0.5% more audio than wall time: 48.24 frames per ms
    let mut max_drift: f64 = 0.0;
    for step in 1..=300u64 {
        tokio::time::advance(Duration::from_millis(10)).await;
        clock.advance(482 + u64::from(step % 5 < 2));

        // One sync per second
        if step % 100 == 0 {
            publisher.publish(true);
        }
        let drift = (follower.now() - estimate_presentation_time(source.as_ref())).abs();
        max_drift = max_drift.max(drift);
    }

    assert!(max_drift < 0.020, "drift {:.4}s exceeded 20 ms", max_drift);
    assert!(max_drift > 0.001, "skew was not exercised");
}

#[tokio::test(start_paused = true)]
async fn test_sync_corrects_accumulated_drift() {
    let clock = Arc::new(OutputClock::new(RATE, Duration::ZERO));
    let source: Arc<dyn AudioClockSource> = clock.clone();
    let (publisher, follower) = clock_channel(Arc::clone(&source));
    publisher.publish(true);

    // Device stalls for half a second while wall time moves on
    tokio::time::advance(Duration::from_millis(500)).await;
    let now = tokio::time::Instant::now();
    assert!((follower.peek(now) - 0.5).abs() < 1e-6);

    publisher.publish(true);
    assert!(follower.peek(now).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_latency_holds_clock_at_zero_after_start() {
    let clock = Arc::new(OutputClock::new(RATE, Duration::from_millis(10)));
    clock.set_output_latency(Duration::from_millis(20));

    clock.advance(RATE as u64 / 50); // 20 ms rendered, 30 ms latency
    assert_eq!(estimate_presentation_time(clock.as_ref()), 0.0);

    clock.advance(RATE as u64 / 50); // 40 ms rendered
    let estimate = estimate_presentation_time(clock.as_ref());
    assert!((estimate - 0.010).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_paused_clock_is_frozen() {
    let clock = Arc::new(OutputClock::new(RATE, Duration::ZERO));
    clock.advance(RATE as u64);
    let source: Arc<dyn AudioClockSource> = clock.clone();
    let (publisher, mut follower) = clock_channel(source);

    publisher.publish(false);
    let before = follower.now();
    tokio::time::advance(Duration::from_secs(3)).await;

    assert_eq!(follower.now(), before);
    assert!((before - 1.0).abs() < 1e-9);
    assert!(!follower.is_running());
}
