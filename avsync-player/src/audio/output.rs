//! Audio output boundary
//!
//! Everything here runs on, or is shared with, the real-time audio context.
//!
//! **Components:**
//! - `OutputClock`: atomics describing how much audio the device has played
//!   and how late it is; the media clock reads it from the control task
//! - `OutputPump`: the render-quantum function the device calls. Pops from
//!   the ring buffer, zero-fills underruns, outputs silence while paused.
//!   No locks, no allocation, no logging.
//! - `AudioBackend`: something that drives a pump (a device or a paced thread)
//! - `NullOutput`: headless backend pacing the pump on a std thread

use crate::clock::AudioClockSource;
use crate::error::{Error, Result};
use crate::ring_buffer::SampleConsumer;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Playback position and latency of the audio output
///
/// Written by the real-time side, read by the control side. All fields are
/// independent atomics; readers may see a mix of slightly different moments,
/// which the media clock tolerates.
#[derive(Debug)]
pub struct OutputClock {
    sample_rate: AtomicU32,
    frames_rendered: AtomicU64,
    output_latency_ns: AtomicU64,
    base_latency_ns: AtomicU64,
    running: AtomicBool,
}

impl OutputClock {
    pub fn new(sample_rate: u32, base_latency: Duration) -> Self {
        Self {
            sample_rate: AtomicU32::new(sample_rate),
            frames_rendered: AtomicU64::new(0),
            output_latency_ns: AtomicU64::new(0),
            base_latency_ns: AtomicU64::new(base_latency.as_nanos() as u64),
            running: AtomicBool::new(false),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Media frames handed to the device so far
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    pub fn advance(&self, frames: u64) {
        self.frames_rendered.fetch_add(frames, Ordering::AcqRel);
    }

    /// Time between a sample leaving the pump and reaching the speaker
    pub fn set_output_latency(&self, latency: Duration) {
        self.output_latency_ns
            .store(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl AudioClockSource for OutputClock {
    fn current_time(&self) -> f64 {
        let rate = self.sample_rate();
        if rate == 0 {
            return 0.0;
        }
        self.frames_rendered() as f64 / rate as f64
    }

    fn output_latency(&self) -> f64 {
        Duration::from_nanos(self.output_latency_ns.load(Ordering::Relaxed)).as_secs_f64()
    }

    fn base_latency(&self) -> f64 {
        Duration::from_nanos(self.base_latency_ns.load(Ordering::Relaxed)).as_secs_f64()
    }
}

/// Real-time render function over the ring buffer consumer
pub struct OutputPump {
    consumer: SampleConsumer,
    clock: Arc<OutputClock>,
    channels: u16,
    underruns: Arc<AtomicU64>,
}

impl OutputPump {
    pub fn new(consumer: SampleConsumer, clock: Arc<OutputClock>, channels: u16) -> Self {
        Self {
            consumer,
            clock,
            channels,
            underruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fill one render quantum of interleaved samples
    ///
    /// Paused: silence, nothing consumed. Playing: pop what is buffered and
    /// zero-fill the rest. The clock advances by the media frames actually
    /// popped.
    ///
    /// # Returns
    /// Samples taken from the ring buffer
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        if !self.clock.is_running() {
            out.fill(0.0);
            return 0;
        }

        let read = self.consumer.pop(out);
        if read < out.len() {
            out[read..].fill(0.0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        self.clock.advance((read / self.channels.max(1) as usize) as u64);
        read
    }

    pub fn clock(&self) -> &Arc<OutputClock> {
        &self.clock
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Shared underrun counter (quanta that were not fully covered)
    pub fn underrun_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.underruns)
    }
}

/// Drives an `OutputPump` in real time
pub trait AudioBackend: Send {
    fn name(&self) -> &str;

    /// Start pulling from `pump`
    fn start(&mut self, pump: OutputPump) -> Result<()>;

    /// Stop pulling; the pump is dropped
    fn stop(&mut self);
}

/// Headless output: renders quanta on a std thread at the stream's pace
pub struct NullOutput {
    quantum_frames: usize,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullOutput {
    pub fn new(quantum_frames: usize) -> Self {
        Self {
            quantum_frames,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl AudioBackend for NullOutput {
    fn name(&self) -> &str {
        "null"
    }

    fn start(&mut self, mut pump: OutputPump) -> Result<()> {
        if self.thread.is_some() {
            return Err(Error::AudioOutput("null output already started".to_string()));
        }
        let sample_rate = pump.clock().sample_rate();
        if sample_rate == 0 || self.quantum_frames == 0 {
            return Err(Error::AudioOutput(format!(
                "cannot pace {} frames at {} Hz",
                self.quantum_frames, sample_rate
            )));
        }

        let quantum = Duration::from_secs_f64(self.quantum_frames as f64 / sample_rate as f64);
        // One quantum sits between the pump and the (virtual) speaker
        pump.clock().set_output_latency(quantum);

        let stop = Arc::clone(&self.stop);
        let samples = self.quantum_frames * pump.channels() as usize;
        let thread = std::thread::Builder::new()
            .name("avsync-null-output".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; samples];
                let started = std::time::Instant::now();
                let mut quanta: u32 = 0;
                while !stop.load(Ordering::Acquire) {
                    pump.render(&mut buffer);
                    quanta = quanta.wrapping_add(1);
                    let due = started + quantum * quanta;
                    if let Some(wait) = due.checked_duration_since(std::time::Instant::now()) {
                        std::thread::sleep(wait);
                    }
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {}", e)))?;

        info!(
            "Null audio output started: {} frames per quantum ({:?})",
            self.quantum_frames, quantum
        );
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Null output thread panicked");
            }
            debug!("Null audio output stopped");
        }
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::RingBuffer;

    fn pump(capacity: usize, channels: u16) -> (crate::ring_buffer::SampleProducer, OutputPump) {
        let (producer, consumer) = RingBuffer::with_capacity(capacity).unwrap().split();
        let clock = Arc::new(OutputClock::new(48_000, Duration::ZERO));
        (producer, OutputPump::new(consumer, clock, channels))
    }

    #[test]
    fn test_paused_pump_outputs_silence_and_keeps_samples() {
        let (mut producer, mut pump) = pump(16, 2);
        producer.push(&[0.5; 8]);

        let mut out = [1.0; 4];
        assert_eq!(pump.render(&mut out), 0);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(producer.available_read(), 8);
        assert_eq!(pump.clock().frames_rendered(), 0);
    }

    #[test]
    fn test_underrun_zero_fills_and_counts() {
        let (mut producer, mut pump) = pump(16, 2);
        pump.clock().set_running(true);
        producer.push(&[0.5, 0.5]);

        let mut out = [1.0; 6];
        assert_eq!(pump.render(&mut out), 2);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(pump.underrun_counter().load(Ordering::Relaxed), 1);
        assert_eq!(pump.clock().frames_rendered(), 1);
    }

    #[test]
    fn test_clock_source_reports_latency() {
        let clock = OutputClock::new(48_000, Duration::from_millis(10));
        clock.advance(48_000);
        clock.set_output_latency(Duration::from_millis(20));

        assert_eq!(clock.current_time(), 1.0);
        assert!((clock.output_latency() - 0.020).abs() < 1e-9);
        assert!((clock.base_latency() - 0.010).abs() < 1e-9);
    }

    #[test]
    fn test_null_output_consumes_while_running() {
        let (mut producer, pump) = pump(4_800, 2);
        let clock = Arc::clone(pump.clock());
        producer.push(&[0.1; 960]);
        clock.set_running(true);

        let mut output = NullOutput::new(48);
        output.start(pump).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        output.stop();

        assert!(clock.frames_rendered() > 0);
        assert!(clock.output_latency() > 0.0);
    }
}
