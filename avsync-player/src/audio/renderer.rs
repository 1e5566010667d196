//! Audio decode-ahead and backpressure controller
//!
//! Keeps the ring buffer fed to a target buffered duration.
//!
//! **Fill cycle:** while buffered audio plus the audio still in flight is
//! below `decode_ahead` and fewer than `max_in_flight` chunks are in flight,
//! pull the next chunk and submit it. When either limit is hit the cycle
//! stops and reports when to look again (about half the buffered duration, so
//! the check lands before the buffer runs dry).
//!
//! **In flight:** a chunk counts from submission until a decoded unit with its
//! timestamp (or a later one) has been written. The decoder's own queue size
//! is not enough: a decoded unit can sit in the event channel after the
//! decoder has let go of it. A chunk's duration comes from the container, or
//! failing that from the last decoded unit; until either is known only one
//! chunk is sent at a time.
//!
//! **Decoded units:** copied plane by plane into scratch, then interleaved
//! straight into the ring buffer through `write_in_place`. The driver runs
//! another fill cycle afterwards since the decoder now has room.
//!
//! **Pause:** only stops the cycle from asking to be rescheduled. Buffered
//! samples and in-flight decodes are left alone.
//!
//! **Sizing invariant:** the ring buffer holds `buffer_ceiling` of audio. A
//! cycle stops as soon as buffered plus in-flight audio reaches
//! `decode_ahead`, so the ring never has to take more than `decode_ahead` plus
//! one chunk. A short write means a chunk longer than the headroom above
//! `decode_ahead`; it is logged, counted and `debug_assert!`ed.

use super::interleave::InterleaveScratch;
use crate::error::{Error, Result};
use crate::fill::{FillOutcome, FillState};
use crate::media::{
    take_reported_error, AudioData, Decoder, DecoderEvent, DecoderSink, Demuxer, EncodedChunk,
    PlanarAudio,
};
use crate::ring_buffer::{BufferMonitor, RingBuffer, SampleConsumer, SampleProducer};
use avsync_common::timing::interleaved_to_seconds;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Shortest follow-up delay a fill cycle will ask for
pub const MIN_RECHECK: Duration = Duration::from_millis(5);

/// Audio buffering limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioBufferSettings {
    /// Buffered duration the fill cycle aims for
    pub decode_ahead: Duration,

    /// Ring buffer size, as a duration at the stream's format
    pub buffer_ceiling: Duration,

    /// Maximum chunks in flight (submitted, not yet written)
    ///
    /// Must be at least 2: some decoders hold one input back until the next
    /// arrives.
    pub max_in_flight: usize,
}

impl Default for AudioBufferSettings {
    fn default() -> Self {
        Self {
            decode_ahead: Duration::from_millis(300),
            buffer_ceiling: Duration::from_millis(600),
            max_in_flight: 5,
        }
    }
}

impl AudioBufferSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight < 2 {
            return Err(Error::InvalidConfig(format!(
                "audio max_in_flight must be at least 2 (got {})",
                self.max_in_flight
            )));
        }
        if self.decode_ahead.is_zero() {
            return Err(Error::InvalidConfig(
                "audio decode_ahead must be greater than zero".to_string(),
            ));
        }
        if self.decode_ahead >= self.buffer_ceiling {
            return Err(Error::InvalidConfig(format!(
                "audio decode_ahead ({:?}) must be below buffer_ceiling ({:?})",
                self.decode_ahead, self.buffer_ceiling
            )));
        }
        Ok(())
    }
}

/// Audio renderer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioRendererStats {
    /// Chunks pulled from the demuxer and submitted to the decoder
    pub chunks_submitted: u64,

    /// Decoded units written to the ring buffer
    pub units_written: u64,

    /// Interleaved samples written to the ring buffer
    pub samples_written: u64,

    /// Writes that did not fit in the ring buffer
    pub short_writes: u64,
}

/// Chunk submitted to the decoder whose audio is not in the ring yet
#[derive(Debug, Clone, Copy)]
struct PendingChunk {
    timestamp_us: i64,
    duration: Option<Duration>,
}

/// Format and ring buffer, available after `initialize`
struct Output {
    sample_rate: u32,
    channels: u16,
    producer: SampleProducer,
}

/// Feeds a ring buffer from a demuxer/decoder pair
pub struct AudioRenderer<A: AudioData = PlanarAudio> {
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn Decoder<Output = A>>,
    settings: AudioBufferSettings,
    events: Option<mpsc::UnboundedReceiver<DecoderEvent<A>>>,
    output: Option<Output>,
    scratch: InterleaveScratch,
    in_flight: VecDeque<PendingChunk>,
    /// Duration of the last decoded unit, the estimate for chunks without one
    unit_duration: Option<Duration>,
    state: FillState,
    playing: bool,
    stats: AudioRendererStats,
}

impl<A: AudioData> AudioRenderer<A> {
    /// Create a renderer; nothing is read until `initialize`
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        decoder: Box<dyn Decoder<Output = A>>,
        settings: AudioBufferSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            demuxer,
            decoder,
            settings,
            events: None,
            output: None,
            scratch: InterleaveScratch::new(),
            in_flight: VecDeque::with_capacity(settings.max_in_flight),
            unit_duration: None,
            state: FillState::Idle,
            playing: false,
            stats: AudioRendererStats::default(),
        })
    }

    /// Initialize the demuxer, configure the decoder and allocate the ring buffer
    ///
    /// # Returns
    /// Consumer half of the ring buffer, for the audio output side
    pub async fn initialize(&mut self) -> Result<SampleConsumer> {
        if self.output.is_some() {
            return Err(Error::InvalidState(
                "audio renderer already initialized".to_string(),
            ));
        }

        self.demuxer.initialize().await?;
        let config = self.demuxer.decoder_config()?;
        let (sample_rate, channels) = config.audio_format()?;

        let (sink, events) = DecoderSink::channel();
        self.decoder.configure(&config, sink)?;
        self.events = Some(events);

        let ring = RingBuffer::for_duration(self.settings.buffer_ceiling, sample_rate, channels)?;
        debug!(
            "Audio renderer initialized: codec={}, {} Hz x{}, ring capacity={} samples",
            config.codec(),
            sample_rate,
            channels,
            ring.capacity()
        );
        let (producer, consumer) = ring.split();
        self.output = Some(Output {
            sample_rate,
            channels,
            producer,
        });
        Ok(consumer)
    }

    /// Run one fill cycle
    pub async fn fill(&mut self) -> Result<FillOutcome> {
        match self.state {
            FillState::Filling => return Ok(FillOutcome::Busy),
            FillState::Drained => return Ok(FillOutcome::EndOfStream),
            FillState::Idle => {}
        }
        if self.output.is_none() {
            return Err(Error::InvalidState(
                "audio renderer not initialized".to_string(),
            ));
        }

        self.state = FillState::Filling;
        let outcome = self.fill_cycle().await;
        self.state = match outcome {
            Ok(FillOutcome::EndOfStream) => FillState::Drained,
            _ => FillState::Idle,
        };
        outcome
    }

    async fn fill_cycle(&mut self) -> Result<FillOutcome> {
        loop {
            let buffered = self.buffered_duration();
            let pending = self.pending_duration();
            if buffered + pending >= self.settings.decode_ahead {
                trace!("Audio fill saturated at {:?} buffered + {:?} in flight", buffered, pending);
                return Ok(FillOutcome::Saturated {
                    recheck_after: self.recheck_delay(buffered),
                });
            }

            let in_flight = self.in_flight.len();
            if in_flight >= self.settings.max_in_flight || (in_flight > 0 && !self.pending_sized()) {
                trace!("Audio fill throttled: {} chunks in flight", in_flight);
                return Ok(FillOutcome::Throttled {
                    recheck_after: self.recheck_delay(buffered),
                });
            }

            match self.demuxer.next_chunk().await? {
                Some(chunk) => self.submit(chunk)?,
                None => {
                    debug!(
                        "Audio demuxer reached end of stream after {} chunks",
                        self.stats.chunks_submitted
                    );
                    return Ok(FillOutcome::EndOfStream);
                }
            }
        }
    }

    fn submit(&mut self, chunk: EncodedChunk) -> Result<()> {
        let pending = PendingChunk {
            timestamp_us: chunk.timestamp_us,
            duration: chunk
                .duration_us
                .filter(|us| *us > 0)
                .map(|us| Duration::from_micros(us as u64)),
        };
        trace!("Submitting audio chunk @{}us", chunk.timestamp_us);
        if let Err(e) = self.decoder.decode(chunk) {
            let reported = self
                .events
                .as_mut()
                .and_then(|events| take_reported_error(events, |unit: A| unit.close()));
            return Err(reported.unwrap_or(e));
        }
        self.in_flight.push_back(pending);
        self.stats.chunks_submitted += 1;
        Ok(())
    }

    /// Estimated audio in chunks still in flight
    fn pending_duration(&self) -> Duration {
        self.in_flight
            .iter()
            .map(|chunk| chunk.duration.or(self.unit_duration).unwrap_or_default())
            .sum()
    }

    /// Every in-flight chunk has a known or estimated duration
    fn pending_sized(&self) -> bool {
        self.unit_duration.is_some() || self.in_flight.iter().all(|chunk| chunk.duration.is_some())
    }

    /// Follow-up delay: half the buffered duration, `None` while paused
    fn recheck_delay(&self, buffered: Duration) -> Option<Duration> {
        self.playing.then(|| (buffered / 2).max(MIN_RECHECK))
    }

    /// Write one decoded unit into the ring buffer
    ///
    /// # Returns
    /// Number of interleaved samples written
    pub fn on_decoded(&mut self, unit: A) -> Result<usize> {
        let Some(output) = self.output.as_mut() else {
            unit.close();
            return Err(Error::InvalidState(
                "audio renderer not initialized".to_string(),
            ));
        };

        if unit.sample_rate() != output.sample_rate || unit.number_of_channels() != output.channels {
            let message = format!(
                "decoded unit is {} Hz x{}, stream is {} Hz x{}",
                unit.sample_rate(),
                unit.number_of_channels(),
                output.sample_rate,
                output.channels
            );
            unit.close();
            return Err(Error::FormatMismatch(message));
        }

        let loaded = self.scratch.load(&unit);
        let timestamp_us = unit.timestamp_us();
        unit.close();
        retire(&mut self.in_flight, timestamp_us);
        loaded?;

        let frames = self.scratch.frames();
        if frames > 0 {
            self.unit_duration = Some(Duration::from_secs_f64(frames as f64 / output.sample_rate as f64));
        }

        let wanted = self.scratch.interleaved_len();
        let scratch = &self.scratch;
        let written = output
            .producer
            .write_in_place(wanted, |first, second| scratch.write_interleaved(first, second));

        self.stats.units_written += 1;
        self.stats.samples_written += written as u64;
        if written < wanted {
            self.stats.short_writes += 1;
            error!(
                "Audio ring buffer under-delivery @{}us: wrote {} of {} samples (unit longer than the room above decode_ahead)",
                timestamp_us, written, wanted
            );
            debug_assert!(
                written == wanted,
                "ring buffer under-delivery: {} of {} samples",
                written,
                wanted
            );
        } else {
            trace!("Wrote {} samples @{}us", written, timestamp_us);
        }
        Ok(written)
    }

    /// Wait for the next decoder event
    ///
    /// Pends forever once the decoder has gone away, so it can sit in a
    /// `select!` without spinning.
    pub async fn next_decoder_event(&mut self) -> Option<DecoderEvent<A>> {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        match events.recv().await {
            Some(event) => Some(event),
            None => {
                debug!("Audio decoder event channel closed");
                self.events = None;
                None
            }
        }
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Audio waiting in the ring buffer
    pub fn buffered_duration(&self) -> Duration {
        match &self.output {
            Some(output) => {
                let buffered = output.producer.capacity() - output.producer.available_write();
                Duration::from_secs_f64(interleaved_to_seconds(
                    buffered,
                    output.sample_rate,
                    output.channels,
                ))
            }
            None => Duration::ZERO,
        }
    }

    /// `1 - available_write / capacity`; 0.0 before initialization
    pub fn buffer_health(&self) -> f64 {
        match &self.output {
            Some(output) => {
                1.0 - output.producer.available_write() as f64 / output.producer.capacity() as f64
            }
            None => 0.0,
        }
    }

    /// True once initial buffering is done
    ///
    /// Either the decode-ahead target is reached, or the stream ended and
    /// every submitted chunk has been decoded.
    pub fn is_primed(&self) -> bool {
        self.buffered_duration() >= self.settings.decode_ahead || self.is_finished()
    }

    /// End of stream reached and every submitted chunk written
    pub fn is_finished(&self) -> bool {
        self.state == FillState::Drained
            && self.in_flight.is_empty()
            && self.decoder.decode_queue_size() == 0
    }

    /// Chunks submitted whose audio is not in the ring yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn monitor(&self) -> Option<BufferMonitor> {
        self.output.as_ref().map(|output| output.producer.monitor())
    }

    pub fn state(&self) -> FillState {
        self.state
    }

    pub fn settings(&self) -> &AudioBufferSettings {
        &self.settings
    }

    pub fn stats(&self) -> AudioRendererStats {
        self.stats
    }

    /// (sample_rate, channels) after initialization
    pub fn format(&self) -> Option<(u32, u16)> {
        self.output
            .as_ref()
            .map(|output| (output.sample_rate, output.channels))
    }

    /// Stop decoding and release undelivered units
    pub fn close(&mut self) {
        self.decoder.close();
        self.in_flight.clear();
        if let Some(mut events) = self.events.take() {
            events.close();
            while let Ok(event) = events.try_recv() {
                if let DecoderEvent::Output(unit) = event {
                    unit.close();
                }
            }
        }
    }
}

/// Drop chunks up to `timestamp_us` from the in-flight list
fn retire(in_flight: &mut VecDeque<PendingChunk>, timestamp_us: i64) {
    while in_flight
        .front()
        .is_some_and(|chunk| chunk.timestamp_us <= timestamp_us)
    {
        in_flight.pop_front();
    }
}

impl<A: AudioData> Drop for AudioRenderer<A> {
    fn drop(&mut self) {
        self.close();
    }
}
