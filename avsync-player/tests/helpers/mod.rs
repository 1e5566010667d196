//! Test doubles for avsync-player integration tests
//!
//! - `ScriptedDemuxer`: plays back a fixed list of chunks, errors or stalls
//! - `ManualDecoder`: queues chunks until the test completes or fails them
//! - `TestFrame`: video frame that records when it is released
//! - `ManualOutput`: audio backend whose render quanta the test drives

#![allow(dead_code)]

use async_trait::async_trait;
use avsync_common::events::Track;
use avsync_player::audio::{AudioBackend, OutputPump};
use avsync_player::media::synthetic::{PCM_F32LE, RAW_LUMA};
use avsync_player::media::{Decoder, DecoderConfig, DecoderSink, Demuxer, EncodedChunk, VideoFrame};
use avsync_player::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted demuxer response
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(EncodedChunk),
    Fail(String),
    /// Never resolves (a read the test cancels)
    Stall,
    /// Sleep, then answer with the next step
    Wait(Duration),
}

pub fn chunk(timestamp_us: i64) -> EncodedChunk {
    EncodedChunk {
        timestamp_us,
        duration_us: None,
        key_frame: true,
        data: Vec::new(),
    }
}

pub fn timed_chunk(timestamp_us: i64, duration_us: i64) -> EncodedChunk {
    EncodedChunk {
        duration_us: Some(duration_us),
        ..chunk(timestamp_us)
    }
}

/// Demuxer replaying `Step`s, then end of stream
pub struct ScriptedDemuxer {
    config: DecoderConfig,
    steps: VecDeque<Step>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedDemuxer {
    pub fn new(config: DecoderConfig, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            config,
            steps: steps.into_iter().collect(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `count` empty chunks spaced `interval_us` apart, each `interval_us` long
    pub fn chunks(config: DecoderConfig, count: usize, interval_us: i64) -> Self {
        Self::new(
            config,
            (0..count).map(|i| Step::Chunk(timed_chunk(i as i64 * interval_us, interval_us))),
        )
    }

    /// Shared counter of `next_chunk` calls
    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

#[async_trait]
impl Demuxer for ScriptedDemuxer {
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn decoder_config(&self) -> Result<DecoderConfig> {
        Ok(self.config.clone())
    }

    async fn next_chunk(&mut self) -> Result<Option<EncodedChunk>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        loop {
            match self.steps.pop_front() {
                Some(Step::Chunk(chunk)) => return Ok(Some(chunk)),
                Some(Step::Fail(message)) => return Err(Error::demux(self.config.track(), message)),
                Some(Step::Stall) => return std::future::pending().await,
                Some(Step::Wait(delay)) => tokio::time::sleep(delay).await,
                None => return Ok(None),
            }
        }
    }
}

pub fn mono_audio_config(sample_rate: u32) -> DecoderConfig {
    DecoderConfig::Audio {
        codec: PCM_F32LE.to_string(),
        sample_rate,
        channels: 1,
        description: None,
    }
}

pub fn video_config() -> DecoderConfig {
    DecoderConfig::Video {
        codec: RAW_LUMA.to_string(),
        width: 4,
        height: 4,
        description: None,
    }
}

struct ManualState<T> {
    sink: Option<DecoderSink<T>>,
    pending: VecDeque<EncodedChunk>,
    decode_calls: usize,
    closed: bool,
}

/// Decoder the test completes by hand
pub struct ManualDecoder<T> {
    state: Arc<Mutex<ManualState<T>>>,
}

/// Test-side handle to a `ManualDecoder`
pub struct ManualDecoderHandle<T> {
    state: Arc<Mutex<ManualState<T>>>,
}

impl<T> Clone for ManualDecoderHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

pub fn manual_decoder<T>() -> (ManualDecoder<T>, ManualDecoderHandle<T>) {
    let state = Arc::new(Mutex::new(ManualState {
        sink: None,
        pending: VecDeque::new(),
        decode_calls: 0,
        closed: false,
    }));
    (
        ManualDecoder {
            state: Arc::clone(&state),
        },
        ManualDecoderHandle { state },
    )
}

impl<T: Send + 'static> Decoder for ManualDecoder<T> {
    type Output = T;

    fn configure(&mut self, _config: &DecoderConfig, sink: DecoderSink<T>) -> Result<()> {
        self.state.lock().unwrap().sink = Some(sink);
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.decode_calls += 1;
        state.pending.push_back(chunk);
        Ok(())
    }

    fn decode_queue_size(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.pending.clear();
    }
}

impl<T> ManualDecoderHandle<T> {
    /// Decode the oldest pending chunk into whatever `make` returns
    pub fn complete_next(&self, make: impl FnOnce(&EncodedChunk) -> T) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(chunk) = state.pending.pop_front() else {
            return false;
        };
        let unit = make(&chunk);
        state.sink.as_ref().is_some_and(|sink| sink.output(unit))
    }

    /// Report a decode failure through the sink
    pub fn fail(&self, track: Track, message: &str) {
        let state = self.state.lock().unwrap();
        if let Some(sink) = &state.sink {
            sink.error(Error::decode(track, message));
        }
    }

    pub fn decode_calls(&self) -> usize {
        self.state.lock().unwrap().decode_calls
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

/// Shared record of released frame timestamps
#[derive(Clone, Default)]
pub struct ReleaseLog(Arc<Mutex<Vec<i64>>>);

impl ReleaseLog {
    pub fn frame(&self, timestamp_us: i64) -> TestFrame {
        TestFrame {
            timestamp_us,
            log: self.clone(),
        }
    }

    pub fn released(&self) -> Vec<i64> {
        self.0.lock().unwrap().clone()
    }

    /// How many times the frame at `timestamp_us` was released
    pub fn count(&self, timestamp_us: i64) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|ts| **ts == timestamp_us)
            .count()
    }
}

#[derive(Debug)]
pub struct TestFrame {
    pub timestamp_us: i64,
    log: ReleaseLog,
}

impl std::fmt::Debug for ReleaseLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReleaseLog").field(&self.released()).finish()
    }
}

impl VideoFrame for TestFrame {
    fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    fn close(self) {
        self.log.0.lock().unwrap().push(self.timestamp_us);
    }
}

/// Audio backend that only renders when the test asks
#[derive(Clone, Default)]
pub struct ManualOutput {
    pump: Arc<Mutex<Option<OutputPump>>>,
    stopped: Arc<Mutex<bool>>,
}

impl ManualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one quantum of `samples` interleaved samples
    ///
    /// # Returns
    /// Samples taken from the ring buffer (0 before start or after stop)
    pub fn render(&self, samples: usize) -> usize {
        let mut out = vec![0.0f32; samples];
        match self.pump.lock().unwrap().as_mut() {
            Some(pump) => pump.render(&mut out),
            None => 0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.pump.lock().unwrap().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap()
    }
}

impl AudioBackend for ManualOutput {
    fn name(&self) -> &str {
        "manual"
    }

    fn start(&mut self, pump: OutputPump) -> Result<()> {
        *self.pump.lock().unwrap() = Some(pump);
        Ok(())
    }

    fn stop(&mut self) {
        self.pump.lock().unwrap().take();
        *self.stopped.lock().unwrap() = true;
    }
}
