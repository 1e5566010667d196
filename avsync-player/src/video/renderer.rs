//! Video lookahead and frame selection
//!
//! Keeps a few decoded frames ahead of the presentation clock and answers
//! "which frame should be on screen at time t".
//!
//! **Fill cycle:** same shape as the audio one. While queued plus in-flight
//! frames stay under `lookahead_frames` and fewer than `max_in_flight` chunks
//! are in flight, pull and submit. A chunk is in flight from submission until
//! a frame with its timestamp (or a later one) is queued, so frames waiting in
//! the decoder's event channel still count against the lookahead.
//!
//! **Selection:** the queue is ordered by timestamp, so scanning from the
//! front for the smallest `|t - frame.timestamp|` can stop at the first frame
//! whose distance stops shrinking. Frames ahead of the chosen one in the
//! queue are released; that is what bounds memory and drops late frames.
//!
//! **Ordering:** decode order is expected to equal presentation order. A frame
//! older than the queue tail breaks that; it is logged and inserted in sorted
//! position so selection stays correct.

use crate::error::{Error, Result};
use crate::fill::{FillOutcome, FillState};
use crate::media::{
    take_reported_error, Decoder, DecoderEvent, DecoderSink, Demuxer, EncodedChunk, RawVideoFrame,
    VideoFrame,
};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Video buffering limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoBufferSettings {
    /// Decoded frames to keep queued ahead of the clock
    pub lookahead_frames: usize,

    /// Maximum chunks in flight (submitted, frame not queued yet)
    pub max_in_flight: usize,
}

impl Default for VideoBufferSettings {
    fn default() -> Self {
        Self {
            lookahead_frames: 3,
            max_in_flight: 3,
        }
    }
}

impl VideoBufferSettings {
    pub fn validate(&self) -> Result<()> {
        if self.lookahead_frames == 0 {
            return Err(Error::InvalidConfig(
                "video lookahead_frames must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(Error::InvalidConfig(
                "video max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Video renderer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoRendererStats {
    pub chunks_submitted: u64,
    pub frames_decoded: u64,
    pub frames_painted: u64,

    /// Frames released without ever being chosen
    pub frames_dropped: u64,

    /// Renders that found the queue empty
    pub empty_renders: u64,

    /// Frames that arrived older than the queue tail
    pub out_of_order: u64,
}

/// Lookahead queue fed from a demuxer/decoder pair
pub struct VideoRenderer<F: VideoFrame = RawVideoFrame> {
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn Decoder<Output = F>>,
    settings: VideoBufferSettings,
    events: Option<mpsc::UnboundedReceiver<DecoderEvent<F>>>,
    queue: VecDeque<F>,
    /// Timestamps of submitted chunks whose frame is not queued yet
    in_flight: VecDeque<i64>,
    /// Queue front has been returned by `choose_frame`
    front_chosen: bool,
    state: FillState,
    initialized: bool,
    stats: VideoRendererStats,
}

impl<F: VideoFrame> VideoRenderer<F> {
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        decoder: Box<dyn Decoder<Output = F>>,
        settings: VideoBufferSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            demuxer,
            decoder,
            settings,
            events: None,
            queue: VecDeque::with_capacity(settings.lookahead_frames + settings.max_in_flight),
            in_flight: VecDeque::with_capacity(settings.max_in_flight),
            front_chosen: false,
            state: FillState::Idle,
            initialized: false,
            stats: VideoRendererStats::default(),
        })
    }

    /// Initialize the demuxer and configure the decoder
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::InvalidState(
                "video renderer already initialized".to_string(),
            ));
        }
        self.demuxer.initialize().await?;
        let config = self.demuxer.decoder_config()?;

        let (sink, events) = DecoderSink::channel();
        self.decoder.configure(&config, sink)?;
        self.events = Some(events);
        self.initialized = true;
        debug!("Video renderer initialized: {:?}", config);
        Ok(())
    }

    /// Run one fill cycle
    pub async fn fill(&mut self) -> Result<FillOutcome> {
        match self.state {
            FillState::Filling => return Ok(FillOutcome::Busy),
            FillState::Drained => return Ok(FillOutcome::EndOfStream),
            FillState::Idle => {}
        }
        if !self.initialized {
            return Err(Error::InvalidState(
                "video renderer not initialized".to_string(),
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
            if self.queue.len() + self.in_flight.len() >= self.settings.lookahead_frames {
                return Ok(FillOutcome::Saturated {
                    recheck_after: None,
                });
            }
            if self.in_flight.len() >= self.settings.max_in_flight {
                return Ok(FillOutcome::Throttled {
                    recheck_after: None,
                });
            }

            match self.demuxer.next_chunk().await? {
                Some(chunk) => self.submit(chunk)?,
                None => {
                    debug!(
                        "Video demuxer reached end of stream after {} chunks",
                        self.stats.chunks_submitted
                    );
                    return Ok(FillOutcome::EndOfStream);
                }
            }
        }
    }

    fn submit(&mut self, chunk: EncodedChunk) -> Result<()> {
        let timestamp_us = chunk.timestamp_us;
        trace!("Submitting video chunk @{}us", timestamp_us);
        if let Err(e) = self.decoder.decode(chunk) {
            let reported = self
                .events
                .as_mut()
                .and_then(|events| take_reported_error(events, |frame: F| frame.close()));
            return Err(reported.unwrap_or(e));
        }
        self.in_flight.push_back(timestamp_us);
        self.stats.chunks_submitted += 1;
        Ok(())
    }

    /// Queue a decoded frame
    pub fn on_decoded(&mut self, frame: F) {
        self.stats.frames_decoded += 1;
        let timestamp_us = frame.timestamp_us();
        while self.in_flight.front().is_some_and(|ts| *ts <= timestamp_us) {
            self.in_flight.pop_front();
        }

        match self.queue.back() {
            Some(tail) if tail.timestamp_us() > timestamp_us => {
                self.stats.out_of_order += 1;
                warn!(
                    "Video frame @{}us arrived after frame @{}us; inserting in timestamp order",
                    timestamp_us,
                    tail.timestamp_us()
                );
                let position = self
                    .queue
                    .partition_point(|queued| queued.timestamp_us() <= timestamp_us);
                if position == 0 {
                    self.front_chosen = false;
                }
                self.queue.insert(position, frame);
            }
            Some(_) => self.queue.push_back(frame),
            None => {
                self.front_chosen = false;
                self.queue.push_back(frame);
            }
        }
    }

    /// Pick the frame to show at `timestamp_us`
    ///
    /// Releases every frame queued before the chosen one. The chosen frame
    /// stays at the front of the queue. `None` means nothing is decoded yet;
    /// the caller skips painting.
    pub fn choose_frame(&mut self, timestamp_us: i64) -> Option<&F> {
        let first = self.queue.front()?;

        let mut chosen = 0;
        let mut best = timestamp_us.abs_diff(first.timestamp_us());
        for (index, frame) in self.queue.iter().enumerate().skip(1) {
            let delta = timestamp_us.abs_diff(frame.timestamp_us());
            if delta >= best {
                break;
            }
            chosen = index;
            best = delta;
        }

        for released in 0..chosen {
            if let Some(frame) = self.queue.pop_front() {
                if released > 0 || !self.front_chosen {
                    self.stats.frames_dropped += 1;
                    trace!("Dropping late video frame @{}us", frame.timestamp_us());
                }
                frame.close();
            }
        }

        self.front_chosen = true;
        self.queue.front()
    }

    /// Choose a frame for `timestamp_us` and hand it to `paint`
    ///
    /// Selection may free lookahead room; the driver follows up with `fill`
    /// when `needs_fill()` says so.
    ///
    /// # Returns
    /// True if a frame was painted
    pub fn render<P>(&mut self, timestamp_us: i64, paint: P) -> bool
    where
        P: FnOnce(&F),
    {
        let painted = match self.choose_frame(timestamp_us) {
            Some(frame) => {
                paint(frame);
                true
            }
            None => false,
        };

        if painted {
            self.stats.frames_painted += 1;
        } else {
            self.stats.empty_renders += 1;
            debug!("No video frame for {}us, skipping paint", timestamp_us);
        }
        painted
    }

    /// Whether a fill cycle would submit more work now
    pub fn needs_fill(&self) -> bool {
        self.state == FillState::Idle
            && self.initialized
            && self.queue.len() + self.in_flight.len() < self.settings.lookahead_frames
            && self.in_flight.len() < self.settings.max_in_flight
    }

    /// Wait for the next decoder event; pends forever once the decoder is gone
    pub async fn next_decoder_event(&mut self) -> Option<DecoderEvent<F>> {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        match events.recv().await {
            Some(event) => Some(event),
            None => {
                debug!("Video decoder event channel closed");
                self.events = None;
                None
            }
        }
    }

    /// Lookahead target reached, or the stream ended with every frame decoded
    pub fn is_primed(&self) -> bool {
        self.queue.len() >= self.settings.lookahead_frames || self.is_finished()
    }

    /// End of stream reached and every submitted chunk's frame queued
    pub fn is_finished(&self) -> bool {
        self.state == FillState::Drained
            && self.in_flight.is_empty()
            && self.decoder.decode_queue_size() == 0
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Chunks submitted whose frame is not queued yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Timestamps currently queued, front first
    pub fn queued_timestamps(&self) -> Vec<i64> {
        self.queue.iter().map(|frame| frame.timestamp_us()).collect()
    }

    pub fn state(&self) -> FillState {
        self.state
    }

    pub fn stats(&self) -> VideoRendererStats {
        self.stats
    }

    /// Release every queued and undelivered frame and stop the decoder
    pub fn close(&mut self) {
        self.decoder.close();
        self.in_flight.clear();
        let released = self.queue.len();
        for frame in self.queue.drain(..) {
            frame.close();
        }
        if let Some(mut events) = self.events.take() {
            events.close();
            while let Ok(event) = events.try_recv() {
                if let DecoderEvent::Output(frame) = event {
                    frame.close();
                }
            }
        }
        if released > 0 {
            debug!("Released {} queued video frames", released);
        }
    }
}

impl<F: VideoFrame> Drop for VideoRenderer<F> {
    fn drop(&mut self) {
        self.close();
    }
}
