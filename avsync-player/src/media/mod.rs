//! Demuxer/decoder boundary
//!
//! The renderers treat container parsing and codec internals as external
//! collaborators. This module defines what they consume:
//!
//! - `Demuxer`: async source of encoded chunks in presentation order
//! - `Decoder`: fire-and-forget decode with results delivered through a
//!   `DecoderSink` in submission order
//! - `AudioData` / `VideoFrame`: decoded units with a consuming `close`
//!
//! Concrete implementations live in the submodules.

pub mod file;
pub mod synthetic;
pub mod worker;

use crate::error::{Error, Result};
use async_trait::async_trait;
use avsync_common::events::Track;
use tokio::sync::mpsc;

/// One encoded unit as produced by a demuxer
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,

    /// Duration in microseconds, if the container reports it
    pub duration_us: Option<i64>,

    /// Independently decodable unit
    pub key_frame: bool,

    pub data: Vec<u8>,
}

/// Decoder configuration read from the container
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderConfig {
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u16,
        /// Out-of-band codec description bytes
        description: Option<Vec<u8>>,
    },
    Video {
        codec: String,
        width: u32,
        height: u32,
        description: Option<Vec<u8>>,
    },
}

impl DecoderConfig {
    pub fn codec(&self) -> &str {
        match self {
            DecoderConfig::Audio { codec, .. } | DecoderConfig::Video { codec, .. } => codec,
        }
    }

    pub fn track(&self) -> Track {
        match self {
            DecoderConfig::Audio { .. } => Track::Audio,
            DecoderConfig::Video { .. } => Track::Video,
        }
    }

    /// (sample_rate, channels) of an audio config
    pub fn audio_format(&self) -> Result<(u32, u16)> {
        match self {
            DecoderConfig::Audio {
                sample_rate,
                channels,
                ..
            } => {
                if *sample_rate == 0 || *channels == 0 {
                    return Err(Error::FormatMismatch(format!(
                        "audio config has {} Hz / {} channels",
                        sample_rate, channels
                    )));
                }
                Ok((*sample_rate, *channels))
            }
            DecoderConfig::Video { codec, .. } => Err(Error::FormatMismatch(format!(
                "expected an audio config, got video codec {}",
                codec
            ))),
        }
    }
}

/// Source of encoded chunks
#[async_trait]
pub trait Demuxer: Send {
    /// Parse container metadata; must complete before any other call
    async fn initialize(&mut self) -> Result<()>;

    /// Decoder configuration for the selected track
    fn decoder_config(&self) -> Result<DecoderConfig>;

    /// Next chunk in presentation order
    ///
    /// `Ok(None)` marks end of stream. Dropping the returned future cancels
    /// the read.
    async fn next_chunk(&mut self) -> Result<Option<EncodedChunk>>;
}

/// Event delivered by a decoder
#[derive(Debug)]
pub enum DecoderEvent<T> {
    Output(T),
    Error(Error),
}

/// Output side of a decoder, handed over in `Decoder::configure`
pub struct DecoderSink<T> {
    tx: mpsc::UnboundedSender<DecoderEvent<T>>,
}

impl<T> Clone for DecoderSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> DecoderSink<T> {
    /// Create a sink and the receiver the renderer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DecoderEvent<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a decoded unit; returns false if the renderer is gone
    pub fn output(&self, unit: T) -> bool {
        self.tx.send(DecoderEvent::Output(unit)).is_ok()
    }

    /// Report a decode failure
    pub fn error(&self, error: Error) -> bool {
        self.tx.send(DecoderEvent::Error(error)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Pull a failure the decoder already reported out of its event channel
///
/// A decoder that failed stops accepting work, so `decode` then fails with a
/// generic error while the real cause is still queued. Outputs queued ahead
/// of it are handed to `release`.
pub(crate) fn take_reported_error<T>(
    events: &mut mpsc::UnboundedReceiver<DecoderEvent<T>>,
    mut release: impl FnMut(T),
) -> Option<Error> {
    while let Ok(event) = events.try_recv() {
        match event {
            DecoderEvent::Output(unit) => release(unit),
            DecoderEvent::Error(error) => return Some(error),
        }
    }
    None
}

/// Codec decoder
///
/// `decode` only queues work. Outputs and errors arrive through the sink
/// passed to `configure`, in submission order, and each output carries the
/// timestamp of the chunk it was decoded from.
pub trait Decoder: Send {
    type Output: Send + 'static;

    fn configure(&mut self, config: &DecoderConfig, sink: DecoderSink<Self::Output>) -> Result<()>;

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()>;

    /// Chunks submitted but not yet decoded
    fn decode_queue_size(&self) -> usize;

    /// Stop decoding and drop pending work
    fn close(&mut self);
}

/// Decoded audio unit in channel-planar layout
pub trait AudioData: Send + 'static {
    fn timestamp_us(&self) -> i64;
    fn sample_rate(&self) -> u32;
    fn number_of_frames(&self) -> usize;
    fn number_of_channels(&self) -> u16;

    /// Copy one channel plane into `dest` (`dest.len() >= number_of_frames()`)
    fn copy_plane_to(&self, channel: usize, dest: &mut [f32]) -> Result<()>;

    /// Release the unit's resources
    fn close(self);
}

/// Decoded video frame
pub trait VideoFrame: Send + 'static {
    fn timestamp_us(&self) -> i64;

    /// Release the frame's resources
    fn close(self);
}

/// Heap-backed planar audio
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarAudio {
    pub timestamp_us: i64,
    pub sample_rate: u32,
    /// One vector per channel, all the same length
    pub planes: Vec<Vec<f32>>,
}

impl PlanarAudio {
    /// Build from channel-interleaved samples
    pub fn from_interleaved(
        timestamp_us: i64,
        sample_rate: u32,
        channels: u16,
        samples: &[f32],
    ) -> Result<Self> {
        let channels = channels as usize;
        if channels == 0 || samples.len() % channels != 0 {
            return Err(Error::FormatMismatch(format!(
                "{} interleaved samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        let frames = samples.len() / channels;
        let mut planes = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (plane, sample) in planes.iter_mut().zip(frame) {
                plane.push(*sample);
            }
        }
        Ok(Self {
            timestamp_us,
            sample_rate,
            planes,
        })
    }
}

impl AudioData for PlanarAudio {
    fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn number_of_frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    fn number_of_channels(&self) -> u16 {
        self.planes.len() as u16
    }

    fn copy_plane_to(&self, channel: usize, dest: &mut [f32]) -> Result<()> {
        let plane = self.planes.get(channel).ok_or_else(|| {
            Error::FormatMismatch(format!(
                "channel {} out of range ({} planes)",
                channel,
                self.planes.len()
            ))
        })?;
        if dest.len() < plane.len() {
            return Err(Error::FormatMismatch(format!(
                "plane of {} frames does not fit {} slots",
                plane.len(),
                dest.len()
            )));
        }
        dest[..plane.len()].copy_from_slice(plane);
        Ok(())
    }

    fn close(self) {}
}

/// Decoded 8-bit luma frame
#[derive(Debug, Clone, PartialEq)]
pub struct RawVideoFrame {
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl VideoFrame for RawVideoFrame {
    fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    fn close(self) {}
}
