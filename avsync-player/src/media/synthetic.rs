//! Synthetic sources for headless playback and tests
//!
//! - `ToneDemuxer` + `PcmDecoder`: sine tone as `pcm-f32le` chunks
//! - `TestPatternDemuxer` + `RawFrameDecoder`: moving-bar luma frames
//!
//! Both demuxers can loop. When the chunk index runs past the end of the
//! source it wraps back to 0 while timestamps keep increasing, so a looping
//! source never ends and never goes backwards in time.

use super::worker::DecodeWorker;
use super::{
    Decoder, DecoderConfig, DecoderSink, Demuxer, EncodedChunk, PlanarAudio, RawVideoFrame,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use avsync_common::events::Track;
use avsync_common::timing::frame_timestamp_us;
use std::f32::consts::TAU;
use tracing::debug;

pub const PCM_F32LE: &str = "pcm-f32le";
pub const RAW_LUMA: &str = "raw-luma";

/// Sine tone source
#[derive(Debug, Clone)]
pub struct ToneDemuxer {
    sample_rate: u32,
    channels: u16,
    frequency: f32,
    amplitude: f32,
    chunk_frames: usize,
    chunk_count: usize,
    looping: bool,
    initialized: bool,
    index: usize,
    emitted_frames: u64,
}

impl ToneDemuxer {
    /// Tone of `chunk_count` chunks, each `chunk_frames` frames long
    pub fn new(sample_rate: u32, channels: u16, frequency: f32, chunk_frames: usize, chunk_count: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frequency,
            amplitude: 0.25,
            chunk_frames,
            chunk_count,
            looping: false,
            initialized: false,
            index: 0,
            emitted_frames: 0,
        }
    }

    /// Restart from the first chunk instead of ending
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    fn render_chunk(&self, index: usize) -> Vec<u8> {
        let channels = self.channels as usize;
        let first_frame = index * self.chunk_frames;
        let mut data = Vec::with_capacity(self.chunk_frames * channels * 4);
        for i in 0..self.chunk_frames {
            let t = (first_frame + i) as f32 / self.sample_rate as f32;
            let sample = self.amplitude * (TAU * self.frequency * t).sin();
            for _ in 0..channels {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }
        data
    }
}

#[async_trait]
impl Demuxer for ToneDemuxer {
    async fn initialize(&mut self) -> Result<()> {
        if self.sample_rate == 0 || self.channels == 0 || self.chunk_frames == 0 {
            return Err(Error::demux(
                Track::Audio,
                format!(
                    "invalid tone parameters: {} Hz, {} channels, {} frames per chunk",
                    self.sample_rate, self.channels, self.chunk_frames
                ),
            ));
        }
        self.initialized = true;
        debug!(
            "Tone source: {} Hz @ {} Hz x{}, {} chunks of {} frames{}",
            self.frequency,
            self.sample_rate,
            self.channels,
            self.chunk_count,
            self.chunk_frames,
            if self.looping { ", looping" } else { "" }
        );
        Ok(())
    }

    fn decoder_config(&self) -> Result<DecoderConfig> {
        Ok(DecoderConfig::Audio {
            codec: PCM_F32LE.to_string(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            description: None,
        })
    }

    async fn next_chunk(&mut self) -> Result<Option<EncodedChunk>> {
        if !self.initialized {
            return Err(Error::demux(Track::Audio, "tone source not initialized"));
        }
        if self.index >= self.chunk_count {
            if !self.looping || self.chunk_count == 0 {
                return Ok(None);
            }
            self.index = 0;
        }

        let chunk = EncodedChunk {
            timestamp_us: frame_timestamp_us(0, self.emitted_frames, self.sample_rate),
            duration_us: Some(frame_timestamp_us(0, self.chunk_frames as u64, self.sample_rate)),
            key_frame: true,
            data: self.render_chunk(self.index),
        };
        self.index += 1;
        self.emitted_frames += self.chunk_frames as u64;
        Ok(Some(chunk))
    }
}

/// Decoder for `pcm-f32le` interleaved chunks
#[derive(Default)]
pub struct PcmDecoder {
    worker: Option<DecodeWorker>,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parse little-endian interleaved f32 bytes into planar audio
fn decode_pcm(chunk: &EncodedChunk, sample_rate: u32, channels: u16) -> Result<PlanarAudio> {
    let frame_bytes = 4 * channels as usize;
    if chunk.data.len() % frame_bytes != 0 {
        return Err(Error::decode(
            Track::Audio,
            format!(
                "chunk @{}us has {} bytes, not a multiple of {}",
                chunk.timestamp_us,
                chunk.data.len(),
                frame_bytes
            ),
        ));
    }
    let samples: Vec<f32> = chunk
        .data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    PlanarAudio::from_interleaved(chunk.timestamp_us, sample_rate, channels, &samples)
}

impl Decoder for PcmDecoder {
    type Output = PlanarAudio;

    fn configure(&mut self, config: &DecoderConfig, sink: DecoderSink<PlanarAudio>) -> Result<()> {
        if config.codec() != PCM_F32LE {
            return Err(Error::decode(
                Track::Audio,
                format!("unsupported codec {}", config.codec()),
            ));
        }
        let (sample_rate, channels) = config.audio_format()?;
        self.worker = Some(DecodeWorker::spawn(PCM_F32LE, sink, move |chunk| {
            decode_pcm(&chunk, sample_rate, channels).map(|audio| vec![audio])
        }));
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        match &self.worker {
            Some(worker) => worker.submit(chunk),
            None => Err(Error::InvalidState("pcm decoder not configured".to_string())),
        }
    }

    fn decode_queue_size(&self) -> usize {
        self.worker.as_ref().map_or(0, DecodeWorker::queue_size)
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.close();
        }
    }
}

/// Moving vertical bar test pattern
#[derive(Debug, Clone)]
pub struct TestPatternDemuxer {
    width: u32,
    height: u32,
    frame_interval_us: i64,
    frame_count: usize,
    looping: bool,
    initialized: bool,
    index: usize,
    emitted: u64,
}

impl TestPatternDemuxer {
    pub fn new(width: u32, height: u32, frame_interval_us: i64, frame_count: usize) -> Self {
        Self {
            width,
            height,
            frame_interval_us,
            frame_count,
            looping: false,
            initialized: false,
            index: 0,
            emitted: 0,
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

#[async_trait]
impl Demuxer for TestPatternDemuxer {
    async fn initialize(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.frame_interval_us <= 0 {
            return Err(Error::demux(
                Track::Video,
                format!(
                    "invalid pattern parameters: {}x{}, {}us interval",
                    self.width, self.height, self.frame_interval_us
                ),
            ));
        }
        self.initialized = true;
        Ok(())
    }

    fn decoder_config(&self) -> Result<DecoderConfig> {
        Ok(DecoderConfig::Video {
            codec: RAW_LUMA.to_string(),
            width: self.width,
            height: self.height,
            description: None,
        })
    }

    async fn next_chunk(&mut self) -> Result<Option<EncodedChunk>> {
        if !self.initialized {
            return Err(Error::demux(Track::Video, "test pattern not initialized"));
        }
        if self.index >= self.frame_count {
            if !self.looping || self.frame_count == 0 {
                return Ok(None);
            }
            self.index = 0;
        }

        let chunk = EncodedChunk {
            timestamp_us: self.emitted as i64 * self.frame_interval_us,
            duration_us: Some(self.frame_interval_us),
            key_frame: true,
            data: (self.index as u32).to_le_bytes().to_vec(),
        };
        self.index += 1;
        self.emitted += 1;
        Ok(Some(chunk))
    }
}

/// Decoder for `raw-luma` pattern chunks
#[derive(Default)]
pub struct RawFrameDecoder {
    worker: Option<DecodeWorker>,
}

impl RawFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

fn render_pattern(chunk: &EncodedChunk, width: u32, height: u32) -> Result<RawVideoFrame> {
    let bytes: [u8; 4] = chunk.data.as_slice().try_into().map_err(|_| {
        Error::decode(
            Track::Video,
            format!("pattern chunk @{}us has {} bytes", chunk.timestamp_us, chunk.data.len()),
        )
    })?;
    let bar_x = u32::from_le_bytes(bytes) % width;

    let mut pixels = vec![16u8; (width * height) as usize];
    for row in pixels.chunks_exact_mut(width as usize) {
        row[bar_x as usize] = 235;
    }
    Ok(RawVideoFrame {
        timestamp_us: chunk.timestamp_us,
        width,
        height,
        pixels,
    })
}

impl Decoder for RawFrameDecoder {
    type Output = RawVideoFrame;

    fn configure(&mut self, config: &DecoderConfig, sink: DecoderSink<RawVideoFrame>) -> Result<()> {
        let (width, height) = match config {
            DecoderConfig::Video {
                codec,
                width,
                height,
                ..
            } if codec == RAW_LUMA => (*width, *height),
            other => {
                return Err(Error::decode(
                    Track::Video,
                    format!("unsupported codec {}", other.codec()),
                ))
            }
        };
        self.worker = Some(DecodeWorker::spawn(RAW_LUMA, sink, move |chunk| {
            render_pattern(&chunk, width, height).map(|frame| vec![frame])
        }));
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        match &self.worker {
            Some(worker) => worker.submit(chunk),
            None => Err(Error::InvalidState("raw frame decoder not configured".to_string())),
        }
    }

    fn decode_queue_size(&self) -> usize {
        self.worker.as_ref().map_or(0, DecodeWorker::queue_size)
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioData, DecoderEvent};

    #[tokio::test]
    async fn test_tone_chunks_end_without_looping() {
        let mut demuxer = ToneDemuxer::new(1_000, 2, 100.0, 10, 2);
        demuxer.initialize().await.unwrap();

        let first = demuxer.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.timestamp_us, 0);
        assert_eq!(first.data.len(), 10 * 2 * 4);

        let second = demuxer.next_chunk().await.unwrap().unwrap();
        assert_eq!(second.timestamp_us, 10_000);
        assert!(demuxer.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_looping_wraps_index_with_continued_timestamps() {
        let mut demuxer = TestPatternDemuxer::new(4, 2, 40_000, 2).looping(true);
        demuxer.initialize().await.unwrap();

        let mut chunks = Vec::new();
        for _ in 0..5 {
            chunks.push(demuxer.next_chunk().await.unwrap().unwrap());
        }
        let timestamps: Vec<i64> = chunks.iter().map(|c| c.timestamp_us).collect();
        assert_eq!(timestamps, vec![0, 40_000, 80_000, 120_000, 160_000]);
        // Index wrapped back to the first frame's payload
        assert_eq!(chunks[2].data, chunks[0].data);
    }

    #[tokio::test]
    async fn test_next_chunk_before_initialize_fails() {
        let mut demuxer = ToneDemuxer::new(48_000, 2, 440.0, 480, 1);
        assert!(matches!(
            demuxer.next_chunk().await,
            Err(Error::Demux { track: Track::Audio, .. })
        ));
    }

    #[tokio::test]
    async fn test_pcm_decoder_round_trip() {
        let mut demuxer = ToneDemuxer::new(8_000, 2, 440.0, 16, 1);
        demuxer.initialize().await.unwrap();
        let config = demuxer.decoder_config().unwrap();
        let chunk = demuxer.next_chunk().await.unwrap().unwrap();

        let (sink, mut rx) = DecoderSink::channel();
        let mut decoder = PcmDecoder::new();
        decoder.configure(&config, sink).unwrap();
        decoder.decode(chunk).unwrap();

        match rx.recv().await {
            Some(DecoderEvent::Output(audio)) => {
                assert_eq!(audio.number_of_frames(), 16);
                assert_eq!(audio.number_of_channels(), 2);
                assert_eq!(audio.planes[0], audio.planes[1]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        decoder.close();
    }

    #[tokio::test]
    async fn test_pcm_decoder_rejects_truncated_chunk() {
        let config = DecoderConfig::Audio {
            codec: PCM_F32LE.to_string(),
            sample_rate: 8_000,
            channels: 2,
            description: None,
        };
        let (sink, mut rx) = DecoderSink::channel();
        let mut decoder = PcmDecoder::new();
        decoder.configure(&config, sink).unwrap();
        decoder
            .decode(EncodedChunk {
                timestamp_us: 0,
                duration_us: None,
                key_frame: true,
                data: vec![0; 6],
            })
            .unwrap();

        assert!(matches!(rx.recv().await, Some(DecoderEvent::Error(Error::Decode { .. }))));
    }

    #[tokio::test]
    async fn test_pattern_frame_has_bar() {
        let mut demuxer = TestPatternDemuxer::new(8, 2, 40_000, 4);
        demuxer.initialize().await.unwrap();
        demuxer.next_chunk().await.unwrap();
        let chunk = demuxer.next_chunk().await.unwrap().unwrap();

        let frame = render_pattern(&chunk, 8, 2).unwrap();
        assert_eq!(frame.timestamp_us, 40_000);
        assert_eq!(frame.pixels[1], 235);
        assert_eq!(frame.pixels[8 + 1], 235);
        assert_eq!(frame.pixels[0], 16);
    }

    #[test]
    fn test_unconfigured_decoder_rejects_decode() {
        let mut decoder = RawFrameDecoder::new();
        let result = decoder.decode(EncodedChunk {
            timestamp_us: 0,
            duration_us: None,
            key_frame: true,
            data: vec![0; 4],
        });
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }
}
