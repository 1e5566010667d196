//! Audio file source using symphonia
//!
//! `SymphoniaDemuxer` probes a file and yields the packets of its first audio
//! track as chunks. `SymphoniaDecoder` turns those packets back into planar
//! f32 audio on a decode worker.
//!
//! The codec parameters needed to build a symphonia decoder are richer than
//! `DecoderConfig`, so the decoder is constructed from the demuxer
//! (`SymphoniaDecoder::for_demuxer`) and `configure` checks the two agree.

use super::worker::DecodeWorker;
use super::{Decoder, DecoderConfig, DecoderSink, Demuxer, EncodedChunk, PlanarAudio};
use crate::error::{Error, Result};
use async_trait::async_trait;
use avsync_common::events::Track;
use std::path::{Path, PathBuf};
use symphonia::core::audio::Signal;
use symphonia::core::codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use tracing::{debug, trace};

/// Demuxer over a local audio file
pub struct SymphoniaDemuxer {
    path: PathBuf,
    format: Option<Box<dyn FormatReader>>,
    track_id: u32,
    params: Option<CodecParameters>,
    time_base: Option<TimeBase>,
}

impl SymphoniaDemuxer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: None,
            track_id: 0,
            params: None,
            time_base: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Codec parameters of the selected track (after `initialize`)
    pub fn codec_parameters(&self) -> Result<&CodecParameters> {
        self.params
            .as_ref()
            .ok_or_else(|| Error::InvalidState("demuxer not initialized".to_string()))
    }
}

/// Packet time in `time_base` units to microseconds
fn timestamp_us(time_base: Option<TimeBase>, ts: u64) -> i64 {
    match time_base {
        Some(tb) => {
            let time = tb.calc_time(ts);
            (time.seconds as f64 * 1_000_000.0 + time.frac * 1_000_000.0).round() as i64
        }
        None => 0,
    }
}

fn codec_name(params: &CodecParameters) -> String {
    symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|descriptor| descriptor.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl Demuxer for SymphoniaDemuxer {
    async fn initialize(&mut self) -> Result<()> {
        if self.format.is_some() {
            return Ok(());
        }
        debug!("Probing audio file: {}", self.path.display());

        let file = std::fs::File::open(&self.path).map_err(|e| {
            Error::demux(
                Track::Audio,
                format!("Failed to open file {}: {}", self.path.display(), e),
            )
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = self.path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::demux(Track::Audio, format!("Failed to probe format: {}", e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::demux(Track::Audio, "No audio track found"))?;

        self.track_id = track.id;
        self.time_base = track
            .codec_params
            .time_base
            .or_else(|| track.codec_params.sample_rate.map(|rate| TimeBase::new(1, rate)));
        self.params = Some(track.codec_params.clone());
        self.format = Some(format);

        debug!(
            "Selected track {} ({}) from {}",
            self.track_id,
            self.params.as_ref().map(codec_name).unwrap_or_default(),
            self.path.display()
        );
        Ok(())
    }

    fn decoder_config(&self) -> Result<DecoderConfig> {
        let params = self.codec_parameters()?;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::demux(Track::Audio, "Sample rate not found"))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| Error::demux(Track::Audio, "Channel count not found"))?;

        Ok(DecoderConfig::Audio {
            codec: codec_name(params),
            sample_rate,
            channels,
            description: params.extra_data.as_ref().map(|d| d.to_vec()),
        })
    }

    async fn next_chunk(&mut self) -> Result<Option<EncodedChunk>> {
        let track_id = self.track_id;
        let time_base = self.time_base;
        let format = self
            .format
            .as_mut()
            .ok_or_else(|| Error::demux(Track::Audio, "demuxer not initialized"))?;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("Reached end of file");
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::demux(
                        Track::Audio,
                        format!("Error reading packet: {}", e),
                    ))
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let ts = packet.ts();
            let dur = packet.dur();
            let data = packet.data.to_vec();
            let chunk = EncodedChunk {
                timestamp_us: timestamp_us(time_base, ts),
                duration_us: Some(timestamp_us(time_base, dur)),
                key_frame: true,
                data,
            };
            trace!("Demuxed packet @{}us ({} bytes)", chunk.timestamp_us, chunk.data.len());
            return Ok(Some(chunk));
        }
    }
}

/// Decoder for packets produced by `SymphoniaDemuxer`
pub struct SymphoniaDecoder {
    params: CodecParameters,
    track_id: u32,
    worker: Option<DecodeWorker>,
}

impl SymphoniaDecoder {
    /// Build a decoder for the demuxer's selected track
    pub fn for_demuxer(demuxer: &SymphoniaDemuxer) -> Result<Self> {
        Ok(Self {
            params: demuxer.codec_parameters()?.clone(),
            track_id: demuxer.track_id,
            worker: None,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    type Output = PlanarAudio;

    fn configure(&mut self, config: &DecoderConfig, sink: DecoderSink<PlanarAudio>) -> Result<()> {
        let (sample_rate, _channels) = config.audio_format()?;
        if config.codec() != codec_name(&self.params) {
            return Err(Error::decode(
                Track::Audio,
                format!(
                    "config codec {} does not match track codec {}",
                    config.codec(),
                    codec_name(&self.params)
                ),
            ));
        }

        let mut decoder = symphonia::default::get_codecs()
            .make(&self.params, &DecoderOptions::default())
            .map_err(|e| Error::decode(Track::Audio, format!("Failed to create decoder: {}", e)))?;

        let track_id = self.track_id;
        self.worker = Some(DecodeWorker::spawn("symphonia", sink, move |chunk: EncodedChunk| {
            let packet = Packet::new_from_slice(track_id, 0, 0, &chunk.data);
            let decoded = decoder
                .decode(&packet)
                .map_err(|e| Error::decode(Track::Audio, format!("Decode error: {}", e)))?;

            let mut planar = decoded.make_equivalent::<f32>();
            decoded.convert(&mut planar);

            let planes = (0..planar.spec().channels.count())
                .map(|ch| planar.chan(ch).to_vec())
                .collect();
            Ok(vec![PlanarAudio {
                timestamp_us: chunk.timestamp_us,
                sample_rate,
                planes,
            }])
        }));
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        match &self.worker {
            Some(worker) => worker.submit(chunk),
            None => Err(Error::InvalidState("symphonia decoder not configured".to_string())),
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
