//! File source tests against a generated WAV

use avsync_player::media::file::{SymphoniaDecoder, SymphoniaDemuxer};
use avsync_player::media::{Decoder, DecoderConfig, DecoderEvent, DecoderSink, Demuxer};
use avsync_player::Error;
use std::path::Path;
use tempfile::TempDir;

const RATE: u32 = 8_000;
const FRAMES: usize = 4_000;

/// Stereo 16-bit WAV: left at +0.5, right at -0.25
fn write_wav(path: &Path) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..FRAMES {
        writer.write_sample(16_384i16).unwrap();
        writer.write_sample(-8_192i16).unwrap();
    }
    writer.finalize().unwrap();
}

#[tokio::test]
async fn test_demuxer_reads_wav_packets_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path);

    let mut demuxer = SymphoniaDemuxer::new(&path);
    demuxer.initialize().await.unwrap();

    match demuxer.decoder_config().unwrap() {
        DecoderConfig::Audio {
            sample_rate,
            channels,
            ..
        } => {
            assert_eq!(sample_rate, RATE);
            assert_eq!(channels, 2);
        }
        other => panic!("expected audio config, got {:?}", other),
    }

    let mut timestamps = Vec::new();
    while let Some(chunk) = demuxer.next_chunk().await.unwrap() {
        assert!(!chunk.data.is_empty());
        timestamps.push(chunk.timestamp_us);
    }
    assert!(!timestamps.is_empty());
    assert_eq!(timestamps[0], 0);
    assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(*timestamps.last().unwrap() < 500_000);
}

#[tokio::test]
async fn test_decoder_restores_planar_samples() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path);

    let mut demuxer = SymphoniaDemuxer::new(&path);
    demuxer.initialize().await.unwrap();
    let config = demuxer.decoder_config().unwrap();

    let mut decoder = SymphoniaDecoder::for_demuxer(&demuxer).unwrap();
    let (sink, mut events) = DecoderSink::channel();
    decoder.configure(&config, sink).unwrap();

    let mut submitted = 0;
    while let Some(chunk) = demuxer.next_chunk().await.unwrap() {
        decoder.decode(chunk).unwrap();
        submitted += 1;
    }

    let mut frames = 0;
    for _ in 0..submitted {
        match events.recv().await {
            Some(DecoderEvent::Output(audio)) => {
                assert_eq!(audio.sample_rate, RATE);
                assert_eq!(audio.planes.len(), 2);
                assert!(audio.planes[0].iter().all(|s| (*s - 0.5).abs() < 1e-3));
                assert!(audio.planes[1].iter().all(|s| (*s + 0.25).abs() < 1e-3));
                frames += audio.planes[0].len();
            }
            other => panic!("unexpected decoder event: {:?}", other),
        }
    }
    assert_eq!(frames, FRAMES);
    assert_eq!(decoder.decode_queue_size(), 0);
    decoder.close();
}

#[tokio::test]
async fn test_missing_file_is_a_demux_error() {
    let mut demuxer = SymphoniaDemuxer::new("/nonexistent/avsync/missing.wav");
    assert!(matches!(
        demuxer.initialize().await,
        Err(Error::Demux { .. })
    ));
    assert!(demuxer.codec_parameters().is_err());
}
