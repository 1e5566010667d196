//! avsync-play - headless A/V playback driver
//!
//! Plays an audio file (or a generated tone) against a moving-bar test
//! pattern, keeping the pattern in step with the audio output clock.
//! Frames are "painted" into a counter, so the binary runs without a display;
//! audio goes to the null output unless built with the `device` feature.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use avsync_common::events::{SessionEvent, Track};
use avsync_player::audio::{AudioBackend, NullOutput};
use avsync_player::config::PlayerConfig;
use avsync_player::media::file::{SymphoniaDecoder, SymphoniaDemuxer};
use avsync_player::media::synthetic::{PcmDecoder, RawFrameDecoder, TestPatternDemuxer, ToneDemuxer};
use avsync_player::media::{Decoder, Demuxer, PlanarAudio, RawVideoFrame};
use avsync_player::{PlaybackSession, SessionSources};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for avsync-play
#[derive(Parser, Debug)]
#[command(name = "avsync-play")]
#[command(about = "Headless audio/video sync player")]
#[command(version)]
struct Args {
    /// Audio file to play; a sine tone is generated when omitted
    input: Option<PathBuf>,

    /// Bootstrap config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Audio output
    #[arg(short, long, value_enum, default_value_t = OutputKind::Null)]
    output: OutputKind,

    /// Output device name (device output only)
    #[arg(long, env = "AVSYNC_DEVICE")]
    device: Option<String>,

    /// Stop after this many seconds of playback
    #[arg(short, long)]
    duration: Option<f64>,

    /// Tone frequency in Hz
    #[arg(long, default_value = "440")]
    tone_hz: f32,

    /// Tone length in seconds
    #[arg(long, default_value = "10")]
    tone_secs: u32,

    /// Test pattern frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// List output devices and exit
    #[cfg(feature = "device")]
    #[arg(long)]
    list_devices: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputKind {
    Null,
    #[cfg(feature = "device")]
    Device,
}

const TONE_RATE: u32 = 48_000;
const TONE_CHUNK_FRAMES: usize = 1024;
const PATTERN_WIDTH: u32 = 64;
const PATTERN_HEIGHT: u32 = 36;

/// What ended the playback loop
#[derive(Debug)]
enum Stop {
    Interrupted,
    Elapsed,
    Finished,
    Failed(String),
}

/// Frames handed to the painter
#[derive(Default)]
struct PaintCounter {
    painted: AtomicU64,
    last_timestamp_us: AtomicI64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = PlayerConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config.logging.level);

    info!(
        "avsync-play {} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    #[cfg(feature = "device")]
    if args.list_devices {
        for name in avsync_player::audio::DeviceOutput::list_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    if args.fps == 0 {
        anyhow::bail!("--fps must be at least 1");
    }

    let counter = Arc::new(PaintCounter::default());
    let sources = build_sources(&args, &config, Arc::clone(&counter)).await?;

    let mut session = PlaybackSession::start(sources, &config)
        .await
        .context("Failed to start playback session")?;
    let mut events = session.subscribe();
    info!("Session {} buffering", session.id());

    if let Err(e) = session.ready().await {
        return match session.shutdown().await {
            Err(cause) => Err(cause).context("Session failed during initial buffering"),
            Ok(()) => Err(e).context("Session ended during initial buffering"),
        };
    }
    session.play().context("Failed to start playback")?;

    let stop = run(&session, &mut events, args.duration).await;
    info!("Stopping playback: {:?}", stop);

    let media_time = session.media_time();
    let frames_rendered = session.output_clock().frames_rendered();
    let result = session.shutdown().await;

    info!(
        "Played {:.2}s of media ({} audio frames rendered), painted {} video frames (last @{}us)",
        media_time,
        frames_rendered,
        counter.painted.load(Ordering::Relaxed),
        counter.last_timestamp_us.load(Ordering::Relaxed)
    );

    result.context("Playback failed")?;
    if let Stop::Failed(message) = stop {
        anyhow::bail!("Playback failed: {}", message);
    }
    Ok(())
}

/// Registry with an EnvFilter; RUST_LOG wins over the configured level
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("avsync_player={level},avsync_common={level},avsync_play={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_sources(
    args: &Args,
    config: &PlayerConfig,
    counter: Arc<PaintCounter>,
) -> Result<SessionSources> {
    let (audio_demuxer, audio_decoder) = build_audio(args).await?;

    let frame_interval_us = 1_000_000 / i64::from(args.fps);
    let video_demuxer = TestPatternDemuxer::new(
        PATTERN_WIDTH,
        PATTERN_HEIGHT,
        frame_interval_us,
        PATTERN_WIDTH as usize,
    )
    .looping(true);

    let painter = move |frame: &RawVideoFrame| {
        counter.painted.fetch_add(1, Ordering::Relaxed);
        counter
            .last_timestamp_us
            .store(frame.timestamp_us, Ordering::Relaxed);
    };

    Ok(SessionSources {
        audio_demuxer,
        audio_decoder,
        video_demuxer: Box::new(video_demuxer),
        video_decoder: Box::new(RawFrameDecoder::new()),
        painter: Box::new(painter),
        output: build_output(args, config),
    })
}

type AudioSource = (Box<dyn Demuxer>, Box<dyn Decoder<Output = PlanarAudio>>);

async fn build_audio(args: &Args) -> Result<AudioSource> {
    let Some(path) = &args.input else {
        let chunks = (args.tone_secs as usize * TONE_RATE as usize).div_ceil(TONE_CHUNK_FRAMES);
        info!("Playing {} Hz tone for {}s", args.tone_hz, args.tone_secs);
        let demuxer: Box<dyn Demuxer> =
            Box::new(ToneDemuxer::new(TONE_RATE, 2, args.tone_hz, TONE_CHUNK_FRAMES, chunks));
        let decoder: Box<dyn Decoder<Output = PlanarAudio>> = Box::new(PcmDecoder::new());
        return Ok((demuxer, decoder));
    };

    // The decoder is built from the probed track, so probe up front
    let mut demuxer = SymphoniaDemuxer::new(path);
    demuxer
        .initialize()
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let decoder: Box<dyn Decoder<Output = PlanarAudio>> =
        Box::new(SymphoniaDecoder::for_demuxer(&demuxer)?);
    info!("Playing {}", path.display());
    Ok((Box::new(demuxer) as Box<dyn Demuxer>, decoder))
}

fn build_output(args: &Args, config: &PlayerConfig) -> Box<dyn AudioBackend> {
    match args.output {
        OutputKind::Null => {
            if args.device.is_some() {
                warn!("--device ignored for the null output");
            }
            Box::new(NullOutput::new(config.audio.render_quantum_frames))
        }
        #[cfg(feature = "device")]
        OutputKind::Device => Box::new(avsync_player::audio::DeviceOutput::new(args.device.clone())),
    }
}

/// Drive the session until interrupted, the time limit, the end of the
/// audio, or a terminal error
async fn run(
    session: &PlaybackSession,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    duration: Option<f64>,
) -> Stop {
    let limit = async {
        match duration {
            Some(seconds) => tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(limit);

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut drain_check = tokio::time::interval(Duration::from_millis(100));
    let mut audio_ended = false;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Ctrl+C handler failed: {}", e);
                }
                return Stop::Interrupted;
            }
            _ = &mut limit => return Stop::Elapsed,
            event = events.recv() => match event {
                Ok(SessionEvent::Error { track, message, .. }) => {
                    return Stop::Failed(format!("{:?}: {}", track, message));
                }
                Ok(SessionEvent::StreamEnded { track, .. }) => {
                    info!("{:?} stream ended", track);
                    audio_ended |= track == Track::Audio;
                }
                Ok(SessionEvent::BufferStats {
                    audio_health,
                    video_queue_len,
                    video_frames_dropped,
                    video_empty_renders,
                    ..
                }) => {
                    info!(
                        "t={:.2}s audio buffer {:.0}% | video queue {} dropped {} empty {}",
                        session.media_time(),
                        audio_health * 100.0,
                        video_queue_len,
                        video_frames_dropped,
                        video_empty_renders
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Event stream lagged by {} events", skipped),
                Err(RecvError::Closed) => return Stop::Failed("event bus closed".to_string()),
            },
            _ = drain_check.tick() => {
                if session.is_halted() {
                    return Stop::Failed("session halted".to_string());
                }
                if audio_ended && session.buffer_health() == 0.0 {
                    return Stop::Finished;
                }
            }
        }
    }
}
