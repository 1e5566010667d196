//! Playback session orchestration
//!
//! Wires the renderers, the audio output and the media clock together and
//! runs them as two tokio tasks.
//!
//! **Audio control task:**
//! - Runs the audio fill cycle on start, after every decoded unit, on play,
//!   and when a requested recheck delay elapses
//! - Handles play/pause: flips the renderer, the output clock and publishes a
//!   clock sync immediately
//! - Publishes a clock sync and a `BufferStats` event every sync interval
//! - Resolves the ready signal once both tracks finished initial buffering
//!
//! **Video render task:**
//! - Ticks at the frame interval: extrapolates the media clock, picks a frame,
//!   paints it, then tops the lookahead up
//! - Queues decoded frames as they arrive
//!
//! **Errors:** a demux/decode failure is terminal. The failing task logs it,
//! broadcasts `SessionEvent::Error`, raises the shutdown flag so the other task
//! stops too, and returns the error, which `shutdown()` / `wait()` hand back.
//!
//! **Teardown:** raising the shutdown flag cancels any pending demuxer read
//! (the fill future is raced against it), closes the decoders, releases every
//! queued video frame and stops the audio output.

use crate::audio::{AudioBackend, AudioRenderer, OutputClock, OutputPump};
use crate::clock::{clock_channel, AudioClockSource, ClockFollower, ClockPublisher};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::fill::FillOutcome;
use crate::media::{AudioData, Decoder, DecoderEvent, Demuxer, PlanarAudio, RawVideoFrame, VideoFrame};
use crate::readiness::{ReadyNotifier, ReadySignal, ReadyWaiter};
use crate::ring_buffer::BufferMonitor;
use crate::video::{FramePainter, VideoRenderer};
use avsync_common::events::{PlaybackState, SessionEvent, Track};
use avsync_common::timing::seconds_to_us;
use avsync_common::EventBus;
use chrono::Utc;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Event bus capacity per subscriber
const EVENT_CAPACITY: usize = 256;

/// Recheck timer parked value when nothing is scheduled
const PARKED: Duration = Duration::from_secs(24 * 60 * 60);

/// Collaborators a session plays from
pub struct SessionSources<A: AudioData = PlanarAudio, F: VideoFrame = RawVideoFrame> {
    pub audio_demuxer: Box<dyn Demuxer>,
    pub audio_decoder: Box<dyn Decoder<Output = A>>,
    pub video_demuxer: Box<dyn Demuxer>,
    pub video_decoder: Box<dyn Decoder<Output = F>>,
    pub painter: Box<dyn FramePainter<F>>,
    pub output: Box<dyn AudioBackend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play,
    Pause,
}

/// Video task state as seen by the audio control task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct VideoStatus {
    queue_len: usize,
    frames_dropped: u64,
    empty_renders: u64,
    primed: bool,
}

/// A running playback session
pub struct PlaybackSession {
    id: Uuid,
    events: EventBus,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Arc<watch::Sender<bool>>,
    ready: ReadyWaiter,
    monitor: BufferMonitor,
    follower: ClockFollower,
    output_clock: Arc<OutputClock>,
    output: Option<Box<dyn AudioBackend>>,
    audio_task: Option<JoinHandle<Result<()>>>,
    video_task: Option<JoinHandle<Result<()>>>,
}

impl PlaybackSession {
    /// Initialize both tracks, start the audio output and spawn the tasks
    ///
    /// The session starts paused; initial buffering begins immediately.
    ///
    /// # Errors
    /// Invalid configuration, demuxer/decoder initialization failures, or an
    /// audio output that fails to start.
    pub async fn start<A, F>(sources: SessionSources<A, F>, config: &PlayerConfig) -> Result<Self>
    where
        A: AudioData,
        F: VideoFrame,
    {
        config.validate()?;
        let id = Uuid::new_v4();
        let events = EventBus::new(EVENT_CAPACITY);

        let mut audio = AudioRenderer::new(
            sources.audio_demuxer,
            sources.audio_decoder,
            config.audio_settings(),
        )?;
        let consumer = audio.initialize().await?;
        let (sample_rate, channels) = audio
            .format()
            .ok_or_else(|| Error::InvalidState("audio format unknown after initialize".to_string()))?;
        let monitor = audio
            .monitor()
            .ok_or_else(|| Error::InvalidState("audio ring buffer missing after initialize".to_string()))?;

        let mut video = VideoRenderer::new(
            sources.video_demuxer,
            sources.video_decoder,
            config.video_settings(),
        )?;
        video.initialize().await?;

        let output_clock = Arc::new(OutputClock::new(sample_rate, config.base_latency()));
        let mut output = sources.output;
        output.start(OutputPump::new(consumer, Arc::clone(&output_clock), channels))?;
        info!(
            "Session {} started: {} Hz x{} audio via {} output",
            id,
            sample_rate,
            channels,
            output.name()
        );

        let clock_source: Arc<dyn AudioClockSource> = output_clock.clone();
        let (publisher, follower) = clock_channel(clock_source);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notifier, ready) = ReadySignal::new();
        let (status_tx, status_rx) = watch::channel(VideoStatus::default());

        let audio_control = AudioControl {
            session_id: id,
            renderer: audio,
            commands: command_rx,
            shutdown_rx: shutdown_rx.clone(),
            shutdown: Arc::clone(&shutdown),
            publisher,
            output_clock: Arc::clone(&output_clock),
            monitor: monitor.clone(),
            events: events.clone(),
            notifier,
            video_status: status_rx,
            sync_interval: config.sync_interval(),
            stream_ended: false,
        };
        let video_render = VideoRender {
            session_id: id,
            renderer: video,
            painter: sources.painter,
            follower: follower.clone(),
            shutdown_rx,
            shutdown: Arc::clone(&shutdown),
            status: status_tx,
            events: events.clone(),
            frame_interval: config.frame_interval(),
            stream_ended: false,
        };

        let audio_task = tokio::spawn(audio_control.run());
        let video_task = tokio::spawn(video_render.run());

        Ok(Self {
            id,
            events,
            commands: command_tx,
            shutdown,
            ready,
            monitor,
            follower,
            output_clock,
            output: Some(output),
            audio_task: Some(audio_task),
            video_task: Some(video_task),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for initial buffering to complete
    pub async fn ready(&mut self) -> Result<()> {
        self.ready.wait().await
    }

    pub fn play(&self) -> Result<()> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            Error::InvalidState(format!("session {} is no longer running", self.id))
        })
    }

    /// Audio ring buffer fill ratio (`1 - available_write / capacity`)
    pub fn buffer_health(&self) -> f64 {
        self.monitor.health()
    }

    pub fn buffer_monitor(&self) -> BufferMonitor {
        self.monitor.clone()
    }

    /// Current media clock estimate in seconds
    pub fn media_time(&self) -> f64 {
        self.follower.peek(Instant::now())
    }

    pub fn output_clock(&self) -> &Arc<OutputClock> {
        &self.output_clock
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// True once a task has halted the session (error or shutdown)
    pub fn is_halted(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait until the session halts on its own, then tear it down
    ///
    /// Returns the error that halted it, if any.
    pub async fn wait(mut self) -> Result<()> {
        halted(self.shutdown.subscribe()).await;
        self.teardown().await
    }

    /// Stop both tasks and the audio output
    ///
    /// # Returns
    /// The first error a task ended with
    pub async fn shutdown(mut self) -> Result<()> {
        self.teardown().await
    }

    async fn teardown(&mut self) -> Result<()> {
        self.shutdown.send_replace(true);

        let audio = join_task("audio", self.audio_task.take()).await;
        let video = join_task("video", self.video_task.take()).await;

        if let Some(mut output) = self.output.take() {
            output.stop();
        }
        info!("Session {} shut down", self.id);
        audio.and(video)
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn join_task(name: &str, handle: Option<JoinHandle<Result<()>>>) -> Result<()> {
    match handle {
        Some(handle) => handle
            .await
            .map_err(|e| Error::TaskFailed(format!("{} task: {}", name, e)))?,
        None => Ok(()),
    }
}

/// Resolves once the shutdown flag is raised or its sender is gone
///
/// Owns its receiver, so a `select!` branch on it borrows nothing from the task.
async fn halted(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Track an error belongs to, defaulting to the task's own
fn error_track(error: &Error, default: Track) -> Track {
    match error {
        Error::Demux { track, .. } | Error::Decode { track, .. } => *track,
        _ => default,
    }
}

/// Log, broadcast and halt on a terminal task error
fn report_failure(
    session_id: Uuid,
    events: &EventBus,
    shutdown: &watch::Sender<bool>,
    track: Track,
    error: &Error,
) {
    let track = error_track(error, track);
    error!("Session {} halted by {:?} failure: {}", session_id, track, error);
    events.emit_lossy(SessionEvent::Error {
        session_id,
        track,
        message: error.to_string(),
        timestamp: Utc::now(),
    });
    shutdown.send_replace(true);
}

struct AudioControl<A: AudioData> {
    session_id: Uuid,
    renderer: AudioRenderer<A>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown: Arc<watch::Sender<bool>>,
    publisher: ClockPublisher,
    output_clock: Arc<OutputClock>,
    monitor: BufferMonitor,
    events: EventBus,
    notifier: ReadyNotifier,
    video_status: watch::Receiver<VideoStatus>,
    sync_interval: Duration,
    stream_ended: bool,
}

impl<A: AudioData> AudioControl<A> {
    async fn run(mut self) -> Result<()> {
        debug!("Audio control task started");
        let result = self.event_loop().await;
        if let Err(e) = &result {
            report_failure(self.session_id, &self.events, &self.shutdown, Track::Audio, e);
        }

        self.renderer.close();
        self.output_clock.set_running(false);
        self.publisher.publish(false);
        debug!("Audio control task stopped");
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        let recheck = tokio::time::sleep(PARKED);
        tokio::pin!(recheck);

        let mut sync_tick = tokio::time::interval(self.sync_interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut video_running = true;

        match self.fill().await? {
            ControlFlow::Break(()) => return Ok(()),
            ControlFlow::Continue(delay) => schedule(recheck.as_mut(), delay),
        }

        loop {
            let flow = tokio::select! {
                biased;

                _ = halted(self.shutdown_rx.clone()) => ControlFlow::Break(()),

                Some(command) = self.commands.recv() => self.on_command(command).await?,

                event = self.renderer.next_decoder_event() => match event {
                    Some(DecoderEvent::Output(unit)) => {
                        self.renderer.on_decoded(unit)?;
                        self.fill().await?
                    }
                    Some(DecoderEvent::Error(e)) => return Err(e),
                    None => ControlFlow::Continue(None),
                },

                _ = &mut recheck => {
                    schedule(recheck.as_mut(), None);
                    self.fill().await?
                }

                changed = self.video_status.changed(), if video_running => {
                    match changed {
                        Ok(()) => self.check_ready(),
                        Err(_) => video_running = false,
                    }
                    ControlFlow::Continue(None)
                }

                _ = sync_tick.tick() => {
                    self.publisher.publish(self.renderer.is_playing());
                    self.emit_stats();
                    ControlFlow::Continue(None)
                }
            };

            match flow {
                ControlFlow::Break(()) => return Ok(()),
                ControlFlow::Continue(Some(delay)) => schedule(recheck.as_mut(), Some(delay)),
                ControlFlow::Continue(None) => {}
            }
        }
    }

    /// Fill cycle raced against shutdown
    ///
    /// `Continue` carries the requested recheck delay.
    async fn fill(&mut self) -> Result<ControlFlow<(), Option<Duration>>> {
        let outcome = tokio::select! {
            biased;
            _ = halted(self.shutdown_rx.clone()) => return Ok(ControlFlow::Break(())),
            outcome = self.renderer.fill() => outcome?,
        };

        if outcome == FillOutcome::EndOfStream && !self.stream_ended {
            self.stream_ended = true;
            self.events.emit_lossy(SessionEvent::StreamEnded {
                session_id: self.session_id,
                track: Track::Audio,
                timestamp: Utc::now(),
            });
        }
        self.check_ready();
        Ok(ControlFlow::Continue(outcome.recheck_after()))
    }

    async fn on_command(&mut self, command: Command) -> Result<ControlFlow<(), Option<Duration>>> {
        let was_playing = self.renderer.is_playing();
        match command {
            Command::Play if !was_playing => {
                self.renderer.play();
                self.output_clock.set_running(true);
                self.publisher.publish(true);
                self.emit_state_change(PlaybackState::Paused, PlaybackState::Playing);
                info!("Playback started");
                self.fill().await
            }
            Command::Pause if was_playing => {
                self.renderer.pause();
                self.output_clock.set_running(false);
                self.publisher.publish(false);
                self.emit_state_change(PlaybackState::Playing, PlaybackState::Paused);
                info!("Playback paused");
                Ok(ControlFlow::Continue(None))
            }
            _ => {
                debug!("Ignoring {:?}: already in that state", command);
                Ok(ControlFlow::Continue(None))
            }
        }
    }

    fn check_ready(&mut self) {
        if self.notifier.is_resolved() {
            return;
        }
        if self.renderer.is_primed() && self.video_status.borrow().primed {
            if self.notifier.resolve().is_ok() {
                info!(
                    "Session {} ready: {:?} of audio buffered",
                    self.session_id,
                    self.renderer.buffered_duration()
                );
                self.events.emit_lossy(SessionEvent::Ready {
                    session_id: self.session_id,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn emit_state_change(&self, old_state: PlaybackState, new_state: PlaybackState) {
        self.events.emit_lossy(SessionEvent::PlaybackStateChanged {
            session_id: self.session_id,
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    fn emit_stats(&self) {
        let video = *self.video_status.borrow();
        self.events.emit_lossy(SessionEvent::BufferStats {
            session_id: self.session_id,
            audio_health: self.monitor.health(),
            video_queue_len: video.queue_len,
            video_frames_dropped: video.frames_dropped,
            video_empty_renders: video.empty_renders,
            timestamp: Utc::now(),
        });
    }
}

/// Arm the recheck timer, or park it when `delay` is `None`
fn schedule(timer: std::pin::Pin<&mut tokio::time::Sleep>, delay: Option<Duration>) {
    timer.reset(Instant::now() + delay.unwrap_or(PARKED));
}

struct VideoRender<F: VideoFrame> {
    session_id: Uuid,
    renderer: VideoRenderer<F>,
    painter: Box<dyn FramePainter<F>>,
    follower: ClockFollower,
    shutdown_rx: watch::Receiver<bool>,
    shutdown: Arc<watch::Sender<bool>>,
    status: watch::Sender<VideoStatus>,
    events: EventBus,
    frame_interval: Duration,
    stream_ended: bool,
}

impl<F: VideoFrame> VideoRender<F> {
    async fn run(mut self) -> Result<()> {
        debug!("Video render task started");
        let result = self.event_loop().await;
        if let Err(e) = &result {
            report_failure(self.session_id, &self.events, &self.shutdown, Track::Video, e);
        }

        self.renderer.close();
        debug!(
            "Video render task stopped: {:?}",
            self.renderer.stats()
        );
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        let mut tick = tokio::time::interval(self.frame_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if self.fill().await?.is_break() {
            return Ok(());
        }

        loop {
            let flow = tokio::select! {
                biased;

                _ = halted(self.shutdown_rx.clone()) => ControlFlow::Break(()),

                event = self.renderer.next_decoder_event() => match event {
                    Some(DecoderEvent::Output(frame)) => {
                        self.renderer.on_decoded(frame);
                        self.top_up().await?
                    }
                    Some(DecoderEvent::Error(e)) => return Err(e),
                    None => ControlFlow::Continue(()),
                },

                _ = tick.tick() => {
                    let now_us = seconds_to_us(self.follower.now());
                    let painter = &mut self.painter;
                    self.renderer.render(now_us, |frame| painter.paint(frame));
                    self.top_up().await?
                }
            };

            if flow.is_break() {
                return Ok(());
            }
        }
    }

    /// Fill if the lookahead has room, then publish status
    async fn top_up(&mut self) -> Result<ControlFlow<()>> {
        let flow = if self.renderer.needs_fill() {
            self.fill().await?
        } else {
            ControlFlow::Continue(())
        };
        self.publish_status();
        Ok(flow)
    }

    async fn fill(&mut self) -> Result<ControlFlow<()>> {
        let outcome = tokio::select! {
            biased;
            _ = halted(self.shutdown_rx.clone()) => return Ok(ControlFlow::Break(())),
            outcome = self.renderer.fill() => outcome?,
        };

        if outcome == FillOutcome::EndOfStream && !self.stream_ended {
            self.stream_ended = true;
            self.events.emit_lossy(SessionEvent::StreamEnded {
                session_id: self.session_id,
                track: Track::Video,
                timestamp: Utc::now(),
            });
        }
        self.publish_status();
        Ok(ControlFlow::Continue(()))
    }

    fn publish_status(&self) {
        let stats = self.renderer.stats();
        let status = VideoStatus {
            queue_len: self.renderer.queue_len(),
            frames_dropped: stats.frames_dropped,
            empty_renders: stats.empty_renders,
            primed: self.renderer.is_primed(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            if status.primed && !current.primed {
                debug!("Video lookahead primed with {} frames", status.queue_len);
            }
            *current = status;
            true
        });
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("buffer_health", &self.buffer_health())
            .field("halted", &self.is_halted())
            .finish()
    }
}
