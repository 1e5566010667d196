//! Session event types and EventBus
//!
//! Events are broadcast via `EventBus` (tokio::broadcast) and can be
//! serialized to JSON for logging or an external control surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Which media track an event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Audio,
    Video,
}

/// Playback state as seen by the orchestration layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
}

/// avsync session events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Initial buffering complete, playback can start
    Ready {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Playback state changed (Playing ↔ Paused)
    PlaybackStateChanged {
        session_id: Uuid,
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// A track's demuxer reported end of stream
    StreamEnded {
        session_id: Uuid,
        track: Track,
        timestamp: DateTime<Utc>,
    },

    /// Terminal demux/decode failure; the session halts
    Error {
        session_id: Uuid,
        track: Track,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Periodic buffer diagnostics
    BufferStats {
        session_id: Uuid,
        /// Audio ring buffer health (0.0 = empty, 1.0 = full)
        audio_health: f64,
        /// Decoded video frames waiting in the lookahead queue
        video_queue_len: usize,
        /// Frames released without ever being painted
        video_frames_dropped: u64,
        /// Render ticks that found no frame to paint
        video_empty_renders: u64,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::Ready { session_id, .. }
            | SessionEvent::PlaybackStateChanged { session_id, .. }
            | SessionEvent::StreamEnded { session_id, .. }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::BufferStats { session_id, .. } => *session_id,
        }
    }

    /// Serialize to a single-line JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SessionEvent,
    ) -> Result<usize, broadcast::error::SendError<SessionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
