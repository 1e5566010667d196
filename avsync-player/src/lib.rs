//! # avsync Player Library (avsync-player)
//!
//! Streaming core that keeps decoded audio and video in sync.
//!
//! **Purpose:** Pull encoded chunks from demuxers, decode them ahead of time,
//! feed audio to a real-time output through a wait-free ring buffer, and pick
//! video frames against a media clock derived from the audio device.
//!
//! **Architecture:**
//! - `ring_buffer`: SPSC sample store, the only object shared with the audio thread
//! - `audio`: decode-ahead/backpressure controller and the output boundary
//! - `video`: lookahead queue and frame selection
//! - `clock`: latency-compensated media clock, synced across tasks
//! - `session`: task orchestration, commands, events and teardown

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod fill;
pub mod media;
pub mod readiness;
pub mod ring_buffer;
pub mod session;
pub mod video;

pub use error::{Error, Result};
pub use ring_buffer::{BufferMonitor, RingBuffer, SampleConsumer, SampleProducer};
pub use session::{PlaybackSession, SessionSources};
