//! # avsync common library
//!
//! Shared code for the avsync workspace:
//! - Error type used by configuration and event plumbing
//! - Configuration file resolution and TOML loading
//! - Time unit conversions (microseconds, seconds, sample frames)
//! - Session event types and the broadcast `EventBus`

pub mod config;
pub mod error;
pub mod events;
pub mod timing;

pub use error::{Error, Result};
pub use events::{EventBus, SessionEvent};
