//! Fill-cycle state shared by the audio and video renderers
//!
//! A fill cycle pulls chunks from the demuxer and submits them to the decoder
//! until the renderer's buffer target or the decoder's in-flight ceiling is
//! reached. The state doubles as the single-in-flight guard: a cycle entered
//! while another is `Filling` does nothing.

use std::time::Duration;

/// Renderer fill state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    /// No cycle running; a new one may start
    Idle,

    /// A cycle is pulling/submitting chunks
    ///
    /// Only observed from outside if a fill future was dropped mid-cycle,
    /// which the session does at teardown.
    Filling,

    /// Demuxer reported end of stream; nothing left to pull
    Drained,
}

/// Why a fill cycle stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Buffer target reached
    ///
    /// `recheck_after` is when the driver should try again, `None` while paused
    /// or when decoder output alone drives the next cycle.
    Saturated { recheck_after: Option<Duration> },

    /// Decoder in-flight ceiling reached; decoder output will free capacity
    Throttled { recheck_after: Option<Duration> },

    /// Demuxer has no more chunks
    EndOfStream,

    /// Another cycle is already running
    Busy,
}

impl FillOutcome {
    /// Follow-up delay requested by this outcome, if any
    pub fn recheck_after(&self) -> Option<Duration> {
        match self {
            FillOutcome::Saturated { recheck_after } | FillOutcome::Throttled { recheck_after } => {
                *recheck_after
            }
            FillOutcome::EndOfStream | FillOutcome::Busy => None,
        }
    }
}
