//! Player configuration
//!
//! Bootstrap TOML file, every field defaulted in code. Resolution order
//! (CLI → `AVSYNC_CONFIG` → user file → system file → defaults) lives in
//! `avsync_common::config`.
//!
//! ```toml
//! [audio]
//! decode_ahead_ms = 300
//! buffer_ceiling_ms = 600
//! max_in_flight = 5
//! base_latency_ms = 0.0
//! render_quantum_frames = 128
//!
//! [video]
//! lookahead_frames = 3
//! max_in_flight = 3
//! frame_interval_ms = 16
//!
//! [clock]
//! sync_interval_ms = 1000
//!
//! [logging]
//! level = "info"
//! ```

use crate::audio::AudioBufferSettings;
use crate::error::{Error, Result};
use crate::video::VideoBufferSettings;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete player configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub clock: ClockConfig,
    pub logging: LoggingConfig,
}

/// `[audio]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AudioConfig {
    /// Buffered audio the fill cycle aims for
    #[serde(default = "default_decode_ahead_ms")]
    pub decode_ahead_ms: u64,

    /// Ring buffer size in milliseconds of audio
    #[serde(default = "default_buffer_ceiling_ms")]
    pub buffer_ceiling_ms: u64,

    /// Decoder queue ceiling (at least 2)
    #[serde(default = "default_audio_in_flight")]
    pub max_in_flight: usize,

    /// Extra output latency added to the measured device latency
    #[serde(default)]
    pub base_latency_ms: f64,

    /// Frames per output callback for the null output
    #[serde(default = "default_render_quantum")]
    pub render_quantum_frames: usize,
}

/// `[video]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VideoConfig {
    #[serde(default = "default_lookahead")]
    pub lookahead_frames: usize,

    #[serde(default = "default_video_in_flight")]
    pub max_in_flight: usize,

    /// Render tick period
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

/// `[clock]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClockConfig {
    /// How often the control task publishes a clock sync
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_decode_ahead_ms() -> u64 {
    300
}

fn default_buffer_ceiling_ms() -> u64 {
    600
}

fn default_audio_in_flight() -> usize {
    5
}

fn default_render_quantum() -> usize {
    128
}

fn default_lookahead() -> usize {
    3
}

fn default_video_in_flight() -> usize {
    3
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_sync_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            decode_ahead_ms: default_decode_ahead_ms(),
            buffer_ceiling_ms: default_buffer_ceiling_ms(),
            max_in_flight: default_audio_in_flight(),
            base_latency_ms: 0.0,
            render_quantum_frames: default_render_quantum(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            lookahead_frames: default_lookahead(),
            max_in_flight: default_video_in_flight(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: default_sync_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PlayerConfig {
    /// Resolve and load the config file, falling back to defaults
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        let config: Self = avsync_common::config::load_or_default(cli_arg)?;
        config.validate()?;
        Ok(config)
    }

    /// Check buffer invariants and timer periods
    pub fn validate(&self) -> Result<()> {
        self.audio_settings().validate()?;
        self.video_settings().validate()?;

        if !self.audio.base_latency_ms.is_finite() || self.audio.base_latency_ms < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "audio base_latency_ms must be a non-negative number (got {})",
                self.audio.base_latency_ms
            )));
        }
        if self.audio.render_quantum_frames == 0 {
            return Err(Error::InvalidConfig(
                "audio render_quantum_frames must be at least 1".to_string(),
            ));
        }
        if self.video.frame_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "video frame_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.clock.sync_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "clock sync_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn audio_settings(&self) -> AudioBufferSettings {
        AudioBufferSettings {
            decode_ahead: Duration::from_millis(self.audio.decode_ahead_ms),
            buffer_ceiling: Duration::from_millis(self.audio.buffer_ceiling_ms),
            max_in_flight: self.audio.max_in_flight,
        }
    }

    pub fn video_settings(&self) -> VideoBufferSettings {
        VideoBufferSettings {
            lookahead_frames: self.video.lookahead_frames,
            max_in_flight: self.video.max_in_flight,
        }
    }

    pub fn base_latency(&self) -> Duration {
        Duration::from_secs_f64(self.audio.base_latency_ms.max(0.0) / 1000.0)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.video.frame_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.clock.sync_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PlayerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio_settings(), AudioBufferSettings::default());
        assert_eq!(config.video_settings(), VideoBufferSettings::default());
        assert_eq!(config.sync_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: PlayerConfig = toml::from_str(
            r#"
            [audio]
            decode_ahead_ms = 200

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.decode_ahead_ms, 200);
        assert_eq!(config.audio.buffer_ceiling_ms, 600);
        assert_eq!(config.video.lookahead_frames, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_decode_ahead_must_stay_below_ceiling() {
        let config: PlayerConfig = toml::from_str(
            r#"
            [audio]
            decode_ahead_ms = 700
            buffer_ceiling_ms = 600
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_frame_interval() {
        let mut config = PlayerConfig::default();
        config.video.frame_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
