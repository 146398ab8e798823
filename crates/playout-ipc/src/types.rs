//! Configuration and metrics types shared across the pipeline.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default websocket control port.
pub const DEFAULT_CONTROL_PORT: u16 = 9002;

/// Errors loading or validating a [`PlayerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for this schema.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the pipeline cannot run with.
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables for a playback session.
///
/// Every field has a default, so a config file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Address the control channel binds to.
    pub control_bind: String,

    /// Port the control channel listens on.
    pub control_port: u16,

    /// Capacity of the video frame queue (backpressure).
    pub video_queue_capacity: usize,

    /// Capacity of the audio frame queue (drop-oldest).
    pub audio_queue_capacity: usize,

    /// Video ahead of audio by more than this waits.
    pub sync_threshold_ms: u64,

    /// Video behind audio by more than this skips ahead instead of waiting.
    pub no_sync_threshold_secs: f64,

    /// Upper bound on a single presenter sleep.
    pub max_present_sleep_ms: u64,

    /// Sleep per tick while paused.
    pub idle_sleep_ms: u64,

    /// Sleep per tick when the video queue is empty.
    pub starve_sleep_ms: u64,

    /// Frame rate used when the stream does not report one.
    pub fallback_fps: f64,

    /// Volume at startup, 0-100.
    pub initial_volume: u8,

    /// Whether to open an audio output at all.
    pub audio_enabled: bool,

    /// Frames per audio device callback.
    pub audio_buffer_frames: usize,

    /// Consecutive read failures tolerated before treating the source as ended.
    pub read_retry_attempts: u32,

    /// Presented frames between metrics log lines.
    pub metrics_log_interval_frames: u64,

    /// Number of recent frames the fps average is taken over.
    pub metrics_window: usize,

    /// Interval between `Metrics` events.
    pub metrics_emit_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            control_bind: "0.0.0.0".to_string(),
            control_port: DEFAULT_CONTROL_PORT,
            video_queue_capacity: 10,
            audio_queue_capacity: 50,
            sync_threshold_ms: 10,
            no_sync_threshold_secs: 10.0,
            max_present_sleep_ms: 33,
            idle_sleep_ms: 10,
            starve_sleep_ms: 1,
            fallback_fps: 25.0,
            initial_volume: 100,
            audio_enabled: true,
            audio_buffer_frames: 1024,
            read_retry_attempts: 3,
            metrics_log_interval_frames: 60,
            metrics_window: 120,
            metrics_emit_interval_ms: 1000,
        }
    }
}

impl PlayerConfig {
    /// Load a config from a JSON file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "video_queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.audio_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "audio_queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.fallback_fps.is_finite() && self.fallback_fps > 0.0) {
            return Err(ConfigError::Invalid {
                field: "fallback_fps",
                reason: format!("{} is not a positive frame rate", self.fallback_fps),
            });
        }
        if !(self.no_sync_threshold_secs.is_finite() && self.no_sync_threshold_secs > 0.0) {
            return Err(ConfigError::Invalid {
                field: "no_sync_threshold_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.initial_volume > 100 {
            return Err(ConfigError::Invalid {
                field: "initial_volume",
                reason: format!("{} is above 100", self.initial_volume),
            });
        }
        if self.audio_buffer_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "audio_buffer_frames",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn sync_threshold(&self) -> Duration {
        Duration::from_millis(self.sync_threshold_ms)
    }

    pub fn no_sync_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.no_sync_threshold_secs)
    }

    pub fn max_present_sleep(&self) -> Duration {
        Duration::from_millis(self.max_present_sleep_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn starve_sleep(&self) -> Duration {
        Duration::from_millis(self.starve_sleep_ms)
    }

    pub fn metrics_emit_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_emit_interval_ms)
    }
}

/// Point-in-time pipeline metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackMetrics {
    /// Presented frames per second over the recent window.
    pub fps: f32,

    /// Mean time spent in `present` over the recent window, in milliseconds.
    pub avg_present_ms: f32,

    /// Video frames produced by the decoder.
    pub frames_decoded: u64,

    /// Video frames shown.
    pub frames_presented: u64,

    /// Video frames skipped to catch up with audio.
    pub frames_late: u64,

    /// Audio frames consumed by the output.
    pub audio_frames_played: u64,

    /// Audio frames evicted from a full queue.
    pub audio_frames_dropped: u64,

    /// Audio callbacks that ran out of samples.
    pub audio_underruns: u64,

    /// Units the decoder failed on and skipped.
    pub decode_errors: u64,

    /// Completed passes over the media.
    pub loops: u64,

    /// Current video queue depth.
    pub video_queue_len: usize,

    /// Current audio queue depth.
    pub audio_queue_len: usize,

    /// Seconds since playback started.
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.control_port, 9002);
        assert_eq!(config.video_queue_capacity, 10);
        assert_eq!(config.sync_threshold(), Duration::from_millis(10));
    }

    #[test]
    fn test_partial_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"control_port": 9100, "audio_queue_capacity": 30}}"#).unwrap();

        let config = PlayerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.control_port, 9100);
        assert_eq!(config.audio_queue_capacity, 30);
        assert_eq!(config.video_queue_capacity, 10);
    }

    #[test]
    fn test_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        assert!(matches!(
            PlayerConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = PlayerConfig {
            video_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "video_queue_capacity",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            PlayerConfig::from_file("/definitely/not/here.json"),
            Err(ConfigError::Read { .. })
        ));
    }
}
