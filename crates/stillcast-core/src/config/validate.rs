//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.workers == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.workers must be > 0".into(),
            ));
        }
        if self.pipeline.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.buffer_size must be > 0".into(),
            ));
        }
        if self.pipeline.health_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.health_interval_secs must be > 0".into(),
            ));
        }
        if self.watcher.debounce_ms == 0 {
            return Err(ConfigError::ValidationError(
                "watcher.debounce_ms must be > 0".into(),
            ));
        }
        if self.watcher.eviction_factor < 2 {
            return Err(ConfigError::ValidationError(
                "watcher.eviction_factor must be >= 2".into(),
            ));
        }
        if self.watcher.supported_formats.is_empty() {
            return Err(ConfigError::ValidationError(
                "watcher.supported_formats must not be empty".into(),
            ));
        }
        if self.encoder.program.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "encoder.program must not be empty".into(),
            ));
        }
        if self.encoder.frame_rate == 0 {
            return Err(ConfigError::ValidationError(
                "encoder.frame_rate must be > 0".into(),
            ));
        }
        if !is_resolution(&self.encoder.resolution) {
            return Err(ConfigError::ValidationError(format!(
                "encoder.resolution must look like WIDTHxHEIGHT, got {:?}",
                self.encoder.resolution
            )));
        }
        if self.encoder.segment_secs == 0 || self.encoder.playlist_size == 0 {
            return Err(ConfigError::ValidationError(
                "encoder.segment_secs and encoder.playlist_size must be > 0".into(),
            ));
        }
        if self.encoder.pipe_open_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "encoder.pipe_open_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn is_resolution(value: &str) -> bool {
    match value.split_once('x') {
        Some((w, h)) => {
            matches!(w.parse::<u32>(), Ok(w) if w > 0) && matches!(h.parse::<u32>(), Ok(h) if h > 0)
        }
        None => false,
    }
}
