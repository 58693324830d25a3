use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, SoundVizError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub beat: BeatConfig,
    pub visualiser: VisualiserConfig,
    pub trainer: TrainerConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = ?path.as_ref(), "loaded configuration");
        Ok(config)
    }

    /// Checks the invariants the subsystems rely on.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.beat.validate()?;
        self.visualiser.validate()?;
        self.trainer.validate()
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub volume: f32,
    pub load_timeout_ms: u64,
    pub load_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -90.0,
            max_decibels: -10.0,
            volume: 0.5,
            load_timeout_ms: 10_000,
            load_attempts: 3,
            retry_delay_ms: 1_000,
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<()> {
        if self.fft_size < 32 || !self.fft_size.is_power_of_two() {
            return Err(SoundVizError::InvalidInput(
                "fft_size must be a power of two of at least 32",
            ));
        }
        if self.sample_rate == 0 {
            return Err(SoundVizError::InvalidInput("sample_rate must be positive"));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(SoundVizError::InvalidInput(
                "min_decibels must be below max_decibels",
            ));
        }
        if self.load_attempts == 0 {
            return Err(SoundVizError::InvalidInput("load_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Parameters of the energy based beat detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    pub history_size: usize,
    pub threshold: f32,
    pub min_time_between_beats_ms: u64,
    pub bass_threshold: f32,
    pub mids_threshold: f32,
    pub treble_threshold: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            history_size: 42,
            threshold: 1.3,
            min_time_between_beats_ms: 200,
            bass_threshold: 1.4,
            mids_threshold: 1.2,
            treble_threshold: 1.1,
        }
    }
}

impl BeatConfig {
    fn validate(&self) -> Result<()> {
        if self.history_size < 2 {
            return Err(SoundVizError::InvalidInput(
                "history_size must hold at least two readings",
            ));
        }
        Ok(())
    }
}

/// Defaults for the frame renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualiserConfig {
    pub width: f32,
    pub height: f32,
    pub num_bars: usize,
    pub sensitivity: f32,
    pub waveform_history: usize,
    pub line_width: f32,
}

impl Default for VisualiserConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            num_bars: 128,
            sensitivity: 1.0,
            waveform_history: 5,
            line_width: 2.0,
        }
    }
}

impl VisualiserConfig {
    fn validate(&self) -> Result<()> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(SoundVizError::InvalidInput("canvas size must be positive"));
        }
        Ok(())
    }
}

/// Timing constants of the piano trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Half-width of the scoring window before the mode factor is applied.
    pub base_tolerance: f64,
    pub practice_tolerance_factor: f64,
    pub listen_tolerance_factor: f64,
    /// Notes starting within this distance of a group's first note share the group.
    pub chord_tolerance: f64,
    /// How far ahead of a group the transport pauses in note-wait mode.
    pub wait_lead: f64,
    pub start_delay: f64,
    pub tail_ms: u64,
    pub fall_duration: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            base_tolerance: 0.1,
            practice_tolerance_factor: 0.8,
            listen_tolerance_factor: 1.2,
            chord_tolerance: 0.05,
            wait_lead: 0.02,
            start_delay: 0.07,
            tail_ms: 60,
            fall_duration: 4.0,
        }
    }
}

impl TrainerConfig {
    fn validate(&self) -> Result<()> {
        if self.base_tolerance <= 0.0 {
            return Err(SoundVizError::InvalidInput("base_tolerance must be positive"));
        }
        if self.chord_tolerance < 0.0 || self.wait_lead < 0.0 || self.start_delay < 0.0 {
            return Err(SoundVizError::InvalidInput(
                "trainer timing constants must not be negative",
            ));
        }
        if self.fall_duration <= 0.0 {
            return Err(SoundVizError::InvalidInput("fall_duration must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "beat": { "threshold": 2.0 } }"#).unwrap();
        assert_eq!(config.beat.threshold, 2.0);
        assert_eq!(config.beat.history_size, 42);
        assert_eq!(config.audio.fft_size, 2048);
    }

    #[test]
    fn rejects_bad_fft_size() {
        let mut config = AppConfig::default();
        config.audio.fft_size = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "trainer": { "tail_ms": 120 } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.trainer.tail_ms, 120);
    }
}
