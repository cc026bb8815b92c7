//! Configuration management for CrabStream
//!
//! Provides loading, saving, and layered resolution of the default capture
//! parameters, recording location, and stream behaviour.

use crate::errors::PipelineError;
use crate::types::{AudioParams, VideoParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `CRABSTREAM__VIDEO__WIDTH=1280`
pub const ENV_PREFIX: &str = "CRABSTREAM";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrabStreamConfig {
    pub video: VideoDefaults,
    pub audio: AudioDefaults,
    pub recording: RecordingConfig,
    pub stream: StreamConfig,
}

/// Parameters used by `prepare_video_default`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoDefaults {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Bits per second
    pub bitrate: u32,
    /// Degrees, one of 0/90/180/270
    pub rotation: u16,
    pub hardware_rotation: bool,
}

/// Parameters used by `prepare_audio_default`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDefaults {
    /// Bits per second
    pub bitrate: u32,
    pub sample_rate: u32,
    pub stereo: bool,
    pub echo_canceler: bool,
    pub noise_suppressor: bool,
}

/// Local recording configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Folder used by `start_record_in` when the caller has no preference
    pub output_directory: String,
    /// Write the MP4 index up front so partial files stay playable
    pub fast_start: bool,
}

/// Live stream behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Retries after a failed camera switch before the error is surfaced
    pub switch_retries: u32,
    /// Units buffered by `QueuedTransport` before the oldest is dropped
    pub queue_capacity: usize,
    /// Optional credentials forwarded to the transport
    pub user: String,
    pub password: String,
}

impl Default for VideoDefaults {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            bitrate: 1200 * 1024,
            rotation: 0,
            hardware_rotation: true,
        }
    }
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            bitrate: 128 * 1024,
            sample_rate: 44100,
            stereo: true,
            echo_canceler: false,
            noise_suppressor: false,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_directory: "./recordings".to_string(),
            fast_start: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            switch_retries: 1,
            queue_capacity: crate::transport::DEFAULT_QUEUE_CAPACITY,
            user: String::new(),
            password: String::new(),
        }
    }
}

impl Default for CrabStreamConfig {
    fn default() -> Self {
        Self {
            video: VideoDefaults::default(),
            audio: AudioDefaults::default(),
            recording: RecordingConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl From<&VideoDefaults> for VideoParams {
    fn from(defaults: &VideoDefaults) -> Self {
        VideoParams::new(defaults.width, defaults.height, defaults.fps, defaults.bitrate)
            .with_rotation(defaults.hardware_rotation, defaults.rotation)
    }
}

impl From<&AudioDefaults> for AudioParams {
    fn from(defaults: &AudioDefaults) -> Self {
        AudioParams::new(defaults.bitrate, defaults.sample_rate, defaults.stereo)
            .with_processing(defaults.echo_canceler, defaults.noise_suppressor)
    }
}

impl CrabStreamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CrabStreamConfig = toml::from_str(&contents)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), PipelineError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| PipelineError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Resolve defaults, then the TOML file (if present), then
    /// `CRABSTREAM__SECTION__KEY` environment variables
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| PipelineError::Config(format!("Failed to seed defaults: {}", e)))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to layer config: {}", e)))?;

        let config: CrabStreamConfig = settings
            .try_deserialize()
            .map_err(|e| PipelineError::Config(format!("Invalid layered config: {}", e)))?;
        config.validate().map_err(PipelineError::Config)?;
        Ok(config)
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabstream.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_layered(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err("Invalid default resolution".to_string());
        }
        if self.video.fps == 0 || self.video.fps > 240 {
            return Err("Invalid default FPS (must be 1-240)".to_string());
        }
        if self.video.bitrate == 0 {
            return Err("Video bitrate must be positive".to_string());
        }
        if !matches!(self.video.rotation, 0 | 90 | 180 | 270) {
            return Err("Rotation must be 0, 90, 180 or 270".to_string());
        }

        if self.audio.bitrate == 0 {
            return Err("Audio bitrate must be positive".to_string());
        }
        if !(8_000..=192_000).contains(&self.audio.sample_rate) {
            return Err("Audio sample rate must be between 8000 and 192000".to_string());
        }

        if self.recording.output_directory.trim().is_empty() {
            return Err("Recording output directory must not be empty".to_string());
        }

        if self.stream.queue_capacity == 0 {
            return Err("Transport queue capacity must be at least 1".to_string());
        }
        if self.stream.switch_retries > 10 {
            return Err("Switch retries must be between 0 and 10".to_string());
        }

        Ok(())
    }
}
