//! CrabStream: live camera and microphone capture-and-publish pipeline
//!
//! This crate sequences capture devices, encoders, a live streaming
//! transport, and local MP4 recording behind one orchestrator, keeping the
//! four subsystems consistent across start, stop, switch, and error events.
//!
//! # Features
//! - Preview, stream, and record lifecycle with a checked state machine
//! - Fan-out of every encoded unit to the transport and the recording
//! - Keyframe-gated recording that always opens on a decodable picture
//! - Video disable and audio mute by filler substitution, no encoder restart
//! - Live bitrate changes and camera switching
//! - Pluggable capture, encode, container, and transport collaborators
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! crabstream = { version = "0.1", features = ["recording", "audio", "camera"] }
//! ```
//!
//! Then assemble a pipeline:
//! ```rust,ignore
//! use crabstream::PipelineOrchestrator;
//!
//! let mut pipeline = PipelineOrchestrator::builder()
//!     .video_source(Box::new(camera))
//!     .audio_source(Box::new(microphone))
//!     .video_encoder(Box::new(video_encoder))
//!     .audio_encoder(Box::new(audio_encoder))
//!     .transport(transport)
//!     .container_factory(Arc::new(Mp4WriterFactory::default()))
//!     .build()?;
//!
//! if pipeline.prepare_video_default() && pipeline.prepare_audio_default() {
//!     pipeline.start_stream("rtmp://host/app/key")?;
//!     pipeline.start_record_in("./recordings")?;
//! }
//! ```
pub mod config;
pub mod errors;
pub mod invariant_ppt;
pub mod pipeline;
pub mod recording;
pub mod sink;
pub mod timing;
pub mod transport;
pub mod types;

#[cfg(feature = "audio")]
pub mod audio;

#[cfg(feature = "camera")]
pub mod camera;

// Testing utilities - deterministic collaborators for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::CrabStreamConfig;
pub use errors::{ErrorKind, PipelineError, PipelineResult};
pub use pipeline::{PipelineEvent, PipelineOrchestrator, PipelineState, SessionSnapshot};
pub use recording::{recording_file_name, RecordingSummary};
pub use types::{AccessUnit, AudioParams, DeviceSelector, Facing, TrackFormat, VideoParams};

/// Initialize logging for the pipeline
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabstream=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Backends compiled into this build
pub fn enabled_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();
    if cfg!(feature = "recording") {
        backends.push("recording");
    }
    if cfg!(feature = "audio") {
        backends.push("audio");
    }
    if cfg!(feature = "camera") {
        backends.push("camera");
    }
    backends
}

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        backends: enabled_backends()
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub backends: Vec<String>,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabstream");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.backends.len(), enabled_backends().len());
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging();
        init_logging();
        assert!(std::env::var("RUST_LOG").is_ok());
    }
}
