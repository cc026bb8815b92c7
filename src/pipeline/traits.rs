//! Collaborator contracts consumed by the orchestrator
//!
//! Capture devices, encoders, container writers, and the streaming transport
//! are all injected behind these traits. The orchestrator never names a
//! concrete device, codec, or protocol.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::events::ConnectionReporter;
use crate::errors::PipelineResult;
use crate::types::{AccessUnit, DeviceSelector, MediaKind, MediaParams, RawMedia, TrackFormat};

/// Input end of an encoder or frame sink. Capture threads push into it directly.
pub trait RawInput: Send + Sync {
    fn push(&self, media: RawMedia);
}

/// Receives encoder output on the encoder's own thread
pub trait EncoderOutput: Send + Sync {
    /// Called exactly once per activation, before any access unit
    fn on_format(&self, format: TrackFormat);
    fn on_access_unit(&self, unit: AccessUnit);
}

/// A camera or microphone
pub trait CaptureSource: Send {
    fn kind(&self) -> MediaKind;

    /// Apply capture parameters (resolution, sample rate, audio processing)
    fn prepare(&mut self, params: &MediaParams) -> PipelineResult<()>;

    /// Fails with `DeviceUnavailable` when no device matches or it is busy
    fn open(&mut self, selector: &DeviceSelector) -> PipelineResult<()>;

    /// Idempotent
    fn close(&mut self);

    /// Move to the next device. On failure the source is left on its
    /// previous device, still capturing if it was.
    fn switch_device(&mut self) -> PipelineResult<()>;

    /// Route captured media straight into `input`; `None` detaches
    fn bind(&mut self, input: Option<Arc<dyn RawInput>>);

    fn start(&mut self) -> PipelineResult<()>;

    /// Idempotent
    fn stop(&mut self);

    fn is_open(&self) -> bool;
}

/// Open `next` through `open`, falling back to `current` when that fails.
///
/// The original error is returned after the fallback so callers can retry
/// from a source that still holds a device.
pub fn switch_or_restore<D, F>(current: &D, next: &D, mut open: F) -> PipelineResult<()>
where
    F: FnMut(&D) -> PipelineResult<()>,
{
    let Err(e) = open(next) else {
        return Ok(());
    };
    if let Err(restore) = open(current) {
        log::error!("Previous device could not be restored: {}", restore);
    }
    Err(e)
}

/// A video or audio encoder running on its own thread of control
pub trait Encoder: Send {
    fn kind(&self) -> MediaKind;

    /// Returns false when the requested combination is not supported.
    /// This is a soft failure, not an error.
    fn configure(&mut self, params: &MediaParams) -> bool;

    /// Hand-off point for raw frames or samples
    fn input(&self) -> Arc<dyn RawInput>;

    fn start(&mut self, output: Arc<dyn EncoderOutput>) -> PipelineResult<()>;

    /// Idempotent
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Best effort; applied at the next encodable boundary
    fn set_bitrate(&mut self, bitrate: u32) -> PipelineResult<()>;

    /// While enabled, keep emitting units built from filler input
    /// (black picture or silence) instead of captured media.
    fn substitute_with_filler(&mut self, enabled: bool);
}

/// Local seekable container output (MP4)
pub trait ContainerWriter: Send {
    fn register_track(&mut self, format: &TrackFormat) -> PipelineResult<usize>;
    fn start(&mut self) -> PipelineResult<()>;
    fn write(&mut self, track: usize, unit: &AccessUnit) -> PipelineResult<()>;
    /// Finalize the file
    fn stop(&mut self) -> PipelineResult<()>;
    /// Release handles; must be safe after a failed `stop`
    fn release(&mut self);
}

/// Creates one container writer per recording session
pub trait ContainerWriterFactory: Send + Sync {
    fn create(&self, path: &Path) -> PipelineResult<Box<dyn ContainerWriter>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Only yields credentials when both parts are non-empty
    pub fn from_parts(user: &str, password: &str) -> Option<Self> {
        if user.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }
}

/// Everything a transport needs to open a remote session
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub url: String,
    pub formats: Vec<TrackFormat>,
    pub credentials: Option<Credentials>,
}

/// Live streaming protocol client
///
/// `open` only issues the connection; its outcome arrives later through the
/// reporter. `push` is called on encoder threads and must not block them
/// indefinitely.
pub trait TransportSink: Send + Sync {
    fn open(&self, request: OpenRequest, reporter: ConnectionReporter) -> PipelineResult<()>;

    /// A track format that became known after `open`
    fn announce(&self, _format: &TrackFormat) {}

    fn push(&self, unit: &AccessUnit);

    /// Idempotent
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;

    #[test]
    fn test_credentials_require_both_parts() {
        assert!(Credentials::from_parts("", "secret").is_none());
        assert!(Credentials::from_parts("user", "").is_none());
        let creds = Credentials::from_parts("user", "secret").expect("both parts set");
        assert_eq!(creds.user, "user");
    }

    #[test]
    fn test_switch_or_restore_falls_back_to_current() {
        let mut opened = Vec::new();
        let result = switch_or_restore(&"back", &"front", |device: &&str| {
            opened.push(*device);
            if *device == "front" {
                Err(PipelineError::device_unavailable("front busy"))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(PipelineError::DeviceUnavailable(_))));
        assert_eq!(opened, vec!["front", "back"]);
    }

    #[test]
    fn test_switch_or_restore_leaves_current_alone_on_success() {
        let mut opened = Vec::new();
        switch_or_restore(&0u32, &1u32, |device| {
            opened.push(*device);
            Ok(())
        })
        .unwrap();
        assert_eq!(opened, vec![1]);
    }
}
