//! Fan-out of encoder output to the live transport and the active recording

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::{EncoderOutput, TransportSink};
use crate::recording::{ActiveRecording, RecordingSummary};
use crate::types::{AccessUnit, MediaKind, TrackFormat};

/// Latest format announced by each encoder in the current activation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFormats {
    pub video: Option<TrackFormat>,
    pub audio: Option<TrackFormat>,
}

impl TrackFormats {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    /// Formats in track order, video first
    pub fn to_vec(&self) -> Vec<TrackFormat> {
        self.video.iter().chain(self.audio.iter()).cloned().collect()
    }

    fn store(&mut self, format: TrackFormat) {
        match format.kind() {
            MediaKind::Video => self.video = Some(format),
            MediaKind::Audio => self.audio = Some(format),
        }
    }
}

/// Shared with every encoder thread as its `EncoderOutput`.
///
/// The recording slot is behind its own lock so installing or finishing a
/// recording never races a write into a writer that is being torn down.
pub struct Router {
    transport: Arc<dyn TransportSink>,
    streaming: AtomicBool,
    formats: Mutex<TrackFormats>,
    recording: Mutex<Option<ActiveRecording>>,
    routed_units: AtomicU64,
}

impl Router {
    pub fn new(transport: Arc<dyn TransportSink>) -> Self {
        Self {
            transport,
            streaming: AtomicBool::new(false),
            formats: Mutex::new(TrackFormats::default()),
            recording: Mutex::new(None),
            routed_units: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &Arc<dyn TransportSink> {
        &self.transport
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.streaming.store(streaming, Ordering::SeqCst);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn formats(&self) -> TrackFormats {
        self.formats.lock().clone()
    }

    pub fn clear_formats(&self) {
        *self.formats.lock() = TrackFormats::default();
    }

    pub fn install_recording(&self, recording: ActiveRecording) {
        *self.recording.lock() = Some(recording);
    }

    /// Detach and finalize the active recording, if any
    pub fn finish_recording(&self) -> Option<RecordingSummary> {
        let recording = self.recording.lock().take();
        recording.map(ActiveRecording::finish)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.lock().is_some()
    }

    /// Units routed since construction, for diagnostics
    pub fn routed_units(&self) -> u64 {
        self.routed_units.load(Ordering::Relaxed)
    }
}

impl EncoderOutput for Router {
    fn on_format(&self, format: TrackFormat) {
        log::debug!("{} format ready: {}", format.kind().as_str(), format.mime);
        self.formats.lock().store(format.clone());
        if self.is_streaming() {
            self.transport.announce(&format);
        }
    }

    fn on_access_unit(&self, unit: AccessUnit) {
        self.routed_units.fetch_add(1, Ordering::Relaxed);

        // Live delivery must not wait behind a container write
        if self.is_streaming() {
            self.transport.push(&unit);
        }

        if let Some(recording) = self.recording.lock().as_mut() {
            recording.route(&unit);
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("streaming", &self.is_streaming())
            .field("recording", &self.is_recording())
            .field("routed_units", &self.routed_units())
            .finish()
    }
}
