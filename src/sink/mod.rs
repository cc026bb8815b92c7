//! Frame sinks: where captured video goes between the camera and the encoder
//!
//! A sink is chosen when the orchestrator is built and never changes. Every
//! sink hands the camera one stable `surface_handle`; rebinding the encoder
//! or starting a preview only changes what sits behind that handle.

mod compositor;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineResult;
use crate::pipeline::RawInput;
use crate::types::{RawMedia, VideoFrame};

pub use compositor::{CompositorSink, FpsLimiter, RenderGate};

/// Capture mode a sink implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// Camera feeds the encoder directly, nothing is drawn
    EncoderOnly,
    /// Camera feeds an on-screen surface and the encoder
    PreviewSurface,
    /// Frames pass through a render stage before reaching the encoder
    Compositor,
}

/// Encoder input plus the geometry it was configured for
#[derive(Clone)]
pub struct EncoderBinding {
    pub input: Arc<dyn RawInput>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl std::fmt::Debug for EncoderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderBinding")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fps", &self.fps)
            .finish()
    }
}

/// On-screen destination for preview frames
pub trait PreviewTarget: Send + Sync {
    fn render(&self, frame: &VideoFrame);
}

/// Capability interface shared by every capture mode
pub trait FrameSink: Send {
    fn mode(&self) -> SinkMode;

    /// Attach the encoder input; `None` leaves the sink in preview-only mode
    fn bind(&mut self, binding: Option<EncoderBinding>);

    /// Input the camera should push into. Stable for the sink's lifetime.
    fn surface_handle(&self) -> Arc<dyn RawInput>;

    fn start(&mut self) -> PipelineResult<()>;

    /// Idempotent
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Relay behind the surface handle of the direct and preview sinks
struct SurfaceRelay {
    encoder: Mutex<Option<Arc<dyn RawInput>>>,
    preview: Option<Arc<dyn PreviewTarget>>,
    running: AtomicBool,
    previewed: AtomicU64,
}

impl SurfaceRelay {
    fn new(preview: Option<Arc<dyn PreviewTarget>>) -> Self {
        Self {
            encoder: Mutex::new(None),
            preview,
            running: AtomicBool::new(false),
            previewed: AtomicU64::new(0),
        }
    }
}

impl RawInput for SurfaceRelay {
    fn push(&self, media: RawMedia) {
        if let (RawMedia::Video(frame), Some(preview)) = (&media, &self.preview) {
            if self.running.load(Ordering::Acquire) {
                preview.render(frame);
                self.previewed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let encoder = self.encoder.lock().clone();
        if let Some(encoder) = encoder {
            encoder.push(media);
        }
    }
}

/// Camera output goes straight into the encoder input
pub struct EncoderOnlySink {
    relay: Arc<SurfaceRelay>,
}

impl EncoderOnlySink {
    pub fn new() -> Self {
        Self {
            relay: Arc::new(SurfaceRelay::new(None)),
        }
    }
}

impl Default for EncoderOnlySink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for EncoderOnlySink {
    fn mode(&self) -> SinkMode {
        SinkMode::EncoderOnly
    }

    fn bind(&mut self, binding: Option<EncoderBinding>) {
        *self.relay.encoder.lock() = binding.map(|b| b.input);
    }

    fn surface_handle(&self) -> Arc<dyn RawInput> {
        self.relay.clone()
    }

    fn start(&mut self) -> PipelineResult<()> {
        self.relay.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) {
        self.relay.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.relay.running.load(Ordering::Acquire)
    }
}

/// Camera output is drawn on a preview target and, when bound, encoded
///
/// Serves both surface-backed and texture-backed views.
pub struct PreviewSurfaceSink {
    relay: Arc<SurfaceRelay>,
}

impl PreviewSurfaceSink {
    pub fn new(target: Arc<dyn PreviewTarget>) -> Self {
        Self {
            relay: Arc::new(SurfaceRelay::new(Some(target))),
        }
    }

    /// Frames drawn on the preview target so far
    pub fn previewed_frames(&self) -> u64 {
        self.relay.previewed.load(Ordering::Relaxed)
    }
}

impl FrameSink for PreviewSurfaceSink {
    fn mode(&self) -> SinkMode {
        SinkMode::PreviewSurface
    }

    fn bind(&mut self, binding: Option<EncoderBinding>) {
        *self.relay.encoder.lock() = binding.map(|b| b.input);
    }

    fn surface_handle(&self) -> Arc<dyn RawInput> {
        self.relay.clone()
    }

    fn start(&mut self) -> PipelineResult<()> {
        log::debug!("Preview surface started");
        self.relay.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) {
        if self.relay.running.swap(false, Ordering::AcqRel) {
            log::debug!("Preview surface stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.relay.running.load(Ordering::Acquire)
    }
}
