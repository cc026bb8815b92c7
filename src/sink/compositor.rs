//! Render-stage sink: fps limiting, video mute, and a pausable render loop

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{EncoderBinding, FrameSink, PreviewTarget, SinkMode};
use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::RawInput;
use crate::types::{PixelFormat, RawMedia, VideoFrame};

/// Guarded pause flag checked before every render
#[derive(Debug, Clone, Default)]
pub struct RenderGate {
    paused: Arc<Mutex<bool>>,
}

impl RenderGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub fn resume(&self) {
        *self.paused.lock() = false;
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }
}

/// Drops frames that arrive faster than the configured rate.
///
/// Driven by presentation timestamps so it behaves the same for live and
/// synthetic input.
#[derive(Debug, Clone)]
pub struct FpsLimiter {
    interval_us: u64,
    next_due_us: Option<u64>,
}

impl FpsLimiter {
    pub fn new(fps: u32) -> Self {
        Self {
            interval_us: 1_000_000 / u64::from(fps.max(1)),
            next_due_us: None,
        }
    }

    /// No limit
    pub fn unlimited() -> Self {
        Self {
            interval_us: 0,
            next_due_us: None,
        }
    }

    pub fn should_render(&mut self, pts_us: u64) -> bool {
        match self.next_due_us {
            Some(due) if pts_us < due => false,
            _ => {
                // Anchor on the schedule, not the arrival, so jitter does not drift the rate
                let base = self
                    .next_due_us
                    .unwrap_or(pts_us)
                    .max(pts_us.saturating_sub(self.interval_us));
                self.next_due_us = Some(base + self.interval_us);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.next_due_us = None;
    }
}

struct CompositorState {
    encoder: Option<EncoderBinding>,
    limiter: FpsLimiter,
    encoder_size: Option<(u32, u32)>,
}

struct Compositor {
    state: Mutex<CompositorState>,
    preview: Option<Arc<dyn PreviewTarget>>,
    gate: RenderGate,
    running: AtomicBool,
    muted: AtomicBool,
    rendered: AtomicU64,
    skipped: AtomicU64,
}

impl Compositor {
    fn render(&self, frame: VideoFrame) {
        if !self.running.load(Ordering::Acquire) || self.gate.is_paused() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let encoder = {
            let mut state = self.state.lock();
            if !state.limiter.should_render(frame.pts_us) {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            state.encoder.as_ref().map(|binding| {
                let (width, height) = state
                    .encoder_size
                    .unwrap_or((binding.width, binding.height));
                (binding.input.clone(), width, height)
            })
        };

        if let Some(preview) = &self.preview {
            preview.render(&frame);
        }

        if let Some((input, width, height)) = encoder {
            let output = if self.muted.load(Ordering::Acquire) {
                VideoFrame::black(width, height, PixelFormat::Yuv420p, frame.pts_us)
            } else {
                frame
            };
            input.push(RawMedia::Video(output));
        }

        self.rendered.fetch_add(1, Ordering::Relaxed);
    }
}

impl RawInput for Compositor {
    fn push(&self, media: RawMedia) {
        match media {
            RawMedia::Video(frame) => self.render(frame),
            audio @ RawMedia::Audio(_) => {
                let input = self.state.lock().encoder.as_ref().map(|b| b.input.clone());
                if let Some(input) = input {
                    input.push(audio);
                }
            }
        }
    }
}

/// Frames are rendered inline on the capture thread before reaching the encoder
pub struct CompositorSink {
    inner: Arc<Compositor>,
}

impl CompositorSink {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_preview(target: Arc<dyn PreviewTarget>) -> Self {
        Self::build(Some(target))
    }

    fn build(preview: Option<Arc<dyn PreviewTarget>>) -> Self {
        Self {
            inner: Arc::new(Compositor {
                state: Mutex::new(CompositorState {
                    encoder: None,
                    limiter: FpsLimiter::unlimited(),
                    encoder_size: None,
                }),
                preview,
                gate: RenderGate::new(),
                running: AtomicBool::new(false),
                muted: AtomicBool::new(false),
                rendered: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }),
        }
    }

    /// Override the size frames are produced at for the encoder
    pub fn set_encoder_size(&self, width: u32, height: u32) -> PipelineResult<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::ConfigurationRejected(format!(
                "encoder size {}x{} is empty",
                width, height
            )));
        }
        self.inner.state.lock().encoder_size = Some((width, height));
        Ok(())
    }

    pub fn encoder_size(&self) -> Option<(u32, u32)> {
        let state = self.inner.state.lock();
        state
            .encoder_size
            .or_else(|| state.encoder.as_ref().map(|b| (b.width, b.height)))
    }

    pub fn set_fps_limit(&self, fps: u32) {
        self.inner.state.lock().limiter = FpsLimiter::new(fps);
    }

    /// Render black instead of the camera picture
    pub fn mute_video(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::Release);
    }

    pub fn is_video_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Acquire)
    }

    pub fn render_gate(&self) -> RenderGate {
        self.inner.gate.clone()
    }

    pub fn rendered_frames(&self) -> u64 {
        self.inner.rendered.load(Ordering::Relaxed)
    }

    pub fn skipped_frames(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }
}

impl Default for CompositorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for CompositorSink {
    fn mode(&self) -> SinkMode {
        SinkMode::Compositor
    }

    fn bind(&mut self, binding: Option<EncoderBinding>) {
        let mut state = self.inner.state.lock();
        state.limiter = match &binding {
            Some(b) => FpsLimiter::new(b.fps),
            None => FpsLimiter::unlimited(),
        };
        state.encoder = binding;
    }

    fn surface_handle(&self) -> Arc<dyn RawInput> {
        self.inner.clone()
    }

    fn start(&mut self) -> PipelineResult<()> {
        self.inner.state.lock().limiter.reset();
        self.inner.running.store(true, Ordering::Release);
        log::debug!("Compositor started");
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}
