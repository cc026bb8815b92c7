//! H.264 video encoder using openh264
//!
//! Frames pushed into the input are handed to a dedicated worker thread over a
//! bounded channel. The worker owns the openh264 encoder and calls the bound
//! output for every non-empty bitstream.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use openh264::encoder::{
    BitRate, Encoder as OpenH264Encoder, EncoderConfig, FrameRate, FrameType, RateControlMode,
};
use openh264::formats::YUVBuffer;
use openh264::{OpenH264API, Timestamp};
use parking_lot::Mutex;

use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::{Encoder, EncoderOutput, RawInput};
use crate::types::{
    AccessUnit, MediaKind, MediaParams, PixelFormat, RawMedia, TrackFormat, VideoFrame,
    VideoParams,
};

/// Frames buffered between capture and the encode thread
const MAX_PENDING_FRAMES: usize = 8;

pub const H264_MIME: &str = "video/avc";

/// State shared between the encoder handle, its input, and the worker
#[derive(Default)]
struct Shared {
    running: AtomicBool,
    filler: AtomicBool,
    force_keyframe: AtomicBool,
    bitrate: AtomicU32,
    frames_encoded: AtomicU64,
    frames_dropped: AtomicU64,
}

struct H264Input {
    sender: Mutex<Option<Sender<VideoFrame>>>,
    shared: Arc<Shared>,
}

impl RawInput for H264Input {
    fn push(&self, media: RawMedia) {
        let RawMedia::Video(frame) = media else {
            return;
        };
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return;
        };
        match sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// H.264 encoder backed by openh264, one worker thread per activation
pub struct H264Encoder {
    params: Option<VideoParams>,
    shared: Arc<Shared>,
    input: Arc<H264Input>,
    worker: Option<JoinHandle<()>>,
}

impl H264Encoder {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        Self {
            params: None,
            input: Arc::new(H264Input {
                sender: Mutex::new(None),
                shared: shared.clone(),
            }),
            shared,
            worker: None,
        }
    }

    /// Number of frames turned into access units since creation
    pub fn frames_encoded(&self) -> u64 {
        self.shared.frames_encoded.load(Ordering::Relaxed)
    }

    /// Frames discarded because the encode thread fell behind
    pub fn frames_dropped(&self) -> u64 {
        self.shared.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn params(&self) -> Option<&VideoParams> {
        self.params.as_ref()
    }

    /// Ask the worker to make the next picture an IDR frame
    pub fn request_keyframe(&self) {
        self.shared.force_keyframe.store(true, Ordering::Release);
    }
}

impl Default for H264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for H264Encoder {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn configure(&mut self, params: &MediaParams) -> bool {
        let MediaParams::Video(video) = params else {
            return false;
        };
        if self.is_running() {
            log::warn!("Cannot reconfigure H.264 encoder while running");
            return false;
        }
        // 4:2:0 subsampling needs even dimensions
        let supported = video.width > 0
            && video.height > 0
            && video.width % 2 == 0
            && video.height % 2 == 0
            && video.fps > 0
            && video.bitrate > 0;
        if !supported {
            log::warn!(
                "Unsupported H.264 configuration {}x{}@{} {} bps",
                video.width,
                video.height,
                video.fps,
                video.bitrate
            );
            return false;
        }
        self.shared.bitrate.store(video.bitrate, Ordering::Relaxed);
        self.params = Some(video.clone());
        true
    }

    fn input(&self) -> Arc<dyn RawInput> {
        self.input.clone()
    }

    fn start(&mut self, output: Arc<dyn EncoderOutput>) -> PipelineResult<()> {
        if self.is_running() {
            return Ok(());
        }
        let params = self
            .params
            .clone()
            .ok_or_else(|| PipelineError::invalid_state("H.264 encoder is not configured"))?;

        let encoder = build_encoder(self.shared.bitrate.load(Ordering::Relaxed), params.fps)?;

        let (sender, receiver) = bounded(MAX_PENDING_FRAMES);
        *self.input.sender.lock() = Some(sender);
        self.shared.running.store(true, Ordering::Release);
        self.shared.force_keyframe.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("crabstream-h264".to_string())
            .spawn(move || encode_loop(encoder, params, receiver, output, shared));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                *self.input.sender.lock() = None;
                Err(PipelineError::Encoding(format!(
                    "Failed to spawn encode thread: {}",
                    e
                )))
            }
        }
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        // Dropping the sender disconnects the worker's receiver
        *self.input.sender.lock() = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("H.264 encode thread panicked");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn set_bitrate(&mut self, bitrate: u32) -> PipelineResult<()> {
        if bitrate == 0 {
            return Err(PipelineError::ConfigurationRejected(
                "bitrate must be positive".to_string(),
            ));
        }
        self.shared.bitrate.store(bitrate, Ordering::Relaxed);
        if let Some(params) = self.params.as_mut() {
            params.bitrate = bitrate;
        }
        log::debug!("H.264 target bitrate set to {} bps", bitrate);
        Ok(())
    }

    fn substitute_with_filler(&mut self, enabled: bool) {
        self.shared.filler.store(enabled, Ordering::Release);
    }
}

impl Drop for H264Encoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build an openh264 instance that targets `bitrate` at `fps`
fn build_encoder(bitrate: u32, fps: u32) -> PipelineResult<OpenH264Encoder> {
    let config = EncoderConfig::new()
        .bitrate(BitRate::from_bps(bitrate))
        .max_frame_rate(FrameRate::from_hz(fps as f32))
        .rate_control_mode(RateControlMode::Bitrate)
        .skip_frames(false);
    OpenH264Encoder::with_api_config(OpenH264API::from_source(), config)
        .map_err(|e| PipelineError::Encoding(format!("Failed to create encoder: {}", e)))
}

fn encode_loop(
    mut encoder: OpenH264Encoder,
    params: VideoParams,
    receiver: Receiver<VideoFrame>,
    output: Arc<dyn EncoderOutput>,
    shared: Arc<Shared>,
) {
    let mut applied_bitrate = shared.bitrate.load(Ordering::Relaxed);
    output.on_format(TrackFormat::video(
        H264_MIME,
        params.width,
        params.height,
        params.fps,
        applied_bitrate,
    ));

    let interval_us = 1_000_000 / u64::from(params.fps);
    let interval = Duration::from_micros(interval_us);
    let mut last_pts_us: Option<u64> = None;

    while shared.running.load(Ordering::Acquire) {
        let frame = match receiver.recv_timeout(interval) {
            Ok(frame) if shared.filler.load(Ordering::Acquire) => {
                VideoFrame::black(params.width, params.height, PixelFormat::Yuv420p, frame.pts_us)
            }
            Ok(frame) => frame,
            // Nothing captured: keep the filler stream flowing on its own clock
            Err(RecvTimeoutError::Timeout) if shared.filler.load(Ordering::Acquire) => {
                let pts_us = last_pts_us.map_or(0, |pts| pts + interval_us);
                VideoFrame::black(params.width, params.height, PixelFormat::Yuv420p, pts_us)
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // openh264 cannot retarget a running session, so a new rate means a new encoder
        let requested = shared.bitrate.load(Ordering::Relaxed);
        if requested != applied_bitrate {
            match build_encoder(requested, params.fps) {
                Ok(rebuilt) => {
                    encoder = rebuilt;
                    shared.force_keyframe.store(true, Ordering::Release);
                    log::debug!("H.264 encoder rebuilt at {} bps", requested);
                }
                Err(e) => log::warn!("Keeping {} bps encoder: {}", applied_bitrate, e),
            }
            applied_bitrate = requested;
        }

        if shared.force_keyframe.swap(false, Ordering::AcqRel) {
            encoder.force_intra_frame();
        }

        match encode_frame(&mut encoder, &frame) {
            Ok(Some(unit)) => {
                last_pts_us = Some(unit.pts_us);
                shared.frames_encoded.fetch_add(1, Ordering::Relaxed);
                output.on_access_unit(unit);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Dropping frame at {} us: {}", frame.pts_us, e),
        }
    }
    log::debug!("H.264 encode thread exiting");
}

/// Encode one picture; `None` when the rate controller skipped it
fn encode_frame(
    encoder: &mut OpenH264Encoder,
    frame: &VideoFrame,
) -> PipelineResult<Option<AccessUnit>> {
    if frame.width % 2 != 0 || frame.height % 2 != 0 {
        return Err(PipelineError::Encoding(format!(
            "odd frame size {}x{}",
            frame.width, frame.height
        )));
    }
    let pixels = (frame.width as usize) * (frame.height as usize);
    let yuv = match frame.format {
        PixelFormat::Yuv420p => {
            if frame.data.len() != pixels * 3 / 2 {
                return Err(PipelineError::Encoding(format!(
                    "Invalid YUV frame size: expected {} bytes, got {}",
                    pixels * 3 / 2,
                    frame.data.len()
                )));
            }
            frame.data.to_vec()
        }
        PixelFormat::Rgb24 => {
            if frame.data.len() != pixels * 3 {
                return Err(PipelineError::Encoding(format!(
                    "Invalid RGB frame size: expected {} bytes, got {}",
                    pixels * 3,
                    frame.data.len()
                )));
            }
            rgb_to_yuv420(&frame.data, frame.width, frame.height)
        }
    };

    let buffer = YUVBuffer::from_vec(yuv, frame.width as usize, frame.height as usize);
    let bitstream = encoder
        .encode_at(&buffer, Timestamp::from_millis(frame.pts_us / 1000))
        .map_err(|e| PipelineError::Encoding(format!("Encoding failed: {}", e)))?;

    let keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
    let data = bitstream.to_vec();
    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(AccessUnit::video(data, frame.pts_us, keyframe)))
}

/// Convert RGB24 to YUV420 planar (BT.601, 2x2 chroma subsampling)
pub fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for row in 0..h {
        for col in 0..w {
            let idx = (row * w + col) * 3;
            let r = i32::from(rgb[idx]);
            let g = i32::from(rgb[idx + 1]);
            let b = i32::from(rgb[idx + 2]);

            let luma = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[row * w + col] = luma.clamp(0, 255) as u8;

            if row % 2 == 0 && col % 2 == 0 {
                let uv_idx = (row / 2) * (w / 2) + (col / 2);
                let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u.clamp(0, 255) as u8;
                v_plane[uv_idx] = v.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}
