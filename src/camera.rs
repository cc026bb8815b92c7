//! Camera capture over nokhwa
//!
//! Frames arrive on nokhwa's callback thread, are decoded to RGB24, stamped
//! from the pipeline clock, and pushed straight into the bound encoder input.

use std::sync::Arc;

use bytes::Bytes;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{query, CallbackCamera};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::{switch_or_restore, CaptureSource, RawInput};
use crate::timing::PTSClock;
use crate::types::{
    DeviceSelector, Facing, MediaKind, MediaParams, PixelFormat, RawMedia, VideoFrame,
    VideoParams,
};

type SharedInput = Arc<Mutex<Option<Arc<dyn RawInput>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    pub index: u32,
    pub name: String,
    pub description: String,
}

/// List cameras visible to the native backend, in index order
pub fn list_cameras() -> PipelineResult<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)
        .map_err(|e| PipelineError::device_unavailable(format!("Failed to query cameras: {}", e)))?;

    let mut devices: Vec<CameraDevice> = cameras
        .into_iter()
        .filter_map(|info| {
            let index = match info.index() {
                CameraIndex::Index(i) => *i,
                CameraIndex::String(s) => s.parse().ok()?,
            };
            Some(CameraDevice {
                index,
                name: info.human_name().to_string(),
                description: info.description().to_string(),
            })
        })
        .collect();
    devices.sort_by_key(|d| d.index);
    Ok(devices)
}

/// Pick a device for `selector`. Desktop cameras report no facing, so the
/// first camera stands in for the back one and the second for the front.
fn select_device(
    devices: &[CameraDevice],
    selector: &DeviceSelector,
    last: Option<u32>,
) -> PipelineResult<CameraDevice> {
    let found = match selector {
        DeviceSelector::Default => devices.first(),
        DeviceSelector::Facing(Facing::Back) => devices.first(),
        DeviceSelector::Facing(Facing::Front) => devices.get(1),
        DeviceSelector::Id(id) => devices
            .iter()
            .find(|d| d.index.to_string() == *id || d.name == *id),
        DeviceSelector::Last => match last {
            Some(index) => devices.iter().find(|d| d.index == index),
            None => devices.first(),
        },
    };
    found
        .cloned()
        .ok_or_else(|| PipelineError::device_unavailable(format!("no camera for {:?}", selector)))
}

fn next_camera(devices: &[CameraDevice], current: u32) -> Option<&CameraDevice> {
    let position = devices.iter().position(|d| d.index == current)?;
    devices.get((position + 1) % devices.len())
}

/// Camera implementing `CaptureSource`
pub struct NokhwaCameraSource {
    params: VideoParams,
    device: Option<CameraDevice>,
    last_index: Option<u32>,
    camera: Option<CallbackCamera>,
    streaming: bool,
    input: SharedInput,
    clock: PTSClock,
}

// SAFETY: the callback camera is only reached through `&mut self`, so it is
// never used from two threads at once.
unsafe impl Send for NokhwaCameraSource {}

impl NokhwaCameraSource {
    /// `clock` should be shared with the microphone so both tracks use one timeline
    pub fn new(clock: PTSClock) -> Self {
        Self {
            params: VideoParams::default(),
            device: None,
            last_index: None,
            camera: None,
            streaming: false,
            input: Arc::new(Mutex::new(None)),
            clock,
        }
    }

    pub fn device(&self) -> Option<&CameraDevice> {
        self.device.as_ref()
    }

    fn requested_format(&self) -> RequestedFormat<'static> {
        let format = CameraFormat::new(
            Resolution::new(self.params.width, self.params.height),
            FrameFormat::MJPEG,
            self.params.fps,
        );
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format))
    }

    fn open_device(&mut self, device: CameraDevice) -> PipelineResult<()> {
        let input = self.input.clone();
        let clock = self.clock.clone();
        let callback = move |buffer: nokhwa::Buffer| {
            let pts_us = clock.pts_us();
            let image = match buffer.decode_image::<RgbFormat>() {
                Ok(image) => image,
                Err(e) => {
                    log::debug!("Dropping undecodable camera frame: {}", e);
                    return;
                }
            };
            let (width, height) = (image.width(), image.height());
            let frame = VideoFrame {
                data: Bytes::from(image.into_raw()),
                width,
                height,
                format: PixelFormat::Rgb24,
                pts_us,
            };
            if let Some(target) = input.lock().as_ref() {
                target.push(RawMedia::Video(frame));
            }
        };

        let camera = CallbackCamera::new(
            CameraIndex::Index(device.index),
            self.requested_format(),
            callback,
        )
        .map_err(|e| {
            PipelineError::device_unavailable(format!("Failed to initialize camera: {}", e))
        })?;

        log::info!("Camera opened: {} (index {})", device.name, device.index);
        self.last_index = Some(device.index);
        self.device = Some(device);
        self.camera = Some(camera);
        Ok(())
    }

    fn open_stream(&mut self) -> PipelineResult<()> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| PipelineError::invalid_state("camera is not open"))?;
        camera
            .open_stream()
            .map_err(|e| PipelineError::device_unavailable(format!("Failed to start stream: {}", e)))?;
        self.streaming = true;
        Ok(())
    }
}

impl CaptureSource for NokhwaCameraSource {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn prepare(&mut self, params: &MediaParams) -> PipelineResult<()> {
        let MediaParams::Video(video) = params else {
            return Err(PipelineError::ConfigurationRejected(
                "camera needs video parameters".to_string(),
            ));
        };
        if video.rotation != 0 {
            log::debug!("Camera rotation {} left to the encoder side", video.rotation);
        }
        self.params = video.clone();
        Ok(())
    }

    fn open(&mut self, selector: &DeviceSelector) -> PipelineResult<()> {
        let devices = list_cameras()?;
        let device = select_device(&devices, selector, self.last_index)?;
        if self.device.as_ref() == Some(&device) && self.camera.is_some() {
            return Ok(());
        }
        self.close();
        self.open_device(device)
    }

    fn close(&mut self) {
        self.stop();
        if self.camera.take().is_some() {
            if let Some(device) = self.device.take() {
                log::info!("Camera closed: {}", device.name);
            }
        }
    }

    fn switch_device(&mut self) -> PipelineResult<()> {
        let current = self
            .device
            .clone()
            .ok_or_else(|| PipelineError::invalid_state("no camera open"))?;
        let devices = list_cameras()?;
        let next = next_camera(&devices, current.index)
            .filter(|d| d.index != current.index)
            .cloned()
            .ok_or_else(|| PipelineError::device_unavailable("no other camera"))?;

        let was_streaming = self.streaming;
        self.close();
        switch_or_restore(&current, &next, |device| {
            self.open_device(device.clone())?;
            if was_streaming {
                if let Err(e) = self.open_stream() {
                    self.close();
                    return Err(e);
                }
            }
            Ok(())
        })
    }

    fn bind(&mut self, input: Option<Arc<dyn RawInput>>) {
        *self.input.lock() = input;
    }

    fn start(&mut self) -> PipelineResult<()> {
        if self.streaming {
            return Ok(());
        }
        self.open_stream()
    }

    fn stop(&mut self) {
        if !self.streaming {
            return;
        }
        if let Some(camera) = self.camera.as_mut() {
            if let Err(e) = camera.stop_stream() {
                log::warn!("Failed to stop camera stream: {}", e);
            }
        }
        self.streaming = false;
    }

    fn is_open(&self) -> bool {
        self.camera.is_some()
    }
}

impl Drop for NokhwaCameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
