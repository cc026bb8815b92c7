//! Microphone capture over cpal
//!
//! The cpal stream lives on its own thread for the whole capture session and
//! pushes interleaved f32 PCM straight into the bound encoder input.

use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;

use super::device::{find_audio_device, list_audio_devices, next_device, AudioDevice};
use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::{CaptureSource, RawInput};
use crate::timing::PTSClock;
use crate::types::{AudioParams, DeviceSelector, MediaKind, MediaParams, PcmChunk, RawMedia};

type SharedInput = Arc<Mutex<Option<Arc<dyn RawInput>>>>;

struct CaptureThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Microphone implementing `CaptureSource`
pub struct MicrophoneSource {
    params: AudioParams,
    device: Option<AudioDevice>,
    input: SharedInput,
    clock: PTSClock,
    thread: Option<CaptureThread>,
}

impl MicrophoneSource {
    /// `clock` should be shared with the camera so both tracks use one timeline
    pub fn new(clock: PTSClock) -> Self {
        Self {
            params: AudioParams::default(),
            device: None,
            input: Arc::new(Mutex::new(None)),
            clock,
            thread: None,
        }
    }

    pub fn device(&self) -> Option<&AudioDevice> {
        self.device.as_ref()
    }

    pub fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn resolve(&self, selector: &DeviceSelector) -> PipelineResult<AudioDevice> {
        match selector {
            DeviceSelector::Id(id) => find_audio_device(id),
            DeviceSelector::Last => match &self.device {
                Some(device) => find_audio_device(&device.name),
                None => find_audio_device("default"),
            },
            DeviceSelector::Default | DeviceSelector::Facing(_) => find_audio_device("default"),
        }
    }

    fn spawn_capture(&mut self, device: &AudioDevice) -> PipelineResult<()> {
        let config = StreamConfig {
            channels: self.params.channels(),
            sample_rate: cpal::SampleRate(self.params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let name = device.name.clone();
        let input = self.input.clone();
        let clock = self.clock.clone();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<PipelineResult<()>>(1);

        let handle = std::thread::Builder::new()
            .name("crabstream-microphone".to_string())
            .spawn(move || {
                let stream = match build_stream(&name, &config, input, clock) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PipelineError::device_unavailable(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop is requested or the sender is dropped
                let _ = stop_rx.recv();
                let _ = stream.pause();
            })
            .map_err(|e| {
                PipelineError::device_unavailable(format!("Failed to spawn capture thread: {}", e))
            })?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(PipelineError::device_unavailable(
                "capture thread exited before starting",
            ))
        });
        match ready {
            Ok(()) => {
                self.thread = Some(CaptureThread {
                    stop: stop_tx,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }
}

fn build_stream(
    device_name: &str,
    config: &StreamConfig,
    input: SharedInput,
    clock: PTSClock,
) -> PipelineResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .input_devices()
        .map_err(|e| PipelineError::device_unavailable(format!("Failed to enumerate devices: {}", e)))?
        .find(|d| d.name().ok().as_deref() == Some(device_name))
        .ok_or_else(|| PipelineError::device_unavailable(format!("Device not found: {}", device_name)))?;

    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let chunk = PcmChunk {
                    samples: data.to_vec(),
                    sample_rate,
                    channels,
                    pts_us: clock.pts_us(),
                };
                if let Some(target) = input.lock().as_ref() {
                    target.push(RawMedia::Audio(chunk));
                }
            },
            move |err| {
                log::error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| PipelineError::device_unavailable(format!("Failed to build stream: {}", e)))
}

impl CaptureSource for MicrophoneSource {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn prepare(&mut self, params: &MediaParams) -> PipelineResult<()> {
        let MediaParams::Audio(audio) = params else {
            return Err(PipelineError::ConfigurationRejected(
                "microphone needs audio parameters".to_string(),
            ));
        };
        if audio.echo_canceler || audio.noise_suppressor {
            log::debug!("Echo cancellation and noise suppression are left to the host");
        }
        self.params = audio.clone();
        Ok(())
    }

    fn open(&mut self, selector: &DeviceSelector) -> PipelineResult<()> {
        let device = self.resolve(selector)?;
        log::info!("Microphone opened: {}", device.name);
        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) {
        self.stop();
        if let Some(device) = self.device.take() {
            log::info!("Microphone closed: {}", device.name);
        }
    }

    fn switch_device(&mut self) -> PipelineResult<()> {
        let current = self
            .device
            .clone()
            .ok_or_else(|| PipelineError::invalid_state("no microphone open"))?;
        let devices = list_audio_devices()?;
        let next = next_device(&devices, &current.name)
            .cloned()
            .ok_or_else(|| PipelineError::device_unavailable("no other microphone"))?;

        let was_capturing = self.is_capturing();
        self.stop();
        self.device = Some(next.clone());
        if was_capturing {
            self.spawn_capture(&next)?;
        }
        log::info!("Microphone switched to {}", next.name);
        Ok(())
    }

    fn bind(&mut self, input: Option<Arc<dyn RawInput>>) {
        *self.input.lock() = input;
    }

    fn start(&mut self) -> PipelineResult<()> {
        if self.is_capturing() {
            return Ok(());
        }
        let device = self
            .device
            .clone()
            .ok_or_else(|| PipelineError::invalid_state("microphone is not open"))?;
        self.spawn_capture(&device)
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.stop.send(());
            if thread.handle.join().is_err() {
                log::error!("Microphone capture thread panicked");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}
