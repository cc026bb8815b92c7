//! Microphone enumeration
//!
//! Devices are listed default first, then alphabetically, so selectors and
//! switching behave the same across runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};

/// Audio input device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Synthetic identifier, stable while the device list is unchanged
    pub id: String,
    pub name: String,
    /// Default sample rate in Hz
    pub sample_rate: u32,
    pub channels: u16,
    pub is_default: bool,
}

/// cpal does not expose unique ids on every host, so derive one from the
/// enumeration index and the device name
fn device_id(index: usize, name: &str) -> String {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    format!("audio_{}_{:08x}", index, hasher.finish() & 0xFFFF_FFFF)
}

/// List all available audio input devices
pub fn list_audio_devices() -> PipelineResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices: Vec<AudioDevice> = host
        .input_devices()
        .map_err(|e| {
            PipelineError::device_unavailable(format!("Failed to enumerate audio devices: {}", e))
        })?
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;
            Some(AudioDevice {
                id: device_id(index, &name),
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
            })
        })
        .collect();

    sort_devices(&mut devices);
    Ok(devices)
}

fn sort_devices(devices: &mut [AudioDevice]) {
    devices.sort_by(|a, b| match (a.is_default, b.is_default) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

/// The system default input
pub fn get_default_audio_device() -> PipelineResult<AudioDevice> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| PipelineError::device_unavailable("No default audio input device"))?;

    let name = device.name().map_err(|e| {
        PipelineError::device_unavailable(format!("Failed to get device name: {}", e))
    })?;
    let config = device.default_input_config().map_err(|e| {
        PipelineError::device_unavailable(format!("Failed to get device config: {}", e))
    })?;

    Ok(AudioDevice {
        id: device_id(0, &name),
        name,
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
        is_default: true,
    })
}

/// Find an audio device by id or name; empty or "default" picks the default
pub fn find_audio_device(device_id: &str) -> PipelineResult<AudioDevice> {
    if device_id.is_empty() || device_id == "default" {
        return get_default_audio_device();
    }

    list_audio_devices()?
        .into_iter()
        .find(|d| d.id == device_id || d.name == device_id)
        .ok_or_else(|| {
            PipelineError::device_unavailable(format!("Audio device not found: {}", device_id))
        })
}

/// The device after `current` in listing order, wrapping around
pub(crate) fn next_device<'a>(devices: &'a [AudioDevice], current: &str) -> Option<&'a AudioDevice> {
    let position = devices.iter().position(|d| d.name == current)?;
    devices.get((position + 1) % devices.len())
}
