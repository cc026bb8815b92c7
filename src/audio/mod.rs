//! Microphone capture and Opus encoding
//!
//! - `device`: input enumeration over cpal
//! - `capture`: `MicrophoneSource`, a `CaptureSource` for the default host
//! - `encoder`: `OpusAudioEncoder`, an `Encoder` over libopus
//! - `resample`: `LinearResampler`, which brings capture rates such as
//!   44.1 kHz to the 48 kHz Opus runs at

mod capture;
mod device;
mod encoder;
mod resample;

pub use capture::MicrophoneSource;
pub use device::{find_audio_device, get_default_audio_device, list_audio_devices, AudioDevice};
pub use encoder::{
    opus_head, OpusAudioEncoder, OpusEncoder, MAX_INPUT_RATE, MIN_INPUT_RATE, OPUS_FRAME_SAMPLES,
    OPUS_MIME, OPUS_SAMPLE_RATE,
};
pub use resample::LinearResampler;
