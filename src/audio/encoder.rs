//! Opus audio encoder
//!
//! `OpusEncoder` is the single-threaded libopus wrapper. `OpusAudioEncoder`
//! runs one on a worker thread and implements the pipeline `Encoder`
//! contract, including silence substitution while muted. Input at any other
//! rate is resampled to 48 kHz on the worker before encoding.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use super::resample::LinearResampler;
use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::{Encoder, EncoderOutput, RawInput};
use crate::timing::samples_to_us;
use crate::types::{
    AccessUnit, AudioParams, MediaKind, MediaParams, PcmChunk, RawMedia, TrackFormat,
};

/// 20 ms at 48 kHz, per channel
pub const OPUS_FRAME_SAMPLES: usize = 960;

pub const OPUS_SAMPLE_RATE: u32 = 48_000;

pub const OPUS_MIME: &str = "audio/opus";

/// Capture rates accepted by `OpusAudioEncoder::configure`
pub const MIN_INPUT_RATE: u32 = 8_000;
pub const MAX_INPUT_RATE: u32 = 192_000;

/// OPUS_APPLICATION_AUDIO
const OPUS_APPLICATION_AUDIO: i32 = 2049;

/// Largest packet libopus will produce
const MAX_PACKET_BYTES: usize = 4000;

/// Encoder pre-skip advertised in the Opus header, in 48 kHz samples
const OPUS_PRE_SKIP: u16 = 312;

/// PCM chunks buffered between capture and the encode thread.
/// Roughly five seconds of 20 ms callbacks.
const MAX_PENDING_CHUNKS: usize = 256;

/// libopus encoder state
///
/// Must only be used from one thread at a time. It is `Send` so it can be
/// moved onto the encode thread, and deliberately not `Sync`.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    sample_buffer: Vec<f32>,
    /// Timestamp of the first buffered sample, fixed for the encoder's life
    base_pts_us: Option<u64>,
    samples_encoded: u64,
}

// SAFETY: the pointer is owned exclusively by this value and libopus
// encoders may be used from any single thread. No `Sync` impl exists.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    pub fn new(sample_rate: u32, channels: u16, bitrate: u32) -> PipelineResult<Self> {
        if sample_rate != OPUS_SAMPLE_RATE {
            return Err(PipelineError::Encoding(
                "Opus requires 48000 Hz sample rate".to_string(),
            ));
        }
        if channels != 1 && channels != 2 {
            return Err(PipelineError::Encoding(
                "Opus supports only mono (1) or stereo (2) channels".to_string(),
            ));
        }

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                sample_rate as i32,
                i32::from(channels),
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };
        if encoder.is_null() || error != 0 {
            return Err(PipelineError::Encoding(format!(
                "Failed to create Opus encoder: error code {}",
                error
            )));
        }

        let mut opus = Self {
            encoder,
            channels,
            sample_buffer: Vec::with_capacity(OPUS_FRAME_SAMPLES * usize::from(channels) * 2),
            base_pts_us: None,
            samples_encoded: 0,
        };
        // Drop destroys the half-built encoder if this fails
        opus.set_bitrate(bitrate)?;
        Ok(opus)
    }

    pub fn set_bitrate(&mut self, bitrate: u32) -> PipelineResult<()> {
        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                self.encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            return Err(PipelineError::Encoding(format!(
                "Failed to set bitrate: error code {}",
                result
            )));
        }
        Ok(())
    }

    /// Buffer `chunk` and encode every complete 20 ms frame
    pub fn encode(&mut self, chunk: &PcmChunk) -> PipelineResult<Vec<AccessUnit>> {
        if chunk.sample_rate != OPUS_SAMPLE_RATE {
            return Err(PipelineError::Encoding(format!(
                "Sample rate mismatch: expected {}, got {}",
                OPUS_SAMPLE_RATE, chunk.sample_rate
            )));
        }
        if chunk.channels != self.channels {
            return Err(PipelineError::Encoding(format!(
                "Channel count mismatch: expected {}, got {}",
                self.channels, chunk.channels
            )));
        }
        if self.base_pts_us.is_none() && !chunk.samples.is_empty() {
            self.base_pts_us = Some(chunk.pts_us);
        }
        self.sample_buffer.extend_from_slice(&chunk.samples);
        self.drain_frames()
    }

    /// Pad the remainder with silence and encode it
    pub fn flush(&mut self) -> PipelineResult<Vec<AccessUnit>> {
        let frame_len = self.frame_len();
        let remainder = self.sample_buffer.len() % frame_len;
        if remainder != 0 {
            self.sample_buffer.resize(self.sample_buffer.len() + frame_len - remainder, 0.0);
        }
        self.drain_frames()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples_encoded(&self) -> u64 {
        self.samples_encoded
    }

    fn frame_len(&self) -> usize {
        OPUS_FRAME_SAMPLES * usize::from(self.channels)
    }

    fn drain_frames(&mut self) -> PipelineResult<Vec<AccessUnit>> {
        let frame_len = self.frame_len();
        let mut units = Vec::new();

        while self.sample_buffer.len() >= frame_len {
            let frame: Vec<f32> = self.sample_buffer.drain(..frame_len).collect();
            let mut packet = vec![0u8; MAX_PACKET_BYTES];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    frame.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    packet.as_mut_ptr(),
                    packet.len() as i32,
                )
            };
            if len < 0 {
                return Err(PipelineError::Encoding(format!(
                    "Opus encoding failed: error code {}",
                    len
                )));
            }
            packet.truncate(len as usize);

            let pts_us = self.base_pts_us.unwrap_or(0)
                + samples_to_us(self.samples_encoded, OPUS_SAMPLE_RATE);
            units.push(AccessUnit::audio(packet, pts_us));
            self.samples_encoded += OPUS_FRAME_SAMPLES as u64;
        }

        Ok(units)
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe {
                libopus_sys::opus_encoder_destroy(self.encoder);
            }
        }
    }
}

/// `OpusHead` identification header (RFC 7845), used as codec config
pub fn opus_head(channels: u16) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1);
    head.push(channels as u8);
    head.extend_from_slice(&OPUS_PRE_SKIP.to_le_bytes());
    head.extend_from_slice(&OPUS_SAMPLE_RATE.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    head.push(0);
    head
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    silence: AtomicBool,
    bitrate: AtomicU32,
    chunks_dropped: AtomicU64,
    units_emitted: AtomicU64,
}

struct OpusInput {
    sender: Mutex<Option<Sender<PcmChunk>>>,
    shared: Arc<Shared>,
}

impl RawInput for OpusInput {
    fn push(&self, media: RawMedia) {
        let RawMedia::Audio(chunk) = media else {
            return;
        };
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return;
        };
        if let Err(TrySendError::Full(_)) = sender.try_send(chunk) {
            self.shared.chunks_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Opus encoder implementing the pipeline `Encoder` contract
pub struct OpusAudioEncoder {
    params: Option<AudioParams>,
    shared: Arc<Shared>,
    input: Arc<OpusInput>,
    worker: Option<JoinHandle<()>>,
}

impl OpusAudioEncoder {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        Self {
            params: None,
            input: Arc::new(OpusInput {
                sender: Mutex::new(None),
                shared: shared.clone(),
            }),
            shared,
            worker: None,
        }
    }

    pub fn params(&self) -> Option<&AudioParams> {
        self.params.as_ref()
    }

    pub fn units_emitted(&self) -> u64 {
        self.shared.units_emitted.load(Ordering::Relaxed)
    }

    /// PCM chunks discarded because the encode thread fell behind
    pub fn chunks_dropped(&self) -> u64 {
        self.shared.chunks_dropped.load(Ordering::Relaxed)
    }
}

impl Default for OpusAudioEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for OpusAudioEncoder {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn configure(&mut self, params: &MediaParams) -> bool {
        let MediaParams::Audio(audio) = params else {
            return false;
        };
        if self.is_running() {
            log::warn!("Cannot reconfigure Opus encoder while running");
            return false;
        }
        let rate_ok = (MIN_INPUT_RATE..=MAX_INPUT_RATE).contains(&audio.sample_rate);
        if !rate_ok || audio.bitrate == 0 {
            log::warn!(
                "Unsupported Opus configuration {} Hz {} bps",
                audio.sample_rate,
                audio.bitrate
            );
            return false;
        }
        self.shared.bitrate.store(audio.bitrate, Ordering::Relaxed);
        self.params = Some(audio.clone());
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
            .ok_or_else(|| PipelineError::invalid_state("Opus encoder is not configured"))?;
        let bitrate = self.shared.bitrate.load(Ordering::Relaxed);
        let encoder = OpusEncoder::new(OPUS_SAMPLE_RATE, params.channels(), bitrate)?;
        if params.sample_rate != OPUS_SAMPLE_RATE {
            log::info!(
                "Resampling {} Hz capture to {} Hz for Opus",
                params.sample_rate,
                OPUS_SAMPLE_RATE
            );
        }

        let (sender, receiver) = bounded(MAX_PENDING_CHUNKS);
        *self.input.sender.lock() = Some(sender);
        self.shared.running.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("crabstream-opus".to_string())
            .spawn(move || encode_loop(encoder, receiver, output, shared));

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
        *self.input.sender.lock() = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Opus encode thread panicked");
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
        Ok(())
    }

    fn substitute_with_filler(&mut self, enabled: bool) {
        self.shared.silence.store(enabled, Ordering::Release);
    }
}

impl Drop for OpusAudioEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn encode_loop(
    mut encoder: OpusEncoder,
    receiver: Receiver<PcmChunk>,
    output: Arc<dyn EncoderOutput>,
    shared: Arc<Shared>,
) {
    let channels = encoder.channels();
    let mut applied_bitrate = shared.bitrate.load(Ordering::Relaxed);
    output.on_format(
        TrackFormat::audio(OPUS_MIME, OPUS_SAMPLE_RATE, channels, applied_bitrate)
            .with_codec_config(opus_head(channels)),
    );

    let frame_period = Duration::from_millis(20);
    let frame_us = samples_to_us(OPUS_FRAME_SAMPLES as u64, OPUS_SAMPLE_RATE);
    let mut next_pts_us: Option<u64> = None;
    let mut resampler: Option<LinearResampler> = None;

    while shared.running.load(Ordering::Acquire) {
        let silence = shared.silence.load(Ordering::Acquire);
        let chunk = match receiver.recv_timeout(frame_period) {
            Ok(mut chunk) => {
                if silence {
                    chunk.samples.iter_mut().for_each(|s| *s = 0.0);
                }
                chunk
            }
            // Keep a muted track flowing even when the microphone is quiet
            Err(RecvTimeoutError::Timeout) if silence => PcmChunk {
                samples: vec![0.0; OPUS_FRAME_SAMPLES * usize::from(channels)],
                sample_rate: OPUS_SAMPLE_RATE,
                channels,
                pts_us: next_pts_us.unwrap_or(0),
            },
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let chunk = to_opus_rate(chunk, &mut resampler);

        let requested = shared.bitrate.load(Ordering::Relaxed);
        if requested != applied_bitrate {
            match encoder.set_bitrate(requested) {
                Ok(()) => {
                    log::debug!("Opus bitrate now {} bps", requested);
                    applied_bitrate = requested;
                }
                Err(e) => log::warn!("Keeping Opus bitrate {}: {}", applied_bitrate, e),
            }
        }

        match encoder.encode(&chunk) {
            Ok(units) => {
                for unit in units {
                    next_pts_us = Some(unit.pts_us + frame_us);
                    shared.units_emitted.fetch_add(1, Ordering::Relaxed);
                    output.on_access_unit(unit);
                }
            }
            Err(e) => log::warn!("Dropping PCM chunk at {} us: {}", chunk.pts_us, e),
        }
    }

    match encoder.flush() {
        Ok(units) => units.into_iter().for_each(|unit| output.on_access_unit(unit)),
        Err(e) => log::warn!("Opus flush failed: {}", e),
    }
    log::debug!("Opus encode thread exiting");
}

/// Bring `chunk` to 48 kHz, keeping resampler state while the input rate holds
fn to_opus_rate(chunk: PcmChunk, resampler: &mut Option<LinearResampler>) -> PcmChunk {
    if chunk.sample_rate == OPUS_SAMPLE_RATE {
        return chunk;
    }
    let reusable = resampler
        .as_ref()
        .is_some_and(|r| r.from_rate() == chunk.sample_rate && r.channels() == chunk.channels);
    if !reusable {
        log::debug!("Opus input resampler now {} Hz", chunk.sample_rate);
        *resampler = Some(LinearResampler::new(
            chunk.sample_rate,
            OPUS_SAMPLE_RATE,
            chunk.channels,
        ));
    }
    let samples = match resampler.as_mut() {
        Some(r) => r.process(&chunk.samples),
        None => chunk.samples,
    };
    PcmChunk {
        samples,
        sample_rate: OPUS_SAMPLE_RATE,
        channels: chunk.channels,
        pts_us: chunk.pts_us,
    }
}
