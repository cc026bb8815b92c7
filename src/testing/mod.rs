//! Testing utilities for CrabStream
//!
//! Deterministic in-memory collaborators and synthetic media, so pipelines
//! can be exercised offline without cameras, codecs, or a network.

pub mod fakes;
pub mod synthetic_data;

pub use fakes::{
    CollectingInput, CountingPreview, FakeCaptureSource, FakeCaptureSourceHandle, FakeEncoder,
    FakeEncoderHandle, MemoryContainer, MemoryContainerFactory, MemoryRecording,
    RecordingTransport,
};
pub use synthetic_data::{
    synthetic_access_units, synthetic_frame, synthetic_pcm, synthetic_video_frame,
};

use std::sync::Arc;

use crate::pipeline::{OrchestratorBuilder, PipelineOrchestrator};

/// Handles to a complete set of fakes wired into one builder
#[derive(Clone)]
pub struct FakeRig {
    pub camera: FakeCaptureSourceHandle,
    pub microphone: FakeCaptureSourceHandle,
    pub video_encoder: FakeEncoderHandle,
    pub audio_encoder: FakeEncoderHandle,
    pub transport: RecordingTransport,
    pub containers: MemoryContainerFactory,
}

impl FakeRig {
    /// Fresh fakes plus a builder that already holds them. Any part can
    /// still be replaced on the builder before `build`.
    pub fn new() -> (Self, OrchestratorBuilder) {
        let camera = FakeCaptureSource::camera();
        let microphone = FakeCaptureSource::microphone();
        let video_encoder = FakeEncoder::video();
        let audio_encoder = FakeEncoder::audio();
        let transport = RecordingTransport::new();
        let containers = MemoryContainerFactory::new();

        let rig = Self {
            camera: camera.handle(),
            microphone: microphone.handle(),
            video_encoder: video_encoder.handle(),
            audio_encoder: audio_encoder.handle(),
            transport: transport.clone(),
            containers: containers.clone(),
        };

        let builder = PipelineOrchestrator::builder()
            .video_source(Box::new(camera))
            .audio_source(Box::new(microphone))
            .video_encoder(Box::new(video_encoder))
            .audio_encoder(Box::new(audio_encoder))
            .transport(Arc::new(transport))
            .container_factory(Arc::new(containers));

        (rig, builder)
    }

    /// Push one camera frame and one microphone chunk
    pub fn capture_tick(&self) -> usize {
        usize::from(self.camera.emit()) + usize::from(self.microphone.emit())
    }
}
