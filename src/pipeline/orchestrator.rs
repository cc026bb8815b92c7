//! The pipeline orchestrator and its lifecycle
//!
//! Owns one capture source and one encoder per media kind, the frame sink,
//! and the router that fans encoder output out to the transport and the
//! active recording. Lifecycle methods run on a single controlling thread;
//! encoder callbacks only ever touch the router.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{ConnectionReporter, PipelineEvent, EVENT_CAPACITY};
use super::router::Router;
use super::session::{PipelineState, Session, SessionSnapshot};
use super::traits::{
    CaptureSource, ContainerWriterFactory, Credentials, Encoder, EncoderOutput, OpenRequest,
    TransportSink,
};
use crate::assert_invariant;
use crate::config::CrabStreamConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::invariant_ppt::{PREVIEW_EXCLUDES_STREAMING, RECORDING_IMPLIES_STREAMING};
use crate::recording::{recording_file_name, ActiveRecording, RecordingSummary};
use crate::sink::{EncoderBinding, EncoderOnlySink, FrameSink, SinkMode};
use crate::types::{AudioParams, DeviceSelector, MediaKind, MediaParams, VideoParams};

/// Assembles a `PipelineOrchestrator` from its collaborators
#[derive(Default)]
pub struct OrchestratorBuilder {
    video_source: Option<Box<dyn CaptureSource>>,
    audio_source: Option<Box<dyn CaptureSource>>,
    video_encoder: Option<Box<dyn Encoder>>,
    audio_encoder: Option<Box<dyn Encoder>>,
    transport: Option<Arc<dyn TransportSink>>,
    containers: Option<Arc<dyn ContainerWriterFactory>>,
    frame_sink: Option<Box<dyn FrameSink>>,
    config: Option<CrabStreamConfig>,
}

impl OrchestratorBuilder {
    pub fn video_source(mut self, source: Box<dyn CaptureSource>) -> Self {
        self.video_source = Some(source);
        self
    }

    pub fn audio_source(mut self, source: Box<dyn CaptureSource>) -> Self {
        self.audio_source = Some(source);
        self
    }

    pub fn video_encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.video_encoder = Some(encoder);
        self
    }

    pub fn audio_encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.audio_encoder = Some(encoder);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn TransportSink>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn container_factory(mut self, factory: Arc<dyn ContainerWriterFactory>) -> Self {
        self.containers = Some(factory);
        self
    }

    /// Defaults to `EncoderOnlySink`
    pub fn frame_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.frame_sink = Some(sink);
        self
    }

    pub fn config(mut self, config: CrabStreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> PipelineResult<PipelineOrchestrator> {
        fn required<T>(part: Option<T>, name: &str) -> PipelineResult<T> {
            part.ok_or_else(|| PipelineError::Config(format!("missing {}", name)))
        }

        let video_source = required(self.video_source, "video source")?;
        let audio_source = required(self.audio_source, "audio source")?;
        let video_encoder = required(self.video_encoder, "video encoder")?;
        let audio_encoder = required(self.audio_encoder, "audio encoder")?;
        let transport = required(self.transport, "transport")?;
        let containers = required(self.containers, "container factory")?;
        let config = self.config.unwrap_or_default();
        config.validate().map_err(PipelineError::Config)?;

        let kinds = [
            ("video source", video_source.kind(), MediaKind::Video),
            ("audio source", audio_source.kind(), MediaKind::Audio),
            ("video encoder", video_encoder.kind(), MediaKind::Video),
            ("audio encoder", audio_encoder.kind(), MediaKind::Audio),
        ];
        for (name, actual, expected) in kinds {
            if actual != expected {
                return Err(PipelineError::Config(format!(
                    "{} handles {} media",
                    name,
                    actual.as_str()
                )));
            }
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let credentials = Credentials::from_parts(&config.stream.user, &config.stream.password);
        let orchestrator = PipelineOrchestrator {
            id: Uuid::new_v4(),
            video_source,
            audio_source,
            video_encoder,
            audio_encoder,
            frame_sink: self
                .frame_sink
                .unwrap_or_else(|| Box::new(EncoderOnlySink::new())),
            containers,
            router: Arc::new(Router::new(transport)),
            session: Session::default(),
            config,
            credentials,
            events,
            last_state: PipelineState::Idle,
        };

        log::info!(
            "Pipeline {} ready ({:?} sink)",
            orchestrator.id,
            orchestrator.frame_sink.mode()
        );
        Ok(orchestrator)
    }
}

/// Sequences capture, encode, recording, and transport lifecycles
pub struct PipelineOrchestrator {
    id: Uuid,
    video_source: Box<dyn CaptureSource>,
    audio_source: Box<dyn CaptureSource>,
    video_encoder: Box<dyn Encoder>,
    audio_encoder: Box<dyn Encoder>,
    frame_sink: Box<dyn FrameSink>,
    containers: Arc<dyn ContainerWriterFactory>,
    router: Arc<Router>,
    session: Session,
    config: CrabStreamConfig,
    credentials: Option<Credentials>,
    events: broadcast::Sender<PipelineEvent>,
    last_state: PipelineState,
}

impl PipelineOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    // ---- preparation ------------------------------------------------------

    /// Configure the video encoder and hand the camera output to it.
    ///
    /// Returns false when streaming or when the encoder or camera refuses
    /// the parameters. If the camera refuses, the encoder goes back to the
    /// previously prepared parameters.
    pub fn prepare_video(&mut self, params: VideoParams) -> bool {
        if self.session.streaming_active {
            log::warn!("prepare_video ignored while streaming");
            return false;
        }
        if self.session.preview_active {
            self.release_preview_surface();
        }

        let media = MediaParams::Video(params.clone());
        if !self.video_encoder.configure(&media) {
            log::warn!(
                "Video encoder rejected {}x{}@{} {} bps",
                params.width,
                params.height,
                params.fps,
                params.bitrate
            );
            return false;
        }
        if let Err(e) = self.video_source.prepare(&media) {
            log::warn!("Camera rejected video parameters: {}", e);
            if let Some(previous) = self.session.video.clone() {
                if !self.video_encoder.configure(&MediaParams::Video(previous)) {
                    log::error!("Video encoder could not return to its previous parameters");
                }
            }
            return false;
        }

        self.frame_sink.bind(Some(EncoderBinding {
            input: self.video_encoder.input(),
            width: params.width,
            height: params.height,
            fps: params.fps,
        }));
        self.video_source.bind(Some(self.frame_sink.surface_handle()));
        self.video_encoder.substitute_with_filler(false);

        log::info!(
            "Video prepared: {}x{}@{} {} bps, rotation {}",
            params.width,
            params.height,
            params.fps,
            params.bitrate,
            params.rotation
        );
        self.session.video = Some(params);
        self.session.video_enabled = true;
        self.publish_state();
        true
    }

    /// Configure the audio encoder and hand the microphone output to it.
    ///
    /// The encoder is configured first; the microphone is only prepared and
    /// bound once the encoder accepted. A microphone refusal puts the encoder
    /// back on the previously prepared parameters.
    pub fn prepare_audio(&mut self, params: AudioParams) -> bool {
        if self.session.streaming_active {
            log::warn!("prepare_audio ignored while streaming");
            return false;
        }

        let media = MediaParams::Audio(params.clone());
        if !self.audio_encoder.configure(&media) {
            log::warn!(
                "Audio encoder rejected {} Hz {} ch {} bps",
                params.sample_rate,
                params.channels(),
                params.bitrate
            );
            return false;
        }
        if let Err(e) = self.audio_source.prepare(&media) {
            log::warn!("Microphone rejected audio parameters: {}", e);
            if let Some(previous) = self.session.audio.clone() {
                if !self.audio_encoder.configure(&MediaParams::Audio(previous)) {
                    log::error!("Audio encoder could not return to its previous parameters");
                }
            }
            return false;
        }

        self.audio_source.bind(Some(self.audio_encoder.input()));
        self.audio_encoder.substitute_with_filler(false);

        log::info!(
            "Audio prepared: {} Hz {} ch {} bps",
            params.sample_rate,
            params.channels(),
            params.bitrate
        );
        self.session.audio = Some(params);
        self.session.audio_muted = false;
        self.publish_state();
        true
    }

    /// `prepare_video` with the configured defaults
    pub fn prepare_video_default(&mut self) -> bool {
        let params = VideoParams::from(&self.config.video);
        self.prepare_video(params)
    }

    /// `prepare_audio` with the configured defaults
    pub fn prepare_audio_default(&mut self) -> bool {
        let params = AudioParams::from(&self.config.audio);
        self.prepare_audio(params)
    }

    // ---- preview ----------------------------------------------------------

    /// Open the camera and show it through the frame sink without encoding.
    /// No-op while streaming or already previewing.
    pub fn start_preview(&mut self, selector: DeviceSelector) -> PipelineResult<()> {
        if self.session.streaming_active || self.session.preview_active {
            log::debug!("start_preview ignored in {:?}", self.session.state());
            return Ok(());
        }

        if self.video_source.is_open() {
            self.video_source.stop();
            self.video_source.close();
        }
        self.video_source.open(&selector)?;

        self.frame_sink.bind(None);
        if let Err(e) = self.frame_sink.start() {
            self.video_source.close();
            return Err(e);
        }
        self.video_source.bind(Some(self.frame_sink.surface_handle()));
        if let Err(e) = self.video_source.start() {
            self.frame_sink.stop();
            self.video_source.close();
            return Err(e);
        }

        log::info!("Preview started on {:?}", selector);
        self.session.preview_active = true;
        self.publish_state();
        Ok(())
    }

    /// Stop the preview and close the camera. No-op unless previewing.
    pub fn stop_preview(&mut self) {
        if !self.session.preview_active || self.session.streaming_active {
            return;
        }
        self.frame_sink.stop();
        self.video_source.stop();
        self.video_source.close();
        self.session.preview_active = false;
        log::info!("Preview stopped");
        self.publish_state();
    }

    /// Give up the preview's hold on the capture surface but keep the device
    /// open so a following stream can reuse it
    fn release_preview_surface(&mut self) {
        self.frame_sink.stop();
        self.video_source.stop();
        self.session.preview_active = false;
        log::debug!("Preview surface released");
        self.publish_state();
    }

    // ---- streaming --------------------------------------------------------

    /// Start encoders, acquire and start capture, then open the transport.
    ///
    /// The state moves to `Streaming` as soon as `open` is issued. A failed
    /// `open` is reported as `TransportFailure` but capture and encode keep
    /// running until `stop_stream`.
    pub fn start_stream(&mut self, url: &str) -> PipelineResult<()> {
        if self.session.streaming_active {
            return Err(PipelineError::invalid_state("already streaming"));
        }
        if !self.session.is_prepared() {
            return Err(PipelineError::invalid_state(
                "prepare_video or prepare_audio must succeed before start_stream",
            ));
        }
        if self.session.preview_active {
            self.release_preview_surface();
        }
        self.router.clear_formats();

        self.start_encoders()?;
        if let Err(e) = self.acquire_capture() {
            self.release_capture();
            self.stop_encoders();
            return Err(e);
        }
        if let Err(e) = self.start_sources() {
            self.release_capture();
            self.stop_encoders();
            return Err(e);
        }

        self.router.set_streaming(true);
        self.session.streaming_active = true;
        self.publish_state();

        let request = OpenRequest {
            url: url.to_string(),
            formats: self.router.formats().to_vec(),
            credentials: self.credentials.clone(),
        };
        log::info!(
            "Opening stream to {} with {} known track(s)",
            url,
            request.formats.len()
        );

        let reporter = self.reporter();
        if let Err(e) = self.router.transport().open(request, reporter.clone()) {
            let reason = match e {
                PipelineError::TransportFailure(reason) => reason,
                other => other.to_string(),
            };
            reporter.connection_failed(reason.clone());
            return Err(PipelineError::TransportFailure(reason));
        }
        Ok(())
    }

    /// Tear the stream down in reverse order. Finalizes an active recording
    /// first. Safe to call in any state.
    pub fn stop_stream(&mut self) {
        if !self.session.streaming_active {
            return;
        }
        if self.session.recording_active {
            self.stop_record();
        }

        self.release_capture();
        self.router.set_streaming(false);
        self.router.transport().close();
        self.stop_encoders();
        self.router.clear_formats();

        self.session.streaming_active = false;
        log::info!("Stream stopped");
        self.publish_state();
    }

    fn start_encoders(&mut self) -> PipelineResult<()> {
        let output: Arc<dyn EncoderOutput> = self.router.clone();
        if self.session.video.is_some() {
            self.video_encoder.start(output.clone())?;
        }
        if self.session.audio.is_some() {
            if let Err(e) = self.audio_encoder.start(output) {
                self.video_encoder.stop();
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop_encoders(&mut self) {
        self.video_encoder.stop();
        self.audio_encoder.stop();
    }

    /// Bind sources to their consumers, reusing a device left open by the
    /// preview and opening the default one otherwise
    fn acquire_capture(&mut self) -> PipelineResult<()> {
        if let Some(video) = &self.session.video {
            self.frame_sink.bind(Some(EncoderBinding {
                input: self.video_encoder.input(),
                width: video.width,
                height: video.height,
                fps: video.fps,
            }));
            self.frame_sink.start()?;
            if !self.video_source.is_open() {
                self.video_source.open(&DeviceSelector::Default)?;
            }
            self.video_source.bind(Some(self.frame_sink.surface_handle()));
        }
        if self.session.audio.is_some() {
            if !self.audio_source.is_open() {
                self.audio_source.open(&DeviceSelector::Default)?;
            }
            self.audio_source.bind(Some(self.audio_encoder.input()));
        }
        Ok(())
    }

    fn start_sources(&mut self) -> PipelineResult<()> {
        if self.session.video.is_some() {
            self.video_source.start()?;
        }
        if self.session.audio.is_some() {
            if let Err(e) = self.audio_source.start() {
                self.video_source.stop();
                return Err(e);
            }
        }
        Ok(())
    }

    fn release_capture(&mut self) {
        self.frame_sink.stop();
        self.video_source.stop();
        self.video_source.close();
        self.audio_source.stop();
        self.audio_source.close();
    }

    // ---- recording --------------------------------------------------------

    /// Record the live stream into a container at `path`.
    ///
    /// Fails with `InvalidState` before touching the filesystem unless a
    /// stream is live, nothing is being recorded, and at least one track
    /// format is known.
    pub fn start_record(&mut self, path: impl AsRef<Path>) -> PipelineResult<()> {
        let path = path.as_ref();
        if !self.session.streaming_active {
            return Err(PipelineError::invalid_state(
                "start_record requires an active stream",
            ));
        }
        if self.session.recording_active {
            return Err(PipelineError::invalid_state("already recording"));
        }
        let formats = self.router.formats();
        if formats.is_empty() {
            return Err(PipelineError::invalid_state(
                "no track format has been produced yet",
            ));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let recording = ActiveRecording::begin(self.containers.as_ref(), path, &formats)?;
        self.router.install_recording(recording);
        self.session.recording_active = true;

        self.emit(PipelineEvent::RecordingStarted(path.to_path_buf()));
        self.publish_state();
        Ok(())
    }

    /// Record into `folder` under a timestamped file name; returns the path
    pub fn start_record_in(&mut self, folder: impl AsRef<Path>) -> PipelineResult<PathBuf> {
        let path = folder
            .as_ref()
            .join(recording_file_name(chrono::Local::now()));
        self.start_record(&path)?;
        Ok(path)
    }

    /// Finalize and release the recording. No-op when not recording.
    pub fn stop_record(&mut self) -> Option<RecordingSummary> {
        if !self.session.recording_active {
            return None;
        }
        let summary = self.router.finish_recording();
        self.session.recording_active = false;

        if let Some(summary) = &summary {
            self.emit(PipelineEvent::RecordingSaved(summary.clone()));
        }
        self.publish_state();
        summary
    }

    // ---- live controls ----------------------------------------------------

    /// Switch to the next camera, retrying per `stream.switch_retries`.
    /// Only while previewing or streaming.
    pub fn switch_capture_device(&mut self) -> PipelineResult<()> {
        if !self.session.preview_active && !self.session.streaming_active {
            return Err(PipelineError::invalid_state(
                "switch_capture_device requires preview or stream",
            ));
        }

        let retries = self.config.stream.switch_retries;
        let mut attempt = 0;
        loop {
            match self.video_source.switch_device() {
                Ok(()) => {
                    log::info!("Capture device switched");
                    return Ok(());
                }
                Err(e) if attempt < retries => {
                    attempt += 1;
                    log::warn!("Capture device switch failed ({}), retrying", e);
                }
                Err(e) => {
                    log::error!("Capture device switch failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Replace the picture with filler (black) without stopping anything
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.video_encoder.substitute_with_filler(!enabled);
        self.session.video_enabled = enabled;
        log::info!("Video {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Replace microphone samples with silence without stopping anything
    pub fn set_audio_muted(&mut self, muted: bool) {
        self.audio_encoder.substitute_with_filler(muted);
        self.session.audio_muted = muted;
        log::info!("Audio {}", if muted { "muted" } else { "unmuted" });
    }

    pub fn mute_audio(&mut self) {
        self.set_audio_muted(true);
    }

    pub fn unmute_audio(&mut self) {
        self.set_audio_muted(false);
    }

    /// Best effort; ignored when not streaming or when the encoder refuses
    pub fn set_bitrate_on_fly(&mut self, bitrate: u32) {
        if !self.session.streaming_active {
            log::debug!("set_bitrate_on_fly ignored while not streaming");
            return;
        }
        match self.video_encoder.set_bitrate(bitrate) {
            Ok(()) => {
                if let Some(video) = self.session.video.as_mut() {
                    video.bitrate = bitrate;
                }
            }
            Err(e) => log::debug!("Bitrate change to {} ignored: {}", bitrate, e),
        }
    }

    /// Credentials for the next `start_stream`; ignored unless both are set
    pub fn set_authorization(&mut self, user: &str, password: &str) {
        self.credentials = Credentials::from_parts(user, password);
    }

    // ---- observation ------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PipelineState {
        self.session.state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot(self.id)
    }

    pub fn stream_width(&self) -> u32 {
        self.session.video.as_ref().map_or(0, |v| v.width)
    }

    pub fn stream_height(&self) -> u32 {
        self.session.video.as_ref().map_or(0, |v| v.height)
    }

    pub fn is_streaming(&self) -> bool {
        self.session.streaming_active
    }

    pub fn is_recording(&self) -> bool {
        self.session.recording_active
    }

    pub fn is_previewing(&self) -> bool {
        self.session.preview_active
    }

    pub fn is_video_enabled(&self) -> bool {
        self.session.video_enabled
    }

    pub fn is_audio_muted(&self) -> bool {
        self.session.audio_muted
    }

    pub fn sink_mode(&self) -> SinkMode {
        self.frame_sink.mode()
    }

    pub fn config(&self) -> &CrabStreamConfig {
        &self.config
    }

    /// Access units routed since construction
    pub fn routed_units(&self) -> u64 {
        self.router.routed_units()
    }

    fn reporter(&self) -> ConnectionReporter {
        ConnectionReporter::new(self.events.clone())
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    fn publish_state(&mut self) {
        let session = &self.session;
        assert_invariant!(
            !session.recording_active || session.streaming_active,
            RECORDING_IMPLIES_STREAMING,
            "orchestrator"
        );
        assert_invariant!(
            !(session.preview_active && session.streaming_active),
            PREVIEW_EXCLUDES_STREAMING,
            "orchestrator"
        );

        let state = session.state();
        if state != self.last_state {
            log::info!("Pipeline {}: {:?} -> {:?}", self.id, self.last_state, state);
            self.last_state = state;
            self.emit(PipelineEvent::StateChanged(state));
        }
    }
}

impl Drop for PipelineOrchestrator {
    fn drop(&mut self) {
        self.stop_stream();
        self.stop_preview();
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("id", &self.id)
            .field("state", &self.session.state())
            .field("sink", &self.frame_sink.mode())
            .field("router", &self.router)
            .finish()
    }
}
