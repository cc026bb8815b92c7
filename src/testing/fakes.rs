//! In-memory collaborators
//!
//! Each fake is moved into the orchestrator as a trait object while the test
//! keeps a cloneable handle for driving it and inspecting what happened.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::synthetic_data::{synthetic_frame, synthetic_pcm};
use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::{
    switch_or_restore, CaptureSource, ConnectionReporter, ContainerWriter, ContainerWriterFactory,
    Encoder, EncoderOutput, OpenRequest, RawInput, TransportSink,
};
use crate::sink::PreviewTarget;
use crate::types::{
    AccessUnit, DeviceSelector, Facing, MediaKind, MediaParams, PixelFormat, RawMedia,
    TrackFormat, VideoFrame,
};

/// Edge length of the thumbnails a fake camera pushes
const FAKE_FRAME_SIZE: (u32, u32) = (16, 12);
const FAKE_AUDIO_SAMPLES: usize = 1024;

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

struct EncoderState {
    configured: Option<MediaParams>,
    configure_calls: u32,
    start_calls: u32,
    stop_calls: u32,
    running: bool,
    filler: bool,
    bitrate: Option<u32>,
    reject_configure: bool,
    fail_start: bool,
    fail_bitrate: bool,
    emit_format_on_start: bool,
    gop: u64,
    output: Option<Arc<dyn EncoderOutput>>,
    frames_in_activation: u64,
    frames_encoded: u64,
    next_pts_us: u64,
}

struct EncoderShared {
    kind: MediaKind,
    state: Mutex<EncoderState>,
}

impl EncoderShared {
    fn format(&self, state: &EncoderState) -> TrackFormat {
        match &state.configured {
            Some(MediaParams::Video(p)) => {
                let bitrate = state.bitrate.unwrap_or(p.bitrate);
                TrackFormat::video("video/avc", p.width, p.height, p.fps, bitrate)
                    .with_codec_config(vec![0x67, 0x42, 0x00, 0x1f])
            }
            Some(MediaParams::Audio(p)) => {
                TrackFormat::audio("audio/mp4a-latm", p.sample_rate, p.channels(), p.bitrate)
                    .with_codec_config(vec![0x12, 0x10])
            }
            None => match self.kind {
                MediaKind::Video => TrackFormat::video("video/avc", 640, 480, 30, 1_228_800),
                MediaKind::Audio => TrackFormat::audio("audio/mp4a-latm", 44_100, 2, 131_072),
            },
        }
    }

    fn frame_duration_us(&self, state: &EncoderState) -> u64 {
        match &state.configured {
            Some(MediaParams::Video(p)) => 1_000_000 / u64::from(p.fps.max(1)),
            Some(MediaParams::Audio(p)) => {
                FAKE_AUDIO_SAMPLES as u64 * 1_000_000 / u64::from(p.sample_rate.max(1))
            }
            None => 33_333,
        }
    }

    /// Build the next unit; `None` when not running
    fn next_unit(&self, keyframe: Option<bool>) -> Option<(Arc<dyn EncoderOutput>, AccessUnit)> {
        let mut state = self.state.lock();
        if !state.running {
            return None;
        }
        let output = state.output.clone()?;
        let keyframe = keyframe.unwrap_or(state.frames_in_activation % state.gop.max(1) == 0);
        let pts = state.next_pts_us;
        let label = if state.filler { "filler" } else { self.kind.as_str() };
        let payload = format!("{}-{}", label, state.frames_encoded).into_bytes();
        let step = self.frame_duration_us(&state);
        state.next_pts_us += step;
        state.frames_in_activation += 1;
        state.frames_encoded += 1;

        let unit = match self.kind {
            MediaKind::Video => AccessUnit::video(payload, pts, keyframe),
            MediaKind::Audio => AccessUnit::audio(payload, pts),
        };
        Some((output, unit))
    }
}

/// Encoder double that turns every raw input into one access unit
pub struct FakeEncoder {
    shared: Arc<EncoderShared>,
}

/// Driver and inspector for a `FakeEncoder`
#[derive(Clone)]
pub struct FakeEncoderHandle {
    shared: Arc<EncoderShared>,
}

impl FakeEncoder {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            shared: Arc::new(EncoderShared {
                kind,
                state: Mutex::new(EncoderState {
                    configured: None,
                    configure_calls: 0,
                    start_calls: 0,
                    stop_calls: 0,
                    running: false,
                    filler: false,
                    bitrate: None,
                    reject_configure: false,
                    fail_start: false,
                    fail_bitrate: false,
                    emit_format_on_start: true,
                    gop: 30,
                    output: None,
                    frames_in_activation: 0,
                    frames_encoded: 0,
                    next_pts_us: 0,
                }),
            }),
        }
    }

    pub fn video() -> Self {
        Self::new(MediaKind::Video)
    }

    pub fn audio() -> Self {
        Self::new(MediaKind::Audio)
    }

    pub fn handle(&self) -> FakeEncoderHandle {
        FakeEncoderHandle {
            shared: self.shared.clone(),
        }
    }
}

struct FakeEncoderInput {
    shared: Arc<EncoderShared>,
}

impl RawInput for FakeEncoderInput {
    fn push(&self, media: RawMedia) {
        if media.kind() != self.shared.kind {
            return;
        }
        if let Some((output, unit)) = self.shared.next_unit(None) {
            output.on_access_unit(unit);
        }
    }
}

impl Encoder for FakeEncoder {
    fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    fn configure(&mut self, params: &MediaParams) -> bool {
        let mut state = self.shared.state.lock();
        state.configure_calls += 1;
        if state.reject_configure || params.kind() != self.shared.kind {
            return false;
        }
        state.configured = Some(params.clone());
        state.bitrate = None;
        true
    }

    fn input(&self) -> Arc<dyn RawInput> {
        Arc::new(FakeEncoderInput {
            shared: self.shared.clone(),
        })
    }

    fn start(&mut self, output: Arc<dyn EncoderOutput>) -> PipelineResult<()> {
        let format = {
            let mut state = self.shared.state.lock();
            if state.fail_start {
                return Err(PipelineError::Encoding(format!(
                    "{} encoder failed to start",
                    self.shared.kind.as_str()
                )));
            }
            if state.running {
                return Ok(());
            }
            state.running = true;
            state.start_calls += 1;
            state.frames_in_activation = 0;
            state.output = Some(output.clone());
            state
                .emit_format_on_start
                .then(|| self.shared.format(&state))
        };

        if let Some(format) = format {
            output.on_format(format);
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.shared.state.lock();
        if state.running {
            state.running = false;
            state.stop_calls += 1;
            state.output = None;
        }
    }

    fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    fn set_bitrate(&mut self, bitrate: u32) -> PipelineResult<()> {
        let mut state = self.shared.state.lock();
        if state.fail_bitrate {
            return Err(PipelineError::Encoding("bitrate change refused".to_string()));
        }
        state.bitrate = Some(bitrate);
        Ok(())
    }

    fn substitute_with_filler(&mut self, enabled: bool) {
        self.shared.state.lock().filler = enabled;
    }
}

impl FakeEncoderHandle {
    pub fn configure_calls(&self) -> u32 {
        self.shared.state.lock().configure_calls
    }

    pub fn start_calls(&self) -> u32 {
        self.shared.state.lock().start_calls
    }

    pub fn stop_calls(&self) -> u32 {
        self.shared.state.lock().stop_calls
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn filler_enabled(&self) -> bool {
        self.shared.state.lock().filler
    }

    pub fn bitrate(&self) -> Option<u32> {
        self.shared.state.lock().bitrate
    }

    pub fn configured(&self) -> Option<MediaParams> {
        self.shared.state.lock().configured.clone()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.shared.state.lock().frames_encoded
    }

    pub fn set_reject_configure(&self, reject: bool) {
        self.shared.state.lock().reject_configure = reject;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.shared.state.lock().fail_start = fail;
    }

    pub fn set_fail_bitrate(&self, fail: bool) {
        self.shared.state.lock().fail_bitrate = fail;
    }

    /// When disabled, the test must call `emit_format` itself
    pub fn set_emit_format_on_start(&self, emit: bool) {
        self.shared.state.lock().emit_format_on_start = emit;
    }

    /// Keyframe interval for units produced from raw input
    pub fn set_gop(&self, gop: u64) {
        self.shared.state.lock().gop = gop.max(1);
    }

    /// Emit the track format now. Returns false when not running.
    pub fn emit_format(&self) -> bool {
        let pending = {
            let state = self.shared.state.lock();
            match (&state.output, state.running) {
                (Some(output), true) => Some((output.clone(), self.shared.format(&state))),
                _ => None,
            }
        };
        match pending {
            Some((output, format)) => {
                output.on_format(format);
                true
            }
            None => false,
        }
    }

    /// Emit one unit with an explicit keyframe flag. Returns the unit sent.
    pub fn emit_unit(&self, keyframe: bool) -> Option<AccessUnit> {
        let (output, unit) = self.shared.next_unit(Some(keyframe))?;
        output.on_access_unit(unit.clone());
        Some(unit)
    }

    /// Emit `count` delta units
    pub fn emit_deltas(&self, count: usize) -> usize {
        (0..count).filter_map(|_| self.emit_unit(false)).count()
    }
}

// ---------------------------------------------------------------------------
// Capture source
// ---------------------------------------------------------------------------

struct SourceState {
    devices: Vec<String>,
    current: Option<usize>,
    last: Option<usize>,
    open: bool,
    started: bool,
    prepared: Option<MediaParams>,
    input: Option<Arc<dyn RawInput>>,
    fail_open: bool,
    fail_prepare: bool,
    switch_failures_remaining: u32,
    busy: Option<(String, u32)>,
    open_calls: u32,
    close_calls: u32,
    switch_calls: u32,
    selectors: Vec<DeviceSelector>,
    pushed: u64,
}

struct SourceShared {
    kind: MediaKind,
    state: Mutex<SourceState>,
}

/// Camera or microphone double with named devices
pub struct FakeCaptureSource {
    shared: Arc<SourceShared>,
}

#[derive(Clone)]
pub struct FakeCaptureSourceHandle {
    shared: Arc<SourceShared>,
}

impl FakeCaptureSource {
    pub fn new(kind: MediaKind, devices: &[&str]) -> Self {
        Self {
            shared: Arc::new(SourceShared {
                kind,
                state: Mutex::new(SourceState {
                    devices: devices.iter().map(|d| d.to_string()).collect(),
                    current: None,
                    last: None,
                    open: false,
                    started: false,
                    prepared: None,
                    input: None,
                    fail_open: false,
                    fail_prepare: false,
                    switch_failures_remaining: 0,
                    busy: None,
                    open_calls: 0,
                    close_calls: 0,
                    switch_calls: 0,
                    selectors: Vec::new(),
                    pushed: 0,
                }),
            }),
        }
    }

    /// Back and front camera
    pub fn camera() -> Self {
        Self::new(MediaKind::Video, &["back", "front"])
    }

    pub fn microphone() -> Self {
        Self::new(MediaKind::Audio, &["default-mic"])
    }

    pub fn handle(&self) -> FakeCaptureSourceHandle {
        FakeCaptureSourceHandle {
            shared: self.shared.clone(),
        }
    }
}

fn resolve(state: &SourceState, selector: &DeviceSelector) -> PipelineResult<usize> {
    let find = |name: &str| state.devices.iter().position(|d| d == name);
    let index = match selector {
        DeviceSelector::Default => Some(0),
        DeviceSelector::Facing(Facing::Back) => find("back").or(Some(0)),
        DeviceSelector::Facing(Facing::Front) => find("front"),
        DeviceSelector::Id(id) => find(id),
        DeviceSelector::Last => state.last.or(Some(0)),
    };
    index
        .filter(|i| *i < state.devices.len())
        .ok_or_else(|| PipelineError::device_unavailable(format!("no device matches {:?}", selector)))
}

/// Take the device at `index`, honouring a pending busy failure
fn acquire(state: &mut SourceState, index: usize) -> PipelineResult<()> {
    if let Some((name, remaining)) = state.busy.as_mut() {
        if state.devices.get(index) == Some(name) && *remaining > 0 {
            *remaining -= 1;
            return Err(PipelineError::device_unavailable(format!("{} is busy", name)));
        }
    }
    state.current = Some(index);
    state.last = Some(index);
    state.open = true;
    Ok(())
}

impl CaptureSource for FakeCaptureSource {
    fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    fn prepare(&mut self, params: &MediaParams) -> PipelineResult<()> {
        let mut state = self.shared.state.lock();
        if state.fail_prepare {
            return Err(PipelineError::device_unavailable("capture parameters refused"));
        }
        state.prepared = Some(params.clone());
        Ok(())
    }

    fn open(&mut self, selector: &DeviceSelector) -> PipelineResult<()> {
        let mut state = self.shared.state.lock();
        state.open_calls += 1;
        state.selectors.push(selector.clone());
        if state.fail_open {
            return Err(PipelineError::device_unavailable("device busy"));
        }
        let index = resolve(&state, selector)?;
        acquire(&mut state, index)
    }

    fn close(&mut self) {
        let mut state = self.shared.state.lock();
        if state.open {
            state.close_calls += 1;
        }
        state.open = false;
        state.started = false;
        state.current = None;
    }

    fn switch_device(&mut self) -> PipelineResult<()> {
        let mut state = self.shared.state.lock();
        state.switch_calls += 1;
        let Some(current) = state.current.filter(|_| state.open) else {
            return Err(PipelineError::device_unavailable("no device open"));
        };
        if state.switch_failures_remaining > 0 {
            state.switch_failures_remaining -= 1;
            return Err(PipelineError::device_unavailable("device busy during switch"));
        }
        let next = (current + 1) % state.devices.len().max(1);

        let was_started = state.started;
        state.open = false;
        state.started = false;
        state.current = None;
        let state = &mut *state;
        switch_or_restore(&current, &next, |index| {
            state.open_calls += 1;
            acquire(state, *index)?;
            state.started = was_started;
            Ok(())
        })
    }

    fn bind(&mut self, input: Option<Arc<dyn RawInput>>) {
        self.shared.state.lock().input = input;
    }

    fn start(&mut self) -> PipelineResult<()> {
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(PipelineError::device_unavailable("device not open"));
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.state.lock().started = false;
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }
}

impl FakeCaptureSourceHandle {
    /// Push one captured frame (or audio chunk) into the bound input.
    /// Returns false when the source is not started or not bound.
    pub fn emit(&self) -> bool {
        let (input, media) = {
            let mut state = self.shared.state.lock();
            let Some(input) = state.input.clone().filter(|_| state.started) else {
                return false;
            };
            let index = state.pushed;
            state.pushed += 1;
            let media = match self.shared.kind {
                MediaKind::Video => RawMedia::Video(synthetic_frame(
                    FAKE_FRAME_SIZE.0,
                    FAKE_FRAME_SIZE.1,
                    PixelFormat::Rgb24,
                    index * 33_333,
                )),
                MediaKind::Audio => {
                    let (rate, channels) = match &state.prepared {
                        Some(MediaParams::Audio(p)) => (p.sample_rate, p.channels()),
                        _ => (44_100, 2),
                    };
                    RawMedia::Audio(synthetic_pcm(index, FAKE_AUDIO_SAMPLES, rate, channels))
                }
            };
            (input, media)
        };
        input.push(media);
        true
    }

    pub fn emit_many(&self, count: usize) -> usize {
        (0..count).filter(|_| self.emit()).count()
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    pub fn is_started(&self) -> bool {
        self.shared.state.lock().started
    }

    pub fn is_bound(&self) -> bool {
        self.shared.state.lock().input.is_some()
    }

    pub fn current_device(&self) -> Option<String> {
        let state = self.shared.state.lock();
        state.current.and_then(|i| state.devices.get(i).cloned())
    }

    pub fn prepared(&self) -> Option<MediaParams> {
        self.shared.state.lock().prepared.clone()
    }

    pub fn open_calls(&self) -> u32 {
        self.shared.state.lock().open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.shared.state.lock().close_calls
    }

    pub fn switch_calls(&self) -> u32 {
        self.shared.state.lock().switch_calls
    }

    pub fn selectors(&self) -> Vec<DeviceSelector> {
        self.shared.state.lock().selectors.clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.shared.state.lock().fail_open = fail;
    }

    pub fn set_fail_prepare(&self, fail: bool) {
        self.shared.state.lock().fail_prepare = fail;
    }

    /// The next `count` calls to `switch_device` fail with `DeviceUnavailable`
    pub fn fail_next_switches(&self, count: u32) {
        self.shared.state.lock().switch_failures_remaining = count;
    }

    /// The next `count` attempts to open `device` fail as busy
    pub fn fail_next_opens_of(&self, device: &str, count: u32) {
        self.shared.state.lock().busy = Some((device.to_string(), count));
    }
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Everything one `MemoryContainer` saw
#[derive(Debug, Clone, Default)]
pub struct MemoryRecording {
    pub path: PathBuf,
    pub tracks: Vec<TrackFormat>,
    pub writes: Vec<(usize, AccessUnit)>,
    pub started: bool,
    pub stopped: bool,
    pub released: bool,
}

impl MemoryRecording {
    pub fn units_of(&self, kind: MediaKind) -> Vec<&AccessUnit> {
        self.writes
            .iter()
            .filter(|(_, unit)| unit.kind == kind)
            .map(|(_, unit)| unit)
            .collect()
    }

    pub fn first_write(&self) -> Option<&AccessUnit> {
        self.writes.first().map(|(_, unit)| unit)
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    tracks: Vec<&'a str>,
    units: usize,
    bytes: usize,
}

#[derive(Default)]
struct FactoryState {
    recordings: Vec<Arc<Mutex<MemoryRecording>>>,
    fail_create: bool,
    fail_register: bool,
    fail_write: bool,
    fail_stop: bool,
}

/// Hands out `MemoryContainer`s and keeps their logs
#[derive(Clone, Default)]
pub struct MemoryContainerFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MemoryContainerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recordings(&self) -> Vec<MemoryRecording> {
        self.state
            .lock()
            .recordings
            .iter()
            .map(|r| r.lock().clone())
            .collect()
    }

    pub fn created(&self) -> usize {
        self.state.lock().recordings.len()
    }

    pub fn last(&self) -> Option<MemoryRecording> {
        self.state.lock().recordings.last().map(|r| r.lock().clone())
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.state.lock().fail_register = fail;
    }

    pub fn set_fail_write(&self, fail: bool) {
        self.state.lock().fail_write = fail;
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.state.lock().fail_stop = fail;
    }
}

/// Container writer that creates a real file and writes a JSON manifest
/// of what it received when stopped
pub struct MemoryContainer {
    log: Arc<Mutex<MemoryRecording>>,
    factory: Arc<Mutex<FactoryState>>,
}

impl ContainerWriterFactory for MemoryContainerFactory {
    fn create(&self, path: &Path) -> PipelineResult<Box<dyn ContainerWriter>> {
        if self.state.lock().fail_create {
            return Err(PipelineError::Io(format!(
                "cannot create {}",
                path.display()
            )));
        }
        std::fs::File::create(path)?;

        let log = Arc::new(Mutex::new(MemoryRecording {
            path: path.to_path_buf(),
            ..Default::default()
        }));
        self.state.lock().recordings.push(log.clone());
        Ok(Box::new(MemoryContainer {
            log,
            factory: self.state.clone(),
        }))
    }
}

impl ContainerWriter for MemoryContainer {
    fn register_track(&mut self, format: &TrackFormat) -> PipelineResult<usize> {
        if self.factory.lock().fail_register {
            return Err(PipelineError::Io("track registration refused".to_string()));
        }
        let mut log = self.log.lock();
        if log.started {
            return Err(PipelineError::invalid_state("container already started"));
        }
        log.tracks.push(format.clone());
        Ok(log.tracks.len() - 1)
    }

    fn start(&mut self) -> PipelineResult<()> {
        self.log.lock().started = true;
        Ok(())
    }

    fn write(&mut self, track: usize, unit: &AccessUnit) -> PipelineResult<()> {
        if self.factory.lock().fail_write {
            return Err(PipelineError::Io("disk full".to_string()));
        }
        let mut log = self.log.lock();
        if !log.started || log.stopped {
            return Err(PipelineError::invalid_state("container not accepting writes"));
        }
        if track >= log.tracks.len() {
            return Err(PipelineError::invalid_state(format!("unknown track {}", track)));
        }
        log.writes.push((track, unit.clone()));
        Ok(())
    }

    fn stop(&mut self) -> PipelineResult<()> {
        if self.factory.lock().fail_stop {
            return Err(PipelineError::Io("finalize failed".to_string()));
        }
        let mut log = self.log.lock();
        let manifest = Manifest {
            tracks: log.tracks.iter().map(|t| t.mime.as_str()).collect(),
            units: log.writes.len(),
            bytes: log.writes.iter().map(|(_, u)| u.len()).sum(),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| PipelineError::Io(e.to_string()))?;
        std::fs::write(&log.path, json)?;
        log.stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.log.lock().released = true;
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportLog {
    opens: Vec<OpenRequest>,
    pushed: Vec<AccessUnit>,
    announced: Vec<TrackFormat>,
    closes: u32,
    open: bool,
    fail_open: bool,
    push_delay: Option<Duration>,
    reporter: Option<ConnectionReporter>,
}

/// Transport double that records every call
#[derive(Clone, Default)]
pub struct RecordingTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opens(&self) -> Vec<OpenRequest> {
        self.log.lock().opens.clone()
    }

    pub fn pushed(&self) -> Vec<AccessUnit> {
        self.log.lock().pushed.clone()
    }

    pub fn pushed_count(&self) -> usize {
        self.log.lock().pushed.len()
    }

    pub fn announced(&self) -> Vec<TrackFormat> {
        self.log.lock().announced.clone()
    }

    pub fn close_count(&self) -> u32 {
        self.log.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.log.lock().open
    }

    /// Reporter handed over by the last successful `open`
    pub fn reporter(&self) -> Option<ConnectionReporter> {
        self.log.lock().reporter.clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.log.lock().fail_open = fail;
    }

    /// Make every push block for `delay`, simulating a slow network
    pub fn set_push_delay(&self, delay: Option<Duration>) {
        self.log.lock().push_delay = delay;
    }
}

impl TransportSink for RecordingTransport {
    fn open(&self, request: OpenRequest, reporter: ConnectionReporter) -> PipelineResult<()> {
        let mut log = self.log.lock();
        log.opens.push(request.clone());
        if log.fail_open {
            return Err(PipelineError::TransportFailure(format!(
                "connection to {} refused",
                request.url
            )));
        }
        log.open = true;
        log.reporter = Some(reporter);
        Ok(())
    }

    fn announce(&self, format: &TrackFormat) {
        self.log.lock().announced.push(format.clone());
    }

    fn push(&self, unit: &AccessUnit) {
        let delay = self.log.lock().push_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.log.lock().pushed.push(unit.clone());
    }

    fn close(&self) {
        let mut log = self.log.lock();
        log.closes += 1;
        log.open = false;
        log.reporter = None;
    }
}

// ---------------------------------------------------------------------------
// Raw input and preview recorders
// ---------------------------------------------------------------------------

/// Raw input that keeps everything pushed into it
#[derive(Default)]
pub struct CollectingInput {
    media: Mutex<Vec<RawMedia>>,
}

impl CollectingInput {
    pub fn frames(&self) -> Vec<VideoFrame> {
        self.media
            .lock()
            .iter()
            .filter_map(|m| match m {
                RawMedia::Video(frame) => Some(frame.clone()),
                RawMedia::Audio(_) => None,
            })
            .collect()
    }

    pub fn video_frames(&self) -> usize {
        self.frames().len()
    }

    pub fn audio_chunks(&self) -> usize {
        self.media
            .lock()
            .iter()
            .filter(|m| m.kind() == MediaKind::Audio)
            .count()
    }
}

impl RawInput for CollectingInput {
    fn push(&self, media: RawMedia) {
        self.media.lock().push(media);
    }
}

#[derive(Default)]
pub struct CountingPreview {
    rendered: AtomicU64,
}

impl CountingPreview {
    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }
}

impl PreviewTarget for CountingPreview {
    fn render(&self, _frame: &VideoFrame) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }
}
