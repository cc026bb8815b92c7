//! Lifecycle scenarios for the orchestrator
//!
//! Fake encoders emit synchronously on the calling thread, so every unit
//! pushed here has been routed by the time the call returns.

use std::sync::Arc;

use tokio::sync::broadcast::error::TryRecvError;

use super::*;
use crate::errors::ErrorKind;
use crate::invariant_ppt::{
    clear_invariant_log, contract_test, NO_WRITE_BEFORE_KEYFRAME, PREVIEW_EXCLUDES_STREAMING,
    RECORDING_IMPLIES_STREAMING,
};
use crate::sink::{CompositorSink, PreviewSurfaceSink, SinkMode};
use crate::testing::{CountingPreview, FakeRig};
use crate::types::{
    AudioParams, DeviceSelector, Facing, MediaKind, MediaParams, TrackDetail, VideoParams,
};

const URL: &str = "rtmp://host/app/key";

fn video_params() -> VideoParams {
    VideoParams::new(640, 480, 30, 1_228_800).with_rotation(false, 0)
}

fn audio_params() -> AudioParams {
    AudioParams::new(131_072, 44_100, true).with_processing(false, false)
}

fn pipeline() -> (FakeRig, PipelineOrchestrator) {
    let (rig, builder) = FakeRig::new();
    (rig, builder.build().expect("fake pipeline builds"))
}

fn streaming_pipeline() -> (FakeRig, PipelineOrchestrator) {
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_video(video_params()));
    assert!(pipeline.prepare_audio(audio_params()));
    pipeline.start_stream(URL).expect("stream starts");
    (rig, pipeline)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

#[test]
fn test_reference_scenario_produces_complete_file() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    assert_eq!(pipeline.state(), PipelineState::Streaming);

    let path = dir.path().join("out.mp4");
    pipeline.start_record(&path).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Recording);

    rig.video_encoder.emit_unit(true).unwrap();
    rig.audio_encoder.emit_unit(false).unwrap();
    rig.video_encoder.emit_deltas(5);

    let summary = pipeline.stop_record().expect("recording was active");
    assert!(summary.finalized);
    assert_eq!(summary.video_units, 6);
    assert_eq!(summary.audio_units, 1);
    assert_eq!(summary.file_name, "out.mp4");

    let recording = rig.containers.last().unwrap();
    assert_eq!(recording.tracks.len(), 2);
    assert!(recording.stopped && recording.released);
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
    assert_eq!(pipeline.state(), PipelineState::Streaming);
}

#[test]
fn test_nothing_written_before_first_keyframe() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.start_record(dir.path().join("gated.mp4")).unwrap();

    rig.video_encoder.emit_deltas(3);
    rig.audio_encoder.emit_unit(false);
    assert!(rig.containers.last().unwrap().writes.is_empty());

    rig.video_encoder.emit_unit(true);
    rig.audio_encoder.emit_unit(false);

    let summary = pipeline.stop_record().unwrap();
    assert_eq!(summary.gated_units, 4);
    let recording = rig.containers.last().unwrap();
    let first = recording.first_write().unwrap();
    assert_eq!(first.kind, MediaKind::Video);
    assert!(first.keyframe);
}

#[test]
fn test_live_path_is_not_gated_by_recording() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.start_record(dir.path().join("live.mp4")).unwrap();

    rig.video_encoder.emit_deltas(4);
    assert_eq!(rig.transport.pushed_count(), 4);
    assert!(rig.containers.last().unwrap().writes.is_empty());
}

#[test]
fn test_consecutive_recordings_are_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();

    pipeline.start_record(dir.path().join("first.mp4")).unwrap();
    rig.video_encoder.emit_unit(true);
    rig.video_encoder.emit_deltas(2);
    pipeline.stop_record().unwrap();

    let after_stop = rig.video_encoder.emit_unit(false).unwrap();

    pipeline.start_record(dir.path().join("second.mp4")).unwrap();
    rig.video_encoder.emit_deltas(2);
    rig.video_encoder.emit_unit(true);
    pipeline.stop_record().unwrap();

    let recordings = rig.containers.recordings();
    assert_eq!(recordings.len(), 2);
    let (first, second) = (&recordings[0], &recordings[1]);
    assert_eq!(first.writes.len(), 3);
    assert_eq!(second.writes.len(), 1);
    assert!(first.writes.iter().all(|(_, u)| u.pts_us < after_stop.pts_us));
    assert!(second.writes.iter().all(|(_, u)| u.pts_us > after_stop.pts_us));
    assert_eq!(second.tracks.len(), 2);
}

#[test]
fn test_start_record_requires_stream_and_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_video(video_params()));

    let path = dir.path().join("nested").join("early.mp4");
    let err = pipeline.start_record(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(!path.exists());
    assert!(!dir.path().join("nested").exists());
    assert_eq!(rig.containers.created(), 0);
    assert!(!pipeline.is_recording());

    let err = pipeline.start_record_in(dir.path().join("folder")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(!dir.path().join("folder").exists());
}

#[test]
fn test_video_toggle_keeps_encoder_running() {
    let (rig, mut pipeline) = streaming_pipeline();

    rig.camera.emit_many(3);
    pipeline.set_video_enabled(false);
    assert!(!pipeline.is_video_enabled());
    assert!(rig.video_encoder.filler_enabled());
    rig.camera.emit_many(3);
    pipeline.set_video_enabled(true);
    rig.camera.emit_many(3);

    assert_eq!(rig.video_encoder.configure_calls(), 1);
    assert_eq!(rig.video_encoder.start_calls(), 1);
    assert_eq!(rig.video_encoder.stop_calls(), 0);
    assert!(rig.video_encoder.is_running());

    let video: Vec<_> = rig
        .transport
        .pushed()
        .into_iter()
        .filter(|u| u.kind == MediaKind::Video)
        .collect();
    assert_eq!(video.len(), 9);
    assert!(video.windows(2).all(|w| w[1].pts_us == w[0].pts_us + 33_333));
    let filler = video
        .iter()
        .filter(|u| u.data.starts_with(b"filler"))
        .count();
    assert_eq!(filler, 3);
}

#[test]
fn test_audio_mute_substitutes_silence() {
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.mute_audio();
    assert!(pipeline.is_audio_muted());
    assert!(rig.audio_encoder.filler_enabled());
    rig.microphone.emit();
    pipeline.unmute_audio();
    rig.microphone.emit();

    let audio: Vec<_> = rig
        .transport
        .pushed()
        .into_iter()
        .filter(|u| u.kind == MediaKind::Audio)
        .collect();
    assert_eq!(audio.len(), 2);
    assert!(audio[0].data.starts_with(b"filler"));
    assert!(audio[1].data.starts_with(b"audio"));
    assert_eq!(rig.audio_encoder.stop_calls(), 0);
}

#[test]
fn test_stop_stream_finalizes_recording_first() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    let mut events = pipeline.subscribe();

    let path = dir.path().join("forced.mp4");
    pipeline.start_record(&path).unwrap();
    rig.video_encoder.emit_unit(true);

    pipeline.stop_stream();

    let recording = rig.containers.last().unwrap();
    assert!(recording.stopped && recording.released);
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
    assert!(!pipeline.is_recording());
    assert!(!pipeline.is_streaming());
    assert_eq!(pipeline.state(), PipelineState::Prepared);
    assert_eq!(rig.transport.close_count(), 1);
    assert_eq!(rig.video_encoder.stop_calls(), 1);
    assert_eq!(rig.audio_encoder.stop_calls(), 1);
    assert!(!rig.camera.is_open());
    assert!(!rig.microphone.is_open());

    let events = drain(&mut events);
    let saved = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::RecordingSaved(_)))
        .expect("saved event");
    let prepared = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::StateChanged(PipelineState::Prepared)))
        .expect("prepared event");
    assert!(saved < prepared);
}

#[test]
fn test_teardown_is_idempotent() {
    let (rig, mut pipeline) = streaming_pipeline();
    assert!(pipeline.stop_record().is_none());
    pipeline.stop_stream();
    pipeline.stop_stream();
    pipeline.stop_preview();
    assert!(pipeline.stop_record().is_none());
    assert_eq!(rig.transport.close_count(), 1);
}

#[test]
fn test_rejected_video_configuration_is_soft() {
    let (rig, mut pipeline) = pipeline();
    rig.video_encoder.set_reject_configure(true);

    assert!(!pipeline.prepare_video(video_params()));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert!(rig.camera.prepared().is_none());
    assert!(!rig.camera.is_bound());
    assert_eq!(pipeline.stream_width(), 0);

    let err = pipeline.start_stream(URL).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_rejected_audio_configuration_leaves_no_partial_pipeline() {
    let (rig, mut pipeline) = pipeline();
    rig.audio_encoder.set_reject_configure(true);

    assert!(!pipeline.prepare_audio(audio_params()));
    assert!(rig.microphone.prepared().is_none());
    assert!(!rig.microphone.is_bound());
    assert!(pipeline.snapshot().audio.is_none());

    rig.audio_encoder.set_reject_configure(false);
    assert!(pipeline.prepare_audio(audio_params()));
    assert!(rig.microphone.is_bound());
}

#[test]
fn test_default_preparation_uses_config() {
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_video_default());
    assert!(pipeline.prepare_audio_default());

    assert_eq!(
        rig.video_encoder.configured(),
        Some(MediaParams::Video(VideoParams::default()))
    );
    assert_eq!(
        rig.audio_encoder.configured(),
        Some(MediaParams::Audio(AudioParams::default()))
    );
    assert_eq!((pipeline.stream_width(), pipeline.stream_height()), (640, 480));
}

#[test]
fn test_prepare_refused_while_streaming() {
    let (rig, mut pipeline) = streaming_pipeline();
    assert!(!pipeline.prepare_video(VideoParams::new(1280, 720, 30, 2_000_000)));
    assert!(!pipeline.prepare_audio(audio_params()));
    assert_eq!(rig.video_encoder.configure_calls(), 1);
    assert_eq!(pipeline.stream_width(), 640);
}

#[test]
fn test_source_refusal_keeps_previous_encoder_parameters() {
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_video(video_params()));
    assert!(pipeline.prepare_audio(audio_params()));

    rig.camera.set_fail_prepare(true);
    assert!(!pipeline.prepare_video(VideoParams::new(1280, 720, 30, 2_000_000)));
    assert_eq!(
        rig.video_encoder.configured(),
        Some(MediaParams::Video(video_params()))
    );
    assert_eq!(pipeline.stream_width(), 640);

    rig.microphone.set_fail_prepare(true);
    assert!(!pipeline.prepare_audio(AudioParams::new(64_000, 48_000, false)));
    assert_eq!(
        rig.audio_encoder.configured(),
        Some(MediaParams::Audio(audio_params()))
    );

    pipeline.start_stream(URL).expect("stream starts");
    let opens = rig.transport.opens();
    assert!(opens[0]
        .formats
        .iter()
        .any(|f| matches!(f.detail, TrackDetail::Video { width: 640, .. })));
}

#[test]
fn test_start_stream_opens_transport_with_formats() {
    let (rig, pipeline) = streaming_pipeline();

    let opens = rig.transport.opens();
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].url, URL);
    let kinds: Vec<_> = opens[0].formats.iter().map(|f| f.kind()).collect();
    assert_eq!(kinds, vec![MediaKind::Video, MediaKind::Audio]);
    assert!(opens[0].credentials.is_none());

    assert!(rig.camera.is_started());
    assert!(rig.microphone.is_started());
    assert_eq!(rig.camera.current_device().as_deref(), Some("back"));
    assert_eq!(pipeline.sink_mode(), SinkMode::EncoderOnly);
}

#[test]
fn test_start_stream_requires_prepare_and_is_exclusive() {
    let (_rig, mut pipeline) = pipeline();
    assert_eq!(
        pipeline.start_stream(URL).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    let (_rig, mut pipeline) = streaming_pipeline();
    assert_eq!(
        pipeline.start_stream(URL).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
}

#[test]
fn test_credentials_forwarded_only_when_complete() {
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_audio(audio_params()));

    pipeline.set_authorization("user", "secret");
    pipeline.start_stream(URL).unwrap();
    pipeline.stop_stream();

    pipeline.set_authorization("user", "");
    pipeline.start_stream(URL).unwrap();

    let opens = rig.transport.opens();
    let creds = opens[0].credentials.as_ref().unwrap();
    assert_eq!((creds.user.as_str(), creds.password.as_str()), ("user", "secret"));
    assert!(opens[1].credentials.is_none());
}

#[test]
fn test_transport_open_failure_keeps_capture_running() {
    let (rig, mut pipeline) = pipeline();
    let mut events = pipeline.subscribe();
    rig.transport.set_fail_open(true);
    assert!(pipeline.prepare_video(video_params()));

    let err = pipeline.start_stream(URL).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(pipeline.is_streaming());
    assert!(rig.video_encoder.is_running());
    assert!(rig.camera.is_started());

    let events = drain(&mut events);
    assert!(events.iter().any(|e| {
        matches!(e, PipelineEvent::ConnectionFailed(reason) if reason.contains("refused"))
    }));

    pipeline.stop_stream();
    assert!(!rig.video_encoder.is_running());
    assert_eq!(pipeline.state(), PipelineState::Prepared);
}

#[test]
fn test_async_connection_events_reach_subscribers() {
    let (rig, pipeline) = streaming_pipeline();
    let mut events = pipeline.subscribe();

    let reporter = rig.transport.reporter().expect("open handed a reporter");
    reporter.auth_succeeded();
    reporter.connected();
    reporter.disconnected();

    let events = drain(&mut events);
    assert!(matches!(events[0], PipelineEvent::AuthSuccess));
    assert!(matches!(events[1], PipelineEvent::ConnectionSuccess));
    assert!(matches!(events[2], PipelineEvent::Disconnected));
    assert!(pipeline.is_streaming());
}

#[test]
fn test_encoder_start_failure_rolls_back() {
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_video(video_params()));
    assert!(pipeline.prepare_audio(audio_params()));
    rig.audio_encoder.set_fail_start(true);

    let err = pipeline.start_stream(URL).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);
    assert!(!rig.video_encoder.is_running());
    assert!(!rig.camera.is_open());
    assert!(rig.transport.opens().is_empty());
    assert_eq!(pipeline.state(), PipelineState::Prepared);
}

#[test]
fn test_camera_unavailable_rolls_back() {
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_video(video_params()));
    rig.camera.set_fail_open(true);

    let err = pipeline.start_stream(URL).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    assert!(!rig.video_encoder.is_running());
    assert!(rig.transport.opens().is_empty());
    assert!(!pipeline.is_streaming());
}

#[test]
fn test_preview_then_stream_reuses_device() {
    let (rig, mut pipeline) = pipeline();
    pipeline
        .start_preview(DeviceSelector::Facing(Facing::Front))
        .unwrap();
    assert_eq!(pipeline.state(), PipelineState::Previewing);
    assert_eq!(rig.camera.current_device().as_deref(), Some("front"));

    assert!(pipeline.prepare_video(video_params()));
    assert!(!pipeline.is_previewing());
    assert!(rig.camera.is_open());

    pipeline.start_stream(URL).unwrap();
    assert_eq!(rig.camera.open_calls(), 1);
    assert_eq!(rig.camera.current_device().as_deref(), Some("front"));
    assert!(!pipeline.is_previewing());
}

#[test]
fn test_preview_and_stream_are_exclusive() {
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.start_preview(DeviceSelector::Default).unwrap();
    assert!(!pipeline.is_previewing());
    pipeline.stop_preview();
    assert!(pipeline.is_streaming());
    assert!(rig.camera.is_open());
}

#[test]
fn test_stop_preview_closes_camera() {
    let (rig, mut pipeline) = pipeline();
    pipeline.start_preview(DeviceSelector::Default).unwrap();
    pipeline.start_preview(DeviceSelector::Default).unwrap();
    assert_eq!(rig.camera.open_calls(), 1);

    pipeline.stop_preview();
    assert!(!rig.camera.is_open());
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[test]
fn test_preview_unknown_device_fails() {
    let (_rig, mut pipeline) = pipeline();
    let err = pipeline
        .start_preview(DeviceSelector::Id("usb-7".to_string()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    assert!(!pipeline.is_previewing());
}

#[test]
fn test_switch_device_requires_preview_or_stream() {
    let (rig, mut pipeline) = pipeline();
    let err = pipeline.switch_capture_device().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(rig.camera.switch_calls(), 0);
}

#[test]
fn test_switch_device_retries_once() {
    let (rig, mut pipeline) = streaming_pipeline();

    rig.camera.fail_next_switches(1);
    pipeline.switch_capture_device().unwrap();
    assert_eq!(rig.camera.switch_calls(), 2);
    assert_eq!(rig.camera.current_device().as_deref(), Some("front"));

    rig.camera.fail_next_switches(2);
    let err = pipeline.switch_capture_device().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    assert_eq!(rig.camera.switch_calls(), 4);
    assert!(pipeline.is_streaming());
}

#[test]
fn test_busy_camera_during_switch_keeps_previous_device() {
    let (rig, mut pipeline) = streaming_pipeline();

    // First attempt cannot open the front camera, the retry can
    rig.camera.fail_next_opens_of("front", 1);
    pipeline.switch_capture_device().unwrap();
    assert_eq!(rig.camera.switch_calls(), 2);
    assert_eq!(rig.camera.current_device().as_deref(), Some("front"));
    assert!(rig.camera.is_open() && rig.camera.is_started());

    // Back camera stays busy for both attempts
    rig.camera.fail_next_opens_of("back", 2);
    let err = pipeline.switch_capture_device().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    assert_eq!(rig.camera.current_device().as_deref(), Some("front"));
    assert!(rig.camera.is_open() && rig.camera.is_started());
    assert!(pipeline.is_streaming());
}

#[test]
fn test_bitrate_on_fly_is_best_effort() {
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_video(video_params()));
    pipeline.set_bitrate_on_fly(500_000);
    assert_eq!(rig.video_encoder.bitrate(), None);

    pipeline.start_stream(URL).unwrap();
    pipeline.set_bitrate_on_fly(2_000_000);
    assert_eq!(rig.video_encoder.bitrate(), Some(2_000_000));
    assert_eq!(pipeline.snapshot().video.unwrap().bitrate, 2_000_000);

    rig.video_encoder.set_fail_bitrate(true);
    pipeline.set_bitrate_on_fly(100_000);
    assert_eq!(pipeline.snapshot().video.unwrap().bitrate, 2_000_000);
}

#[test]
fn test_record_requires_known_format() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = pipeline();
    rig.video_encoder.set_emit_format_on_start(false);
    assert!(pipeline.prepare_video(video_params()));
    pipeline.start_stream(URL).unwrap();
    assert!(rig.transport.opens()[0].formats.is_empty());

    let err = pipeline.start_record(dir.path().join("x.mp4")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(rig.containers.created(), 0);

    assert!(rig.video_encoder.emit_format());
    assert_eq!(rig.transport.announced().len(), 1);
    pipeline.start_record(dir.path().join("x.mp4")).unwrap();
    assert_eq!(rig.containers.last().unwrap().tracks.len(), 1);
}

#[test]
fn test_start_record_twice_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.start_record(dir.path().join("a.mp4")).unwrap();
    let err = pipeline.start_record(dir.path().join("b.mp4")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(rig.containers.created(), 1);
    assert!(pipeline.is_recording());
}

#[test]
fn test_container_create_failure_is_io() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    rig.containers.set_fail_create(true);

    let err = pipeline.start_record(dir.path().join("a.mp4")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!pipeline.is_recording());
    assert_eq!(pipeline.state(), PipelineState::Streaming);
}

#[test]
fn test_track_registration_failure_releases_writer() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    rig.containers.set_fail_register(true);

    assert!(pipeline.start_record(dir.path().join("a.mp4")).is_err());
    let recording = rig.containers.last().unwrap();
    assert!(recording.released);
    assert!(!recording.started);
    assert!(!pipeline.is_recording());
}

#[test]
fn test_write_and_finalize_failures_do_not_escape() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.start_record(dir.path().join("a.mp4")).unwrap();

    rig.containers.set_fail_write(true);
    rig.video_encoder.emit_unit(true);
    assert_eq!(rig.transport.pushed_count(), 1);

    rig.containers.set_fail_stop(true);
    let summary = pipeline.stop_record().unwrap();
    assert_eq!(summary.write_errors, 1);
    assert!(!summary.finalized);
    assert!(rig.containers.last().unwrap().released);
    assert!(!pipeline.is_recording());
}

#[test]
fn test_start_record_in_creates_folder_and_names_file() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    let mut events = pipeline.subscribe();
    let folder = dir.path().join("a").join("b");

    let path = pipeline.start_record_in(&folder).unwrap();
    assert!(folder.is_dir());
    assert_eq!(path.parent(), Some(folder.as_path()));
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert_eq!(name.len(), "20240101_120000.mp4".len());
    assert!(name.ends_with(".mp4"));
    assert_eq!(name.as_bytes()[8], b'_');

    rig.video_encoder.emit_unit(true);
    let summary = pipeline.stop_record().unwrap();
    assert_eq!(summary.file_name, name);
    assert_eq!(summary.folder, folder);

    let events = drain(&mut events);
    assert!(matches!(&events[0], PipelineEvent::RecordingStarted(p) if *p == path));
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::RecordingSaved(s) if s.file_name == name)));
}

#[test]
fn test_audio_only_recording_writes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = pipeline();
    assert!(pipeline.prepare_audio(audio_params()));
    pipeline.start_stream(URL).unwrap();
    assert!(!rig.camera.is_open());

    pipeline.start_record(dir.path().join("voice.mp4")).unwrap();
    rig.microphone.emit_many(3);
    let summary = pipeline.stop_record().unwrap();
    assert_eq!(summary.audio_units, 3);
    assert_eq!(summary.gated_units, 0);
}

#[test]
fn test_capture_frames_flow_to_both_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.start_record(dir.path().join("flow.mp4")).unwrap();

    assert_eq!(rig.capture_tick(), 2);
    rig.capture_tick();

    let summary = pipeline.stop_record().unwrap();
    assert_eq!(summary.video_units, 2);
    assert_eq!(summary.audio_units, 2);
    assert_eq!(rig.transport.pushed_count(), 4);
    assert_eq!(pipeline.routed_units(), 4);
}

#[test]
fn test_state_events_follow_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = pipeline();
    let mut events = pipeline.subscribe();

    assert!(pipeline.prepare_video(video_params()));
    pipeline.start_stream(URL).unwrap();
    pipeline.start_record(dir.path().join("e.mp4")).unwrap();
    rig.video_encoder.emit_unit(true);
    pipeline.stop_record();
    pipeline.stop_stream();

    let states: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::StateChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PipelineState::Prepared,
            PipelineState::Streaming,
            PipelineState::Recording,
            PipelineState::Streaming,
            PipelineState::Prepared,
        ]
    );
}

#[test]
fn test_drop_finalizes_recording() {
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.start_record(dir.path().join("drop.mp4")).unwrap();
    rig.video_encoder.emit_unit(true);

    drop(pipeline);

    let recording = rig.containers.last().unwrap();
    assert!(recording.stopped && recording.released);
    assert_eq!(rig.transport.close_count(), 1);
    assert!(!rig.camera.is_open());
}

#[test]
fn test_snapshot_reflects_session() {
    let (_rig, mut pipeline) = streaming_pipeline();
    pipeline.set_video_enabled(false);
    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.session_id, pipeline.id());
    assert_eq!(snapshot.state, PipelineState::Streaming);
    assert!(snapshot.streaming_active);
    assert!(!snapshot.video_enabled);
    assert_eq!(snapshot.audio.unwrap().sample_rate, 44_100);
}

#[test]
fn test_builder_rejects_missing_and_mismatched_parts() {
    let err = PipelineOrchestrator::builder().build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let (_rig, builder) = FakeRig::new();
    let err = builder
        .video_encoder(Box::new(crate::testing::FakeEncoder::audio()))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("video encoder"));
}

#[test]
fn test_preview_surface_sink_draws_preview_and_encodes_stream() {
    let preview = Arc::new(CountingPreview::default());
    let (rig, builder) = FakeRig::new();
    let mut pipeline = builder
        .frame_sink(Box::new(PreviewSurfaceSink::new(preview.clone())))
        .build()
        .unwrap();

    pipeline.start_preview(DeviceSelector::Default).unwrap();
    rig.camera.emit_many(2);
    assert_eq!(preview.rendered(), 2);
    assert_eq!(rig.video_encoder.frames_encoded(), 0);

    assert!(pipeline.prepare_video(video_params()));
    pipeline.start_stream(URL).unwrap();
    rig.camera.emit_many(3);
    assert_eq!(preview.rendered(), 5);
    assert_eq!(rig.transport.pushed_count(), 3);
    assert_eq!(pipeline.sink_mode(), SinkMode::PreviewSurface);
}

#[test]
fn test_compositor_sink_limits_to_stream_fps() {
    let (rig, builder) = FakeRig::new();
    let mut pipeline = builder
        .frame_sink(Box::new(CompositorSink::new()))
        .build()
        .unwrap();

    assert!(pipeline.prepare_video(VideoParams::new(640, 480, 15, 800_000)));
    pipeline.start_stream(URL).unwrap();
    rig.camera.emit_many(30);
    assert_eq!(rig.transport.pushed_count(), 15);
}

#[test]
fn test_session_invariants_are_checked() {
    clear_invariant_log();
    let dir = tempfile::tempdir().unwrap();
    let (rig, mut pipeline) = streaming_pipeline();
    pipeline.start_record(dir.path().join("c.mp4")).unwrap();
    rig.video_encoder.emit_unit(true);
    pipeline.stop_stream();

    contract_test(
        "orchestrator lifecycle",
        &[
            RECORDING_IMPLIES_STREAMING,
            PREVIEW_EXCLUDES_STREAMING,
            NO_WRITE_BEFORE_KEYFRAME,
        ],
    );
}
