//! Property-based tests for the pipeline lifecycle and recording gate
//!
//! Random operation sequences run against the in-memory rig; after every
//! step the externally observable state must stay consistent.
//!
//! Run with: cargo test --test recording_props

use proptest::prelude::*;
use tempfile::tempdir;

use crabstream::pipeline::PipelineState;
use crabstream::testing::FakeRig;
use crabstream::types::{AudioParams, DeviceSelector, MediaKind, VideoParams};
use crabstream::PipelineOrchestrator;

const URL: &str = "rtmp://host/app/key";

#[derive(Debug, Clone)]
enum Op {
    Prepare,
    StartPreview,
    StopPreview,
    StartStream,
    StopStream,
    StartRecord,
    StopRecord,
    VideoUnit(bool),
    AudioUnit,
    CaptureTick,
    SwitchCamera,
    ToggleVideo,
    ToggleMute,
    Bitrate(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::Prepare),
        1 => Just(Op::StartPreview),
        1 => Just(Op::StopPreview),
        3 => Just(Op::StartStream),
        1 => Just(Op::StopStream),
        3 => Just(Op::StartRecord),
        2 => Just(Op::StopRecord),
        4 => any::<bool>().prop_map(Op::VideoUnit),
        2 => Just(Op::AudioUnit),
        1 => Just(Op::CaptureTick),
        1 => Just(Op::SwitchCamera),
        1 => Just(Op::ToggleVideo),
        1 => Just(Op::ToggleMute),
        1 => (100_000u32..5_000_000).prop_map(Op::Bitrate),
    ]
}

fn expected_state(pipeline: &PipelineOrchestrator) -> PipelineState {
    let snapshot = pipeline.snapshot();
    if snapshot.recording_active {
        PipelineState::Recording
    } else if snapshot.streaming_active {
        PipelineState::Streaming
    } else if snapshot.preview_active {
        PipelineState::Previewing
    } else if snapshot.video.is_some() || snapshot.audio.is_some() {
        PipelineState::Prepared
    } else {
        PipelineState::Idle
    }
}

fn apply(op: &Op, rig: &FakeRig, pipeline: &mut PipelineOrchestrator, dir: &std::path::Path) {
    match op {
        Op::Prepare => {
            let _ = pipeline.prepare_video(VideoParams::new(640, 480, 30, 1_228_800));
            let _ = pipeline.prepare_audio(AudioParams::new(131_072, 44_100, true));
        }
        Op::StartPreview => {
            let _ = pipeline.start_preview(DeviceSelector::Default);
        }
        Op::StopPreview => pipeline.stop_preview(),
        Op::StartStream => {
            let _ = pipeline.start_stream(URL);
        }
        Op::StopStream => pipeline.stop_stream(),
        Op::StartRecord => {
            let _ = pipeline.start_record_in(dir);
        }
        Op::StopRecord => {
            let _ = pipeline.stop_record();
        }
        Op::VideoUnit(keyframe) => {
            let _ = rig.video_encoder.emit_unit(*keyframe);
        }
        Op::AudioUnit => {
            let _ = rig.audio_encoder.emit_unit(false);
        }
        Op::CaptureTick => {
            rig.capture_tick();
        }
        Op::SwitchCamera => {
            let _ = pipeline.switch_capture_device();
        }
        Op::ToggleVideo => {
            let enabled = pipeline.is_video_enabled();
            pipeline.set_video_enabled(!enabled);
        }
        Op::ToggleMute => {
            let muted = pipeline.is_audio_muted();
            pipeline.set_audio_muted(!muted);
        }
        Op::Bitrate(bitrate) => pipeline.set_bitrate_on_fly(*bitrate),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Recording implies streaming, preview excludes streaming, and the
    /// reported state follows the flag precedence after every operation
    #[test]
    fn lifecycle_flags_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = tempdir().unwrap();
        let (rig, builder) = FakeRig::new();
        let mut pipeline = builder.build().unwrap();

        for op in &ops {
            apply(op, &rig, &mut pipeline, dir.path());

            prop_assert!(!pipeline.is_recording() || pipeline.is_streaming(), "after {:?}", op);
            prop_assert!(!(pipeline.is_previewing() && pipeline.is_streaming()), "after {:?}", op);
            prop_assert_eq!(pipeline.state(), expected_state(&pipeline));
        }

        pipeline.stop_stream();
        pipeline.stop_preview();
        prop_assert!(!rig.video_encoder.is_running());
        prop_assert!(!rig.transport.is_open());
    }

    /// Every recording opens on a video keyframe, and what it holds is exactly
    /// the units routed from that keyframe onwards
    #[test]
    fn recordings_start_on_keyframe(
        units in prop::collection::vec((any::<bool>(), any::<bool>()), 1..80),
    ) {
        let dir = tempdir().unwrap();
        let (rig, builder) = FakeRig::new();
        let mut pipeline = builder.build().unwrap();
        prop_assert!(pipeline.prepare_video_default());
        prop_assert!(pipeline.prepare_audio_default());
        pipeline.start_stream(URL).unwrap();
        pipeline.start_record(dir.path().join("prop.mp4")).unwrap();

        let mut emitted = Vec::new();
        for (is_video, keyframe) in &units {
            let unit = if *is_video {
                rig.video_encoder.emit_unit(*keyframe)
            } else {
                rig.audio_encoder.emit_unit(false)
            };
            emitted.push(unit.unwrap());
        }

        let summary = pipeline.stop_record().unwrap();
        let recording = rig.containers.last().unwrap();
        let first_key = emitted
            .iter()
            .position(|u| u.kind == MediaKind::Video && u.keyframe);

        match first_key {
            None => {
                prop_assert!(recording.writes.is_empty());
                prop_assert_eq!(summary.gated_units as usize, emitted.len());
            }
            Some(index) => {
                let written: Vec<_> = recording.writes.iter().map(|(_, u)| u.clone()).collect();
                prop_assert_eq!(&written[..], &emitted[index..]);
                prop_assert_eq!(summary.gated_units as usize, index);
                prop_assert!(recording.first_write().unwrap().keyframe);
            }
        }

        // The live path never waits for the gate
        prop_assert_eq!(rig.transport.pushed_count(), emitted.len());
    }

    /// Back-to-back recordings never share units and each is finalized
    #[test]
    fn consecutive_recordings_are_disjoint(segments in prop::collection::vec(1usize..10, 1..5)) {
        let dir = tempdir().unwrap();
        let (rig, builder) = FakeRig::new();
        let mut pipeline = builder.build().unwrap();
        prop_assert!(pipeline.prepare_video_default());
        pipeline.start_stream(URL).unwrap();

        for (i, deltas) in segments.iter().enumerate() {
            pipeline.start_record(dir.path().join(format!("seg{}.mp4", i))).unwrap();
            rig.video_encoder.emit_unit(true).unwrap();
            rig.video_encoder.emit_deltas(*deltas);
            let summary = pipeline.stop_record().unwrap();
            prop_assert_eq!(summary.video_units as usize, deltas + 1);
            prop_assert!(summary.finalized);
        }

        let recordings = rig.containers.recordings();
        prop_assert_eq!(recordings.len(), segments.len());
        for (recording, deltas) in recordings.iter().zip(&segments) {
            prop_assert_eq!(recording.writes.len(), deltas + 1);
            prop_assert!(recording.stopped && recording.released);
        }
    }
}
