//! Active recording session: container writer plus the keyframe gate

use std::path::{Path, PathBuf};
use std::time::Instant;

use super::config::RecordingSummary;
use crate::assert_invariant;
use crate::errors::{PipelineError, PipelineResult};
use crate::invariant_ppt::NO_WRITE_BEFORE_KEYFRAME;
use crate::pipeline::{ContainerWriter, ContainerWriterFactory, TrackFormats};
use crate::types::{AccessUnit, MediaKind};

/// Keeps video out of the container until the first keyframe.
///
/// A fresh gate starts closed for every recording and only ever opens.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordingGate {
    can_record_video: bool,
}

impl RecordingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a video unit; opens the gate on a keyframe
    pub fn observe(&mut self, unit: &AccessUnit) {
        if unit.kind == MediaKind::Video && unit.keyframe {
            self.can_record_video = true;
        }
    }

    pub fn can_record_video(&self) -> bool {
        self.can_record_video
    }

    pub fn reset(&mut self) {
        self.can_record_video = false;
    }
}

/// One container file being written while a stream is live
pub struct ActiveRecording {
    writer: Option<Box<dyn ContainerWriter>>,
    video_track: Option<usize>,
    audio_track: Option<usize>,
    gate: RecordingGate,
    summary: RecordingSummary,
    started: Instant,
}

impl ActiveRecording {
    /// Create the writer, register every known track, and start it.
    ///
    /// On failure the writer is released before returning.
    pub fn begin(
        factory: &dyn ContainerWriterFactory,
        path: &Path,
        formats: &TrackFormats,
    ) -> PipelineResult<Self> {
        if formats.is_empty() {
            return Err(PipelineError::invalid_state(
                "no track format has been produced yet",
            ));
        }

        let mut writer = factory.create(path)?;

        let registered = (|| -> PipelineResult<(Option<usize>, Option<usize>)> {
            let video_track = match &formats.video {
                Some(format) => Some(writer.register_track(format)?),
                None => None,
            };
            let audio_track = match &formats.audio {
                Some(format) => Some(writer.register_track(format)?),
                None => None,
            };
            writer.start()?;
            Ok((video_track, audio_track))
        })();

        let (video_track, audio_track) = match registered {
            Ok(tracks) => tracks,
            Err(e) => {
                writer.release();
                return Err(e);
            }
        };

        log::info!(
            "Recording to {} (video track: {:?}, audio track: {:?})",
            path.display(),
            video_track,
            audio_track
        );

        Ok(Self {
            writer: Some(writer),
            video_track,
            audio_track,
            gate: RecordingGate::new(),
            summary: RecordingSummary::for_path(path),
            started: Instant::now(),
        })
    }

    /// Route one unit into the container, honouring the keyframe gate.
    ///
    /// Audio waits for the same gate whenever a video track exists so that
    /// the file never starts ahead of its first keyframe.
    pub fn route(&mut self, unit: &AccessUnit) {
        let track = match unit.kind {
            MediaKind::Video => {
                let Some(track) = self.video_track else {
                    return;
                };
                self.gate.observe(unit);
                track
            }
            MediaKind::Audio => {
                let Some(track) = self.audio_track else {
                    return;
                };
                track
            }
        };

        let gated = self.video_track.is_some() && !self.gate.can_record_video();
        if gated {
            self.summary.gated_units += 1;
            return;
        }

        assert_invariant!(
            self.video_track.is_none() || self.gate.can_record_video(),
            NO_WRITE_BEFORE_KEYFRAME,
            "recording"
        );

        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match writer.write(track, unit) {
            Ok(()) => {
                match unit.kind {
                    MediaKind::Video => self.summary.video_units += 1,
                    MediaKind::Audio => self.summary.audio_units += 1,
                }
                self.summary.bytes_written += unit.len() as u64;
            }
            Err(e) => {
                self.summary.write_errors += 1;
                log::warn!("Dropping {} unit from recording: {}", unit.kind.as_str(), e);
            }
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.summary.path
    }

    pub fn gate(&self) -> RecordingGate {
        self.gate
    }

    /// Finalize and release the container. Never fails; problems are logged
    /// and reflected in `finalized`.
    pub fn finish(mut self) -> RecordingSummary {
        self.summary.duration_secs = self.started.elapsed().as_secs_f64();
        if let Some(mut writer) = self.writer.take() {
            match writer.stop() {
                Ok(()) => self.summary.finalized = true,
                Err(e) => log::error!("Failed to finalize {}: {}", self.summary.path.display(), e),
            }
            writer.release();
        }
        self.gate.reset();
        log::info!("{}", self.summary.saved_message());
        self.summary.clone()
    }
}

impl Drop for ActiveRecording {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            log::warn!(
                "Recording {} dropped without finish; finalizing",
                self.summary.path.display()
            );
            let _ = writer.stop();
            writer.release();
        }
    }
}
