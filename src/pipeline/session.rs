//! Session state and the lifecycle state machine view of it

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AudioParams, VideoParams};

/// Lifecycle state derived from the session flags
///
/// Recording is a sub-state of streaming; previewing and streaming are
/// alternative uses of the same capture surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Previewing,
    Prepared,
    Streaming,
    Recording,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Mutable session flags, owned by the controlling thread
#[derive(Debug, Clone, Default)]
pub(crate) struct Session {
    pub preview_active: bool,
    pub streaming_active: bool,
    pub recording_active: bool,
    pub video_enabled: bool,
    pub audio_muted: bool,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
}

impl Session {
    pub fn is_prepared(&self) -> bool {
        self.video.is_some() || self.audio.is_some()
    }

    pub fn state(&self) -> PipelineState {
        if self.recording_active {
            PipelineState::Recording
        } else if self.streaming_active {
            PipelineState::Streaming
        } else if self.preview_active {
            PipelineState::Previewing
        } else if self.is_prepared() {
            PipelineState::Prepared
        } else {
            PipelineState::Idle
        }
    }

    pub fn snapshot(&self, session_id: Uuid) -> SessionSnapshot {
        SessionSnapshot {
            session_id,
            state: self.state(),
            preview_active: self.preview_active,
            streaming_active: self.streaming_active,
            recording_active: self.recording_active,
            video_enabled: self.video_enabled,
            audio_muted: self.audio_muted,
            video: self.video.clone(),
            audio: self.audio.clone(),
        }
    }
}

/// Immutable copy of the session for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: PipelineState,
    pub preview_active: bool,
    pub streaming_active: bool,
    pub recording_active: bool,
    pub video_enabled: bool,
    pub audio_muted: bool,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
}
