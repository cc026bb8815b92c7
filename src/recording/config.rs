//! Recording naming and result types

use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Timestamp layout used for recorded file names
pub const FILE_NAME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Build the `<timestamp>.mp4` file name for a recording started at `now`
pub fn recording_file_name<Tz>(now: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{}.mp4", now.format(FILE_NAME_FORMAT))
}

/// Result of a finished recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSummary {
    /// Full output path
    pub path: PathBuf,
    /// File name component, as derived at start time
    pub file_name: String,
    /// Containing folder
    pub folder: PathBuf,
    /// Video units written to the container
    pub video_units: u64,
    /// Audio units written to the container
    pub audio_units: u64,
    /// Units held back because no keyframe had arrived yet
    pub gated_units: u64,
    /// Units the container refused
    pub write_errors: u64,
    /// Payload bytes handed to the container
    pub bytes_written: u64,
    /// Wall-clock duration of the recording session in seconds
    pub duration_secs: f64,
    /// Whether the container finalized cleanly
    pub finalized: bool,
}

impl RecordingSummary {
    pub(crate) fn for_path(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            folder: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            video_units: 0,
            audio_units: 0,
            gated_units: 0,
            write_errors: 0,
            bytes_written: 0,
            duration_secs: 0.0,
            finalized: false,
        }
    }

    /// Total units that reached the container
    pub fn units_written(&self) -> u64 {
        self.video_units + self.audio_units
    }

    /// Calculate the average bitrate achieved
    pub fn avg_bitrate(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.bytes_written as f64 * 8.0) / self.duration_secs
        } else {
            0.0
        }
    }

    /// Human readable notification line
    pub fn saved_message(&self) -> String {
        format!("file {} saved in {}", self.file_name, self.folder.display())
    }
}
