//! Local recording while a stream is live
//!
//! A recording owns one container writer per `start_record` call and sits
//! behind a keyframe gate so the file always opens on a decodable picture.
//!
//! With the `recording` feature this module also provides:
//! - `Mp4Writer`, an MP4 container writer over muxide
//! - `H264Encoder`, a video encoder over openh264
//!
//! # Example
//! ```rust,ignore
//! use crabstream::recording::recording_file_name;
//!
//! let name = recording_file_name(chrono::Local::now());
//! orchestrator.start_record(folder.join(&name))?;
//! // ...
//! let summary = orchestrator.stop_record();
//! ```

mod config;
mod recorder;

#[cfg(feature = "recording")]
mod encoder;
#[cfg(feature = "recording")]
mod mp4;

pub use config::{recording_file_name, RecordingSummary, FILE_NAME_FORMAT};
pub use recorder::{ActiveRecording, RecordingGate};

#[cfg(feature = "recording")]
pub use encoder::H264Encoder;
#[cfg(feature = "recording")]
pub use mp4::{Mp4Writer, Mp4WriterFactory};
