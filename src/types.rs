//! Core media types shared by capture, encode, and output stages

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which elementary stream a unit or track belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// Codec-specific part of a track description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackDetail {
    Video { width: u32, height: u32, fps: u32 },
    Audio { sample_rate: u32, channels: u16 },
}

/// Description of one encoded track, emitted once per encoder activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    pub mime: String,
    pub bitrate: u32,
    pub detail: TrackDetail,
    /// Out-of-band codec configuration (SPS/PPS, AudioSpecificConfig, Opus head)
    pub codec_config: Bytes,
}

impl TrackFormat {
    pub fn video(mime: impl Into<String>, width: u32, height: u32, fps: u32, bitrate: u32) -> Self {
        Self {
            mime: mime.into(),
            bitrate,
            detail: TrackDetail::Video { width, height, fps },
            codec_config: Bytes::new(),
        }
    }

    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u16, bitrate: u32) -> Self {
        Self {
            mime: mime.into(),
            bitrate,
            detail: TrackDetail::Audio {
                sample_rate,
                channels,
            },
            codec_config: Bytes::new(),
        }
    }

    pub fn with_codec_config(mut self, config: impl Into<Bytes>) -> Self {
        self.codec_config = config.into();
        self
    }

    pub fn kind(&self) -> MediaKind {
        match self.detail {
            TrackDetail::Video { .. } => MediaKind::Video,
            TrackDetail::Audio { .. } => MediaKind::Audio,
        }
    }
}

/// One timestamped unit of compressed media
///
/// The payload is reference counted so both sinks can read the same bytes
/// without copying; nothing mutates a unit after the encoder emits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub kind: MediaKind,
    pub data: Bytes,
    /// Presentation timestamp in microseconds
    pub pts_us: u64,
    pub keyframe: bool,
}

impl AccessUnit {
    pub fn video(data: impl Into<Bytes>, pts_us: u64, keyframe: bool) -> Self {
        Self {
            kind: MediaKind::Video,
            data: data.into(),
            pts_us,
            keyframe,
        }
    }

    pub fn audio(data: impl Into<Bytes>, pts_us: u64) -> Self {
        Self {
            kind: MediaKind::Audio,
            data: data.into(),
            pts_us,
            keyframe: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Yuv420p,
}

/// Raw picture handed from a capture device to an encoder input
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts_us: u64,
}

impl VideoFrame {
    /// Solid black frame in the given layout
    pub fn black(width: u32, height: u32, format: PixelFormat, pts_us: u64) -> Self {
        let pixels = (width as usize) * (height as usize);
        let data = match format {
            PixelFormat::Rgb24 => vec![0u8; pixels * 3],
            PixelFormat::Yuv420p => {
                let mut yuv = vec![16u8; pixels];
                yuv.resize(pixels + pixels / 2, 128);
                yuv
            }
        };
        Self {
            data: Bytes::from(data),
            width,
            height,
            format,
            pts_us,
        }
    }
}

/// Interleaved f32 PCM handed from a microphone to an encoder input
#[derive(Debug, Clone)]
pub struct PcmChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub pts_us: u64,
}

#[derive(Debug, Clone)]
pub enum RawMedia {
    Video(VideoFrame),
    Audio(PcmChunk),
}

impl RawMedia {
    pub fn kind(&self) -> MediaKind {
        match self {
            RawMedia::Video(_) => MediaKind::Video,
            RawMedia::Audio(_) => MediaKind::Audio,
        }
    }
}

/// Requested video encode parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub hardware_rotation: bool,
    /// Rotation in degrees (0, 90, 180, 270)
    pub rotation: u16,
}

impl VideoParams {
    pub fn new(width: u32, height: u32, fps: u32, bitrate: u32) -> Self {
        Self {
            width,
            height,
            fps,
            bitrate,
            hardware_rotation: false,
            rotation: 0,
        }
    }

    pub fn with_rotation(mut self, hardware_rotation: bool, rotation: u16) -> Self {
        self.hardware_rotation = hardware_rotation;
        self.rotation = rotation;
        self
    }
}

impl Default for VideoParams {
    fn default() -> Self {
        Self::new(640, 480, 30, 1200 * 1024).with_rotation(true, 0)
    }
}

/// Requested audio encode and capture parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub bitrate: u32,
    pub sample_rate: u32,
    pub stereo: bool,
    pub echo_canceler: bool,
    pub noise_suppressor: bool,
}

impl AudioParams {
    pub fn new(bitrate: u32, sample_rate: u32, stereo: bool) -> Self {
        Self {
            bitrate,
            sample_rate,
            stereo,
            echo_canceler: false,
            noise_suppressor: false,
        }
    }

    pub fn with_processing(mut self, echo_canceler: bool, noise_suppressor: bool) -> Self {
        self.echo_canceler = echo_canceler;
        self.noise_suppressor = noise_suppressor;
        self
    }

    pub fn channels(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

impl Default for AudioParams {
    fn default() -> Self {
        Self::new(128 * 1024, 44100, true)
    }
}

/// Parameters handed to an encoder's `configure` and a source's `prepare`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaParams {
    Video(VideoParams),
    Audio(AudioParams),
}

impl MediaParams {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaParams::Video(_) => MediaKind::Video,
            MediaParams::Audio(_) => MediaKind::Audio,
        }
    }
}

/// Which side of the device a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Facing {
    Back,
    Front,
}

impl Facing {
    pub fn flipped(self) -> Self {
        match self {
            Facing::Back => Facing::Front,
            Facing::Front => Facing::Back,
        }
    }
}

/// How a capture source picks its device on `open`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelector {
    /// The platform default (back camera, default microphone)
    Default,
    Facing(Facing),
    Id(String),
    /// Whatever device the source had open last
    Last,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_format_kind() {
        let video = TrackFormat::video("video/avc", 640, 480, 30, 1_228_800);
        assert_eq!(video.kind(), MediaKind::Video);
        let audio = TrackFormat::audio("audio/mp4a-latm", 44100, 2, 131_072);
        assert_eq!(audio.kind(), MediaKind::Audio);
    }

    #[test]
    fn test_access_unit_clone_shares_payload() {
        let unit = AccessUnit::video(vec![0, 0, 0, 1, 0x65], 33_333, true);
        let copy = unit.clone();
        assert_eq!(unit.data.as_ptr(), copy.data.as_ptr());
        assert!(copy.keyframe);
    }

    #[test]
    fn test_black_yuv_frame_layout() {
        let frame = VideoFrame::black(4, 4, PixelFormat::Yuv420p, 0);
        assert_eq!(frame.data.len(), 24);
        assert_eq!(frame.data[0], 16);
        assert_eq!(frame.data[23], 128);
    }

    #[test]
    fn test_default_params_match_source_defaults() {
        let video = VideoParams::default();
        assert_eq!((video.width, video.height, video.fps), (640, 480, 30));
        assert_eq!(video.bitrate, 1_228_800);
        let audio = AudioParams::default();
        assert_eq!(audio.bitrate, 131_072);
        assert_eq!(audio.channels(), 2);
    }
}
