//! MP4 container writer using muxide

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use muxide::api::{AudioCodec, Metadata, Muxer, MuxerBuilder, MuxerStats, VideoCodec};

use crate::config::RecordingConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::{ContainerWriter, ContainerWriterFactory};
use crate::timing::us_to_secs;
use crate::types::{AccessUnit, MediaKind, TrackDetail, TrackFormat};

const VIDEO_TRACK: usize = 0;
const AUDIO_TRACK: usize = 1;

/// Only codec muxed on the audio track
pub const OPUS_TRACK_MIME: &str = "audio/opus";
/// Opus always runs its MP4 timeline at 48 kHz
const OPUS_TRACK_RATE: u32 = 48_000;

/// Creates one `Mp4Writer` per recording
#[derive(Debug, Clone)]
pub struct Mp4WriterFactory {
    fast_start: bool,
}

impl Mp4WriterFactory {
    pub fn new(fast_start: bool) -> Self {
        Self { fast_start }
    }

    pub fn from_config(config: &RecordingConfig) -> Self {
        Self::new(config.fast_start)
    }
}

impl Default for Mp4WriterFactory {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ContainerWriterFactory for Mp4WriterFactory {
    fn create(&self, path: &Path) -> PipelineResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(Mp4Writer::new(path, self.fast_start)))
    }
}

/// H.264 + Opus MP4 writer
///
/// The file is created on `start`, once the tracks are known. A video track
/// is required; both tracks share one timeline whose zero is the first video
/// unit written.
pub struct Mp4Writer {
    path: PathBuf,
    fast_start: bool,
    video: Option<(u32, u32, u32)>,
    audio_channels: Option<u16>,
    muxer: Option<Muxer<BufWriter<File>>>,
    base_pts_us: Option<u64>,
    stats: Option<MuxerStats>,
}

impl Mp4Writer {
    pub fn new(path: &Path, fast_start: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            fast_start,
            video: None,
            audio_channels: None,
            muxer: None,
            base_pts_us: None,
            stats: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_started(&self) -> bool {
        self.muxer.is_some()
    }

    /// Muxer statistics, available once `stop` finalized the file
    pub fn stats(&self) -> Option<&MuxerStats> {
        self.stats.as_ref()
    }

    fn write_audio(&mut self, unit: &AccessUnit) -> PipelineResult<()> {
        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| PipelineError::invalid_state("MP4 writer not started"))?;
        let base = self.base_pts_us.ok_or_else(|| {
            PipelineError::invalid_state("audio cannot be written before the first video unit")
        })?;
        // Audio captured just ahead of the opening keyframe lands on its timestamp
        let pts = us_to_secs(unit.pts_us.saturating_sub(base));
        muxer
            .write_audio(pts, &unit.data)
            .map_err(|e| PipelineError::Encoding(format!("Failed to write audio: {}", e)))
    }

    fn write_video(&mut self, unit: &AccessUnit) -> PipelineResult<()> {
        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| PipelineError::invalid_state("MP4 writer not started"))?;
        let base = *self.base_pts_us.get_or_insert(unit.pts_us);
        let pts = us_to_secs(unit.pts_us.saturating_sub(base));
        muxer
            .write_video(pts, &unit.data, unit.keyframe)
            .map_err(|e| PipelineError::Encoding(format!("Failed to write frame: {}", e)))
    }
}

impl ContainerWriter for Mp4Writer {
    fn register_track(&mut self, format: &TrackFormat) -> PipelineResult<usize> {
        if self.muxer.is_some() {
            return Err(PipelineError::invalid_state(
                "tracks must be registered before start",
            ));
        }
        match format.detail {
            TrackDetail::Video { width, height, fps } => {
                if format.mime != super::encoder::H264_MIME {
                    return Err(PipelineError::Encoding(format!(
                        "unsupported video track {}",
                        format.mime
                    )));
                }
                if self.video.is_some() {
                    return Err(PipelineError::invalid_state("video track already registered"));
                }
                self.video = Some((width, height, fps));
                Ok(VIDEO_TRACK)
            }
            TrackDetail::Audio { channels, .. } => {
                if format.mime != OPUS_TRACK_MIME {
                    return Err(PipelineError::Encoding(format!(
                        "unsupported audio track {}",
                        format.mime
                    )));
                }
                if self.audio_channels.is_some() {
                    return Err(PipelineError::invalid_state("audio track already registered"));
                }
                self.audio_channels = Some(channels);
                Ok(AUDIO_TRACK)
            }
        }
    }

    fn start(&mut self) -> PipelineResult<()> {
        let (width, height, fps) = self
            .video
            .ok_or_else(|| PipelineError::Encoding("MP4 output needs a video track".to_string()))?;

        let file = File::create(&self.path)
            .map_err(|e| PipelineError::Io(format!("Failed to create output file: {}", e)))?;

        let mut builder = MuxerBuilder::new(BufWriter::new(file))
            .video(VideoCodec::H264, width, height, f64::from(fps))
            .with_fast_start(self.fast_start)
            .with_metadata(Metadata::new().with_current_time());
        if let Some(channels) = self.audio_channels {
            builder = builder.audio(AudioCodec::Opus, OPUS_TRACK_RATE, channels);
        }
        let muxer = builder
            .build()
            .map_err(|e| PipelineError::Encoding(format!("Failed to create muxer: {}", e)))?;

        self.muxer = Some(muxer);
        log::debug!(
            "MP4 muxer started for {} (audio: {})",
            self.path.display(),
            self.audio_channels.is_some()
        );
        Ok(())
    }

    fn write(&mut self, track: usize, unit: &AccessUnit) -> PipelineResult<()> {
        match (track, unit.kind) {
            (VIDEO_TRACK, MediaKind::Video) if self.video.is_some() => self.write_video(unit),
            (AUDIO_TRACK, MediaKind::Audio) if self.audio_channels.is_some() => {
                self.write_audio(unit)
            }
            _ => Err(PipelineError::invalid_state(format!(
                "no {} track with index {}",
                unit.kind.as_str(),
                track
            ))),
        }
    }

    fn stop(&mut self) -> PipelineResult<()> {
        let Some(muxer) = self.muxer.take() else {
            return Ok(());
        };
        let stats = muxer
            .finish_with_stats()
            .map_err(|e| PipelineError::Encoding(format!("Failed to finalize recording: {}", e)))?;
        log::info!(
            "MP4 finalized: {} video frames, {} audio frames, {:.2}s, {} bytes",
            stats.video_frames,
            stats.audio_frames,
            stats.duration_secs,
            stats.bytes_written
        );
        self.stats = Some(stats);
        Ok(())
    }

    fn release(&mut self) {
        // A muxer still held here was never finalized
        if self.muxer.take().is_some() {
            log::warn!("Releasing unfinished MP4 {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h264_keyframe() -> Vec<u8> {
        let mut data = vec![
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1e, 0xab, 0x40, 0xf0, 0x28, 0xd0,
        ];
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x38, 0x80]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, 0x10]);
        data
    }

    /// SILK 20 ms stereo, one frame
    fn opus_packet() -> Vec<u8> {
        vec![0x24, 0xc0, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05]
    }

    #[test]
    fn test_start_without_video_track_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio_only.mp4");
        let mut writer = Mp4Writer::new(&path, true);
        writer
            .register_track(&TrackFormat::audio(OPUS_TRACK_MIME, 48_000, 2, 64_000))
            .unwrap();
        assert!(writer.start().is_err());
        assert!(!path.exists());
        writer.release();
    }

    #[test]
    fn test_audio_and_video_are_both_muxed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("av.mp4");
        let mut writer = Mp4Writer::new(&path, true);
        let video = writer
            .register_track(&TrackFormat::video("video/avc", 640, 480, 30, 1_000_000))
            .unwrap();
        let audio = writer
            .register_track(&TrackFormat::audio(OPUS_TRACK_MIME, 48_000, 2, 64_000))
            .unwrap();
        writer.start().unwrap();

        // Audio stamped slightly before the keyframe still lands in the file
        writer
            .write(video, &AccessUnit::video(h264_keyframe(), 1_000_000, true))
            .unwrap();
        writer
            .write(audio, &AccessUnit::audio(opus_packet(), 995_000))
            .unwrap();
        writer
            .write(audio, &AccessUnit::audio(opus_packet(), 1_015_000))
            .unwrap();
        writer.stop().unwrap();
        writer.release();

        let stats = writer.stats().unwrap();
        assert_eq!(stats.video_frames, 1);
        assert_eq!(stats.audio_frames, 2);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_audio_before_any_video_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::new(&dir.path().join("early_audio.mp4"), true);
        writer
            .register_track(&TrackFormat::video("video/avc", 640, 480, 30, 1_000_000))
            .unwrap();
        let audio = writer
            .register_track(&TrackFormat::audio(OPUS_TRACK_MIME, 48_000, 1, 64_000))
            .unwrap();
        writer.start().unwrap();
        assert!(writer.write(audio, &AccessUnit::audio(opus_packet(), 0)).is_err());
        writer.release();
    }

    #[test]
    fn test_rejects_unknown_audio_codec() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::new(&dir.path().join("aac.mp4"), true);
        let format = TrackFormat::audio("audio/mp4a-latm", 44_100, 2, 128_000);
        assert!(writer.register_track(&format).is_err());
    }

    #[test]
    fn test_rejects_unknown_video_codec() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::new(&dir.path().join("vp8.mp4"), true);
        let format = TrackFormat::video("video/x-vnd.on2.vp8", 640, 480, 30, 1_000_000);
        assert!(writer.register_track(&format).is_err());
    }

    #[test]
    fn test_write_before_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::new(&dir.path().join("early.mp4"), false);
        let unit = AccessUnit::video(vec![0, 0, 0, 1, 0x65], 0, true);
        assert!(writer.write(VIDEO_TRACK, &unit).is_err());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::new(&dir.path().join("idle.mp4"), true);
        assert!(writer.stop().is_ok());
        writer.release();
    }

    #[test]
    fn test_factory_uses_fast_start_from_config() {
        let config = RecordingConfig {
            output_directory: "./out".to_string(),
            fast_start: false,
        };
        assert!(!Mp4WriterFactory::from_config(&config).fast_start);
        assert!(Mp4WriterFactory::default().fast_start);
    }

    #[test]
    fn test_start_creates_file_for_video_track() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        let factory = Mp4WriterFactory::default();
        let mut writer = factory.create(&path).unwrap();
        let track = writer
            .register_track(&TrackFormat::video("video/avc", 640, 480, 30, 1_000_000))
            .unwrap();
        assert_eq!(track, VIDEO_TRACK);
        writer.start().unwrap();
        assert!(path.exists());
        writer.release();
    }
}
