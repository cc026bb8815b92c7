//! Deterministic media for offline tests
//!
//! Frames and samples vary with their index so encoders and sinks see
//! changing content, but the same index always yields the same bytes.

use crate::types::{AccessUnit, PcmChunk, PixelFormat, VideoFrame};

/// Gradient picture whose colours shift with `pts_us`
pub fn synthetic_frame(width: u32, height: u32, format: PixelFormat, pts_us: u64) -> VideoFrame {
    let base = ((pts_us / 33_333) % 256) as u8;
    let (w, h) = (width as usize, height as usize);
    let data = match format {
        PixelFormat::Rgb24 => {
            let mut data = vec![0u8; w * h * 3];
            for y in 0..h {
                for x in 0..w {
                    let idx = (y * w + x) * 3;
                    data[idx] = base.wrapping_add((x % 256) as u8);
                    data[idx + 1] = base.wrapping_add((y % 256) as u8);
                    data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
                }
            }
            data
        }
        PixelFormat::Yuv420p => {
            let mut data = Vec::with_capacity(w * h * 3 / 2);
            for y in 0..h {
                for x in 0..w {
                    data.push(base.wrapping_add(((x + y) % 220) as u8).max(16));
                }
            }
            data.resize(w * h + w * h / 2, 128);
            data
        }
    };

    VideoFrame {
        data: data.into(),
        width,
        height,
        format,
        pts_us,
    }
}

/// RGB frame number `frame_number` at 30 fps
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> VideoFrame {
    synthetic_frame(width, height, PixelFormat::Rgb24, frame_number * 33_333)
}

/// 440 Hz tone, `samples_per_frame` samples per channel
pub fn synthetic_pcm(
    frame_number: u64,
    samples_per_frame: usize,
    sample_rate: u32,
    channels: u16,
) -> PcmChunk {
    let channels_usize = channels.max(1) as usize;
    let rate = f64::from(sample_rate.max(1));
    let mut samples = vec![0.0f32; samples_per_frame * channels_usize];

    for i in 0..samples_per_frame {
        let t = (frame_number as f64 * samples_per_frame as f64 + i as f64) / rate;
        let value = (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32 * 0.3;
        for c in 0..channels_usize {
            samples[i * channels_usize + c] = value;
        }
    }

    PcmChunk {
        samples,
        sample_rate,
        channels,
        pts_us: (frame_number * samples_per_frame as u64 * 1_000_000) / u64::from(sample_rate.max(1)),
    }
}

/// Interleaved encoded stream: `count` video units at 30 fps with a keyframe
/// every `gop` units, plus one audio unit after each video unit
pub fn synthetic_access_units(count: usize, gop: usize) -> Vec<AccessUnit> {
    let gop = gop.max(1);
    let mut units = Vec::with_capacity(count * 2);
    for i in 0..count {
        let pts = i as u64 * 33_333;
        let payload = format!("video-{}", i).into_bytes();
        units.push(AccessUnit::video(payload, pts, i % gop == 0));
        units.push(AccessUnit::audio(format!("audio-{}", i).into_bytes(), pts));
    }
    units
}
