//! Streaming linear resampler for interleaved PCM

/// Converts interleaved `f32` PCM between sample rates across chunk
/// boundaries. Interpolation is linear; quality is adequate for voice and
/// for the 44.1 kHz to 48 kHz step ahead of Opus.
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Input frames per output frame
    step: f64,
    /// Read position in frames, relative to the start of `pending`
    position: f64,
    /// Input not yet fully consumed, starting at the frame before `position`
    pending: Vec<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        let from_rate = from_rate.max(1);
        let to_rate = to_rate.max(1);
        Self {
            from_rate,
            to_rate,
            channels: usize::from(channels.max(1)),
            step: f64::from(from_rate) / f64::from(to_rate),
            position: 0.0,
            pending: Vec::new(),
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    /// Feed interleaved samples, returning whatever output is now complete
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate {
            return samples.to_vec();
        }
        let channels = self.channels;
        self.pending.extend_from_slice(samples);
        let frames = self.pending.len() / channels;

        let estimate = ((frames as f64 - self.position) / self.step).ceil().max(0.0) as usize;
        let mut out = Vec::with_capacity(estimate * channels);

        // Interpolation needs the frame after `position` to be buffered
        while self.position + 1.0 < frames as f64 {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let current = &self.pending[index * channels..(index + 1) * channels];
            let next = &self.pending[(index + 1) * channels..(index + 2) * channels];
            out.extend(
                current
                    .iter()
                    .zip(next)
                    .map(|(a, b)| a + (b - a) * frac),
            );
            self.position += self.step;
        }

        let consumed = (self.position as usize).min(frames);
        self.pending.drain(..consumed * channels);
        self.position -= consumed as f64;
        out
    }

    /// Forget buffered input, as after a capture restart
    pub fn reset(&mut self) {
        self.pending.clear();
        self.position = 0.0;
    }
}
