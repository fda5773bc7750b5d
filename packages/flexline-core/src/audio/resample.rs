//! Linear resamplers for the audio pipelines.
//!
//! Quality requirements here are modest (communications audio, 3 kHz of
//! useful bandwidth), so first-order interpolation is plenty and keeps the
//! realtime path branch-light and allocation-free.

/// Fixed 2x upsampler with a one-sample carry between buffers.
///
/// For each input sample `s` it emits `(prev + s) / 2` followed by `s`.
/// The carry makes consecutive buffers seamless: the first interpolated
/// sample of a buffer uses the last sample of the previous one. The very
/// first invocation seeds the carry with its own first sample.
#[derive(Debug, Default)]
pub struct LinearUpsampler {
    prev: Option<f32>,
}

impl LinearUpsampler {
    /// Creates an upsampler with no carry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsamples `input` 2x, appending to `output`.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        output.reserve(input.len() * 2);
        for &sample in input {
            let prev = self.prev.unwrap_or(sample);
            output.push((prev + sample) * 0.5);
            output.push(sample);
            self.prev = Some(sample);
        }
    }

    /// Clears the carry, as on pipeline restart.
    pub fn reset(&mut self) {
        self.prev = None;
    }
}

/// Arbitrary-ratio linear resampler, used to bring host mic buffers to
/// the 24 kHz the radio expects.
///
/// Keeps a one-sample history so consecutive buffers interpolate across
/// the boundary. Output length per call is `floor` of the exact ratio;
/// the fractional remainder carries into the next call, so long-run rates
/// match exactly.
#[derive(Debug)]
pub struct LinearResampler {
    /// Input samples consumed per output sample.
    step: f64,
    /// Position of the next output on the input timeline, where -1.0 is
    /// the carried sample from the previous buffer.
    pos: f64,
    last: f32,
    primed: bool,
}

impl LinearResampler {
    /// Creates a resampler converting `source_rate` to `target_rate`.
    #[must_use]
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            step: f64::from(source_rate) / f64::from(target_rate),
            pos: 0.0,
            last: 0.0,
            primed: false,
        }
    }

    /// Resamples `input`, appending to `output`.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        if !self.primed {
            self.last = input[0];
            self.primed = true;
        }

        let len = input.len() as f64;
        while self.pos < len - 1.0 || (self.pos < len && self.pos < 0.0) {
            let floor = self.pos.floor();
            let frac = (self.pos - floor) as f32;
            let (s0, s1) = if floor < 0.0 {
                (self.last, input[0])
            } else {
                let i = floor as usize;
                if i + 1 >= input.len() {
                    break;
                }
                (input[i], input[i + 1])
            };
            output.push(s0 + (s1 - s0) * frac);
            self.pos += self.step;
        }

        // Exact-hit on the final sample (common for integer ratios).
        if (self.pos - (len - 1.0)).abs() < 1e-9 {
            output.push(input[input.len() - 1]);
            self.pos += self.step;
        }

        self.pos -= len;
        self.last = input[input.len() - 1];
    }
}
