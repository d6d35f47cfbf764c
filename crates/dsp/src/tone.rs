use num_complex::Complex32;
use std::f32::consts::TAU;

/// Complex test tone with a fixed DC bias, normalized to full scale 1.0.
///
/// Used by the simulated front end to stand in for an RF channel: a CW
/// carrier at `freq` (cycles per sample) plus the kind of constant bias
/// a real zero-IF receiver shows at 0 Hz.
#[derive(Debug, Clone)]
pub struct Tone {
    phase: f32,
    step: f32,
    amplitude: f32,
    dc: Complex32,
}

impl Tone {
    pub fn new(freq: f32, amplitude: f32, dc: Complex32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * freq,
            amplitude,
            dc,
        }
    }

    /// Produce the next sample
    pub fn next_sample(&mut self) -> Complex32 {
        let s = Complex32::from_polar(self.amplitude, self.phase) + self.dc;
        self.phase += self.step;
        if self.phase >= TAU {
            self.phase -= TAU;
        } else if self.phase < 0.0 {
            self.phase += TAU;
        }
        s
    }

    /// Fill `out` with consecutive samples
    pub fn fill(&mut self, out: &mut [Complex32]) {
        for s in out.iter_mut() {
            *s = self.next_sample();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_mean_is_dc() {
        // 1/8 cycles per sample: exactly 8 samples per period
        let dc = Complex32::new(0.1, -0.05);
        let mut tone = Tone::new(0.125, 0.5, dc);
        let mut buf = vec![Complex32::new(0.0, 0.0); 800];
        tone.fill(&mut buf);
        let mean = buf.iter().sum::<Complex32>() / buf.len() as f32;
        assert!((mean - dc).norm() < 1e-4, "mean = {}", mean);
    }

    #[test]
    fn test_tone_amplitude() {
        let mut tone = Tone::new(0.01, 0.7, Complex32::new(0.0, 0.0));
        for _ in 0..1000 {
            let s = tone.next_sample();
            assert!((s.norm() - 0.7).abs() < 1e-4);
        }
    }
}
