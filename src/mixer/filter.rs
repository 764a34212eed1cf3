//! Per-channel resonant low-pass filter
//!
//! State-variable 2-pole low-pass driven by the classic cutoff (0..=127)
//! and resonance (0..=127) parameters. Coefficients are recomputed only
//! when a parameter or the sample rate changes; the per-sample path is two
//! multiply-adds per side.

/// Runtime filter state for one channel (stereo pair of 2-pole filters)
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterState {
    /// Frequency coefficient (0..2, from cutoff)
    pub f: f32,
    /// Damping coefficient (0..2, from resonance)
    pub q: f32,
    low: [f32; 2],
    band: [f32; 2],
}

impl FilterState {
    /// Recompute coefficients from cutoff/resonance at a sample rate.
    /// Cutoff maps exponentially over roughly 130 Hz .. 8 kHz.
    pub fn setup(&mut self, cutoff: u8, resonance: u8, sample_rate: u32) {
        let cutoff_hz = 110.0 * 2f32.powf(0.25 + cutoff as f32 / 21.0);
        let limit = sample_rate as f32 * 0.45;
        let fc = cutoff_hz.min(limit);
        self.f = 2.0 * (std::f32::consts::PI * fc / sample_rate as f32).sin();
        // resonance 0 -> strong damping, 127 -> near self-oscillation
        self.q = (1.4 - resonance as f32 / 96.0).clamp(0.05, 1.4);
    }

    /// Reset the pole history (new note)
    pub fn reset(&mut self) {
        self.low = [0.0; 2];
        self.band = [0.0; 2];
    }

    /// Process one sample on side 0 (left/mono) or 1 (right)
    #[inline]
    pub fn process(&mut self, input: i32, side: usize) -> i32 {
        let x = input as f32;
        self.low[side] += self.f * self.band[side];
        let high = x - self.low[side] - self.q * self.band[side];
        self.band[side] += self.f * high;
        self.low[side] as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_passes_through() {
        let mut f = FilterState::default();
        f.setup(127, 0, 44100);
        let mut y = 0;
        for _ in 0..2000 {
            y = f.process(10_000, 0);
        }
        assert!((y - 10_000).abs() < 500, "settled at {y}");
    }

    #[test]
    fn test_low_cutoff_attenuates_alternating_signal() {
        let mut f = FilterState::default();
        f.setup(10, 0, 44100);
        let mut peak = 0i32;
        let mut x = 10_000;
        for _ in 0..2000 {
            let y = f.process(x, 0);
            peak = peak.max(y.abs());
            x = -x;
        }
        assert!(
            peak < 2_000,
            "Nyquist tone should be heavily attenuated, peak {peak}"
        );
    }

    #[test]
    fn test_sides_are_independent() {
        let mut f = FilterState::default();
        f.setup(60, 30, 44100);
        for _ in 0..100 {
            f.process(5_000, 0);
        }
        assert_eq!(f.process(0, 1), 0);
    }

    #[test]
    fn test_cutoff_clamped_below_nyquist() {
        let mut f = FilterState::default();
        f.setup(127, 0, 8000);
        assert!(f.f.is_finite());
        assert!(f.f > 0.0);
    }
}
