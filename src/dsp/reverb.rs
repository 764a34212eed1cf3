//! Comb-filter reverb
//!
//! Four parallel comb delay lines of mutually prime-ish lengths fed from
//! the mono sum, with a shared one-pole low-pass in the feedback path so
//! the tail darkens as it decays. The wet sum is mixed back into both
//! sides at the configured depth.

use crate::config::ReverbParams;

/// Length multipliers for the four combs, in 1/32 units of the base delay
const COMB_RATIOS: [u32; 4] = [32, 37, 43, 49];

/// Feedback gain, 0..=256
const FEEDBACK: i64 = 160;

struct Comb {
    buf: Vec<i32>,
    pos: usize,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buf: vec![0; len.max(1)],
            pos: 0,
        }
    }

    /// Read the delayed sample and write the new input plus feedback
    #[inline]
    fn step(&mut self, input: i32, feedback: i32) -> i32 {
        let out = self.buf[self.pos];
        self.buf[self.pos] = input.saturating_add(feedback);
        self.pos += 1;
        if self.pos >= self.buf.len() {
            self.pos = 0;
        }
        out
    }
}

/// Reverb stage state
pub struct Reverb {
    combs: [Comb; 4],
    lp: i32,
    depth: i32,
}

impl Reverb {
    /// Size the comb delay lines for a sample rate
    pub fn new(sample_rate: u32, params: ReverbParams) -> Self {
        let base = (params.delay_ms.clamp(20, 250) * sample_rate / 1000).max(1);
        let combs = COMB_RATIOS.map(|r| Comb::new((base * r / 32) as usize));
        Self {
            combs,
            lp: 0,
            depth: params.depth.clamp(0, 100) as i32,
        }
    }

    /// Process interleaved stereo in place
    pub fn process(&mut self, buf: &mut [i32]) {
        if self.depth == 0 {
            return;
        }
        for frame in buf.chunks_exact_mut(2) {
            let dry = ((frame[0] as i64 + frame[1] as i64) >> 1) as i32;
            // darkened feedback shared by all four combs
            let feedback = ((self.lp as i64 * FEEDBACK) >> 8) as i32 / 4;
            let mut wet: i64 = 0;
            for comb in &mut self.combs {
                wet += comb.step(dry, feedback) as i64;
            }
            let wet = (wet / 4) as i32;
            self.lp += (wet - self.lp) >> 2;
            let mix = (self.lp as i64 * self.depth as i64 / 100) as i32;
            frame[0] = frame[0].saturating_add(mix);
            frame[1] = frame[1].saturating_add(mix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reverb() -> Reverb {
        Reverb::new(
            44100,
            ReverbParams {
                depth: 50,
                delay_ms: 100,
            },
        )
    }

    #[test]
    fn test_impulse_produces_delayed_tail() {
        let mut rv = reverb();
        let mut buf = vec![0i32; 2];
        buf[0] = 1 << 20;
        buf[1] = 1 << 20;
        rv.process(&mut buf);
        // the impulse comes back after the shortest comb length
        let shortest = 100 * 44100 / 1000;
        let mut tail = vec![0i32; (shortest + 256) * 2];
        rv.process(&mut tail);
        assert!(tail.iter().any(|&v| v != 0));
    }

    #[test]
    fn test_feedback_decays() {
        let mut rv = reverb();
        let mut buf = vec![0i32; 2];
        buf[0] = 1 << 24;
        buf[1] = 1 << 24;
        rv.process(&mut buf);
        let mut peak_now = i32::MAX;
        for _ in 0..40 {
            let mut block = vec![0i32; 44100];
            rv.process(&mut block);
            let peak = block.iter().map(|v| v.abs()).max().unwrap();
            if peak > 0 {
                peak_now = peak;
            }
        }
        assert!(peak_now < 1 << 24, "tail must decay, still at {peak_now}");
    }

    #[test]
    fn test_zero_depth_is_identity() {
        let mut rv = Reverb::new(
            44100,
            ReverbParams {
                depth: 0,
                delay_ms: 100,
            },
        );
        let mut buf: Vec<i32> = (0..128).map(|i| i * 777).collect();
        let orig = buf.clone();
        rv.process(&mut buf);
        assert_eq!(buf, orig);
    }
}
