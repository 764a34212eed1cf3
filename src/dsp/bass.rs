//! Bass expansion
//!
//! A one-pole low-pass sidechain isolates the band below `range_hz`; the
//! dry signal runs through a short delay line so it stays aligned with the
//! sidechain's group delay before the boosted low band is added back.

use crate::config::BassParams;

/// Dry-path alignment delay in frames
const ALIGN_FRAMES: usize = 8;

/// Bass expansion stage state
pub struct Bass {
    delay: [[i32; 2]; ALIGN_FRAMES],
    pos: usize,
    lp: [i64; 2],
    /// One-pole coefficient, 0..=256
    coef: i64,
    depth: i32,
}

impl Bass {
    /// Derive the sidechain coefficient from the corner frequency
    pub fn new(sample_rate: u32, params: BassParams) -> Self {
        let range = params.range_hz.clamp(10, 500) as u64;
        // 2*pi*fc/fs in 8-bit fixed point
        let coef = (range * 1608 / sample_rate as u64).clamp(1, 255) as i64;
        Self {
            delay: [[0; 2]; ALIGN_FRAMES],
            pos: 0,
            lp: [0; 2],
            coef,
            depth: params.depth.clamp(0, 100) as i32,
        }
    }

    /// Process interleaved stereo in place
    pub fn process(&mut self, buf: &mut [i32]) {
        if self.depth == 0 {
            return;
        }
        for frame in buf.chunks_exact_mut(2) {
            for side in 0..2 {
                let input = frame[side];
                self.lp[side] += ((input as i64 - self.lp[side]) * self.coef) >> 8;
                let boost = (self.lp[side] * self.depth as i64 / 100) as i32;
                let dry = self.delay[self.pos][side];
                self.delay[self.pos][side] = input;
                frame[side] = dry.saturating_add(boost);
            }
            self.pos = (self.pos + 1) % ALIGN_FRAMES;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bass() -> Bass {
        Bass::new(
            44100,
            BassParams {
                depth: 100,
                range_hz: 50,
            },
        )
    }

    #[test]
    fn test_dc_is_boosted() {
        let mut bx = bass();
        let mut buf = vec![1 << 16; 44100 * 2];
        bx.process(&mut buf);
        // once the sidechain settles, DC comes out amplified
        let tail = buf[buf.len() - 2];
        assert!(tail > (1 << 16) + (1 << 15), "got {tail}");
    }

    #[test]
    fn test_high_frequency_passes_mostly_dry() {
        let mut bx = bass();
        let mut buf = Vec::with_capacity(44100 * 2);
        for i in 0..44100 {
            let v = if i % 2 == 0 { 1 << 16 } else { -(1 << 16) };
            buf.push(v);
            buf.push(v);
        }
        bx.process(&mut buf);
        let peak = buf[2000..].iter().map(|v| v.abs()).max().unwrap();
        assert!(peak < (1 << 16) + (1 << 13), "got {peak}");
    }

    #[test]
    fn test_zero_depth_is_identity() {
        let mut bx = Bass::new(
            44100,
            BassParams {
                depth: 0,
                range_hz: 50,
            },
        );
        let mut buf: Vec<i32> = (0..64).map(|i| i * 999 - 20000).collect();
        let orig = buf.clone();
        bx.process(&mut buf);
        assert_eq!(buf, orig);
    }
}
