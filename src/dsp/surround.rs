//! Pro-Logic style surround encode
//!
//! A delayed, low-passed copy of the mono sum is added to the left side
//! and subtracted from the right, producing the out-of-phase rear signal a
//! matrix decoder steers to the back speakers. Listeners without a decoder
//! hear a mild widening.

use crate::config::SurroundParams;

/// Surround stage state
pub struct Surround {
    delay: Vec<i32>,
    pos: usize,
    lp: i32,
    depth: i32,
}

impl Surround {
    /// Size the rear delay line for a sample rate
    pub fn new(sample_rate: u32, params: SurroundParams) -> Self {
        let len = (params.delay_ms.clamp(5, 50) * sample_rate / 1000).max(1);
        Self {
            delay: vec![0; len as usize],
            pos: 0,
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
            let mono = ((frame[0] as i64 + frame[1] as i64) >> 1) as i32;
            let rear = self.delay[self.pos];
            self.delay[self.pos] = {
                // gentle low-pass keeps the rear image diffuse
                self.lp += (mono - self.lp) >> 1;
                self.lp
            };
            self.pos += 1;
            if self.pos >= self.delay.len() {
                self.pos = 0;
            }
            let mix = (rear as i64 * self.depth as i64 / 100) as i32 / 2;
            frame[0] = frame[0].saturating_add(mix);
            frame[1] = frame[1].saturating_sub(mix);
        }
    }
}
