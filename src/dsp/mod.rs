//! Global DSP post-processing chain
//!
//! Every stage works in place on the interleaved stereo i32 mix buffer and
//! keeps its own delay lines, sized from the sample rate on (re)configure.
//! Stages run in a fixed order (reverb, surround, bass, noise reduction);
//! each is gated by its `DspFlags` bit.

pub mod bass;
pub mod reverb;
pub mod surround;

use log::debug;

use crate::config::{DspFlags, MixerSettings};
use bass::Bass;
use reverb::Reverb;
use surround::Surround;

/// The post-mix effect chain for one player
pub struct DspChain {
    flags: DspFlags,
    reverb: Reverb,
    surround: Surround,
    bass: Bass,
    nr_last: [i32; 2],
}

impl DspChain {
    /// Build the chain and its delay lines for the given configuration
    pub fn new(settings: &MixerSettings) -> Self {
        Self {
            flags: settings.dsp,
            reverb: Reverb::new(settings.sample_rate, settings.reverb),
            surround: Surround::new(settings.sample_rate, settings.surround),
            bass: Bass::new(settings.sample_rate, settings.bass),
            nr_last: [0; 2],
        }
    }

    /// Re-size all delay lines after a configuration change. State is
    /// discarded; a configuration change is an audible edit anyway.
    pub fn reconfigure(&mut self, settings: &MixerSettings) {
        debug!("dsp reconfigure: flags {:?}", settings.dsp);
        *self = Self::new(settings);
    }

    /// Run the enabled stages over `frames` stereo frames
    pub fn process(&mut self, buf: &mut [i32], frames: usize) {
        let buf = &mut buf[..frames * 2];
        if self.flags.contains(DspFlags::REVERB) {
            self.reverb.process(buf);
        }
        if self.flags.contains(DspFlags::SURROUND) {
            self.surround.process(buf);
        }
        if self.flags.contains(DspFlags::MEGABASS) {
            self.bass.process(buf);
        }
        if self.flags.contains(DspFlags::NOISE_REDUCTION) {
            self.noise_reduction(buf);
        }
    }

    /// 2-tap averaging low-pass per side: `y[n] = (x[n] + x[n-1]) / 2`
    fn noise_reduction(&mut self, buf: &mut [i32]) {
        for frame in buf.chunks_exact_mut(2) {
            for side in 0..2 {
                let half = frame[side] >> 1;
                frame[side] = half + self.nr_last[side];
                self.nr_last[side] = half;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(flags: DspFlags) -> MixerSettings {
        MixerSettings {
            dsp: flags,
            ..MixerSettings::default()
        }
    }

    #[test]
    fn test_disabled_chain_is_identity() {
        let mut chain = DspChain::new(&settings_with(DspFlags::empty()));
        let mut buf: Vec<i32> = (0..64).map(|i| i * 1000 - 32000).collect();
        let orig = buf.clone();
        chain.process(&mut buf, 32);
        assert_eq!(buf, orig);
    }

    #[test]
    fn test_noise_reduction_smooths_alternation() {
        let mut chain = DspChain::new(&settings_with(DspFlags::NOISE_REDUCTION));
        let mut buf = Vec::new();
        for i in 0..64 {
            let v = if i % 2 == 0 { 10_000 } else { -10_000 };
            buf.push(v);
            buf.push(v);
        }
        chain.process(&mut buf, 32);
        // a Nyquist-rate square wave averages toward zero
        let peak = buf[4..].iter().map(|v| v.abs()).max().unwrap();
        assert!(peak < 1_000, "peak {peak}");
    }

    #[test]
    fn test_full_chain_stays_bounded() {
        let mut chain = DspChain::new(&settings_with(DspFlags::all()));
        let mut buf = vec![0i32; 512 * 2];
        for _ in 0..50 {
            for (i, v) in buf.iter_mut().enumerate() {
                *v = if i % 8 < 4 { 1 << 24 } else { -(1 << 24) };
            }
            chain.process(&mut buf, 512);
            assert!(buf.iter().all(|&v| v.abs() < 1 << 30));
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut chain = DspChain::new(&settings_with(DspFlags::all()));
        let mut buf = vec![0i32; 256 * 2];
        chain.process(&mut buf, 256);
        chain.process(&mut buf, 256);
        assert!(buf.iter().all(|&v| v.abs() < 4));
    }
}
