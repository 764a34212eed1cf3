//! Output conversion
//!
//! The mix accumulator is interleaved stereo i32 with full scale at
//! ±0x07FF_FFFF (28 bits). Conversion clips to that range, then shifts to
//! the requested word width and writes little-endian bytes, tracking
//! running min/max per side for VU metering. Mono output averages the two
//! sides before conversion.

use crate::config::OutputFormat;

/// Full-scale accumulator bound (inclusive)
pub const MIX_CLIP: i32 = 0x07FF_FFFF;

/// Running min/max levels of converted output, in accumulator scale
#[derive(Debug, Clone, Copy, Default)]
pub struct VuMeter {
    /// Peak magnitude seen on the left/mono side
    pub left: i32,
    /// Peak magnitude seen on the right side
    pub right: i32,
}

impl VuMeter {
    /// Decay the held peaks toward zero (called once per rendered chunk)
    pub fn decay(&mut self) {
        self.left -= self.left >> 3;
        self.right -= self.right >> 3;
    }

    #[inline]
    fn track(&mut self, left: i32, right: i32) {
        self.left = self.left.max(left.abs());
        self.right = self.right.max(right.abs());
    }
}

#[inline]
fn clip(v: i32) -> i32 {
    v.clamp(-MIX_CLIP - 1, MIX_CLIP)
}

/// Convert `frames` stereo frames from the accumulator into `out` at the
/// requested width and channel count. Returns bytes written.
pub fn convert(
    mix: &[i32],
    out: &mut [u8],
    frames: usize,
    format: OutputFormat,
    output_channels: u32,
    vu: &mut VuMeter,
) -> usize {
    let mono = output_channels == 1;
    let bps = format.bytes_per_sample();
    let mut written = 0;
    for frame in 0..frames {
        let l = clip(mix[frame * 2]);
        let r = clip(mix[frame * 2 + 1]);
        vu.track(l, r);
        if mono {
            let m = ((l as i64 + r as i64) / 2) as i32;
            written += write_sample(&mut out[written..], m, format);
        } else {
            written += write_sample(&mut out[written..], l, format);
            written += write_sample(&mut out[written..], r, format);
        }
    }
    debug_assert_eq!(written, frames * bps * output_channels as usize);
    written
}

/// Write one clipped accumulator sample at the given width
#[inline]
fn write_sample(out: &mut [u8], v: i32, format: OutputFormat) -> usize {
    match format {
        OutputFormat::Bits8 => {
            // unsigned 8-bit with 128 at center
            out[0] = ((v >> 20) + 128) as u8;
            1
        }
        OutputFormat::Bits16 => {
            let s = (v >> 12) as i16;
            out[..2].copy_from_slice(&s.to_le_bytes());
            2
        }
        OutputFormat::Bits24 => {
            let s = v >> 4;
            out[..3].copy_from_slice(&s.to_le_bytes()[..3]);
            3
        }
        OutputFormat::Bits32 => {
            let s = (v as i64) << 4;
            out[..4].copy_from_slice(&(s as i32).to_le_bytes());
            4
        }
    }
}

/// Overwrite a byte range with digital silence in the output format
/// (8-bit silence is 0x80, everything else is zero)
pub fn fill_silence(out: &mut [u8], format: OutputFormat) {
    let value = match format {
        OutputFormat::Bits8 => 0x80,
        _ => 0,
    };
    out.iter_mut().for_each(|b| *b = value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_16bit_full_scale() {
        let mix = [MIX_CLIP, -MIX_CLIP - 1];
        let mut out = [0u8; 4];
        let mut vu = VuMeter::default();
        let n = convert(&mix, &mut out, 1, OutputFormat::Bits16, 2, &mut vu);
        assert_eq!(n, 4);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 0x7FFF);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), -0x8000);
    }

    #[test]
    fn test_overdrive_clips_instead_of_wrapping() {
        let mix = [i32::MAX / 2, i32::MIN / 2];
        let mut out = [0u8; 4];
        let mut vu = VuMeter::default();
        convert(&mix, &mut out, 1, OutputFormat::Bits16, 2, &mut vu);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 0x7FFF);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), -0x8000);
    }

    #[test]
    fn test_8bit_is_unsigned_centered() {
        let mix = [0, 0];
        let mut out = [0u8; 2];
        let mut vu = VuMeter::default();
        convert(&mix, &mut out, 1, OutputFormat::Bits8, 2, &mut vu);
        assert_eq!(out, [128, 128]);
    }

    #[test]
    fn test_mono_averages_sides() {
        let mix = [1 << 20, 3 << 20];
        let mut out = [0u8; 2];
        let mut vu = VuMeter::default();
        let n = convert(&mix, &mut out, 1, OutputFormat::Bits16, 1, &mut vu);
        assert_eq!(n, 2);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), ((2i32 << 20) >> 12) as i16);
    }

    #[test]
    fn test_24bit_sign_extension() {
        let mix = [-(1 << 16), 1 << 16];
        let mut out = [0u8; 6];
        let mut vu = VuMeter::default();
        convert(&mix, &mut out, 1, OutputFormat::Bits24, 2, &mut vu);
        let l = i32::from_le_bytes([out[0], out[1], out[2], 0xFF]);
        assert_eq!(l, -(1 << 12));
        let r = i32::from_le_bytes([out[3], out[4], out[5], 0]);
        assert_eq!(r, 1 << 12);
    }

    #[test]
    fn test_vu_tracks_and_decays() {
        let mix = [1 << 24, -(1 << 22)];
        let mut out = [0u8; 4];
        let mut vu = VuMeter::default();
        convert(&mix, &mut out, 1, OutputFormat::Bits16, 2, &mut vu);
        assert_eq!(vu.left, 1 << 24);
        assert_eq!(vu.right, 1 << 22);
        vu.decay();
        assert!(vu.left < 1 << 24);
    }

    #[test]
    fn test_silence_fill() {
        let mut buf8 = [1u8; 8];
        fill_silence(&mut buf8, OutputFormat::Bits8);
        assert!(buf8.iter().all(|&b| b == 0x80));
        let mut buf16 = [1u8; 8];
        fill_silence(&mut buf16, OutputFormat::Bits16);
        assert!(buf16.iter().all(|&b| b == 0));
    }
}
