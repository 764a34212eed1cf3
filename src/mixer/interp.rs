//! Fixed-point resampling interpolators
//!
//! Four strategies share one trait so the mixer inner loop can be
//! monomorphized per strategy instead of dispatching through a table of
//! specialized routines. The spline and FIR kernels read precomputed
//! coefficient tables built once on first use.
//!
//! All interpolators receive the guarded sample slice (see
//! `song::sample::GUARD_FRAMES`) and a frame index that is already offset
//! by the guard, so taps from `idx - 3` to `idx + 4` are always in bounds.

use std::sync::OnceLock;

/// Phase resolution of the cubic-spline table (entries per tap)
const SPLINE_PHASES: usize = 1024;
/// Phase resolution of the FIR table
const FIR_PHASES: usize = 2048;
/// FIR tap count
const FIR_TAPS: usize = 8;
/// Coefficients are stored in 14-bit fixed point
const COEF_SHIFT: i32 = 14;

/// Catmull-Rom spline coefficients, `SPLINE_PHASES` phases × 4 taps
fn spline_table() -> &'static Vec<[i16; 4]> {
    static TABLE: OnceLock<Vec<[i16; 4]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::with_capacity(SPLINE_PHASES);
        for phase in 0..SPLINE_PHASES {
            let x = phase as f64 / SPLINE_PHASES as f64;
            let x2 = x * x;
            let x3 = x2 * x;
            let c = [
                -0.5 * x3 + x2 - 0.5 * x,
                1.5 * x3 - 2.5 * x2 + 1.0,
                -1.5 * x3 + 2.0 * x2 + 0.5 * x,
                0.5 * x3 - 0.5 * x2,
            ];
            let scale = (1 << COEF_SHIFT) as f64;
            table.push([
                (c[0] * scale).round() as i16,
                (c[1] * scale).round() as i16,
                (c[2] * scale).round() as i16,
                (c[3] * scale).round() as i16,
            ]);
        }
        table
    })
}

/// Windowed-sinc low-pass kernel, `FIR_PHASES` phases × 8 taps
fn fir_table() -> &'static Vec<[i16; FIR_TAPS]> {
    static TABLE: OnceLock<Vec<[i16; FIR_TAPS]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::with_capacity(FIR_PHASES);
        for phase in 0..FIR_PHASES {
            let frac = phase as f64 / FIR_PHASES as f64;
            let mut taps = [0f64; FIR_TAPS];
            let mut sum = 0f64;
            for (t, tap) in taps.iter_mut().enumerate() {
                // tap centers at -3..=4 relative to the integer position
                let x = (t as f64 - 3.0) - frac;
                let sinc = if x.abs() < 1e-9 {
                    1.0
                } else {
                    let p = std::f64::consts::PI * x;
                    p.sin() / p
                };
                // Blackman window over the 8-tap span
                let w = 0.42
                    - 0.5 * (std::f64::consts::PI * (x + 4.0) / 4.0).cos()
                    + 0.08 * (2.0 * std::f64::consts::PI * (x + 4.0) / 4.0).cos();
                *tap = sinc * w;
                sum += *tap;
            }
            // normalize to unity gain per phase
            let scale = (1 << COEF_SHIFT) as f64 / sum;
            let mut fixed = [0i16; FIR_TAPS];
            for (f, t) in fixed.iter_mut().zip(taps.iter()) {
                *f = (t * scale).round() as i16;
            }
            table.push(fixed);
        }
        table
    })
}

/// A resampling strategy: fetch one output sample for a fractional
/// position within the guarded sample data.
pub trait Interpolator {
    /// Interpolate at `data[(idx * stride + channel)]` with fractional
    /// position `frac` (0..=0xFFFF). `stride` is the frame stride (1 mono,
    /// 2 stereo) and `channel` selects the stereo side.
    fn fetch(data: &[i16], idx: usize, frac: u16, stride: usize, channel: usize) -> i32;
}

/// Nearest-neighbour fetch
pub struct Nearest;

impl Interpolator for Nearest {
    #[inline]
    fn fetch(data: &[i16], idx: usize, _frac: u16, stride: usize, channel: usize) -> i32 {
        data[idx * stride + channel] as i32
    }
}

/// 2-tap linear interpolation
pub struct Linear;

impl Interpolator for Linear {
    #[inline]
    fn fetch(data: &[i16], idx: usize, frac: u16, stride: usize, channel: usize) -> i32 {
        let s0 = data[idx * stride + channel] as i32;
        let s1 = data[(idx + 1) * stride + channel] as i32;
        s0 + (((s1 - s0) * frac as i32) >> 16)
    }
}

/// 4-tap Catmull-Rom spline via lookup table
pub struct Spline;

impl Interpolator for Spline {
    #[inline]
    fn fetch(data: &[i16], idx: usize, frac: u16, stride: usize, channel: usize) -> i32 {
        let coefs = &spline_table()[(frac as usize * SPLINE_PHASES) >> 16];
        let base = (idx - 1) * stride + channel;
        let mut acc = 0i32;
        for (t, &c) in coefs.iter().enumerate() {
            acc += c as i32 * data[base + t * stride] as i32;
        }
        acc >> COEF_SHIFT
    }
}

/// 8-tap windowed-sinc FIR via lookup table
pub struct Fir;

impl Interpolator for Fir {
    #[inline]
    fn fetch(data: &[i16], idx: usize, frac: u16, stride: usize, channel: usize) -> i32 {
        let coefs = &fir_table()[(frac as usize * FIR_PHASES) >> 16];
        let base = (idx - 3) * stride + channel;
        let mut acc = 0i32;
        for (t, &c) in coefs.iter().enumerate() {
            acc += c as i32 * data[base + t * stride] as i32;
        }
        acc >> COEF_SHIFT
    }
}
