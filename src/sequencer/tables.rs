//! Pitch and modulation lookup tables
//!
//! Period arithmetic follows the classic tracker model: a note maps to a
//! period (larger period = lower pitch), the period maps to a playback
//! frequency in Hz, and the mixer turns that frequency into a 16.16
//! increment. Two period models exist:
//!
//! - Amiga/S3M periods: `period = 8363 * (base[n % 12] << 5) / (c4 << n/12)`
//!   so a sample's own rate (`c4_speed`) shifts the whole scale.
//! - Linear periods: `period = (base[n % 12] << 5) >> n/12` independent of
//!   `c4_speed`; slides then move pitch in equal cents per unit.

/// Base periods for one octave, highest octave, already ×16 of the Amiga
/// values (12 semitones C..B)
pub const PERIOD_TABLE: [u32; 12] = [
    1712, 1616, 1524, 1440, 1356, 1280, 1208, 1140, 1076, 1016, 960, 907,
];

/// Reference sample rate: a sample with this `c4_speed` plays untransposed
/// at its reference note
pub const BASE_C4_SPEED: u32 = 8363;

/// Number of real note values (10 octaves)
pub const NOTE_COUNT: u32 = 120;

/// Reference note index (0-based) whose frequency equals `c4_speed`
pub const REFERENCE_NOTE: u32 = 60;

/// 32-bit multiply-then-divide with 64-bit intermediate
#[inline]
pub fn muldiv(a: u32, b: u32, c: u32) -> u32 {
    if c == 0 {
        return 0;
    }
    ((a as u64 * b as u64) / c as u64) as u32
}

/// Compute the period for a note (1-based, 1 = C-0)
///
/// `fine_tune` is in 1/128ths of a semitone, `c4_speed` is the sample base
/// rate (ignored in linear mode).
pub fn period_from_note(note: u32, fine_tune: i32, c4_speed: u32, linear: bool) -> u32 {
    if note == 0 || note > NOTE_COUNT {
        return 0;
    }
    let n = note - 1;
    let base = PERIOD_TABLE[(n % 12) as usize] << 5;
    let period = if linear {
        base >> (n / 12)
    } else {
        let c4 = if c4_speed == 0 { BASE_C4_SPEED } else { c4_speed };
        muldiv(BASE_C4_SPEED, base, c4 << (n / 12))
    };
    apply_fine_tune(period, fine_tune)
}

/// Convert a period back to a playback frequency in Hz
pub fn freq_from_period(period: u32, c4_speed: u32, period_frac: u32, linear: bool) -> u32 {
    if period == 0 {
        return 0;
    }
    let scaled = (period << 8).wrapping_add(period_frac);
    if scaled == 0 {
        return 0;
    }
    if linear {
        let c4 = if c4_speed == 0 { BASE_C4_SPEED } else { c4_speed };
        muldiv(c4, 1712 << 8, scaled)
    } else {
        muldiv(BASE_C4_SPEED, 1712 << 8, scaled)
    }
}

/// Snap a period to the closest exact note period for a sample's tuning.
/// Used by glissando-mode tone portamento.
pub fn nearest_note_period(period: u32, fine_tune: i32, c4_speed: u32, linear: bool) -> u32 {
    if period == 0 {
        return 0;
    }
    let mut best = period;
    let mut best_dist = u32::MAX;
    for note in 1..=NOTE_COUNT {
        let p = period_from_note(note, fine_tune, c4_speed, linear);
        let dist = p.abs_diff(period);
        if dist < best_dist {
            best_dist = dist;
            best = p;
        }
    }
    best
}

/// Shift a period by a fine-tune amount (1/128ths of a semitone)
#[inline]
fn apply_fine_tune(period: u32, fine_tune: i32) -> u32 {
    if fine_tune == 0 || period == 0 {
        return period;
    }
    // 2^(-ft/1536) for ft in 1/128 semitone units; one semitone = 2^(1/12)
    let factor = 2f64.powf(-(fine_tune as f64) / (128.0 * 12.0));
    ((period as f64 * factor) as u32).max(1)
}

/// Slide a period by `steps` linear-slide units (1/16th semitone each).
/// Positive steps lower the period (raise pitch).
pub fn linear_slide(period: u32, steps: i32) -> u32 {
    if period == 0 || steps == 0 {
        return period;
    }
    let factor = 2f64.powf(-(steps as f64) / 192.0);
    ((period as f64 * factor).round() as u32).max(1)
}

/// Clamp limits for periods (inclusive). Matches the audible range of the
/// note table across the supported octaves.
pub const PERIOD_MIN: u32 = 54;
/// Upper period clamp
pub const PERIOD_MAX: u32 = 0x8000;

const WAVE_LEN: usize = 64;

/// Sine modulation table, 64 positions, amplitude ±64
pub static SINE_TABLE: [i8; WAVE_LEN] = [
    0, 6, 12, 19, 24, 30, 36, 41, 45, 49, 53, 56, 59, 61, 63, 64, 64, 64, 63, 61, 59, 56, 53, 49,
    45, 41, 36, 30, 24, 19, 12, 6, 0, -6, -12, -19, -24, -30, -36, -41, -45, -49, -53, -56, -59,
    -61, -63, -64, -64, -64, -63, -61, -59, -56, -53, -49, -45, -41, -36, -30, -24, -19, -12, -6,
];

/// Sawtooth (ramp-down) modulation table, amplitude ±64
pub static RAMP_TABLE: [i8; WAVE_LEN] = {
    let mut t = [0i8; WAVE_LEN];
    let mut i = 0;
    while i < WAVE_LEN {
        t[i] = (64 - (i as i32 * 2)) as i8;
        i += 1;
    }
    t
};

/// Square modulation table, amplitude ±64
pub static SQUARE_TABLE: [i8; WAVE_LEN] = {
    let mut t = [0i8; WAVE_LEN];
    let mut i = 0;
    while i < WAVE_LEN {
        t[i] = if i < WAVE_LEN / 2 { 64 } else { -64 };
        i += 1;
    }
    t
};

/// Modulation waveform selector for vibrato/tremolo/panbrello
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    /// Sine (default)
    #[default]
    Sine,
    /// Ramp down
    RampDown,
    /// Square
    Square,
    /// Pseudo-random
    Random,
}

impl Waveform {
    /// Decode the low two bits of a waveform-select parameter
    #[inline]
    pub fn from_param(value: u8) -> Self {
        match value & 0x03 {
            0 => Waveform::Sine,
            1 => Waveform::RampDown,
            2 => Waveform::Square,
            _ => Waveform::Random,
        }
    }

    /// Sample the waveform at `pos` (0..64). `rng` feeds the random
    /// waveform; the other shapes ignore it.
    #[inline]
    pub fn sample(self, pos: u32, rng: &mut u32) -> i32 {
        let idx = (pos as usize) & (WAVE_LEN - 1);
        match self {
            Waveform::Sine => SINE_TABLE[idx] as i32,
            Waveform::RampDown => RAMP_TABLE[idx] as i32,
            Waveform::Square => SQUARE_TABLE[idx] as i32,
            Waveform::Random => {
                // xorshift32, scaled to ±64
                let mut x = *rng;
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                *rng = x;
                ((x & 0x7F) as i32) - 64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_note_plays_at_c4_speed() {
        // Note index REFERENCE_NOTE (1-based REFERENCE_NOTE + 1) must come
        // out at exactly the sample's own rate.
        let period = period_from_note(REFERENCE_NOTE + 1, 0, BASE_C4_SPEED, false);
        let freq = freq_from_period(period, BASE_C4_SPEED, 0, false);
        assert_eq!(freq, BASE_C4_SPEED);
    }

    #[test]
    fn test_octave_doubles_frequency() {
        let p1 = period_from_note(49, 0, BASE_C4_SPEED, false);
        let p2 = period_from_note(61, 0, BASE_C4_SPEED, false);
        assert_eq!(p1, p2 * 2);
        let f1 = freq_from_period(p1, BASE_C4_SPEED, 0, false);
        let f2 = freq_from_period(p2, BASE_C4_SPEED, 0, false);
        assert!((f2 as i64 - 2 * f1 as i64).abs() <= 2);
    }

    #[test]
    fn test_linear_mode_ignores_c4_speed() {
        let a = period_from_note(61, 0, 8363, true);
        let b = period_from_note(61, 0, 22050, true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_linear_slide_whole_octave() {
        // 192 units = 12 semitones = half the period
        let p = 1712;
        assert_eq!(linear_slide(p, 192), 856);
        assert_eq!(linear_slide(856, -192), 1712);
    }

    #[test]
    fn test_nearest_note_period_snaps_to_table() {
        let p61 = period_from_note(61, 0, BASE_C4_SPEED, false);
        let p60 = period_from_note(60, 0, BASE_C4_SPEED, false);
        assert_eq!(nearest_note_period(p61, 0, BASE_C4_SPEED, false), p61);
        assert_eq!(nearest_note_period(p61 + 10, 0, BASE_C4_SPEED, false), p61);
        assert_eq!(nearest_note_period(p60 - 10, 0, BASE_C4_SPEED, false), p60);
    }

    #[test]
    fn test_fine_tune_direction() {
        let up = period_from_note(61, 64, BASE_C4_SPEED, false);
        let none = period_from_note(61, 0, BASE_C4_SPEED, false);
        let down = period_from_note(61, -64, BASE_C4_SPEED, false);
        assert!(up < none && none < down);
    }

    #[test]
    fn test_sine_table_symmetry() {
        for i in 0..32 {
            assert_eq!(SINE_TABLE[i] as i32, -(SINE_TABLE[i + 32] as i32));
        }
        assert_eq!(SINE_TABLE[16], 64);
    }

    #[test]
    fn test_waveform_sampling_in_range() {
        let mut rng = 0x1234_5678;
        for wf in [
            Waveform::Sine,
            Waveform::RampDown,
            Waveform::Square,
            Waveform::Random,
        ] {
            for pos in 0..128 {
                let v = wf.sample(pos, &mut rng);
                assert!((-64..=64).contains(&v), "{wf:?} at {pos} gave {v}");
            }
        }
    }
}
