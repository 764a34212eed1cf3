//! Per-tick envelope and fade stepping
//!
//! Envelopes are evaluated once per tick against an advancing position
//! counter. Sustain holds the position while the note is on; the loop range
//! wraps unconditionally. The pitch envelope either bends the period or, on
//! filter-flagged instruments, sweeps the cutoff. Fade-out starts when the
//! volume envelope runs out (or immediately on key-off without one) and
//! drains a 16-bit fade component at the instrument rate.

use crate::channel::{Channel, ChannelFlags};
use crate::sequencer::tables::linear_slide;
use crate::song::{Envelope, Instrument, Sample};

/// Envelope contributions for one tick
#[derive(Debug, Clone, Copy)]
pub struct EnvValues {
    /// Volume scale 0..=64
    pub volume: u32,
    /// Pan offset from the pan envelope, -32..=32
    pub pan: i32,
    /// Pitch envelope value 0..=64 (32 = neutral); `None` when inactive
    pub pitch: Option<u8>,
}

impl Default for EnvValues {
    fn default() -> Self {
        Self {
            volume: 64,
            pan: 0,
            pitch: None,
        }
    }
}

/// Advance an envelope position by one tick, honoring the loop range and,
/// while the note is held, the sustain range.
fn advance_position(env: &Envelope, pos: u32, key_off: bool) -> u32 {
    let mut pos = pos + 1;
    if let Some((ls, le)) = env.envelope_loop {
        if let (Some(&(_, _)), Some(&(end_pos, _))) =
            (env.points.get(ls as usize), env.points.get(le as usize))
        {
            if pos > end_pos as u32 {
                pos = env.points[ls as usize].0 as u32;
            }
        }
    }
    if !key_off {
        if let Some((ss, se)) = env.sustain {
            if let (Some(&(start_pos, _)), Some(&(end_pos, _))) =
                (env.points.get(ss as usize), env.points.get(se as usize))
            {
                if pos > end_pos as u32 {
                    pos = start_pos as u32;
                }
            }
        }
    }
    pos.min(env.length() + 1)
}

/// Step all three envelopes of a channel for one tick and return their
/// current values. Also drives fade start/drain.
pub fn step_envelopes(ch: &mut Channel, ins: &Instrument) -> EnvValues {
    let key_off = ch.flags.contains(ChannelFlags::KEY_OFF);
    let mut out = EnvValues::default();

    if ins.volume_env.enabled && !ins.volume_env.points.is_empty() {
        out.volume = ins.volume_env.value_at(ch.vol_env_pos) as u32;
        let past_end = ch.vol_env_pos > ins.volume_env.length();
        ch.vol_env_pos = advance_position(&ins.volume_env, ch.vol_env_pos, key_off);
        // a finished envelope hands over to the fade component
        if key_off && past_end {
            ch.start_fade();
        }
        if past_end && out.volume == 0 {
            ch.start_fade();
        }
    }

    if ins.pan_env.enabled && !ins.pan_env.points.is_empty() {
        out.pan = ins.pan_env.value_at(ch.pan_env_pos) as i32 - 32;
        ch.pan_env_pos = advance_position(&ins.pan_env, ch.pan_env_pos, key_off);
    }

    if ins.pitch_env.enabled && !ins.pitch_env.points.is_empty() {
        out.pitch = Some(ins.pitch_env.value_at(ch.pitch_env_pos));
        ch.pitch_env_pos = advance_position(&ins.pitch_env, ch.pitch_env_pos, key_off);
    }

    if ch.flags.contains(ChannelFlags::NOTE_FADE) {
        ch.fadeout = (ch.fadeout - ins.fade_out as i32 * 2).max(0);
    }
    out
}

/// Apply the pitch envelope to a period. The envelope value is centered at
/// 32; each unit bends by four linear-slide units (a quartertone).
#[inline]
pub fn pitch_env_period(period: u32, env_value: u8) -> u32 {
    linear_slide(period, (env_value as i32 - 32) * 4)
}

/// Step the sample auto-vibrato for one tick and return the period delta.
/// Depth sweeps in over `vib_sweep` ticks from the note start.
pub fn auto_vibrato(ch: &mut Channel, smp: &Sample) -> i32 {
    if smp.vib_depth == 0 {
        return 0;
    }
    let depth = if smp.vib_sweep == 0 {
        smp.vib_depth as u32
    } else {
        ch.auto_vib_sweep = (ch.auto_vib_sweep + 1).min(smp.vib_sweep as u32);
        smp.vib_depth as u32 * ch.auto_vib_sweep / smp.vib_sweep as u32
    };
    ch.auto_vib_pos = ch.auto_vib_pos.wrapping_add(smp.vib_rate as u32);
    let wave = smp.vib_type.sample(ch.auto_vib_pos >> 2, &mut ch.mod_rng);
    wave * depth as i32 / 64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::Envelope;

    fn instrument_with_vol_env(points: Vec<(u16, u8)>) -> Instrument {
        Instrument {
            volume_env: Envelope {
                points,
                enabled: true,
                ..Envelope::default()
            },
            fade_out: 1024,
            ..Instrument::default()
        }
    }

    #[test]
    fn test_envelope_position_advances_per_tick() {
        let ins = instrument_with_vol_env(vec![(0, 64), (10, 0)]);
        let mut ch = Channel::default();
        let v0 = step_envelopes(&mut ch, &ins).volume;
        let v5 = {
            for _ in 0..4 {
                step_envelopes(&mut ch, &ins);
            }
            step_envelopes(&mut ch, &ins).volume
        };
        assert_eq!(v0, 64);
        assert_eq!(v5, 64 - 5 * 64 / 10);
    }

    #[test]
    fn test_sustain_holds_until_key_off() {
        let mut ins = instrument_with_vol_env(vec![(0, 64), (4, 32), (8, 0)]);
        ins.volume_env.sustain = Some((1, 1));
        let mut ch = Channel::default();
        for _ in 0..20 {
            step_envelopes(&mut ch, &ins);
        }
        // held at the sustain point
        assert!(ch.vol_env_pos <= 4);
        ch.key_off(true);
        for _ in 0..20 {
            step_envelopes(&mut ch, &ins);
        }
        assert!(ch.vol_env_pos > 4);
    }

    #[test]
    fn test_loop_wraps_position() {
        let mut ins = instrument_with_vol_env(vec![(0, 0), (4, 64), (8, 0)]);
        ins.volume_env.envelope_loop = Some((0, 2));
        let mut ch = Channel::default();
        ch.key_off(true);
        ch.flags.remove(ChannelFlags::NOTE_FADE);
        for _ in 0..50 {
            step_envelopes(&mut ch, &ins);
        }
        assert!(ch.vol_env_pos <= 8);
    }

    #[test]
    fn test_fade_drains_after_envelope_end() {
        let ins = instrument_with_vol_env(vec![(0, 64), (2, 32)]);
        let mut ch = Channel::default();
        ch.fadeout = 65536;
        ch.key_off(true);
        for _ in 0..10 {
            step_envelopes(&mut ch, &ins);
        }
        assert!(ch.flags.contains(ChannelFlags::NOTE_FADE));
        assert!(ch.fadeout < 65536);
    }

    #[test]
    fn test_auto_vibrato_sweeps_in() {
        let mut smp = Sample::new();
        smp.vib_depth = 32;
        smp.vib_rate = 16;
        smp.vib_sweep = 64;
        let mut ch = Channel::default();
        let mut early_max = 0;
        for _ in 0..8 {
            early_max = early_max.max(auto_vibrato(&mut ch, &smp).abs());
        }
        let mut late_max = 0;
        for _ in 0..256 {
            late_max = late_max.max(auto_vibrato(&mut ch, &smp).abs());
        }
        assert!(late_max > early_max);
    }
}
