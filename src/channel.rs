//! Runtime channel (voice) state
//!
//! One `Channel` is both a sequencing unit (effect memories, envelope
//! positions, pattern-loop bookkeeping) and a mixing unit (fixed-point
//! playback position, ramped stereo volumes, loop bounds, filter state).
//! The channel pool is fixed at song start: one slot per pattern channel
//! plus spare slots that new-note-action voice stealing copies voices into.
//!
//! The playback position is a signed 16.16 fixed-point frame index; the
//! increment carries the ping-pong direction in its sign.

use crate::mixer::filter::FilterState;
use crate::sequencer::tables::Waveform;
use crate::song::note::{EffectCmd, VolCmd};
use crate::song::NewNoteAction;

bitflags::bitflags! {
    /// Per-channel runtime flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelFlags: u32 {
        /// Note released (envelopes leave sustain)
        const KEY_OFF = 0x0001;
        /// Fade-out component is decaying
        const NOTE_FADE = 0x0002;
        /// Forward loop active
        const LOOP = 0x0004;
        /// Ping-pong loop active
        const PINGPONG = 0x0008;
        /// Channel muted by the host
        const MUTE = 0x0010;
        /// Surround-routed (phase-inverted right)
        const SURROUND = 0x0020;
        /// Resonant filter enabled
        const FILTER = 0x0040;
        /// A tone portamento is running this row
        const PORTAMENTO = 0x0080;
        /// Glissando: tone portamento snaps to semitones
        const GLISSANDO = 0x0100;
        /// Tremor has the note gated off right now
        const TREMOR_MUTE = 0x0200;
        /// Voice spawned by new-note-action stealing
        const BACKGROUND = 0x0400;
        /// Sustain loop currently overrides the main loop
        const SUSTAIN = 0x0800;
    }
}

/// Pending state copied from the current pattern row
#[derive(Debug, Clone, Copy, Default)]
pub struct RowState {
    /// Row note value (may be a sentinel)
    pub note: u8,
    /// Row instrument reference
    pub instr: u8,
    /// Volume column command
    pub vol_cmd: VolCmd,
    /// Volume column value
    pub vol: u8,
    /// Effect command
    pub effect: EffectCmd,
    /// Effect parameter
    pub param: u8,
}

/// Effect parameter memories. A parameter of zero reuses the stored value;
/// a nonzero parameter replaces it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectMemory {
    /// Portamento up (also extra-fine variants)
    pub porta_up: u8,
    /// Portamento down
    pub porta_down: u8,
    /// Tone portamento rate
    pub tone_porta: u8,
    /// Volume slide (shared by the combined slide commands)
    pub vol_slide: u8,
    /// Channel volume slide
    pub chan_vol_slide: u8,
    /// Global volume slide
    pub global_vol_slide: u8,
    /// Panning slide
    pub pan_slide: u8,
    /// Sample offset low byte (param * 256)
    pub offset: u8,
    /// High offset applied by SAx (65536 units)
    pub high_offset: u8,
    /// Retrigger parameter (interval + volume nibble)
    pub retrig: u8,
    /// Tremor on/off pattern
    pub tremor: u8,
    /// Arpeggio half-steps
    pub arpeggio: u8,
    /// Vibrato speed/depth nibbles
    pub vibrato: u8,
    /// Tremolo speed/depth nibbles
    pub tremolo: u8,
    /// Panbrello speed/depth nibbles
    pub panbrello: u8,
}

/// One runtime voice
#[derive(Debug, Clone, Default)]
pub struct Channel {
    // --- pattern references -------------------------------------------------
    /// Current row data (loaded at row start)
    pub row: RowState,
    /// Active sample reference (1-based; 0 = none)
    pub sample_index: u8,
    /// Active instrument reference (1-based; 0 = none)
    pub instr_index: u8,
    /// Current mapped note (1-based)
    pub note: u8,

    // --- pitch --------------------------------------------------------------
    /// Current period
    pub period: u32,
    /// Tone-portamento target period (0 = none)
    pub porta_target: u32,
    /// Sample base rate captured at trigger
    pub c4_speed: u32,
    /// Fine tune captured at trigger (1/128 semitone)
    pub fine_tune: i32,
    /// 16.16 signed playback increment; sign is the ping-pong direction
    pub increment: i32,

    // --- playback position --------------------------------------------------
    /// 16.16 signed playback position in frames
    pub position: i64,
    /// Frames remaining before the stop condition (0 = voice inactive)
    pub length: u32,
    /// Active loop start frame
    pub loop_start: u32,
    /// Active loop end frame (exclusive)
    pub loop_end: u32,

    // --- volume -------------------------------------------------------------
    /// Note volume 0..=64
    pub volume: i32,
    /// Channel master volume 0..=64
    pub channel_volume: i32,
    /// Fade component 0..=65536
    pub fadeout: i32,
    /// Pan 0..=256 (128 = center)
    pub pan: i32,
    /// Current ramped left volume (0..=4096)
    pub left_vol: i32,
    /// Current ramped right volume
    pub right_vol: i32,
    /// Target left volume after ramping
    pub target_left: i32,
    /// Target right volume
    pub target_right: i32,
    /// Ramp accumulators, volume << 12
    pub ramp_left: i32,
    /// Right ramp accumulator
    pub ramp_right: i32,
    /// Per-sample ramp deltas
    pub ramp_delta_left: i32,
    /// Right ramp delta
    pub ramp_delta_right: i32,
    /// Samples left in the active ramp (0 = volumes settled)
    pub ramp_remaining: u32,
    /// Last mixed output pair, for the stop-click decay
    pub last_left: i32,
    /// Last right output
    pub last_right: i32,

    // --- envelopes ----------------------------------------------------------
    /// Volume envelope position in ticks
    pub vol_env_pos: u32,
    /// Pan envelope position
    pub pan_env_pos: u32,
    /// Pitch/filter envelope position
    pub pitch_env_pos: u32,
    /// New-note action captured from the instrument at trigger
    pub nna: NewNoteAction,

    // --- modulation ---------------------------------------------------------
    /// Vibrato table position
    pub vib_pos: u32,
    /// Vibrato waveform
    pub vib_wave: Waveform,
    /// Tremolo table position
    pub trem_pos: u32,
    /// Tremolo waveform
    pub trem_wave: Waveform,
    /// Panbrello table position
    pub pb_pos: u32,
    /// Panbrello waveform
    pub pb_wave: Waveform,
    /// Auto-vibrato table position
    pub auto_vib_pos: u32,
    /// Auto-vibrato sweep counter (ticks since trigger)
    pub auto_vib_sweep: u32,
    /// RNG state for the random modulation waveform
    pub mod_rng: u32,

    // --- effect scratch -----------------------------------------------------
    /// Stored effect parameters
    pub memory: EffectMemory,
    /// Tremor phase counter
    pub tremor_count: u8,
    /// Retrigger tick counter
    pub retrig_count: u8,
    /// Pattern-loop start row for E60/SB0
    pub patloop_row: u32,
    /// Pattern-loop remaining iterations
    pub patloop_count: u8,
    /// Period offset currently applied by vibrato (undone next tick)
    pub vib_delta: i32,
    /// Volume offset currently applied by tremolo
    pub trem_delta: i32,
    /// Pan offset currently applied by panbrello
    pub pb_delta: i32,

    // --- filter -------------------------------------------------------------
    /// Filter cutoff 0..=127
    pub cutoff: u8,
    /// Filter resonance 0..=127
    pub resonance: u8,
    /// Biquad state (two poles per side)
    pub filter_state: FilterState,

    // --- flags & bookkeeping -------------------------------------------------
    /// Runtime flags
    pub flags: ChannelFlags,
    /// For stolen voices: pattern channel this voice came from
    pub master_channel: Option<usize>,
}

impl Channel {
    /// Initialize a channel from the song's per-channel defaults
    pub fn with_defaults(pan: u16, volume: u8, muted: bool, surround: bool) -> Self {
        let mut ch = Self {
            pan: pan as i32,
            channel_volume: volume as i32,
            volume: 64,
            mod_rng: 0x12B9_B0A1,
            ..Self::default()
        };
        if muted {
            ch.flags.insert(ChannelFlags::MUTE);
        }
        if surround {
            ch.flags.insert(ChannelFlags::SURROUND);
        }
        ch
    }

    /// Integer frame position
    #[inline]
    pub fn int_pos(&self) -> i64 {
        self.position >> 16
    }

    /// Fractional position (0..=0xFFFF)
    #[inline]
    pub fn frac_pos(&self) -> u16 {
        (self.position & 0xFFFF) as u16
    }

    /// Whether the voice still produces or ramps audio
    #[inline]
    pub fn is_active(&self) -> bool {
        self.length > 0 || self.ramp_remaining > 0
    }

    /// Combined mix priority used when voices are oversubscribed
    #[inline]
    pub fn mix_priority(&self) -> i32 {
        (self.left_vol + self.right_vol).max(self.target_left + self.target_right)
    }

    /// Stop the voice immediately (note cut); ramping handles the click
    pub fn cut(&mut self) {
        self.length = 0;
        self.increment = 0;
        self.fadeout = 0;
        self.volume = 0;
        self.set_volume_targets(0, 0, 1);
    }

    /// Release the note: envelopes leave sustain. Without a volume envelope
    /// there is no release shape, so the fade component drops to zero and
    /// the voice dies on the next parameter update.
    pub fn key_off(&mut self, has_volume_env: bool) {
        self.flags.insert(ChannelFlags::KEY_OFF);
        self.flags.remove(ChannelFlags::SUSTAIN);
        if !has_volume_env {
            self.flags.insert(ChannelFlags::NOTE_FADE);
            self.fadeout = 0;
        }
    }

    /// Begin fading the voice at the instrument rate
    pub fn start_fade(&mut self) {
        self.flags.insert(ChannelFlags::NOTE_FADE);
    }

    /// Set new target volumes and start a ramp of `ramp_len` samples.
    /// A `ramp_len` of 1 jumps immediately.
    pub fn set_volume_targets(&mut self, left: i32, right: i32, ramp_len: u32) {
        self.target_left = left;
        self.target_right = right;
        if ramp_len <= 1 || (left == self.left_vol && right == self.right_vol) {
            self.left_vol = left;
            self.right_vol = right;
            self.ramp_remaining = 0;
            return;
        }
        self.ramp_left = self.left_vol << 12;
        self.ramp_right = self.right_vol << 12;
        self.ramp_delta_left = ((left - self.left_vol) << 12) / ramp_len as i32;
        self.ramp_delta_right = ((right - self.right_vol) << 12) / ramp_len as i32;
        self.ramp_remaining = ramp_len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_split() {
        let mut ch = Channel::default();
        ch.position = (5i64 << 16) | 0x8000;
        assert_eq!(ch.int_pos(), 5);
        assert_eq!(ch.frac_pos(), 0x8000);
    }

    #[test]
    fn test_ramp_lands_exactly_on_target() {
        let mut ch = Channel::default();
        ch.left_vol = 0;
        ch.right_vol = 0;
        let ramp_len = 64;
        ch.set_volume_targets(4096, 1000, ramp_len);
        for _ in 0..ramp_len {
            ch.ramp_left += ch.ramp_delta_left;
            ch.ramp_right += ch.ramp_delta_right;
            ch.ramp_remaining -= 1;
            if ch.ramp_remaining == 0 {
                ch.left_vol = ch.target_left;
                ch.right_vol = ch.target_right;
            } else {
                ch.left_vol = ch.ramp_left >> 12;
                ch.right_vol = ch.ramp_right >> 12;
            }
        }
        assert_eq!(ch.left_vol, 4096);
        assert_eq!(ch.right_vol, 1000);
    }

    #[test]
    fn test_equal_targets_skip_ramping() {
        let mut ch = Channel::default();
        ch.left_vol = 100;
        ch.right_vol = 100;
        ch.set_volume_targets(100, 100, 64);
        assert_eq!(ch.ramp_remaining, 0);
    }

    #[test]
    fn test_cut_silences_voice() {
        let mut ch = Channel::default();
        ch.length = 1000;
        ch.left_vol = 500;
        ch.cut();
        assert!(!ch.is_active() || ch.ramp_remaining > 0);
        assert_eq!(ch.length, 0);
        assert_eq!(ch.target_left, 0);
    }
}
