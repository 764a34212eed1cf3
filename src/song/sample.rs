//! Sample definition
//!
//! A `Sample` owns one decoded PCM buffer (always signed 16-bit internally,
//! mono or interleaved stereo) plus loop bounds, the base playback rate and
//! the default mix parameters. The PCM buffer carries guard frames on both
//! sides so that every interpolator tap stays in bounds without per-sample
//! branching; `finalize_guards` must run after the data is (re)written.

use crate::sequencer::tables::Waveform;

/// Guard frames before logical position 0 and after the last frame.
/// Eight covers the widest (8-tap FIR) interpolator window.
pub const GUARD_FRAMES: usize = 8;

bitflags::bitflags! {
    /// Sample playback flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SampleFlags: u16 {
        /// Forward loop between `loop_start` and `loop_end`
        const LOOP = 0x0001;
        /// Loop reverses direction at each boundary
        const PINGPONG = 0x0002;
        /// Sustain loop active while the note is held
        const SUSTAIN_LOOP = 0x0004;
        /// Sustain loop is ping-pong
        const SUSTAIN_PINGPONG = 0x0008;
        /// Interleaved stereo data
        const STEREO = 0x0010;
        /// Source material was 16-bit (informational; storage is always i16)
        const WAS_16BIT = 0x0020;
    }
}

/// One sample definition owned by the song
#[derive(Debug, Clone, Default)]
pub struct Sample {
    /// Display name
    pub name: String,
    /// Guarded PCM: `GUARD_FRAMES` zero frames, then `length` frames,
    /// then `GUARD_FRAMES` loop-aware pad frames (all × channel count)
    pub data: Vec<i16>,
    /// Length in frames
    pub length: u32,
    /// Loop start frame (inclusive)
    pub loop_start: u32,
    /// Loop end frame (exclusive)
    pub loop_end: u32,
    /// Sustain loop start frame (inclusive)
    pub sustain_start: u32,
    /// Sustain loop end frame (exclusive)
    pub sustain_end: u32,
    /// Playback flags
    pub flags: SampleFlags,
    /// Sample rate at the reference note, Hz
    pub c4_speed: u32,
    /// Fine tune in 1/128ths of a semitone
    pub fine_tune: i32,
    /// Semitone offset applied to incoming notes
    pub relative_note: i8,
    /// Default note volume 0..=64
    pub default_volume: u8,
    /// Sample global volume 0..=64
    pub global_volume: u8,
    /// Default panning 0..=256, `None` = keep channel pan
    pub default_pan: Option<u16>,
    /// Auto-vibrato waveform
    pub vib_type: Waveform,
    /// Auto-vibrato speed (table steps per tick)
    pub vib_rate: u8,
    /// Auto-vibrato depth
    pub vib_depth: u8,
    /// Auto-vibrato sweep-in length (ticks to full depth; 0 = instant)
    pub vib_sweep: u8,
}

impl Sample {
    /// Create an empty sample with engine defaults
    pub fn new() -> Self {
        Self {
            default_volume: 64,
            global_volume: 64,
            c4_speed: crate::sequencer::tables::BASE_C4_SPEED,
            ..Self::default()
        }
    }

    /// Channel count of the PCM data (1 or 2)
    #[inline]
    pub fn channels(&self) -> usize {
        if self.flags.contains(SampleFlags::STEREO) {
            2
        } else {
            1
        }
    }

    /// True when there is anything to play
    #[inline]
    pub fn has_data(&self) -> bool {
        self.length > 0 && !self.data.is_empty()
    }

    /// Whether any loop flag is set
    #[inline]
    pub fn is_looped(&self) -> bool {
        self.flags.contains(SampleFlags::LOOP)
    }

    /// Replace the PCM data from decoded frames (already i16, interleaved
    /// when stereo) and rebuild the guard bands.
    pub fn set_pcm(&mut self, frames: Vec<i16>) {
        let ch = self.channels();
        self.length = (frames.len() / ch) as u32;
        let guard = GUARD_FRAMES * ch;
        let mut data = Vec::with_capacity(frames.len() + 2 * guard);
        data.extend(std::iter::repeat(0).take(guard));
        data.extend(frames);
        data.extend(std::iter::repeat(0).take(guard));
        self.data = data;
        self.sanitize_loops();
        self.finalize_guards();
    }

    /// Clamp loop bounds into the sample and drop degenerate loops
    pub fn sanitize_loops(&mut self) {
        let len = self.length;
        if self.loop_end > len {
            self.loop_end = len;
        }
        if self.loop_start >= self.loop_end {
            self.flags.remove(SampleFlags::LOOP | SampleFlags::PINGPONG);
            self.loop_start = 0;
            self.loop_end = 0;
        }
        if self.sustain_end > len {
            self.sustain_end = len;
        }
        if self.sustain_start >= self.sustain_end {
            self.flags
                .remove(SampleFlags::SUSTAIN_LOOP | SampleFlags::SUSTAIN_PINGPONG);
            self.sustain_start = 0;
            self.sustain_end = 0;
        }
    }

    /// Fill the back guard with loop-aware values so interpolation across
    /// the sample end reads what playback will actually produce next.
    pub fn finalize_guards(&mut self) {
        let ch = self.channels();
        let len = self.length as usize;
        if len == 0 || self.data.len() < (len + 2 * GUARD_FRAMES) * ch {
            return;
        }
        let base = GUARD_FRAMES; // frame index of logical frame 0
        for g in 0..GUARD_FRAMES {
            let src_frame = if self.flags.contains(SampleFlags::LOOP) {
                let ls = self.loop_start as usize;
                let le = self.loop_end as usize;
                let span = le - ls;
                if self.flags.contains(SampleFlags::PINGPONG) {
                    // reflected continuation past the loop end
                    le.saturating_sub(1 + (g % span.max(1)))
                } else {
                    ls + (g % span.max(1))
                }
            } else {
                // no loop: repeat the final frame so the tail decays cleanly
                len - 1
            };
            for c in 0..ch {
                let v = self.data[(base + src_frame) * ch + c];
                self.data[(base + len + g) * ch + c] = v;
            }
        }
        // Front guard mirrors frame 0 so backward ping-pong taps are stable
        for g in 0..GUARD_FRAMES {
            for c in 0..ch {
                self.data[g * ch + c] = self.data[base * ch + c];
            }
        }
    }

    /// Raw guarded data plus the index of logical frame 0 within it
    #[inline]
    pub fn guarded(&self) -> (&[i16], usize) {
        (&self.data, GUARD_FRAMES)
    }
}
