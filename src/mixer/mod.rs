//! Sample-accurate mixing engine
//!
//! For each requested block the mixer walks every live voice: it computes
//! how many input frames can be advanced before a loop boundary or the
//! sample end (`sample_count_until_boundary`), runs the monomorphized inner
//! loop for that stretch (interpolation, optional filter, volume ramping,
//! stereo accumulation), then resolves the boundary: forward wrap,
//! ping-pong reflection, or voice stop with a click-suppressing decay.
//!
//! The accumulation buffer is interleaved stereo `i32` with full scale at
//! ±2^27; one voice at maximum volume (4096) exactly reaches full scale.

pub mod filter;
pub mod interp;

use crate::channel::{Channel, ChannelFlags};
use crate::config::{MixerSettings, ResamplingMode};
use crate::song::Song;
use interp::{Fir, Interpolator, Linear, Nearest, Spline};

/// Hard cap on input frames advanced per inner-loop run
pub const MAX_SAMPLE_RUN: u32 = 16384;

/// Unity channel volume (12-bit)
pub const UNITY_VOLUME: i32 = 4096;

/// Precision of the volume-ramp accumulators
pub const RAMP_SHIFT: i32 = 12;

/// Mix all voices into `buf` (interleaved stereo, `frames * 2` entries,
/// already zeroed by the caller). Voices beyond the configured polyphony
/// budget advance silently, lowest priority first.
pub fn mix_block(
    channels: &mut [Channel],
    song: &Song,
    settings: &MixerSettings,
    buf: &mut [i32],
    frames: usize,
) {
    debug_assert!(buf.len() >= frames * 2);

    // polyphony budget: pick the voices allowed to produce audio.
    // A stopped voice with a nonzero last output stays in for one more
    // pass so its decay tail can be written.
    let mut audible: Vec<usize> = (0..channels.len())
        .filter(|&i| {
            let ch = &channels[i];
            ch.is_active() || ch.last_left != 0 || ch.last_right != 0
        })
        .collect();
    if audible.len() > settings.max_mix_channels as usize {
        audible.sort_by_key(|&i| -channels[i].mix_priority());
        for &i in &audible[settings.max_mix_channels as usize..] {
            silent_advance(&mut channels[i], song, frames);
        }
        audible.truncate(settings.max_mix_channels as usize);
    }

    for &i in &audible {
        let ch = &mut channels[i];
        if ch.flags.contains(ChannelFlags::MUTE) {
            silent_advance(ch, song, frames);
            continue;
        }
        match settings.resampling {
            ResamplingMode::Nearest => mix_voice::<Nearest>(ch, song, buf, frames),
            ResamplingMode::Linear => mix_voice::<Linear>(ch, song, buf, frames),
            ResamplingMode::Spline => mix_voice::<Spline>(ch, song, buf, frames),
            ResamplingMode::Fir => mix_voice::<Fir>(ch, song, buf, frames),
        }
    }
}

/// Frames this voice can produce before hitting a boundary, honoring the
/// increment sign, capped at `MAX_SAMPLE_RUN`.
fn sample_count_until_boundary(ch: &Channel) -> u32 {
    let inc = ch.increment as i64;
    if inc == 0 {
        return 0;
    }
    let end = (ch.loop_bound_end() as i64) << 16;
    let start = (ch.loop_start as i64) << 16;
    let n = if inc > 0 {
        let avail = end - ch.position;
        if avail <= 0 {
            return 0;
        }
        (avail + inc - 1) / inc
    } else {
        let avail = ch.position - start;
        if avail < 0 {
            return 0;
        }
        avail / (-inc) + 1
    };
    n.clamp(0, MAX_SAMPLE_RUN as i64) as u32
}

impl Channel {
    /// Exclusive upper playback bound: loop end when looping, else length
    #[inline]
    fn loop_bound_end(&self) -> u32 {
        if self
            .flags
            .intersects(ChannelFlags::LOOP | ChannelFlags::PINGPONG | ChannelFlags::SUSTAIN)
            && self.loop_end > 0
        {
            self.loop_end
        } else {
            self.length
        }
    }
}

/// Resolve a boundary overrun after an inner-loop run. Returns `false`
/// when the voice stopped.
fn resolve_boundary(ch: &mut Channel) -> bool {
    let end = (ch.loop_bound_end() as i64) << 16;
    let start = (ch.loop_start as i64) << 16;

    if ch.increment > 0 && ch.position >= end {
        if ch.flags.contains(ChannelFlags::PINGPONG) {
            // reflect and flip direction exactly once
            let overshoot = ch.position - end;
            ch.position = (end - overshoot - 1).max(start);
            ch.increment = -ch.increment;
        } else if ch
            .flags
            .intersects(ChannelFlags::LOOP | ChannelFlags::SUSTAIN)
        {
            let span = end - start;
            if span <= 0 {
                ch.length = 0;
                return false;
            }
            ch.position -= span;
            while ch.position >= end {
                ch.position -= span;
            }
        } else {
            ch.length = 0;
            return false;
        }
    } else if ch.increment < 0 && ch.position < start {
        // only ping-pong plays backward
        let overshoot = start - ch.position;
        ch.position = start + overshoot;
        ch.increment = -ch.increment;
        if ch.position >= end {
            ch.position = end - 1;
        }
    }
    true
}

/// Advance a voice without producing audio (demoted by the polyphony
/// budget, or muted): position keeps moving so a later re-selection
/// resumes at the right place.
fn silent_advance(ch: &mut Channel, song: &Song, frames: usize) {
    ch.last_left = 0;
    ch.last_right = 0;
    if ch.length == 0 || ch.increment == 0 {
        ch.ramp_remaining = 0;
        return;
    }
    let Some(sample) = song.sample(ch.sample_index) else {
        ch.length = 0;
        return;
    };
    if !sample.has_data() {
        ch.length = 0;
        return;
    }
    let mut remaining = frames as u32;
    while remaining > 0 {
        let run = sample_count_until_boundary(ch).min(remaining);
        if run == 0 {
            if !resolve_boundary(ch) {
                return;
            }
            continue;
        }
        ch.position += ch.increment as i64 * run as i64;
        remaining -= run;
        if !resolve_boundary(ch) {
            return;
        }
    }
    // volumes settle instantly while inaudible
    ch.left_vol = ch.target_left;
    ch.right_vol = ch.target_right;
    ch.ramp_remaining = 0;
}

/// Mix one voice into the stereo accumulator
fn mix_voice<I: Interpolator>(ch: &mut Channel, song: &Song, buf: &mut [i32], frames: usize) {
    if ch.length == 0 || ch.increment == 0 {
        decay_fill(ch, &mut buf[..frames * 2]);
        return;
    }
    let Some(sample) = song.sample(ch.sample_index) else {
        ch.length = 0;
        return;
    };
    if !sample.has_data() {
        ch.length = 0;
        return;
    }
    let (data, guard) = sample.guarded();
    let stride = sample.channels();
    let stereo_sample = stride == 2;
    let filtered = ch.flags.contains(ChannelFlags::FILTER);
    let surround = ch.flags.contains(ChannelFlags::SURROUND);

    let mut out = 0usize;
    let mut remaining = frames as u32;
    while remaining > 0 {
        let run = sample_count_until_boundary(ch).min(remaining);
        if run == 0 {
            if !resolve_boundary(ch) {
                break;
            }
            continue;
        }

        for _ in 0..run {
            let idx = (ch.int_pos() as usize).wrapping_add(guard);
            let frac = ch.frac_pos();
            let mut left_in = I::fetch(data, idx, frac, stride, 0);
            let mut right_in = if stereo_sample {
                I::fetch(data, idx, frac, stride, 1)
            } else {
                left_in
            };

            if filtered {
                left_in = ch.filter_state.process(left_in, 0);
                if stereo_sample {
                    right_in = ch.filter_state.process(right_in, 1);
                } else {
                    right_in = left_in;
                }
            }

            // per-sample volume ramp toward the targets
            let (lv, rv) = if ch.ramp_remaining > 0 {
                ch.ramp_left += ch.ramp_delta_left;
                ch.ramp_right += ch.ramp_delta_right;
                ch.ramp_remaining -= 1;
                if ch.ramp_remaining == 0 {
                    ch.left_vol = ch.target_left;
                    ch.right_vol = ch.target_right;
                } else {
                    ch.left_vol = ch.ramp_left >> RAMP_SHIFT;
                    ch.right_vol = ch.ramp_right >> RAMP_SHIFT;
                }
                (ch.left_vol, ch.right_vol)
            } else {
                (ch.left_vol, ch.right_vol)
            };

            let l = left_in * lv;
            let r = if surround {
                -(right_in * rv)
            } else {
                right_in * rv
            };
            buf[out * 2] += l;
            buf[out * 2 + 1] += r;
            ch.last_left = l;
            ch.last_right = r;
            out += 1;

            ch.position += ch.increment as i64;
        }

        remaining -= run;
        if !resolve_boundary(ch) {
            break;
        }
    }

    // voice ended inside the block: decay the last output to avoid a click
    if ch.length == 0 && out < frames {
        decay_fill(ch, &mut buf[out * 2..frames * 2]);
    }
}

/// Exponential decay of the last mixed value into the remainder of the
/// block, killing the DC step a hard stop or note cut would leave behind.
fn decay_fill(ch: &mut Channel, buf: &mut [i32]) {
    let mut l = ch.last_left;
    let mut r = ch.last_right;
    for frame in buf.chunks_exact_mut(2) {
        l -= l >> 4;
        r -= r >> 4;
        frame[0] += l;
        frame[1] += r;
    }
    // residue below one output LSB is flushed so the voice drops out
    if l.abs() < 256 {
        l = 0;
    }
    if r.abs() < 256 {
        r = 0;
    }
    ch.last_left = l;
    ch.last_right = r;
    ch.ramp_remaining = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::sample::{Sample, SampleFlags};

    fn song_with_sample(frames: Vec<i16>, flags: SampleFlags, ls: u32, le: u32) -> Song {
        let mut song = Song::new(1);
        let mut s = Sample::new();
        s.flags = flags;
        s.loop_start = ls;
        s.loop_end = le;
        s.set_pcm(frames);
        song.samples.push(s);
        song
    }

    fn voice(song: &Song, inc: i32) -> Channel {
        let mut ch = Channel::default();
        ch.sample_index = 1;
        ch.length = song.samples[0].length;
        ch.loop_start = song.samples[0].loop_start;
        ch.loop_end = song.samples[0].loop_end;
        if song.samples[0].flags.contains(SampleFlags::LOOP) {
            ch.flags.insert(ChannelFlags::LOOP);
        }
        if song.samples[0].flags.contains(SampleFlags::PINGPONG) {
            ch.flags.insert(ChannelFlags::LOOP | ChannelFlags::PINGPONG);
        }
        ch.increment = inc;
        ch.left_vol = UNITY_VOLUME;
        ch.right_vol = UNITY_VOLUME;
        ch.target_left = UNITY_VOLUME;
        ch.target_right = UNITY_VOLUME;
        ch
    }

    #[test]
    fn test_position_advances_by_exact_increment() {
        let song = song_with_sample(vec![0; 1000], SampleFlags::empty(), 0, 0);
        let mut ch = voice(&song, 0x8000); // half-speed
        let start = ch.position;
        let mut buf = vec![0i32; 200 * 2];
        mix_voice::<Nearest>(&mut ch, &song, &mut buf, 200);
        assert_eq!(ch.position, start + 200i64 * 0x8000);
    }

    #[test]
    fn test_forward_loop_wraps_with_overshoot() {
        // loop [2, 6), inc 1.5 frames: positions 0, 1.5, 3.0, 4.5, 6.0 -> wrap to 2.0
        let song = song_with_sample(vec![0; 8], SampleFlags::LOOP, 2, 6);
        let mut ch = voice(&song, 0x18000);
        let mut buf = vec![0i32; 16 * 2];
        mix_voice::<Nearest>(&mut ch, &song, &mut buf, 5);
        // after 5 fetches the position advanced 7.5 frames, wrapped once
        assert_eq!(ch.position, (7i64 << 16) + 0x8000 - (4i64 << 16));
        assert!(ch.int_pos() >= 2 && ch.int_pos() < 6);
    }

    #[test]
    fn test_pingpong_flips_direction_once_per_boundary() {
        let song = song_with_sample(
            vec![0; 8],
            SampleFlags::LOOP | SampleFlags::PINGPONG,
            0,
            4,
        );
        let mut ch = voice(&song, 1 << 16);
        let mut buf = vec![0i32; 64 * 2];
        mix_voice::<Nearest>(&mut ch, &song, &mut buf, 3);
        assert!(ch.increment > 0);
        mix_voice::<Nearest>(&mut ch, &song, &mut buf, 2);
        // crossed the end once: now moving backward, still inside the loop
        assert!(ch.increment < 0);
        assert!(ch.int_pos() >= 0 && ch.int_pos() < 4);
        mix_voice::<Nearest>(&mut ch, &song, &mut buf, 6);
        // crossed the start: forward again
        assert!(ch.increment > 0);
        assert!(ch.int_pos() >= 0 && ch.int_pos() < 4);
    }

    #[test]
    fn test_unlooped_voice_stops_at_end() {
        let song = song_with_sample(vec![1000; 4], SampleFlags::empty(), 0, 0);
        let mut ch = voice(&song, 1 << 16);
        let mut buf = vec![0i32; 32 * 2];
        mix_voice::<Nearest>(&mut ch, &song, &mut buf, 16);
        assert_eq!(ch.length, 0);
        // the four real frames all mixed at unity
        assert_eq!(buf[0], 1000 * UNITY_VOLUME);
        assert_eq!(buf[6], 1000 * UNITY_VOLUME);
    }

    #[test]
    fn test_stop_decay_suppresses_dc_step() {
        let song = song_with_sample(vec![20_000; 4], SampleFlags::empty(), 0, 0);
        let mut ch = voice(&song, 1 << 16);
        let mut buf = vec![0i32; 64 * 2];
        mix_voice::<Nearest>(&mut ch, &song, &mut buf, 64);
        // after the sample ends the tail must decay toward zero
        let tail_start = buf[8].abs();
        let tail_end = buf[126].abs();
        assert!(tail_start > 0);
        assert!(tail_end < tail_start / 10);
    }

    #[test]
    fn test_ramp_converges_exactly_during_mix() {
        let song = song_with_sample(vec![1000; 512], SampleFlags::LOOP, 0, 512);
        let mut ch = voice(&song, 1 << 16);
        ch.left_vol = 0;
        ch.right_vol = 0;
        ch.set_volume_targets(UNITY_VOLUME, UNITY_VOLUME / 2, 64);
        let mut buf = vec![0i32; 128 * 2];
        mix_voice::<Nearest>(&mut ch, &song, &mut buf, 128);
        assert_eq!(ch.left_vol, UNITY_VOLUME);
        assert_eq!(ch.right_vol, UNITY_VOLUME / 2);
        assert_eq!(ch.ramp_remaining, 0);
        // later frames mix at the settled target volume
        assert_eq!(buf[2 * 100], 1000 * UNITY_VOLUME);
    }

    #[test]
    fn test_oversubscription_advances_silently() {
        let song = song_with_sample(vec![1000; 4096], SampleFlags::LOOP, 0, 4096);
        let mut channels = vec![voice(&song, 1 << 16), voice(&song, 1 << 16)];
        channels[1].left_vol = 10;
        channels[1].right_vol = 10;
        channels[1].target_left = 10;
        channels[1].target_right = 10;
        let mut settings = MixerSettings::default();
        settings.max_mix_channels = 1;
        let mut buf = vec![0i32; 32 * 2];
        mix_block(&mut channels, &song, &settings, &mut buf, 32);
        // the quiet voice advanced but contributed nothing
        assert_eq!(channels[1].position, 32i64 << 16);
        assert_eq!(buf[0], 1000 * UNITY_VOLUME);
    }

    #[test]
    fn test_muted_channel_contributes_nothing() {
        let song = song_with_sample(vec![1000; 64], SampleFlags::LOOP, 0, 64);
        let mut channels = vec![voice(&song, 1 << 16)];
        channels[0].flags.insert(ChannelFlags::MUTE);
        let settings = MixerSettings::default();
        let mut buf = vec![0i32; 16 * 2];
        mix_block(&mut channels, &song, &settings, &mut buf, 16);
        assert!(buf.iter().all(|&v| v == 0));
        assert_eq!(channels[0].position, 16i64 << 16);
    }
}
