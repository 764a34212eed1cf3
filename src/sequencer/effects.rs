//! Effect and volume-column command handlers
//!
//! Split along the tick axis: `row_effect` runs on the first tick of a row
//! (set commands, fine slides, navigation), `tick_effect` runs on every
//! later tick (coarse slides, modulation, retrigger). Effect parameters of
//! zero reuse the per-channel stored value for that effect class; nonzero
//! parameters replace it.

use super::Sequencer;
use crate::channel::ChannelFlags;
use crate::sequencer::tables::{linear_slide, Waveform};
use crate::song::note::NOTE_MAX;
use crate::song::pattern::MAX_ROWS;
use crate::song::{EffectCmd, Song, SongFlags, VolCmd};

/// Reuse-or-replace effect memory access
#[inline]
fn mem_param(param: u8, slot: &mut u8) -> u8 {
    if param != 0 {
        *slot = param;
    }
    *slot
}

/// Per-nibble memory for speed/depth pairs: each nonzero nibble replaces
/// its half of the stored value.
#[inline]
fn mem_nibbles(param: u8, slot: &mut u8) -> u8 {
    if param & 0xF0 != 0 {
        *slot = (*slot & 0x0F) | (param & 0xF0);
    }
    if param & 0x0F != 0 {
        *slot = (*slot & 0xF0) | (param & 0x0F);
    }
    *slot
}

/// Retrigger volume transform (Qxy upper nibble)
fn retrig_volume(vol: i32, modify: u8) -> i32 {
    let v = match modify {
        1 => vol - 1,
        2 => vol - 2,
        3 => vol - 4,
        4 => vol - 8,
        5 => vol - 16,
        6 => vol * 2 / 3,
        7 => vol / 2,
        9 => vol + 1,
        10 => vol + 2,
        11 => vol + 4,
        12 => vol + 8,
        13 => vol + 16,
        14 => vol * 3 / 2,
        15 => vol * 2,
        _ => vol,
    };
    v.clamp(0, 64)
}

impl Sequencer {
    // --- effect column, first tick -------------------------------------------

    pub(super) fn row_effect(&mut self, idx: usize, song: &Song) {
        let row = self.channels[idx].row;
        let param = row.param;
        match row.effect {
            EffectCmd::None => {}
            EffectCmd::Arpeggio => {
                mem_param(param, &mut self.channels[idx].memory.arpeggio);
            }
            EffectCmd::PortaUp => {
                let p = mem_param(param, &mut self.channels[idx].memory.porta_up);
                // Fxy fine / Exy extra-fine apply once, on this tick
                if p >= 0xF0 {
                    self.porta_up(idx, (p & 0x0F) as i32 * 4);
                } else if p >= 0xE0 {
                    self.porta_up(idx, (p & 0x0F) as i32);
                }
            }
            EffectCmd::PortaDown => {
                let p = mem_param(param, &mut self.channels[idx].memory.porta_down);
                if p >= 0xF0 {
                    self.porta_down(idx, (p & 0x0F) as i32 * 4);
                } else if p >= 0xE0 {
                    self.porta_down(idx, (p & 0x0F) as i32);
                }
            }
            EffectCmd::TonePorta => {
                self.tone_porta_memory(idx, song, param);
            }
            EffectCmd::Vibrato => {
                mem_nibbles(param, &mut self.channels[idx].memory.vibrato);
            }
            EffectCmd::FineVibrato => {
                mem_nibbles(param, &mut self.channels[idx].memory.vibrato);
            }
            EffectCmd::TonePortaVol | EffectCmd::VibratoVol | EffectCmd::VolumeSlide => {
                let p = mem_param(param, &mut self.channels[idx].memory.vol_slide);
                self.volume_slide_first_tick(idx, p, song);
            }
            EffectCmd::Tremolo => {
                mem_nibbles(param, &mut self.channels[idx].memory.tremolo);
            }
            EffectCmd::Panbrello => {
                mem_nibbles(param, &mut self.channels[idx].memory.panbrello);
            }
            EffectCmd::Panning8 => {
                let ch = &mut self.channels[idx];
                ch.pan = param as i32 + (param >> 7) as i32; // 0..=255 -> 0..=256
                ch.flags.remove(ChannelFlags::SURROUND);
            }
            EffectCmd::Offset => {
                let p = mem_param(param, &mut self.channels[idx].memory.offset);
                if row.note >= 1 && row.note <= NOTE_MAX {
                    let ch = &mut self.channels[idx];
                    let offset =
                        ((ch.memory.high_offset as u32) << 16) + ((p as u32) << 8);
                    let frame = if ch.length > 0 {
                        offset.min(ch.length.saturating_sub(1))
                    } else {
                        0
                    };
                    ch.position = (frame as i64) << 16;
                }
            }
            EffectCmd::PositionJump => {
                self.queued_jump = Some(param as usize);
            }
            EffectCmd::SetVolume => {
                self.channels[idx].volume = (param as i32).min(64);
            }
            EffectCmd::PatternBreak => {
                self.queued_break = Some((param as u32).min(MAX_ROWS as u32 - 1));
            }
            EffectCmd::Retrig => {
                mem_nibbles(param, &mut self.channels[idx].memory.retrig);
                self.retrig_tick(idx, song);
            }
            EffectCmd::Speed => {
                if param > 0 {
                    self.speed = param as u32;
                }
            }
            EffectCmd::Tempo => {
                if param >= 0x20 {
                    self.tempo = param as u32;
                }
            }
            EffectCmd::Tremor => {
                mem_nibbles(param, &mut self.channels[idx].memory.tremor);
            }
            EffectCmd::ModCmdEx => self.mod_cmd_ex_row(idx, param),
            EffectCmd::S3mCmdEx => self.s3m_cmd_ex_row(idx, song, param),
            EffectCmd::ChannelVolume => {
                self.channels[idx].channel_volume = (param as i32).min(64);
            }
            EffectCmd::ChannelVolSlide => {
                let p = mem_param(param, &mut self.channels[idx].memory.chan_vol_slide);
                if p & 0x0F == 0x0F && p >> 4 > 0 {
                    self.slide_channel_volume(idx, (p >> 4) as i32);
                } else if p >> 4 == 0x0F && p & 0x0F > 0 {
                    self.slide_channel_volume(idx, -((p & 0x0F) as i32));
                }
            }
            EffectCmd::GlobalVolume => {
                self.global_volume = (param as i32).min(128);
            }
            EffectCmd::GlobalVolSlide => {
                let p = mem_param(param, &mut self.channels[idx].memory.global_vol_slide);
                if p & 0x0F == 0x0F && p >> 4 > 0 {
                    self.global_volume = (self.global_volume + (p >> 4) as i32).min(128);
                } else if p >> 4 == 0x0F && p & 0x0F > 0 {
                    self.global_volume = (self.global_volume - (p & 0x0F) as i32).max(0);
                }
            }
            EffectCmd::KeyOff => {
                if param == 0 {
                    self.release_note(idx, song);
                }
            }
            EffectCmd::XFinePorta => {
                let sub = param >> 4;
                let amount = (param & 0x0F) as i32;
                match sub {
                    1 => self.porta_up(idx, amount),
                    2 => self.porta_down(idx, amount),
                    _ => {}
                }
            }
            EffectCmd::PanningSlide => {
                let p = mem_param(param, &mut self.channels[idx].memory.pan_slide);
                if p & 0x0F == 0x0F && p >> 4 > 0 {
                    self.slide_pan(idx, (p >> 4) as i32 * 4);
                } else if p >> 4 == 0x0F && p & 0x0F > 0 {
                    self.slide_pan(idx, -((p & 0x0F) as i32) * 4);
                }
            }
            EffectCmd::SetEnvPosition => {
                let ch = &mut self.channels[idx];
                ch.vol_env_pos = param as u32;
                ch.pan_env_pos = param as u32;
            }
            EffectCmd::MidiMacro => {
                let ch = &mut self.channels[idx];
                if param < 0x80 {
                    ch.cutoff = param;
                } else {
                    ch.resonance = param & 0x7F;
                }
                ch.flags.insert(ChannelFlags::FILTER);
            }
        }
    }

    // --- effect column, later ticks ------------------------------------------

    pub(super) fn tick_effect(&mut self, idx: usize, song: &Song) {
        let row = self.channels[idx].row;
        let param = row.param;
        match row.effect {
            EffectCmd::Arpeggio => self.arpeggio_tick(idx),
            EffectCmd::PortaUp => {
                let p = self.channels[idx].memory.porta_up;
                if p < 0xE0 {
                    self.porta_up(idx, p as i32 * 4);
                }
            }
            EffectCmd::PortaDown => {
                let p = self.channels[idx].memory.porta_down;
                if p < 0xE0 {
                    self.porta_down(idx, p as i32 * 4);
                }
            }
            EffectCmd::TonePorta => {
                let rate = self.tone_porta_rate(idx, song);
                self.tone_porta(idx, rate);
            }
            EffectCmd::TonePortaVol => {
                let rate = self.tone_porta_rate(idx, song);
                self.tone_porta(idx, rate);
                self.volume_slide_tick(idx);
            }
            EffectCmd::Vibrato => self.vibrato_tick(idx, false),
            EffectCmd::FineVibrato => self.vibrato_tick(idx, true),
            EffectCmd::VibratoVol => {
                self.vibrato_tick(idx, false);
                self.volume_slide_tick(idx);
            }
            EffectCmd::VolumeSlide => self.volume_slide_tick(idx),
            EffectCmd::Tremolo => self.tremolo_tick(idx),
            EffectCmd::Panbrello => self.panbrello_tick(idx),
            EffectCmd::Retrig => self.retrig_tick(idx, song),
            EffectCmd::Tempo => {
                // below 0x20 the parameter is a per-tick tempo slide
                if param < 0x10 && param > 0 {
                    self.tempo = (self.tempo - param as u32).max(32);
                } else if (0x10..0x20).contains(&param) {
                    self.tempo = (self.tempo + (param & 0x0F) as u32).min(512);
                }
            }
            EffectCmd::Tremor => self.tremor_tick(idx),
            EffectCmd::ModCmdEx => {
                if param >> 4 == 0x0C && self.tick() == (param & 0x0F) as u32 {
                    self.channels[idx].volume = 0;
                }
                if param >> 4 == 0x09 && param & 0x0F != 0 {
                    if self.tick() % (param & 0x0F) as u32 == 0 {
                        self.restart_voice(idx, song);
                    }
                }
            }
            EffectCmd::S3mCmdEx => {
                if param >> 4 == 0x0C && self.tick() == (param & 0x0F) as u32 {
                    self.channels[idx].volume = 0;
                }
            }
            EffectCmd::ChannelVolSlide => {
                let p = self.channels[idx].memory.chan_vol_slide;
                if p & 0x0F == 0 && p >> 4 > 0 {
                    self.slide_channel_volume(idx, (p >> 4) as i32);
                } else if p >> 4 == 0 && p & 0x0F > 0 {
                    self.slide_channel_volume(idx, -((p & 0x0F) as i32));
                }
            }
            EffectCmd::GlobalVolSlide => {
                let p = self.channels[idx].memory.global_vol_slide;
                if p & 0x0F == 0 && p >> 4 > 0 {
                    self.global_volume = (self.global_volume + (p >> 4) as i32).min(128);
                } else if p >> 4 == 0 && p & 0x0F > 0 {
                    self.global_volume = (self.global_volume - (p & 0x0F) as i32).max(0);
                }
            }
            EffectCmd::KeyOff => {
                if self.tick() == param as u32 {
                    self.release_note(idx, song);
                }
            }
            EffectCmd::PanningSlide => {
                let p = self.channels[idx].memory.pan_slide;
                if p & 0x0F == 0 && p >> 4 > 0 {
                    self.slide_pan(idx, (p >> 4) as i32 * 4);
                } else if p >> 4 == 0 && p & 0x0F > 0 {
                    self.slide_pan(idx, -((p & 0x0F) as i32) * 4);
                }
            }
            _ => {}
        }
    }

    // --- volume column -------------------------------------------------------

    pub(super) fn volume_column_row(&mut self, idx: usize) {
        let row = self.channels[idx].row;
        let v = row.vol;
        match row.vol_cmd {
            VolCmd::Volume => self.channels[idx].volume = (v as i32).min(64),
            VolCmd::Pan => self.channels[idx].pan = (v.min(64) as i32) * 4,
            VolCmd::FineUp => self.slide_volume(idx, v as i32),
            VolCmd::FineDown => self.slide_volume(idx, -(v as i32)),
            VolCmd::VibratoSpeed => {
                mem_nibbles(v << 4, &mut self.channels[idx].memory.vibrato);
            }
            VolCmd::VibratoDepth => {
                mem_nibbles(v & 0x0F, &mut self.channels[idx].memory.vibrato);
            }
            VolCmd::TonePorta => {
                if v > 0 {
                    self.channels[idx].memory.tone_porta = v << 4;
                }
            }
            _ => {}
        }
    }

    pub(super) fn volume_column_tick(&mut self, idx: usize) {
        let row = self.channels[idx].row;
        let v = row.vol;
        match row.vol_cmd {
            VolCmd::SlideUp => self.slide_volume(idx, v as i32),
            VolCmd::SlideDown => self.slide_volume(idx, -(v as i32)),
            VolCmd::VibratoDepth => self.vibrato_tick(idx, false),
            VolCmd::TonePorta => {
                let rate = self.channels[idx].memory.tone_porta as u32 * 4;
                self.tone_porta(idx, rate);
            }
            VolCmd::PortaUp => self.porta_up(idx, (v as i32) << 2),
            VolCmd::PortaDown => self.porta_down(idx, (v as i32) << 2),
            _ => {}
        }
    }

    // --- pitch slides --------------------------------------------------------

    /// Raise pitch by `units` (period units in Amiga mode, linear-slide
    /// units in linear mode)
    fn porta_up(&mut self, idx: usize, units: i32) {
        let ch = &mut self.channels[idx];
        if ch.period == 0 {
            return;
        }
        ch.period = if self.linear {
            linear_slide(ch.period, units)
        } else {
            ch.period.saturating_sub(units as u32).max(1)
        };
    }

    /// Lower pitch by `units`
    fn porta_down(&mut self, idx: usize, units: i32) {
        let ch = &mut self.channels[idx];
        if ch.period == 0 {
            return;
        }
        ch.period = if self.linear {
            linear_slide(ch.period, -units)
        } else {
            ch.period.saturating_add(units as u32)
        };
    }

    /// Tone-portamento memory, shared with the plain portamento slots when
    /// the song uses compatible-Gxx semantics
    fn tone_porta_memory(&mut self, idx: usize, song: &Song, param: u8) {
        if song.flags.contains(SongFlags::COMPAT_GXX) {
            mem_param(param, &mut self.channels[idx].memory.porta_up);
        } else {
            mem_param(param, &mut self.channels[idx].memory.tone_porta);
        }
    }

    fn tone_porta_rate(&self, idx: usize, song: &Song) -> u32 {
        let mem = &self.channels[idx].memory;
        let stored = if song.flags.contains(SongFlags::COMPAT_GXX) {
            mem.porta_up
        } else {
            mem.tone_porta
        };
        stored as u32 * 4
    }

    /// Move the period toward the portamento target by `rate` units
    fn tone_porta(&mut self, idx: usize, rate: u32) {
        let linear = self.linear;
        let ch = &mut self.channels[idx];
        if !ch.flags.contains(ChannelFlags::PORTAMENTO) || ch.porta_target == 0 || rate == 0 {
            return;
        }
        let target = ch.porta_target;
        if ch.period > target {
            let slid = if linear {
                linear_slide(ch.period, rate as i32)
            } else {
                ch.period.saturating_sub(rate)
            };
            ch.period = slid.max(target);
        } else if ch.period < target {
            let slid = if linear {
                linear_slide(ch.period, -(rate as i32))
            } else {
                ch.period.saturating_add(rate)
            };
            ch.period = slid.min(target);
        }
    }

    fn arpeggio_tick(&mut self, idx: usize) {
        let p = self.channels[idx].memory.arpeggio;
        let semis = match self.tick() % 3 {
            1 => (p >> 4) as i32,
            2 => (p & 0x0F) as i32,
            _ => 0,
        };
        if semis == 0 {
            return;
        }
        let ch = &mut self.channels[idx];
        let shifted = linear_slide(ch.period, semis * 16);
        ch.vib_delta += shifted as i32 - ch.period as i32;
    }

    // --- modulation ----------------------------------------------------------

    fn vibrato_tick(&mut self, idx: usize, fine: bool) {
        let halved = self.old_effects;
        let ch = &mut self.channels[idx];
        let p = ch.memory.vibrato;
        let speed = (p >> 4) as u32;
        let depth = (p & 0x0F) as i32;
        ch.vib_pos = ch.vib_pos.wrapping_add(speed);
        let wave = ch.vib_wave.sample(ch.vib_pos & 63, &mut ch.mod_rng);
        let mut delta = wave * depth / 32;
        if !fine {
            delta *= 4;
        }
        if halved {
            delta /= 2;
        }
        ch.vib_delta += delta;
    }

    fn tremolo_tick(&mut self, idx: usize) {
        let ch = &mut self.channels[idx];
        let p = ch.memory.tremolo;
        let speed = (p >> 4) as u32;
        let depth = (p & 0x0F) as i32;
        ch.trem_pos = ch.trem_pos.wrapping_add(speed);
        let wave = ch.trem_wave.sample(ch.trem_pos & 63, &mut ch.mod_rng);
        ch.trem_delta += wave * depth / 32;
    }

    fn panbrello_tick(&mut self, idx: usize) {
        let ch = &mut self.channels[idx];
        let p = ch.memory.panbrello;
        let speed = (p >> 4) as u32;
        let depth = (p & 0x0F) as i32;
        ch.pb_pos = ch.pb_pos.wrapping_add(speed);
        let wave = ch.pb_wave.sample(ch.pb_pos & 63, &mut ch.mod_rng);
        ch.pb_delta += wave * depth / 16;
    }

    /// Tremor Ixy: sound for x+1 ticks, mute for y+1 ticks
    fn tremor_tick(&mut self, idx: usize) {
        let ch = &mut self.channels[idx];
        let p = ch.memory.tremor;
        let on = (p >> 4) as u32 + 1;
        let total = on + (p & 0x0F) as u32 + 1;
        let phase = ch.tremor_count as u32 % total;
        ch.tremor_count = ((phase + 1) % total) as u8;
        if phase >= on {
            ch.flags.insert(ChannelFlags::TREMOR_MUTE);
        } else {
            ch.flags.remove(ChannelFlags::TREMOR_MUTE);
        }
    }

    /// Retrigger Qxy: restart the note every y ticks, transforming volume
    /// by the x nibble
    fn retrig_tick(&mut self, idx: usize, song: &Song) {
        let p = self.channels[idx].memory.retrig;
        let interval = (p & 0x0F) as u32;
        if interval == 0 {
            return;
        }
        let count = self.channels[idx].retrig_count as u32 + 1;
        if count >= interval {
            self.channels[idx].retrig_count = 0;
            let vol = retrig_volume(self.channels[idx].volume, p >> 4);
            self.restart_voice(idx, song);
            self.channels[idx].volume = vol;
        } else {
            self.channels[idx].retrig_count = count as u8;
        }
    }

    /// Restart the current sample from the beginning (retrigger)
    fn restart_voice(&mut self, idx: usize, song: &Song) {
        let sample_index = self.channels[idx].sample_index;
        let Some(smp) = song.sample(sample_index) else {
            return;
        };
        let ch = &mut self.channels[idx];
        ch.position = 0;
        ch.length = smp.length;
        if ch.increment < 0 {
            ch.increment = -ch.increment;
        }
        super::apply_sample_loops(ch, smp);
    }

    // --- volume slides -------------------------------------------------------

    fn slide_volume(&mut self, idx: usize, delta: i32) {
        let ch = &mut self.channels[idx];
        ch.volume = (ch.volume + delta).clamp(0, 64);
    }

    fn slide_channel_volume(&mut self, idx: usize, delta: i32) {
        let ch = &mut self.channels[idx];
        ch.channel_volume = (ch.channel_volume + delta).clamp(0, 64);
    }

    fn slide_pan(&mut self, idx: usize, delta: i32) {
        let ch = &mut self.channels[idx];
        ch.pan = (ch.pan + delta).clamp(0, 256);
    }

    /// Dxy on the first tick: fine slides (x = 0xF or y = 0xF), plus the
    /// coarse slide when the song uses fast volume slides
    fn volume_slide_first_tick(&mut self, idx: usize, p: u8, song: &Song) {
        let up = (p >> 4) as i32;
        let down = (p & 0x0F) as i32;
        if down == 0x0F && up > 0 {
            self.slide_volume(idx, up);
        } else if up == 0x0F && down > 0 {
            self.slide_volume(idx, -down);
        } else if song.flags.contains(SongFlags::FAST_VOLSLIDES) {
            self.apply_volume_slide(idx, up, down);
        }
    }

    /// Dxy on later ticks
    fn volume_slide_tick(&mut self, idx: usize) {
        let p = self.channels[idx].memory.vol_slide;
        let up = (p >> 4) as i32;
        let down = (p & 0x0F) as i32;
        if down == 0x0F || up == 0x0F {
            return; // fine slides ran on the first tick
        }
        self.apply_volume_slide(idx, up, down);
    }

    fn apply_volume_slide(&mut self, idx: usize, up: i32, down: i32) {
        if up > 0 {
            self.slide_volume(idx, up);
        } else if down > 0 {
            self.slide_volume(idx, -down);
        }
    }

    // --- extended command groups ---------------------------------------------

    /// Exy group (MOD lineage)
    fn mod_cmd_ex_row(&mut self, idx: usize, param: u8) {
        let sub = param >> 4;
        let y = param & 0x0F;
        match sub {
            0x01 => self.porta_up(idx, y as i32 * 4),
            0x02 => self.porta_down(idx, y as i32 * 4),
            0x03 => {
                let ch = &mut self.channels[idx];
                if y != 0 {
                    ch.flags.insert(ChannelFlags::GLISSANDO);
                } else {
                    ch.flags.remove(ChannelFlags::GLISSANDO);
                }
            }
            0x04 => self.channels[idx].vib_wave = Waveform::from_param(y),
            0x05 => {
                // signed MOD finetune nibble, 1/8th semitone steps
                self.channels[idx].fine_tune = ((y as i32) - ((y as i32 & 8) << 1)) * 16;
            }
            0x06 => self.pattern_loop(idx, y),
            0x07 => self.channels[idx].trem_wave = Waveform::from_param(y),
            0x08 => {
                self.channels[idx].pan = y as i32 * 17;
            }
            0x09 => {
                if y != 0 {
                    mem_nibbles(y, &mut self.channels[idx].memory.retrig);
                }
            }
            0x0A => self.slide_volume(idx, y as i32),
            0x0B => self.slide_volume(idx, -(y as i32)),
            0x0C => {
                if y == 0 {
                    self.channels[idx].volume = 0;
                }
            }
            0x0E => self.set_pattern_delay(y as u32),
            _ => {}
        }
    }

    /// Sxy group (S3M/IT lineage)
    fn s3m_cmd_ex_row(&mut self, idx: usize, song: &Song, param: u8) {
        let sub = param >> 4;
        let y = param & 0x0F;
        match sub {
            0x01 => {
                let ch = &mut self.channels[idx];
                if y != 0 {
                    ch.flags.insert(ChannelFlags::GLISSANDO);
                } else {
                    ch.flags.remove(ChannelFlags::GLISSANDO);
                }
            }
            0x02 => {
                self.channels[idx].fine_tune = ((y as i32) - ((y as i32 & 8) << 1)) * 16;
            }
            0x03 => self.channels[idx].vib_wave = Waveform::from_param(y),
            0x04 => self.channels[idx].trem_wave = Waveform::from_param(y),
            0x05 => self.channels[idx].pb_wave = Waveform::from_param(y),
            0x06 => self.add_frame_delay(y as u32),
            0x07 => self.past_note_action(idx, song, y),
            0x08 => {
                self.channels[idx].pan = y as i32 * 17;
                self.channels[idx].flags.remove(ChannelFlags::SURROUND);
            }
            0x09 => {
                let ch = &mut self.channels[idx];
                if y == 1 {
                    ch.flags.insert(ChannelFlags::SURROUND);
                    ch.pan = 128;
                } else {
                    ch.flags.remove(ChannelFlags::SURROUND);
                }
            }
            0x0A => self.channels[idx].memory.high_offset = y,
            0x0B => self.pattern_loop(idx, y),
            0x0C => {
                if y == 0 {
                    self.channels[idx].volume = 0;
                }
            }
            0x0E => self.set_pattern_delay(y as u32),
            _ => {}
        }
    }

    /// S7y: act on this channel's background (past) voices or override the
    /// new-note action for the current one
    fn past_note_action(&mut self, idx: usize, song: &Song, y: u8) {
        use crate::song::NewNoteAction;
        match y {
            0..=2 => {
                for v in 0..self.channels.len() {
                    if self.channels[v].master_channel != Some(idx)
                        || !self.channels[v].is_active()
                    {
                        continue;
                    }
                    match y {
                        0 => self.channels[v].cut(),
                        1 => {
                            let has_env = song
                                .instrument(self.channels[v].instr_index)
                                .map(|i| i.volume_env.enabled && !i.volume_env.points.is_empty())
                                .unwrap_or(false);
                            self.channels[v].key_off(has_env);
                        }
                        _ => self.channels[v].start_fade(),
                    }
                }
            }
            3 => self.channels[idx].nna = NewNoteAction::Cut,
            4 => self.channels[idx].nna = NewNoteAction::Continue,
            5 => self.channels[idx].nna = NewNoteAction::NoteOff,
            6 => self.channels[idx].nna = NewNoteAction::NoteFade,
            _ => {}
        }
    }

    /// E6y/SBy: y = 0 marks the loop start row, y > 0 jumps back y times
    fn pattern_loop(&mut self, idx: usize, y: u8) {
        let row = self.row();
        let ch = &mut self.channels[idx];
        if y == 0 {
            ch.patloop_row = row;
        } else if ch.patloop_count > 0 {
            ch.patloop_count -= 1;
            if ch.patloop_count > 0 {
                let target = ch.patloop_row;
                self.queue_pattern_loop(target);
            }
        } else {
            ch.patloop_count = y;
            let target = ch.patloop_row;
            self.queue_pattern_loop(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerSettings;
    use crate::song::{NoteEvent, Pattern, Sample, SampleFlags, Song, ORDER_END};

    fn song_with_rows(cells: Vec<NoteEvent>) -> Song {
        let mut song = Song::new(1);
        let mut smp = Sample::new();
        smp.flags = SampleFlags::LOOP;
        smp.loop_end = 1024;
        smp.set_pcm(vec![1000; 1024]);
        song.samples.push(smp);
        let mut pat = Pattern::new(cells.len().max(2), 1);
        for (r, cell) in cells.into_iter().enumerate() {
            *pat.cell_mut(r, 0).unwrap() = cell;
        }
        song.patterns.push(pat);
        song.order = vec![0, ORDER_END];
        song
    }

    fn note_cell(effect: EffectCmd, param: u8) -> NoteEvent {
        NoteEvent {
            note: 61,
            instr: 1,
            effect,
            param,
            ..NoteEvent::default()
        }
    }

    fn effect_cell(effect: EffectCmd, param: u8) -> NoteEvent {
        NoteEvent {
            effect,
            param,
            ..NoteEvent::default()
        }
    }

    fn run_rows(song: &Song, rows: u32) -> Sequencer {
        let mut seq = Sequencer::new(song, &MixerSettings::default());
        for _ in 0..rows * song.default_speed {
            seq.process_tick(song);
        }
        seq
    }

    #[test]
    fn test_effect_memory_reuses_last_parameter() {
        // porta down 8, then param 0 must keep sliding at the same rate
        let song = song_with_rows(vec![
            note_cell(EffectCmd::PortaDown, 8),
            effect_cell(EffectCmd::PortaDown, 0),
        ]);
        let seq = run_rows(&song, 1);
        let after_first = seq.channels[0].period;
        let seq = run_rows(&song, 2);
        let after_second = seq.channels[0].period;
        // 5 slide ticks per row, 8 * 4 period units each
        assert_eq!(after_second - after_first, 5 * 8 * 4);
    }

    #[test]
    fn test_volume_slide_down() {
        let song = song_with_rows(vec![note_cell(EffectCmd::VolumeSlide, 0x04)]);
        let seq = run_rows(&song, 1);
        // 64 - 5 ticks * 4
        assert_eq!(seq.channels[0].volume, 44);
    }

    #[test]
    fn test_fine_volume_slide_applies_once() {
        // DF8: fine slide down 8, first tick only
        let song = song_with_rows(vec![note_cell(EffectCmd::VolumeSlide, 0xF8)]);
        let seq = run_rows(&song, 1);
        assert_eq!(seq.channels[0].volume, 56);
    }

    #[test]
    fn test_set_speed_changes_row_length() {
        let song = song_with_rows(vec![
            note_cell(EffectCmd::Speed, 3),
            effect_cell(EffectCmd::None, 0),
        ]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        for _ in 0..3 {
            seq.process_tick(&song);
        }
        seq.process_tick(&song);
        assert_eq!(seq.row(), 1);
    }

    #[test]
    fn test_set_tempo() {
        let song = song_with_rows(vec![note_cell(EffectCmd::Tempo, 150)]);
        let seq = run_rows(&song, 1);
        assert_eq!(seq.tempo(), 150);
    }

    #[test]
    fn test_pattern_break_queues_next_row() {
        let mut song = song_with_rows(vec![
            note_cell(EffectCmd::PatternBreak, 2),
            effect_cell(EffectCmd::None, 0),
        ]);
        song.patterns.push(Pattern::new(8, 1));
        song.order = vec![0, 1, ORDER_END];
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        for _ in 0..7 {
            seq.process_tick(&song);
        }
        assert_eq!(seq.order(), 1);
        assert_eq!(seq.row(), 2);
    }

    #[test]
    fn test_note_cut_at_tick() {
        // EC2: volume drops to zero on tick 2
        let song = song_with_rows(vec![note_cell(EffectCmd::ModCmdEx, 0xC2)]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        seq.process_tick(&song);
        seq.process_tick(&song);
        assert_eq!(seq.channels[0].volume, 64);
        seq.process_tick(&song);
        assert_eq!(seq.channels[0].volume, 0);
    }

    #[test]
    fn test_note_delay_defers_trigger() {
        let song = song_with_rows(vec![note_cell(EffectCmd::ModCmdEx, 0xD3)]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        seq.process_tick(&song);
        assert_eq!(seq.channels[0].length, 0);
        seq.process_tick(&song);
        seq.process_tick(&song);
        seq.process_tick(&song);
        assert!(seq.channels[0].length > 0);
    }

    #[test]
    fn test_pattern_loop_replays_rows() {
        // row0 marks loop start, row1 loops back once: rows play 0,1,0,1
        let song = song_with_rows(vec![
            note_cell(EffectCmd::ModCmdEx, 0x60),
            effect_cell(EffectCmd::ModCmdEx, 0x61),
        ]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        let mut rows_played = Vec::new();
        for _ in 0..4 {
            seq.process_tick(&song);
            rows_played.push(seq.row());
            for _ in 0..5 {
                seq.process_tick(&song);
            }
        }
        assert_eq!(rows_played, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_vibrato_oscillates_period() {
        let song = song_with_rows(vec![note_cell(EffectCmd::Vibrato, 0x84)]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        seq.process_tick(&song);
        let base = seq.channels[0].period;
        let mut deltas = Vec::new();
        for _ in 0..5 {
            seq.process_tick(&song);
            deltas.push(seq.channels[0].vib_delta);
        }
        assert_eq!(seq.channels[0].period, base, "vibrato must not persist");
        assert!(deltas.iter().any(|&d| d != 0));
    }

    #[test]
    fn test_glissando_quantizes_tone_porta_pitch() {
        use crate::sequencer::tables::{freq_from_period, muldiv, nearest_note_period};
        // E31, then a slow slide an octave down: mid-slide the mixing
        // increment must correspond to an exact note period
        let song = song_with_rows(vec![
            note_cell(EffectCmd::ModCmdEx, 0x31),
            NoteEvent {
                note: 49,
                effect: EffectCmd::TonePorta,
                param: 2,
                ..NoteEvent::default()
            },
            effect_cell(EffectCmd::TonePorta, 0),
        ]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        for _ in 0..9 {
            seq.process_tick(&song);
        }
        let ch = &seq.channels[0];
        let snapped = nearest_note_period(ch.period, ch.fine_tune, ch.c4_speed, false);
        assert_ne!(ch.period, snapped, "slide must sit between note periods");
        let freq = freq_from_period(snapped, ch.c4_speed, 0, false);
        let expected = muldiv(freq, 1 << 16, 44100) as i32;
        assert_eq!(ch.increment, expected);
    }

    #[test]
    fn test_old_effects_halve_vibrato_depth() {
        let song = song_with_rows(vec![note_cell(EffectCmd::Vibrato, 0x88)]);
        let mut old_song = song.clone();
        old_song.flags |= SongFlags::IT_OLD_EFFECTS;
        let peak_delta = |song: &Song| {
            let mut seq = Sequencer::new(song, &MixerSettings::default());
            let mut peak = 0;
            for _ in 0..6 {
                seq.process_tick(song);
                peak = peak.max(seq.channels[0].vib_delta.abs());
            }
            peak
        };
        let new_peak = peak_delta(&song);
        let old_peak = peak_delta(&old_song);
        assert!(old_peak > 0);
        assert_eq!(new_peak, old_peak * 2);
    }

    #[test]
    fn test_tremor_gates_volume() {
        let song = song_with_rows(vec![note_cell(EffectCmd::Tremor, 0x11)]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        let mut muted_ticks = 0;
        for _ in 0..12 {
            seq.process_tick(&song);
            if seq.channels[0]
                .flags
                .contains(ChannelFlags::TREMOR_MUTE)
            {
                muted_ticks += 1;
            }
        }
        assert!(muted_ticks > 0);
        assert!(muted_ticks < 12);
    }

    #[test]
    fn test_retrig_restarts_position() {
        let song = song_with_rows(vec![note_cell(EffectCmd::Retrig, 0x02)]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        for _ in 0..6 {
            seq.process_tick(&song);
            // pretend the mixer advanced the voice
            seq.channels[0].position = 50 << 16;
        }
        // the last retrig tick must have pulled the position back
        let mut any_restart = false;
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        for _ in 0..6 {
            seq.channels[0].position = 50 << 16;
            seq.process_tick(&song);
            if seq.channels[0].position == 0 {
                any_restart = true;
            }
        }
        assert!(any_restart);
    }

    #[test]
    fn test_global_volume_scales_targets() {
        let song = song_with_rows(vec![note_cell(EffectCmd::GlobalVolume, 64)]);
        let seq = run_rows(&song, 1);
        // half global volume, center pan
        assert!(seq.channels[0].target_left <= 2048 / 2 + 32);
        assert!(seq.channels[0].target_left > 0);
    }

    #[test]
    fn test_offset_starts_mid_sample() {
        let song = song_with_rows(vec![note_cell(EffectCmd::Offset, 0x01)]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        seq.process_tick(&song);
        assert_eq!(seq.channels[0].int_pos(), 0x100);
    }

    #[test]
    fn test_filter_macro_enables_filter() {
        let song = song_with_rows(vec![note_cell(EffectCmd::MidiMacro, 0x40)]);
        let mut seq = Sequencer::new(&song, &MixerSettings::default());
        seq.process_tick(&song);
        assert!(seq.channels[0].flags.contains(ChannelFlags::FILTER));
        assert_eq!(seq.channels[0].cutoff, 0x40);
    }
}
