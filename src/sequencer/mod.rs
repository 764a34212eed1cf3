//! Tick and row sequencing
//!
//! The sequencer is a state machine over (order, row, tick). Each call to
//! `process_tick` advances exactly one tick: tick 0 of a row loads the
//! row's cells, evaluates new-note actions and triggers notes; later ticks
//! run the repeating half of every effect. After the effects, every live
//! voice gets its mixing parameters (increment, ramped stereo volumes,
//! filter coefficients) recomputed from the current period, envelopes and
//! fade state.
//!
//! Pattern navigation commands queued during a row (break, jump, loop) are
//! resolved when the row's tick budget runs out. A per-(order, row) visited
//! bitmap defends against non-progressing backward jumps: revisiting a row
//! consumes one repeat credit or ends the song, so playback never hangs.

pub mod effects;
pub mod envelope;
pub mod tables;

use log::debug;

use crate::channel::{Channel, ChannelFlags, RowState};
use crate::config::MixerSettings;
use crate::sequencer::envelope::{auto_vibrato, pitch_env_period, step_envelopes, EnvValues};
use crate::sequencer::tables::{
    freq_from_period, muldiv, nearest_note_period, period_from_note, PERIOD_MAX, PERIOD_MIN,
};
use crate::song::note::{NOTE_CUT, NOTE_FADE, NOTE_KEYOFF, NOTE_MAX};
use crate::song::pattern::MAX_ROWS;
use crate::song::{
    DuplicateAction, DuplicateCheck, EffectCmd, NewNoteAction, Sample, Song, SongFlags, VolCmd,
    MAX_ORDERS, MAX_VOICES, ORDER_END, ORDER_SKIP,
};

/// Amiga-limit period clamp (four times the classic ProTracker bounds)
const AMIGA_PERIOD_MIN: u32 = 452;
const AMIGA_PERIOD_MAX: u32 = 3424;

/// Unity fade component
const FADE_FULL: i32 = 65536;

/// The playback state machine for one song
pub struct Sequencer {
    /// Voice pool: one slot per pattern channel, the rest for stolen voices
    pub channels: Vec<Channel>,
    pattern_channels: usize,

    cur_order: usize,
    cur_pattern: usize,
    cur_row: u32,
    tick: u32,
    ticks_per_row: u32,
    next_order: usize,
    next_row: u32,

    speed: u32,
    tempo: u32,
    global_volume: i32,
    pattern_delay: u32,
    frame_delay: u32,

    queued_jump: Option<usize>,
    queued_break: Option<u32>,
    patloop_jump: Option<u32>,

    visited: Vec<u64>,
    repeats_left: u32,
    ended: bool,

    ticks_elapsed: u64,
    elapsed_us: u64,

    // cached mix configuration
    linear: bool,
    old_effects: bool,
    sample_rate: u32,
    ramp_length: u32,
    master_volume: i32,
}

impl Sequencer {
    /// Build the voice pool and transport state for a song
    pub fn new(song: &Song, settings: &MixerSettings) -> Self {
        let mut seq = Self {
            channels: Vec::new(),
            pattern_channels: song.channels,
            cur_order: 0,
            cur_pattern: 0,
            cur_row: 0,
            tick: 0,
            ticks_per_row: song.default_speed,
            next_order: 0,
            next_row: 0,
            speed: song.default_speed,
            tempo: song.default_tempo,
            global_volume: song.default_global_volume as i32,
            pattern_delay: 0,
            frame_delay: 0,
            queued_jump: None,
            queued_break: None,
            patloop_jump: None,
            visited: vec![0; MAX_ORDERS * MAX_ROWS / 64],
            repeats_left: 0,
            ended: false,
            ticks_elapsed: 0,
            elapsed_us: 0,
            linear: song.flags.contains(SongFlags::LINEAR_SLIDES),
            old_effects: song.flags.contains(SongFlags::IT_OLD_EFFECTS),
            sample_rate: settings.sample_rate,
            ramp_length: settings.ramp_length(),
            master_volume: settings.master_volume as i32,
        };
        seq.reset(song, settings);
        seq
    }

    /// Rewind to the song start and rebuild all voices
    pub fn reset(&mut self, song: &Song, settings: &MixerSettings) {
        self.channels.clear();
        for defaults in &song.channel_defaults {
            self.channels.push(Channel::with_defaults(
                defaults.pan,
                defaults.volume,
                defaults.muted,
                defaults.surround,
            ));
        }
        self.channels.resize_with(MAX_VOICES, Channel::default);
        self.pattern_channels = song.channels;
        self.cur_order = 0;
        self.cur_row = 0;
        self.tick = 0;
        self.next_order = 0;
        self.next_row = 0;
        self.speed = song.default_speed;
        self.tempo = song.default_tempo;
        self.ticks_per_row = self.speed;
        self.global_volume = song.default_global_volume as i32;
        self.pattern_delay = 0;
        self.frame_delay = 0;
        self.queued_jump = None;
        self.queued_break = None;
        self.patloop_jump = None;
        self.visited.iter_mut().for_each(|w| *w = 0);
        self.ended = false;
        self.ticks_elapsed = 0;
        self.elapsed_us = 0;
        self.linear = song.flags.contains(SongFlags::LINEAR_SLIDES);
        self.old_effects = song.flags.contains(SongFlags::IT_OLD_EFFECTS);
        self.sample_rate = settings.sample_rate;
        self.ramp_length = settings.ramp_length();
        self.master_volume = settings.master_volume as i32;
    }

    /// How many backward loops (song restarts) remain honored
    pub fn set_repeat_count(&mut self, n: u32) {
        self.repeats_left = n;
    }

    /// Update the master volume without interrupting playback
    pub fn set_master_volume(&mut self, volume: u32) {
        self.master_volume = volume.min(512) as i32;
    }

    /// Whether playback has reached the end of the song
    #[inline]
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Current order-list position
    #[inline]
    pub fn order(&self) -> usize {
        self.cur_order
    }

    /// Current pattern row
    #[inline]
    pub fn row(&self) -> u32 {
        self.cur_row
    }

    /// Current ticks per row
    #[inline]
    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// Current tempo in BPM
    #[inline]
    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    /// Current global volume 0..=128
    #[inline]
    pub fn global_volume(&self) -> i32 {
        self.global_volume
    }

    /// Tick within the current row (0 = row start)
    #[inline]
    fn tick(&self) -> u32 {
        self.tick
    }

    /// Queue a pattern-loop jump back to `row` of the current order
    fn queue_pattern_loop(&mut self, row: u32) {
        self.patloop_jump = Some(row);
    }

    /// EEy/SEy: repeat the current row `rows` extra times. Only the first
    /// such command on a row counts.
    fn set_pattern_delay(&mut self, rows: u32) {
        if self.pattern_delay == 0 {
            self.pattern_delay = rows;
        }
    }

    /// S6y: extend the current row by extra ticks
    fn add_frame_delay(&mut self, ticks: u32) {
        self.frame_delay += ticks;
    }

    /// Music time elapsed, in milliseconds (`2500 * ticks / tempo` summed
    /// across tempo changes)
    #[inline]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_us / 1000
    }

    /// Total ticks processed
    #[inline]
    pub fn ticks_elapsed(&self) -> u64 {
        self.ticks_elapsed
    }

    /// Output frames covered by one tick at the current tempo
    #[inline]
    pub fn samples_per_tick(&self) -> u32 {
        // rate * 2.5 / tempo
        (self.sample_rate as u64 * 5 / (self.tempo as u64 * 2)).max(1) as u32
    }

    /// Advance playback by exactly one tick. Returns `false` once the song
    /// has ended.
    pub fn process_tick(&mut self, song: &Song) -> bool {
        if self.ended {
            return false;
        }
        if self.tick == 0 {
            if !self.start_row(song) {
                self.ended = true;
                return false;
            }
            for idx in 0..self.pattern_channels.min(self.channels.len()) {
                self.process_row_channel(idx, song);
            }
            self.ticks_per_row = self.speed * (1 + self.pattern_delay) + self.frame_delay;
        } else {
            for idx in 0..self.pattern_channels.min(self.channels.len()) {
                self.process_tick_channel(idx, song);
            }
        }
        for idx in 0..self.channels.len() {
            self.update_channel(idx, song);
        }
        self.tick += 1;
        self.ticks_elapsed += 1;
        self.elapsed_us += 2_500_000 / self.tempo as u64;
        if self.tick >= self.ticks_per_row {
            self.tick = 0;
            self.apply_queued_navigation();
        }
        true
    }

    // --- row navigation -----------------------------------------------------

    /// Resolve the next (order, row) into the current position and load the
    /// row's cells. Returns `false` at the song end.
    fn start_row(&mut self, song: &Song) -> bool {
        let pattern_idx = loop {
            if self.next_order >= song.order.len() {
                if !self.consume_repeat(song) {
                    return false;
                }
                continue;
            }
            match song.order[self.next_order] {
                ORDER_END => {
                    if !self.consume_repeat(song) {
                        return false;
                    }
                }
                ORDER_SKIP => {
                    self.next_order += 1;
                    self.next_row = 0;
                }
                pat if (pat as usize) < song.patterns.len() => break pat as usize,
                _ => {
                    self.next_order += 1;
                    self.next_row = 0;
                }
            }
        };
        let rows = song.patterns[pattern_idx].rows() as u32;
        if self.next_row >= rows {
            self.next_row = 0;
        }

        // backward-jump defense: revisiting a row means no forward progress
        let bit = self.next_order * MAX_ROWS + self.next_row as usize;
        if self.visited[bit / 64] & (1 << (bit % 64)) != 0 {
            if self.repeats_left == 0 {
                debug!(
                    "non-progressing jump to order {} row {}, ending",
                    self.next_order, self.next_row
                );
                return false;
            }
            self.repeats_left -= 1;
            self.visited.iter_mut().for_each(|w| *w = 0);
        }
        self.visited[bit / 64] |= 1 << (bit % 64);

        self.cur_order = self.next_order;
        self.cur_pattern = pattern_idx;
        self.cur_row = self.next_row;
        self.next_row = self.cur_row + 1;
        if self.next_row >= rows {
            self.next_row = 0;
            self.next_order = self.cur_order + 1;
        }
        self.pattern_delay = 0;
        self.frame_delay = 0;

        let pattern = &song.patterns[pattern_idx];
        for idx in 0..self.pattern_channels.min(self.channels.len()) {
            let cell = pattern
                .cell(self.cur_row as usize, idx)
                .copied()
                .unwrap_or_default();
            self.channels[idx].row = RowState {
                note: cell.note,
                instr: cell.instr,
                vol_cmd: cell.vol_cmd,
                vol: cell.vol,
                effect: cell.effect,
                param: cell.param,
            };
        }
        true
    }

    /// Song end reached: restart if a repeat credit remains
    fn consume_repeat(&mut self, song: &Song) -> bool {
        if self.repeats_left == 0 {
            return false;
        }
        self.repeats_left -= 1;
        self.visited.iter_mut().for_each(|w| *w = 0);
        self.next_order = song.restart_pos as usize;
        self.next_row = 0;
        true
    }

    /// Apply break/jump/loop commands queued during the finished row
    fn apply_queued_navigation(&mut self) {
        if let Some(row) = self.patloop_jump.take() {
            // a pattern loop legitimately revisits rows of this order
            let base = self.cur_order * MAX_ROWS;
            for r in 0..MAX_ROWS {
                let bit = base + r;
                self.visited[bit / 64] &= !(1 << (bit % 64));
            }
            self.next_order = self.cur_order;
            self.next_row = row;
            self.queued_jump = None;
            self.queued_break = None;
            return;
        }
        match (self.queued_jump.take(), self.queued_break.take()) {
            (Some(ord), Some(row)) => {
                self.next_order = ord;
                self.next_row = row;
            }
            (Some(ord), None) => {
                self.next_order = ord;
                self.next_row = 0;
            }
            (None, Some(row)) => {
                self.next_order = self.cur_order + 1;
                self.next_row = row;
            }
            (None, None) => {}
        }
    }

    // --- row processing -----------------------------------------------------

    /// Tick 0 of a row for one pattern channel
    fn process_row_channel(&mut self, idx: usize, song: &Song) {
        {
            let ch = &mut self.channels[idx];
            ch.vib_delta = 0;
            ch.trem_delta = 0;
            ch.pb_delta = 0;
        }
        let row = self.channels[idx].row;
        let delay = note_delay_ticks(&row);
        if delay == 0 {
            self.trigger_cell(idx, song);
            self.volume_column_row(idx);
        }
        self.row_effect(idx, song);
    }

    /// Ticks 1..n of a row for one pattern channel
    fn process_tick_channel(&mut self, idx: usize, song: &Song) {
        {
            let ch = &mut self.channels[idx];
            ch.vib_delta = 0;
            ch.trem_delta = 0;
            ch.pb_delta = 0;
        }
        let row = self.channels[idx].row;
        let delay = note_delay_ticks(&row);
        if delay != 0 && self.tick == delay {
            self.trigger_cell(idx, song);
            self.volume_column_row(idx);
        }
        self.volume_column_tick(idx);
        self.tick_effect(idx, song);
    }

    // --- note handling ------------------------------------------------------

    /// Act on the note/instrument columns of the loaded row cell
    fn trigger_cell(&mut self, idx: usize, song: &Song) {
        let row = self.channels[idx].row;
        match row.note {
            NOTE_KEYOFF => {
                self.release_note(idx, song);
                return;
            }
            NOTE_CUT => {
                self.channels[idx].cut();
                return;
            }
            NOTE_FADE => {
                self.channels[idx].start_fade();
                return;
            }
            _ => {}
        }
        let has_note = row.note >= 1 && row.note <= NOTE_MAX;
        let porta = is_tone_porta(&row);
        if row.instr != 0 {
            if has_note && !porta && song.uses_instruments() {
                self.apply_nna(idx, song, row.instr, row.note);
            }
            self.instrument_change(idx, song, row.instr, porta, has_note);
        }
        if has_note {
            self.note_change(idx, song, row.note, porta);
        }
    }

    /// Key-off: envelopes leave sustain and the sustain loop releases into
    /// the regular loop
    fn release_note(&mut self, idx: usize, song: &Song) {
        let has_env = song
            .instrument(self.channels[idx].instr_index)
            .filter(|_| song.uses_instruments())
            .map(|ins| ins.volume_env.enabled && !ins.volume_env.points.is_empty())
            .unwrap_or(false);
        let sample_index = self.channels[idx].sample_index;
        let ch = &mut self.channels[idx];
        ch.key_off(has_env);
        if let Some(smp) = song.sample(sample_index) {
            apply_sample_loops(ch, smp);
        }
    }

    /// Switch the channel to a new instrument/sample definition
    fn instrument_change(&mut self, idx: usize, song: &Song, instr: u8, porta: bool, has_note: bool) {
        let note_for_map = if has_note {
            self.channels[idx].row.note
        } else {
            self.channels[idx].note
        };
        let (sample_idx, ins) = if song.uses_instruments() {
            match song.instrument(instr) {
                Some(ins) => (ins.map_note(note_for_map).1, Some(ins)),
                None => return,
            }
        } else {
            (instr, None)
        };
        let Some(smp) = song.sample(sample_idx) else {
            // missing sample: the cell is audible silence, not an error
            if has_note {
                self.channels[idx].sample_index = 0;
            }
            return;
        };
        let ch = &mut self.channels[idx];
        ch.instr_index = instr;
        if !porta || ch.length == 0 {
            ch.sample_index = sample_idx;
            ch.c4_speed = smp.c4_speed;
            ch.fine_tune = smp.fine_tune;
        }
        ch.volume = smp.default_volume as i32;
        if let Some(pan) = smp.default_pan {
            ch.pan = pan as i32;
        }
        if let Some(ins) = ins {
            ch.nna = ins.nna;
            ch.fadeout = FADE_FULL;
            ch.flags.remove(ChannelFlags::KEY_OFF | ChannelFlags::NOTE_FADE);
            if let Some(pan) = ins.default_pan {
                ch.pan = pan as i32;
            }
            if let Some(cutoff) = ins.filter_cutoff {
                ch.cutoff = cutoff;
                ch.flags.insert(ChannelFlags::FILTER);
            }
            if let Some(res) = ins.filter_resonance {
                ch.resonance = res;
                ch.flags.insert(ChannelFlags::FILTER);
            }
            if !ins.volume_env.carry {
                ch.vol_env_pos = 0;
            }
            if !ins.pan_env.carry {
                ch.pan_env_pos = 0;
            }
            if !ins.pitch_env.carry {
                ch.pitch_env_pos = 0;
            }
        }
    }

    /// Trigger or retarget a note on the channel
    fn note_change(&mut self, idx: usize, song: &Song, note: u8, porta: bool) {
        let instr_index = self.channels[idx].instr_index;
        let (played, sample_idx) = if song.uses_instruments() {
            match song.instrument(instr_index) {
                Some(ins) => ins.map_note(note),
                None => (note, 0),
            }
        } else {
            (note, self.channels[idx].sample_index)
        };
        let Some(smp) = song.sample(sample_idx) else {
            return;
        };
        let real = (played as i32 + smp.relative_note as i32).clamp(1, NOTE_MAX as i32) as u32;
        let period = period_from_note(real, smp.fine_tune, smp.c4_speed, self.linear);
        if period == 0 {
            return;
        }
        let carry = song
            .instrument(instr_index)
            .filter(|_| song.uses_instruments())
            .map(|ins| {
                (
                    ins.volume_env.carry,
                    ins.pan_env.carry,
                    ins.pitch_env.carry,
                )
            })
            .unwrap_or((false, false, false));

        let ch = &mut self.channels[idx];
        ch.note = played;
        if porta && ch.length > 0 && ch.period != 0 {
            ch.porta_target = period;
            ch.flags.insert(ChannelFlags::PORTAMENTO);
            return;
        }
        ch.flags.remove(
            ChannelFlags::PORTAMENTO
                | ChannelFlags::KEY_OFF
                | ChannelFlags::NOTE_FADE
                | ChannelFlags::TREMOR_MUTE,
        );
        ch.sample_index = sample_idx;
        ch.c4_speed = smp.c4_speed;
        ch.fine_tune = smp.fine_tune;
        ch.period = period;
        ch.porta_target = period;
        ch.position = 0;
        ch.length = smp.length;
        apply_sample_loops(ch, smp);
        ch.fadeout = FADE_FULL;
        if !carry.0 {
            ch.vol_env_pos = 0;
        }
        if !carry.1 {
            ch.pan_env_pos = 0;
        }
        if !carry.2 {
            ch.pitch_env_pos = 0;
        }
        ch.auto_vib_pos = 0;
        ch.auto_vib_sweep = 0;
        ch.vib_pos = 0;
        ch.trem_pos = 0;
        ch.pb_pos = 0;
        ch.retrig_count = 0;
        ch.tremor_count = 0;
        ch.filter_state.reset();
        if ch.increment < 0 {
            ch.increment = -ch.increment;
        }
        ch.last_left = 0;
        ch.last_right = 0;
    }

    // --- new-note actions ---------------------------------------------------

    /// Evaluate the sounding voice's new-note action before it is replaced,
    /// possibly copying it into a background slot; then run the incoming
    /// instrument's duplicate check against this channel's voices.
    fn apply_nna(&mut self, idx: usize, song: &Song, new_instr: u8, new_note: u8) {
        if let Some(ins) = song.instrument(new_instr) {
            if ins.dct != DuplicateCheck::Off {
                let (mapped_note, mapped_sample) = ins.map_note(new_note);
                for v in 0..self.channels.len() {
                    let vc = &self.channels[v];
                    if !vc.is_active() || (v != idx && vc.master_channel != Some(idx)) {
                        continue;
                    }
                    let dup = match ins.dct {
                        DuplicateCheck::Note => {
                            vc.note == mapped_note && vc.instr_index == new_instr
                        }
                        DuplicateCheck::Sample => {
                            mapped_sample != 0 && vc.sample_index == mapped_sample
                        }
                        DuplicateCheck::Instrument => vc.instr_index == new_instr,
                        DuplicateCheck::Off => false,
                    };
                    if !dup {
                        continue;
                    }
                    match ins.dca {
                        DuplicateAction::Cut => self.channels[v].cut(),
                        DuplicateAction::NoteOff => {
                            let has_env =
                                ins.volume_env.enabled && !ins.volume_env.points.is_empty();
                            self.channels[v].key_off(has_env);
                        }
                        DuplicateAction::NoteFade => self.channels[v].start_fade(),
                    }
                }
            }
        }

        if self.channels[idx].length == 0 {
            return;
        }
        let nna = self.channels[idx].nna;
        if nna == NewNoteAction::Cut {
            return;
        }
        let Some(slot) = self.free_voice_slot() else {
            return;
        };
        let mut stolen = self.channels[idx].clone();
        stolen.flags.insert(ChannelFlags::BACKGROUND);
        stolen.master_channel = Some(idx);
        stolen.row = RowState::default();
        match nna {
            NewNoteAction::Continue | NewNoteAction::Cut => {}
            NewNoteAction::NoteOff => {
                let has_env = song
                    .instrument(stolen.instr_index)
                    .map(|ins| ins.volume_env.enabled && !ins.volume_env.points.is_empty())
                    .unwrap_or(false);
                stolen.key_off(has_env);
                if let Some(smp) = song.sample(stolen.sample_index) {
                    apply_sample_loops(&mut stolen, smp);
                }
            }
            NewNoteAction::NoteFade => stolen.start_fade(),
        }
        self.channels[slot] = stolen;
    }

    /// Find a slot for a stolen voice: a free background slot, else the
    /// quietest background voice.
    fn free_voice_slot(&mut self) -> Option<usize> {
        let pool = self.pattern_channels..self.channels.len();
        if let Some(free) = pool.clone().find(|&v| !self.channels[v].is_active()) {
            return Some(free);
        }
        pool.filter(|&v| self.channels[v].flags.contains(ChannelFlags::BACKGROUND))
            .min_by_key(|&v| self.channels[v].mix_priority())
    }

    // --- per-tick parameter update -------------------------------------------

    /// Recompute a voice's mixing parameters for this tick
    fn update_channel(&mut self, idx: usize, song: &Song) {
        if !self.channels[idx].is_active() {
            return;
        }
        let sample_index = self.channels[idx].sample_index;
        let Some(smp) = song.sample(sample_index) else {
            return;
        };
        let ins = song
            .instrument(self.channels[idx].instr_index)
            .filter(|_| song.uses_instruments());

        let env = match ins {
            Some(ins) => step_envelopes(&mut self.channels[idx], ins),
            None => {
                // no instrument carries a fade rate; a fading voice drops out
                if self.channels[idx].flags.contains(ChannelFlags::NOTE_FADE) {
                    self.channels[idx].fadeout = 0;
                }
                EnvValues::default()
            }
        };
        let avib = auto_vibrato(&mut self.channels[idx], smp);

        let amiga = song.flags.contains(SongFlags::AMIGA_LIMITS);
        let linear = self.linear;
        let sample_rate = self.sample_rate;
        let global_volume = self.global_volume;
        let master_volume = self.master_volume;
        let ramp_length = self.ramp_length;

        let filter_env = ins.map(|i| i.pitch_env_is_filter).unwrap_or(false);
        let ch = &mut self.channels[idx];

        // pitch: base period plus the per-tick modulation deltas; glissando
        // mode quantizes a running tone portamento to exact note periods
        let mut base = ch.period;
        if ch
            .flags
            .contains(ChannelFlags::GLISSANDO | ChannelFlags::PORTAMENTO)
        {
            base = nearest_note_period(base, ch.fine_tune, ch.c4_speed, linear);
        }
        let mut period = (base as i64 + ch.vib_delta as i64 + avib as i64).max(1) as u32;
        if let Some(pv) = env.pitch {
            if !filter_env {
                period = pitch_env_period(period, pv);
            }
        }
        period = if amiga {
            period.clamp(AMIGA_PERIOD_MIN, AMIGA_PERIOD_MAX)
        } else {
            period.clamp(PERIOD_MIN, PERIOD_MAX)
        };
        let freq = freq_from_period(period, ch.c4_speed, 0, linear);
        let mut inc = muldiv(freq, 1 << 16, sample_rate) as i32;
        if ch.increment < 0 {
            inc = -inc;
        }
        ch.increment = inc;

        if ch.flags.contains(ChannelFlags::FILTER) {
            let cutoff = if filter_env {
                match env.pitch {
                    Some(pv) => ((ch.cutoff as u32 * pv as u32) / 64).min(127) as u8,
                    None => ch.cutoff,
                }
            } else {
                ch.cutoff
            };
            ch.filter_state.setup(cutoff, ch.resonance, sample_rate);
        }

        // volume chain: note vol, tremolo, sample/instrument globals,
        // envelope, fade, channel volume, global volume
        let mut vol = (ch.volume + ch.trem_delta).clamp(0, 64);
        if ch.flags.contains(ChannelFlags::TREMOR_MUTE) {
            vol = 0;
        }
        vol = vol * smp.global_volume as i32 / 64;
        if let Some(ins) = ins {
            vol = vol * ins.global_volume as i32 / 64;
            vol = vol * env.volume as i32 / 64;
        }
        vol = vol * ch.fadeout / FADE_FULL;
        vol = vol * ch.channel_volume / 64;
        vol = vol * global_volume / 128;

        let mut pan = (ch.pan + ch.pb_delta).clamp(0, 256);
        if env.pan != 0 {
            pan = (pan + env.pan * (128 - (pan - 128).abs()) / 32).clamp(0, 256);
        }

        let vol12 = ((vol * 64).clamp(0, 4096) * master_volume / 128).min(4096);
        let left = vol12 * (256 - pan) / 256;
        let right = vol12 * pan / 256;
        ch.set_volume_targets(left, right, ramp_length);

        // a fully faded voice is dead
        if ch.flags.contains(ChannelFlags::NOTE_FADE) && ch.fadeout == 0 && vol == 0 {
            ch.length = 0;
        }
    }
}

/// Copy the applicable loop bounds from a sample onto a voice. The sustain
/// loop wins while the note is held.
fn apply_sample_loops(ch: &mut Channel, smp: &Sample) {
    use crate::song::SampleFlags;
    ch.flags
        .remove(ChannelFlags::LOOP | ChannelFlags::PINGPONG | ChannelFlags::SUSTAIN);
    if smp.flags.contains(SampleFlags::SUSTAIN_LOOP)
        && !ch.flags.contains(ChannelFlags::KEY_OFF)
    {
        ch.loop_start = smp.sustain_start;
        ch.loop_end = smp.sustain_end;
        ch.flags.insert(ChannelFlags::SUSTAIN);
        if smp.flags.contains(SampleFlags::SUSTAIN_PINGPONG) {
            ch.flags.insert(ChannelFlags::PINGPONG);
        }
    } else if smp.flags.contains(SampleFlags::LOOP) {
        ch.loop_start = smp.loop_start;
        ch.loop_end = smp.loop_end;
        ch.flags.insert(ChannelFlags::LOOP);
        if smp.flags.contains(SampleFlags::PINGPONG) {
            ch.flags.insert(ChannelFlags::PINGPONG);
        }
    } else {
        ch.loop_start = 0;
        ch.loop_end = 0;
        if ch.increment < 0 {
            ch.increment = -ch.increment;
        }
    }
}

/// Extract the note-delay tick count (EDx / SDx) from a row cell
fn note_delay_ticks(row: &RowState) -> u32 {
    match row.effect {
        EffectCmd::ModCmdEx | EffectCmd::S3mCmdEx if row.param >> 4 == 0x0D => {
            (row.param & 0x0F) as u32
        }
        _ => 0,
    }
}

/// Whether the cell's effect or volume column requests a tone portamento
fn is_tone_porta(row: &RowState) -> bool {
    matches!(row.effect, EffectCmd::TonePorta | EffectCmd::TonePortaVol)
        || row.vol_cmd == VolCmd::TonePorta
}
