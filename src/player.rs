//! Pull-based playback session
//!
//! A `Player` binds one loaded `Song` to one render configuration and hands
//! out PCM on demand. Each `read()` call advances the sequencer exactly as
//! far as the requested byte count requires: the internal loop renders in
//! chunks of at most 512 frames, re-entering the sequencer whenever the
//! current tick's frame budget is used up, then runs the DSP chain and the
//! output converter over the chunk. Nothing is buffered ahead and no
//! allocation happens after construction.
//!
//! When the sequencer reaches the song end the player renders a short
//! fade-out over whatever voices are still sounding, after which `read()`
//! returns 0 forever (until `reset()` or `seek_ms()`).

use crate::channel::ChannelFlags;
use crate::config::{DspFlags, MixerSettings, OutputFormat, ResamplingMode};
use crate::config::{BassParams, ReverbParams, SurroundParams};
use crate::dsp::DspChain;
use crate::mixer::mix_block;
use crate::output::{self, VuMeter};
use crate::sequencer::Sequencer;
use crate::song::Song;
use crate::{ModmixError, Result};

/// Render chunk size in frames
const CHUNK_FRAMES: usize = 512;

/// Safety cap for length scans and seeks, in ticks
const MAX_SCAN_TICKS: u64 = 4_000_000;

/// One playback session over one song
pub struct Player {
    song: Song,
    settings: MixerSettings,
    sequencer: Sequencer,
    dsp: DspChain,
    vu: VuMeter,
    mix_buf: Vec<i32>,
    /// Frames left to render before the next sequencer tick
    tick_frames_left: u32,
    /// Frames left of the end-of-song fade; 0 when not fading
    fade_frames_left: u32,
    fade_total: u32,
    fading: bool,
    finished: bool,
    muted: Vec<bool>,
}

impl Player {
    /// Probe `bytes`, load the module and build a playback session.
    /// Unrecognized data and invalid settings are both errors here.
    pub fn open(bytes: &[u8], settings: MixerSettings) -> Result<Player> {
        let song = Song::from_bytes(bytes)
            .ok_or_else(|| ModmixError::Other("unrecognized module data".to_string()))?;
        Self::from_song(song, settings)
    }

    /// Build a playback session over an already constructed song
    pub fn from_song(mut song: Song, settings: MixerSettings) -> Result<Player> {
        settings.validate()?;
        song.enforce_limits();
        let mut sequencer = Sequencer::new(&song, &settings);
        sequencer.set_repeat_count(settings.repeat_count);
        let muted = song.channel_defaults.iter().map(|d| d.muted).collect();
        let fade_total = (settings.sample_rate / 8).max(1);
        Ok(Player {
            dsp: DspChain::new(&settings),
            sequencer,
            vu: VuMeter::default(),
            mix_buf: vec![0; CHUNK_FRAMES * 2],
            tick_frames_left: 0,
            fade_frames_left: 0,
            fade_total,
            fading: false,
            finished: false,
            muted,
            song,
            settings,
        })
    }

    /// Render PCM into `out`. Returns the number of bytes written, which is
    /// always a whole number of frames; 0 means the song has ended. Any
    /// unwritten remainder past the end is filled with format silence.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let bpf = self.settings.bytes_per_frame();
        let max_frames = out.len() / bpf;
        let mut written = 0usize;
        let mut frames_done = 0usize;
        self.vu.decay();

        while frames_done < max_frames && !self.finished {
            if !self.fading && self.tick_frames_left == 0 {
                if self.sequencer.process_tick(&self.song) {
                    self.tick_frames_left = self.sequencer.samples_per_tick();
                } else {
                    self.fading = true;
                    self.fade_frames_left = self.fade_total;
                }
                continue;
            }
            if self.fading && self.fade_frames_left == 0 {
                self.finished = true;
                break;
            }

            let budget = if self.fading {
                self.fade_frames_left
            } else {
                self.tick_frames_left
            } as usize;
            let chunk = (max_frames - frames_done).min(CHUNK_FRAMES).min(budget);

            self.mix_buf[..chunk * 2].fill(0);
            mix_block(
                &mut self.sequencer.channels,
                &self.song,
                &self.settings,
                &mut self.mix_buf,
                chunk,
            );
            if self.fading {
                self.apply_end_fade(chunk);
                self.fade_frames_left -= chunk as u32;
            } else {
                self.tick_frames_left -= chunk as u32;
            }
            self.dsp.process(&mut self.mix_buf, chunk);

            written += output::convert(
                &self.mix_buf,
                &mut out[written..],
                chunk,
                self.settings.format,
                self.settings.channels,
                &mut self.vu,
            );
            frames_done += chunk;
        }
        if self.finished {
            output::fill_silence(&mut out[written..], self.settings.format);
        }
        written
    }

    /// Linear gain ramp over the current chunk during the end fade
    fn apply_end_fade(&mut self, chunk: usize) {
        for i in 0..chunk {
            let gain = (self.fade_frames_left as i64 - i as i64).max(0);
            for s in 0..2 {
                let v = self.mix_buf[i * 2 + s] as i64;
                self.mix_buf[i * 2 + s] = (v * gain / self.fade_total as i64) as i32;
            }
        }
    }

    /// Total playable length in milliseconds, honoring the configured
    /// repeat count. Computed by a tick-only dry run, no audio is rendered.
    pub fn get_length_ms(&self) -> u64 {
        let mut seq = Sequencer::new(&self.song, &self.settings);
        seq.set_repeat_count(self.settings.repeat_count);
        let mut guard = 0u64;
        while seq.process_tick(&self.song) {
            guard += 1;
            if guard > MAX_SCAN_TICKS {
                break;
            }
        }
        seq.elapsed_ms()
    }

    /// Jump to approximately `ms` of music time. The sequencer restarts
    /// from the beginning and fast-forwards tick by tick, so effect and
    /// envelope state is exact but no audio from before the target is
    /// heard; the landing position is quantized to a tick.
    pub fn seek_ms(&mut self, ms: u64) {
        self.restart();
        let mut guard = 0u64;
        while self.sequencer.elapsed_ms() < ms {
            if !self.sequencer.process_tick(&self.song) {
                break;
            }
            guard += 1;
            if guard > MAX_SCAN_TICKS {
                break;
            }
        }
        self.finished = self.sequencer.ended();
    }

    /// Rewind to the song start
    pub fn reset(&mut self) {
        self.restart();
    }

    fn restart(&mut self) {
        self.sequencer.reset(&self.song, &self.settings);
        self.sequencer.set_repeat_count(self.settings.repeat_count);
        self.dsp.reconfigure(&self.settings);
        self.vu = VuMeter::default();
        self.tick_frames_left = 0;
        self.fade_frames_left = 0;
        self.fading = false;
        self.finished = false;
        self.apply_mutes();
    }

    /// How many backward loops are honored before the song ends
    pub fn set_repeat_count(&mut self, n: u32) {
        self.settings.repeat_count = n;
        self.sequencer.set_repeat_count(n);
    }

    /// The loaded song
    pub fn song(&self) -> &Song {
        &self.song
    }

    /// True once playback (including the end fade) is over
    pub fn ended(&self) -> bool {
        self.finished
    }

    /// Current order-list position
    pub fn order(&self) -> usize {
        self.sequencer.order()
    }

    /// Current pattern row
    pub fn row(&self) -> u32 {
        self.sequencer.row()
    }

    /// Current ticks per row
    pub fn speed(&self) -> u32 {
        self.sequencer.speed()
    }

    /// Current tempo in BPM
    pub fn tempo(&self) -> u32 {
        self.sequencer.tempo()
    }

    /// Music time elapsed in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.sequencer.elapsed_ms()
    }

    /// Output-level peak meter
    pub fn vu(&self) -> VuMeter {
        self.vu
    }

    /// Last rendered stereo magnitudes of one pattern channel
    pub fn channel_vu(&self, channel: usize) -> (i32, i32) {
        match self.sequencer.channels.get(channel) {
            Some(ch) => (ch.last_left.abs(), ch.last_right.abs()),
            None => (0, 0),
        }
    }

    /// Mute or unmute one pattern channel (background voices it spawned
    /// follow along)
    pub fn set_channel_mute(&mut self, channel: usize, mute: bool) {
        if channel >= self.muted.len() {
            return;
        }
        self.muted[channel] = mute;
        self.apply_mutes();
    }

    /// Solo one pattern channel, or `None` to restore the mute mask to
    /// all-unmuted
    pub fn solo_channel(&mut self, channel: Option<usize>) {
        for (i, m) in self.muted.iter_mut().enumerate() {
            *m = match channel {
                Some(solo) => i != solo,
                None => false,
            };
        }
        self.apply_mutes();
    }

    /// Whether a pattern channel is muted
    pub fn is_channel_muted(&self, channel: usize) -> bool {
        self.muted.get(channel).copied().unwrap_or(false)
    }

    fn apply_mutes(&mut self) {
        let pattern_channels = self.muted.len();
        for (v, ch) in self.sequencer.channels.iter_mut().enumerate() {
            let owner = if v < pattern_channels {
                Some(v)
            } else {
                ch.master_channel
            };
            let mute = owner
                .and_then(|o| self.muted.get(o))
                .copied()
                .unwrap_or(false);
            ch.flags.set(ChannelFlags::MUTE, mute);
        }
    }

    /// Change the resampling strategy; takes effect on the next chunk
    pub fn set_resampling_mode(&mut self, mode: ResamplingMode) {
        self.settings.resampling = mode;
    }

    /// Enable or disable DSP stages. Delay lines are rebuilt, their state
    /// restarts clean.
    pub fn set_dsp_flags(&mut self, flags: DspFlags) {
        self.settings.dsp = flags;
        self.dsp.reconfigure(&self.settings);
    }

    /// Replace the reverb parameters
    pub fn set_reverb_params(&mut self, params: ReverbParams) {
        self.settings.reverb = params;
        self.dsp.reconfigure(&self.settings);
    }

    /// Replace the bass expansion parameters
    pub fn set_bass_params(&mut self, params: BassParams) {
        self.settings.bass = params;
        self.dsp.reconfigure(&self.settings);
    }

    /// Replace the surround parameters
    pub fn set_surround_params(&mut self, params: SurroundParams) {
        self.settings.surround = params;
        self.dsp.reconfigure(&self.settings);
    }

    /// Master volume 0..=512, 128 = unity
    pub fn set_master_volume(&mut self, volume: u32) -> Result<()> {
        if volume > 512 {
            return Err(ModmixError::ConfigError(format!(
                "master volume {volume} out of range 0..=512"
            )));
        }
        self.settings.master_volume = volume;
        self.sequencer.set_master_volume(volume);
        Ok(())
    }

    /// Change sample rate, channel count or output format. Playback
    /// restarts from the beginning because every delay line and tick
    /// budget depends on the rate.
    pub fn set_mix_config(
        &mut self,
        sample_rate: u32,
        channels: u32,
        format: OutputFormat,
    ) -> Result<()> {
        let candidate = MixerSettings {
            sample_rate,
            channels,
            format,
            ..self.settings
        };
        candidate.validate()?;
        self.settings = candidate;
        self.fade_total = (sample_rate / 8).max(1);
        self.restart();
        Ok(())
    }

    /// The active render configuration
    pub fn settings(&self) -> &MixerSettings {
        &self.settings
    }

    /// Render the whole song (from the start, at the current settings but
    /// 16-bit output) into a WAV file.
    #[cfg(feature = "export-wav")]
    pub fn export_wav<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        use hound::{SampleFormat, WavSpec, WavWriter};

        let render_settings = MixerSettings {
            format: OutputFormat::Bits16,
            ..self.settings
        };
        let mut render = Player::from_song(self.song.clone(), render_settings)?;
        let spec = WavSpec {
            channels: self.settings.channels as u16,
            sample_rate: self.settings.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let wav_err = |e: hound::Error| ModmixError::Other(e.to_string());
        let mut writer = WavWriter::create(path, spec).map_err(wav_err)?;
        let mut buf = vec![0u8; 16384];
        loop {
            let n = render.read(&mut buf);
            if n == 0 {
                break;
            }
            for pair in buf[..n].chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                    .map_err(wav_err)?;
            }
        }
        writer.finalize().map_err(wav_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::sample::SampleFlags;
    use crate::song::{Pattern, Sample, ORDER_END};

    /// One channel, one looped sawtooth sample, four rows at speed 6
    fn test_song(rows: usize) -> Song {
        let mut song = Song::new(1);
        song.flags |= crate::song::SongFlags::LINEAR_SLIDES;
        let mut smp = Sample::new();
        smp.flags |= SampleFlags::LOOP;
        smp.loop_start = 0;
        smp.loop_end = 64;
        smp.set_pcm((0..64).map(|i| (i as i16 - 32) * 512).collect());
        song.samples.push(smp);

        let mut pattern = Pattern::new(rows, 1);
        if let Some(cell) = pattern.cell_mut(0, 0) {
            cell.note = 61;
            cell.instr = 1;
        }
        song.patterns.push(pattern);
        song.order = vec![0, ORDER_END];
        song
    }

    fn settings() -> MixerSettings {
        MixerSettings::default()
    }

    #[test]
    fn test_read_produces_audio() {
        let mut player = Player::from_song(test_song(16), settings()).unwrap();
        let mut buf = vec![0u8; 8192];
        let n = player.read(&mut buf);
        assert_eq!(n, 8192);
        assert!(buf.iter().any(|&b| b != 0));
        assert!(player.vu().left > 0);
    }

    #[test]
    fn test_read_returns_zero_after_end() {
        let mut player = Player::from_song(test_song(4), settings()).unwrap();
        let mut buf = vec![0u8; 65536];
        let mut total = 0usize;
        for _ in 0..1000 {
            let n = player.read(&mut buf);
            if n == 0 {
                break;
            }
            total += n;
        }
        assert!(total > 0);
        assert!(player.ended());
        assert_eq!(player.read(&mut buf), 0);
    }

    #[test]
    fn test_length_matches_tick_formula() {
        // 4 rows * 6 ticks at 125 BPM: 2500 * 24 / 125 = 480 ms
        let player = Player::from_song(test_song(4), settings()).unwrap();
        assert_eq!(player.get_length_ms(), 480);
    }

    #[test]
    fn test_rendered_duration_matches_length() {
        let mut player = Player::from_song(test_song(4), settings()).unwrap();
        let bpf = player.settings().bytes_per_frame();
        let mut buf = vec![0u8; 32768];
        let mut frames = 0usize;
        for _ in 0..1000 {
            let n = player.read(&mut buf);
            if n == 0 {
                break;
            }
            frames += n / bpf;
        }
        // 24 ticks of exactly 882 frames, plus the end fade
        let body = 24 * (44100 * 5 / 250);
        let fade = (44100 / 8) as usize;
        assert!(frames >= body, "{frames} < {body}");
        assert!(frames <= body + fade + 1, "{frames} > {}", body + fade);
    }

    #[test]
    fn test_seek_fast_forwards_transport() {
        let mut player = Player::from_song(test_song(16), settings()).unwrap();
        player.seek_ms(240);
        assert!(player.elapsed_ms() >= 240);
        assert!(!player.ended());
        assert!(player.row() > 0);
    }

    #[test]
    fn test_muted_channel_renders_silence() {
        let mut player = Player::from_song(test_song(16), settings()).unwrap();
        player.set_channel_mute(0, true);
        assert!(player.is_channel_muted(0));
        let mut buf = vec![0u8; 8192];
        player.read(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
        player.set_channel_mute(0, false);
        assert!(!player.is_channel_muted(0));
    }

    #[test]
    fn test_solo_mutes_other_channels() {
        let mut song = test_song(16);
        song.channels = 2;
        song.enforce_limits();
        let mut player = Player::from_song(song, settings()).unwrap();
        player.solo_channel(Some(1));
        assert!(player.is_channel_muted(0));
        assert!(!player.is_channel_muted(1));
        player.solo_channel(None);
        assert!(!player.is_channel_muted(0));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let bad = MixerSettings {
            sample_rate: 1000,
            ..MixerSettings::default()
        };
        assert!(Player::from_song(test_song(4), bad).is_err());
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(Player::open(&[1, 2, 3, 4], settings()).is_err());
    }

    #[test]
    fn test_ended_read_fills_format_silence() {
        let s = MixerSettings {
            format: OutputFormat::Bits8,
            ..settings()
        };
        let mut player = Player::from_song(test_song(4), s).unwrap();
        let mut buf = vec![0u8; 65536];
        while player.read(&mut buf) > 0 {}
        // stale caller data must come back as unsigned-8 silence
        let mut buf = vec![0xAAu8; 256];
        assert_eq!(player.read(&mut buf), 0);
        assert!(buf.iter().all(|&b| b == 0x80));
    }

    #[test]
    fn test_repeat_count_extends_length() {
        let once = Player::from_song(test_song(4), settings()).unwrap();
        let twice = {
            let s = MixerSettings {
                repeat_count: 1,
                ..settings()
            };
            Player::from_song(test_song(4), s).unwrap()
        };
        assert_eq!(twice.get_length_ms(), 2 * once.get_length_ms());
    }

    #[test]
    fn test_set_mix_config_revalidates() {
        let mut player = Player::from_song(test_song(4), settings()).unwrap();
        assert!(player
            .set_mix_config(48000, 2, OutputFormat::Bits24)
            .is_ok());
        assert_eq!(player.settings().sample_rate, 48000);
        assert!(player.set_mix_config(48000, 5, OutputFormat::Bits16).is_err());
    }
}
