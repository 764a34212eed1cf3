//! Module format probing
//!
//! `probe` runs every registered loader against the raw bytes in a fixed
//! order; the first loader that recognizes the data produces the `Song`.
//! Unrecognized data is not an error, the probe just returns `None`.
//!
//! One loader ships built in: a 31-sample ProTracker MOD reader (`M.K.`,
//! `M!K!`, `FLT4` and the `xCHN`/`xxCH` multichannel variants). It maps the
//! classic effect column onto the engine command set and decodes the signed
//! 8-bit sample data.

use log::{debug, warn};

use crate::sequencer::tables::PERIOD_TABLE;
use crate::song::note::{EffectCmd, NoteEvent};
use crate::song::sample::SampleFlags;
use crate::song::{
    decode_sample, Pattern, Sample, SampleEncoding, Song, SongFlags, ORDER_END,
};

/// One recognizer/parser for a module file format
pub trait ModuleLoader {
    /// Short format tag for diagnostics
    fn name(&self) -> &'static str;

    /// Parse `bytes` if they look like this format
    fn load(&self, bytes: &[u8]) -> Option<Song>;
}

/// Probe all loaders in registration order; first match wins
pub fn probe(bytes: &[u8]) -> Option<Song> {
    const LOADERS: &[&dyn ModuleLoader] = &[&ModLoader];
    for loader in LOADERS {
        if let Some(mut song) = loader.load(bytes) {
            song.enforce_limits();
            if song.is_empty() {
                warn!("{}: recognized but nothing playable", loader.name());
                return None;
            }
            debug!(
                "{}: {} channels, {} patterns, {} orders",
                loader.name(),
                song.channels,
                song.patterns.len(),
                song.order.len()
            );
            return Some(song);
        }
    }
    debug!("no loader recognized {} bytes", bytes.len());
    None
}

/// Decode a fixed-size name field: stop at NUL, trim trailing blanks
fn read_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

/// ProTracker and multichannel MOD variants
struct ModLoader;

const MOD_MAGIC_OFFSET: usize = 1080;
const MOD_HEADER_LEN: usize = 1084;
const MOD_SAMPLES: usize = 31;
const MOD_ROWS: usize = 64;

/// Channel count from the 4-byte magic, `None` if unrecognized
fn mod_channels(magic: &[u8]) -> Option<usize> {
    match magic {
        b"M.K." | b"M!K!" | b"FLT4" => Some(4),
        _ => {
            if &magic[1..] == b"CHN" && magic[0].is_ascii_digit() {
                let n = (magic[0] - b'0') as usize;
                (n >= 1).then_some(n)
            } else if &magic[2..] == b"CH"
                && magic[0].is_ascii_digit()
                && magic[1].is_ascii_digit()
            {
                let n = (magic[0] - b'0') as usize * 10 + (magic[1] - b'0') as usize;
                (10..=32).contains(&n).then_some(n)
            } else {
                None
            }
        }
    }
}

/// Closest engine note (1-based) for a raw Amiga period, 0 for no note.
/// Engine internal periods are the table values `<< 5`; the file stores
/// them `>> 2` of that scale, so period 428 is the reference note.
fn note_from_mod_period(period: u32) -> u8 {
    if period == 0 {
        return 0;
    }
    let mut best_note = 0u8;
    let mut best_dist = u32::MAX;
    for n in 0..96u32 {
        let table = (PERIOD_TABLE[(n % 12) as usize] << 3) >> (n / 12);
        let dist = table.abs_diff(period);
        if dist < best_dist {
            best_dist = dist;
            best_note = (n + 1) as u8;
        }
    }
    best_note
}

/// Map one 4-byte MOD cell effect onto the engine command set
fn mod_effect(cmd: u8, param: u8) -> (EffectCmd, u8) {
    match cmd {
        0x0 if param != 0 => (EffectCmd::Arpeggio, param),
        0x1 => (EffectCmd::PortaUp, param),
        0x2 => (EffectCmd::PortaDown, param),
        0x3 => (EffectCmd::TonePorta, param),
        0x4 => (EffectCmd::Vibrato, param),
        0x5 => (EffectCmd::TonePortaVol, param),
        0x6 => (EffectCmd::VibratoVol, param),
        0x7 => (EffectCmd::Tremolo, param),
        0x8 => (EffectCmd::Panning8, param),
        0x9 => (EffectCmd::Offset, param),
        0xA => (EffectCmd::VolumeSlide, param),
        0xB => (EffectCmd::PositionJump, param),
        0xC => (EffectCmd::SetVolume, param.min(64)),
        // row parameter is BCD in the file
        0xD => {
            let row = (param >> 4) * 10 + (param & 0x0F);
            (EffectCmd::PatternBreak, row)
        }
        0xE => (EffectCmd::ModCmdEx, param),
        0xF if param == 0 => (EffectCmd::None, 0),
        0xF if param < 0x20 => (EffectCmd::Speed, param),
        0xF => (EffectCmd::Tempo, param),
        _ => (EffectCmd::None, 0),
    }
}

struct ModSampleHeader {
    name: String,
    length: u32,
    fine_tune: i32,
    volume: u8,
    loop_start: u32,
    loop_len: u32,
}

fn read_sample_header(bytes: &[u8]) -> ModSampleHeader {
    let words = |off: usize| u16::from_be_bytes([bytes[off], bytes[off + 1]]) as u32 * 2;
    // signed 4-bit nibble in 1/8 semitone units
    let nibble = (bytes[24] & 0x0F) as i32;
    let fine_tune = if nibble >= 8 { nibble - 16 } else { nibble } * 16;
    ModSampleHeader {
        name: read_name(&bytes[..22]),
        length: words(22),
        fine_tune,
        volume: bytes[25].min(64),
        loop_start: words(26),
        loop_len: words(28),
    }
}

impl ModuleLoader for ModLoader {
    fn name(&self) -> &'static str {
        "MOD"
    }

    fn load(&self, bytes: &[u8]) -> Option<Song> {
        if bytes.len() < MOD_HEADER_LEN {
            return None;
        }
        let channels = mod_channels(&bytes[MOD_MAGIC_OFFSET..MOD_MAGIC_OFFSET + 4])?;

        let mut song = Song::new(channels);
        song.format = "MOD";
        song.name = read_name(&bytes[..20]);
        if channels == 4 {
            song.flags |= SongFlags::AMIGA_LIMITS;
        }
        // classic L R R L panning
        for (i, defaults) in song.channel_defaults.iter_mut().enumerate() {
            defaults.pan = if (i & 3) == 1 || (i & 3) == 2 { 192 } else { 64 };
        }

        let headers: Vec<ModSampleHeader> = (0..MOD_SAMPLES)
            .map(|i| read_sample_header(&bytes[20 + i * 30..20 + (i + 1) * 30]))
            .collect();

        let order_len = (bytes[950] as usize).clamp(1, 128);
        let restart = bytes[951];
        song.restart_pos = if (restart as usize) < order_len { restart } else { 0 };
        let order_table = &bytes[952..952 + 128];
        song.order = order_table[..order_len].to_vec();
        song.order.push(ORDER_END);

        // ProTracker stores patterns past the order length too
        let pattern_count = order_table.iter().map(|&o| o as usize + 1).max()?;
        let pattern_bytes = MOD_ROWS * channels * 4;
        let patterns_end = MOD_HEADER_LEN + pattern_count * pattern_bytes;
        if bytes.len() < patterns_end {
            warn!("MOD: pattern data truncated, rejecting");
            return None;
        }

        for p in 0..pattern_count {
            let mut pattern = Pattern::new(MOD_ROWS, channels);
            let base = MOD_HEADER_LEN + p * pattern_bytes;
            for row in 0..MOD_ROWS {
                for ch in 0..channels {
                    let off = base + (row * channels + ch) * 4;
                    let cell = &bytes[off..off + 4];
                    let period = (((cell[0] & 0x0F) as u32) << 8) | cell[1] as u32;
                    let instr = (cell[0] & 0xF0) | (cell[2] >> 4);
                    let (effect, param) = mod_effect(cell[2] & 0x0F, cell[3]);
                    if let Some(slot) = pattern.cell_mut(row, ch) {
                        *slot = NoteEvent {
                            note: note_from_mod_period(period),
                            instr,
                            effect,
                            param,
                            ..NoteEvent::default()
                        };
                    }
                }
            }
            song.patterns.push(pattern);
        }

        // sample data follows the patterns; tolerate a truncated tail
        let mut data_off = patterns_end;
        for header in headers {
            let mut smp = Sample::new();
            smp.name = header.name;
            smp.length = header.length;
            smp.fine_tune = header.fine_tune;
            smp.default_volume = header.volume;
            if header.loop_len > 2 {
                smp.flags |= SampleFlags::LOOP;
                smp.loop_start = header.loop_start;
                smp.loop_end = header.loop_start + header.loop_len;
            }
            if smp.length > 0 && data_off < bytes.len() {
                let avail = &bytes[data_off..];
                smp.length = smp.length.min(avail.len() as u32);
                let consumed = decode_sample(&mut smp, SampleEncoding::Signed8, avail);
                data_off += consumed.max(header.length as usize).min(avail.len());
            } else {
                smp.length = 0;
            }
            song.samples.push(smp);
        }

        Some(song)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One pattern, one looped sample, order [0], C-4 note with Cxx volume
    fn synthetic_mod() -> Vec<u8> {
        let mut bytes = vec![0u8; MOD_HEADER_LEN];
        bytes[..9].copy_from_slice(b"test song");
        // sample 1: 16 frames, finetune 0, volume 48, loop 4..12
        let h = 20;
        bytes[h..h + 4].copy_from_slice(b"sine");
        bytes[h + 22..h + 24].copy_from_slice(&8u16.to_be_bytes()); // words
        bytes[h + 24] = 0;
        bytes[h + 25] = 48;
        bytes[h + 26..h + 28].copy_from_slice(&2u16.to_be_bytes());
        bytes[h + 28..h + 30].copy_from_slice(&4u16.to_be_bytes());
        bytes[950] = 1;
        bytes[951] = 0;
        bytes[952] = 0;
        bytes[MOD_MAGIC_OFFSET..MOD_MAGIC_OFFSET + 4].copy_from_slice(b"M.K.");
        // pattern 0
        let mut pattern = vec![0u8; MOD_ROWS * 4 * 4];
        // row 0 ch 0: period 428 (reference note), sample 1, C30 set volume
        pattern[0] = 0x01; // period high nibble 1, sample high nibble 0
        pattern[1] = 0xAC; // 0x1AC = 428
        pattern[2] = 0x1C; // sample low nibble 1, effect C
        pattern[3] = 48;
        bytes.extend_from_slice(&pattern);
        // sample 1 data
        bytes.extend_from_slice(&[0u8, 64, 127, 64, 0, 192, 129, 192, 0, 64, 127, 64, 0, 192, 129, 192]);
        bytes
    }

    #[test]
    fn test_probe_rejects_garbage() {
        assert!(probe(&[0, 0, 0, 0]).is_none());
        assert!(probe(&[]).is_none());
        let noise: Vec<u8> = (0..2000).map(|i| (i * 37) as u8).collect();
        assert!(probe(&noise).is_none());
    }

    #[test]
    fn test_probe_parses_synthetic_mod() {
        let song = probe(&synthetic_mod()).unwrap();
        assert_eq!(song.format, "MOD");
        assert_eq!(song.name, "test song");
        assert_eq!(song.channels, 4);
        assert_eq!(song.patterns.len(), 1);
        assert!(song.flags.contains(SongFlags::AMIGA_LIMITS));
        assert_eq!(song.order[0], 0);
        assert_eq!(*song.order.last().unwrap(), ORDER_END);

        let cell = song.patterns[0].cell(0, 0).unwrap();
        assert_eq!(cell.note, 61); // period 428 is the reference note
        assert_eq!(cell.instr, 1);
        assert_eq!(cell.effect, EffectCmd::SetVolume);
        assert_eq!(cell.param, 48);

        let smp = song.sample(1).unwrap();
        assert_eq!(smp.length, 16);
        assert!(smp.is_looped());
        assert_eq!(smp.loop_start, 4);
        assert_eq!(smp.loop_end, 12);
        assert_eq!(smp.default_volume, 48);
        // signed 8-bit widened to 16-bit
        let (data, base) = smp.guarded();
        assert_eq!(data[base + 2], 127 << 8);
    }

    #[test]
    fn test_truncated_pattern_data_rejected() {
        let mut bytes = synthetic_mod();
        bytes.truncate(MOD_HEADER_LEN + 100);
        assert!(probe(&bytes).is_none());
    }

    #[test]
    fn test_channel_magic_variants() {
        assert_eq!(mod_channels(b"M.K."), Some(4));
        assert_eq!(mod_channels(b"6CHN"), Some(6));
        assert_eq!(mod_channels(b"8CHN"), Some(8));
        assert_eq!(mod_channels(b"16CH"), Some(16));
        assert_eq!(mod_channels(b"32CH"), Some(32));
        assert_eq!(mod_channels(b"ABCD"), None);
        assert_eq!(mod_channels(b"99CH"), None);
    }

    #[test]
    fn test_period_note_mapping_octaves() {
        assert_eq!(note_from_mod_period(428), 61);
        assert_eq!(note_from_mod_period(856), 49); // one octave down
        assert_eq!(note_from_mod_period(214), 73); // one octave up
        assert_eq!(note_from_mod_period(0), 0);
    }

    #[test]
    fn test_finetune_nibble_sign() {
        let mut header = [0u8; 30];
        header[24] = 0x0F; // -1 in 4-bit two's complement
        assert_eq!(read_sample_header(&header).fine_tune, -16);
        header[24] = 0x07;
        assert_eq!(read_sample_header(&header).fine_tune, 7 * 16);
    }
}
