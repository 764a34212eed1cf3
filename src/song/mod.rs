//! Song data model
//!
//! The `Song` owns everything a loaded module contains: pattern grids, the
//! order list, samples, optional instruments and the global defaults. It is
//! pure data; the sequencer and mixer read it, only loaders write it.
//! All heap buffers are freed by `Drop`.

pub mod decode;
pub mod instrument;
pub mod note;
pub mod pattern;
pub mod sample;

pub use decode::{decode_sample, SampleEncoding};
pub use instrument::{
    DuplicateAction, DuplicateCheck, Envelope, Instrument, NewNoteAction,
};
pub use note::{NoteEvent, EffectCmd, VolCmd};
pub use pattern::Pattern;
pub use sample::{Sample, SampleFlags};

/// Maximum pattern channels
pub const MAX_PATTERN_CHANNELS: usize = 64;
/// Maximum simultaneously sounding voices (pattern channels + stolen voices)
pub const MAX_VOICES: usize = 128;
/// Maximum patterns per song
pub const MAX_PATTERNS: usize = 240;
/// Maximum samples per song
pub const MAX_SAMPLES: usize = 240;
/// Maximum instruments per song
pub const MAX_INSTRUMENTS: usize = 240;
/// Maximum order list entries
pub const MAX_ORDERS: usize = 256;

/// Order-list sentinel: end of song
pub const ORDER_END: u8 = 0xFF;
/// Order-list sentinel: skip this slot
pub const ORDER_SKIP: u8 = 0xFE;

bitflags::bitflags! {
    /// Global song behaviour flags set by the loader
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SongFlags: u32 {
        /// Pitch slides move in equal cents (linear) instead of period units
        const LINEAR_SLIDES = 0x0001;
        /// Instrument layer is active (note -> keyboard map -> sample)
        const INSTRUMENT_MODE = 0x0002;
        /// Volume slides also apply on the first tick of a row
        const FAST_VOLSLIDES = 0x0004;
        /// Old-style effect quirks (vibrato depth halved)
        const IT_OLD_EFFECTS = 0x0008;
        /// Clamp periods to the classic Amiga range
        const AMIGA_LIMITS = 0x0010;
        /// Tone portamento shares memory with portamento up/down
        const COMPAT_GXX = 0x0020;
    }
}

/// Per-channel defaults from the module header
#[derive(Debug, Clone, Copy)]
pub struct ChannelDefaults {
    /// Initial pan 0..=256 (128 = center)
    pub pan: u16,
    /// Initial channel volume 0..=64
    pub volume: u8,
    /// Channel starts muted
    pub muted: bool,
    /// Channel is surround-routed
    pub surround: bool,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            pan: 128,
            volume: 64,
            muted: false,
            surround: false,
        }
    }
}

/// One loaded module
#[derive(Debug, Clone, Default)]
pub struct Song {
    /// Song title
    pub name: String,
    /// Short tag of the source format (for diagnostics)
    pub format: &'static str,
    /// Behaviour flags
    pub flags: SongFlags,
    /// Number of pattern channels (1..=64)
    pub channels: usize,
    /// Per-channel defaults, one per pattern channel
    pub channel_defaults: Vec<ChannelDefaults>,
    /// Pattern pool; order entries index into this
    pub patterns: Vec<Pattern>,
    /// Order list with `ORDER_END`/`ORDER_SKIP` sentinels
    pub order: Vec<u8>,
    /// Sample pool (0-based storage, 1-based references)
    pub samples: Vec<Sample>,
    /// Instrument pool (empty = sample mode)
    pub instruments: Vec<Instrument>,
    /// Initial ticks per row
    pub default_speed: u32,
    /// Initial tempo in BPM
    pub default_tempo: u32,
    /// Initial global volume 0..=128
    pub default_global_volume: u32,
    /// Order position to restart at after the song end
    pub restart_pos: u8,
}

impl Song {
    /// Create an empty song with sane defaults
    pub fn new(channels: usize) -> Self {
        let channels = channels.clamp(1, MAX_PATTERN_CHANNELS);
        Self {
            channels,
            channel_defaults: vec![ChannelDefaults::default(); channels],
            default_speed: 6,
            default_tempo: 125,
            default_global_volume: 128,
            ..Self::default()
        }
    }

    /// Probe all registered loaders against `bytes`; first match wins.
    /// Returns `None` for unrecognized data, which is normal control flow,
    /// not an error.
    pub fn from_bytes(bytes: &[u8]) -> Option<Song> {
        crate::loader::probe(bytes)
    }

    /// Sample by 1-based reference; 0 and out-of-range yield `None`
    #[inline]
    pub fn sample(&self, index: u8) -> Option<&Sample> {
        if index == 0 {
            return None;
        }
        self.samples.get(index as usize - 1)
    }

    /// Instrument by 1-based reference
    #[inline]
    pub fn instrument(&self, index: u8) -> Option<&Instrument> {
        if index == 0 {
            return None;
        }
        self.instruments.get(index as usize - 1)
    }

    /// Pattern referenced by an order slot, skipping sentinels
    #[inline]
    pub fn pattern_at_order(&self, order: usize) -> Option<&Pattern> {
        let idx = *self.order.get(order)?;
        if idx >= ORDER_SKIP {
            return None;
        }
        self.patterns.get(idx as usize)
    }

    /// Whether the instrument layer is in use
    #[inline]
    pub fn uses_instruments(&self) -> bool {
        self.flags.contains(SongFlags::INSTRUMENT_MODE) && !self.instruments.is_empty()
    }

    /// True when there is nothing playable (defensive loaders may produce
    /// an empty-but-safe song from corrupt data)
    pub fn is_empty(&self) -> bool {
        self.channels == 0
            || self.patterns.is_empty()
            || !self
                .order
                .iter()
                .any(|&o| o < ORDER_SKIP && (o as usize) < self.patterns.len())
    }

    /// Clamp pools and the order list to the fixed engine capacities.
    /// Oversized input is truncated rather than rejected.
    pub fn enforce_limits(&mut self) {
        self.patterns.truncate(MAX_PATTERNS);
        self.samples.truncate(MAX_SAMPLES);
        self.instruments.truncate(MAX_INSTRUMENTS);
        self.order.truncate(MAX_ORDERS);
        if self.channel_defaults.len() != self.channels {
            self.channel_defaults
                .resize(self.channels, ChannelDefaults::default());
        }
        // order entries must resolve or be sentinels
        let pattern_count = self.patterns.len();
        for slot in &mut self.order {
            if *slot < ORDER_SKIP && *slot as usize >= pattern_count {
                *slot = ORDER_SKIP;
            }
        }
        if self.default_speed == 0 {
            self.default_speed = 6;
        }
        self.default_tempo = self.default_tempo.clamp(32, 512);
        self.default_global_volume = self.default_global_volume.min(128);
    }
}
