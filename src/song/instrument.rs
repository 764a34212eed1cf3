//! Instrument definition
//!
//! Instruments are the optional layer between notes and samples: a keyboard
//! table remapping incoming notes to (note, sample) pairs, three breakpoint
//! envelopes, the new-note-action policy and a fade-out rate. Songs without
//! instrument data play samples directly.

/// New-note action: what happens to a sounding voice when its channel
/// receives a new note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NewNoteAction {
    /// Stop the old voice immediately
    #[default]
    Cut,
    /// Keep the old voice playing unchanged in the background
    Continue,
    /// Release the old voice (key-off, envelopes leave sustain)
    NoteOff,
    /// Fade the old voice out at the instrument fade rate
    NoteFade,
}

/// Which property duplicate-note checking compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateCheck {
    /// No duplicate checking
    #[default]
    Off,
    /// Same note on the same instrument
    Note,
    /// Same sample
    Sample,
    /// Same instrument
    Instrument,
}

/// Action taken on a detected duplicate voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateAction {
    /// Cut the duplicate
    #[default]
    Cut,
    /// Key-off the duplicate
    NoteOff,
    /// Fade the duplicate
    NoteFade,
}

/// One envelope breakpoint: (tick position, value 0..=64)
pub type EnvelopePoint = (u16, u8);

/// A piecewise-linear breakpoint envelope
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Breakpoints ordered by tick position
    pub points: Vec<EnvelopePoint>,
    /// Envelope is evaluated at all
    pub enabled: bool,
    /// Sustain range (point indices, inclusive); held while the note is on
    pub sustain: Option<(u8, u8)>,
    /// Loop range (point indices, inclusive)
    pub envelope_loop: Option<(u8, u8)>,
    /// Keep the envelope position across an instrument change
    pub carry: bool,
}

impl Envelope {
    /// Total tick length (position of the last breakpoint)
    #[inline]
    pub fn length(&self) -> u32 {
        self.points.last().map(|p| p.0 as u32).unwrap_or(0)
    }

    /// Value at an exact tick position, linearly interpolated between
    /// breakpoints; exact at every breakpoint.
    pub fn value_at(&self, tick: u32) -> u8 {
        let Some(&(first_pos, first_val)) = self.points.first() else {
            return 64;
        };
        if tick <= first_pos as u32 {
            return first_val;
        }
        for pair in self.points.windows(2) {
            let (p0, v0) = (pair[0].0 as u32, pair[0].1 as i32);
            let (p1, v1) = (pair[1].0 as u32, pair[1].1 as i32);
            if tick < p1 {
                if p1 == p0 {
                    return pair[1].1;
                }
                let dt = (tick - p0) as i32;
                let span = (p1 - p0) as i32;
                return (v0 + (v1 - v0) * dt / span).clamp(0, 64) as u8;
            }
        }
        self.points.last().map(|p| p.1).unwrap_or(64)
    }
}

/// Size of the per-note keyboard table
pub const KEYBOARD_SIZE: usize = 120;

/// One instrument definition owned by the song
#[derive(Debug, Clone)]
pub struct Instrument {
    /// Display name
    pub name: String,
    /// Note remap: incoming note (0-based) -> played note (1-based)
    pub note_map: [u8; KEYBOARD_SIZE],
    /// Sample map: incoming note (0-based) -> sample index (1-based, 0 = none)
    pub sample_map: [u8; KEYBOARD_SIZE],
    /// Volume envelope
    pub volume_env: Envelope,
    /// Panning envelope (32 = center at value 32)
    pub pan_env: Envelope,
    /// Pitch envelope; doubles as filter-cutoff envelope when flagged
    pub pitch_env: Envelope,
    /// Interpret the pitch envelope as a filter-cutoff envelope
    pub pitch_env_is_filter: bool,
    /// New-note action
    pub nna: NewNoteAction,
    /// Duplicate check type
    pub dct: DuplicateCheck,
    /// Duplicate check action
    pub dca: DuplicateAction,
    /// Fade-out subtracted from a 0..=65536 fade component every tick
    pub fade_out: u32,
    /// Instrument global volume 0..=64
    pub global_volume: u8,
    /// Default pan 0..=256 if set
    pub default_pan: Option<u16>,
    /// Initial filter cutoff 0..=127 if set
    pub filter_cutoff: Option<u8>,
    /// Initial filter resonance 0..=127 if set
    pub filter_resonance: Option<u8>,
}

impl Default for Instrument {
    fn default() -> Self {
        let mut note_map = [0u8; KEYBOARD_SIZE];
        for (i, n) in note_map.iter_mut().enumerate() {
            *n = (i + 1) as u8;
        }
        Self {
            name: String::new(),
            note_map,
            sample_map: [0; KEYBOARD_SIZE],
            volume_env: Envelope::default(),
            pan_env: Envelope::default(),
            pitch_env: Envelope::default(),
            pitch_env_is_filter: false,
            nna: NewNoteAction::Cut,
            dct: DuplicateCheck::Off,
            dca: DuplicateAction::Cut,
            fade_out: 0,
            global_volume: 64,
            default_pan: None,
            filter_cutoff: None,
            filter_resonance: None,
        }
    }
}

impl Instrument {
    /// Map an incoming note (1-based) to the (note, sample) pair to play.
    /// Out-of-range notes and unmapped slots yield sample 0 (silence).
    #[inline]
    pub fn map_note(&self, note: u8) -> (u8, u8) {
        if note == 0 || note as usize > KEYBOARD_SIZE {
            return (note, 0);
        }
        let idx = (note - 1) as usize;
        let mapped = self.note_map[idx];
        let played = if mapped == 0 { note } else { mapped };
        (played, self.sample_map[idx])
    }
}
