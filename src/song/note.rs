//! Pattern cell: one note event
//!
//! A `NoteEvent` is one row-cell of a pattern: optional note, optional
//! instrument, a volume-column command and a main effect command. Cells are
//! immutable once loaded; the sequencer reads each at most once per row.

/// No note in this cell
pub const NOTE_NONE: u8 = 0;
/// Note sentinel: stop the envelope sustain and start the fade-out
pub const NOTE_KEYOFF: u8 = 255;
/// Note sentinel: cut the voice immediately
pub const NOTE_CUT: u8 = 254;
/// Note sentinel: fade the voice out
pub const NOTE_FADE: u8 = 253;
/// Highest real note value (10 octaves from C-0)
pub const NOTE_MAX: u8 = 120;

/// Main effect column command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectCmd {
    /// No effect
    #[default]
    None,
    /// Cycle between note, note+x, note+y semitones each tick
    Arpeggio,
    /// Slide pitch up every tick
    PortaUp,
    /// Slide pitch down every tick
    PortaDown,
    /// Slide pitch toward the row's note
    TonePorta,
    /// Periodic pitch modulation
    Vibrato,
    /// Tone portamento plus volume slide
    TonePortaVol,
    /// Vibrato plus volume slide
    VibratoVol,
    /// Periodic volume modulation
    Tremolo,
    /// Set panning 0..=255
    Panning8,
    /// Start sample at offset `param * 256`
    Offset,
    /// Slide volume up/down every tick
    VolumeSlide,
    /// Jump to an order-list position
    PositionJump,
    /// Set channel volume 0..=64
    SetVolume,
    /// Break to a row of the next pattern
    PatternBreak,
    /// Retrigger the note every `param` ticks (with volume change nibble)
    Retrig,
    /// Set ticks per row
    Speed,
    /// Set tempo (BPM) or slide it
    Tempo,
    /// Gate the note on/off in a stored on/off tick pattern
    Tremor,
    /// Extended MOD (Exy) command group
    ModCmdEx,
    /// Extended S3M (Sxy) command group
    S3mCmdEx,
    /// Set channel master volume 0..=64
    ChannelVolume,
    /// Slide channel master volume
    ChannelVolSlide,
    /// Set global volume 0..=128
    GlobalVolume,
    /// Slide global volume
    GlobalVolSlide,
    /// Release the note (start fade)
    KeyOff,
    /// Vibrato with 4× finer depth
    FineVibrato,
    /// Periodic panning modulation
    Panbrello,
    /// Extra-fine portamento group (X1x/X2x)
    XFinePorta,
    /// Slide panning
    PanningSlide,
    /// Jump volume envelope to a tick position
    SetEnvPosition,
    /// Filter macro: set cutoff/resonance (Zxx subset)
    MidiMacro,
}

/// Volume column command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolCmd {
    /// Empty volume column
    #[default]
    None,
    /// Set note volume 0..=64
    Volume,
    /// Set panning 0..=64
    Pan,
    /// Volume slide up (per tick)
    SlideUp,
    /// Volume slide down (per tick)
    SlideDown,
    /// Fine volume up (first tick only)
    FineUp,
    /// Fine volume down (first tick only)
    FineDown,
    /// Set vibrato speed
    VibratoSpeed,
    /// Vibrato with stored speed
    VibratoDepth,
    /// Tone portamento with coarse rate
    TonePorta,
    /// Pitch slide up
    PortaUp,
    /// Pitch slide down
    PortaDown,
}

/// One pattern cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoteEvent {
    /// Note value: 0 = none, 1..=120 real, or one of the sentinels
    pub note: u8,
    /// Instrument/sample number, 1-based; 0 = keep current
    pub instr: u8,
    /// Volume column command
    pub vol_cmd: VolCmd,
    /// Volume column value
    pub vol: u8,
    /// Effect column command
    pub effect: EffectCmd,
    /// Effect parameter byte
    pub param: u8,
}

impl NoteEvent {
    /// True when the cell carries nothing at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.note == NOTE_NONE
            && self.instr == 0
            && self.vol_cmd == VolCmd::None
            && self.effect == EffectCmd::None
    }

    /// True when `note` is a real playable note (not empty, not a sentinel)
    #[inline]
    pub fn has_note(&self) -> bool {
        self.note >= 1 && self.note <= NOTE_MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cell() {
        let cell = NoteEvent::default();
        assert!(cell.is_empty());
        assert!(!cell.has_note());
    }

    #[test]
    fn test_sentinels_are_not_notes() {
        let mut cell = NoteEvent::default();
        for sentinel in [NOTE_KEYOFF, NOTE_CUT, NOTE_FADE] {
            cell.note = sentinel;
            assert!(!cell.has_note());
            assert!(!cell.is_empty());
        }
        cell.note = 61;
        assert!(cell.has_note());
    }
}
