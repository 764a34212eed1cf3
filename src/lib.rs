//! Tracker module playback engine
//!
//! `modmix` decodes tracker module files (ProTracker MOD and relatives) into
//! a unified in-memory song representation and renders that representation to
//! interleaved PCM through a tick/row sequencer, a fixed-point interpolating
//! multi-channel mixer, an optional DSP chain and an output converter.
//!
//! # Features
//! - Unified song model: patterns, samples, instruments, order list
//! - Tick/row sequencer with the classic effect-command set (portamento,
//!   vibrato, tremolo, volume slides, pattern control, NNA voice stealing)
//! - 16.16 fixed-point mixer with nearest / linear / cubic-spline / 8-tap
//!   FIR resampling and per-sample volume ramping
//! - Per-channel resonant low-pass filtering
//! - Optional reverb / surround / bass-expansion / noise-reduction DSP
//! - 8/16/24/32-bit output with clipping and VU metering
//!
//! # Crate feature flags
//! - `export-wav` (optional): render a whole song to a WAV file via `hound`
//!
//! # Quick start
//! ```no_run
//! use modmix::{MixerSettings, Player};
//!
//! let bytes = std::fs::read("song.mod").unwrap();
//! let mut player = Player::open(&bytes, MixerSettings::default()).unwrap();
//! let mut pcm = vec![0u8; 16384];
//! loop {
//!     let n = player.read(&mut pcm);
//!     if n == 0 {
//!         break;
//!     }
//!     // hand &pcm[..n] to the audio device
//! }
//! ```
//!
//! The render path is single-threaded and pull-based: each `read()` call
//! advances the sequencer tick-by-tick and mixes exactly as much audio as the
//! caller asked for. One `Player` corresponds to one playback session.

#![warn(missing_docs)]

pub mod channel;
pub mod config;
pub mod dsp;
pub mod loader;
pub mod mixer;
pub mod output;
pub mod player;
pub mod sequencer;
pub mod song;

/// Error types for the playback engine
///
/// Unrecognized module data is not an error: the loader probe returns
/// `None` and callers treat it as "nothing to play". This enum covers the
/// genuinely exceptional cases only.
#[derive(thiserror::Error, Debug)]
pub enum ModmixError {
    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid mixer or DSP configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ModmixError>;

// Public API exports
pub use channel::Channel;
pub use config::{DspFlags, MixerSettings, OutputFormat, ResamplingMode};
pub use player::Player;
pub use song::{Song, SongFlags};
