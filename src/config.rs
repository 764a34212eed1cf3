//! Mixer and DSP configuration
//!
//! `MixerSettings` is the one knob block the host hands to the engine: output
//! rate/format, resampling quality, the DSP stage mask and the per-stage
//! parameters. Changing the sample rate re-sizes the DSP delay lines; nothing
//! is ever re-rendered retroactively.

use crate::{ModmixError, Result};

/// Resampling strategy used by the mixer inner loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplingMode {
    /// Nearest-neighbour (no interpolation)
    Nearest,
    /// 2-tap linear interpolation
    #[default]
    Linear,
    /// 4-tap cubic spline via lookup table
    Spline,
    /// 8-tap windowed-sinc FIR via lookup table
    Fir,
}

/// Output sample width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Unsigned 8-bit
    Bits8,
    /// Signed 16-bit little-endian
    #[default]
    Bits16,
    /// Signed 24-bit little-endian
    Bits24,
    /// Signed 32-bit little-endian
    Bits32,
}

impl OutputFormat {
    /// Bytes per single sample point
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            OutputFormat::Bits8 => 1,
            OutputFormat::Bits16 => 2,
            OutputFormat::Bits24 => 3,
            OutputFormat::Bits32 => 4,
        }
    }
}

bitflags::bitflags! {
    /// Global DSP stage enable mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DspFlags: u32 {
        /// Multi-tap comb reverb
        const REVERB = 0x01;
        /// Pro-Logic style surround encode
        const SURROUND = 0x02;
        /// Low-pass sidechain bass expansion
        const MEGABASS = 0x04;
        /// 1-pole noise reduction
        const NOISE_REDUCTION = 0x08;
    }
}

/// Reverb parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverbParams {
    /// Wet level, 0..=100
    pub depth: u32,
    /// Base delay in milliseconds, 40..=250
    pub delay_ms: u32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            depth: 30,
            delay_ms: 100,
        }
    }
}

/// Bass expansion parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BassParams {
    /// Boost amount, 0..=100
    pub depth: u32,
    /// Cutoff range in Hz, 10..=100
    pub range_hz: u32,
}

impl Default for BassParams {
    fn default() -> Self {
        Self {
            depth: 50,
            range_hz: 50,
        }
    }
}

/// Surround parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurroundParams {
    /// Rear level, 0..=100
    pub depth: u32,
    /// Rear delay in milliseconds, 5..=40
    pub delay_ms: u32,
}

impl Default for SurroundParams {
    fn default() -> Self {
        Self {
            depth: 50,
            delay_ms: 20,
        }
    }
}

/// Complete mixer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerSettings {
    /// Output sample rate in Hz (4000..=192000)
    pub sample_rate: u32,
    /// Output channel count (1 = mono, 2 = stereo)
    pub channels: u32,
    /// Output sample width
    pub format: OutputFormat,
    /// Resampling strategy
    pub resampling: ResamplingMode,
    /// Enabled DSP stages
    pub dsp: DspFlags,
    /// Reverb stage parameters
    pub reverb: ReverbParams,
    /// Bass expansion parameters
    pub bass: BassParams,
    /// Surround parameters
    pub surround: SurroundParams,
    /// Maximum simultaneously mixed voices (lowest-volume voices beyond
    /// this advance silently)
    pub max_mix_channels: u32,
    /// Master volume, 0..=512, 128 = unity
    pub master_volume: u32,
    /// How many times a backward loop is honoured before the song ends.
    /// 0 plays the song once.
    pub repeat_count: u32,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            format: OutputFormat::Bits16,
            resampling: ResamplingMode::Linear,
            dsp: DspFlags::empty(),
            reverb: ReverbParams::default(),
            bass: BassParams::default(),
            surround: SurroundParams::default(),
            max_mix_channels: 32,
            master_volume: 128,
            repeat_count: 0,
        }
    }
}

impl MixerSettings {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ModmixError::ConfigError` when a field is out of its
    /// documented range.
    pub fn validate(&self) -> Result<()> {
        if !(4000..=192_000).contains(&self.sample_rate) {
            return Err(ModmixError::ConfigError(format!(
                "sample rate {} out of range 4000..=192000",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(ModmixError::ConfigError(format!(
                "channel count {} not supported (1 or 2)",
                self.channels
            )));
        }
        if self.max_mix_channels == 0 {
            return Err(ModmixError::ConfigError(
                "max_mix_channels must be at least 1".to_string(),
            ));
        }
        if self.master_volume > 512 {
            return Err(ModmixError::ConfigError(format!(
                "master volume {} out of range 0..=512",
                self.master_volume
            )));
        }
        Ok(())
    }

    /// Bytes per output frame (all channels)
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Volume ramp length in samples, derived from the sample rate
    /// (roughly two milliseconds, never less than 16 samples)
    #[inline]
    pub fn ramp_length(&self) -> u32 {
        (self.sample_rate / 512).max(16)
    }
}
