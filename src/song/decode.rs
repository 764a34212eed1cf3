//! Raw PCM sample decoding
//!
//! Module formats store sample data in a zoo of encodings: signed/unsigned,
//! 8/16-bit, little/big endian, delta-coded, nibble-ADPCM and the bit-packed
//! delta scheme used by later trackers. `decode_sample` turns any of them
//! into the engine's internal signed 16-bit buffer and reports how many
//! input bytes it consumed, so loaders can walk a file sequentially.
//!
//! 8-bit sources are widened by a left shift of 8. Decoding never fails;
//! truncated input yields a truncated (but safe) sample.

use super::sample::{Sample, SampleFlags};

/// Source encodings understood by `decode_sample`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Signed 8-bit PCM
    Signed8,
    /// Unsigned 8-bit PCM
    Unsigned8,
    /// 8-bit delta-coded PCM
    Delta8,
    /// Signed 16-bit little-endian PCM
    Signed16Le,
    /// Unsigned 16-bit little-endian PCM
    Unsigned16Le,
    /// Signed 16-bit big-endian PCM
    Signed16Be,
    /// 16-bit little-endian delta-coded PCM
    Delta16,
    /// 16-bit PCM built from per-byte deltas on the high byte
    ByteDelta16,
    /// 4-bit table-driven ADPCM with a 16-byte table header
    Adpcm4,
    /// Bit-packed delta, 8-bit samples
    ItPacked8 {
        /// Second delta pass (2.15 variant)
        double_delta: bool,
    },
    /// Bit-packed delta, 16-bit samples
    ItPacked16 {
        /// Second delta pass (2.15 variant)
        double_delta: bool,
    },
    /// Stereo interleaved signed 8-bit (LRLR...)
    StereoInterleaved8,
    /// Stereo interleaved signed 16-bit little-endian
    StereoInterleaved16,
    /// Stereo split signed 8-bit (all left, then all right)
    StereoSplit8,
    /// Stereo split signed 16-bit little-endian
    StereoSplit16,
}

/// Decode `bytes` into the sample's PCM buffer.
///
/// The caller must have set `sample.length` (frames) and the `STEREO` flag
/// before decoding. Returns the number of input bytes consumed; on
/// truncated input the sample is shortened accordingly.
pub fn decode_sample(sample: &mut Sample, encoding: SampleEncoding, bytes: &[u8]) -> usize {
    let frames = sample.length as usize;
    let (pcm, consumed) = match encoding {
        SampleEncoding::Signed8 => decode_8(bytes, frames, |b| b as i8 as i16),
        SampleEncoding::Unsigned8 => decode_8(bytes, frames, |b| (b as i16) - 128),
        SampleEncoding::Delta8 => {
            let n = frames.min(bytes.len());
            let mut acc = 0i8;
            let mut out = Vec::with_capacity(n);
            for &b in &bytes[..n] {
                acc = acc.wrapping_add(b as i8);
                out.push((acc as i16) << 8);
            }
            (out, n)
        }
        SampleEncoding::Signed16Le => decode_16(bytes, frames, |lo, hi| {
            i16::from_le_bytes([lo, hi])
        }),
        SampleEncoding::Unsigned16Le => decode_16(bytes, frames, |lo, hi| {
            (u16::from_le_bytes([lo, hi]) as i32 - 0x8000) as i16
        }),
        SampleEncoding::Signed16Be => decode_16(bytes, frames, |hi, lo| {
            i16::from_be_bytes([hi, lo])
        }),
        SampleEncoding::Delta16 => {
            let n = frames.min(bytes.len() / 2);
            let mut acc = 0i16;
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                let d = i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
                acc = acc.wrapping_add(d);
                out.push(acc);
            }
            (out, n * 2)
        }
        SampleEncoding::ByteDelta16 => {
            // low byte stored raw, high byte delta-coded against the
            // previous frame's high byte
            let n = frames.min(bytes.len() / 2);
            let mut hi = 0u8;
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                let lo = bytes[i * 2];
                hi = hi.wrapping_add(bytes[i * 2 + 1]);
                out.push(i16::from_le_bytes([lo, hi]));
            }
            (out, n * 2)
        }
        SampleEncoding::Adpcm4 => decode_adpcm4(bytes, frames),
        SampleEncoding::ItPacked8 { double_delta } => {
            let (out, used) = it_unpack(bytes, frames, false, double_delta);
            (out, used)
        }
        SampleEncoding::ItPacked16 { double_delta } => {
            let (out, used) = it_unpack(bytes, frames, true, double_delta);
            (out, used)
        }
        SampleEncoding::StereoInterleaved8 => {
            let n = (frames * 2).min(bytes.len());
            let out = bytes[..n].iter().map(|&b| (b as i8 as i16) << 8).collect();
            (out, n)
        }
        SampleEncoding::StereoInterleaved16 => {
            let n = (frames * 2).min(bytes.len() / 2);
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                out.push(i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]));
            }
            (out, n * 2)
        }
        SampleEncoding::StereoSplit8 => {
            let n = frames.min(bytes.len() / 2);
            let mut out = Vec::with_capacity(n * 2);
            for i in 0..n {
                out.push((bytes[i] as i8 as i16) << 8);
                out.push((bytes[n + i] as i8 as i16) << 8);
            }
            (out, n * 2)
        }
        SampleEncoding::StereoSplit16 => {
            let n = frames.min(bytes.len() / 4);
            let mut out = Vec::with_capacity(n * 2);
            for i in 0..n {
                out.push(i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]));
                let r = (n + i) * 2;
                out.push(i16::from_le_bytes([bytes[r], bytes[r + 1]]));
            }
            (out, n * 4)
        }
    };

    let stereo = sample.flags.contains(SampleFlags::STEREO);
    let expected_points = frames * if stereo { 2 } else { 1 };
    debug_assert!(pcm.len() <= expected_points || expected_points == 0);
    sample.set_pcm(pcm);
    consumed
}

fn decode_8(bytes: &[u8], frames: usize, f: impl Fn(u8) -> i16) -> (Vec<i16>, usize) {
    let n = frames.min(bytes.len());
    (bytes[..n].iter().map(|&b| f(b) << 8).collect(), n)
}

fn decode_16(bytes: &[u8], frames: usize, f: impl Fn(u8, u8) -> i16) -> (Vec<i16>, usize) {
    let n = frames.min(bytes.len() / 2);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(f(bytes[i * 2], bytes[i * 2 + 1]));
    }
    (out, n * 2)
}

/// 4-bit ADPCM: 16-byte signed delta table, then two frames per byte
fn decode_adpcm4(bytes: &[u8], frames: usize) -> (Vec<i16>, usize) {
    if bytes.len() < 16 {
        return (Vec::new(), bytes.len());
    }
    let table = &bytes[..16];
    let packed = &bytes[16..];
    let n = frames.min(packed.len() * 2);
    let mut acc = 0i8;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let byte = packed[i / 2];
        let nibble = if i & 1 == 0 { byte & 0x0F } else { byte >> 4 };
        acc = acc.wrapping_add(table[nibble as usize] as i8);
        out.push((acc as i16) << 8);
    }
    (out, 16 + n.div_ceil(2))
}

/// LSB-first bit reader over a byte slice
struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    fn exhausted(&self) -> bool {
        self.byte_pos >= self.data.len()
    }

    fn read(&mut self, bits: u32) -> u32 {
        let mut value = 0u32;
        for i in 0..bits {
            if self.exhausted() {
                break;
            }
            let bit = (self.data[self.byte_pos] >> self.bit_pos) & 1;
            value |= (bit as u32) << i;
            self.bit_pos += 1;
            if self.bit_pos == 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
        }
        value
    }
}

/// Unpack bit-packed delta sample data (the scheme later trackers use for
/// compressed samples). Works block-wise; each block starts with a 16-bit
/// packed-size header and resets the bit width and accumulators.
fn it_unpack(bytes: &[u8], frames: usize, wide: bool, double_delta: bool) -> (Vec<i16>, usize) {
    let block_frames = if wide { 0x4000 } else { 0x8000 };
    let max_width: u32 = if wide { 17 } else { 9 };
    let mut out: Vec<i16> = Vec::with_capacity(frames);
    let mut pos = 0usize;
    let mut remaining = frames;

    while remaining > 0 && pos + 2 <= bytes.len() {
        let packed_len = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        pos += 2;
        let block_end = (pos + packed_len).min(bytes.len());
        let mut reader = BitReader::new(&bytes[pos..block_end]);

        let want = remaining.min(block_frames);
        let mut width = max_width;
        let mut acc = 0i32; // first integration
        let mut acc2 = 0i32; // second integration (2.15 variant)
        let mut produced = 0usize;

        while produced < want && !reader.exhausted() {
            let value = reader.read(width);

            // width-change escapes, three regimes as in the original scheme
            if width < 7 {
                if value == 1 << (width - 1) {
                    let new_w = reader.read(3) + 1;
                    width = if new_w < width { new_w } else { new_w + 1 };
                    continue;
                }
            } else if width < max_width {
                let border = (((1u32 << (max_width - 1)) - 1) >> (max_width - width))
                    .wrapping_sub(if wide { 8 } else { 4 });
                if value > border && value <= border + (if wide { 16 } else { 8 }) {
                    let new_w = value - border;
                    width = if new_w < width { new_w } else { new_w + 1 };
                    continue;
                }
            } else if value & (1 << (max_width - 1)) != 0 {
                let new_w = ((value + 1) & 0xFF) as u32;
                if new_w >= 1 && new_w <= max_width {
                    width = new_w;
                    continue;
                }
                // invalid escape: treat as literal zero delta
                continue;
            }

            // sign-extend to `width` bits
            let shift = 32 - width;
            let delta = ((value << shift) as i32) >> shift;
            acc = acc.wrapping_add(delta);
            let v = if double_delta {
                acc2 = acc2.wrapping_add(acc);
                acc2
            } else {
                acc
            };
            out.push(if wide {
                v as i16
            } else {
                ((v as i8) as i16) << 8
            });
            produced += 1;
        }

        // a short block still counts as fully consumed
        while produced < want {
            out.push(0);
            produced += 1;
        }

        pos = block_end;
        remaining -= want;
    }

    (out, pos)
}
