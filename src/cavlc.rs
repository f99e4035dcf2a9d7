// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The CAVLC run-level codec over one quantised coefficient block.
//!
//! One engine instance codes one block at a time. Its context inputs are
//! the block mode (which fixes the zig-zag scan and coefficient capacity),
//! the neighbourhood coefficient count that selects the coeff_token table,
//! and the DC-skip flag that removes the DC position from the scan when the
//! macroblock codes its DC coefficients separately. Its context output is
//! the coefficient count of the last block coded, which the caller feeds
//! back into the neighbourhood.
//!
//! Any failure leaves the stream cursor at the point it was reached, so a
//! caller can tell how much of a macroblock survived.

use arrayvec::ArrayVec;

use crate::bitstream::{BitReader, BitWriter, FieldOrder};
use crate::golomb::{read_exp_golomb_prefix, write_exp_golomb_prefix};
use crate::vlc::{
    decode_coeff_token, decode_run_before, decode_total_zeros, encode_coeff_token,
    encode_run_before, encode_total_zeros,
};
use crate::{Error, Result};

/// Zig-zag permutations: scan order position -> raster position.
pub const ZIGZAG_2X2: [usize; 4] = [0, 1, 2, 3];

pub const ZIGZAG_4X4: [usize; 16] = [
    0, 1, 4, 8, //
    5, 2, 3, 6, //
    9, 12, 13, 10, //
    7, 11, 14, 15,
];

pub const ZIGZAG_8X8: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, //
    17, 24, 32, 25, 18, 11, 4, 5, //
    12, 19, 26, 33, 40, 48, 41, 34, //
    27, 20, 13, 6, 7, 14, 21, 28, //
    35, 42, 49, 56, 57, 50, 43, 36, //
    29, 22, 15, 23, 30, 37, 44, 51, //
    58, 59, 52, 45, 38, 31, 39, 46, //
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// Block shape handled by one codec configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CavlcMode {
    /// 2x2 chroma DC block.
    Cavlc2x2,
    /// The ordinary 4x4 block.
    Cavlc4x4,
    /// 8x8 coefficient grid (no Baseline use, kept for the scan tables).
    Cavlc8x8,
}

impl CavlcMode {
    fn zigzag(self) -> &'static [usize] {
        match self {
            CavlcMode::Cavlc2x2 => &ZIGZAG_2X2,
            CavlcMode::Cavlc4x4 => &ZIGZAG_4X4,
            CavlcMode::Cavlc8x8 => &ZIGZAG_8X8,
        }
    }

    fn max_num_coeff(self) -> usize {
        match self {
            CavlcMode::Cavlc2x2 => 4,
            CavlcMode::Cavlc4x4 => 16,
            CavlcMode::Cavlc8x8 => 64,
        }
    }

    /// The total_zeros table family: the chroma DC block has its own.
    fn total_zeros_family(self) -> u32 {
        match self {
            CavlcMode::Cavlc2x2 => 4,
            _ => 16,
        }
    }
}

/// Split a level code into (prefix, suffix, suffix size) under the adaptive
/// suffix length.
///
/// Three regimes: the plain split while the prefix stays under 14; the
/// escape at prefix 14 with a four-bit suffix for the first large trailing
/// levels (codes 14..=29 at suffix length zero); and the expanding regime
/// at prefix >= 15 where the suffix grows with the prefix and each range
/// is offset to save a bit. The prefix is hard-capped below 35.
fn split_level_code(mut level_code: i32, suffix_length: u32) -> (u32, u32, u32) {
    if suffix_length == 0 && (14..=29).contains(&level_code) {
        return (14, (level_code as u32 - 14) & 0xf, 4);
    }

    let max_level_code = (14 << suffix_length) + ((1 << suffix_length) - 1);
    if level_code <= max_level_code {
        let prefix = (level_code >> suffix_length) as u32;
        let suffix = (level_code as u32) & ((1 << suffix_length) - 1);
        return (prefix, suffix, suffix_length);
    }

    // Large codes: drop the range already covered by prefixes below 15,
    // then climb octaves. Each range's minimum is subtracted to save a bit.
    level_code -= 15 << suffix_length;
    if suffix_length == 0 {
        level_code -= 15;
    }
    let mut prefix = 15u32;
    while level_code as i64 >= (1i64 << (prefix - 2)) - 4096 && prefix < 35 {
        prefix += 1;
    }
    if prefix >= 16 {
        level_code -= (1 << (prefix - 3)) - 4096;
    }
    let suffix_size = prefix - 3;
    let suffix = (level_code as u32) & (((1u64 << suffix_size) - 1) as u32);
    (prefix, suffix, suffix_size)
}

/// Reassemble a level code from its prefix and suffix.
///
/// Widened arithmetic: a hostile stream can drive the prefix to 34, where
/// the range offset no longer fits in 32 bits. The wrap on the way back
/// down matches what the coefficient store does anyway.
fn join_level_code(prefix: u32, suffix: u32, suffix_length: u32) -> i32 {
    let mut level_code: i64 = if prefix < 15 {
        ((prefix << suffix_length) + suffix) as i64
    } else {
        ((15 << suffix_length) + suffix) as i64
    };
    if prefix >= 15 && suffix_length == 0 {
        level_code += 15;
    }
    if prefix >= 16 {
        level_code += (1i64 << (prefix - 3)) - 4096;
    }
    level_code as i32
}

/// The suffix size the decoder must read for a given prefix.
fn suffix_size_for(prefix: u32, suffix_length: u32) -> u32 {
    if prefix >= 15 {
        prefix - 3
    } else if prefix == 14 && suffix_length == 0 {
        4
    } else {
        suffix_length
    }
}

/// Bump the adaptive suffix length after coding a level.
#[inline]
fn adapt_suffix_length(suffix_length: &mut u32, level: i32) {
    if *suffix_length == 0 {
        *suffix_length = 1;
    }
    if level.unsigned_abs() > (3 << (*suffix_length - 1)) && *suffix_length < 6 {
        *suffix_length += 1;
    }
}

/// A context-aware CAVLC codec for one block shape.
pub struct Cavlc {
    mode: CavlcMode,
    num_tot_neighbour_coeff: i32,
    dc_skip: usize,
    num_coeffs: u32,
}

impl Cavlc {
    pub fn new(mode: CavlcMode) -> Self {
        Self {
            mode,
            num_tot_neighbour_coeff: 0,
            dc_skip: 0,
            num_coeffs: 0,
        }
    }

    pub fn set_mode(&mut self, mode: CavlcMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> CavlcMode {
        self.mode
    }

    /// Neighbourhood coefficient count nC; -1 and -2 select the chroma DC
    /// tables.
    pub fn set_num_neighbour_coeffs(&mut self, nc: i32) {
        self.num_tot_neighbour_coeff = nc;
    }

    pub fn num_neighbour_coeffs(&self) -> i32 {
        self.num_tot_neighbour_coeff
    }

    /// Skip the DC position of the scan (it is coded in a separate block).
    pub fn set_dc_skip(&mut self, dc_skip: bool) {
        self.dc_skip = dc_skip as usize;
    }

    pub fn dc_skip(&self) -> bool {
        self.dc_skip != 0
    }

    /// Coefficient count of the last encode or decode.
    pub fn num_coeffs(&self) -> u32 {
        self.num_coeffs
    }

    /// Encode one block of quantised coefficients; returns the bits written.
    pub fn encode<O: FieldOrder>(
        &mut self,
        coeffs: &[i16],
        w: &mut BitWriter<'_, O>,
    ) -> Result<usize> {
        let zigzag = self.mode.zigzag();
        let max = self.mode.max_num_coeff();
        debug_assert!(coeffs.len() >= max);

        // Reverse zig-zag scan: highest frequency first, trailing zeros
        // ignored, zeros at the low end counted into total_zeros.
        let mut level = ArrayVec::<i32, 64>::new();
        let mut run_before = ArrayVec::<u32, 64>::new();
        let mut sign_flags = [false; 3];
        let mut trailing_ones = 0usize;
        let mut total_zeros = 0u32;
        let mut count = 0u32;
        for i in (self.dc_skip..max).rev() {
            let x = coeffs[zigzag[i]] as i32;
            if !level.is_empty() {
                if x == 0 {
                    count += 1;
                    total_zeros += 1;
                } else {
                    run_before.push(count);
                    count = 0;
                    level.push(x);
                    if trailing_ones < 3 && trailing_ones == level.len() - 1 && (x == 1 || x == -1)
                    {
                        sign_flags[trailing_ones] = x == -1;
                        trailing_ones += 1;
                    }
                }
            } else if x != 0 {
                level.push(x);
                if x == 1 || x == -1 {
                    sign_flags[0] = x == -1;
                    trailing_ones = 1;
                }
            }
        }
        let total_coeff = level.len();

        let mut total_bits = encode_coeff_token(
            w,
            total_coeff as u32,
            trailing_ones as u32,
            self.num_tot_neighbour_coeff,
        )?;

        if total_coeff > 0 {
            let mut suffix_length = 0u32;
            if total_coeff > 10 && trailing_ones < 3 {
                suffix_length = 1;
            }

            for (i, &lvl) in level.iter().enumerate() {
                if i < trailing_ones {
                    w.write_bit(sign_flags[i])?;
                    total_bits += 1;
                    continue;
                }

                // Levels map to even (positive) / odd (negative) codes; the
                // first non-trailing-one drops by two when fewer than three
                // trailing ones were signalled.
                let mut level_code = if lvl > 0 { 2 * lvl - 2 } else { -(2 * lvl + 1) };
                if i == trailing_ones && trailing_ones < 3 {
                    level_code -= 2;
                }

                let (prefix, suffix, suffix_size) = split_level_code(level_code, suffix_length);
                if w.bits_remaining() < (prefix as usize + 1) + suffix_size as usize {
                    return Err(Error::StreamAccessDenied);
                }
                total_bits += write_exp_golomb_prefix(w, prefix)?;
                if suffix_size > 0 {
                    w.write_bits(suffix_size, suffix)?;
                    total_bits += suffix_size as usize;
                }

                adapt_suffix_length(&mut suffix_length, lvl);
            }

            // total_zeros, unless every scan position carries a coefficient.
            let mut zeros_left = total_zeros;
            if total_coeff < max - self.dc_skip {
                total_bits += encode_total_zeros(
                    w,
                    total_zeros,
                    total_coeff as u32,
                    self.mode.total_zeros_family(),
                )?;

                for &run in run_before.iter() {
                    if zeros_left == 0 {
                        break;
                    }
                    total_bits += encode_run_before(w, run, zeros_left)?;
                    zeros_left -= run;
                }
            }
        }

        self.num_coeffs = total_coeff as u32;
        Ok(total_bits)
    }

    /// Decode one block from the stream; returns the bits consumed.
    ///
    /// The output array is cleared first, so only non-zero coefficients are
    /// written through the zig-zag table.
    pub fn decode<O: FieldOrder>(
        &mut self,
        r: &mut BitReader<'_, O>,
        coeffs: &mut [i16],
    ) -> Result<usize> {
        let zigzag = self.mode.zigzag();
        let max = self.mode.max_num_coeff();
        debug_assert!(coeffs.len() >= max);
        coeffs[..max].iter_mut().for_each(|c| *c = 0);

        if r.bits_remaining() == 0 {
            return Err(Error::StreamAccessDenied);
        }
        let (total_coeff, trailing_ones, mut total_bits) =
            decode_coeff_token(r, self.num_tot_neighbour_coeff)?;
        let total_coeff = total_coeff as usize;

        if total_coeff > 0 {
            let mut level = ArrayVec::<i32, 64>::new();
            let mut suffix_length = 0u32;
            if total_coeff > 10 && trailing_ones < 3 {
                suffix_length = 1;
            }

            for i in 0..total_coeff {
                if (i as u32) < trailing_ones {
                    let sign = r.read_bit()?;
                    total_bits += 1;
                    level.push(1 - 2 * sign as i32);
                    continue;
                }

                let prefix = read_exp_golomb_prefix(r)?;
                total_bits += prefix as usize + 1;
                if prefix >= 35 {
                    return Err(Error::VlcSymbolNotRecognised);
                }

                let suffix_size = suffix_size_for(prefix, suffix_length);
                let suffix = if suffix_size > 0 {
                    let s = r.read_bits(suffix_size)?;
                    total_bits += suffix_size as usize;
                    s
                } else {
                    0
                };

                let mut level_code = join_level_code(prefix, suffix, suffix_length);
                if i as u32 == trailing_ones && trailing_ones < 3 {
                    level_code += 2;
                }

                let lvl = if level_code & 1 != 0 {
                    (-level_code - 1) >> 1
                } else {
                    (level_code + 2) >> 1
                };
                level.push(lvl);

                adapt_suffix_length(&mut suffix_length, lvl);
            }

            let mut zeros_left = 0u32;
            if total_coeff < max - self.dc_skip {
                let (tz, bits) =
                    decode_total_zeros(r, total_coeff as u32, self.mode.total_zeros_family())?;
                total_bits += bits;
                zeros_left = tz;
            }

            // Explicit runs for all but the lowest-frequency coefficient;
            // its run is whatever zeros remain.
            let mut run_before = ArrayVec::<u32, 64>::new();
            for _ in 0..total_coeff - 1 {
                let mut run = 0;
                if zeros_left > 0 {
                    let (rb, bits) = decode_run_before(r, zeros_left)?;
                    total_bits += bits;
                    run = rb;
                }
                run_before.push(run);
                zeros_left -= run;
            }
            run_before.push(zeros_left);

            // Place levels lowest frequency first, walking runs forward.
            let mut coeff_num: i32 = -1;
            for i in (0..total_coeff).rev() {
                coeff_num += run_before[i] as i32 + 1;
                let pos = coeff_num as usize + self.dc_skip;
                if pos >= max {
                    return Err(Error::VlcSymbolNotRecognised);
                }
                coeffs[zigzag[pos]] = level[i] as i16;
            }
        }

        self.num_coeffs = total_coeff as u32;
        Ok(total_bits)
    }
}
