// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The total_zeros VLC: zeros spanned below the highest non-zero coefficient.
//!
//! Rec. H.264 (03/2005) Tables 9-7 and 9-8 for 4x4 blocks (one sub-table per
//! total coefficient count 1..=15) and Table 9-9 (a) for the 2x2 chroma DC
//! block (sub-tables for 1..=3 coefficients). The symbol range shrinks as
//! the coefficient count grows, so the sub-tables are ragged.

use crate::bitstream::{BitReader, BitWriter, FieldOrder};
use crate::vlc::{read_indexed, write_indexed, Code};
use crate::{Error, Result};

/// Sub-tables for 4x4 blocks, indexed by `total_coeffs - 1`; within a
/// sub-table the index is the total_zeros value.
const TOTAL_ZEROS_4X4: [&[Code]; 15] = [
    // total_coeffs == 1
    &[
        (0b1, 1),
        (0b011, 3),
        (0b010, 3),
        (0b0011, 4),
        (0b0010, 4),
        (0b00011, 5),
        (0b00010, 5),
        (0b000011, 6),
        (0b000010, 6),
        (0b0000011, 7),
        (0b0000010, 7),
        (0b00000011, 8),
        (0b00000010, 8),
        (0b000000011, 9),
        (0b000000010, 9),
        (0b000000001, 9),
    ],
    // total_coeffs == 2
    &[
        (0b111, 3),
        (0b110, 3),
        (0b101, 3),
        (0b100, 3),
        (0b011, 3),
        (0b0101, 4),
        (0b0100, 4),
        (0b0011, 4),
        (0b0010, 4),
        (0b00011, 5),
        (0b00010, 5),
        (0b000011, 6),
        (0b000010, 6),
        (0b000001, 6),
        (0b000000, 6),
    ],
    // total_coeffs == 3
    &[
        (0b0101, 4),
        (0b111, 3),
        (0b110, 3),
        (0b101, 3),
        (0b0100, 4),
        (0b0011, 4),
        (0b100, 3),
        (0b011, 3),
        (0b0010, 4),
        (0b00011, 5),
        (0b00010, 5),
        (0b000001, 6),
        (0b00001, 5),
        (0b000000, 6),
    ],
    // total_coeffs == 4
    &[
        (0b00011, 5),
        (0b111, 3),
        (0b0101, 4),
        (0b0100, 4),
        (0b110, 3),
        (0b101, 3),
        (0b100, 3),
        (0b0011, 4),
        (0b011, 3),
        (0b0010, 4),
        (0b00010, 5),
        (0b00001, 5),
        (0b00000, 5),
    ],
    // total_coeffs == 5
    &[
        (0b0101, 4),
        (0b0100, 4),
        (0b0011, 4),
        (0b111, 3),
        (0b110, 3),
        (0b101, 3),
        (0b100, 3),
        (0b011, 3),
        (0b0010, 4),
        (0b00001, 5),
        (0b0001, 4),
        (0b00000, 5),
    ],
    // total_coeffs == 6
    &[
        (0b000001, 6),
        (0b00001, 5),
        (0b111, 3),
        (0b110, 3),
        (0b101, 3),
        (0b100, 3),
        (0b011, 3),
        (0b010, 3),
        (0b0001, 4),
        (0b001, 3),
        (0b000000, 6),
    ],
    // total_coeffs == 7
    &[
        (0b000001, 6),
        (0b00001, 5),
        (0b101, 3),
        (0b100, 3),
        (0b011, 3),
        (0b11, 2),
        (0b010, 3),
        (0b0001, 4),
        (0b001, 3),
        (0b000000, 6),
    ],
    // total_coeffs == 8
    &[
        (0b000001, 6),
        (0b0001, 4),
        (0b00001, 5),
        (0b011, 3),
        (0b11, 2),
        (0b10, 2),
        (0b010, 3),
        (0b001, 3),
        (0b000000, 6),
    ],
    // total_coeffs == 9
    &[
        (0b000001, 6),
        (0b000000, 6),
        (0b0001, 4),
        (0b11, 2),
        (0b10, 2),
        (0b001, 3),
        (0b01, 2),
        (0b00001, 5),
    ],
    // total_coeffs == 10
    &[
        (0b00001, 5),
        (0b00000, 5),
        (0b001, 3),
        (0b11, 2),
        (0b10, 2),
        (0b01, 2),
        (0b0001, 4),
    ],
    // total_coeffs == 11
    &[
        (0b0000, 4),
        (0b0001, 4),
        (0b001, 3),
        (0b010, 3),
        (0b1, 1),
        (0b011, 3),
    ],
    // total_coeffs == 12
    &[(0b0000, 4), (0b0001, 4), (0b01, 2), (0b1, 1), (0b001, 3)],
    // total_coeffs == 13
    &[(0b000, 3), (0b001, 3), (0b1, 1), (0b01, 2)],
    // total_coeffs == 14
    &[(0b00, 2), (0b01, 2), (0b1, 1)],
    // total_coeffs == 15
    &[(0b0, 1), (0b1, 1)],
];

/// Sub-tables for the 2x2 chroma DC block, indexed by `total_coeffs - 1`.
const TOTAL_ZEROS_2X2: [&[Code]; 3] = [
    &[(0b1, 1), (0b01, 2), (0b001, 3), (0b000, 3)],
    &[(0b1, 1), (0b01, 2), (0b00, 2)],
    &[(0b1, 1), (0b0, 1)],
];

fn sub_table(total_coeffs: u32, max_num_coeff: u32) -> Result<&'static [Code]> {
    let idx = total_coeffs.wrapping_sub(1) as usize;
    match max_num_coeff {
        4 => TOTAL_ZEROS_2X2.get(idx),
        16 => TOTAL_ZEROS_4X4.get(idx),
        _ => None,
    }
    .copied()
    .ok_or(Error::VlcSymbolNotRecognised)
}

/// Encode total_zeros under its context.
///
/// `total_coeffs` selects the sub-table; `max_num_coeff` (4 for the chroma
/// DC block, 16 otherwise) selects the table family. Returns bits written.
pub fn encode_total_zeros<O: FieldOrder>(
    w: &mut BitWriter<'_, O>,
    total_zeros: u32,
    total_coeffs: u32,
    max_num_coeff: u32,
) -> Result<usize> {
    let table = sub_table(total_coeffs, max_num_coeff)?;
    write_indexed(w, table, total_zeros as usize)
}

/// Decode total_zeros under its context. Returns (total_zeros, bits).
pub fn decode_total_zeros<O: FieldOrder>(
    r: &mut BitReader<'_, O>,
    total_coeffs: u32,
    max_num_coeff: u32,
) -> Result<(u32, usize)> {
    let table = sub_table(total_coeffs, max_num_coeff)?;
    let (symbol, bits) = read_indexed(r, table)?;
    Ok((symbol as u32, bits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::Msb0;
    use crate::vlc::table_checks::assert_prefix_free;

    #[test]
    fn test_tables_are_prefix_free() {
        for (i, t) in TOTAL_ZEROS_4X4.iter().enumerate() {
            assert_prefix_free(&format!("TOTAL_ZEROS_4X4[{i}]"), t);
        }
        for (i, t) in TOTAL_ZEROS_2X2.iter().enumerate() {
            assert_prefix_free(&format!("TOTAL_ZEROS_2X2[{i}]"), t);
        }
    }

    #[test]
    fn test_symbol_ranges() {
        // A block with tc non-zero coefficients has at most 16 - tc zeros
        // below the top one (4 - tc for chroma DC), so each sub-table has
        // exactly that many symbols plus one.
        for tc in 1..=15 {
            assert_eq!(TOTAL_ZEROS_4X4[tc - 1].len(), 16 - tc + 1);
        }
        for tc in 1..=3 {
            assert_eq!(TOTAL_ZEROS_2X2[tc - 1].len(), 4 - tc + 1);
        }
    }

    #[test]
    fn test_roundtrip_full_domain() {
        for (max_num_coeff, max_tc) in [(16u32, 15u32), (4, 3)] {
            for tc in 1..=max_tc {
                for tz in 0..=(max_num_coeff - tc) {
                    let mut buf = [0u8; 4];
                    let enc_bits = {
                        let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
                        encode_total_zeros(&mut w, tz, tc, max_num_coeff).unwrap()
                    };
                    let mut r: BitReader<Msb0> = BitReader::new(&buf);
                    let (dec, bits) = decode_total_zeros(&mut r, tc, max_num_coeff).unwrap();
                    assert_eq!((dec, bits), (tz, enc_bits));
                }
            }
        }
    }

    #[test]
    fn test_known_codewords() {
        // Spot values straight from Table 9-7: one coefficient and no zeros
        // is the single bit 1; one coefficient and 15 zeros is 000000001.
        let mut buf = [0u8; 2];
        {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
            assert_eq!(encode_total_zeros(&mut w, 0, 1, 16).unwrap(), 1);
        }
        assert_eq!(buf[0] >> 7, 1);
        {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
            assert_eq!(encode_total_zeros(&mut w, 15, 1, 16).unwrap(), 9);
        }
        assert_eq!(buf[0], 0b0000_0000);
        assert_eq!(buf[1] & 0b1000_0000, 0b1000_0000);
    }

    #[test]
    fn test_out_of_domain() {
        let mut buf = [0u8; 4];
        let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
        // 16 coefficients leave no zeros to signal.
        assert_eq!(
            encode_total_zeros(&mut w, 0, 16, 16),
            Err(Error::VlcSymbolNotRecognised)
        );
        // Run longer than the block.
        assert_eq!(
            encode_total_zeros(&mut w, 16, 1, 16),
            Err(Error::VlcSymbolNotRecognised)
        );
    }
}
