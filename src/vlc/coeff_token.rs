// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The coeff_token VLC: (total coefficients, trailing ones) joint codes.
//!
//! Rec. H.264 (03/2005) Table 9-5. The codeword set is selected by the
//! neighbourhood coefficient count nC: four stored tables for increasingly
//! busy luma neighbourhoods, a computed 6-bit pattern for nC >= 8, and two
//! small tables for the chroma DC blocks (nC of -1 for 4:2:0 and -2 for
//! 4:2:2). Within the computed table the first four bits carry
//! total_coeffs - 1 and the last two trailing_ones; the one impossible
//! combination (1, 3) re-encodes (0, 0).

use crate::bitstream::{BitReader, BitWriter, FieldOrder};
use crate::{Error, Result};

/// One joint codeword.
struct CoeffTokenCode {
    code: u16,
    len: u8,
    total_coeffs: u8,
    trailing_ones: u8,
}

const fn ct(code: u16, len: u8, total_coeffs: u8, trailing_ones: u8) -> CoeffTokenCode {
    CoeffTokenCode { code, len, total_coeffs, trailing_ones }
}

const NC_0_TO_1: [CoeffTokenCode; 62] = [
    ct(0b1, 1, 0, 0),
    ct(0b000101, 6, 1, 0),
    ct(0b01, 2, 1, 1),
    ct(0b00000111, 8, 2, 0),
    ct(0b000100, 6, 2, 1),
    ct(0b001, 3, 2, 2),
    ct(0b000000111, 9, 3, 0),
    ct(0b00000110, 8, 3, 1),
    ct(0b0000101, 7, 3, 2),
    ct(0b00011, 5, 3, 3),
    ct(0b0000000111, 10, 4, 0),
    ct(0b000000110, 9, 4, 1),
    ct(0b00000101, 8, 4, 2),
    ct(0b000011, 6, 4, 3),
    ct(0b00000000111, 11, 5, 0),
    ct(0b0000000110, 10, 5, 1),
    ct(0b000000101, 9, 5, 2),
    ct(0b0000100, 7, 5, 3),
    ct(0b0000000001111, 13, 6, 0),
    ct(0b00000000110, 11, 6, 1),
    ct(0b0000000101, 10, 6, 2),
    ct(0b00000100, 8, 6, 3),
    ct(0b0000000001011, 13, 7, 0),
    ct(0b0000000001110, 13, 7, 1),
    ct(0b00000000101, 11, 7, 2),
    ct(0b000000100, 9, 7, 3),
    ct(0b0000000001000, 13, 8, 0),
    ct(0b0000000001010, 13, 8, 1),
    ct(0b0000000001101, 13, 8, 2),
    ct(0b0000000100, 10, 8, 3),
    ct(0b00000000001111, 14, 9, 0),
    ct(0b00000000001110, 14, 9, 1),
    ct(0b0000000001001, 13, 9, 2),
    ct(0b00000000100, 11, 9, 3),
    ct(0b00000000001011, 14, 10, 0),
    ct(0b00000000001010, 14, 10, 1),
    ct(0b00000000001101, 14, 10, 2),
    ct(0b0000000001100, 13, 10, 3),
    ct(0b000000000001111, 15, 11, 0),
    ct(0b000000000001110, 15, 11, 1),
    ct(0b00000000001001, 14, 11, 2),
    ct(0b00000000001100, 14, 11, 3),
    ct(0b000000000001011, 15, 12, 0),
    ct(0b000000000001010, 15, 12, 1),
    ct(0b000000000001101, 15, 12, 2),
    ct(0b00000000001000, 14, 12, 3),
    ct(0b0000000000001111, 16, 13, 0),
    ct(0b000000000000001, 15, 13, 1),
    ct(0b000000000001001, 15, 13, 2),
    ct(0b000000000001100, 15, 13, 3),
    ct(0b0000000000001011, 16, 14, 0),
    ct(0b0000000000001110, 16, 14, 1),
    ct(0b0000000000001101, 16, 14, 2),
    ct(0b000000000001000, 15, 14, 3),
    ct(0b0000000000000111, 16, 15, 0),
    ct(0b0000000000001010, 16, 15, 1),
    ct(0b0000000000001001, 16, 15, 2),
    ct(0b0000000000001100, 16, 15, 3),
    ct(0b0000000000000100, 16, 16, 0),
    ct(0b0000000000000110, 16, 16, 1),
    ct(0b0000000000000101, 16, 16, 2),
    ct(0b0000000000001000, 16, 16, 3),
];

const NC_2_TO_3: [CoeffTokenCode; 62] = [
    ct(0b11, 2, 0, 0),
    ct(0b001011, 6, 1, 0),
    ct(0b10, 2, 1, 1),
    ct(0b000111, 6, 2, 0),
    ct(0b00111, 5, 2, 1),
    ct(0b011, 3, 2, 2),
    ct(0b0000111, 7, 3, 0),
    ct(0b001010, 6, 3, 1),
    ct(0b001001, 6, 3, 2),
    ct(0b0101, 4, 3, 3),
    ct(0b00000111, 8, 4, 0),
    ct(0b000110, 6, 4, 1),
    ct(0b000101, 6, 4, 2),
    ct(0b0100, 4, 4, 3),
    ct(0b00000100, 8, 5, 0),
    ct(0b0000110, 7, 5, 1),
    ct(0b0000101, 7, 5, 2),
    ct(0b00110, 5, 5, 3),
    ct(0b000000111, 9, 6, 0),
    ct(0b00000110, 8, 6, 1),
    ct(0b00000101, 8, 6, 2),
    ct(0b001000, 6, 6, 3),
    ct(0b00000001111, 11, 7, 0),
    ct(0b000000110, 9, 7, 1),
    ct(0b000000101, 9, 7, 2),
    ct(0b000100, 6, 7, 3),
    ct(0b00000001011, 11, 8, 0),
    ct(0b00000001110, 11, 8, 1),
    ct(0b00000001101, 11, 8, 2),
    ct(0b0000100, 7, 8, 3),
    ct(0b000000001111, 12, 9, 0),
    ct(0b00000001010, 11, 9, 1),
    ct(0b00000001001, 11, 9, 2),
    ct(0b000000100, 9, 9, 3),
    ct(0b000000001011, 12, 10, 0),
    ct(0b000000001110, 12, 10, 1),
    ct(0b000000001101, 12, 10, 2),
    ct(0b00000001100, 11, 10, 3),
    ct(0b000000001000, 12, 11, 0),
    ct(0b000000001010, 12, 11, 1),
    ct(0b000000001001, 12, 11, 2),
    ct(0b00000001000, 11, 11, 3),
    ct(0b0000000001111, 13, 12, 0),
    ct(0b0000000001110, 13, 12, 1),
    ct(0b0000000001101, 13, 12, 2),
    ct(0b000000001100, 12, 12, 3),
    ct(0b0000000001011, 13, 13, 0),
    ct(0b0000000001010, 13, 13, 1),
    ct(0b0000000001001, 13, 13, 2),
    ct(0b0000000001100, 13, 13, 3),
    ct(0b0000000000111, 13, 14, 0),
    ct(0b00000000001011, 14, 14, 1),
    ct(0b0000000000110, 13, 14, 2),
    ct(0b0000000001000, 13, 14, 3),
    ct(0b00000000001001, 14, 15, 0),
    ct(0b00000000001000, 14, 15, 1),
    ct(0b00000000001010, 14, 15, 2),
    ct(0b0000000000001, 13, 15, 3),
    ct(0b00000000000111, 14, 16, 0),
    ct(0b00000000000110, 14, 16, 1),
    ct(0b00000000000101, 14, 16, 2),
    ct(0b00000000000100, 14, 16, 3),
];

const NC_4_TO_7: [CoeffTokenCode; 62] = [
    ct(0b1111, 4, 0, 0),
    ct(0b001111, 6, 1, 0),
    ct(0b1110, 4, 1, 1),
    ct(0b001011, 6, 2, 0),
    ct(0b01111, 5, 2, 1),
    ct(0b1101, 4, 2, 2),
    ct(0b001000, 6, 3, 0),
    ct(0b01100, 5, 3, 1),
    ct(0b01110, 5, 3, 2),
    ct(0b1100, 4, 3, 3),
    ct(0b0001111, 7, 4, 0),
    ct(0b01010, 5, 4, 1),
    ct(0b01011, 5, 4, 2),
    ct(0b1011, 4, 4, 3),
    ct(0b0001011, 7, 5, 0),
    ct(0b01000, 5, 5, 1),
    ct(0b01001, 5, 5, 2),
    ct(0b1010, 4, 5, 3),
    ct(0b0001001, 7, 6, 0),
    ct(0b001110, 6, 6, 1),
    ct(0b001101, 6, 6, 2),
    ct(0b1001, 4, 6, 3),
    ct(0b0001000, 7, 7, 0),
    ct(0b001010, 6, 7, 1),
    ct(0b001001, 6, 7, 2),
    ct(0b1000, 4, 7, 3),
    ct(0b00001111, 8, 8, 0),
    ct(0b0001110, 7, 8, 1),
    ct(0b0001101, 7, 8, 2),
    ct(0b01101, 5, 8, 3),
    ct(0b00001011, 8, 9, 0),
    ct(0b00001110, 8, 9, 1),
    ct(0b0001010, 7, 9, 2),
    ct(0b001100, 6, 9, 3),
    ct(0b000001111, 9, 10, 0),
    ct(0b00001010, 8, 10, 1),
    ct(0b00001101, 8, 10, 2),
    ct(0b0001100, 7, 10, 3),
    ct(0b000001011, 9, 11, 0),
    ct(0b000001110, 9, 11, 1),
    ct(0b00001001, 8, 11, 2),
    ct(0b00001100, 8, 11, 3),
    ct(0b000001000, 9, 12, 0),
    ct(0b000001010, 9, 12, 1),
    ct(0b000001101, 9, 12, 2),
    ct(0b00001000, 8, 12, 3),
    ct(0b0000001101, 10, 13, 0),
    ct(0b000000111, 9, 13, 1),
    ct(0b000001001, 9, 13, 2),
    ct(0b000001100, 9, 13, 3),
    ct(0b0000001001, 10, 14, 0),
    ct(0b0000001100, 10, 14, 1),
    ct(0b0000001011, 10, 14, 2),
    ct(0b0000001010, 10, 14, 3),
    ct(0b0000000101, 10, 15, 0),
    ct(0b0000001000, 10, 15, 1),
    ct(0b0000000111, 10, 15, 2),
    ct(0b0000000110, 10, 15, 3),
    ct(0b0000000001, 10, 16, 0),
    ct(0b0000000100, 10, 16, 1),
    ct(0b0000000011, 10, 16, 2),
    ct(0b0000000010, 10, 16, 3),
];

const NC_CHROMA_DC: [CoeffTokenCode; 14] = [
    ct(0b01, 2, 0, 0),
    ct(0b000111, 6, 1, 0),
    ct(0b1, 1, 1, 1),
    ct(0b000100, 6, 2, 0),
    ct(0b000110, 6, 2, 1),
    ct(0b001, 3, 2, 2),
    ct(0b000011, 6, 3, 0),
    ct(0b0000011, 7, 3, 1),
    ct(0b0000010, 7, 3, 2),
    ct(0b000101, 6, 3, 3),
    ct(0b000010, 6, 4, 0),
    ct(0b00000011, 8, 4, 1),
    ct(0b00000010, 8, 4, 2),
    ct(0b0000000, 7, 4, 3),
];

const NC_CHROMA_DC_422: [CoeffTokenCode; 30] = [
    ct(0b1, 1, 0, 0),
    ct(0b0001111, 7, 1, 0),
    ct(0b01, 2, 1, 1),
    ct(0b0001110, 7, 2, 0),
    ct(0b0001101, 7, 2, 1),
    ct(0b001, 3, 2, 2),
    ct(0b000000111, 9, 3, 0),
    ct(0b0001100, 7, 3, 1),
    ct(0b0001011, 7, 3, 2),
    ct(0b00001, 5, 3, 3),
    ct(0b000000110, 9, 4, 0),
    ct(0b000000101, 9, 4, 1),
    ct(0b0001010, 7, 4, 2),
    ct(0b000001, 6, 4, 3),
    ct(0b0000000111, 10, 5, 0),
    ct(0b0000000110, 10, 5, 1),
    ct(0b000000100, 9, 5, 2),
    ct(0b0001001, 7, 5, 3),
    ct(0b00000000111, 11, 6, 0),
    ct(0b00000000110, 11, 6, 1),
    ct(0b0000000101, 10, 6, 2),
    ct(0b0001000, 7, 6, 3),
    ct(0b000000000111, 12, 7, 0),
    ct(0b000000000110, 12, 7, 1),
    ct(0b00000000101, 11, 7, 2),
    ct(0b0000000100, 10, 7, 3),
    ct(0b0000000000111, 13, 8, 0),
    ct(0b000000000101, 12, 8, 1),
    ct(0b000000000100, 12, 8, 2),
    ct(0b00000000100, 11, 8, 3),
];

fn table_for(nc: i32) -> Option<&'static [CoeffTokenCode]> {
    match nc {
        0..=1 => Some(&NC_0_TO_1),
        2..=3 => Some(&NC_2_TO_3),
        4..=7 => Some(&NC_4_TO_7),
        -1 => Some(&NC_CHROMA_DC),
        -2 => Some(&NC_CHROMA_DC_422),
        _ => None, // nC >= 8 is the computed pattern.
    }
}

/// Encode a coeff_token for the context `nc`; returns the bits written.
pub fn encode_coeff_token<O: FieldOrder>(
    w: &mut BitWriter<'_, O>,
    total_coeffs: u32,
    trailing_ones: u32,
    nc: i32,
) -> Result<usize> {
    match table_for(nc) {
        Some(table) => {
            let entry = table
                .iter()
                .find(|e| {
                    e.total_coeffs as u32 == total_coeffs
                        && e.trailing_ones as u32 == trailing_ones
                })
                .ok_or(Error::VlcSymbolNotRecognised)?;
            w.write_bits(entry.len as u32, entry.code as u32)?;
            Ok(entry.len as usize)
        }
        None => {
            // nC >= 8: fixed 6-bit pattern, with (0, 0) borrowing the
            // codeword of the impossible (1, 3).
            if total_coeffs > 16 || trailing_ones > 3 || trailing_ones > total_coeffs {
                return Err(Error::VlcSymbolNotRecognised);
            }
            let bits = if total_coeffs == 0 {
                0b000011
            } else {
                ((total_coeffs - 1) << 2) | trailing_ones
            };
            w.write_bits(6, bits)?;
            Ok(6)
        }
    }
}

/// Decode a coeff_token under the context `nc`.
///
/// Returns (total_coeffs, trailing_ones, bits consumed).
pub fn decode_coeff_token<O: FieldOrder>(
    r: &mut BitReader<'_, O>,
    nc: i32,
) -> Result<(u32, u32, usize)> {
    match table_for(nc) {
        Some(table) => {
            let mut acc: u16 = 0;
            for len in 1..=16u8 {
                acc = (acc << 1) | r.read_bit()? as u16;
                for e in table {
                    if e.len == len && e.code == acc {
                        return Ok((e.total_coeffs as u32, e.trailing_ones as u32, len as usize));
                    }
                }
            }
            Err(Error::VlcSymbolNotRecognised)
        }
        None => {
            let bits = r.read_bits(6)?;
            let mut total_coeffs = (bits >> 2) + 1;
            let mut trailing_ones = bits & 3;
            if total_coeffs == 1 && trailing_ones == 3 {
                total_coeffs = 0;
                trailing_ones = 0;
            }
            Ok((total_coeffs, trailing_ones, 6))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::Msb0;
    use crate::vlc::table_checks::assert_prefix_free;

    fn all_tables() -> [(&'static str, &'static [CoeffTokenCode]); 5] {
        [
            ("NC_0_TO_1", &NC_0_TO_1),
            ("NC_2_TO_3", &NC_2_TO_3),
            ("NC_4_TO_7", &NC_4_TO_7),
            ("NC_CHROMA_DC", &NC_CHROMA_DC),
            ("NC_CHROMA_DC_422", &NC_CHROMA_DC_422),
        ]
    }

    #[test]
    fn test_tables_are_prefix_free() {
        for (name, table) in all_tables() {
            let codes: Vec<(u16, u8)> = table.iter().map(|e| (e.code, e.len)).collect();
            assert_prefix_free(name, &codes);
        }
    }

    #[test]
    fn test_tables_cover_legal_symbol_space() {
        // Every (tc, to) with to <= min(tc, 3) must appear exactly once.
        for (name, table, max_tc) in [
            ("NC_0_TO_1", &NC_0_TO_1[..], 16),
            ("NC_2_TO_3", &NC_2_TO_3[..], 16),
            ("NC_4_TO_7", &NC_4_TO_7[..], 16),
            ("NC_CHROMA_DC", &NC_CHROMA_DC[..], 4),
            ("NC_CHROMA_DC_422", &NC_CHROMA_DC_422[..], 8),
        ] {
            for tc in 0..=max_tc {
                for to in 0..=3.min(tc) {
                    let n = table
                        .iter()
                        .filter(|e| e.total_coeffs == tc && e.trailing_ones == to)
                        .count();
                    assert_eq!(n, 1, "{name} ({tc},{to}) appears {n} times");
                }
            }
        }
    }

    fn roundtrip(tc: u32, to: u32, nc: i32) -> (u32, u32, usize) {
        let mut buf = [0u8; 4];
        let enc_bits = {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
            encode_coeff_token(&mut w, tc, to, nc).unwrap()
        };
        let mut r: BitReader<Msb0> = BitReader::new(&buf);
        let out = decode_coeff_token(&mut r, nc).unwrap();
        assert_eq!(out.2, enc_bits);
        out
    }

    #[test]
    fn test_roundtrip_every_context() {
        for nc in [-2, -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 15, 16] {
            let max_tc = match nc {
                -1 => 4,
                -2 => 8,
                _ => 16,
            };
            for tc in 0..=max_tc {
                for to in 0..=3.min(tc) {
                    let (dec_tc, dec_to, _) = roundtrip(tc, to, nc);
                    assert_eq!((dec_tc, dec_to), (tc, to), "context nC={nc}");
                }
            }
        }
    }

    #[test]
    fn test_nc8_exception_pattern() {
        // The 000011 codeword at nC >= 8 means no coefficients at all.
        let buf = [0b0000_1100u8];
        let mut r: BitReader<Msb0> = BitReader::new(&buf);
        assert_eq!(decode_coeff_token(&mut r, 8).unwrap(), (0, 0, 6));

        // And the encoder produces that very pattern for (0, 0).
        let mut out = [0u8; 1];
        {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut out);
            assert_eq!(encode_coeff_token(&mut w, 0, 0, 11).unwrap(), 6);
        }
        assert_eq!(out[0] >> 2, 0b000011);
    }

    #[test]
    fn test_single_coefficient_code() {
        // nC = 0, one coefficient, one trailing one: Table 9-5 says 01.
        let mut buf = [0u8; 1];
        {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
            assert_eq!(encode_coeff_token(&mut w, 1, 1, 0).unwrap(), 2);
        }
        assert_eq!(buf[0], 0b0100_0000);
    }

    #[test]
    fn test_trailing_ones_never_exceed_domain() {
        let mut buf = [0u8; 4];
        let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
        assert_eq!(
            encode_coeff_token(&mut w, 2, 3, 0),
            Err(Error::VlcSymbolNotRecognised)
        );
        assert_eq!(
            encode_coeff_token(&mut w, 17, 0, 8),
            Err(Error::VlcSymbolNotRecognised)
        );
    }
}
