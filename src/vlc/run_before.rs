// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The run_before VLC: zero runs between non-zero coefficients.
//!
//! Rec. H.264 (03/2005) Table 9-10. The count of zeros still unaccounted
//! for selects the code: bespoke short tables for 1..=6 zeros left, and for
//! 7 or more a single extended table whose unary tail reaches the maximum
//! run of 14.

use crate::bitstream::{BitReader, BitWriter, FieldOrder};
use crate::vlc::{read_indexed, write_indexed, Code};
use crate::{Error, Result};

const RUN_BEFORE_1: [Code; 2] = [(0b1, 1), (0b0, 1)];
const RUN_BEFORE_2: [Code; 3] = [(0b1, 1), (0b01, 2), (0b00, 2)];
const RUN_BEFORE_3: [Code; 4] = [(0b11, 2), (0b10, 2), (0b01, 2), (0b00, 2)];
const RUN_BEFORE_4: [Code; 5] = [(0b11, 2), (0b10, 2), (0b01, 2), (0b001, 3), (0b000, 3)];
const RUN_BEFORE_5: [Code; 6] = [
    (0b11, 2),
    (0b10, 2),
    (0b011, 3),
    (0b010, 3),
    (0b001, 3),
    (0b000, 3),
];
const RUN_BEFORE_6: [Code; 7] = [
    (0b11, 2),
    (0b000, 3),
    (0b001, 3),
    (0b011, 3),
    (0b010, 3),
    (0b101, 3),
    (0b100, 3),
];
/// zeros-left >= 7: three-bit head, then a unary tail one bit per extra run.
const RUN_BEFORE_7UP: [Code; 15] = [
    (0b111, 3),
    (0b110, 3),
    (0b101, 3),
    (0b100, 3),
    (0b011, 3),
    (0b010, 3),
    (0b001, 3),
    (0b0001, 4),
    (0b00001, 5),
    (0b000001, 6),
    (0b0000001, 7),
    (0b00000001, 8),
    (0b000000001, 9),
    (0b0000000001, 10),
    (0b00000000001, 11),
];

fn sub_table(zeros_left: u32) -> Result<&'static [Code]> {
    match zeros_left {
        0 => Err(Error::VlcSymbolNotRecognised),
        1 => Ok(&RUN_BEFORE_1),
        2 => Ok(&RUN_BEFORE_2),
        3 => Ok(&RUN_BEFORE_3),
        4 => Ok(&RUN_BEFORE_4),
        5 => Ok(&RUN_BEFORE_5),
        6 => Ok(&RUN_BEFORE_6),
        _ => Ok(&RUN_BEFORE_7UP),
    }
}

/// Encode a run of zeros under the zeros-left context; returns bits written.
pub fn encode_run_before<O: FieldOrder>(
    w: &mut BitWriter<'_, O>,
    run_before: u32,
    zeros_left: u32,
) -> Result<usize> {
    let table = sub_table(zeros_left)?;
    if run_before > zeros_left {
        return Err(Error::VlcSymbolNotRecognised);
    }
    write_indexed(w, table, run_before as usize)
}

/// Decode a run of zeros under the zeros-left context.
///
/// Returns (run_before, bits consumed).
pub fn decode_run_before<O: FieldOrder>(
    r: &mut BitReader<'_, O>,
    zeros_left: u32,
) -> Result<(u32, usize)> {
    let table = sub_table(zeros_left)?;
    let (symbol, bits) = read_indexed(r, table)?;
    if symbol as u32 > zeros_left {
        return Err(Error::VlcSymbolNotRecognised);
    }
    Ok((symbol as u32, bits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::Msb0;
    use crate::vlc::table_checks::assert_prefix_free;

    #[test]
    fn test_tables_are_prefix_free() {
        assert_prefix_free("RUN_BEFORE_1", &RUN_BEFORE_1);
        assert_prefix_free("RUN_BEFORE_2", &RUN_BEFORE_2);
        assert_prefix_free("RUN_BEFORE_3", &RUN_BEFORE_3);
        assert_prefix_free("RUN_BEFORE_4", &RUN_BEFORE_4);
        assert_prefix_free("RUN_BEFORE_5", &RUN_BEFORE_5);
        assert_prefix_free("RUN_BEFORE_6", &RUN_BEFORE_6);
        assert_prefix_free("RUN_BEFORE_7UP", &RUN_BEFORE_7UP);
    }

    #[test]
    fn test_roundtrip_full_domain() {
        for zeros_left in 1..=14u32 {
            for run in 0..=zeros_left.min(14) {
                let mut buf = [0u8; 4];
                let enc_bits = {
                    let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
                    encode_run_before(&mut w, run, zeros_left).unwrap()
                };
                let mut r: BitReader<Msb0> = BitReader::new(&buf);
                let (dec, bits) = decode_run_before(&mut r, zeros_left).unwrap();
                assert_eq!((dec, bits), (run, enc_bits), "zeros_left {zeros_left}");
            }
        }
    }

    #[test]
    fn test_known_codewords() {
        // Table 9-10 spot values: run 1 at one zero left is the single 0
        // bit; run 6 at six left is 100; run 14 in the extended table is
        // ten zeros and a one.
        let mut buf = [0u8; 2];
        {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
            assert_eq!(encode_run_before(&mut w, 1, 1).unwrap(), 1);
        }
        assert_eq!(buf[0] >> 7, 0);
        {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
            assert_eq!(encode_run_before(&mut w, 6, 6).unwrap(), 3);
        }
        assert_eq!(buf[0] >> 5, 0b100);
        {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
            assert_eq!(encode_run_before(&mut w, 14, 9).unwrap(), 11);
        }
        assert_eq!(buf[0], 0);
        assert_eq!(buf[1] >> 5, 0b001);
    }

    #[test]
    fn test_run_cannot_exceed_zeros_left() {
        let mut buf = [0u8; 4];
        let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
        assert_eq!(
            encode_run_before(&mut w, 3, 2),
            Err(Error::VlcSymbolNotRecognised)
        );
        assert_eq!(
            encode_run_before(&mut w, 0, 0),
            Err(Error::VlcSymbolNotRecognised)
        );
    }
}
