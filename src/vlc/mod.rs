// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Context-selected VLC tables of the CAVLC entropy layer.
//!
//! Every table here is immutable `'static` data: an encoder maps a symbol to
//! a `(code, length)` pair by lookup, a decoder walks the stream one bit at
//! a time, accumulating a candidate codeword until it matches an entry. All
//! tables are prefix-free, which the tests establish mechanically, so the
//! walk is unambiguous.

pub mod coeff_token;
pub mod run_before;
pub mod total_zeros;

pub use coeff_token::{decode_coeff_token, encode_coeff_token};
pub use run_before::{decode_run_before, encode_run_before};
pub use total_zeros::{decode_total_zeros, encode_total_zeros};

use crate::bitstream::{BitReader, BitWriter, FieldOrder};
use crate::{Error, Result};

/// One codeword of a symbol-indexed table: the symbol is the entry's index.
pub(crate) type Code = (u16, u8);

/// Longest codeword in any table of this module.
pub(crate) const MAX_CODE_LEN: u8 = 16;

/// Write the `symbol`-th codeword of a symbol-indexed table.
pub(crate) fn write_indexed<O: FieldOrder>(
    w: &mut BitWriter<'_, O>,
    table: &[Code],
    symbol: usize,
) -> Result<usize> {
    let (code, len) = *table.get(symbol).ok_or(Error::VlcSymbolNotRecognised)?;
    w.write_bits(len as u32, code as u32)?;
    Ok(len as usize)
}

/// Read one codeword of a symbol-indexed table; returns (symbol, bits).
pub(crate) fn read_indexed<O: FieldOrder>(
    r: &mut BitReader<'_, O>,
    table: &[Code],
) -> Result<(usize, usize)> {
    let mut acc: u16 = 0;
    for len in 1..=MAX_CODE_LEN {
        acc = (acc << 1) | r.read_bit()? as u16;
        for (symbol, &(code, code_len)) in table.iter().enumerate() {
            if code_len == len && code == acc {
                return Ok((symbol, len as usize));
            }
        }
    }
    Err(Error::VlcSymbolNotRecognised)
}

#[cfg(test)]
pub(crate) mod table_checks {
    use super::Code;

    /// A table is usable iff no codeword is a prefix of another.
    pub fn assert_prefix_free(name: &str, table: &[Code]) {
        for (i, &(ci, li)) in table.iter().enumerate() {
            assert!(li > 0 && li <= 16, "{name}[{i}] has bad length {li}");
            for (j, &(cj, lj)) in table.iter().enumerate() {
                if i == j {
                    continue;
                }
                let (short, long, sc, lc) = if li <= lj {
                    (li, lj, ci, cj)
                } else {
                    (lj, li, cj, ci)
                };
                assert!(
                    (lc >> (long - short)) != sc,
                    "{name}: entry {i} and {j} are prefix-related"
                );
            }
        }
    }
}
