// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The coefficient block: the unit the transforms and the entropy coder
//! operate on.

use crate::bitstream::{BitReader, BitWriter, FieldOrder};
use crate::cavlc::Cavlc;
use crate::macroblock::BlockId;
use crate::transform::{ForwardTransform, InverseTransform, TransformMode};
use crate::Result;

/// Colour plane a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockColour {
    Lum,
    Cb,
    Cr,
}

/// Relational link to a neighbouring block: an index into the caller-owned
/// macroblock arena plus the block's place inside that macroblock. Set once
/// at grid initialisation, never owning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLink {
    pub mb: usize,
    pub blk: BlockId,
}

/// A width x height block of signed 16-bit coefficients with the metadata
/// the entropy layer needs: the coded flag, the coefficient count of the
/// last run-level pass, colour, the DC-only marker, pel offsets within the
/// enclosing macroblock, and the two neighbourhood links.
#[derive(Debug, Clone)]
pub struct Block {
    coeffs: Vec<i16>,
    width: usize,
    height: usize,
    /// Whether this block carries coefficients on the wire. Kept in sync
    /// with the coded block pattern by the macroblock layer.
    pub coded: bool,
    /// Coefficient count reported by the last CAVLC encode or decode.
    pub num_coeffs: u32,
    pub colour: BlockColour,
    /// The block holds DC components only.
    pub dc_flag: bool,
    /// Pel offset of this block from the macroblock's top-left corner.
    pub off_x: usize,
    pub off_y: usize,
    /// Neighbourhood for the context-aware entropy coding; `None` at
    /// picture and slice boundaries.
    pub above: Option<BlockLink>,
    pub left: Option<BlockLink>,
}

impl Block {
    /// Create a zeroed block. Width and height are 2 or 4.
    pub fn new(width: usize, height: usize, colour: BlockColour, dc_flag: bool) -> Self {
        debug_assert!(matches!(width, 2 | 4) && matches!(height, 2 | 4));
        Self {
            coeffs: vec![0; width * height],
            width,
            height,
            coded: false,
            num_coeffs: 0,
            colour,
            dc_flag,
            off_x: 0,
            off_y: 0,
            above: None,
            left: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn coeffs(&self) -> &[i16] {
        &self.coeffs
    }

    pub fn coeffs_mut(&mut self) -> &mut [i16] {
        &mut self.coeffs
    }

    /// The zero-frequency coefficient.
    pub fn dc(&self) -> i16 {
        self.coeffs[0]
    }

    pub fn set_dc(&mut self, dc: i16) {
        self.coeffs[0] = dc;
    }

    /// Apply a forward transform by reference.
    pub fn forward_transform(&mut self, t: &impl ForwardTransform, mode: TransformMode) {
        t.apply(mode, &mut self.coeffs);
    }

    /// Apply an inverse transform by reference.
    pub fn inverse_transform(&mut self, t: &impl InverseTransform, mode: TransformMode) {
        t.apply(mode, &mut self.coeffs);
    }

    /// Quantise in place: the transform object is borrowed for its
    /// quantisation stage only, whatever the caller uses it for elsewhere.
    pub fn quantise(&mut self, t: &mut impl ForwardTransform, qp: u8) {
        t.set_qp(qp);
        t.apply(TransformMode::QuantOnly, &mut self.coeffs);
    }

    /// Dequantise in place.
    pub fn inverse_quantise(&mut self, t: &mut impl InverseTransform, qp: u8) {
        t.set_qp(qp);
        t.apply(TransformMode::QuantOnly, &mut self.coeffs);
    }

    /// Run-level encode through the CAVLC engine, recording the engine's
    /// coefficient count. Returns the bits written.
    pub fn rle_encode<O: FieldOrder>(
        &mut self,
        codec: &mut Cavlc,
        w: &mut BitWriter<'_, O>,
    ) -> Result<usize> {
        let bits = codec.encode(&self.coeffs, w)?;
        self.num_coeffs = codec.num_coeffs();
        Ok(bits)
    }

    /// Run-level decode through the CAVLC engine; the dual of
    /// [`Self::rle_encode`].
    pub fn rle_decode<O: FieldOrder>(
        &mut self,
        codec: &mut Cavlc,
        r: &mut BitReader<'_, O>,
    ) -> Result<usize> {
        let bits = codec.decode(r, &mut self.coeffs)?;
        self.num_coeffs = codec.num_coeffs();
        Ok(bits)
    }

    /// All-zero scan, four coefficients per step for the early exit.
    pub fn is_zero(&self) -> bool {
        self.coeffs.chunks(4).all(|c| c.iter().all(|&v| v == 0))
    }

    /// All-zero scan that records the outcome in the coded flag.
    pub fn is_zero_update_coded(&mut self) -> bool {
        let zero = self.is_zero();
        self.coded = !zero;
        zero
    }

    /// Clear all coefficients.
    pub fn zero(&mut self) {
        self.coeffs.iter_mut().for_each(|c| *c = 0);
    }

    /// Copy coefficients and state from another block of the same shape.
    /// Neighbour links stay untouched; they belong to the grid.
    pub fn copy_from(&mut self, other: &Block) {
        debug_assert_eq!(self.coeffs.len(), other.coeffs.len());
        self.coeffs.copy_from_slice(&other.coeffs);
        self.coded = other.coded;
        self.num_coeffs = other.num_coeffs;
        self.colour = other.colour;
        self.dc_flag = other.dc_flag;
    }

    /// Content equality: coefficients and coding state, not position.
    pub fn same_contents(&self, other: &Block) -> bool {
        self.coeffs == other.coeffs
            && self.coded == other.coded
            && self.num_coeffs == other.num_coeffs
            && self.colour == other.colour
            && self.dc_flag == other.dc_flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::Msb0;
    use crate::cavlc::CavlcMode;
    use crate::transform::{Forward4x4, Inverse4x4};

    #[test]
    fn test_is_zero_scan() {
        let mut blk = Block::new(4, 4, BlockColour::Lum, false);
        assert!(blk.is_zero());
        blk.coeffs_mut()[13] = -2;
        assert!(!blk.is_zero());
        assert!(!blk.is_zero_update_coded());
        assert!(blk.coded);
        blk.zero();
        assert!(blk.is_zero_update_coded());
        assert!(!blk.coded);
    }

    #[test]
    fn test_quantise_roundtrip_via_block() {
        let mut fwd = Forward4x4::new(0, true);
        let mut inv = Inverse4x4::new(0);
        let mut blk = Block::new(4, 4, BlockColour::Lum, false);
        blk.coeffs_mut().copy_from_slice(&[12i16; 16]);

        blk.forward_transform(&fwd, TransformMode::TransformOnly);
        assert_eq!(blk.dc(), 12 * 16);
        blk.quantise(&mut fwd, 4);
        blk.inverse_quantise(&mut inv, 4);
        blk.inverse_transform(&inv, TransformMode::TransformOnly);
        // QP 4 is nearly lossless on a flat block.
        assert!(blk.coeffs().iter().all(|&v| (v - 12).abs() <= 1), "{blk:?}");
    }

    #[test]
    fn test_rle_updates_num_coeffs() {
        let mut blk = Block::new(4, 4, BlockColour::Lum, false);
        blk.coeffs_mut()[0] = 4;
        blk.coeffs_mut()[1] = -1;

        let mut codec = Cavlc::new(CavlcMode::Cavlc4x4);
        let mut buf = [0u8; 16];
        {
            let mut w: BitWriter<Msb0> = BitWriter::new(&mut buf);
            blk.rle_encode(&mut codec, &mut w).unwrap();
        }
        assert_eq!(blk.num_coeffs, 2);

        let mut out = Block::new(4, 4, BlockColour::Lum, false);
        let mut r: BitReader<Msb0> = BitReader::new(&buf);
        out.rle_decode(&mut codec, &mut r).unwrap();
        assert_eq!(out.coeffs(), blk.coeffs());
        assert_eq!(out.num_coeffs, 2);
    }

    #[test]
    fn test_copy_leaves_links_alone() {
        let mut a = Block::new(2, 2, BlockColour::Cb, true);
        a.coeffs_mut().copy_from_slice(&[1, -2, 3, -4]);
        a.coded = true;

        let mut b = Block::new(2, 2, BlockColour::Cr, false);
        b.left = Some(BlockLink { mb: 3, blk: BlockId::CrDc });
        b.copy_from(&a);

        assert!(b.same_contents(&a));
        assert_eq!(b.left, Some(BlockLink { mb: 3, blk: BlockId::CrDc }));
        assert!(b.above.is_none());
    }
}
