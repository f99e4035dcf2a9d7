// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The macroblock model: the 16x16 coding unit, its 27-block composition,
//! the picture grid that owns the macroblocks, and the macroblock-layer
//! wire codec.
//!
//! Macroblocks stay in raster order for their whole life; the reordering
//! that the wire demands is confined to the fixed coding-order table below.
//! Neighbour relations are arena indices into the grid, never pointers, so
//! the graph is purely relational and a macroblock can be copied or
//! compared freely.

use log::debug;

use crate::bitstream::{BitReader, BitWriter, FieldOrder};
use crate::block::{Block, BlockColour, BlockLink};
use crate::cavlc::{Cavlc, CavlcMode};
use crate::golomb::{read_se, read_ue, write_se, write_ue};
use crate::motion;
use crate::{Error, Result};

/// Identity of one block inside a macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    LumDc,
    /// Luma 4x4 block by (row, col) in the 4x4 grid.
    Lum(usize, usize),
    CbDc,
    CrDc,
    /// Chroma 4x4 block by (row, col) in the 2x2 grid.
    Cb(usize, usize),
    Cr(usize, usize),
}

/// Macroblock partition prediction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbPartPredMode {
    Inter16x16,
    Inter16x8,
    Inter8x16,
    Inter8x8,
    Inter8x8Ref,
    Intra4x4,
    Intra16x16,
}

impl MbPartPredMode {
    /// The wire value of an inter partition mode (P-slice mb_type 0..=4).
    fn inter_wire_value(self) -> Option<u32> {
        match self {
            MbPartPredMode::Inter16x16 => Some(0),
            MbPartPredMode::Inter16x8 => Some(1),
            MbPartPredMode::Inter8x16 => Some(2),
            MbPartPredMode::Inter8x8 => Some(3),
            MbPartPredMode::Inter8x8Ref => Some(4),
            _ => None,
        }
    }

    fn from_inter_wire_value(v: u32) -> Result<Self> {
        Ok(match v {
            0 => MbPartPredMode::Inter16x16,
            1 => MbPartPredMode::Inter16x8,
            2 => MbPartPredMode::Inter8x16,
            3 => MbPartPredMode::Inter8x8,
            4 => MbPartPredMode::Inter8x8Ref,
            _ => return Err(Error::VlcSymbolNotRecognised),
        })
    }
}

/// Slice type, as far as the macroblock layer cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    I,
    P,
}

/// How a coding-order entry derives its coeff_token context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourUse {
    /// Use this value as nC directly (the chroma DC blocks).
    Direct(i32),
    /// No context: nC is zero.
    Skip,
    /// Average the above/left neighbour coefficient counts.
    Consult,
}

/// One entry of the residual coding order.
#[derive(Debug, Clone, Copy)]
pub struct CodingOrderEntry {
    pub id: BlockId,
    /// Raster position of the block inside the macroblock; -1 for the luma
    /// DC block, which has no raster home.
    pub raster_index: i32,
    pub neighbour: NeighbourUse,
}

const fn lum_entry(row: usize, col: usize) -> CodingOrderEntry {
    CodingOrderEntry {
        id: BlockId::Lum(row, col),
        raster_index: (4 * row + col) as i32,
        neighbour: NeighbourUse::Consult,
    }
}

const fn chr_entry(id: BlockId, raster_index: i32) -> CodingOrderEntry {
    CodingOrderEntry { id, raster_index, neighbour: NeighbourUse::Consult }
}

/// The residual coding order: luma DC, sixteen luma AC blocks in 8x8
/// quadrant order, the chroma DC pair, then the chroma AC blocks. This is
/// NOT raster order; the CBP quadrant derivation leans on the grouping.
pub const CODING_ORDER: [CodingOrderEntry; 27] = [
    CodingOrderEntry { id: BlockId::LumDc, raster_index: -1, neighbour: NeighbourUse::Consult },
    lum_entry(0, 0),
    lum_entry(0, 1),
    lum_entry(1, 0),
    lum_entry(1, 1),
    lum_entry(0, 2),
    lum_entry(0, 3),
    lum_entry(1, 2),
    lum_entry(1, 3),
    lum_entry(2, 0),
    lum_entry(2, 1),
    lum_entry(3, 0),
    lum_entry(3, 1),
    lum_entry(2, 2),
    lum_entry(2, 3),
    lum_entry(3, 2),
    lum_entry(3, 3),
    CodingOrderEntry { id: BlockId::CbDc, raster_index: 16, neighbour: NeighbourUse::Direct(-1) },
    CodingOrderEntry { id: BlockId::CrDc, raster_index: 17, neighbour: NeighbourUse::Direct(-1) },
    chr_entry(BlockId::Cb(0, 0), 18),
    chr_entry(BlockId::Cb(0, 1), 19),
    chr_entry(BlockId::Cb(1, 0), 20),
    chr_entry(BlockId::Cb(1, 1), 21),
    chr_entry(BlockId::Cr(0, 0), 22),
    chr_entry(BlockId::Cr(0, 1), 23),
    chr_entry(BlockId::Cr(1, 0), 24),
    chr_entry(BlockId::Cr(1, 1), 25),
];

/// Positions of the luma AC entries within [`CODING_ORDER`].
const LUM_AC_RANGE: std::ops::RangeInclusive<usize> = 1..=16;
/// Positions of the chroma entries (DC pair included).
const CHR_RANGE: std::ops::RangeInclusive<usize> = 17..=26;
/// Positions of the chroma AC entries.
const CHR_AC_RANGE: std::ops::RangeInclusive<usize> = 19..=26;

/// mb_type 1..=24 in I slices: (intra 16x16 prediction mode, chroma CBP,
/// luma CBP) per type.
const INTRA_16X16_MODE_TABLE: [(u8, u8, u8); 24] = [
    (0, 0, 0),
    (1, 0, 0),
    (2, 0, 0),
    (3, 0, 0),
    (0, 1, 0),
    (1, 1, 0),
    (2, 1, 0),
    (3, 1, 0),
    (0, 2, 0),
    (1, 2, 0),
    (2, 2, 0),
    (3, 2, 0),
    (0, 0, 15),
    (1, 0, 15),
    (2, 0, 15),
    (3, 0, 15),
    (0, 1, 15),
    (1, 1, 15),
    (2, 1, 15),
    (3, 1, 15),
    (0, 2, 15),
    (1, 2, 15),
    (2, 2, 15),
    (3, 2, 15),
];

/// A 16x16 macroblock: 27 coefficient blocks plus position, neighbourhood,
/// coding state and motion state.
#[derive(Debug, Clone)]
pub struct Macroblock {
    /// Top-left pel of this macroblock in the luma and chroma planes.
    pub off_lum_x: usize,
    pub off_lum_y: usize,
    pub off_chr_x: usize,
    pub off_chr_y: usize,
    /// Raster index in the picture.
    pub mb_index: usize,
    pub slice: u32,

    /// Arena indices of the neighbours; `None` off-picture or across a
    /// slice boundary.
    pub left: Option<usize>,
    pub above: Option<usize>,
    pub above_left: Option<usize>,
    pub above_right: Option<usize>,

    pub mb_qp: u8,

    pub intra: bool,
    pub pred_mode: MbPartPredMode,
    pub intra_16x16_pred_mode: u8,
    pub intra_chr_pred_mode: u8,
    pub coded_blk_pattern_lum: u8,
    pub coded_blk_pattern_chr: u8,
    /// The combined 6-bit wire pattern: lum | (chr << 4).
    pub coded_blk_pattern: u8,
    pub mb_type: u32,
    pub sub_mb_type: u32,
    pub skip: bool,
    pub mb_qp_delta: i32,

    /// Motion vectors in quarter-pel units; only the indices the partition
    /// mode calls for are meaningful.
    pub mv_x: [i32; 16],
    pub mv_y: [i32; 16],
    pub mvd_x: [i32; 16],
    pub mvd_y: [i32; 16],

    pub lum_dc: Block,
    pub lum: [[Block; 4]; 4],
    pub cb_dc: Block,
    pub cr_dc: Block,
    pub cb: [[Block; 2]; 2],
    pub cr: [[Block; 2]; 2],
}

impl Default for Macroblock {
    fn default() -> Self {
        Self::new()
    }
}

impl Macroblock {
    pub fn new() -> Self {
        Self {
            off_lum_x: 0,
            off_lum_y: 0,
            off_chr_x: 0,
            off_chr_y: 0,
            mb_index: 0,
            slice: 0,
            left: None,
            above: None,
            above_left: None,
            above_right: None,
            mb_qp: 1,
            intra: true,
            pred_mode: MbPartPredMode::Intra16x16,
            intra_16x16_pred_mode: 2,
            intra_chr_pred_mode: 0,
            coded_blk_pattern_lum: 0,
            coded_blk_pattern_chr: 0,
            coded_blk_pattern: 0,
            mb_type: 1,
            sub_mb_type: 0,
            skip: false,
            mb_qp_delta: 0,
            mv_x: [0; 16],
            mv_y: [0; 16],
            mvd_x: [0; 16],
            mvd_y: [0; 16],
            lum_dc: Block::new(4, 4, BlockColour::Lum, true),
            lum: std::array::from_fn(|_| {
                std::array::from_fn(|_| Block::new(4, 4, BlockColour::Lum, false))
            }),
            cb_dc: Block::new(2, 2, BlockColour::Cb, true),
            cr_dc: Block::new(2, 2, BlockColour::Cr, true),
            cb: std::array::from_fn(|_| {
                std::array::from_fn(|_| Block::new(4, 4, BlockColour::Cb, false))
            }),
            cr: std::array::from_fn(|_| {
                std::array::from_fn(|_| Block::new(4, 4, BlockColour::Cr, false))
            }),
        }
    }

    pub fn block(&self, id: BlockId) -> &Block {
        match id {
            BlockId::LumDc => &self.lum_dc,
            BlockId::Lum(r, c) => &self.lum[r][c],
            BlockId::CbDc => &self.cb_dc,
            BlockId::CrDc => &self.cr_dc,
            BlockId::Cb(r, c) => &self.cb[r][c],
            BlockId::Cr(r, c) => &self.cr[r][c],
        }
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match id {
            BlockId::LumDc => &mut self.lum_dc,
            BlockId::Lum(r, c) => &mut self.lum[r][c],
            BlockId::CbDc => &mut self.cb_dc,
            BlockId::CrDc => &mut self.cr_dc,
            BlockId::Cb(r, c) => &mut self.cb[r][c],
            BlockId::Cr(r, c) => &mut self.cr[r][c],
        }
    }

    /// Whether the luma AC scan skips its DC position: only in Intra_16x16
    /// mode, where the DC coefficients ride in their own block.
    pub fn lum_dc_skip(&self) -> bool {
        self.intra && self.pred_mode == MbPartPredMode::Intra16x16
    }

    /// Derive the coded block pattern from the zero/non-zero state of the
    /// blocks, after quantisation, and synchronise every block's coded
    /// flag with it.
    pub fn set_coded_block_pattern(&mut self) {
        self.lum_dc.coded = self.intra;

        self.coded_blk_pattern_lum = 0;
        if self.lum_dc_skip() {
            // Intra_16x16: all sixteen AC blocks code together or not at
            // all.
            let any = LUM_AC_RANGE
                .clone()
                .any(|i| !self.block(CODING_ORDER[i].id).is_zero());
            for i in LUM_AC_RANGE {
                self.block_mut(CODING_ORDER[i].id).coded = any;
            }
            if any {
                self.coded_blk_pattern_lum = 15;
            }
        } else {
            // One bit per 8x8 quadrant; the coding order walks quadrants
            // consecutively, four 4x4 blocks apiece.
            for i in LUM_AC_RANGE {
                if !self.block(CODING_ORDER[i].id).is_zero() {
                    self.coded_blk_pattern_lum |= 1 << ((i - 1) / 4);
                }
            }
            for i in LUM_AC_RANGE {
                if self.coded_blk_pattern_lum & (1 << ((i - 1) / 4)) != 0 {
                    self.block_mut(CODING_ORDER[i].id).coded = true;
                }
            }
        }

        // Chroma: 2 if any AC block is non-zero, 1 if only DC coefficients
        // survive, 0 when everything is flat.
        let any_chr_ac = CHR_AC_RANGE
            .clone()
            .any(|i| !self.block(CODING_ORDER[i].id).is_zero());
        if any_chr_ac {
            self.coded_blk_pattern_chr = 2;
            for i in CHR_RANGE {
                self.block_mut(CODING_ORDER[i].id).coded = true;
            }
        } else if !self.cb_dc.is_zero() || !self.cr_dc.is_zero() {
            self.coded_blk_pattern_chr = 1;
            self.cb_dc.coded = true;
            self.cr_dc.coded = true;
        } else {
            self.coded_blk_pattern_chr = 0;
        }

        self.coded_blk_pattern = self.coded_blk_pattern_lum | (self.coded_blk_pattern_chr << 4);
    }

    /// Disassemble a decoded coded block pattern and synchronise every
    /// block's coded flag with it.
    pub fn get_coded_block_pattern(&mut self) {
        self.coded_blk_pattern_lum = self.coded_blk_pattern & 0x0f;
        self.coded_blk_pattern_chr = (self.coded_blk_pattern >> 4) & 0x03;

        self.lum_dc.coded = true;

        for i in LUM_AC_RANGE {
            let coded = self.coded_blk_pattern_lum & (1 << ((i - 1) / 4)) != 0;
            self.block_mut(CODING_ORDER[i].id).coded = coded;
        }

        match self.coded_blk_pattern_chr {
            2 => {
                for i in CHR_RANGE {
                    self.block_mut(CODING_ORDER[i].id).coded = true;
                }
            }
            chr => {
                for i in CHR_RANGE {
                    self.block_mut(CODING_ORDER[i].id).coded = false;
                }
                if chr == 1 {
                    self.cb_dc.coded = true;
                    self.cr_dc.coded = true;
                }
            }
        }
    }

    /// Pack the prediction mode and coded block patterns into mb_type.
    ///
    /// In I slices the Intra_16x16 sub-types 1..=24 enumerate prediction
    /// mode x chroma CBP x luma CBP; in P slices inter modes map straight
    /// to 0..=4 and intra types shift up by five.
    pub fn set_mb_type(&mut self, slice_type: SliceType) {
        let mut mb_type = 0u32;
        if self.intra && self.pred_mode == MbPartPredMode::Intra16x16 {
            mb_type = 1;
            if self.coded_blk_pattern_lum != 0 {
                // Always either 0 or 15 in 16x16 mode.
                mb_type += 12;
            }
            mb_type += 4 * self.coded_blk_pattern_chr as u32 + self.intra_16x16_pred_mode as u32;
        }

        if slice_type == SliceType::P {
            if !self.intra {
                mb_type = self.pred_mode.inter_wire_value().unwrap_or(0);
            } else {
                mb_type += 5;
            }
        }

        self.mb_type = mb_type;
    }

    /// Unpack mb_type into the prediction flags; for Intra_16x16 the coded
    /// block pattern and prediction mode ride along. Callers follow up with
    /// [`Self::get_coded_block_pattern`].
    pub fn unpack_mb_type(&mut self, slice_type: SliceType) -> Result<()> {
        let mut mb_type = self.mb_type;
        self.intra = match slice_type {
            SliceType::I => true,
            SliceType::P => {
                if mb_type > 4 {
                    mb_type -= 5;
                    true
                } else {
                    false
                }
            }
        };

        if self.intra {
            if mb_type == 0 {
                self.pred_mode = MbPartPredMode::Intra4x4;
            } else {
                if mb_type > 24 {
                    return Err(Error::VlcSymbolNotRecognised);
                }
                self.pred_mode = MbPartPredMode::Intra16x16;
                let (pred, chr, lum) = INTRA_16X16_MODE_TABLE[mb_type as usize - 1];
                self.intra_16x16_pred_mode = pred;
                self.coded_blk_pattern = lum | (chr << 4);
            }
        } else {
            self.pred_mode = MbPartPredMode::from_inter_wire_value(mb_type)?;
        }
        Ok(())
    }

    /// Any coefficient to decode? Valid after the coded block pattern has
    /// been derived; the Intra_16x16 luma DC block rides outside the
    /// pattern and is checked separately.
    pub fn has_nonzero_coeffs(&self) -> bool {
        self.coded_blk_pattern != 0 || (self.lum_dc_skip() && !self.lum_dc.is_zero())
    }

    /// Copy coding state and coefficients from another macroblock. The
    /// position and neighbourhood of `self` stay untouched.
    pub fn copy_coding_state_from(&mut self, other: &Macroblock) {
        self.mb_qp = other.mb_qp;
        self.intra = other.intra;
        self.pred_mode = other.pred_mode;
        self.intra_16x16_pred_mode = other.intra_16x16_pred_mode;
        self.intra_chr_pred_mode = other.intra_chr_pred_mode;
        self.coded_blk_pattern_lum = other.coded_blk_pattern_lum;
        self.coded_blk_pattern_chr = other.coded_blk_pattern_chr;
        self.coded_blk_pattern = other.coded_blk_pattern;
        self.mb_type = other.mb_type;
        self.sub_mb_type = other.sub_mb_type;
        self.skip = other.skip;
        self.mb_qp_delta = other.mb_qp_delta;
        self.mv_x = other.mv_x;
        self.mv_y = other.mv_y;
        self.mvd_x = other.mvd_x;
        self.mvd_y = other.mvd_y;
        for entry in CODING_ORDER.iter() {
            self.block_mut(entry.id).copy_from(other.block(entry.id));
        }
    }

    /// Equality of coding state and coefficients, position excluded.
    pub fn same_coding_state(&self, other: &Macroblock) -> bool {
        self.mb_qp == other.mb_qp
            && self.intra == other.intra
            && self.pred_mode == other.pred_mode
            && self.coded_blk_pattern == other.coded_blk_pattern
            && self.mb_type == other.mb_type
            && self.mv_x == other.mv_x
            && self.mv_y == other.mv_y
            && CODING_ORDER
                .iter()
                .all(|e| self.block(e.id).same_contents(other.block(e.id)))
    }
}

/// The picture-owned macroblock arena.
pub struct MacroblockGrid {
    rows: usize,
    cols: usize,
    mbs: Vec<Macroblock>,
}

impl MacroblockGrid {
    /// Build a rows x cols grid, fully initialised as a single slice.
    pub fn new(rows: usize, cols: usize) -> Self {
        debug_assert!(rows > 0 && cols > 0);
        let mut grid = Self {
            rows,
            cols,
            mbs: (0..rows * cols).map(|_| Macroblock::new()).collect(),
        };
        // A fresh grid is one slice; re-initialise ranges to partition it.
        grid.initialise(0, rows * cols - 1, 0)
            .expect("whole-picture range is always valid");
        grid
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.mbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mbs.is_empty()
    }

    pub fn mb(&self, index: usize) -> &Macroblock {
        &self.mbs[index]
    }

    pub fn mb_mut(&mut self, index: usize) -> &mut Macroblock {
        &mut self.mbs[index]
    }

    /// Initialise the macroblocks of a raster index range, assigning them
    /// to `slice` and resolving all neighbourhood references. Macroblocks
    /// are walked in raster order so every reference they resolve against
    /// is already valid. Neighbours across a slice boundary are absent.
    pub fn initialise(&mut self, start_mb: usize, end_mb: usize, slice: u32) -> Result<()> {
        if start_mb > end_mb || end_mb >= self.mbs.len() {
            return Err(Error::OutOfBounds);
        }

        for index in start_mb..=end_mb {
            let row = index / self.cols;
            let col = index % self.cols;

            // Resolve macroblock neighbours inside the picture and slice.
            let same_slice = |idx: usize| self.mbs[idx].slice == slice;
            let left = (col > 0).then(|| index - 1).filter(|&i| same_slice(i));
            let above = (row > 0).then(|| index - self.cols).filter(|&i| same_slice(i));
            let above_left = (row > 0 && col > 0)
                .then(|| index - self.cols - 1)
                .filter(|&i| same_slice(i));
            let above_right = (row > 0 && col + 1 < self.cols)
                .then(|| index - self.cols + 1)
                .filter(|&i| same_slice(i));

            let mb = &mut self.mbs[index];
            mb.mb_index = index;
            mb.slice = slice;
            mb.off_lum_x = col * 16;
            mb.off_lum_y = row * 16;
            mb.off_chr_x = col * 8;
            mb.off_chr_y = row * 8;
            mb.left = left;
            mb.above = above;
            mb.above_left = above_left;
            mb.above_right = above_right;

            // Per-block offsets and neighbour links. Links wrap into the
            // last row/column of the neighbouring macroblock's grid.
            for i in 0..4 {
                for j in 0..4 {
                    let blk = &mut mb.lum[i][j];
                    blk.off_x = j * 4;
                    blk.off_y = i * 4;
                    blk.above = if i == 0 {
                        above.map(|a| BlockLink { mb: a, blk: BlockId::Lum(3, j) })
                    } else {
                        Some(BlockLink { mb: index, blk: BlockId::Lum(i - 1, j) })
                    };
                    blk.left = if j == 0 {
                        left.map(|l| BlockLink { mb: l, blk: BlockId::Lum(i, 3) })
                    } else {
                        Some(BlockLink { mb: index, blk: BlockId::Lum(i, j - 1) })
                    };
                }
            }
            for i in 0..2 {
                for j in 0..2 {
                    for (plane, id_of) in [
                        (BlockId::Cb(i, j), BlockId::Cb as fn(usize, usize) -> BlockId),
                        (BlockId::Cr(i, j), BlockId::Cr as fn(usize, usize) -> BlockId),
                    ] {
                        let above_link = if i == 0 {
                            above.map(|a| BlockLink { mb: a, blk: id_of(1, j) })
                        } else {
                            Some(BlockLink { mb: index, blk: id_of(i - 1, j) })
                        };
                        let left_link = if j == 0 {
                            left.map(|l| BlockLink { mb: l, blk: id_of(i, 1) })
                        } else {
                            Some(BlockLink { mb: index, blk: id_of(i, j - 1) })
                        };
                        let blk = mb.block_mut(plane);
                        blk.off_x = j * 4;
                        blk.off_y = i * 4;
                        blk.above = above_link;
                        blk.left = left_link;
                    }
                }
            }

            // The DC blocks sit at the macroblock origin. Their entropy
            // context references the neighbouring AC blocks, not other DC
            // blocks.
            mb.lum_dc.off_x = 0;
            mb.lum_dc.off_y = 0;
            mb.lum_dc.above = above.map(|a| BlockLink { mb: a, blk: BlockId::Lum(3, 0) });
            mb.lum_dc.left = left.map(|l| BlockLink { mb: l, blk: BlockId::Lum(0, 3) });
            for (dc, above_id, left_id) in [
                (BlockId::CbDc, BlockId::Cb(1, 0), BlockId::Cb(0, 1)),
                (BlockId::CrDc, BlockId::Cr(1, 0), BlockId::Cr(0, 1)),
            ] {
                let above_link = above.map(|a| BlockLink { mb: a, blk: above_id });
                let left_link = left.map(|l| BlockLink { mb: l, blk: left_id });
                let blk = mb.block_mut(dc);
                blk.off_x = 0;
                blk.off_y = 0;
                blk.above = above_link;
                blk.left = left_link;
            }
        }

        debug!(
            "initialised macroblocks {start_mb}..={end_mb} of a {}x{} grid into slice {slice}",
            self.rows, self.cols
        );
        Ok(())
    }

    /// The neighbourhood coefficient count for a block: the average when
    /// both neighbours exist, either alone otherwise, zero for none.
    pub fn num_neighbour_coeffs(&self, blk: &Block) -> i32 {
        let above = blk
            .above
            .map(|l| self.mbs[l.mb].block(l.blk).num_coeffs as i32);
        let left = blk.left.map(|l| self.mbs[l.mb].block(l.blk).num_coeffs as i32);
        match (above, left) {
            (Some(a), Some(l)) => (a + l + 1) / 2,
            (Some(a), None) => a,
            (None, Some(l)) => l,
            (None, None) => 0,
        }
    }

    /// The coeff_token context for one coding-order entry of a macroblock.
    fn entry_nc(&self, mb_index: usize, entry: &CodingOrderEntry) -> i32 {
        match entry.neighbour {
            NeighbourUse::Direct(nc) => nc,
            NeighbourUse::Skip => 0,
            NeighbourUse::Consult => {
                self.num_neighbour_coeffs(self.mbs[mb_index].block(entry.id))
            }
        }
    }

    /// Encode one macroblock onto the stream: mb_type, prediction side
    /// info, mb_qp_delta, motion vector differences, the coded block
    /// pattern and the residual blocks in coding order. Returns the bits
    /// written; on failure the cursor marks how far encoding got.
    pub fn encode_macroblock<O: FieldOrder>(
        &mut self,
        mb_index: usize,
        slice_type: SliceType,
        w: &mut BitWriter<'_, O>,
    ) -> Result<usize> {
        if mb_index >= self.mbs.len() {
            return Err(Error::OutOfBounds);
        }

        self.mbs[mb_index].set_mb_type(slice_type);

        let mut bits = 0usize;
        {
            let mb = &self.mbs[mb_index];
            bits += write_ue(w, mb.mb_type)?;
            if mb.intra {
                bits += write_ue(w, mb.intra_chr_pred_mode as u32)?;
            }
            bits += write_se(w, mb.mb_qp_delta)?;
        }

        if !self.mbs[mb_index].intra {
            // Inter 16x16: one vector difference against the median
            // prediction of the neighbourhood.
            let (px, py) = motion::predict_mv_16x16(self, mb_index);
            let mb = &mut self.mbs[mb_index];
            mb.mvd_x[0] = mb.mv_x[0] - px;
            mb.mvd_y[0] = mb.mv_y[0] - py;
            bits += write_se(w, mb.mvd_x[0])?;
            bits += write_se(w, mb.mvd_y[0])?;
        }

        let mb = &self.mbs[mb_index];
        let intra_16x16 = mb.lum_dc_skip();
        if !intra_16x16 {
            // In Intra_16x16 mode the pattern rides inside mb_type.
            w.write_bits(6, mb.coded_blk_pattern as u32)?;
            bits += 6;
        }

        let mut codec = Cavlc::new(CavlcMode::Cavlc4x4);
        for (pos, entry) in CODING_ORDER.iter().enumerate() {
            if entry.id == BlockId::LumDc && !intra_16x16 {
                continue;
            }

            let coded = self.mbs[mb_index].block(entry.id).coded;
            if !coded {
                // Nothing on the wire; the context must still see a zero
                // count here.
                self.mbs[mb_index].block_mut(entry.id).num_coeffs = 0;
                continue;
            }

            let nc = self.entry_nc(mb_index, entry);
            codec.set_mode(match entry.id {
                BlockId::CbDc | BlockId::CrDc => CavlcMode::Cavlc2x2,
                _ => CavlcMode::Cavlc4x4,
            });
            codec.set_num_neighbour_coeffs(nc);
            codec.set_dc_skip(intra_16x16 && LUM_AC_RANGE.contains(&pos));

            bits += self.mbs[mb_index].block_mut(entry.id).rle_encode(&mut codec, w)?;
        }

        Ok(bits)
    }

    /// Decode one macroblock from the stream; the exact inverse of
    /// [`Self::encode_macroblock`].
    pub fn decode_macroblock<O: FieldOrder>(
        &mut self,
        mb_index: usize,
        slice_type: SliceType,
        r: &mut BitReader<'_, O>,
    ) -> Result<usize> {
        if mb_index >= self.mbs.len() {
            return Err(Error::OutOfBounds);
        }

        let mut bits = r.bit_pos();

        let mb_type = read_ue(r)?;
        self.mbs[mb_index].mb_type = mb_type;
        self.mbs[mb_index].unpack_mb_type(slice_type)?;

        if self.mbs[mb_index].intra {
            let chr_mode = read_ue(r)?;
            if chr_mode > 3 {
                return Err(Error::VlcSymbolNotRecognised);
            }
            self.mbs[mb_index].intra_chr_pred_mode = chr_mode as u8;
        }
        self.mbs[mb_index].mb_qp_delta = read_se(r)?;

        if !self.mbs[mb_index].intra {
            let mvd_x = read_se(r)?;
            let mvd_y = read_se(r)?;
            let (px, py) = motion::predict_mv_16x16(self, mb_index);
            let mb = &mut self.mbs[mb_index];
            mb.mvd_x[0] = mvd_x;
            mb.mvd_y[0] = mvd_y;
            mb.mv_x[0] = px + mvd_x;
            mb.mv_y[0] = py + mvd_y;
        }

        let intra_16x16 = self.mbs[mb_index].lum_dc_skip();
        if !intra_16x16 {
            let pattern = r.read_bits(6)?;
            self.mbs[mb_index].coded_blk_pattern = pattern as u8;
        }
        self.mbs[mb_index].get_coded_block_pattern();

        let mut codec = Cavlc::new(CavlcMode::Cavlc4x4);
        for (pos, entry) in CODING_ORDER.iter().enumerate() {
            if entry.id == BlockId::LumDc && !intra_16x16 {
                continue;
            }

            if !self.mbs[mb_index].block(entry.id).coded {
                let blk = self.mbs[mb_index].block_mut(entry.id);
                blk.zero();
                blk.num_coeffs = 0;
                continue;
            }

            let nc = self.entry_nc(mb_index, entry);
            codec.set_mode(match entry.id {
                BlockId::CbDc | BlockId::CrDc => CavlcMode::Cavlc2x2,
                _ => CavlcMode::Cavlc4x4,
            });
            codec.set_num_neighbour_coeffs(nc);
            codec.set_dc_skip(intra_16x16 && LUM_AC_RANGE.contains(&pos));

            self.mbs[mb_index].block_mut(entry.id).rle_decode(&mut codec, r)?;
        }

        bits = r.bit_pos() - bits;
        Ok(bits)
    }
}
