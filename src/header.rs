// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stream header reading: NAL framing and the parameters the entropy layer
//! trusts.
//!
//! A thin front-end, never on the hot path. It locates the Annex-B start
//! code, strips emulation-prevention bytes, reads the NAL header and
//! demultiplexes into the four picture coding types the core cares about.
//! Sequence parameter sets are parsed far enough to answer `width` and
//! `height`; slice headers far enough to answer `picture_coding_type`.

use log::debug;

use crate::bitstream::{BitReader, Msb0};
use crate::golomb::read_ue;
use crate::{Error, Result};

/// What the extracted NAL unit announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureCodingType {
    Intra,
    Inter,
    SequenceParams,
    PictureParams,
}

impl PictureCodingType {
    /// The integer the string-keyed lookup reports.
    fn value(self) -> i32 {
        match self {
            PictureCodingType::Intra => 0,
            PictureCodingType::Inter => 1,
            PictureCodingType::SequenceParams => 2,
            PictureCodingType::PictureParams => 3,
        }
    }
}

/// NAL unit types the header reader demultiplexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum NalUnitType {
    CodedSliceOfANonIdrPicture,
    CodedSliceOfAnIdrPicture,
    SequenceParameterSet,
    PictureParameterSet,
}

impl NalUnitType {
    fn from_value(v: u8) -> Result<Self> {
        Ok(match v {
            1 => Self::CodedSliceOfANonIdrPicture,
            5 => Self::CodedSliceOfAnIdrPicture,
            7 => Self::SequenceParameterSet,
            8 => Self::PictureParameterSet,
            _ => return Err(Error::VlcSymbolNotRecognised),
        })
    }

    fn value(self) -> u8 {
        match self {
            Self::CodedSliceOfANonIdrPicture => 1,
            Self::CodedSliceOfAnIdrPicture => 5,
            Self::SequenceParameterSet => 7,
            Self::PictureParameterSet => 8,
        }
    }
}

/// Find the byte offset just past the next Annex-B start code (00 00 01,
/// with any number of leading zeros), or `None` when the stream carries no
/// start code at all.
fn past_start_code(stream: &[u8]) -> Option<usize> {
    for zero in memchr::memchr_iter(0x00, stream) {
        if stream[zero + 1..].first() == Some(&0x00) && stream[zero + 2..].first() == Some(&0x01) {
            return Some(zero + 3);
        }
    }
    None
}

/// Strip emulation-prevention bytes: every 00 00 03 on the wire carries a
/// raw 00 00. The inverse of the encoder-side escape insertion.
fn ebsp_to_rbsp(ebsp: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(ebsp.len());
    let mut input = ebsp;
    while let Some(first_idx) = memchr::memchr(0x00, input) {
        if input[first_idx + 1..].first() == Some(&0x00)
            && input[first_idx + 2..].first() == Some(&0x03)
        {
            rbsp.extend_from_slice(&input[..first_idx + 2]);
            input = &input[first_idx + 3..];
        } else {
            rbsp.extend_from_slice(&input[..first_idx + 1]);
            input = &input[first_idx + 1..];
        }
    }
    rbsp.extend_from_slice(input);
    rbsp
}

/// Extracted stream header state, valid after a successful
/// [`StreamHeader::extract`].
#[derive(Debug, Default)]
pub struct StreamHeader {
    picture_coding_type: Option<PictureCodingType>,
    nal_ref_idc: u8,
    nal_unit_type: Option<NalUnitType>,
    profile_idc: Option<u8>,
    level_idc: Option<u8>,
    width: Option<i32>,
    height: Option<i32>,
    slice_type: Option<u32>,
}

impl StreamHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the header from the first NAL unit of `stream`.
    ///
    /// `bit_len` bounds how much of the buffer belongs to the stream.
    /// Parameter values survive across calls, so a sequence parameter set
    /// keeps answering `width` while subsequent slices are extracted.
    pub fn extract(&mut self, stream: &[u8], bit_len: usize) -> Result<()> {
        let stream = &stream[..(bit_len / 8).min(stream.len())];
        let nal_start = match past_start_code(stream) {
            Some(idx) => idx,
            None => 0, // A bare NAL unit without Annex-B framing.
        };
        if nal_start >= stream.len() {
            return Err(Error::StreamAccessDenied);
        }

        let header_byte = stream[nal_start];
        if header_byte & 0x80 != 0 {
            // forbidden_zero_bit set: not a NAL header.
            return Err(Error::VlcSymbolNotRecognised);
        }
        self.nal_ref_idc = (header_byte >> 5) & 0x03;
        let unit_type = NalUnitType::from_value(header_byte & 0x1f)?;
        self.nal_unit_type = Some(unit_type);

        let payload = ebsp_to_rbsp(&stream[nal_start + 1..]);
        match unit_type {
            NalUnitType::SequenceParameterSet => {
                self.parse_sps(&payload)?;
                self.picture_coding_type = Some(PictureCodingType::SequenceParams);
            }
            NalUnitType::PictureParameterSet => {
                self.picture_coding_type = Some(PictureCodingType::PictureParams);
            }
            NalUnitType::CodedSliceOfAnIdrPicture => {
                self.parse_slice_header(&payload)?;
                self.picture_coding_type = Some(PictureCodingType::Intra);
            }
            NalUnitType::CodedSliceOfANonIdrPicture => {
                self.parse_slice_header(&payload)?;
                // slice_type 2 and 7 are I slices carried outside an IDR.
                let coding = match self.slice_type {
                    Some(2) | Some(7) => PictureCodingType::Intra,
                    _ => PictureCodingType::Inter,
                };
                self.picture_coding_type = Some(coding);
            }
        }

        debug!(
            "extracted NAL type {:?} (ref idc {}): picture coding type {:?}",
            unit_type, self.nal_ref_idc, self.picture_coding_type
        );
        Ok(())
    }

    /// The minimal Baseline sequence parameter set walk: just far enough to
    /// recover the picture dimensions.
    fn parse_sps(&mut self, rbsp: &[u8]) -> Result<()> {
        if rbsp.len() < 4 {
            return Err(Error::StreamAccessDenied);
        }
        self.profile_idc = Some(rbsp[0]);
        // rbsp[1] carries the constraint-set flags; nothing here needs them.
        self.level_idc = Some(rbsp[2]);

        let mut r: BitReader<Msb0> = BitReader::new(&rbsp[3..]);
        let _seq_parameter_set_id = read_ue(&mut r)?;
        let _log2_max_frame_num_minus4 = read_ue(&mut r)?;
        let pic_order_cnt_type = read_ue(&mut r)?;
        if pic_order_cnt_type == 0 {
            let _log2_max_pic_order_cnt_lsb_minus4 = read_ue(&mut r)?;
        } else {
            // Types 1 and 2 are never written by the Baseline tools this
            // reader fronts for.
            return Err(Error::VlcSymbolNotRecognised);
        }
        let _max_num_ref_frames = read_ue(&mut r)?;
        let _gaps_in_frame_num_value_allowed = r.read_bit()?;
        let pic_width_in_mbs_minus1 = read_ue(&mut r)?;
        let pic_height_in_map_units_minus1 = read_ue(&mut r)?;

        self.width = Some((pic_width_in_mbs_minus1 as i32 + 1) * 16);
        self.height = Some((pic_height_in_map_units_minus1 as i32 + 1) * 16);
        Ok(())
    }

    fn parse_slice_header(&mut self, rbsp: &[u8]) -> Result<()> {
        let mut r: BitReader<Msb0> = BitReader::new(rbsp);
        let _first_mb_in_slice = read_ue(&mut r)?;
        self.slice_type = Some(read_ue(&mut r)?);
        Ok(())
    }

    /// String-keyed parameter lookup.
    ///
    /// Known names: `width`, `height`, `picture_coding_type`,
    /// `nal_unit_type`, `nal_ref_idc`, `profile_idc`, `level_idc`,
    /// `slice_type`. Returns `None` for unknown names and for parameters
    /// not yet seen on the stream.
    pub fn get(&self, name: &str) -> Option<i32> {
        match name {
            "width" => self.width,
            "height" => self.height,
            "picture_coding_type" => self.picture_coding_type.map(|t| t.value()),
            "nal_unit_type" => self.nal_unit_type.map(|t| t.value() as i32),
            "nal_ref_idc" => Some(self.nal_ref_idc as i32),
            "profile_idc" => self.profile_idc.map(|v| v as i32),
            "level_idc" => self.level_idc.map(|v| v as i32),
            "slice_type" => self.slice_type.map(|v| v as i32),
            _ => None,
        }
    }

    /// The last extracted picture coding type.
    pub fn picture_coding_type(&self) -> Option<PictureCodingType> {
        self.picture_coding_type
    }
}
