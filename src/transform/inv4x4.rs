// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Inverse 4x4 integer transform with fused dequantisation.

use super::{InverseTransform, TransformMode, COL_SELECTOR};
use crate::QP_MAX;

/// Dequantisation scale numerators per QP mod 6; columns as in the forward
/// direction. Values include the flat weight scale of 16.
const NORM_ADJUST: [[i32; 3]; 6] = [
    [10, 16, 13],
    [11, 18, 14],
    [13, 20, 16],
    [14, 23, 18],
    [16, 25, 20],
    [18, 29, 23],
];

const WEIGHT_SCALE_FLAT: i32 = 16;

/// The inverse 4x4 residual transform and dequantiser.
///
/// Dequantisation is a pre-scaling stage: coefficients are expanded before
/// the butterflies, switching from a rounded right shift to a left shift
/// once QP reaches 24.
pub struct Inverse4x4 {
    qp: u8,
    level_scale: [i32; 16],
}

impl Inverse4x4 {
    pub fn new(qp: u8) -> Self {
        let mut t = Self { qp: 0, level_scale: [0; 16] };
        t.set_qp(qp);
        t
    }

    #[inline]
    fn dequantise(&self, pos: usize, c: i32) -> i32 {
        let x = c * self.level_scale[pos];
        let qe = (self.qp / 6) as u32;
        if self.qp < 24 {
            (x + (1 << (3 - qe))) >> (4 - qe)
        } else {
            x << (qe - 4)
        }
    }

    fn dequant_stage(&self, coeffs: &mut [i16; 16]) {
        for (pos, c) in coeffs.iter_mut().enumerate() {
            *c = self.dequantise(pos, *c as i32) as i16;
        }
    }

    fn transform_rows(&self, coeffs: &mut [i16; 16], dequant: bool) {
        for (r, row) in coeffs.chunks_exact_mut(4).enumerate() {
            let mut x = [0i32; 4];
            for (i, xi) in x.iter_mut().enumerate() {
                *xi = if dequant {
                    self.dequantise(r * 4 + i, row[i] as i32)
                } else {
                    row[i] as i32
                };
            }

            let s0 = x[0] + x[2];
            let s1 = x[0] - x[2];
            let s2 = (x[1] >> 1) - x[3];
            let s3 = x[1] + (x[3] >> 1);

            row[0] = (s0 + s3) as i16;
            row[3] = (s0 - s3) as i16;
            row[1] = (s1 + s2) as i16;
            row[2] = (s1 - s2) as i16;
        }
    }

    fn transform_cols(coeffs: &mut [i16; 16]) {
        for j in 0..4 {
            let s0 = coeffs[j] as i32 + coeffs[j + 8] as i32;
            let s1 = coeffs[j] as i32 - coeffs[j + 8] as i32;
            let s2 = ((coeffs[j + 4] as i32) >> 1) - coeffs[j + 12] as i32;
            let s3 = coeffs[j + 4] as i32 + ((coeffs[j + 12] as i32) >> 1);

            coeffs[j] = ((s0 + s3 + 32) >> 6) as i16;
            coeffs[j + 12] = ((s0 - s3 + 32) >> 6) as i16;
            coeffs[j + 4] = ((s1 + s2 + 32) >> 6) as i16;
            coeffs[j + 8] = ((s1 - s2 + 32) >> 6) as i16;
        }
    }
}

impl InverseTransform for Inverse4x4 {
    fn set_qp(&mut self, qp: u8) {
        debug_assert!(qp <= QP_MAX);
        self.qp = qp;
        let qm = (qp % 6) as usize;
        for pos in 0..16 {
            self.level_scale[pos] = NORM_ADJUST[qm][COL_SELECTOR[pos]] * WEIGHT_SCALE_FLAT;
        }
    }

    fn qp(&self) -> u8 {
        self.qp
    }

    fn apply(&self, mode: TransformMode, coeffs: &mut [i16]) {
        let coeffs: &mut [i16; 16] = coeffs.try_into().expect("inverse 4x4 needs 16 coefficients");
        match mode {
            TransformMode::QuantOnly => self.dequant_stage(coeffs),
            TransformMode::TransformOnly => {
                self.transform_rows(coeffs, false);
                Self::transform_cols(coeffs);
            }
            TransformMode::TransformAndQuant => {
                self.transform_rows(coeffs, true);
                Self::transform_cols(coeffs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Forward4x4, ForwardTransform};

    #[test]
    fn test_lone_dc_reconstructs_flat_block() {
        // Quantised DC of the all-16 block at QP 24 reconstructs to a flat
        // block one step below the source (the quantiser rounded down).
        let inv = Inverse4x4::new(24);
        let mut coeffs = [0i16; 16];
        coeffs[0] = 6;
        inv.apply(TransformMode::TransformAndQuant, &mut coeffs);
        assert!(coeffs.iter().all(|&c| c == 15), "{coeffs:?}");
    }

    #[test]
    fn test_fused_equals_split_stages() {
        for qp in [0u8, 17, 24, 51] {
            let fwd = Forward4x4::new(qp, true);
            let inv = Inverse4x4::new(qp);
            let original: [i16; 16] = crate::transform::tests::residuals(qp as u32, 16)
                .try_into()
                .unwrap();

            let mut quantised = original;
            fwd.apply(TransformMode::TransformAndQuant, &mut quantised);

            let mut fused = quantised;
            inv.apply(TransformMode::TransformAndQuant, &mut fused);

            let mut split = quantised;
            inv.apply(TransformMode::QuantOnly, &mut split);
            inv.apply(TransformMode::TransformOnly, &mut split);

            assert_eq!(fused, split, "qp {qp}");
        }
    }
}
