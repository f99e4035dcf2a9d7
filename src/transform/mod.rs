// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The H.264 integer transforms with their coupled quantisers.
//!
//! Three transform shapes exist: the 4x4 residual transform, the 4x4
//! Hadamard over the luma DC coefficients of an Intra_16x16 macroblock, and
//! the 2x2 Hadamard over the chroma DC coefficients. Scaling is folded into
//! the quantisation stage, so each implementation exposes the three-way
//! [`TransformMode`] switch: the full fused operation, the transform alone,
//! or the quantiser alone. The mode travels with every call; a transform
//! object carries only its quantisation parameter.
//!
//! All arithmetic is carried in `i32` and written back to the `i16`
//! coefficient array only at the end of a stage. Negative values are
//! negated, scaled unsigned and re-negated, because an arithmetic right
//! shift of a negative value does not round the way the standard demands.

mod fwd4x4;
pub use fwd4x4::Forward4x4;
mod inv4x4;
pub use inv4x4::Inverse4x4;
mod dc4x4;
pub use dc4x4::{ForwardDc4x4, InverseDc4x4};
mod dc2x2;
pub use dc2x2::{ForwardDc2x2, InverseDc2x2};

/// What a transform call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    /// Transform then quantise (or dequantise then inverse transform).
    TransformAndQuant,
    /// The butterfly stages alone.
    TransformOnly,
    /// The quantisation stage alone.
    QuantOnly,
}

/// Forward transform/quantiser over a coefficient block, in place.
pub trait ForwardTransform {
    /// Set the quantisation parameter for subsequent calls.
    fn set_qp(&mut self, qp: u8);
    /// Current quantisation parameter.
    fn qp(&self) -> u8;
    /// Run the selected stage(s) over `coeffs`.
    fn apply(&self, mode: TransformMode, coeffs: &mut [i16]);
}

/// Inverse transform/dequantiser over a coefficient block, in place.
pub trait InverseTransform {
    /// Set the quantisation parameter for subsequent calls.
    fn set_qp(&mut self, qp: u8);
    /// Current quantisation parameter.
    fn qp(&self) -> u8;
    /// Run the selected stage(s) over `coeffs`.
    fn apply(&self, mode: TransformMode, coeffs: &mut [i16]);
}

/// Which of a quantisation row's three entries scales each 4x4 position.
pub(crate) const COL_SELECTOR: [usize; 16] = [
    0, 2, 0, 2, //
    2, 1, 2, 1, //
    0, 2, 0, 2, //
    2, 1, 2, 1,
];

/// Quantise one coefficient with sign preserved.
#[inline]
pub(crate) fn quantise(x: i32, norm: i32, f: i32, scale: u32) -> i16 {
    if x >= 0 {
        ((x * norm + f) >> scale) as i16
    } else {
        -(((-x * norm) + f) >> scale) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Deterministic residual generator for the round-trip sweeps.
    pub(crate) fn residuals(seed: u32, len: usize) -> Vec<i16> {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                ((state >> 16) % 201) as i16 - 100
            })
            .collect()
    }

    #[test]
    fn test_residual_4x4_roundtrip_stays_in_quant_ball() {
        for qp in 0..=crate::QP_MAX {
            let fwd = Forward4x4::new(qp, true);
            let inv = Inverse4x4::new(qp);
            for seed in 0..24 {
                let original = residuals(seed + 1000 * qp as u32, 16);
                let mut coeffs: [i16; 16] = original.clone().try_into().unwrap();
                fwd.apply(TransformMode::TransformAndQuant, &mut coeffs);
                inv.apply(TransformMode::TransformAndQuant, &mut coeffs);
                let ball = 2 << (qp / 6) as i32;
                for (a, b) in original.iter().zip(coeffs.iter()) {
                    let err = (*a as i32 - *b as i32).abs();
                    assert!(err <= ball, "qp {qp} seed {seed}: err {err} > {ball}");
                }
            }
        }
    }

    #[test]
    fn test_constant_block_transforms_to_lone_dc() {
        // An all-16 residual at QP 24: the DC coefficient survives
        // quantisation, every AC coefficient is zero.
        let fwd = Forward4x4::new(24, true);
        let mut coeffs = [16i16; 16];
        fwd.apply(TransformMode::TransformAndQuant, &mut coeffs);
        assert_ne!(coeffs[0], 0);
        assert!(coeffs[1..].iter().all(|&c| c == 0), "{coeffs:?}");
    }

    #[test]
    fn test_transform_only_then_quant_only_equals_fused() {
        // The Intra_16x16 pipeline splits the stages around the DC
        // Hadamard; split and fused application must agree.
        for qp in [0u8, 10, 24, 37, 51] {
            for seed in 0..8 {
                let fwd = Forward4x4::new(qp, true);
                let original = residuals(seed, 16);
                let mut fused: [i16; 16] = original.clone().try_into().unwrap();
                fwd.apply(TransformMode::TransformAndQuant, &mut fused);
                let mut split: [i16; 16] = original.try_into().unwrap();
                fwd.apply(TransformMode::TransformOnly, &mut split);
                fwd.apply(TransformMode::QuantOnly, &mut split);
                assert_eq!(fused, split, "qp {qp} seed {seed}");
            }
        }
    }

    #[test]
    fn test_dc_hadamard_butterflies_are_self_inverse_up_to_gain() {
        // The Hadamard stages carry no rounding: forward then inverse is an
        // exact gain of 16 (4x4) or 4 (2x2).
        let fwd4 = ForwardDc4x4::new(24);
        let inv4 = InverseDc4x4::new(24);
        let original: [i16; 16] = residuals(11, 16).try_into().unwrap();
        let mut coeffs = original;
        fwd4.apply(TransformMode::TransformOnly, &mut coeffs);
        inv4.apply(TransformMode::TransformOnly, &mut coeffs);
        for (a, b) in original.iter().zip(coeffs.iter()) {
            assert_eq!(*a as i32 * 16, *b as i32);
        }

        let fwd2 = ForwardDc2x2::new(24);
        let inv2 = InverseDc2x2::new(24);
        let original: [i16; 4] = residuals(13, 4).try_into().unwrap();
        let mut coeffs = original;
        fwd2.apply(TransformMode::TransformOnly, &mut coeffs);
        inv2.apply(TransformMode::TransformOnly, &mut coeffs);
        for (a, b) in original.iter().zip(coeffs.iter()) {
            assert_eq!(*a as i32 * 4, *b as i32);
        }
    }

    // Small 8-bit-video residuals for the staged DC pipelines.
    fn pel_residuals(seed: u32, len: usize) -> Vec<i16> {
        residuals(seed, len).iter().map(|&v| v / 2).collect()
    }

    #[test]
    fn test_intra16x16_luma_pipeline_roundtrip() {
        // The full Intra_16x16 luma chain: transform-only each 4x4, Hadamard
        // and quantise the collected DCs, quantise the ACs; then invert it
        // all and compare against the source residuals.
        for qp in [0u8, 10, 24, 36, 42, 51] {
            let fwd = Forward4x4::new(qp, true);
            let inv = Inverse4x4::new(qp);
            let fwd_dc = ForwardDc4x4::new(qp);
            let inv_dc = InverseDc4x4::new(qp);

            let mut blocks: Vec<[i16; 16]> = (0..16)
                .map(|k| pel_residuals(k + 100 * qp as u32, 16).try_into().unwrap())
                .collect();
            let original = blocks.clone();

            for blk in blocks.iter_mut() {
                fwd.apply(TransformMode::TransformOnly, blk);
            }
            let mut dc: [i16; 16] = std::array::from_fn(|k| blocks[k][0]);
            fwd_dc.apply(TransformMode::TransformAndQuant, &mut dc);
            for blk in blocks.iter_mut() {
                fwd.apply(TransformMode::QuantOnly, blk);
            }

            inv_dc.apply(TransformMode::TransformAndQuant, &mut dc);
            for (k, blk) in blocks.iter_mut().enumerate() {
                inv.apply(TransformMode::QuantOnly, blk);
                blk[0] = dc[k];
                inv.apply(TransformMode::TransformOnly, blk);
            }

            let ball = 16 + (8 << (qp / 6) as i32);
            for (k, (a, b)) in original.iter().zip(blocks.iter()).enumerate() {
                for (x, y) in a.iter().zip(b.iter()) {
                    let err = (*x as i32 - *y as i32).abs();
                    assert!(err <= ball, "qp {qp} blk {k}: err {err} > {ball}");
                }
            }
        }
    }

    #[test]
    fn test_chroma_pipeline_roundtrip() {
        // The chroma chain over one 8x8 plane: four 4x4 residual blocks,
        // their DCs through the 2x2 Hadamard.
        for qp in [0u8, 10, 24, 30, 39, 51] {
            let fwd = Forward4x4::new(qp, true);
            let inv = Inverse4x4::new(qp);
            let fwd_dc = ForwardDc2x2::new(qp);
            let inv_dc = InverseDc2x2::new(qp);

            let mut blocks: Vec<[i16; 16]> = (0..4)
                .map(|k| pel_residuals(k + 7 + 100 * qp as u32, 16).try_into().unwrap())
                .collect();
            let original = blocks.clone();

            for blk in blocks.iter_mut() {
                fwd.apply(TransformMode::TransformOnly, blk);
            }
            let mut dc: [i16; 4] = std::array::from_fn(|k| blocks[k][0]);
            fwd_dc.apply(TransformMode::TransformAndQuant, &mut dc);
            for blk in blocks.iter_mut() {
                fwd.apply(TransformMode::QuantOnly, blk);
            }

            inv_dc.apply(TransformMode::TransformAndQuant, &mut dc);
            for (k, blk) in blocks.iter_mut().enumerate() {
                inv.apply(TransformMode::QuantOnly, blk);
                blk[0] = dc[k];
                inv.apply(TransformMode::TransformOnly, blk);
            }

            let ball = 16 + (8 << (qp / 6) as i32);
            for (k, (a, b)) in original.iter().zip(blocks.iter()).enumerate() {
                for (x, y) in a.iter().zip(b.iter()) {
                    let err = (*x as i32 - *y as i32).abs();
                    assert!(err <= ball, "qp {qp} blk {k}: err {err} > {ball}");
                }
            }
        }
    }
}
