//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Computations module.
//!

use crate::errors::VesError;

pub mod fft;
pub mod filter;
pub mod simplex;

/// Result of fitting `data ≈ offset + scale · model`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LinearFit {
    pub offset: f64,
    pub scale: f64
}

/// Finds `offset` and `scale` minimizing Σ(offset + scale · model - data)² over the selected elements.
///
/// Elements are selected where `mask` (if given) is positive. Fails if the system is singular
/// (e.g. nothing is selected or the selected model values are constant).
///
pub fn least_squares_fit(data: &[f64], model: &[f64], mask: Option<&[f64]>) -> Result<LinearFit, VesError> {
    assert!(data.len() == model.len());
    if let Some(mask) = mask { assert!(mask.len() == data.len()); }

    let mut n = 0.0;
    let mut sum_m = 0.0;
    let mut sum_m2 = 0.0;
    let mut sum_d = 0.0;
    let mut sum_dm = 0.0;

    for i in 0..data.len() {
        if let Some(mask) = mask {
            if !(mask[i] > 0.0) { continue; }
        }
        let (d, m) = (data[i], model[i]);
        n += 1.0;
        sum_m += m;
        sum_m2 += m * m;
        sum_d += d;
        sum_dm += d * m;
    }

    // normal equations: [[n, Σm], [Σm, Σm²]] · [offset, scale] = [Σd, Σdm]
    let det = n * sum_m2 - sum_m * sum_m;
    if n == 0.0 || !det.is_finite() || det.abs() <= 1.0e-12 * n * sum_m2 {
        return Err(VesError::Numerical(format!("singular linear fit ({} samples, determinant {})", n, det)));
    }

    Ok(LinearFit{
        offset: (sum_m2 * sum_d - sum_m * sum_dm) / det,
        scale: (n * sum_dm - sum_m * sum_d) / det
    })
}

/// Makes `values` zero-mean with unit mean energy (mean of squares).
///
/// The mean is subtracted twice to suppress rounding residue. Does nothing to all-zero input.
///
pub fn normalize_zero_mean_unit_energy(values: &mut [f64]) {
    if values.is_empty() { return; }

    let len = values.len() as f64;
    for _ in 0..2 {
        let mean = values.iter().sum::<f64>() / len;
        for v in values.iter_mut() { *v -= mean; }
    }

    let energy = values.iter().map(|v| v * v).sum::<f64>() / len;
    if energy > 0.0 {
        let norm = 1.0 / energy.sqrt();
        for v in values.iter_mut() { *v *= norm; }
    }
}
