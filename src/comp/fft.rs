//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Fast Fourier Transform functions.
//!

use num_complex::Complex64;
use num_traits::identities::Zero;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Planned 2-dimensional transforms (forward and inverse) of a fixed size.
///
/// Data are stored row by row. The 2-D transform is performed as 1-D transforms of all rows followed by
/// 1-D transforms of all columns (done as rows of the transposed array); rows are processed in parallel.
///
pub struct Fft2d {
    rows: usize,
    cols: usize,
    row_fwd: Arc<dyn Fft<f64>>,
    row_inv: Arc<dyn Fft<f64>>,
    col_fwd: Arc<dyn Fft<f64>>,
    col_inv: Arc<dyn Fft<f64>>
}

impl Fft2d {
    pub fn new(rows: usize, cols: usize) -> Fft2d {
        assert!(rows > 0 && cols > 0);
        let mut planner = FftPlanner::<f64>::new();
        Fft2d{
            rows,
            cols,
            row_fwd: planner.plan_fft_forward(cols),
            row_inv: planner.plan_fft_inverse(cols),
            col_fwd: planner.plan_fft_forward(rows),
            col_inv: planner.plan_fft_inverse(rows)
        }
    }

    pub fn rows(&self) -> usize { self.rows }

    pub fn cols(&self) -> usize { self.cols }

    /// Returns the discrete Fourier transform of real `input`.
    pub fn forward(&self, input: &[f64]) -> Vec<Complex64> {
        assert!(input.len() == self.rows * self.cols);
        let mut data: Vec<Complex64> = input.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        self.transform_in_place(&mut data, false);
        data
    }

    /// Returns the inverse discrete Fourier transform of `data`, normalized by the number of elements.
    pub fn inverse(&self, mut data: Vec<Complex64>) -> Vec<Complex64> {
        assert!(data.len() == self.rows * self.cols);
        self.transform_in_place(&mut data, true);
        let norm = 1.0 / (self.rows * self.cols) as f64;
        data.par_iter_mut().for_each(|v| *v *= norm);
        data
    }

    /// Returns the real part of the normalized inverse transform.
    pub fn inverse_real(&self, data: Vec<Complex64>) -> Vec<f64> {
        self.inverse(data).iter().map(|v| v.re).collect()
    }

    fn transform_in_place(&self, data: &mut Vec<Complex64>, inverse: bool) {
        let (row_fft, col_fft) = if inverse {
            (&self.row_inv, &self.col_inv)
        } else {
            (&self.row_fwd, &self.col_fwd)
        };

        transform_rows(data, self.cols, row_fft);

        let mut transposed = transpose(data, self.rows, self.cols);
        transform_rows(&mut transposed, self.rows, col_fft);
        *data = transpose(&transposed, self.cols, self.rows);
    }
}

fn transform_rows(data: &mut [Complex64], row_len: usize, fft: &Arc<dyn Fft<f64>>) {
    let scratch_len = fft.get_inplace_scratch_len();
    data.par_chunks_mut(row_len).for_each_init(
        || vec![Complex64::zero(); scratch_len],
        |scratch, row| fft.process_with_scratch(row, scratch)
    );
}

/// Transposes a `rows`x`cols` array.
fn transpose(data: &[Complex64], rows: usize, cols: usize) -> Vec<Complex64> {
    let mut result = vec![Complex64::zero(); rows * cols];
    result.par_chunks_mut(rows).enumerate().for_each(|(col, output_row)| {
        for (row, value) in output_row.iter_mut().enumerate() {
            *value = data[row * cols + col];
        }
    });
    result
}

/// Returns the 1-dimensional discrete Fourier transform of real `input`.
pub fn fft_1d(input: &[f64]) -> Vec<Complex64> {
    let mut data: Vec<Complex64> = input.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    FftPlanner::<f64>::new().plan_fft_forward(data.len()).process(&mut data);
    data
}

/// Returns the normalized inverse 1-dimensional discrete Fourier transform of `data`.
pub fn fft_1d_inverse(mut data: Vec<Complex64>) -> Vec<Complex64> {
    FftPlanner::<f64>::new().plan_fft_inverse(data.len()).process(&mut data);
    let norm = 1.0 / data.len() as f64;
    for v in data.iter_mut() { *v *= norm; }
    data
}

/// Multiplies `a` element-wise by complex conjugates of `b`; the inverse transform of the result is the
/// cyclic cross-correlation of the two signals.
pub fn multiply_conj(a: &[Complex64], b: &[Complex64]) -> Vec<Complex64> {
    assert!(a.len() == b.len());
    a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y.conj()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_then_inverse_restores_input() {
        // non-power-of-2 dimensions
        let rows = 6;
        let cols = 10;
        let input: Vec<f64> = (0..rows * cols).map(|i| ((i * 7) % 13) as f64 - 3.5).collect();
        let fft = Fft2d::new(rows, cols);
        let restored = fft.inverse_real(fft.forward(&input));
        for (a, b) in input.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1.0e-10);
        }
    }

    #[test]
    fn dc_term_is_sum_of_values() {
        let input = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let spectrum = Fft2d::new(2, 3).forward(&input);
        assert!((spectrum[0].re - 21.0).abs() < 1.0e-12);
        assert!(spectrum[0].im.abs() < 1.0e-12);
    }

    #[test]
    fn single_frequency_lands_in_expected_bin() {
        let rows = 4;
        let cols = 8;
        // cos(2π * 3x / cols), constant along rows
        let input: Vec<f64> = (0..rows * cols)
            .map(|i| (2.0 * std::f64::consts::PI * 3.0 * (i % cols) as f64 / cols as f64).cos())
            .collect();
        let spectrum = Fft2d::new(rows, cols).forward(&input);
        let expected = (rows * cols) as f64 / 2.0;
        assert!((spectrum[3].re - expected).abs() < 1.0e-9);
        assert!((spectrum[cols - 3].re - expected).abs() < 1.0e-9);
        assert!(spectrum[cols + 3].norm() < 1.0e-9);
    }
}
