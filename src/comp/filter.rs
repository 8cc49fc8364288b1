//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Fourier-domain filters.
//!

use crate::comp::fft::{self, Fft2d};
use crate::image::Image;
use num_complex::Complex64;

/// Specifies where the zero frequency of a filter lies.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FilterLayout {
    /// Zero frequency at index 0 (FFT order).
    Origin,
    /// Zero frequency at index (floor(n/2), floor(n/2)).
    #[cfg(test)]
    Centered
}

/// Returns `image` with the element at (floor(w/2), floor(h/2)) moved to (0, 0), cyclically.
pub fn center_to_origin(image: &Image) -> Image {
    let w = image.width() as i64;
    let h = image.height() as i64;
    image.shift_cyclic(1 - w / 2, 1 - h / 2)
}

/// Inverse of `center_to_origin`.
#[cfg(test)]
pub fn origin_to_center(image: &Image) -> Image {
    let w = image.width() as i64;
    let h = image.height() as i64;
    image.shift_cyclic(1 + w / 2, 1 + h / 2)
}

/// Returns real(IFFT(filter · FFT(image))). The filter must have the same size as the image.
#[must_use]
pub fn apply_filter(image: &Image, filter: &Image, layout: FilterLayout) -> Image {
    let fft = Fft2d::new(image.height() as usize, image.width() as usize);
    match layout {
        FilterLayout::Origin => apply_filter_with(&fft, image, filter),
        #[cfg(test)]
        FilterLayout::Centered => apply_filter_with(&fft, image, &center_to_origin(filter))
    }
}

/// Same as `apply_filter` for an origin-centered filter, using prepared transforms.
#[must_use]
pub fn apply_filter_with(fft: &Fft2d, image: &Image, filter: &Image) -> Image {
    assert!(image.width() == filter.width() && image.height() == filter.height());
    assert!(fft.rows() == image.height() as usize && fft.cols() == image.width() as usize);

    let mut spectrum = fft.forward(image.pixels());
    for (s, q) in spectrum.iter_mut().zip(filter.pixels().iter()) {
        *s *= *q;
    }

    Image::new_from_pixels(image.width(), image.height(), fft.inverse_real(spectrum))
}

/// Gaussian low-pass filter of a 1-dimensional signal.
///
/// `cutoff` is the half-amplitude frequency as a fraction of the sampling frequency.
///
pub fn gauss_filt_1d(values: &[f64], cutoff: f64) -> Vec<f64> {
    let n = values.len();
    if n == 0 { return vec![]; }

    let k = -(2.0f64.ln()) / (2.0 * cutoff.powi(2) * (n as f64).powi(2));
    let kernel: Vec<f64> = (0..n).map(|i| {
        let x = i as f64 - n as f64 / 2.0;
        (k * x * x).exp()
    }).collect();

    // move the center (index n/2) to the origin
    let shift = n / 2;
    let mut shifted = vec![0.0; n];
    for (i, q) in kernel.iter().enumerate() {
        shifted[(i + shift) % n] = *q;
    }

    let spectrum: Vec<Complex64> = fft::fft_1d(values).iter().zip(shifted.iter()).map(|(s, q)| *s * *q).collect();
    fft::fft_1d_inverse(spectrum).iter().map(|v| v.re).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_moves_to_origin_and_back() {
        for &(w, h) in &[(6, 4), (5, 7)] {
            let mut img = Image::new(w, h);
            img.set(w / 2, h / 2, 1.0);
            let at_origin = center_to_origin(&img);
            assert_eq!(1.0, at_origin.get(0, 0));
            assert_eq!(img, origin_to_center(&at_origin));
        }
    }

    #[test]
    fn unit_filter_preserves_image() {
        let img = Image::from_fn(6, 5, |x, y| (x * y) as f64 + 0.5);
        let filtered = apply_filter(&img, &Image::new_filled(6, 5, 1.0), FilterLayout::Centered);
        for (a, b) in img.pixels().iter().zip(filtered.pixels().iter()) {
            assert!((a - b).abs() < 1.0e-10);
        }
    }

    #[test]
    fn dc_only_filter_gives_mean() {
        let img = Image::from_fn(4, 4, |x, y| (x + 2 * y) as f64);
        let mut filter = Image::new(4, 4);
        filter.set(2, 2, 1.0);
        let filtered = apply_filter(&img, &filter, FilterLayout::Centered);
        for p in filtered.pixels() {
            assert!((p - img.mean()).abs() < 1.0e-10);
        }
    }

    #[test]
    fn gaussian_filter_preserves_constant() {
        let filtered = gauss_filt_1d(&[2.0; 16], 0.1);
        for v in filtered {
            assert!((v - 2.0).abs() < 1.0e-10);
        }
    }
}
