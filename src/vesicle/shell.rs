//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Analytic projection of a spherical bilayer shell.
//!

use cgmath::Vector2;
use crate::image::Image;
use std::f64::consts::PI;

/// Structure of the membrane shell. Lengths are in Å.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShellParams {
    /// Membrane thickness.
    pub thickness: f64,
    /// Extra density of the head-group layers (relative to the membrane body).
    pub head_group_height: f64,
    /// Depth of the density dip in the middle of the membrane.
    pub central_dip: f64,
    /// Half-width of the head-group peaks and of the central dip.
    pub peak_half_width: f64,
    /// Density of the vesicle's interior.
    pub interior: f64
}

impl Default for ShellParams {
    fn default() -> ShellParams {
        ShellParams{ thickness: 50.0, head_group_height: 0.2, central_dip: 0.05, peak_half_width: 4.2, interior: 0.0 }
    }
}

impl ShellParams {
    /// Shell used by membrane model 2.
    pub fn thick_head_groups() -> ShellParams {
        ShellParams{ thickness: 61.64, head_group_height: -0.36, central_dip: 0.18, peak_half_width: 4.64, interior: -0.1 }
    }

    /// Returns the projected density normalization (area of the radial profile).
    fn normalization(&self) -> f64 {
        self.thickness + 4.0 * self.peak_half_width * self.head_group_height - 2.0 * self.peak_half_width * self.central_dip
    }
}

/// Returns the supersampling factor of the radial lookup table for a vesicle of `radius_px` pixels.
pub fn supersampling(radius_px: f64) -> u32 {
    if radius_px > 100.0 {
        1
    } else if radius_px > 50.0 {
        2
    } else if radius_px > 24.0 {
        4
    } else {
        8
    }
}

/// Antiderivative of the chord length of a disk of radius `r`: x·√(r²-x²) + r²·asin(x/r),
/// continued as ±r²π/2 for |x| > r.
fn chord_antiderivative(x: f64, r: f64) -> f64 {
    if r == 0.0 { return 0.0; }

    let sqrt_part = if x * x < r * r { x * (r * r - x * x).sqrt() } else { 0.0 };
    let q = x / r;
    let asin_part = if q >= 1.0 {
        PI / 2.0
    } else if q <= -1.0 {
        -PI / 2.0
    } else {
        q.asin()
    };

    sqrt_part + r * r * asin_part
}

/// Integral of the chord length of a disk of radius `r` over [x - 1, x].
fn chord_integral(x: f64, r: f64) -> f64 {
    chord_antiderivative(x, r) - chord_antiderivative(x - 1.0, r)
}

/// Renders the projection of a spherical shell of radius `radius` (Å) in an `n`x`n` image.
///
/// The projection is computed exactly per bin of a supersampled radial table (integral of sphere chords
/// over each bin) and interpolated linearly at pixel positions. The result is normalized so that the
/// projected membrane has unit density per Å of thickness.
///
/// `center` is 1-based (default: (floor(n/2) + 1, floor(n/2) + 1)); it may be fractional.
/// `supersampling_factor` defaults to `supersampling(radius / pixel_size)`.
///
pub fn ves_density_circular(
    n: u32,
    pixel_size: f64,
    radius: f64,
    shell: &ShellParams,
    center: Option<Vector2<f64>>,
    supersampling_factor: Option<u32>
) -> Image {
    let center = center.unwrap_or_else(|| {
        let c = (n / 2 + 1) as f64;
        Vector2{ x: c, y: c }
    });
    let scale = supersampling_factor.unwrap_or_else(|| supersampling(radius / pixel_size)) as f64;

    // everything below is in supersampled pixels
    let step = pixel_size / scale;
    let a = radius / step;
    let d = shell.thickness / step;
    let wth = shell.peak_half_width / step;

    let outer = a + d / 2.0;
    let inner = a - d / 2.0;
    let head_in = inner + 2.0 * wth;
    let head_out = outer - 2.0 * wth;
    let dip_in = a - wth;
    let dip_out = a + wth;

    let mut max_r = 0.0f64;
    for &x in &[1.0, n as f64] {
        for &y in &[1.0, n as f64] {
            max_r = max_r.max(((x - center.x).powi(2) + (y - center.y).powi(2)).sqrt());
        }
    }
    let num_bins = (scale * max_r + 1.0).floor() as usize + 1;

    let mut table = vec![0.0; num_bins + 1];
    for (i, value) in table.iter_mut().take(num_bins).enumerate() {
        let xp = i as f64 + 0.5;
        let w1 = chord_integral(xp, outer);
        let w0 = chord_integral(xp, inner);
        let t_in = chord_integral(xp, head_in);
        let t_out = chord_integral(xp, head_out);
        let cp_in = chord_integral(xp, dip_in);
        let cp_out = chord_integral(xp, dip_out);

        *value = (w1 - w0)
            + (t_in - w0) * shell.head_group_height
            + (w1 - t_out) * shell.head_group_height
            - (cp_out - cp_in) * shell.central_dip
            + w0 * shell.interior;
    }

    // profile area in supersampled pixels
    let norm = step / shell.normalization();

    Image::from_fn(n, n, |x, y| {
        let xx = x as f64 + 1.0 - center.x;
        let yy = y as f64 + 1.0 - center.y;
        let rr = scale * (xx * xx + yy * yy).sqrt() + 1.0;
        let r0 = rr.floor();
        let rf = rr - r0;
        let r0 = r0 as usize;
        ((1.0 - rf) * table[r0 - 1] + rf * table[r0]) * norm
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supersampling_decreases_with_radius() {
        assert_eq!(8, supersampling(10.0));
        assert_eq!(8, supersampling(24.0));
        assert_eq!(4, supersampling(24.5));
        assert_eq!(2, supersampling(60.0));
        assert_eq!(1, supersampling(100.5));
    }

    #[test]
    fn chord_integral_of_whole_disk_is_its_area() {
        let r = 7.3;
        let total: f64 = (-8..=8).map(|i| chord_integral(i as f64 + 0.5, r)).sum();
        assert!((total - PI * r * r).abs() < 1.0e-9);
        assert_eq!(0.0, chord_integral(20.0, r));
        assert_eq!(0.0, chord_integral(3.0, 0.0));
    }

    #[test]
    fn default_shell_is_normalized_by_its_profile_area() {
        let shell = ShellParams::default();
        assert!((shell.normalization() - (50.0 + 4.0 * 4.2 * 0.2 - 2.0 * 4.2 * 0.05)).abs() < 1.0e-12);
    }

    #[test]
    fn given_default_center_projection_is_symmetric() {
        let n = 64;
        let img = ves_density_circular(n, 4.0, 80.0, &ShellParams::default(), None, None);
        let c = n / 2;
        for k in 1..c {
            assert!((img.get(c + k, c) - img.get(c - k, c)).abs() < 1.0e-9);
            assert!((img.get(c, c + k) - img.get(c + k, c)).abs() < 1.0e-9);
        }
    }

    #[test]
    fn projection_vanishes_outside_the_shell_and_peaks_in_the_membrane() {
        let n = 64;
        let pixel_size = 4.0;
        let radius = 60.0;
        let shell = ShellParams::default();
        let img = ves_density_circular(n, pixel_size, radius, &shell, None, None);

        // corners are far outside the outer radius (85 Å = 21.25 px)
        assert!(img.get(0, 0).abs() < 1.0e-9);
        assert!(img.get(n - 1, n - 1).abs() < 1.0e-9);

        let c = n / 2;
        assert!(img.get(c, c) > 0.0);

        let (peak_x, _) = (c..n)
            .map(|x| (x, img.get(x, c)))
            .fold((c, std::f64::NEG_INFINITY), |best, (x, v)| if v > best.1 { (x, v) } else { best });
        let peak_dist = (peak_x - c) as f64 * pixel_size;
        assert!(peak_dist >= radius - shell.thickness / 2.0 - pixel_size);
        assert!(peak_dist <= radius + shell.thickness / 2.0);
    }

    #[test]
    fn fractional_center_moves_the_projection() {
        let n = 48;
        let shell = ShellParams::default();
        let centered = ves_density_circular(n, 4.0, 50.0, &shell, None, Some(4));
        let moved = ves_density_circular(n, 4.0, 50.0, &shell, Some(Vector2{ x: 27.0, y: 25.0 }), Some(4));
        for y in 0..n {
            for x in 2..n {
                assert!((moved.get(x, y) - centered.get(x - 2, y)).abs() < 1.0e-9);
            }
        }
    }
}
