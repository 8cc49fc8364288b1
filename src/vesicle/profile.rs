//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Radial membrane profiles and their projection.
//!

use crate::comp::filter;
use crate::errors::VesError;
use crate::image::Image;
use rayon::prelude::*;

/// Identifier of the built-in measured profile.
pub const BUILTIN_PROFILE_ID: i32 = 44;

/// Measured bilayer profile (300 kV, energy-filtered), sampled every pixel from -25 to 25 at 2.112 Å/pixel.
const MODEL_44_DENSITY: [f64; 51] = [
    0.0226057019909365, 0.0252021990537559, 0.00485938558557869, 0.0256541100536305,
    0.000981550525522873, -0.0497238811929170, 0.0440611267774491, 0.00488015547836201,
    -0.00169744859071094, 0.0378464802756880, 0.0240096571753982, 0.0701905042504966, 0.112803145158847,
    0.220858833655673, 0.325610180697430, 0.470355832691475, 0.585072998126252, 0.652651493194249,
    0.656930757637444, 0.659836776122480, 0.638555542838540, 0.622161865703875, 0.590627989459644,
    0.555197812566001, 0.452965746494022, 0.426309369525603, 0.470218987523958, 0.540928357498853,
    0.559852365388236, 0.581389132430551, 0.606032801830115, 0.613400245596709, 0.635424310958883,
    0.645131542098614, 0.621306836732483, 0.574827517925640, 0.457392485410873, 0.287206470195894,
    0.160438292081854, 0.0604879337148811, 0.0364709272295661, 0.000868729643717925,
    -0.000591637120631788, -0.0174713174128332, -0.0151496150820872, 0.0138930377783886,
    -0.00274894092210304, 0.000264283341471494, 0.00722820749218572, 0.00406397815218479,
    0.00964327412970650
];

const MODEL_44_PIXEL_SIZE: f64 = 2.112;

/// Samples outside [MODEL_44_FIRST, MODEL_44_END) are background and get zeroed.
const MODEL_44_FIRST: usize = 12;
const MODEL_44_END: usize = 39;

/// Radial density of a membrane, sampled on a uniform grid.
///
/// `x` is the signed distance from the membrane's middle surface in pixels of size `pixel_size` (Å);
/// the density is constant beyond both ends of the grid.
///
#[derive(Clone, Debug, PartialEq)]
pub struct MembraneProfile {
    x: Vec<f64>,
    y: Vec<f64>,
    pixel_size: f64
}

/// Returns true if `x` is strictly increasing with (numerically) constant spacing.
pub fn is_uniform_grid(x: &[f64]) -> bool {
    if x.len() < 2 { return false; }

    let n = x.len();
    let first_step = x[1] - x[0];
    let last_step = x[n - 1] - x[n - 2];

    x.windows(2).all(|w| w[1] > w[0]) &&
        (first_step - last_step).abs() < (first_step / n as f64 / 10000.0).abs()
}

impl MembraneProfile {
    pub fn new(x: Vec<f64>, y: Vec<f64>, pixel_size: f64) -> Result<MembraneProfile, VesError> {
        if x.len() != y.len() {
            return Err(VesError::Configuration(format!(
                "profile has {} positions and {} density values", x.len(), y.len()
            )));
        }
        if !(pixel_size > 0.0) {
            return Err(VesError::Configuration(format!("invalid profile pixel size: {}", pixel_size)));
        }
        if !is_uniform_grid(&x) {
            return Err(VesError::Numerical("membrane profile is not on a regular grid".to_string()));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(VesError::Numerical("membrane profile contains non-finite values".to_string()));
        }

        Ok(MembraneProfile{ x, y, pixel_size })
    }

    /// Returns a built-in profile.
    ///
    /// Model 44 is smoothed, clipped to non-negative values, shifted so that its tail is zero
    /// and scaled to the maximum of 1.
    ///
    pub fn builtin(model_id: i32) -> Result<MembraneProfile, VesError> {
        if model_id != BUILTIN_PROFILE_ID { return Err(VesError::UnsupportedModel(model_id)); }

        let mut density = MODEL_44_DENSITY.to_vec();
        for (i, v) in density.iter_mut().enumerate() {
            if i < MODEL_44_FIRST || i >= MODEL_44_END { *v = 0.0; }
        }

        let mut smoothed: Vec<f64> = filter::gauss_filt_1d(&density, 0.15)
            .iter()
            .map(|v| v.max(0.0) * 1.38)
            .collect();

        let tail = smoothed[smoothed.len() - 1];
        for v in smoothed.iter_mut() { *v -= tail; }
        let max = smoothed.iter().cloned().fold(std::f64::NEG_INFINITY, f64::max);
        if !(max > 0.0) {
            return Err(VesError::Numerical("built-in profile has no positive values".to_string()));
        }
        for v in smoothed.iter_mut() { *v /= max; }

        let half = (MODEL_44_DENSITY.len() / 2) as i32;
        let x = (-half..=half).map(|i| i as f64).collect();

        MembraneProfile::new(x, smoothed, MODEL_44_PIXEL_SIZE)
    }

    #[cfg(test)]
    pub fn x(&self) -> &[f64] { &self.x }

    #[cfg(test)]
    pub fn y(&self) -> &[f64] { &self.y }

    pub fn pixel_size(&self) -> f64 { self.pixel_size }

    /// Returns the same profile with positions expressed in pixels of size `pixel_size`.
    pub fn rescaled_to(&self, pixel_size: f64) -> MembraneProfile {
        let factor = self.pixel_size / pixel_size;
        MembraneProfile{
            x: self.x.iter().map(|x| x * factor).collect(),
            y: self.y.clone(),
            pixel_size
        }
    }

    /// Returns the linearly interpolated density at `r`.
    fn density_at(&self, r: f64) -> f64 {
        let n = self.x.len();
        if r >= self.x[n - 1] {
            self.y[n - 1]
        } else if r <= self.x[0] {
            self.y[0]
        } else {
            let inv_step = (n - 1) as f64 / (self.x[n - 1] - self.x[0]);
            let left = (((r - self.x[0]) * inv_step).floor() as usize).min(n - 2);
            let right = left + 1;
            self.y[left] + (self.y[right] - self.y[left]) * (r - self.x[left]) / (self.x[right] - self.x[left])
        }
    }
}

/// Renders the projection of a spherical vesicle with membrane `profile` in a `2·half_size` square image.
///
/// `profile` positions and `radius` must be in image pixels. The vesicle's center is at
/// (`half_size`, `half_size`) (0-based). The projection is integrated along z with step 1/`accuracy`
/// for one quadrant and mirrored to the other three.
///
pub fn project_profile(
    profile: &MembraneProfile,
    radius: f64,
    half_size: u32,
    accuracy: u32
) -> Result<Image, VesError> {
    if half_size == 0 { return Err(VesError::Geometry("cannot project a vesicle into an empty image".to_string())); }
    if accuracy == 0 { return Err(VesError::Configuration("projection accuracy must be positive".to_string())); }

    let nt = half_size as usize;
    let acc = accuracy as usize;
    let step = 1.0 / accuracy as f64;
    let num_samples = nt * acc + 1;

    // projection along z of the half-space z >= 0, the z = 0 column weighted by half
    let projected: Vec<f64> = (0..num_samples).into_par_iter().map(|i| {
        let x = i as f64 * step;
        let mut sum = 0.0;
        for j in 0..num_samples {
            let z = j as f64 * step;
            let value = profile.density_at((x * x + z * z).sqrt() - radius);
            sum += if j < acc { 0.5 * value } else { value };
        }
        sum * step
    }).collect();

    let last = num_samples - 1;
    let max_r = last as f64 * step;
    let quadrant_value = |a: usize, b: usize| -> f64 {
        let dx = a as f64 - nt as f64;
        let dy = b as f64 - nt as f64;
        let r = (dx * dx + dy * dy).sqrt();
        if r < max_r {
            let left = ((r * acc as f64).floor() as usize).min(last - 1);
            projected[left] + (projected[left + 1] - projected[left]) * (r - left as f64 * step) / step
        } else {
            projected[last]
        }
    };

    let mut quadrant = vec![0.0; (nt + 1) * (nt + 1)];
    for b in 0..=nt {
        for a in 0..=nt {
            quadrant[b * (nt + 1) + a] = quadrant_value(a, b);
        }
    }

    let size = 2 * half_size;
    let fold = |i: u32| -> usize { if i <= half_size { i as usize } else { (size - i) as usize } };

    Ok(Image::from_fn(size, size, |x, y| 2.0 * quadrant[fold(y) * (nt + 1) + fold(x)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_profile() -> MembraneProfile {
        let x: Vec<f64> = (-5..=5).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| (5.0 - x.abs()) / 5.0).collect();
        MembraneProfile::new(x, y, 1.0).unwrap()
    }

    #[test]
    fn when_grid_is_irregular_profile_creation_fails() {
        let result = MembraneProfile::new(vec![0.0, 1.0, 2.0, 4.0], vec![0.0; 4], 1.0);
        assert!(match result { Err(VesError::Numerical(_)) => true, _ => false });
        assert!(MembraneProfile::new(vec![0.0, 1.0], vec![0.0; 3], 1.0).is_err());
        assert!(!is_uniform_grid(&[2.0, 1.0, 0.0]));
        assert!(is_uniform_grid(&[-1.0, -0.5, 0.0, 0.5]));
    }

    #[test]
    fn when_model_is_unknown_builtin_profile_fails() {
        assert_eq!(Err(VesError::UnsupportedModel(7)), MembraneProfile::builtin(7));
    }

    #[test]
    fn builtin_profile_is_normalized_with_zero_tail() {
        let profile = MembraneProfile::builtin(BUILTIN_PROFILE_ID).unwrap();
        assert_eq!(51, profile.x().len());
        assert_eq!(-25.0, profile.x()[0]);
        assert_eq!(25.0, profile.x()[50]);
        assert_eq!(2.112, profile.pixel_size());

        let y = profile.y();
        assert_eq!(0.0, y[50]);
        let max = y.iter().cloned().fold(std::f64::NEG_INFINITY, f64::max);
        assert!((max - 1.0).abs() < 1.0e-12);
        // the membrane lies around the middle of the grid
        let argmax = (0..51).max_by(|&a, &b| y[a].partial_cmp(&y[b]).unwrap()).unwrap();
        assert!(argmax > 12 && argmax < 39);
    }

    #[test]
    fn rescaling_changes_positions_only() {
        let profile = triangle_profile();
        let rescaled = profile.rescaled_to(0.5);
        assert_eq!(-10.0, rescaled.x()[0]);
        assert_eq!(10.0, rescaled.x()[10]);
        assert_eq!(profile.y(), rescaled.y());
        assert_eq!(0.5, rescaled.pixel_size());
    }

    #[test]
    fn density_is_interpolated_and_constant_outside() {
        let profile = triangle_profile();
        assert!((profile.density_at(0.5) - 0.9).abs() < 1.0e-12);
        assert!((profile.density_at(-2.25) - 0.55).abs() < 1.0e-12);
        assert_eq!(0.0, profile.density_at(100.0));
        assert_eq!(0.0, profile.density_at(-100.0));
    }

    #[test]
    fn projection_is_symmetric_about_center() {
        let half_size = 12;
        let img = project_profile(&triangle_profile(), 7.0, half_size, 4).unwrap();
        assert_eq!(24, img.width());
        assert_eq!(24, img.height());

        let c = half_size;
        for k in 1..c {
            assert!((img.get(c + k, c) - img.get(c - k, c)).abs() < 1.0e-12);
            assert!((img.get(c, c + k) - img.get(c, c - k)).abs() < 1.0e-12);
            assert!((img.get(c + k, c - k) - img.get(c - k, c + k)).abs() < 1.0e-12);
            assert!((img.get(c + k, c) - img.get(c, c + k)).abs() < 1.0e-12);
        }
    }

    #[test]
    fn projection_peaks_near_the_membrane() {
        let half_size = 16;
        let radius = 9.0;
        let img = project_profile(&triangle_profile(), radius, half_size, 4).unwrap();
        let c = half_size;

        let (peak_x, peak) = (c..2 * c)
            .map(|x| (x, img.get(x, c)))
            .fold((c, std::f64::NEG_INFINITY), |best, (x, v)| if v > best.1 { (x, v) } else { best });
        assert!(peak > 0.0);
        let dist = (peak_x - c) as f64;
        assert!(dist >= radius - 5.0 && dist <= radius + 5.0);
        // outside the membrane the density is zero
        assert!(img.get(0, 0).abs() < 1.0e-12);
    }

    #[test]
    fn when_half_size_is_zero_projection_fails() {
        assert!(project_profile(&triangle_profile(), 3.0, 0, 4).is_err());
    }
}
