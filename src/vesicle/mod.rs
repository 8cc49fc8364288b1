//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Vesicle records, membrane models and rendering.
//!

use cgmath::Vector2;
use crate::errors::VesError;
use crate::image::Image;

pub mod locate;
pub mod profile;
pub mod shell;
pub mod subtract;

pub use profile::{MembraneProfile, project_profile};
pub use shell::{ShellParams, ves_density_circular};

/// Vesicles smaller than this (Å) are not processed.
pub const MIN_RADIUS: f64 = 20.0;

/// Vesicles with lower amplitude are not processed.
pub const MIN_AMPLITUDE: f64 = 1.0e-8;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vesicle {
    /// 1-based pixel coordinates.
    pub center: Vector2<f64>,
    /// Radius in Å.
    pub radius: f64,
    /// Scale factor of the vesicle model.
    pub amplitude: f64
}

impl Vesicle {
    pub fn new(x: f64, y: f64, radius: f64, amplitude: f64) -> Vesicle {
        Vesicle{ center: Vector2{ x, y }, radius, amplitude }
    }

    pub fn is_finite(&self) -> bool {
        self.center.x.is_finite() && self.center.y.is_finite() && self.radius.is_finite() && self.amplitude.is_finite()
    }

    /// Returns true if the vesicle is worth processing.
    pub fn is_good(&self) -> bool {
        self.is_finite() && self.radius >= MIN_RADIUS && self.amplitude >= MIN_AMPLITUDE
    }

    pub fn radius_px(&self, pixel_size: f64) -> f64 {
        self.radius / pixel_size
    }
}

/// Outcome of processing a single vesicle.
#[derive(Clone, Debug, PartialEq)]
pub enum FitStatus {
    /// Position, radius and amplitude were fitted.
    Refined,
    /// The fitted parameters were implausible; seed position and radius were used.
    ConvergenceFallback,
    /// Seed parameters with a rescaled amplitude were used.
    Rescaled,
    /// The vesicle was not subtracted.
    Skipped(String)
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefinedVesicle {
    pub vesicle: Vesicle,
    pub status: FitStatus,
    /// Fitted amplitude is below the bad-vesicle threshold.
    pub bad: bool
}

/// Density model of a vesicle's membrane.
#[derive(Clone, Debug)]
pub enum MembraneModel {
    /// Analytic bilayer shell.
    Shell(ShellParams),
    /// Measured radial profile.
    Profile(MembraneProfile)
}

impl MembraneModel {
    /// Returns the model with the given identifier: 1, 2 (analytic shells) or 44 (measured profile).
    pub fn from_id(model_id: i32) -> Result<MembraneModel, VesError> {
        match model_id {
            1 => Ok(MembraneModel::Shell(ShellParams::default())),
            2 => Ok(MembraneModel::Shell(ShellParams::thick_head_groups())),
            profile::BUILTIN_PROFILE_ID => Ok(MembraneModel::Profile(MembraneProfile::builtin(model_id)?)),
            _ => Err(VesError::UnsupportedModel(model_id))
        }
    }

    /// Returns the ratio by which the model's amplitudes scale with the image pixel size.
    pub fn pixel_size_factor(&self, pixel_size: f64) -> f64 {
        match self {
            MembraneModel::Shell(_) => 1.0,
            MembraneModel::Profile(profile) => (profile.pixel_size() / pixel_size).powi(3)
        }
    }

    /// Renders an `n`x`n` image of a vesicle with `radius` (Å) centered at `position` (1-based).
    ///
    /// The measured profile is rendered at the image center and shifted to `position` rounded
    /// to whole pixels; `n` must be even for it. `accuracy` is the profile's projection subdivision.
    ///
    pub fn render(
        &self,
        n: u32,
        pixel_size: f64,
        radius: f64,
        position: Vector2<f64>,
        accuracy: u32
    ) -> Result<Image, VesError> {
        match self {
            MembraneModel::Shell(shell) => Ok(ves_density_circular(n, pixel_size, radius, shell, Some(position), None)),

            MembraneModel::Profile(profile) => {
                if n % 2 != 0 {
                    return Err(VesError::Geometry(format!("profile model needs an even image size, got {}", n)));
                }
                let centered = project_profile(&profile.rescaled_to(pixel_size), radius / pixel_size, n / 2, accuracy)?;
                Ok(centered.shift_cyclic(model_shift(position.x, n), model_shift(position.y, n)))
            }
        }
    }
}

/// Returns the cyclic shift (as accepted by `Image::shift_cyclic`) moving a vesicle rendered at the center
/// of an `n`x`n` image (1-based coordinate n/2 + 1) to `position` (rounded half away from zero).
pub fn model_shift(position: f64, n: u32) -> i64 {
    let shift = position.round() as i64 - ((n as f64 / 2.0).round() as i64 + 1) + 1;
    if shift < 1 { shift + n as i64 } else { shift }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vesicle_at_center_is_not_shifted() {
        assert_eq!(1, model_shift(33.0, 64));
        assert_eq!(1, model_shift(32.6, 64));
        assert_eq!(3, model_shift(35.0, 64));
        assert_eq!(63, model_shift(31.0, 64));
    }

    #[test]
    fn shifted_render_matches_centered_render() {
        let model = MembraneModel::from_id(44).unwrap();
        let n = 40;
        let centered = model.render(n, 2.0, 20.0, Vector2{ x: 21.0, y: 21.0 }, 4).unwrap();
        let moved = model.render(n, 2.0, 20.0, Vector2{ x: 23.0, y: 20.0 }, 4).unwrap();
        for y in 1..n {
            for x in 0..n - 2 {
                assert_eq!(centered.get(x, y), moved.get(x + 2, y - 1));
            }
        }
    }

    #[test]
    fn when_model_is_unknown_creation_fails() {
        assert!(match MembraneModel::from_id(5) { Err(VesError::UnsupportedModel(5)) => true, _ => false });
        assert!(MembraneModel::from_id(1).is_ok());
        assert!(MembraneModel::from_id(2).is_ok());
    }

    #[test]
    fn profile_model_amplitude_scales_with_pixel_size() {
        let model = MembraneModel::from_id(44).unwrap();
        assert!((model.pixel_size_factor(1.056) - 8.0).abs() < 1.0e-9);
        assert_eq!(1.0, MembraneModel::from_id(1).unwrap().pixel_size_factor(3.0));
    }

    #[test]
    fn when_profile_image_size_is_odd_rendering_fails() {
        let model = MembraneModel::from_id(44).unwrap();
        assert!(model.render(31, 2.0, 20.0, Vector2{ x: 16.0, y: 16.0 }, 4).is_err());
    }

    #[test]
    fn vesicle_quality_checks() {
        assert!(Vesicle::new(10.0, 10.0, 100.0, 1.0).is_good());
        assert!(!Vesicle::new(10.0, 10.0, 19.0, 1.0).is_good());
        assert!(!Vesicle::new(10.0, 10.0, 100.0, 1.0e-9).is_good());
        assert!(!Vesicle::new(std::f64::NAN, 10.0, 100.0, 1.0).is_good());
        assert_eq!(25.0, Vesicle::new(0.0, 0.0, 100.0, 1.0).radius_px(4.0));
    }
}
