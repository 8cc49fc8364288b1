//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Vesicle refinement and subtraction.
//!

use cgmath::Vector2;
use crate::comp::{self, fft::Fft2d, filter, simplex};
use crate::ctf::{self, CtfParams};
use crate::errors::VesError;
use crate::image::{Image, Point, Rect};
use crate::logging::Logger;
use super::{shell, FitStatus, MembraneModel, RefinedVesicle, Vesicle};

/// Projection subdivision used when rendering models for subtraction.
pub const RENDER_ACCURACY: u32 = 4;

/// Square window cut out of an image around a vesicle.
#[derive(Clone, Debug, PartialEq)]
pub struct CropWindow {
    /// Position of the window's (0, 0) pixel in the image; may lie outside of it.
    origin: Point,
    size: u32,
    /// Part of the window inside the image (image coordinates).
    src_rect: Rect
}

impl CropWindow {
    /// Creates a `size`x`size` window whose pixel (size/2, size/2) lies at `center` (0-based image coordinates).
    pub fn new(center: Point, size: u32, image_width: u32, image_height: u32) -> Result<CropWindow, VesError> {
        if size == 0 { return Err(VesError::Geometry("empty crop window".to_string())); }

        let origin = Point{ x: center.x - (size / 2) as i32, y: center.y - (size / 2) as i32 };
        let src_rect = Rect{ x: origin.x, y: origin.y, width: size, height: size }
            .intersection(&Rect{ x: 0, y: 0, width: image_width, height: image_height });

        if src_rect.is_empty() {
            return Err(VesError::Geometry(format!(
                "window of size {} at ({}, {}) lies outside the {}x{} image",
                size, center.x, center.y, image_width, image_height
            )));
        }

        Ok(CropWindow{ origin, size, src_rect })
    }

    pub fn origin(&self) -> Point { self.origin }

    pub fn size(&self) -> u32 { self.size }

    /// Returns true if part of the window lies outside of the image.
    pub fn touches_edge(&self) -> bool {
        self.src_rect.width < self.size || self.src_rect.height < self.size
    }

    /// Returns the window's contents; pixels outside of the image are set to `fill`.
    pub fn extract(&self, image: &Image, fill: f64) -> Image {
        image.fragment_copy(&self.origin, self.size, self.size, fill)
    }

    /// Returns a window-sized image: 1 where the window overlaps the image, 0 elsewhere.
    pub fn valid_mask(&self) -> Image {
        let mut mask = Image::new(self.size, self.size);
        Image::new_filled(self.src_rect.width, self.src_rect.height, 1.0).copy_into(
            &mut mask,
            Point::zero(),
            self.src_rect.width,
            self.src_rect.height,
            self.src_rect.get_pos() - self.origin
        );
        mask
    }

    /// Copies the part of `window_contents` which overlaps the image back into `image`.
    pub fn write_back(&self, window_contents: &Image, image: &mut Image) {
        assert!(window_contents.width() == self.size && window_contents.height() == self.size);
        window_contents.copy_into(
            image,
            self.src_rect.get_pos() - self.origin,
            self.src_rect.width,
            self.src_rect.height,
            self.src_rect.get_pos()
        );
    }
}

fn vesicle_index_position(vesicle: &Vesicle) -> Point {
    Point{ x: (vesicle.center.x - 1.0).round() as i32, y: (vesicle.center.y - 1.0).round() as i32 }
}

/// Subtracts `vesicles` (with their current parameters) from a copy of `image`.
///
/// Vesicles with non-positive amplitude or lying entirely outside of the image are skipped.
/// Each model is rendered in a window twice the vesicle's diameter (at most the image's smaller
/// dimension), CTF-filtered, scaled by the amplitude and subtracted.
///
pub fn subtract_vesicles(
    image: &Image,
    model: &MembraneModel,
    vesicles: &[Vesicle],
    pixel_size: f64,
    ctf_params: &CtfParams
) -> Result<Image, VesError> {
    let mut result = image.clone();
    let width = image.width() as f64;
    let height = image.height() as f64;
    let max_size = image.width().min(image.height()) / 2 * 2;

    for vesicle in vesicles {
        let r_px = vesicle.radius_px(pixel_size);
        if !(vesicle.amplitude > 0.0) || !vesicle.is_finite() ||
            vesicle.center.x + r_px < 1.0 || vesicle.center.y + r_px < 1.0 ||
            vesicle.center.x - r_px > width || vesicle.center.y - r_px > height {

            continue;
        }

        let size = (((r_px * 2.0).round() * 2.0) as u32).min(max_size);
        if size < 2 { continue; }

        // a window capped at the image size may miss the image for a vesicle much larger than it;
        // such a vesicle has no pixels to subtract
        let window = match CropWindow::new(vesicle_index_position(vesicle), size, image.width(), image.height()) {
            Ok(w) => w,
            Err(_) => continue
        };

        let mut data = window.extract(&result, 0.0);
        let center = (size / 2 + 1) as f64;
        let rendered = model.render(size, pixel_size, vesicle.radius, Vector2{ x: center, y: center }, RENDER_ACCURACY)?;
        let ctf_filter = ctf::ctf_for_subtraction(ctf_params, pixel_size, size);
        let vesicle_model = filter::apply_filter(&rendered, &ctf_filter, filter::FilterLayout::Origin);

        for (d, m) in data.pixels_mut().iter_mut().zip(vesicle_model.pixels().iter()) {
            *d -= m * vesicle.amplitude;
        }
        window.write_back(&data, &mut result);
    }

    Ok(result)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RefitMode {
    /// Fit radius, position and amplitude of each vesicle.
    Refit,
    /// Keep seed radius and position; use the seed amplitude multiplied by the given factor.
    Rescale(f64)
}

#[derive(Copy, Clone, Debug)]
pub struct RefitSettings {
    pub mode: RefitMode,
    /// Fitted amplitudes below this (scaled to the membrane model's pixel size) mark bad vesicles.
    pub bad_amplitude_threshold: f64,
    pub simplex: simplex::SimplexOptions
}

impl Default for RefitSettings {
    fn default() -> RefitSettings {
        RefitSettings{
            mode: RefitMode::Refit,
            bad_amplitude_threshold: 0.1,
            simplex: simplex::SimplexOptions::default()
        }
    }
}

/// Amplitude threshold below which a fitted vesicle is considered bad.
///
/// The threshold is calibrated on the first checked amplitude: it is divided by the model's pixel size
/// factor, and if the amplitude is still below it, it becomes half the amplitude.
///
#[derive(Copy, Clone, Debug)]
pub struct BadVesicleThreshold {
    value: f64,
    pixel_size_factor: f64,
    calibrated: bool
}

impl BadVesicleThreshold {
    pub fn new(initial: f64, pixel_size_factor: f64) -> BadVesicleThreshold {
        BadVesicleThreshold{ value: initial, pixel_size_factor, calibrated: false }
    }

    pub fn value(&self) -> f64 { self.value }

    /// Returns true if `amplitude` marks a bad vesicle.
    pub fn is_bad(&mut self, amplitude: f64, logger: &Logger) -> bool {
        if !self.calibrated {
            self.calibrated = true;
            self.value /= self.pixel_size_factor;
            if amplitude < self.value {
                logger.info(&format!(
                    "bad vesicle amplitude threshold changed from {:.4e} to {:.4e}", self.value, 0.5 * amplitude
                ));
                self.value = 0.5 * amplitude;
            }
        }

        amplitude < self.value
    }
}

#[derive(Clone, Debug)]
pub struct SubtractionResult {
    /// Micrograph with all processed vesicles subtracted.
    pub image: Image,
    /// One entry per seed, in the same order.
    pub vesicles: Vec<RefinedVesicle>,
    pub bad_count: usize,
    pub bad_threshold: f64
}

/// Data prepared for fitting a single vesicle.
struct VesicleWindow {
    window: CropWindow,
    /// Cropped from the image with not yet processed vesicles subtracted; mean-subtracted.
    data: Image,
    /// Cropped from the current image.
    original: Image,
    /// 0 for pixels excluded from fitting and subtraction, 1 elsewhere.
    mask: Option<Image>
}

fn prepare_window(
    index: usize,
    current: &Image,
    image_mean: f64,
    seeds: &[Vesicle],
    pixel_size: f64,
    ctf_params: &CtfParams,
    model: &MembraneModel,
    exclusion_mask: Option<&Image>,
    settings: &RefitSettings
) -> Result<VesicleWindow, VesError> {
    let seed = &seeds[index];
    let size = (seed.radius_px(pixel_size) * 2.0).round() * 2.0;
    if !(size >= 4.0) {
        return Err(VesError::Geometry(format!("window size {} too small", size)));
    }

    let window = CropWindow::new(vesicle_index_position(seed), size as u32, current.width(), current.height())?;

    let provisional;
    let used = if settings.mode == RefitMode::Refit && index + 1 < seeds.len() {
        provisional = subtract_vesicles(current, model, &seeds[index + 1..], pixel_size, ctf_params)?;
        &provisional
    } else {
        current
    };

    let mut data = window.extract(used, image_mean);
    for p in data.pixels_mut() { *p -= image_mean; }
    let original = window.extract(current, image_mean);

    let mut mask = if window.touches_edge() { Some(window.valid_mask()) } else { None };
    if let Some(exclusion_mask) = exclusion_mask {
        // zero outside of the image, i.e. already multiplied by the edge mask
        let mut cropped = window.extract(exclusion_mask, 0.0);
        if cropped.pixels().iter().any(|&v| !(v > 0.0)) {
            for v in cropped.pixels_mut() { *v = if *v > 0.0 { 1.0 } else { 0.0 }; }
            mask = Some(cropped);
        }
    }

    Ok(VesicleWindow{ window, data, original, mask })
}

/// Returns Σ(offset + scale·model - data)² over pixels where `mask` (if present) is 1.
fn residual_energy(data: &[f64], model: &[f64], fit: &comp::LinearFit, mask: Option<&[f64]>) -> f64 {
    let residual = |i: usize| (fit.offset + fit.scale * model[i] - data[i]).powi(2);
    match mask {
        Some(mask) => (0..data.len()).map(|i| residual(i) * mask[i]).sum(),
        None => (0..data.len()).map(residual).sum()
    }
}

/// Refines a single vesicle; returns its parameters in window coordinates (radius Å, 1-based x, y) and the status.
fn refine_position(
    vw: &VesicleWindow,
    seed_radius: f64,
    pixel_size: f64,
    fft: &Fft2d,
    ctf_filter: &Image,
    settings: &RefitSettings,
    logger: &Logger
) -> (f64, Vector2<f64>, FitStatus) {
    let n = vw.window.size();
    let center = n as f64 / 2.0 + 1.0;
    let shell = shell::ShellParams::default();
    let mask = vw.mask.as_ref().map(|m| m.pixels());

    let objective = |p: &[f64]| -> f64 {
        let rendered = shell::ves_density_circular(n, pixel_size, p[0], &shell, Some(Vector2{ x: p[1], y: p[2] }), None);
        let vesicle_model = filter::apply_filter_with(fft, &rendered, ctf_filter);
        match comp::least_squares_fit(vw.data.pixels(), vesicle_model.pixels(), mask) {
            Ok(fit) => residual_energy(vw.data.pixels(), vesicle_model.pixels(), &fit, mask),
            Err(_) => std::f64::INFINITY
        }
    };

    let result = simplex::minimize(objective, &[seed_radius, center, center], &settings.simplex);
    if !result.converged {
        logger.verbose(&format!(
            "simplex stopped after {} iterations and {} evaluations (residual {:.4e})",
            result.iterations, result.evaluations, result.value
        ));
    }

    let radius = result.x[0];
    let position = Vector2{ x: result.x[1], y: result.x[2] };

    let implausible = !radius.is_finite() || !position.x.is_finite() || !position.y.is_finite() ||
        radius / pixel_size > n as f64 / 2.0 ||
        (position.x - center).abs() > n as f64 / 4.0 ||
        (position.y - center).abs() > n as f64 / 4.0;

    if implausible {
        (seed_radius, Vector2{ x: center, y: center }, FitStatus::ConvergenceFallback)
    } else {
        (radius, position, FitStatus::Refined)
    }
}

/// Fits and subtracts a single vesicle from `current`; returns the refined record.
fn process_vesicle(
    index: usize,
    current: &mut Image,
    image_mean: f64,
    seeds: &[Vesicle],
    pixel_size: f64,
    ctf_params: &CtfParams,
    model: &MembraneModel,
    exclusion_mask: Option<&Image>,
    settings: &RefitSettings,
    threshold: &mut BadVesicleThreshold,
    logger: &Logger
) -> Result<RefinedVesicle, VesError> {
    let seed = &seeds[index];
    if !seed.is_finite() {
        return Err(VesError::Numerical("non-finite vesicle parameters".to_string()));
    }

    let vw = prepare_window(index, current, image_mean, seeds, pixel_size, ctf_params, model, exclusion_mask, settings)?;
    let n = vw.window.size();
    let origin = vw.window.origin();
    let fft = Fft2d::new(n as usize, n as usize);
    let ctf_filter = ctf::ctf_for_subtraction(ctf_params, pixel_size, n);
    let mask = vw.mask.as_ref().map(|m| m.pixels());

    let (radius, position, status) = match settings.mode {
        RefitMode::Refit => refine_position(&vw, seed.radius, pixel_size, &fft, &ctf_filter, settings, logger),
        RefitMode::Rescale(_) => (
            seed.radius,
            Vector2{ x: seed.center.x - origin.x as f64, y: seed.center.y - origin.y as f64 },
            FitStatus::Rescaled
        )
    };

    if status == FitStatus::ConvergenceFallback {
        logger.warn(&format!(
            "vesicle {} at ({:.1}, {:.1}): implausible fit, keeping seed position and radius",
            index + 1, seed.center.x, seed.center.y
        ));
    }

    let rendered = model.render(n, pixel_size, radius, position, RENDER_ACCURACY)?;
    let vesicle_model = filter::apply_filter_with(&fft, &rendered, &ctf_filter);
    if !vesicle_model.is_finite() {
        return Err(VesError::Numerical("non-finite vesicle model".to_string()));
    }

    let amplitude = match settings.mode {
        RefitMode::Refit => comp::least_squares_fit(vw.data.pixels(), vesicle_model.pixels(), mask)?.scale,
        RefitMode::Rescale(factor) => seed.amplitude * factor
    };
    if !amplitude.is_finite() {
        return Err(VesError::Numerical(format!("non-finite amplitude: {}", amplitude)));
    }

    let mut subtracted = vw.original.clone();
    for (i, s) in subtracted.pixels_mut().iter_mut().enumerate() {
        let weight = match mask { Some(m) => m[i], None => 1.0 };
        *s -= amplitude * vesicle_model.pixels()[i] * weight;
    }
    vw.window.write_back(&subtracted, current);

    let bad = settings.mode == RefitMode::Refit && threshold.is_bad(amplitude, logger);
    if bad {
        logger.warn(&format!(
            "vesicle {} at ({:.1}, {:.1}) is not fitted right (amplitude {:.4e})",
            index + 1, seed.center.x, seed.center.y, amplitude
        ));
    }

    Ok(RefinedVesicle{
        vesicle: Vesicle{
            center: Vector2{ x: position.x + origin.x as f64, y: position.y + origin.y as f64 },
            radius,
            amplitude
        },
        status,
        bad
    })
}

/// Refines the vesicles (or rescales their amplitudes) one by one and subtracts them from a copy of `image`.
///
/// Each vesicle is fitted in a window around its seed position, after the vesicles not yet processed
/// have been provisionally subtracted with their seed parameters. The fit minimizes the residual of
/// a linear fit of the CTF-filtered analytic shell over (radius, x, y); the final model is rendered
/// with `model`. Pixels outside of the image and pixels where `exclusion_mask` is non-positive are
/// excluded from fitting and are not modified.
///
/// Vesicles which cannot be processed are logged and reported as `FitStatus::Skipped`.
///
pub fn refit_and_subtract(
    image: &Image,
    seeds: &[Vesicle],
    pixel_size: f64,
    ctf_params: &CtfParams,
    model: &MembraneModel,
    exclusion_mask: Option<&Image>,
    settings: &RefitSettings,
    logger: &Logger
) -> Result<SubtractionResult, VesError> {
    if !(pixel_size > 0.0) || !pixel_size.is_finite() {
        return Err(VesError::Configuration(format!("invalid pixel size: {}", pixel_size)));
    }
    if let Some(mask) = exclusion_mask {
        if mask.width() != image.width() || mask.height() != image.height() {
            return Err(VesError::Configuration(format!(
                "mask size ({}x{}) differs from image size ({}x{})",
                mask.width(), mask.height(), image.width(), image.height()
            )));
        }
    }
    if let RefitMode::Rescale(factor) = settings.mode {
        if !factor.is_finite() {
            return Err(VesError::Configuration(format!("invalid amplitude scaling: {}", factor)));
        }
    }

    let mut current = image.clone();
    let image_mean = image.mean();
    let mut threshold = BadVesicleThreshold::new(settings.bad_amplitude_threshold, model.pixel_size_factor(pixel_size));
    let mut vesicles = Vec::with_capacity(seeds.len());
    let mut bad_count = 0;

    for (i, seed) in seeds.iter().enumerate() {
        logger.verbose(&format!("vesicle {} of {}", i + 1, seeds.len()));

        match process_vesicle(
            i, &mut current, image_mean, seeds, pixel_size, ctf_params, model, exclusion_mask, settings, &mut threshold, logger
        ) {
            Ok(refined) => {
                if refined.bad { bad_count += 1; }
                vesicles.push(refined);
            },

            Err(err) => {
                logger.warn(&format!(
                    "vesicle {} at ({:.1}, {:.1}) skipped: {}", i + 1, seed.center.x, seed.center.y, err
                ));
                vesicles.push(RefinedVesicle{ vesicle: *seed, status: FitStatus::Skipped(err.to_string()), bad: false });
            }
        }
    }

    Ok(SubtractionResult{ image: current, vesicles, bad_count, bad_threshold: threshold.value() })
}
