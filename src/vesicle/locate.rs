//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Locating vesicle candidates by cross-correlation with a reference library.
//!

use crate::comp::{self, fft::{self, Fft2d}, filter};
use crate::ctf::{self, CtfParams};
use crate::errors::VesError;
use crate::image::Image;
use crate::logging::Logger;
use super::{shell, Vesicle};

/// Best cross-correlation score per pixel and the index of the reference which attained it.
#[derive(Clone, Debug)]
pub struct CcMap {
    pub scores: Image,
    /// 0-based reference indices, row by row.
    pub indices: Vec<usize>
}

impl CcMap {
    pub fn index_at(&self, x: u32, y: u32) -> usize {
        self.indices[(y * self.scores.width() + x) as usize]
    }
}

/// Returns vesicle radii (Å) from `min` (inclusive) to `max` (exclusive) every `step`.
pub fn radius_range(min: f64, max: f64, step: f64) -> Result<Vec<f64>, VesError> {
    if !(step > 0.0) || !(min > 0.0) || !(max > min) {
        return Err(VesError::Configuration(format!("invalid radius range: {} to {} step {}", min, max, step)));
    }
    let count = ((max - min) / step).ceil() as usize;
    Ok((0..count).map(|i| min + i as f64 * step).filter(|&r| r < max).collect())
}

/// Creates `n`x`n` references of vesicles with `radii` (Å), filtered by the isotropic CTF.
///
/// The references use the analytic bilayer shell and are centered at (n/2, n/2) (0-based).
///
pub fn create_reference_library(n: u32, pixel_size: f64, radii: &[f64], ctf_params: &CtfParams) -> Vec<Image> {
    let fft = Fft2d::new(n as usize, n as usize);
    let ctf_filter = filter::center_to_origin(&ctf::ctf_isotropic_masked(n, pixel_size, ctf_params));
    let shell = shell::ShellParams::default();

    radii.iter().map(|&r| {
        let vesicle = shell::ves_density_circular(n, pixel_size, r, &shell, None, None);
        filter::apply_filter_with(&fft, &vesicle, &ctf_filter)
    }).collect()
}

/// Returns `reference` with zero mean and unit mean energy.
pub fn normalize_reference(reference: &Image) -> Image {
    let mut pixels = reference.pixels().to_vec();
    comp::normalize_zero_mean_unit_energy(&mut pixels);
    Image::new_from_pixels(reference.width(), reference.height(), pixels)
}

/// Cross-correlates `micrograph` with each of `references`, keeping the best score per pixel.
///
/// References smaller than the micrograph are centered on a zero background of the micrograph's size.
/// The score at (x, y) corresponds to the reference's central pixel placed at (x, y). On equal scores
/// the earlier reference wins.
///
pub fn make_cc_map(micrograph: &Image, references: &[Image], logger: &Logger) -> Result<CcMap, VesError> {
    if references.is_empty() {
        return Err(VesError::Configuration("no references to correlate with".to_string()));
    }

    let width = micrograph.width();
    let height = micrograph.height();
    for r in references {
        if r.width() > width || r.height() > height {
            return Err(VesError::Geometry(format!(
                "reference ({}x{}) is larger than the micrograph ({}x{})", r.width(), r.height(), width, height
            )));
        }
    }
    if width != height {
        logger.verbose("micrograph is not square");
    }

    let fft = Fft2d::new(height as usize, width as usize);
    let mic_spectrum = fft.forward(micrograph.pixels());

    let mut scores = Image::new_filled(width, height, std::f64::NEG_INFINITY);
    let mut indices = vec![0usize; (width * height) as usize];

    for (i, reference) in references.iter().enumerate() {
        logger.verbose(&format!("correlating with reference {} of {}", i + 1, references.len()));

        let padded = if reference.width() != width || reference.height() != height {
            reference.centered_in(width, height, 0.0)
        } else {
            reference.clone()
        };
        let ref_spectrum = fft.forward(filter::center_to_origin(&padded).pixels());
        let cc = fft.inverse_real(fft::multiply_conj(&mic_spectrum, &ref_spectrum));

        for ((best, idx), c) in scores.pixels_mut().iter_mut().zip(indices.iter_mut()).zip(cc.iter()) {
            if *c > *best {
                *best = *c;
                *idx = i;
            }
        }
    }

    Ok(CcMap{ scores, indices })
}

/// Picks vesicle candidates from `cc_map` in order of decreasing score.
///
/// After each pick, the disk of the picked vesicle's radius (`radii[index]`, Å) is excluded from further
/// picking. Stops after `max_count` candidates or when the best remaining score is below `min_score`.
/// Candidates have 1-based centers and the correlation score as amplitude.
///
pub fn extract_candidates(
    cc_map: &CcMap,
    radii: &[f64],
    pixel_size: f64,
    max_count: usize,
    min_score: f64
) -> Result<Vec<Vesicle>, VesError> {
    if let Some(idx) = cc_map.indices.iter().find(|&&i| i >= radii.len()) {
        return Err(VesError::Configuration(format!("reference index {} has no radius", idx)));
    }

    let width = cc_map.scores.width();
    let height = cc_map.scores.height();
    let mut remaining = cc_map.scores.clone();
    let mut candidates = vec![];

    while candidates.len() < max_count {
        let (best_pos, best_score) = remaining.pixels()
            .iter()
            .enumerate()
            .fold((0, std::f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best });

        if !(best_score >= min_score) { break; }

        let x = best_pos as u32 % width;
        let y = best_pos as u32 / width;
        let radius = radii[cc_map.index_at(x, y)];
        candidates.push(Vesicle::new(x as f64 + 1.0, y as f64 + 1.0, radius, best_score));

        let r_px = radius / pixel_size;
        let r2 = r_px * r_px;
        let r_int = r_px.ceil() as i64;
        for dy in -r_int..=r_int {
            let yy = y as i64 + dy;
            if yy < 0 || yy >= height as i64 { continue; }
            for dx in -r_int..=r_int {
                let xx = x as i64 + dx;
                if xx < 0 || xx >= width as i64 { continue; }
                if (dx * dx + dy * dy) as f64 <= r2 {
                    remaining.set(xx as u32, yy as u32, std::f64::NEG_INFINITY);
                }
            }
        }
        // the peak itself, also for radii below 1 pixel
        remaining.set(x, y, std::f64::NEG_INFINITY);
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Level;

    fn ctf_params() -> CtfParams {
        CtfParams::Isotropic{ lambda: 0.0197, defocus: 1.0, cs: 2.7, b_factor: 50.0, alpha: 0.07 }
    }

    #[test]
    fn radius_range_excludes_upper_limit() {
        assert_eq!(vec![50.0, 60.0, 70.0], radius_range(50.0, 80.0, 10.0).unwrap());
        assert_eq!(vec![50.0, 60.0, 70.0, 80.0], radius_range(50.0, 85.0, 10.0).unwrap());
        assert!(radius_range(50.0, 40.0, 10.0).is_err());
        assert!(radius_range(50.0, 80.0, 0.0).is_err());
    }

    #[test]
    fn normalized_reference_has_unit_energy() {
        let refs = create_reference_library(32, 5.0, &[60.0], &ctf_params());
        let normalized = normalize_reference(&refs[0]);
        let n = (32 * 32) as f64;
        assert!((normalized.mean()).abs() < 1.0e-12);
        assert!((normalized.sum_of_squares() / n - 1.0).abs() < 1.0e-9);
    }

    #[test]
    fn cc_map_finds_embedded_reference() {
        let logger = Logger::new(Level::Quiet);
        let radii = [60.0, 90.0, 120.0];
        let refs: Vec<Image> = create_reference_library(64, 5.0, &radii, &ctf_params())
            .iter()
            .map(normalize_reference)
            .collect();

        for k in 0..refs.len() {
            // the reference center (32, 32) lands at (64, 64) and is shifted to (60, 70)
            let micrograph = refs[k].centered_in(128, 128, 0.0).shift_cyclic(-3, 7);
            let cc_map = make_cc_map(&micrograph, &refs, &logger).unwrap();

            let (best_pos, _) = cc_map.scores.pixels()
                .iter()
                .enumerate()
                .fold((0, std::f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best });

            assert_eq!(60, best_pos % 128);
            assert_eq!(70, best_pos / 128);
            assert_eq!(k, cc_map.index_at(60, 70));
        }
    }

    #[test]
    fn when_reference_is_larger_than_micrograph_correlation_fails() {
        let logger = Logger::new(Level::Quiet);
        let result = make_cc_map(&Image::new(16, 16), &[Image::new(32, 32)], &logger);
        assert!(match result { Err(VesError::Geometry(_)) => true, _ => false });
        assert!(make_cc_map(&Image::new(16, 16), &[], &logger).is_err());
    }

    #[test]
    fn candidates_are_picked_greedily_with_suppression() {
        let mut scores = Image::new(20, 20);
        scores.set(5, 5, 10.0);
        scores.set(6, 5, 9.0); // within the first candidate's disk
        scores.set(15, 12, 8.0);
        scores.set(2, 18, 0.5);
        let mut indices = vec![0; 400];
        indices[12 * 20 + 15] = 1;
        let cc_map = CcMap{ scores, indices };

        let candidates = extract_candidates(&cc_map, &[6.0, 4.0], 2.0, 10, 1.0).unwrap();
        assert_eq!(2, candidates.len());
        assert_eq!(Vesicle::new(6.0, 6.0, 6.0, 10.0), candidates[0]);
        assert_eq!(Vesicle::new(16.0, 13.0, 4.0, 8.0), candidates[1]);

        let limited = extract_candidates(&cc_map, &[6.0, 4.0], 2.0, 1, 1.0).unwrap();
        assert_eq!(1, limited.len());
    }

    #[test]
    fn when_index_has_no_radius_extraction_fails() {
        let cc_map = CcMap{ scores: Image::new(4, 4), indices: vec![3; 16] };
        assert!(extract_candidates(&cc_map, &[10.0], 1.0, 5, 0.0).is_err());
    }
}
