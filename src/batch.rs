//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Processing of micrograph batches: file naming, masks, per-micrograph pipelines.
//!

use cgmath::Vector2;
use crate::comp::filter;
use crate::ctf::{self, CtfParams};
use crate::errors::VesError;
use crate::image::{mrc, Image, MrcError, Point};
use crate::logging::Logger;
use crate::utils::{self, TextFileError};
use crate::vesicle::{locate, subtract, FitStatus, MembraneModel, Vesicle, MIN_AMPLITUDE, MIN_RADIUS};
use rayon::prelude::*;
use std::path::Path;

/// Candidates with lower cross-correlation score are not reported.
pub const MIN_CANDIDATE_SCORE: f64 = 0.0;

#[derive(Debug)]
pub enum BatchError {
    /// A required input file does not exist; the micrograph is skipped.
    MissingFile(String),
    Io(std::io::Error),
    Mrc(MrcError),
    TextFile(String, TextFileError),
    Vesicle(VesError)
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::MissingFile(file) => write!(f, "file not found: {}", file),
            BatchError::Io(err) => write!(f, "I/O error: {}", err),
            BatchError::Mrc(err) => write!(f, "{}", err),
            BatchError::TextFile(file, err) => write!(f, "{}: {}", file, err),
            BatchError::Vesicle(err) => write!(f, "{}", err)
        }
    }
}

impl From<std::io::Error> for BatchError {
    fn from(err: std::io::Error) -> BatchError { BatchError::Io(err) }
}

impl From<MrcError> for BatchError {
    fn from(err: MrcError) -> BatchError { BatchError::Mrc(err) }
}

impl From<VesError> for BatchError {
    fn from(err: VesError) -> BatchError { BatchError::Vesicle(err) }
}

#[derive(Clone, Debug)]
pub struct RefitBatchSettings {
    pub output_dir: String,
    /// Å.
    pub pixel_size: f64,
    pub model_id: i32,
    pub ves_suffix: String,
    pub ctf_suffix: String,
    /// Size of the valid (not padded) centered region of each micrograph.
    pub edge_mask: Option<(u32, u32)>,
    pub particle_suffix: Option<String>,
    /// Å.
    pub particle_radius: f64,
    pub refit: subtract::RefitSettings
}

#[derive(Clone, Debug)]
pub struct LocateBatchSettings {
    pub output_dir: String,
    /// Å.
    pub pixel_size: f64,
    pub ctf_suffix: String,
    /// Radii (Å) of the reference library.
    pub radii: Vec<f64>,
    pub max_candidates: usize
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize
}

/// Returns the name of a file accompanying `input_file` (e.g. "a.mrc" + ".ctf" = "a.mrc.ctf").
pub fn companion_file(input_file: &str, suffix: &str) -> String {
    format!("{}{}", input_file, suffix)
}

/// Returns `output_dir`/<input file name without extension><tail>.
pub fn output_file(output_dir: &str, input_file: &str, tail: &str) -> String {
    let stem = match Path::new(input_file).file_stem() {
        Some(stem) => stem.to_string_lossy().to_string(),
        None => input_file.to_string()
    };
    Path::new(output_dir).join(stem + tail).to_string_lossy().to_string()
}

/// Returns the name suffix of the subtracted micrograph, e.g. "_ves44.mrc".
pub fn subtracted_image_tail(model_id: i32) -> String {
    format!("_ves{:02}.mrc", model_id)
}

/// Returns the name suffix of the refined vesicle list, e.g. "_resub44.txt".
pub fn refined_vesicles_tail(model_id: i32) -> String {
    format!("_resub{:02}.txt", model_id)
}

pub const CANDIDATES_TAIL: &str = "_candidates.txt";

/// Returns the vesicles worth processing; each dropped one is logged.
pub fn prefilter_vesicles(seeds: &[Vesicle], logger: &Logger) -> Vec<Vesicle> {
    let mut accepted = Vec::with_capacity(seeds.len());
    for (i, seed) in seeds.iter().enumerate() {
        if seed.is_good() {
            accepted.push(*seed);
            continue;
        }

        let reason = if !seed.is_finite() {
            "non-finite parameters".to_string()
        } else if seed.radius < MIN_RADIUS {
            format!("radius {} Å below {} Å", seed.radius, MIN_RADIUS)
        } else {
            format!("amplitude {:.3e} below {:.0e}", seed.amplitude, MIN_AMPLITUDE)
        };

        logger.info(&format!("vesicle {} at ({:.1}, {:.1}) dropped: {}", i + 1, seed.center.x, seed.center.y, reason));
    }
    accepted
}

/// Returns a `width`x`height` mask: 1 in the centered `valid_width`x`valid_height` region, 0 elsewhere.
pub fn edge_mask(width: u32, height: u32, valid_width: u32, valid_height: u32) -> Image {
    Image::new_filled(valid_width.min(width), valid_height.min(height), 1.0).centered_in(width, height, 0.0)
}

/// Returns a `width`x`height` mask: 0 within `radius_px` of any of `positions` (1-based), 1 elsewhere.
pub fn particle_mask(width: u32, height: u32, positions: &[Vector2<f64>], radius_px: f64) -> Image {
    let mut mask = Image::new_filled(width, height, 1.0);
    let r2 = radius_px * radius_px;
    let r_int = radius_px.ceil() as i64;

    for pos in positions.iter().filter(|p| p.x.is_finite() && p.y.is_finite()) {
        let cx = (pos.x - 1.0).round() as i64;
        let cy = (pos.y - 1.0).round() as i64;
        for y in (cy - r_int).max(0)..=(cy + r_int).min(height as i64 - 1) {
            for x in (cx - r_int).max(0)..=(cx + r_int).min(width as i64 - 1) {
                if ((x - cx).pow(2) + (y - cy).pow(2)) as f64 <= r2 {
                    mask.set(x as u32, y as u32, 0.0);
                }
            }
        }
    }

    mask
}

fn require_file(file_name: &str) -> Result<(), BatchError> {
    if Path::new(file_name).is_file() {
        Ok(())
    } else {
        Err(BatchError::MissingFile(file_name.to_string()))
    }
}

fn load_micrograph(file_name: &str, pixel_size: f64, logger: &Logger) -> Result<Image, BatchError> {
    let (image, header_pixel_size) = mrc::load_mrc(file_name)?;
    if let Some(header_px) = header_pixel_size {
        if (header_px - pixel_size).abs() > 0.01 * pixel_size {
            logger.verbose(&format!(
                "{}: pixel size in the header ({:.4} Å) differs from the specified one ({:.4} Å)",
                file_name, header_px, pixel_size
            ));
        }
    }
    logger.verbose(&format!("{}: {}x{} pixels", file_name, image.width(), image.height()));
    Ok(image)
}

/// Runs `process` for each input file in parallel, logging the outcomes.
fn run_batch<F>(input_files: &[String], process: F, logger: &Logger) -> BatchSummary
    where F: Fn(&str) -> Result<(), BatchError> + Sync
{
    let outcomes: Vec<Result<(), BatchError>> = input_files.par_iter().map(|f| process(f)).collect();

    let mut summary = BatchSummary::default();
    for (input_file, outcome) in input_files.iter().zip(outcomes.iter()) {
        match outcome {
            Ok(()) => summary.processed += 1,

            Err(err @ BatchError::MissingFile(_)) => {
                logger.warn(&format!("{} skipped: {}", input_file, err));
                summary.skipped += 1;
            },

            Err(err) => {
                logger.warn(&format!("{} failed: {}", input_file, err));
                summary.failed += 1;
            }
        }
    }
    summary
}

/// Refines (or rescales) and subtracts the vesicles of a single micrograph; writes the results.
pub fn refit_micrograph(
    input_file: &str,
    model: &MembraneModel,
    settings: &RefitBatchSettings,
    logger: &Logger
) -> Result<(), BatchError> {
    let ves_file = companion_file(input_file, &settings.ves_suffix);
    let ctf_file = companion_file(input_file, &settings.ctf_suffix);
    require_file(input_file)?;
    require_file(&ves_file)?;
    require_file(&ctf_file)?;

    let particle_file = match &settings.particle_suffix {
        Some(suffix) => {
            let file = companion_file(input_file, suffix);
            require_file(&file)?;
            Some(file)
        },
        None => None
    };

    let image = load_micrograph(input_file, settings.pixel_size, logger)?;
    let ctf_params = CtfParams::load(&ctf_file)?;
    let seeds = utils::read_vesicle_file(&ves_file).map_err(|e| BatchError::TextFile(ves_file.clone(), e))?;
    let seeds = prefilter_vesicles(&seeds, logger);
    logger.info(&format!("{}: {} vesicles", input_file, seeds.len()));

    let mut exclusion_mask = settings.edge_mask.map(|(nx, ny)| edge_mask(image.width(), image.height(), nx, ny));
    if let Some(particle_file) = particle_file {
        let positions = utils::read_box_positions(&particle_file)
            .map_err(|e| BatchError::TextFile(particle_file.clone(), e))?;
        let radius_px = (settings.particle_radius / settings.pixel_size).round();
        let p_mask = particle_mask(image.width(), image.height(), &positions, radius_px);
        exclusion_mask = Some(match exclusion_mask {
            Some(mut mask) => { mask.multiply_by(&p_mask); mask },
            None => p_mask
        });
    }

    let result = subtract::refit_and_subtract(
        &image, &seeds, settings.pixel_size, &ctf_params, model, exclusion_mask.as_ref(), &settings.refit, logger
    )?;

    let output_image = output_file(&settings.output_dir, input_file, &subtracted_image_tail(settings.model_id));
    logger.verbose(&format!("saving: {}", output_image));
    mrc::save_mrc(&result.image, settings.pixel_size, &output_image)?;

    let skipped = result.vesicles.iter().filter(|v| match v.status { FitStatus::Skipped(_) => true, _ => false }).count();
    let fallbacks = result.vesicles.iter().filter(|v| v.status == FitStatus::ConvergenceFallback).count();

    if settings.refit.mode == subtract::RefitMode::Refit {
        let output_list = output_file(&settings.output_dir, input_file, &refined_vesicles_tail(settings.model_id));
        logger.verbose(&format!("saving: {}", output_list));
        let refined: Vec<Vesicle> = result.vesicles.iter().map(|v| v.vesicle).collect();
        utils::write_vesicle_file(&output_list, &refined).map_err(|e| BatchError::TextFile(output_list.clone(), e))?;

        logger.info(&format!(
            "{}: {} bad vesicles (threshold {:.4e}), {} fallbacks, {} skipped",
            input_file, result.bad_count, result.bad_threshold, fallbacks, skipped
        ));
    } else {
        logger.info(&format!("{}: {} skipped", input_file, skipped));
    }

    Ok(())
}

/// Runs `refit_micrograph` for all input files in parallel.
pub fn refit_micrographs(input_files: &[String], settings: &RefitBatchSettings, logger: &Logger) -> Result<BatchSummary, BatchError> {
    let model = MembraneModel::from_id(settings.model_id)?;
    std::fs::create_dir_all(&settings.output_dir)?;
    Ok(run_batch(input_files, |f| refit_micrograph(f, &model, settings, logger), logger))
}

/// Finds vesicle candidates in a single micrograph; writes them as a vesicle file.
pub fn locate_micrograph(input_file: &str, settings: &LocateBatchSettings, logger: &Logger) -> Result<(), BatchError> {
    let ctf_file = companion_file(input_file, &settings.ctf_suffix);
    require_file(input_file)?;
    require_file(&ctf_file)?;

    let image = load_micrograph(input_file, settings.pixel_size, logger)?;
    let ctf_params = CtfParams::load(&ctf_file)?;

    let max_radius = settings.radii.iter().cloned().fold(0.0, f64::max);
    let ref_size = (((max_radius / settings.pixel_size * 2.0).round() * 2.0) as u32)
        .min(image.width().min(image.height()) / 2 * 2);
    if ref_size < 4 {
        return Err(BatchError::Vesicle(VesError::Geometry(format!("reference size {} too small", ref_size))));
    }

    // the CTF filter is square
    let n = image.width().max(image.height());
    let padded = image.centered_in(n, n, image.mean());
    let filtered = filter::apply_filter(
        &padded, &ctf::ctf_for_subtraction(&ctf_params, settings.pixel_size, n), filter::FilterLayout::Origin
    );
    let mut micrograph = filtered.fragment_copy(
        &Point::new((n / 2 - image.width() / 2) as i32, (n / 2 - image.height() / 2) as i32),
        image.width(),
        image.height(),
        0.0
    );
    let mean = micrograph.mean();
    for p in micrograph.pixels_mut() { *p -= mean; }

    let references: Vec<Image> = locate::create_reference_library(ref_size, settings.pixel_size, &settings.radii, &ctf_params)
        .iter()
        .map(locate::normalize_reference)
        .collect();

    let cc_map = locate::make_cc_map(&micrograph, &references, logger)?;
    let candidates = locate::extract_candidates(
        &cc_map, &settings.radii, settings.pixel_size, settings.max_candidates, MIN_CANDIDATE_SCORE
    )?;
    logger.info(&format!("{}: {} candidates", input_file, candidates.len()));

    let output_list = output_file(&settings.output_dir, input_file, CANDIDATES_TAIL);
    logger.verbose(&format!("saving: {}", output_list));
    utils::write_vesicle_file(&output_list, &candidates).map_err(|e| BatchError::TextFile(output_list.clone(), e))?;

    Ok(())
}

/// Runs `locate_micrograph` for all input files in parallel.
pub fn locate_micrographs(input_files: &[String], settings: &LocateBatchSettings, logger: &Logger) -> Result<BatchSummary, BatchError> {
    if settings.radii.is_empty() {
        return Err(BatchError::Vesicle(VesError::Configuration("empty radius range".to_string())));
    }
    std::fs::create_dir_all(&settings.output_dir)?;
    Ok(run_batch(input_files, |f| locate_micrograph(f, settings, logger), logger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Level;
    use crate::vesicle::subtract::{RefitMode, RefitSettings};

    const CTF_TEXT: &str = "lambda 0.0197\ndefocus 1.0\nCs 2.7\nB 100\nalpha 0.07\n";

    fn quiet() -> Logger { Logger::new(Level::Quiet) }

    /// Creates an empty directory for a test.
    fn test_dir(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("vestool_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_string_lossy().to_string()
    }

    /// Returns a 128x128 micrograph with a single CTF-filtered vesicle.
    fn synthetic_micrograph(vesicle: &Vesicle, pixel_size: f64) -> Image {
        let model = MembraneModel::from_id(1).unwrap();
        let ctf_params = ctf::CtfParams::from_map(&ctf::parse_ctf_text(CTF_TEXT).unwrap()).unwrap();
        let mut image = subtract::subtract_vesicles(&Image::new(128, 128), &model, &[*vesicle], pixel_size, &ctf_params)
            .unwrap();
        image.scale_values(-1.0);
        image
    }

    #[test]
    fn output_names_follow_input_names() {
        assert_eq!("a.mrc.vestxt", companion_file("a.mrc", ".vestxt"));
        assert_eq!(
            Path::new("out").join("mic01_ves44.mrc").to_string_lossy(),
            output_file("out", "data/mic01.mrc", &subtracted_image_tail(44))
        );
        assert_eq!("_ves01.mrc", subtracted_image_tail(1));
        assert_eq!("_resub02.txt", refined_vesicles_tail(2));
    }

    #[test]
    fn unusable_seeds_are_dropped() {
        let seeds = vec![
            Vesicle::new(10.0, 10.0, 150.0, 0.01),
            Vesicle::new(10.0, 10.0, 15.0, 0.01),
            Vesicle::new(10.0, 10.0, 150.0, 1.0e-9),
            Vesicle::new(10.0, std::f64::NAN, 150.0, 0.01),
            Vesicle::new(20.0, 30.0, 20.0, 1.0e-8)
        ];
        let accepted = prefilter_vesicles(&seeds, &quiet());
        assert_eq!(vec![seeds[0], seeds[4]], accepted);
    }

    #[test]
    fn edge_mask_covers_centered_region() {
        let mask = edge_mask(10, 8, 6, 4);
        assert_eq!(24.0, mask.pixels().iter().sum::<f64>());
        assert_eq!(1.0, mask.get(2, 2));
        assert_eq!(1.0, mask.get(7, 5));
        assert_eq!(0.0, mask.get(1, 2));
        assert_eq!(0.0, mask.get(8, 5));
        assert_eq!(0.0, mask.get(2, 6));

        assert!(edge_mask(10, 8, 20, 20).pixels().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn particle_mask_has_zero_disks() {
        let mask = particle_mask(20, 20, &[Vector2{ x: 6.0, y: 6.0 }, Vector2{ x: 20.0, y: 1.0 }], 2.0);
        assert_eq!(0.0, mask.get(5, 5));
        assert_eq!(0.0, mask.get(7, 5));
        assert_eq!(0.0, mask.get(5, 3));
        assert_eq!(1.0, mask.get(7, 7));
        assert_eq!(0.0, mask.get(19, 0));
        assert_eq!(0.0, mask.get(17, 0));
        assert_eq!(1.0, mask.get(10, 10));
        // 13 pixels per full disk of radius 2, 6 for the corner one
        assert_eq!(400.0 - 19.0, mask.pixels().iter().sum::<f64>());
    }

    #[test]
    fn rescaled_vesicle_is_removed_from_micrograph() {
        let dir = test_dir("rescale");
        let pixel_size = 4.0;
        let vesicle = Vesicle::new(64.0, 64.0, 100.0, 2.0);
        let input = Path::new(&dir).join("mic.mrc").to_string_lossy().to_string();

        mrc::save_mrc(&synthetic_micrograph(&vesicle, pixel_size), pixel_size, &input).unwrap();
        utils::write_vesicle_file(&companion_file(&input, ".vestxt"), &[vesicle]).unwrap();
        std::fs::write(companion_file(&input, ".ctf"), CTF_TEXT).unwrap();

        let settings = RefitBatchSettings{
            output_dir: dir.clone(),
            pixel_size,
            model_id: 1,
            ves_suffix: ".vestxt".to_string(),
            ctf_suffix: ".ctf".to_string(),
            edge_mask: None,
            particle_suffix: None,
            particle_radius: 80.0,
            refit: RefitSettings{ mode: RefitMode::Rescale(1.0), ..RefitSettings::default() }
        };

        let missing = Path::new(&dir).join("missing.mrc").to_string_lossy().to_string();
        let summary = refit_micrographs(&[input.clone(), missing], &settings, &quiet()).unwrap();
        assert_eq!(BatchSummary{ processed: 1, skipped: 1, failed: 0 }, summary);

        let (result, _) = mrc::load_mrc(&output_file(&dir, &input, "_ves01.mrc")).unwrap();
        // MRC stores 32-bit floats
        assert!(result.pixels().iter().all(|p| p.abs() < 1.0e-4));
        assert!(!Path::new(&output_file(&dir, &input, "_resub01.txt")).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refined_vesicles_are_written() {
        let dir = test_dir("refit");
        let pixel_size = 4.0;
        let vesicle = Vesicle::new(64.0, 64.0, 100.0, 2.0);
        let input = Path::new(&dir).join("mic.mrc").to_string_lossy().to_string();

        mrc::save_mrc(&synthetic_micrograph(&vesicle, pixel_size), pixel_size, &input).unwrap();
        utils::write_vesicle_file(
            &companion_file(&input, ".vestxt"),
            &[Vesicle::new(65.0, 63.0, 104.0, 1.0), Vesicle::new(10.0, 10.0, 10.0, 1.0)]
        ).unwrap();
        std::fs::write(companion_file(&input, ".ctf"), CTF_TEXT).unwrap();

        let settings = RefitBatchSettings{
            output_dir: dir.clone(),
            pixel_size,
            model_id: 1,
            ves_suffix: ".vestxt".to_string(),
            ctf_suffix: ".ctf".to_string(),
            edge_mask: Some((120, 120)),
            particle_suffix: None,
            particle_radius: 80.0,
            refit: RefitSettings::default()
        };

        let summary = refit_micrographs(&[input.clone()], &settings, &quiet()).unwrap();
        assert_eq!(1, summary.processed);

        // the small vesicle was dropped before fitting
        let refined = utils::read_vesicle_file(&output_file(&dir, &input, "_resub01.txt")).unwrap();
        assert_eq!(1, refined.len());
        assert!(refined[0].is_finite());
        assert!(Path::new(&output_file(&dir, &input, "_ves01.mrc")).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn when_model_is_unsupported_batch_fails() {
        let settings = RefitBatchSettings{
            output_dir: ".".to_string(),
            pixel_size: 2.0,
            model_id: 6,
            ves_suffix: ".vestxt".to_string(),
            ctf_suffix: ".ctf".to_string(),
            edge_mask: None,
            particle_suffix: None,
            particle_radius: 80.0,
            refit: RefitSettings::default()
        };
        assert!(refit_micrographs(&[], &settings, &quiet()).is_err());
    }

    #[test]
    fn located_candidate_matches_vesicle() {
        let dir = test_dir("locate");
        let pixel_size = 4.0;
        let vesicle = Vesicle::new(64.0, 64.0, 100.0, 2.0);
        let input = Path::new(&dir).join("mic.mrc").to_string_lossy().to_string();

        mrc::save_mrc(&synthetic_micrograph(&vesicle, pixel_size), pixel_size, &input).unwrap();
        std::fs::write(companion_file(&input, ".ctf"), CTF_TEXT).unwrap();

        let settings = LocateBatchSettings{
            output_dir: dir.clone(),
            pixel_size,
            ctf_suffix: ".ctf".to_string(),
            radii: locate::radius_range(80.0, 130.0, 20.0).unwrap(),
            max_candidates: 5
        };

        let summary = locate_micrographs(&[input.clone()], &settings, &quiet()).unwrap();
        assert_eq!(1, summary.processed);

        let candidates = utils::read_vesicle_file(&output_file(&dir, &input, CANDIDATES_TAIL)).unwrap();
        assert!(!candidates.is_empty() && candidates.len() <= 5);
        assert!((candidates[0].center.x - 64.0).abs() <= 3.0);
        assert!((candidates[0].center.y - 64.0).abs() <= 3.0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
