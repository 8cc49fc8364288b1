//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Entry point and main functions of the `vestool` executable.
//!

mod args;
mod batch;
mod comp;
mod ctf;
mod errors;
mod image;
mod logging;
mod utils;
mod vesicle;

use args::{InputFiles, ModeOfOperation};
use logging::Logger;
use vesicle::subtract::{RefitMode, RefitSettings};

const VERSION_STRING: &'static str = include_str!(concat!(env!("OUT_DIR"), "/version"));

fn print_header() {
    println!(r#"
_________________

   {}
   Vesicle modeling and subtraction for cryo-EM micrographs

   Copyright © 2020 Filip Szczerek <ga.software@yahoo.com>

   This program is licensed under MIT license (see LICENSE.txt for details).

_________________
"#,
        VERSION_STRING
    );
}

fn output_dir(config: &args::Configuration) -> String {
    match config.output_dir().clone() {
        Some(output_dir) => output_dir,
        None => ".".to_string()
    }
}

fn input_files(input_files: InputFiles, logger: &Logger) -> Option<Vec<String>> {
    match input_files {
        InputFiles::CommandLineList(list) => Some(list),
        InputFiles::ListFile(list_file) => match utils::parse_list_file(&list_file) {
            Ok(list) => if list.is_empty() {
                logger.warn(&format!("no input files listed in {}", list_file));
                None
            } else {
                Some(list)
            },
            Err(err) => {
                eprintln!("Error reading {}: {}.", list_file, err);
                None
            }
        }
    }
}

fn mode_refit(config: args::Configuration, logger: &Logger) -> Option<batch::BatchSummary> {
    let mode = match config.mode() {
        ModeOfOperation::Rescale => RefitMode::Rescale(config.mp_scaling()?),
        _ => RefitMode::Refit
    };

    let settings = batch::RefitBatchSettings{
        output_dir: output_dir(&config),
        pixel_size: config.pixel_size(),
        model_id: config.model(),
        ves_suffix: config.ves_suffix().to_string(),
        ctf_suffix: config.ctf_suffix().to_string(),
        edge_mask: config.edge_mask(),
        particle_suffix: config.particle_suffix().clone(),
        particle_radius: config.particle_radius(),
        refit: RefitSettings{
            mode,
            bad_amplitude_threshold: config.bad_amplitude_threshold(),
            ..RefitSettings::default()
        }
    };

    let input_files = input_files(config.take_input_files(), logger)?;

    match batch::refit_micrographs(&input_files, &settings, logger) {
        Ok(summary) => Some(summary),
        Err(err) => { eprintln!("Error: {}.", err); None }
    }
}

fn mode_locate(config: args::Configuration, logger: &Logger) -> Option<batch::BatchSummary> {
    let range = config.radius_range()?;
    let radii = match vesicle::locate::radius_range(range.min, range.max, range.step) {
        Ok(radii) => radii,
        Err(err) => { eprintln!("Error: {}.", err); return None; }
    };
    logger.verbose(&format!("reference radii (Å): {:?}", radii));

    let settings = batch::LocateBatchSettings{
        output_dir: output_dir(&config),
        pixel_size: config.pixel_size(),
        ctf_suffix: config.ctf_suffix().to_string(),
        radii,
        max_candidates: config.max_candidates()
    };

    let input_files = input_files(config.take_input_files(), logger)?;

    match batch::locate_micrographs(&input_files, &settings, logger) {
        Ok(summary) => Some(summary),
        Err(err) => { eprintln!("Error: {}.", err); None }
    }
}

fn run_program() -> bool {
    print_header();
    println!();

    let config = match args::parse_command_line(std::env::args()) {
        Ok(config) => match config {
            None => return true, // help was requested
            Some(config) => config
        },
        Err(_) => { println!("\nUse --{} for more information.\n", args::cmdline::HELP); return false; }
    };

    let mode = config.mode();

    let logger = Logger::new(config.log_level());

    let tstart = std::time::Instant::now();

    let summary = match mode {
        ModeOfOperation::Refit | ModeOfOperation::Rescale => mode_refit(config, &logger),

        ModeOfOperation::Locate => mode_locate(config, &logger)
    };

    let summary = match summary {
        Some(summary) => summary,
        None => return false
    };

    let elapsed = tstart.elapsed();
    let mins = elapsed.as_secs() / 60;
    let secs = elapsed.as_secs() % 60;
    let frac_secs = elapsed.as_secs_f32() - (mins * 60) as f32 - secs as f32;
    logger.info(&format!(
        "Processed {} micrographs ({} skipped, {} failed) in {} min {:02}.{} s.",
        summary.processed, summary.skipped, summary.failed, mins, secs, (frac_secs * 10.0) as u32
    ));

    summary.failed == 0
}

fn main() {
    std::process::exit(if run_program() { 0 } else { 1 });
}
