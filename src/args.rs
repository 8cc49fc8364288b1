//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Command-line options definitions and parsing.
//!

use crate::logging;
use strum::IntoEnumIterator;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ModeOfOperation {
    /// Refine the saved vesicle parameters and subtract the refined vesicles.
    Refit,
    /// Subtract the saved vesicles with amplitudes multiplied by a constant.
    Rescale,
    /// Find vesicle candidates by cross-correlation.
    Locate
}

pub mod cmdline {
    pub const HELP:                    &str = "help";
    pub const MODE_OF_OPERATION:       &str = "mode";
    pub const INPUT_FILES:             &str = "input_files";
    pub const INPUT_LIST:              &str = "input_list";
    pub const OUTPUT_DIRECTORY:        &str = "output_dir";
    pub const PIXEL_SIZE:              &str = "pixel_size";
    pub const MODEL:                   &str = "model";
    pub const VES_SUFFIX:              &str = "ves_suffix";
    pub const CTF_SUFFIX:              &str = "ctf_suffix";
    pub const MP_SCALING:              &str = "mp_scaling";
    pub const EDGE_MASK:               &str = "edge_mask";
    pub const PARTICLE_SUFFIX:         &str = "particle_suffix";
    pub const PARTICLE_RADIUS:         &str = "particle_radius";
    pub const BAD_AMPLITUDE_THRESHOLD: &str = "bad_amplitude_threshold";
    pub const RADIUS_RANGE:            &str = "radius_range";
    pub const MAX_CANDIDATES:          &str = "max_candidates";
    pub const LOG_LEVEL:               &str = "log_level";
}

pub const DEFAULT_MODEL: i32 = 44;
pub const DEFAULT_VES_SUFFIX: &str = ".vestxt";
pub const DEFAULT_CTF_SUFFIX: &str = ".ctf";
/// Å.
pub const DEFAULT_PARTICLE_RADIUS: f64 = 80.0;
pub const DEFAULT_BAD_AMPLITUDE_THRESHOLD: f64 = 0.1;
pub const DEFAULT_MAX_CANDIDATES: usize = 200;

#[derive(Debug)]
pub enum InputFiles {
    CommandLineList(Vec<String>),
    ListFile(String),
}

/// Radii (Å) of the locate mode's reference library.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RadiusRange {
    pub min: f64,
    pub max: f64,
    pub step: f64
}

#[derive(Debug)]
pub struct Configuration {
    mode: ModeOfOperation,
    input_files: InputFiles,
    output_dir: Option<String>,
    pixel_size: f64,
    model: i32,
    ves_suffix: String,
    ctf_suffix: String,
    mp_scaling: Option<f64>,
    edge_mask: Option<(u32, u32)>,
    particle_suffix: Option<String>,
    particle_radius: f64,
    bad_amplitude_threshold: f64,
    radius_range: Option<RadiusRange>,
    max_candidates: usize,
    log_level: logging::Level
}

impl Configuration {
    pub fn mode(&self) -> ModeOfOperation { self.mode }
    pub fn take_input_files(self) -> InputFiles { self.input_files }
    pub fn output_dir(&self) -> &Option<String> { &self.output_dir }
    pub fn pixel_size(&self) -> f64 { self.pixel_size }
    pub fn model(&self) -> i32 { self.model }
    pub fn ves_suffix(&self) -> &str { &self.ves_suffix }
    pub fn ctf_suffix(&self) -> &str { &self.ctf_suffix }
    pub fn mp_scaling(&self) -> Option<f64> { self.mp_scaling }
    pub fn edge_mask(&self) -> Option<(u32, u32)> { self.edge_mask }
    pub fn particle_suffix(&self) -> &Option<String> { &self.particle_suffix }
    pub fn particle_radius(&self) -> f64 { self.particle_radius }
    pub fn bad_amplitude_threshold(&self) -> f64 { self.bad_amplitude_threshold }
    pub fn radius_range(&self) -> Option<RadiusRange> { self.radius_range }
    pub fn max_candidates(&self) -> usize { self.max_candidates }
    pub fn log_level(&self) -> logging::Level { self.log_level }
}

impl From<ModeOfOperation> for &str {
    fn from(m: ModeOfOperation) -> &'static str {
        match m {
            ModeOfOperation::Refit   => "refit",
            ModeOfOperation::Rescale => "rescale",
            ModeOfOperation::Locate  => "locate"
        }
    }
}

impl From<logging::Level> for &str {
    fn from(level: logging::Level) -> &'static str {
        match level {
            logging::Level::Quiet   => "quiet",
            logging::Level::Info    => "info",
            logging::Level::Verbose => "verbose"
        }
    }
}

impl std::str::FromStr for logging::Level {
    type Err = ();
    fn from_str(s: &str) -> Result<logging::Level, ()> {

        for level in logging::Level::iter() {
            if s == Into::<&str>::into(level) {
                return Ok(level);
            }
        }

        Err(())
    }
}


pub fn print_help() {
    println!(
r#"Command-line options:

  --{} <mode>

    Mode of operation. Possible values:

        {:7}    refine position, radius and amplitude of each saved vesicle, then subtract it
        {:7}    subtract the saved vesicles with amplitudes multiplied by --{}
        {:7}    find vesicle candidates by cross-correlation with a library of model vesicles


  --{} <file1 file2 ...>

    Input micrographs (MRC).


  --{} <file>

    File containing the list of input micrographs (one file per line; empty lines and lines starting with '#'
    are ignored).


  --{} <directory>

    Output directory. Default: the current directory.


  --{} <value>

    Pixel size of the micrographs in Å. Required.


  --{} <id>

    Membrane model: 1 (bilayer shell), 2 (bilayer shell with thick head groups), {} (measured profile).
    Default: {}.


  --{} <text>

    Each micrograph's vesicle file is the micrograph file name followed by this suffix. Default: "{}".


  --{} <text>

    Each micrograph's CTF file is the micrograph file name followed by this suffix. Default: "{}".


  --{} <value>

    Amplitude multiplier. Required when mode = {}.


  --{} <nx> <ny>

    Size of the valid centered region of the micrographs; pixels outside of it (blank padding) are not
    used for fitting.


  --{} <text>

    If specified, each micrograph's particle box file is the micrograph file name followed by this suffix.
    Pixels around the particles are not used for fitting.


  --{} <value>

    Radius (Å) of the excluded disk around each particle. Default: {}.


  --{} <value>

    Vesicles with a fitted amplitude below this value are reported as bad. Default: {}.


  --{} <min> <max> <step>

    Radii (Å) of the reference vesicles; <max> is exclusive. Required when mode = {}.


  --{} <value>

    Maximum number of candidates per micrograph. Default: {}. Valid only when mode = {}.


  --{} <{}|{}|{}>

    Chooses the amount of messages to print during processing.

"#,
        cmdline::MODE_OF_OPERATION,
        Into::<&str>::into(ModeOfOperation::Refit),
        Into::<&str>::into(ModeOfOperation::Rescale), cmdline::MP_SCALING,
        Into::<&str>::into(ModeOfOperation::Locate),

        cmdline::INPUT_FILES,

        cmdline::INPUT_LIST,

        cmdline::OUTPUT_DIRECTORY,

        cmdline::PIXEL_SIZE,

        cmdline::MODEL, DEFAULT_MODEL, DEFAULT_MODEL,

        cmdline::VES_SUFFIX, DEFAULT_VES_SUFFIX,

        cmdline::CTF_SUFFIX, DEFAULT_CTF_SUFFIX,

        cmdline::MP_SCALING, Into::<&str>::into(ModeOfOperation::Rescale),

        cmdline::EDGE_MASK,

        cmdline::PARTICLE_SUFFIX,

        cmdline::PARTICLE_RADIUS, DEFAULT_PARTICLE_RADIUS,

        cmdline::BAD_AMPLITUDE_THRESHOLD, DEFAULT_BAD_AMPLITUDE_THRESHOLD,

        cmdline::RADIUS_RANGE, Into::<&str>::into(ModeOfOperation::Locate),

        cmdline::MAX_CANDIDATES, DEFAULT_MAX_CANDIDATES, Into::<&str>::into(ModeOfOperation::Locate),

        cmdline::LOG_LEVEL,
        Into::<&str>::into(logging::Level::Quiet),
        Into::<&str>::into(logging::Level::Info),
        Into::<&str>::into(logging::Level::Verbose),
    );
}

/// Returns the value of a single-valued option of type `T`.
fn get_option_value<T: std::str::FromStr>(
    option: &str,
    option_values: &std::collections::HashMap::<String, Vec<String>>
) -> Result<Option<T>, ()> {
    match option_values.get(option) {
        None => Ok(None),
        Some(vals) => if vals.is_empty() {
            eprintln!("Value missing for option {}.", option);
            Err(())
        } else if vals.len() > 1 {
            eprintln!("Too many values for option {}.", option);
            Err(())
        } else {
            match vals[0].parse::<T>() {
                Ok(value) => Ok(Some(value)),
                Err(_) => {
                    eprintln!("Invalid value for option {}: {}.", option, vals[0]);
                    Err(())
                }
            }
        }
    }
}

/// Returns the values of an option which takes exactly `count` values of type `T`.
fn get_option_values<T: std::str::FromStr>(
    option: &str,
    count: usize,
    option_values: &std::collections::HashMap::<String, Vec<String>>
) -> Result<Option<Vec<T>>, ()> {
    match option_values.get(option) {
        None => Ok(None),
        Some(vals) => if vals.len() != count {
            eprintln!("Option {} expects {} values, got {}.", option, count, vals.len());
            Err(())
        } else {
            let mut parsed = Vec::with_capacity(count);
            for val in vals {
                match val.parse::<T>() {
                    Ok(value) => parsed.push(value),
                    Err(_) => {
                        eprintln!("Invalid value for option {}: {}.", option, val);
                        return Err(());
                    }
                }
            }
            Ok(Some(parsed))
        }
    }
}

/// Prints an error if `value` is set and `mode` is not `expected_mode`.
fn check_mode_specific<T>(
    option: &str,
    value: &Option<T>,
    mode: ModeOfOperation,
    expected_mode: ModeOfOperation
) -> Result<(), ()> {
    if value.is_some() && mode != expected_mode {
        eprintln!("Unexpected option {} (mode is not {}).", option, Into::<&str>::into(expected_mode));
        Err(())
    } else {
        Ok(())
    }
}

/// Returns Ok(None) if help was requested.
pub fn parse_command_line<I: Iterator<Item=String>>(stream: I) -> Result<Option<Configuration>, ()> {
    let allowed_options = vec![
     cmdline::HELP,
     cmdline::MODE_OF_OPERATION,
     cmdline::INPUT_FILES,
     cmdline::INPUT_LIST,
     cmdline::OUTPUT_DIRECTORY,
     cmdline::PIXEL_SIZE,
     cmdline::MODEL,
     cmdline::VES_SUFFIX,
     cmdline::CTF_SUFFIX,
     cmdline::MP_SCALING,
     cmdline::EDGE_MASK,
     cmdline::PARTICLE_SUFFIX,
     cmdline::PARTICLE_RADIUS,
     cmdline::BAD_AMPLITUDE_THRESHOLD,
     cmdline::RADIUS_RANGE,
     cmdline::MAX_CANDIDATES,
     cmdline::LOG_LEVEL
    ];

    // key: option name
    let mut option_values = std::collections::HashMap::<String, Vec<String>>::new();

    let mut current: Option<String> = None;

    for arg in stream.skip(1) /*skip the binary name*/ {
        if arg.starts_with("--") {
            match &arg[2..] {
                cmdline::HELP => { print_help(); return Ok(None); },
                x if !allowed_options.contains(&x) => {
                    eprintln!("Unknown command-line option: {}.", x); return Err(());
                },
                opt => {
                    option_values.entry(opt.to_string()).or_insert(vec![]);
                    current = Some(opt.to_string());
                }
            }
        } else {
            match &current {
                None => {
                    eprintln!("Unexpected value: {}.", arg);
                    return Err(());
                },
                Some(opt) => option_values.entry(opt.clone()).or_insert(vec![]).push(arg)
            }
        }
    }

    let mode = match option_values.get(cmdline::MODE_OF_OPERATION).and_then(|vals| vals.first()) {
        None => { eprintln!("Mode not specified."); return Err(()); },
        Some(x) if x == Into::<&str>::into(ModeOfOperation::Refit) => ModeOfOperation::Refit,
        Some(x) if x == Into::<&str>::into(ModeOfOperation::Rescale) => ModeOfOperation::Rescale,
        Some(x) if x == Into::<&str>::into(ModeOfOperation::Locate) => ModeOfOperation::Locate,
        Some(x) => {
            eprintln!("Invalid mode of operation: {}. Expected one of: {}, {}, {}.",
                x,
                Into::<&str>::into(ModeOfOperation::Refit),
                Into::<&str>::into(ModeOfOperation::Rescale),
                Into::<&str>::into(ModeOfOperation::Locate)
            );
            return Err(());
        }
    };

    if !option_values.get(cmdline::INPUT_FILES).unwrap_or(&vec![]).is_empty() &&
       !option_values.get(cmdline::INPUT_LIST).unwrap_or(&vec![]).is_empty() {
        eprintln!("Cannot use both a list file and input files given in the command line.");
        return Err(());
    }

    let input_files: InputFiles = match option_values.get(cmdline::INPUT_FILES) {
        Some(vals) => if vals.is_empty() {
            eprintln!("Input files not specified.");
            return Err(());
        } else {
            InputFiles::CommandLineList(vals.clone())
        },
        None => match option_values.get(cmdline::INPUT_LIST).and_then(|vals| vals.first()) {
            Some(list_file) => InputFiles::ListFile(list_file.clone()),
            None => {
                eprintln!("Input files not specified.");
                return Err(())
            }
        }
    };

    let output_dir = get_option_value::<String>(cmdline::OUTPUT_DIRECTORY, &option_values)?;

    let pixel_size = match get_option_value::<f64>(cmdline::PIXEL_SIZE, &option_values)? {
        Some(val) => if val > 0.0 && val.is_finite() {
            val
        } else {
            eprintln!("Pixel size must be positive, got {}.", val);
            return Err(());
        },
        None => { eprintln!("Pixel size not specified (use --{}).", cmdline::PIXEL_SIZE); return Err(()); }
    };

    let model = get_option_value::<i32>(cmdline::MODEL, &option_values)?.unwrap_or(DEFAULT_MODEL);

    let ves_suffix = get_option_value::<String>(cmdline::VES_SUFFIX, &option_values)?
        .unwrap_or(DEFAULT_VES_SUFFIX.to_string());

    let ctf_suffix = get_option_value::<String>(cmdline::CTF_SUFFIX, &option_values)?
        .unwrap_or(DEFAULT_CTF_SUFFIX.to_string());

    let mp_scaling = get_option_value::<f64>(cmdline::MP_SCALING, &option_values)?;
    check_mode_specific(cmdline::MP_SCALING, &mp_scaling, mode, ModeOfOperation::Rescale)?;
    if mode == ModeOfOperation::Rescale && mp_scaling.is_none() {
        eprintln!("Amplitude multiplier must be specified (use --{}).", cmdline::MP_SCALING);
        return Err(());
    }

    let edge_mask = match get_option_values::<u32>(cmdline::EDGE_MASK, 2, &option_values)? {
        Some(vals) => if vals[0] == 0 || vals[1] == 0 {
            eprintln!("Invalid edge mask size: {} {}.", vals[0], vals[1]);
            return Err(());
        } else {
            Some((vals[0], vals[1]))
        },
        None => None
    };

    let particle_suffix = get_option_value::<String>(cmdline::PARTICLE_SUFFIX, &option_values)?;

    let particle_radius = match get_option_value::<f64>(cmdline::PARTICLE_RADIUS, &option_values)? {
        Some(val) => if particle_suffix.is_none() {
            eprintln!("Unexpected option {} ({} was not specified).", cmdline::PARTICLE_RADIUS, cmdline::PARTICLE_SUFFIX);
            return Err(());
        } else if !(val > 0.0) {
            eprintln!("Particle radius must be positive, got {}.", val);
            return Err(());
        } else {
            val
        },
        None => DEFAULT_PARTICLE_RADIUS
    };

    let bad_amplitude_threshold = get_option_value::<f64>(cmdline::BAD_AMPLITUDE_THRESHOLD, &option_values)?
        .unwrap_or(DEFAULT_BAD_AMPLITUDE_THRESHOLD);

    let radius_range = get_option_values::<f64>(cmdline::RADIUS_RANGE, 3, &option_values)?
        .map(|vals| RadiusRange{ min: vals[0], max: vals[1], step: vals[2] });
    check_mode_specific(cmdline::RADIUS_RANGE, &radius_range, mode, ModeOfOperation::Locate)?;
    if mode == ModeOfOperation::Locate && radius_range.is_none() {
        eprintln!("Radius range must be specified (use --{}).", cmdline::RADIUS_RANGE);
        return Err(());
    }

    let max_candidates = get_option_value::<usize>(cmdline::MAX_CANDIDATES, &option_values)?;
    check_mode_specific(cmdline::MAX_CANDIDATES, &max_candidates, mode, ModeOfOperation::Locate)?;
    let max_candidates = max_candidates.unwrap_or(DEFAULT_MAX_CANDIDATES);

    let log_level = get_option_value::<logging::Level>(cmdline::LOG_LEVEL, &option_values)?
        .unwrap_or(logging::Level::Info);

    Ok(Some(Configuration{
        mode,
        input_files,
        output_dir,
        pixel_size,
        model,
        ves_suffix,
        ctf_suffix,
        mp_scaling,
        edge_mask,
        particle_suffix,
        particle_radius,
        bad_amplitude_threshold,
        radius_range,
        max_candidates,
        log_level
    }))
}
