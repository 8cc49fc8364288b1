//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Contrast transfer function.
//!

use crate::comp::filter;
use crate::errors::VesError;
use crate::image::Image;
use std::collections::HashMap;
use std::f64::consts::PI;

/// Imaging parameters of a micrograph.
///
/// Units: `lambda` Å, `defocus` and `delta_defocus` µm, `cs` mm, `b_factor` Å², `theta` radians.
///
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CtfParams {
    Isotropic {
        lambda: f64,
        defocus: f64,
        cs: f64,
        b_factor: f64,
        alpha: f64
    },
    Astigmatic {
        lambda: f64,
        defocus: f64,
        cs: f64,
        b_factor: f64,
        alpha: f64,
        delta_defocus: f64,
        theta: f64
    }
}

fn required(values: &HashMap<String, f64>, key: &str) -> Result<f64, VesError> {
    match values.get(key) {
        Some(value) if value.is_finite() => Ok(*value),
        Some(value) => Err(VesError::Configuration(format!("invalid CTF parameter {}: {}", key, value))),
        None => Err(VesError::Configuration(format!("missing CTF parameter: {}", key)))
    }
}

/// Returns the value of `key`, or of `alt_key` if present (the latter takes precedence).
fn optional(values: &HashMap<String, f64>, key: &str, alt_key: &str) -> Option<f64> {
    values.get(alt_key).or_else(|| values.get(key)).cloned()
}

impl CtfParams {
    /// Creates parameters from named values (keys as in CTF files).
    ///
    /// `lambda`, `defocus` and `Cs` are required. The B-factor is taken from `bfactor` or `B`, the amplitude
    /// contrast from `qfactor` or `alpha` (both default to 0). Astigmatism requires both `deltadef` and `theta`.
    ///
    pub fn from_map(values: &HashMap<String, f64>) -> Result<CtfParams, VesError> {
        let lambda = required(values, "lambda")?;
        let defocus = required(values, "defocus")?;
        let cs = required(values, "Cs")?;
        let b_factor = optional(values, "B", "bfactor").unwrap_or(0.0);
        let alpha = optional(values, "alpha", "qfactor").unwrap_or(0.0);

        if !b_factor.is_finite() || !alpha.is_finite() {
            return Err(VesError::Configuration(format!("invalid B-factor ({}) or amplitude contrast ({})", b_factor, alpha)));
        }

        match (values.get("deltadef"), values.get("theta")) {
            (None, None) => Ok(CtfParams::Isotropic{ lambda, defocus, cs, b_factor, alpha }),

            (Some(_), Some(_)) => Ok(CtfParams::Astigmatic{
                lambda, defocus, cs, b_factor, alpha,
                delta_defocus: required(values, "deltadef")?,
                theta: required(values, "theta")?
            }),

            _ => Err(VesError::Configuration("astigmatism needs both deltadef and theta".to_string()))
        }
    }

    /// Reads parameters from a CTF file (see `parse_ctf_text`).
    pub fn load(file_name: &str) -> Result<CtfParams, VesError> {
        let text = std::fs::read_to_string(file_name)
            .map_err(|e| VesError::Configuration(format!("cannot read CTF file {}: {}", file_name, e)))?;
        CtfParams::from_map(&parse_ctf_text(&text)?)
    }

    pub fn lambda(&self) -> f64 {
        match *self { CtfParams::Isotropic{ lambda, .. } | CtfParams::Astigmatic{ lambda, .. } => lambda }
    }

    pub fn defocus(&self) -> f64 {
        match *self { CtfParams::Isotropic{ defocus, .. } | CtfParams::Astigmatic{ defocus, .. } => defocus }
    }

    pub fn cs(&self) -> f64 {
        match *self { CtfParams::Isotropic{ cs, .. } | CtfParams::Astigmatic{ cs, .. } => cs }
    }

    pub fn b_factor(&self) -> f64 {
        match *self { CtfParams::Isotropic{ b_factor, .. } | CtfParams::Astigmatic{ b_factor, .. } => b_factor }
    }

    pub fn alpha(&self) -> f64 {
        match *self { CtfParams::Isotropic{ alpha, .. } | CtfParams::Astigmatic{ alpha, .. } => alpha }
    }
}

/// Parses the text of a CTF file into named values.
///
/// Recognized lines:
///
///   # comment
///   key value               (also accepted as "value key")
///   zp_ctf <count>          (the next line holds <count> values, skipped)
///   f v1 v2 v3 v4           (5-column fit curves, skipped)
///
pub fn parse_ctf_text(text: &str) -> Result<HashMap<String, f64>, VesError> {
    let mut values = HashMap::new();
    let mut skip_next = false;

    for (line_idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') { continue; }
        if skip_next { skip_next = false; continue; }

        let mut tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 2 { continue; }

        if tokens[1].chars().all(|c| c.is_alphabetic() || c == '_') {
            tokens.swap(0, 1);
        }

        let value = tokens[1].parse::<f64>().map_err(|_| VesError::Configuration(
            format!("CTF file, line {}: invalid value of {}: {}", line_idx + 1, tokens[0], tokens[1])
        ))?;

        match tokens[0] {
            "zp_ctf" | "zp_noise" => skip_next = value > 0.0,
            key => { values.insert(key.to_string(), value); }
        }
    }

    Ok(values)
}

/// Returns the centered (zero frequency at (floor(n/2), floor(n/2))) `n`x`n` CTF.
///
/// For astigmatic parameters, the defocus varies with the azimuth of the frequency vector
/// (`defocus + delta_defocus · cos(2(theta - azimuth))`).
///
pub fn contrast_transfer_astig(n: u32, pixel_size: f64, params: &CtfParams) -> Image {
    let f0 = 1.0 / (n as f64 * pixel_size);
    let lambda = params.lambda();
    let cs = params.cs();
    let b_factor = params.b_factor();
    let alpha = params.alpha();

    match *params {
        CtfParams::Astigmatic{ defocus, delta_defocus, theta, .. } => {
            let half = n as f64 / 2.0;
            Image::from_fn(n, n, |x, y| {
                let xx = x as f64 - half;
                let yy = y as f64 - half;
                let r2 = xx * xx + yy * yy;
                let theta0 = yy.atan2(xx);
                let chi4 = PI / 2.0 * cs * lambda.powi(3) * 1.0e7 * f0.powi(4) * r2 * r2;
                let df = defocus + delta_defocus * (2.0 * (theta - theta0)).cos();
                let chi = (-PI * 1.0e4 * lambda * df * f0 * f0 * r2 + chi4 - alpha) / PI;
                (PI * chi).sin() * (-r2 * f0 * f0 * b_factor).exp()
            })
        },

        CtfParams::Isotropic{ defocus, .. } => {
            let center = (n / 2) as f64;
            Image::from_fn(n, n, |x, y| {
                let s2 = ((x as f64 - center).powi(2) + (y as f64 - center).powi(2)) * f0 * f0;
                let chi = -1.0e4 * lambda * defocus * s2 + cs * lambda.powi(3) * 5.0e6 * s2 * s2 - alpha.asin() / PI;
                (PI * chi).sin() * (-b_factor * s2).exp()
            })
        }
    }
}

/// Returns the centered isotropic `n`x`n` CTF, zeroed outside the circle inscribed in the frequency square.
///
/// Astigmatism (if any) in `params` is ignored.
///
pub fn ctf_isotropic_masked(n: u32, pixel_size: f64, params: &CtfParams) -> Image {
    let f2 = 1.0 / (n as f64 * pixel_size).powi(2);
    let f4 = f2 * f2;
    let df = params.defocus() * 1.0e4;
    let cs = params.cs() * 1.0e7;
    let lambda = params.lambda();
    let b_factor = params.b_factor();
    let alpha_phase = params.alpha().asin();
    let half = n as f64 / 2.0;

    Image::from_fn(n, n, |x, y| {
        let r2 = (x as f64 - half).powi(2) + (y as f64 - half).powi(2);
        if r2 >= half * half {
            0.0
        } else {
            let chi = PI * (-lambda * df * f2 * r2 + 0.5 * lambda.powi(3) * cs * f4 * r2 * r2) - alpha_phase;
            chi.sin() * (-b_factor * f2 * r2).exp()
        }
    })
}

/// Returns the `n`x`n` CTF with zero frequency at (0, 0), ready to multiply an image's spectrum.
pub fn ctf_for_subtraction(params: &CtfParams, pixel_size: f64, n: u32) -> Image {
    let centered = match params {
        CtfParams::Astigmatic{ .. } => contrast_transfer_astig(n, pixel_size, params),
        CtfParams::Isotropic{ .. } => ctf_isotropic_masked(n, pixel_size, params)
    };
    filter::center_to_origin(&centered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isotropic(lambda: f64, alpha: f64, b_factor: f64) -> CtfParams {
        CtfParams::Isotropic{ lambda, defocus: 1.5, cs: 2.7, b_factor, alpha }
    }

    #[test]
    fn given_zero_wavelength_ctf_is_constant() {
        let params = isotropic(0.0, 0.07, 0.0);
        let expected = (-(0.07f64).asin()).sin();

        for v in contrast_transfer_astig(16, 2.0, &params).pixels() {
            assert!((v - expected).abs() < 1.0e-12);
        }

        let masked = ctf_isotropic_masked(16, 2.0, &params);
        assert!((masked.get(8, 8) - expected).abs() < 1.0e-12);
        assert!((masked.get(8, 1) - expected).abs() < 1.0e-12);
        assert_eq!(0.0, masked.get(0, 0));
        assert_eq!(0.0, masked.get(8, 0));
    }

    #[test]
    fn given_zero_astigmatism_astigmatic_matches_isotropic() {
        let iso = CtfParams::Isotropic{ lambda: 0.0197, defocus: 1.44, cs: 2.7, b_factor: 48.0, alpha: 0.0 };
        let astig = CtfParams::Astigmatic{
            lambda: 0.0197, defocus: 1.44, cs: 2.7, b_factor: 48.0, alpha: 0.0, delta_defocus: 0.0, theta: 0.36
        };
        let c1 = contrast_transfer_astig(32, 1.056, &iso);
        let c2 = contrast_transfer_astig(32, 1.056, &astig);
        for (a, b) in c1.pixels().iter().zip(c2.pixels().iter()) {
            assert!((a - b).abs() < 1.0e-9);
        }
    }

    #[test]
    fn astigmatic_ctf_has_point_symmetry() {
        let astig = CtfParams::Astigmatic{
            lambda: 0.0197, defocus: 1.44, cs: 2.7, b_factor: 48.0, alpha: 0.07, delta_defocus: 0.2, theta: 0.36
        };
        let c = contrast_transfer_astig(32, 1.056, &astig);
        for &(x, y) in &[(3u32, 5u32), (20, 9), (16, 30)] {
            assert!((c.get(x, y) - c.get(32 - x, 32 - y)).abs() < 1.0e-9);
        }
        // the defocus differs between azimuths
        assert!((c.get(16 + 7, 16) - c.get(16, 16 + 7)).abs() > 1.0e-6);
    }

    #[test]
    fn zero_frequency_lands_at_origin() {
        let params = isotropic(0.0197, 0.07, 48.0);
        let ctf = ctf_for_subtraction(&params, 1.5, 20);
        assert!((ctf.get(0, 0) + 0.07).abs() < 1.0e-12);
    }

    #[test]
    fn parses_ctf_file() {
        let text =
r#"# CTF fit results
defocus 1.4398
deltadef 0.0073
theta 0.3649
bfactor 48
0.0197 lambda
Cs 2.7
qfactor 0.07
zp_ctf 3
1 2 3
0.01 0.5 0.4 0.1 0.2
"#;
        let values = parse_ctf_text(text).unwrap();
        assert_eq!(Some(&0.0197), values.get("lambda"));
        assert_eq!(None, values.get("zp_ctf"));

        match CtfParams::from_map(&values).unwrap() {
            CtfParams::Astigmatic{ defocus, delta_defocus, b_factor, alpha, .. } => {
                assert_eq!(1.4398, defocus);
                assert_eq!(0.0073, delta_defocus);
                assert_eq!(48.0, b_factor);
                assert_eq!(0.07, alpha);
            },
            _ => panic!("Expected astigmatic parameters.")
        }
    }

    #[test]
    fn when_only_one_astigmatism_field_fail() {
        let values = parse_ctf_text("lambda 0.0197\ndefocus 1.0\nCs 2.7\ndeltadef 0.1\n").unwrap();
        assert!(CtfParams::from_map(&values).is_err());
    }

    #[test]
    fn when_required_field_missing_fail() {
        let values = parse_ctf_text("lambda 0.0197\ndefocus 1.0\n").unwrap();
        assert_eq!(
            Err(VesError::Configuration("missing CTF parameter: Cs".to_string())),
            CtfParams::from_map(&values)
        );
    }

    #[test]
    fn when_value_invalid_fail() {
        assert!(parse_ctf_text("defocus abc1\n").is_err());
    }
}
