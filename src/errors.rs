//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Errors of the modeling engine.
//!

#[derive(Clone, Debug, PartialEq)]
pub enum VesError {
    /// Invalid or incomplete input parameters.
    Configuration(String),
    /// Singular system, non-finite values or an invalid profile grid.
    Numerical(String),
    /// A window or reference does not fit where it has to.
    Geometry(String),
    /// Membrane model identifier with no known definition.
    UnsupportedModel(i32)
}

impl std::fmt::Display for VesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VesError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            VesError::Numerical(msg) => write!(f, "numerical error: {}", msg),
            VesError::Geometry(msg) => write!(f, "geometry error: {}", msg),
            VesError::UnsupportedModel(id) => write!(f, "unsupported membrane model: {}", id)
        }
    }
}
