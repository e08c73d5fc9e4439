//! Error types for source extraction.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while configuring a run or processing a catalogue row.
///
/// Only [`Error::Configuration`] aborts a run. Every other variant is scoped
/// to the row that produced it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Catalogue line {line}: {reason}")]
    Catalog { line: usize, reason: String },

    #[error(
        "Cutout of {size_px} px around RA {ra:.6}, Dec {dec:.6} (pixel {x:.1}, {y:.1}) does not fit in the {width}x{height} cube"
    )]
    OutOfBounds {
        ra: f64,
        dec: f64,
        x: f64,
        y: f64,
        size_px: usize,
        width: usize,
        height: usize,
    },

    #[error("All segmentation maps are empty")]
    DegenerateMask,

    #[error("The {what} mask selects no pixels")]
    EmptyMask { what: &'static str },

    #[error("Polynomial of degree {degree} needs more than {samples} spectral samples")]
    InsufficientSamples { degree: usize, samples: usize },

    #[error("Least-squares fit failed: {0}")]
    Numerical(String),

    #[error("Product not found: {name}")]
    ProductNotFound { name: String },

    #[error("Product already exists: {name}")]
    DuplicateProduct { name: String },

    #[error("Cross-correlation image sums to {sum}, cannot normalise")]
    DegenerateCorrelation { sum: f64 },

    #[error("Failed to read '{path}': {message}")]
    Input { path: PathBuf, message: String },

    #[error("Failed to write '{path}': {message}")]
    Output { path: PathBuf, message: String },
}

impl Error {
    /// True for errors that must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    pub(crate) fn input(path: impl Into<PathBuf>, err: anyhow::Error) -> Self {
        Error::Input {
            path: path.into(),
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn output(path: impl Into<PathBuf>, err: anyhow::Error) -> Self {
        Error::Output {
            path: path.into(),
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(Error::Configuration("bad".into()).is_fatal());
        assert!(!Error::DegenerateMask.is_fatal());
        assert!(
            !Error::ProductNotFound {
                name: "TOT".into()
            }
            .is_fatal()
        );
        assert!(!Error::DegenerateCorrelation { sum: 0.0 }.is_fatal());
    }

    #[test]
    fn test_out_of_bounds_message() {
        let err = Error::OutOfBounds {
            ra: 150.0,
            dec: 2.0,
            x: -3.0,
            y: 10.0,
            size_px: 25,
            width: 40,
            height: 40,
        };
        let msg = err.to_string();
        assert!(msg.contains("25 px"));
        assert!(msg.contains("40x40"));
    }

    #[test]
    fn test_input_error_keeps_context_chain() {
        let err = Error::input(
            "cube.fits",
            anyhow::anyhow!("disk").context("Failed to open FITS file"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to read 'cube.fits': Failed to open FITS file: disk"
        );
    }
}
