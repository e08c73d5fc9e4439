//! Whitespace-delimited object catalogue.
//!
//! Each non-blank line that does not start with `#` is one object:
//!
//! ```text
//! ID  RA  DEC  [MODE  REF]
//! ```
//!
//! `MODE` is `APER` (then `REF` is the aperture radius in arcsec) or `IMG`
//! (then `REF` names the weight image).

use std::path::Path;

use tracing::warn;

use crate::config::{Config, RunMode};
use crate::error::{Error, Result};

/// How spectra of one object are extracted.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionMode {
    /// Circular aperture of the given radius in arcsec.
    Aperture { radius: f64 },
    /// Segmentation masks, weighted by the named image (white light if unset).
    Image { weight: Option<String> },
}

impl ExtractionMode {
    /// A numeric reference selects aperture mode, anything else image mode.
    pub fn from_reference(reference: &str) -> Self {
        match reference.trim().parse::<f64>() {
            Ok(radius) if radius.is_finite() && radius > 0.0 => {
                ExtractionMode::Aperture { radius }
            }
            _ => {
                let name = reference.trim();
                let weight = (!name.is_empty() && !name.eq_ignore_ascii_case("white"))
                    .then(|| name.to_string());
                ExtractionMode::Image { weight }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    /// 1-based line number in the catalogue file.
    pub line: usize,
    pub id: String,
    pub ra: f64,
    pub dec: f64,
    /// Per-row override of the configured mode.
    pub mode: Option<ExtractionMode>,
}

impl CatalogRow {
    /// Row override in catalogue mode, otherwise the configured default.
    pub fn resolve_mode(&self, config: &Config) -> ExtractionMode {
        let default = || {
            let mode = ExtractionMode::from_reference(&config.reference);
            match mode {
                ExtractionMode::Image { weight: None } => ExtractionMode::Image {
                    weight: config.weight_image.clone(),
                },
                other => other,
            }
        };
        match (&self.mode, config.mode) {
            (Some(mode), RunMode::Catalog) => mode.clone(),
            _ => default(),
        }
    }
}

/// Read a catalogue file. An unreadable file is a configuration error;
/// malformed lines come back as per-line errors.
pub fn load_catalog(path: &Path) -> Result<Vec<Result<CatalogRow>>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("Cannot read catalogue {}: {e}", path.display()))
    })?;
    let rows = parse_catalog(&text);
    if rows.is_empty() {
        warn!(path = %path.display(), "Catalogue contains no objects");
    }
    Ok(rows)
}

pub fn parse_catalog(text: &str) -> Vec<Result<CatalogRow>> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let trimmed = line.trim();
            (!trimmed.is_empty() && !trimmed.starts_with('#')).then(|| parse_row(i + 1, trimmed))
        })
        .collect()
}

fn parse_row(line: usize, text: &str) -> Result<CatalogRow> {
    let fail = |reason: String| Error::Catalog { line, reason };
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != 3 && tokens.len() != 5 {
        return Err(fail(format!(
            "expected 3 or 5 columns, found {}",
            tokens.len()
        )));
    }

    let coordinate = |token: &str, what: &str| {
        token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| fail(format!("invalid {what} '{token}'")))
    };
    let ra = coordinate(tokens[1], "RA")?;
    let dec = coordinate(tokens[2], "Dec")?;
    if !(-90.0..=90.0).contains(&dec) {
        return Err(fail(format!("Dec {dec} outside [-90, 90]")));
    }

    let mode = match tokens.get(3..5) {
        Some([mode, reference]) => Some(parse_mode(mode, reference).map_err(fail)?),
        _ => None,
    };

    Ok(CatalogRow {
        line,
        id: tokens[0].to_string(),
        ra: ra.rem_euclid(360.0),
        dec,
        mode,
    })
}

fn parse_mode(mode: &str, reference: &str) -> std::result::Result<ExtractionMode, String> {
    if mode.eq_ignore_ascii_case("aper") {
        match reference.parse::<f64>() {
            Ok(radius) if radius.is_finite() && radius > 0.0 => {
                Ok(ExtractionMode::Aperture { radius })
            }
            _ => Err(format!("invalid aperture radius '{reference}'")),
        }
    } else if mode.eq_ignore_ascii_case("img") {
        Ok(ExtractionMode::from_reference(reference))
    } else {
        Err(format!("unknown mode '{mode}', expected APER or IMG"))
    }
}
