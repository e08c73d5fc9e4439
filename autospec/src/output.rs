//! Per-source FITS product files.
//!
//! One file per source, `<prefix><ID>.fits`. The primary HDU carries only
//! header keywords (identity, position, provenance); every product follows as
//! an image extension named after its key:
//!
//! - cubes: `<KEY>_DATA` and, when present, `<KEY>_STAT`
//! - images: `<KEY>`
//! - spectra: `<KEY>_DATA` and, when present, `<KEY>_STAT`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use fitsio::FitsFile;
use fitsio::hdu::FitsHdu;
use fitsio::images::{ImageDescription, ImageType};
use tracing::{debug, warn};

use crate::cube::{Cube, Image, SpectralAxis, Wcs};
use crate::error::{Error, Result};
use crate::source::{Source, Spectrum};

/// Name written to `EXT` in every product file.
pub const SOFTWARE: &str = "AutoSpec";

/// Persists a finished source somewhere.
pub trait SourceWriter {
    /// Write `source` and return where it went.
    fn write(&self, source: &Source) -> Result<PathBuf>;
}

/// Writes each source to its own FITS file in `dir`.
#[derive(Debug, Clone)]
pub struct FitsWriter {
    dir: PathBuf,
    prefix: String,
}

impl FitsWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn output_path(&self, id: &str) -> PathBuf {
        output_path(&self.dir, &self.prefix, id)
    }
}

impl SourceWriter for FitsWriter {
    fn write(&self, source: &Source) -> Result<PathBuf> {
        let path = self.output_path(&source.id);
        if path.exists() {
            warn!(
                id = %source.id,
                path = %path.display(),
                "Output file already exists and will be replaced"
            );
        }
        write_source(source, &path).map_err(|e| Error::output(&path, e))?;
        Ok(path)
    }
}

/// `<dir>/<prefix><id>.fits`
///
/// Path separators and control characters in `id` become `_`, so the file
/// always lands directly inside `dir`.
pub fn output_path(dir: &Path, prefix: &str, id: &str) -> PathBuf {
    let stem: String = id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    dir.join(format!("{prefix}{stem}.fits"))
}

/// Write every product of `source` to `path`, replacing any existing file.
pub fn write_source(source: &Source, path: &Path) -> AnyResult<()> {
    // fitsio refuses to overwrite
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove existing file: {}", path.display()))?;
    }

    let mut fptr = FitsFile::create(path)
        .open()
        .with_context(|| format!("Failed to create FITS file: {}", path.display()))?;
    write_primary_header(&mut fptr, source)?;

    for (key, cube) in source.cubes() {
        write_cube(&mut fptr, &key.to_string(), cube)?;
    }
    for (key, image) in source.images() {
        write_image(&mut fptr, &key.to_string(), image)?;
    }
    for (key, spectrum) in source.spectra() {
        write_spectrum(&mut fptr, &key.to_string(), spectrum)?;
    }

    debug!(
        id = %source.id,
        path = %path.display(),
        products = source.product_names().len(),
        "Wrote source file"
    );
    Ok(())
}

fn write_primary_header(fptr: &mut FitsFile, source: &Source) -> AnyResult<()> {
    let hdu = fptr.primary_hdu().context("Failed to get primary HDU")?;
    let provenance = &source.provenance;

    hdu.write_key(fptr, "ID", source.id.as_str())?;
    hdu.write_key(fptr, "RA", source.ra)?;
    hdu.write_key(fptr, "DEC", source.dec)?;
    hdu.write_key(fptr, "FROM", provenance.from.as_str())?;
    hdu.write_key(fptr, "FROM_V", provenance.from_version.as_str())?;
    if !provenance.cube.is_empty() {
        hdu.write_key(fptr, "CUBE", provenance.cube.as_str())?;
    }
    if !provenance.cube_version.is_empty() {
        hdu.write_key(fptr, "CUBE_V", provenance.cube_version.as_str())?;
    }
    hdu.write_key(fptr, "EXT", SOFTWARE)?;
    hdu.write_key(fptr, "EXT_V", env!("CARGO_PKG_VERSION"))?;
    hdu.write_key(fptr, "TRUNC", i64::from(source.truncated))?;
    Ok(())
}

fn create_float_hdu(fptr: &mut FitsFile, name: &str, dimensions: &[usize]) -> AnyResult<FitsHdu> {
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions,
    };
    fptr.create_image(name, &description)
        .with_context(|| format!("Failed to create HDU {name}"))
}

fn write_cube(fptr: &mut FitsFile, name: &str, cube: &Cube) -> AnyResult<()> {
    let shape = cube.shape();
    let dimensions = [shape.nwave, shape.height, shape.width];

    let planes = [
        (format!("{name}_DATA"), Some(cube.flux())),
        (format!("{name}_STAT"), cube.var()),
    ];
    for (extname, values) in planes {
        let Some(values) = values else {
            continue;
        };
        let hdu = create_float_hdu(fptr, &extname, &dimensions)?;
        hdu.write_image(fptr, values)
            .with_context(|| format!("Failed to write {extname}"))?;
        write_celestial_wcs(fptr, &hdu, &cube.wcs)?;
        write_spectral_axis(fptr, &hdu, &cube.wave, 3)?;
    }
    Ok(())
}

fn write_image(fptr: &mut FitsFile, name: &str, image: &Image) -> AnyResult<()> {
    let hdu = create_float_hdu(fptr, name, &[image.height(), image.width()])?;
    hdu.write_image(fptr, image.data.pixels())
        .with_context(|| format!("Failed to write {name}"))?;
    write_celestial_wcs(fptr, &hdu, &image.wcs)
}

fn write_spectrum(fptr: &mut FitsFile, name: &str, spectrum: &Spectrum) -> AnyResult<()> {
    let planes = [
        (format!("{name}_DATA"), Some(&spectrum.flux)),
        (format!("{name}_STAT"), spectrum.var.as_ref()),
    ];
    for (extname, values) in planes {
        let Some(values) = values else {
            continue;
        };
        let hdu = create_float_hdu(fptr, &extname, &[values.len()])?;
        hdu.write_image(fptr, values)
            .with_context(|| format!("Failed to write {extname}"))?;
        write_spectral_axis(fptr, &hdu, &spectrum.wave, 1)?;
    }
    Ok(())
}

fn write_celestial_wcs(fptr: &mut FitsFile, hdu: &FitsHdu, wcs: &Wcs) -> AnyResult<()> {
    hdu.write_key(fptr, "CTYPE1", "RA---TAN")?;
    hdu.write_key(fptr, "CTYPE2", "DEC--TAN")?;
    hdu.write_key(fptr, "CUNIT1", "deg")?;
    hdu.write_key(fptr, "CUNIT2", "deg")?;
    hdu.write_key(fptr, "CRPIX1", wcs.crpix.0)?;
    hdu.write_key(fptr, "CRPIX2", wcs.crpix.1)?;
    hdu.write_key(fptr, "CRVAL1", wcs.crval.0)?;
    hdu.write_key(fptr, "CRVAL2", wcs.crval.1)?;
    hdu.write_key(fptr, "CD1_1", wcs.cd[0][0])?;
    hdu.write_key(fptr, "CD1_2", wcs.cd[0][1])?;
    hdu.write_key(fptr, "CD2_1", wcs.cd[1][0])?;
    hdu.write_key(fptr, "CD2_2", wcs.cd[1][1])?;
    Ok(())
}

/// Linear wavelength axis on FITS axis `axis` (1 for spectra, 3 for cubes).
fn write_spectral_axis(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    wave: &SpectralAxis,
    axis: u8,
) -> AnyResult<()> {
    hdu.write_key(fptr, &format!("CTYPE{axis}"), "AWAV")?;
    hdu.write_key(fptr, &format!("CUNIT{axis}"), wave.unit.as_str())?;
    hdu.write_key(fptr, &format!("CRVAL{axis}"), wave.crval)?;
    hdu.write_key(fptr, &format!("CRPIX{axis}"), wave.crpix)?;
    if axis == 3 {
        hdu.write_key(fptr, "CD3_3", wave.cdelt)?;
    } else {
        hdu.write_key(fptr, &format!("CDELT{axis}"), wave.cdelt)?;
    }
    Ok(())
}
