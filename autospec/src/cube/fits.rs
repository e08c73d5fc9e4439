//! FITS input for datacubes and images.

use std::path::Path;

use anyhow::{Context, Result, bail};
use fitsio::FitsFile;
use fitsio::hdu::{FitsHdu, HduInfo};
use serde::Deserialize;
use tracing::debug;

use common::buffer2::Buffer2;

use super::{Cube, CubeShape, Image, SpectralAxis, Wcs};

/// Reference to an HDU by 0-based position or by EXTNAME.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HduRef {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for HduRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HduRef::Index(i) => write!(f, "#{i}"),
            HduRef::Name(name) => f.write_str(name),
        }
    }
}

/// Which HDUs of the datacube file hold flux and variance.
///
/// When unset, `DATA` and `STAT` extensions are used if present, otherwise
/// the primary HDU holds the flux and no variance is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CubeExtensions {
    pub data: Option<HduRef>,
    pub variance: Option<HduRef>,
}

/// Load a datacube.
pub fn load_cube(path: &Path, extensions: &CubeExtensions) -> Result<Cube> {
    let mut fptr = FitsFile::open(path)
        .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

    let data_hdu = match &extensions.data {
        Some(hdu_ref) => open_hdu(&mut fptr, hdu_ref)?,
        None => match fptr.hdu("DATA") {
            Ok(hdu) => hdu,
            Err(_) => fptr.primary_hdu().context("Failed to access primary HDU")?,
        },
    };

    let shape = match image_shape(&data_hdu)? {
        [nwave, height, width] => CubeShape::new(*nwave, *height, *width),
        other => bail!("Datacube must be 3-D, found shape {other:?}"),
    };

    let flux: Vec<f32> = data_hdu
        .read_image(&mut fptr)
        .context("Failed to read datacube flux")?;

    let var_hdu = match &extensions.variance {
        Some(hdu_ref) => Some(open_hdu(&mut fptr, hdu_ref)?),
        None if extensions.data.is_none() => fptr.hdu("STAT").ok(),
        None => None,
    };
    let var = match var_hdu {
        Some(hdu) => {
            let var_shape = image_shape(&hdu)?;
            if var_shape != [shape.nwave, shape.height, shape.width] {
                bail!("Variance shape {var_shape:?} differs from flux shape {shape:?}");
            }
            let var: Vec<f32> = hdu
                .read_image(&mut fptr)
                .context("Failed to read datacube variance")?;
            Some(var)
        }
        None => None,
    };

    let wcs = read_wcs(&data_hdu, &mut fptr)?;
    let wave = read_spectral_axis(&data_hdu, &mut fptr);

    debug!(
        path = %path.display(),
        nwave = shape.nwave,
        width = shape.width,
        height = shape.height,
        has_variance = var.is_some(),
        "Loaded datacube"
    );

    Ok(Cube::new(shape, flux, var, wcs, wave))
}

/// Load a 2-D image from the primary HDU, or from the first extension when
/// the primary HDU carries no data.
pub fn load_image(path: &Path) -> Result<Image> {
    let mut fptr = FitsFile::open(path)
        .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

    let primary = fptr.primary_hdu().context("Failed to access primary HDU")?;
    let hdu = if image_shape(&primary).is_ok_and(|s| s.len() == 2) {
        primary
    } else {
        fptr.hdu(1usize)
            .context("Primary HDU has no image and no extension follows")?
    };

    let (height, width) = match image_shape(&hdu)? {
        [height, width] => (*height, *width),
        other => bail!("Image must be 2-D, found shape {other:?}"),
    };
    let pixels: Vec<f32> = hdu.read_image(&mut fptr).context("Failed to read image")?;
    let wcs = read_wcs(&hdu, &mut fptr)?;

    Ok(Image::new(Buffer2::new(width, height, pixels), wcs))
}

fn open_hdu(fptr: &mut FitsFile, hdu_ref: &HduRef) -> Result<FitsHdu> {
    let hdu = match hdu_ref {
        HduRef::Index(i) => fptr.hdu(*i),
        HduRef::Name(name) => fptr.hdu(name.as_str()),
    };
    hdu.with_context(|| format!("HDU {hdu_ref} not found"))
}

fn image_shape(hdu: &FitsHdu) -> Result<&[usize]> {
    match &hdu.info {
        HduInfo::ImageInfo { shape, .. } if !shape.is_empty() => Ok(shape),
        HduInfo::ImageInfo { .. } => bail!("HDU holds no image data"),
        HduInfo::TableInfo { .. } => bail!("HDU is a table, not an image"),
        HduInfo::AnyInfo => bail!("Unknown HDU type"),
    }
}

/// Celestial WCS from `CD` keywords, falling back to `CDELT` with optional
/// `PC` or `CROTA2` rotation.
fn read_wcs(hdu: &FitsHdu, fptr: &mut FitsFile) -> Result<Wcs> {
    let crpix = (
        read_key_required::<f64>(hdu, fptr, "CRPIX1")?,
        read_key_required::<f64>(hdu, fptr, "CRPIX2")?,
    );
    let crval = (
        read_key_required::<f64>(hdu, fptr, "CRVAL1")?,
        read_key_required::<f64>(hdu, fptr, "CRVAL2")?,
    );

    if let Some(cd1_1) = read_key_optional::<f64>(hdu, fptr, "CD1_1") {
        let cd = [
            [
                cd1_1,
                read_key_optional(hdu, fptr, "CD1_2").unwrap_or(0.0),
            ],
            [
                read_key_optional(hdu, fptr, "CD2_1").unwrap_or(0.0),
                read_key_optional(hdu, fptr, "CD2_2").unwrap_or(0.0),
            ],
        ];
        return Ok(Wcs::new(crpix, crval, cd));
    }

    let cdelt1 = read_key_required::<f64>(hdu, fptr, "CDELT1")?;
    let cdelt2 = read_key_required::<f64>(hdu, fptr, "CDELT2")?;
    let pc = if let Some(pc1_1) = read_key_optional::<f64>(hdu, fptr, "PC1_1") {
        [
            [pc1_1, read_key_optional(hdu, fptr, "PC1_2").unwrap_or(0.0)],
            [
                read_key_optional(hdu, fptr, "PC2_1").unwrap_or(0.0),
                read_key_optional(hdu, fptr, "PC2_2").unwrap_or(1.0),
            ],
        ]
    } else {
        let crota = read_key_optional::<f64>(hdu, fptr, "CROTA2").unwrap_or(0.0);
        let (sin_r, cos_r) = crota.to_radians().sin_cos();
        [[cos_r, -sin_r], [sin_r, cos_r]]
    };
    let cd = [
        [cdelt1 * pc[0][0], cdelt1 * pc[0][1]],
        [cdelt2 * pc[1][0], cdelt2 * pc[1][1]],
    ];
    Ok(Wcs::new(crpix, crval, cd))
}

fn read_spectral_axis(hdu: &FitsHdu, fptr: &mut FitsFile) -> SpectralAxis {
    let defaults = SpectralAxis::default();
    SpectralAxis {
        crval: read_key_optional(hdu, fptr, "CRVAL3").unwrap_or(defaults.crval),
        cdelt: read_key_optional(hdu, fptr, "CD3_3")
            .or_else(|| read_key_optional(hdu, fptr, "CDELT3"))
            .unwrap_or(defaults.cdelt),
        crpix: read_key_optional(hdu, fptr, "CRPIX3").unwrap_or(defaults.crpix),
        unit: read_key_optional::<String>(hdu, fptr, "CUNIT3")
            .map(|u| u.trim().to_string())
            .unwrap_or(defaults.unit),
    }
}

fn read_key_required<T: fitsio::headers::ReadsKey>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Result<T> {
    hdu.read_key(fptr, key)
        .with_context(|| format!("Missing header keyword {key}"))
}

fn read_key_optional<T: fitsio::headers::ReadsKey>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Option<T> {
    hdu.read_key(fptr, key).ok()
}
