//! Square spatial cutouts around a sky position.

use tracing::warn;

use crate::config::EdgePolicy;
use crate::cube::{Cube, CubeShape, Image, Wcs};
use crate::error::{Error, Result};

/// Pixel window of a cutout inside the parent cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoutRegion {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    /// Pixel of the target inside the cutout.
    pub center: (usize, usize),
    /// Requested side length in pixels (always odd).
    pub size_px: usize,
    /// The window was clipped at the cube edge.
    pub truncated: bool,
}

/// Locate the `size_arcsec` square window centred on `(ra, dec)`.
///
/// The side is rounded to an odd number of pixels so the target pixel is the
/// centre. A target outside the cube always fails; a window that only
/// partially overlaps fails or is clipped depending on `policy`.
pub fn locate_cutout(
    shape: CubeShape,
    wcs: &Wcs,
    ra: f64,
    dec: f64,
    size_arcsec: f64,
    policy: EdgePolicy,
) -> Result<CutoutRegion> {
    let (px, py) = wcs.sky_to_pixel(ra, dec);
    let n_px = (size_arcsec / wcs.pixel_scale_arcsec()).round().max(1.0) as usize;
    let half = n_px / 2;
    let size_px = 2 * half + 1;

    let out_of_bounds = || Error::OutOfBounds {
        ra,
        dec,
        x: px,
        y: py,
        size_px,
        width: shape.width,
        height: shape.height,
    };

    let (cx, cy) = (px.round(), py.round());
    if !cx.is_finite()
        || !cy.is_finite()
        || cx < 0.0
        || cy < 0.0
        || cx >= shape.width as f64
        || cy >= shape.height as f64
    {
        return Err(out_of_bounds());
    }
    let (cx, cy) = (cx as usize, cy as usize);

    let fits = cx >= half
        && cy >= half
        && cx + half < shape.width
        && cy + half < shape.height;

    if fits {
        return Ok(CutoutRegion {
            x0: cx - half,
            y0: cy - half,
            width: size_px,
            height: size_px,
            center: (half, half),
            size_px,
            truncated: false,
        });
    }

    match policy {
        EdgePolicy::Fail => Err(out_of_bounds()),
        EdgePolicy::Clip => {
            let x0 = cx.saturating_sub(half);
            let y0 = cy.saturating_sub(half);
            let x1 = (cx + half).min(shape.width - 1);
            let y1 = (cy + half).min(shape.height - 1);
            warn!(ra, dec, x = px, y = py, "Cutout clipped at cube edge");
            Ok(CutoutRegion {
                x0,
                y0,
                width: x1 - x0 + 1,
                height: y1 - y0 + 1,
                center: (cx - x0, cy - y0),
                size_px,
                truncated: true,
            })
        }
    }
}

impl CutoutRegion {
    /// Target position in cutout pixels.
    pub fn center_f64(&self) -> (f64, f64) {
        (self.center.0 as f64, self.center.1 as f64)
    }
}

/// Sub-cube around a target with its white-light image.
#[derive(Debug, Clone)]
pub struct Cutout {
    pub region: CutoutRegion,
    pub cube: Cube,
    pub white: Image,
}

pub fn extract_cutout(
    cube: &Cube,
    ra: f64,
    dec: f64,
    size_arcsec: f64,
    policy: EdgePolicy,
) -> Result<Cutout> {
    let region = locate_cutout(cube.shape(), &cube.wcs, ra, dec, size_arcsec, policy)?;
    let sub = cube.crop(region.x0, region.y0, region.width, region.height);
    let white = sub.white_light();
    Ok(Cutout {
        region,
        cube: sub,
        white,
    })
}
