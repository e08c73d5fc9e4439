//! Cross-correlation of a reference spectrum against every spaxel.
//!
//! The correlation image `xc[p] = sum_k ref[k] * C[k, p]` measures how much
//! each spaxel looks like the reference. Normalised to unit sum it becomes
//! the spatial weight for the final spectrum.

use rayon::prelude::*;
use tracing::{debug, warn};

use common::buffer2::Buffer2;

use crate::config::CcExtraction;
use crate::cube::Cube;
use crate::error::{Error, Result};
use crate::extraction::weighted_sum;
use crate::math::statistics::sigma_clipped_background;
use crate::source::Spectrum;

const THRESHOLD_CLIP_ITERATIONS: usize = 5;
const THRESHOLD_CLIP_KAPPA: f32 = 3.0;

/// Correlation image normalised to sum to 1.
///
/// Non-finite cube samples are skipped. Fails with
/// [`Error::DegenerateCorrelation`] when the raw image sums to zero or a
/// non-finite value.
pub fn correlation_image(reference: &Spectrum, cube: &Cube) -> Result<Buffer2<f32>> {
    let shape = cube.shape();
    assert_eq!(
        reference.len(),
        shape.nwave,
        "reference spectrum must match the cube's spectral axis"
    );

    let npix = shape.plane_len();
    let raw: Vec<f64> = (0..npix)
        .into_par_iter()
        .map(|p| {
            reference
                .flux
                .iter()
                .enumerate()
                .map(|(k, &r)| {
                    let c = cube.flux()[k * npix + p];
                    if c.is_finite() && r.is_finite() {
                        r as f64 * c as f64
                    } else {
                        0.0
                    }
                })
                .sum()
        })
        .collect();

    let sum: f64 = raw.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return Err(Error::DegenerateCorrelation { sum });
    }

    let pixels = raw.into_iter().map(|v| (v / sum) as f32).collect();
    Ok(Buffer2::new(shape.width, shape.height, pixels))
}

/// Zero pixels below `median + kappa * sigma` of the image background and
/// renormalise to unit sum. Leaves the image untouched if nothing survives.
pub fn apply_threshold(xc: &Buffer2<f32>, kappa: f32) -> Buffer2<f32> {
    let background =
        sigma_clipped_background(xc.pixels(), THRESHOLD_CLIP_KAPPA, THRESHOLD_CLIP_ITERATIONS);
    let level = background.median + kappa * background.sigma;

    let kept = xc.map(|&v| if v >= level { v } else { 0.0 });
    let sum = kept.sum();
    if sum <= 0.0 || !sum.is_finite() {
        warn!(
            level,
            "Correlation threshold removed every pixel, keeping the unthresholded image"
        );
        return xc.clone();
    }

    debug!(
        level,
        kept = kept.iter().filter(|&&v| v != 0.0).count(),
        "Thresholded correlation image"
    );
    kept.map(|&v| (v as f64 / sum) as f32)
}

/// Final spectrum weighted by the correlation image over the whole cutout.
///
/// `sky` is subtracted from every spaxel before combining when given.
pub fn cc_weighted_spectrum(
    cube: &Cube,
    xc: &Buffer2<f32>,
    sky: Option<&Spectrum>,
    method: CcExtraction,
) -> Spectrum {
    match method {
        CcExtraction::WeightedMean => {
            let spectrum = weighted_sum(cube, xc);
            match sky {
                Some(sky) => spectrum.subtract_scaled(sky, xc.sum()),
                None => spectrum,
            }
        }
        CcExtraction::Optimal => optimal_spectrum(cube, xc, sky),
    }
}

/// Horne-style optimal extraction with `profile` as the spatial profile:
/// `f = sum(P D / V) / sum(P^2 / V)`, `var = sum(P) / sum(P^2 / V)`.
///
/// Without a variance cube every spaxel gets unit variance.
fn optimal_spectrum(cube: &Cube, profile: &Buffer2<f32>, sky: Option<&Spectrum>) -> Spectrum {
    let shape = cube.shape();
    let (flux, var): (Vec<f32>, Vec<f32>) = (0..shape.nwave)
        .into_par_iter()
        .map(|k| {
            let plane = cube.plane(k);
            let var_plane = cube.var_plane(k);
            let sky_level = sky.map_or(0.0, |s| s.flux[k] as f64);

            let mut num = 0.0f64;
            let mut den = 0.0f64;
            let mut profile_sum = 0.0f64;
            for (i, &p) in profile.iter().enumerate() {
                let d = plane[i];
                let v = var_plane.map_or(1.0, |vp| vp[i]);
                if p == 0.0 || !d.is_finite() || !(v.is_finite() && v > 0.0) {
                    continue;
                }
                let (p, v) = (p as f64, v as f64);
                num += p * (d as f64 - sky_level) / v;
                den += p * p / v;
                profile_sum += p;
            }
            if den > 0.0 {
                ((num / den) as f32, (profile_sum / den) as f32)
            } else {
                (0.0, 0.0)
            }
        })
        .unzip();

    Spectrum::new(flux, cube.var().is_some().then_some(var), cube.wave.clone())
}
