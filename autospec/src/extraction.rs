//! Spectrum extraction from a cutout cube.
//!
//! Every spectrum is a per-wavelength weighted sum over spaxels:
//! `S[k] = sum_i w_i * F[k, i]` with variance `sum_i w_i^2 * V[k, i]`.
//! Spaxels with non-finite flux contribute nothing to a plane.

use rayon::prelude::*;
use tracing::{debug, warn};

use common::buffer2::Buffer2;

use crate::cube::Cube;
use crate::error::{Error, Result};
use crate::mask::Mask;
use crate::source::{Spectrum, SpectrumKey, SpectrumKind};

/// Per-wavelength weighted sum of the cube.
pub fn weighted_sum(cube: &Cube, weights: &Buffer2<f32>) -> Spectrum {
    let shape = cube.shape();
    assert_eq!(
        weights.dims(),
        (shape.width, shape.height),
        "weight map must match the cube grid"
    );

    let active: Vec<(usize, f64)> = weights
        .iter()
        .enumerate()
        .filter(|&(_, &w)| w != 0.0 && w.is_finite())
        .map(|(i, &w)| (i, w as f64))
        .collect();

    let (flux, var): (Vec<f32>, Vec<f32>) = (0..shape.nwave)
        .into_par_iter()
        .map(|k| {
            let plane = cube.plane(k);
            let var_plane = cube.var_plane(k);
            let mut s = 0.0f64;
            let mut v = 0.0f64;
            for &(i, w) in &active {
                let f = plane[i];
                if !f.is_finite() {
                    continue;
                }
                s += w * f as f64;
                if let Some(vp) = var_plane
                    && vp[i].is_finite()
                {
                    v += w * w * vp[i] as f64;
                }
            }
            (s as f32, v as f32)
        })
        .unzip();

    Spectrum::new(flux, cube.var().is_some().then_some(var), cube.wave.clone())
}

/// Unweighted sum over the masked spaxels.
pub fn summed_spectrum(cube: &Cube, mask: &Mask) -> Spectrum {
    let weights = Buffer2::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get(x, y) { 1.0 } else { 0.0 }
    });
    weighted_sum(cube, &weights)
}

/// Restrict `weight` to `mask` and scale it to sum to 1 there.
///
/// Falls back to uniform weights over the mask when the masked weights do
/// not have a positive finite sum.
pub fn normalized_weights(weight: &Buffer2<f32>, mask: &Mask) -> Buffer2<f32> {
    assert!(
        weight.width() == mask.width() && weight.height() == mask.height(),
        "weight map must match the mask grid"
    );
    let masked = Buffer2::from_fn(weight.width(), weight.height(), |x, y| {
        let w = weight[(x, y)];
        if mask.get(x, y) && w.is_finite() { w } else { 0.0 }
    });
    let total = masked.sum();
    if total > 0.0 && total.is_finite() {
        return masked.map(|&w| (w as f64 / total) as f32);
    }

    let count = mask.count();
    warn!(
        sum = total,
        pixels = count,
        "Weight map has no positive sum inside the mask, using uniform weights"
    );
    let uniform = if count == 0 { 0.0 } else { 1.0 / count as f32 };
    Buffer2::from_fn(weight.width(), weight.height(), |x, y| {
        if mask.get(x, y) { uniform } else { 0.0 }
    })
}

/// Mean sky spectrum per spaxel over the sky mask.
///
/// Each plane averages its finite sky spaxels; variance is `sum V / N^2`.
/// An empty sky mask yields a zero spectrum.
pub fn sky_spectrum(cube: &Cube, sky: &Mask) -> Spectrum {
    let shape = cube.shape();
    if sky.is_blank() {
        warn!("Sky mask is empty, sky spectrum set to zero");
        return Spectrum::zeros(shape.nwave, cube.var().is_some(), cube.wave.clone());
    }

    let pixels: Vec<usize> = sky.indices().collect();
    let (flux, var): (Vec<f32>, Vec<f32>) = (0..shape.nwave)
        .into_par_iter()
        .map(|k| {
            let plane = cube.plane(k);
            let var_plane = cube.var_plane(k);
            let mut sum = 0.0f64;
            let mut var_sum = 0.0f64;
            let mut n = 0usize;
            for &i in &pixels {
                let f = plane[i];
                if !f.is_finite() {
                    continue;
                }
                sum += f as f64;
                if let Some(vp) = var_plane {
                    var_sum += vp[i] as f64;
                }
                n += 1;
            }
            if n == 0 {
                (0.0, 0.0)
            } else {
                ((sum / n as f64) as f32, (var_sum / (n * n) as f64) as f32)
            }
        })
        .unzip();

    Spectrum::new(flux, cube.var().is_some().then_some(var), cube.wave.clone())
}

/// Inputs of one extraction pass over a cutout.
#[derive(Debug)]
pub struct ExtractionInputs<'a> {
    pub object: &'a Mask,
    pub sky: &'a Mask,
    /// Weight image tag and values on the cutout grid.
    pub weight: (&'a str, &'a Buffer2<f32>),
    /// Aperture radii in arcsec.
    pub apertures: &'a [f64],
    /// Target position in cutout pixels.
    pub center: (f64, f64),
    pub pixel_scale_arcsec: f64,
    pub sky_subtraction: bool,
}

/// Total, weighted, aperture and sky spectra, plus sky-subtracted variants
/// when requested. Sky subtraction removes `sum(w) * sky` from each spectrum.
pub fn extract_spectra(
    cube: &Cube,
    inputs: &ExtractionInputs<'_>,
) -> Result<Vec<(SpectrumKey, Spectrum)>> {
    if inputs.object.is_blank() {
        return Err(Error::EmptyMask { what: "object" });
    }
    debug_assert!(!inputs.object.overlaps(inputs.sky));

    let sky = sky_spectrum(cube, inputs.sky);
    let mut products: Vec<(SpectrumKey, Spectrum, f64)> = Vec::new();

    let total = summed_spectrum(cube, inputs.object);
    products.push((
        SpectrumKey::new(SpectrumKind::Total),
        total,
        inputs.object.count() as f64,
    ));

    let (tag, weight) = inputs.weight;
    let weights = normalized_weights(weight, inputs.object);
    let weight_sum = weights.sum();
    products.push((
        SpectrumKey::weighted(tag),
        weighted_sum(cube, &weights),
        weight_sum,
    ));

    let shape = cube.shape();
    for &radius in inputs.apertures {
        let radius_px = radius / inputs.pixel_scale_arcsec;
        let aperture = Mask::circle(shape.width, shape.height, inputs.center, radius_px);
        if aperture.is_blank() {
            warn!(radius, "Aperture contains no spaxels, skipped");
            continue;
        }
        let key = SpectrumKey::aperture(radius);
        if products.iter().any(|(k, _, _)| *k == key) {
            continue;
        }
        let count = aperture.count() as f64;
        products.push((key, summed_spectrum(cube, &aperture), count));
    }

    let mut out = Vec::with_capacity(products.len() * 2 + 1);
    for (key, spectrum, scale) in products {
        if inputs.sky_subtraction {
            let subtracted = spectrum.subtract_scaled(&sky, scale);
            out.push((key.clone(), spectrum));
            out.push((key.sky_subtracted(true), subtracted));
        } else {
            out.push((key, spectrum));
        }
    }
    out.push((SpectrumKey::new(SpectrumKind::Sky), sky));

    debug!(
        spectra = out.len(),
        object_px = inputs.object.count(),
        sky_px = inputs.sky.count(),
        "Extracted spectra"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use common::float_ext::FloatExt;

    use super::*;
    use crate::testing::{PIXEL_SCALE, cube_from_fn, object_cube};

    fn find<'a>(products: &'a [(SpectrumKey, Spectrum)], name: &str) -> &'a Spectrum {
        &products
            .iter()
            .find(|(k, _)| k.to_string() == name)
            .unwrap_or_else(|| panic!("missing {name}"))
            .1
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        let weight = Buffer2::from_fn(6, 6, |x, y| (x + y) as f32);
        let mask = Mask::from_fn(6, 6, |x, y| x >= 2 && y >= 2);
        let w = normalized_weights(&weight, &mask);

        assert!((w.sum() - 1.0).abs() < 1e-6);
        assert_eq!(w[(0, 0)], 0.0);
        assert!(w[(5, 5)] > w[(2, 2)]);
    }

    #[test]
    fn test_non_positive_weights_fall_back_to_uniform() {
        let weight = Buffer2::from_fn(4, 4, |x, _| -(x as f32));
        let mask = Mask::from_fn(4, 4, |x, _| x < 2);
        let w = normalized_weights(&weight, &mask);
        assert_eq!(w[(0, 0)], 0.125);
        assert_eq!(w[(1, 3)], 0.125);
        assert_eq!(w[(3, 3)], 0.0);
    }

    #[test]
    fn test_sky_spectrum_mean_and_variance() {
        let cube = cube_from_fn(4, 4, 3, Some(2.0), |x, _, k| (x + k) as f32);
        let sky = Mask::from_fn(4, 4, |x, _| x >= 2);
        let spectrum = sky_spectrum(&cube, &sky);

        assert_eq!(spectrum.flux, vec![2.5, 3.5, 4.5]);
        // 8 spaxels of variance 2: 16 / 64
        assert_eq!(spectrum.var, Some(vec![0.25; 3]));
    }

    #[test]
    fn test_empty_sky_gives_zero_spectrum() {
        let cube = cube_from_fn(3, 3, 5, None, |_, _, _| 1.0);
        let spectrum = sky_spectrum(&cube, &Mask::empty(3, 3));
        assert_eq!(spectrum.flux, vec![0.0; 5]);
        assert_eq!(spectrum.var, None);
    }

    #[test]
    fn test_nan_spaxels_are_skipped() {
        let cube = cube_from_fn(2, 1, 2, None, |x, _, _| if x == 0 { f32::NAN } else { 3.0 });
        let spectrum = summed_spectrum(&cube, &Mask::full(2, 1));
        assert_eq!(spectrum.flux, vec![3.0, 3.0]);
    }

    #[test]
    fn test_flat_sky_is_removed_exactly() {
        // Pure sky cube: every sky-subtracted spectrum must vanish
        let cube = cube_from_fn(15, 15, 6, Some(1.0), |_, _, k| 10.0 + k as f32);
        let object = Mask::circle(15, 15, (7.0, 7.0), 3.0);
        let sky = object.complement();
        let weight = Buffer2::from_fn(15, 15, |x, y| 1.0 + (x * y) as f32);
        let inputs = ExtractionInputs {
            object: &object,
            sky: &sky,
            weight: ("white", &weight),
            apertures: &[0.4, 1.0],
            center: (7.0, 7.0),
            pixel_scale_arcsec: PIXEL_SCALE,
            sky_subtraction: true,
        };
        let products = extract_spectra(&cube, &inputs).unwrap();

        for name in [
            "TOT_SKYSUB",
            "WEIGHTED_WHITE_SKYSUB",
            "APER_0.4_SKYSUB",
            "APER_1.0_SKYSUB",
        ] {
            let s = find(&products, name);
            assert!(
                s.flux.iter().all(|v| v.abs() < 1e-3),
                "{name} not sky-free: {:?}",
                s.flux
            );
        }
        assert_eq!(find(&products, "SKY").flux[2], 12.0);
        // Weighted spectrum of a flat cube equals the per-spaxel level
        assert!(find(&products, "WEIGHTED_WHITE").flux[0].approximately_eq_tol(10.0, 1e-4));
    }

    #[test]
    fn test_products_without_sky_subtraction() {
        let cube = object_cube(21, 21, 10, 1.5, 0.0, 0.0, 1);
        let object = Mask::circle(21, 21, (10.0, 10.0), 4.0);
        let sky = object.complement();
        let weight = cube.white_light().data;
        let inputs = ExtractionInputs {
            object: &object,
            sky: &sky,
            weight: ("white", &weight),
            apertures: &[0.6],
            center: (10.0, 10.0),
            pixel_scale_arcsec: PIXEL_SCALE,
            sky_subtraction: false,
        };
        let products = extract_spectra(&cube, &inputs).unwrap();
        let names: Vec<String> = products.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(names, vec!["TOT", "WEIGHTED_WHITE", "APER_0.6", "SKY"]);

        // The aperture is inside the object mask, so it holds less flux
        let tot = find(&products, "TOT");
        let aper = find(&products, "APER_0.6");
        assert!(aper.flux[0] < tot.flux[0]);
        assert!(tot.var.is_some());
    }

    #[test]
    fn test_blank_object_mask_is_an_error() {
        let cube = cube_from_fn(3, 3, 2, None, |_, _, _| 1.0);
        let blank = Mask::empty(3, 3);
        let full = Mask::full(3, 3);
        let weight = Buffer2::new_filled(3, 3, 1.0);
        let inputs = ExtractionInputs {
            object: &blank,
            sky: &full,
            weight: ("white", &weight),
            apertures: &[],
            center: (1.0, 1.0),
            pixel_scale_arcsec: PIXEL_SCALE,
            sky_subtraction: true,
        };
        assert!(matches!(
            extract_spectra(&cube, &inputs),
            Err(Error::EmptyMask { what: "object" })
        ));
    }

    #[test]
    fn test_single_spaxel_mask_returns_that_spaxel() {
        let cube = cube_from_fn(10, 10, 5, None, |x, y, k| {
            if (x, y) == (3, 3) { 100.0 + k as f32 } else { 1.0 }
        });
        let mask = Mask::from_fn(10, 10, |x, y| (x, y) == (3, 3));
        let spectrum = summed_spectrum(&cube, &mask);
        assert_eq!(spectrum.flux, cube.spaxel(3, 3));
        assert_eq!(spectrum.flux[4], 104.0);
    }
}
