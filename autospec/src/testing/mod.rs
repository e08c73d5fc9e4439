//! Synthetic cubes and images for tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cube::{Cube, CubeShape, SpectralAxis, Wcs};

pub use common::log_setup::init_test_tracing as init_tracing;

pub const PIXEL_SCALE: f64 = 0.2;
pub const CENTER_RA: f64 = 150.0;
pub const CENTER_DEC: f64 = 2.0;

/// Sky WCS whose 0-based pixel `(width / 2, height / 2)` sits at
/// `(CENTER_RA, CENTER_DEC)`.
pub fn sky_wcs(width: usize, height: usize) -> Wcs {
    Wcs::from_scale_rotation(
        ((width / 2) as f64 + 1.0, (height / 2) as f64 + 1.0),
        (CENTER_RA, CENTER_DEC),
        PIXEL_SCALE,
        0.0,
    )
}

pub fn wave_axis() -> SpectralAxis {
    SpectralAxis::new(4750.0, 1.25)
}

/// Unit-peak circular Gaussian.
pub fn gaussian_blob(dx: f64, dy: f64, sigma: f64) -> f32 {
    (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp() as f32
}

/// Cube with flux `f(x, y, k)` and optional constant variance.
pub fn cube_from_fn(
    width: usize,
    height: usize,
    nwave: usize,
    var: Option<f32>,
    f: impl Fn(usize, usize, usize) -> f32,
) -> Cube {
    let shape = CubeShape::new(nwave, height, width);
    let mut flux = Vec::with_capacity(shape.len());
    for k in 0..nwave {
        for y in 0..height {
            for x in 0..width {
                flux.push(f(x, y, k));
            }
        }
    }
    Cube::new(
        shape,
        flux,
        var.map(|v| vec![v; shape.len()]),
        sky_wcs(width, height),
        wave_axis(),
    )
}

/// Object spectrum: sloped continuum with one emission line.
pub fn object_spectrum(k: usize, nwave: usize) -> f32 {
    let t = k as f32 / nwave.max(1) as f32;
    let line = 8.0 * (-((k as f32 - nwave as f32 * 0.6).powi(2)) / 4.0).exp();
    2.0 + t + line
}

/// Gaussian object of width `sigma_px` at the cube centre on a flat sky of
/// `sky` per pixel, with seeded uniform noise of amplitude `noise`.
pub fn object_cube(
    width: usize,
    height: usize,
    nwave: usize,
    sigma_px: f64,
    sky: f32,
    noise: f32,
    seed: u64,
) -> Cube {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise_values: Vec<f32> = (0..width * height * nwave)
        .map(|_| {
            if noise > 0.0 {
                rng.random_range(-noise..noise)
            } else {
                0.0
            }
        })
        .collect();
    let (cx, cy) = ((width / 2) as f64, (height / 2) as f64);
    cube_from_fn(width, height, nwave, Some(0.01), |x, y, k| {
        let profile = gaussian_blob(x as f64 - cx, y as f64 - cy, sigma_px);
        sky + profile * object_spectrum(k, nwave)
            + noise_values[(k * height + y) * width + x]
    })
}
