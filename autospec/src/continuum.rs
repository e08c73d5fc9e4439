//! Polynomial continuum removal.
//!
//! The continuum is a least-squares polynomial in the normalised sample
//! index `t = 2k / (n - 1) - 1`. The design matrix depends only on the
//! number of samples and the degree, so its pseudo-inverse is computed once
//! and applied to every spaxel.

use nalgebra::{DMatrix, DVector, SVD};
use rayon::prelude::*;
use tracing::debug;

use crate::cube::Cube;
use crate::error::{Error, Result};
use crate::source::Spectrum;

/// Singular values below this fraction of the largest are treated as zero.
const SINGULAR_VALUE_EPS: f64 = 1e-12;

/// Least-squares polynomial fitter for spectra of a fixed length.
#[derive(Debug, Clone)]
pub struct ContinuumFitter {
    degree: usize,
    design: DMatrix<f64>,
    pseudo_inverse: DMatrix<f64>,
}

impl ContinuumFitter {
    pub fn new(nsamples: usize, degree: usize) -> Result<Self> {
        if degree >= nsamples {
            return Err(Error::InsufficientSamples {
                degree,
                samples: nsamples,
            });
        }

        let scale = if nsamples > 1 {
            2.0 / (nsamples - 1) as f64
        } else {
            0.0
        };
        let design = DMatrix::from_fn(nsamples, degree + 1, |k, j| {
            let t = if nsamples > 1 { k as f64 * scale - 1.0 } else { 0.0 };
            t.powi(j as i32)
        });

        let svd = SVD::new(design.clone(), true, true);
        let max_sv = svd.singular_values.max();
        let pseudo_inverse = svd
            .pseudo_inverse(max_sv * SINGULAR_VALUE_EPS)
            .map_err(|e| Error::Numerical(e.to_string()))?;

        Ok(Self {
            degree,
            design,
            pseudo_inverse,
        })
    }

    #[inline]
    pub fn degree(&self) -> usize {
        self.degree
    }

    #[inline]
    pub fn nsamples(&self) -> usize {
        self.design.nrows()
    }

    /// Polynomial coefficients, lowest order first. Non-finite samples count
    /// as zero.
    pub fn coefficients(&self, flux: &[f32]) -> DVector<f64> {
        assert_eq!(flux.len(), self.nsamples(), "spectrum length mismatch");
        let y = DVector::from_iterator(
            flux.len(),
            flux.iter()
                .map(|&v| if v.is_finite() { v as f64 } else { 0.0 }),
        );
        &self.pseudo_inverse * y
    }

    /// `flux - fit(flux)`.
    pub fn residual(&self, flux: &[f32]) -> Vec<f32> {
        let model = &self.design * self.coefficients(flux);
        flux.iter()
            .zip(model.iter())
            .map(|(&v, &m)| {
                let v = if v.is_finite() { v as f64 } else { 0.0 };
                (v - m) as f32
            })
            .collect()
    }
}

/// Subtract a degree-`degree` continuum from a spectrum; variance is kept.
pub fn subtract_continuum(spectrum: &Spectrum, degree: usize) -> Result<Spectrum> {
    let fitter = ContinuumFitter::new(spectrum.len(), degree)?;
    Ok(Spectrum::new(
        fitter.residual(&spectrum.flux),
        spectrum.var.clone(),
        spectrum.wave.clone(),
    ))
}

/// Subtract an independent continuum from every spaxel of the cube.
///
/// Spaxels are fitted in parallel; each produces its own residual column,
/// scattered back into plane order afterwards.
pub fn subtract_continuum_cube(cube: &Cube, degree: usize) -> Result<Cube> {
    let shape = cube.shape();
    let fitter = ContinuumFitter::new(shape.nwave, degree)?;
    let npix = shape.plane_len();

    let residuals: Vec<Vec<f32>> = (0..npix)
        .into_par_iter()
        .map(|p| {
            let spaxel: Vec<f32> = (0..shape.nwave).map(|k| cube.flux()[k * npix + p]).collect();
            fitter.residual(&spaxel)
        })
        .collect();

    let mut flux = vec![0.0f32; shape.len()];
    flux.par_chunks_mut(npix).enumerate().for_each(|(k, plane)| {
        for (p, value) in plane.iter_mut().enumerate() {
            *value = residuals[p][k];
        }
    });

    debug!(degree, spaxels = npix, "Continuum subtracted from cube");
    Ok(cube.with_flux(flux))
}
