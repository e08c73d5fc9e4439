//! Per-object product container.

pub mod keys;

use serde::Deserialize;

use common::key_index_vec::KeyIndexVec;

use crate::cube::{Cube, Image, SpectralAxis};
use crate::error::{Error, Result};

pub use keys::{CubeKey, CubeKind, ImageKey, ImageKind, SpectrumKey, SpectrumKind};

/// 1-D spectrum with optional variance.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub flux: Vec<f32>,
    pub var: Option<Vec<f32>>,
    pub wave: SpectralAxis,
}

impl Spectrum {
    pub fn new(flux: Vec<f32>, var: Option<Vec<f32>>, wave: SpectralAxis) -> Self {
        if let Some(var) = &var {
            assert_eq!(var.len(), flux.len(), "variance length must match flux");
        }
        Self { flux, var, wave }
    }

    pub fn zeros(len: usize, with_var: bool, wave: SpectralAxis) -> Self {
        Self::new(vec![0.0; len], with_var.then(|| vec![0.0; len]), wave)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.flux.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }

    /// `self - scale * other`, propagating variance when both carry it.
    pub fn subtract_scaled(&self, other: &Spectrum, scale: f64) -> Spectrum {
        assert_eq!(self.len(), other.len(), "spectrum lengths differ");
        let flux = self
            .flux
            .iter()
            .zip(&other.flux)
            .map(|(&a, &b)| (a as f64 - scale * b as f64) as f32)
            .collect();
        let var = match (&self.var, &other.var) {
            (Some(va), Some(vb)) => Some(
                va.iter()
                    .zip(vb)
                    .map(|(&a, &b)| (a as f64 + scale * scale * b as f64) as f32)
                    .collect(),
            ),
            (Some(va), None) => Some(va.clone()),
            _ => None,
        };
        Spectrum::new(flux, var, self.wave.clone())
    }
}

/// Origin metadata written into every output file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Provenance {
    /// Detection software or catalogue origin.
    pub from: String,
    pub from_version: String,
    /// Datacube name.
    pub cube: String,
    pub cube_version: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            from: "AutoSpec".to_string(),
            from_version: env!("CARGO_PKG_VERSION").to_string(),
            cube: String::new(),
            cube_version: String::new(),
        }
    }
}

/// A catalogue object with every product extracted for it.
///
/// Products live in insertion-ordered maps keyed by their typed names, so a
/// name can never be attached twice.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub ra: f64,
    pub dec: f64,
    pub provenance: Provenance,
    /// Set when the cutout was clipped at the cube edge.
    pub truncated: bool,
    cubes: KeyIndexVec<CubeKey, Cube>,
    images: KeyIndexVec<ImageKey, Image>,
    spectra: KeyIndexVec<SpectrumKey, Spectrum>,
}

impl Source {
    pub fn new(id: impl Into<String>, ra: f64, dec: f64, provenance: Provenance) -> Self {
        Self {
            id: id.into(),
            ra,
            dec,
            provenance,
            truncated: false,
            cubes: KeyIndexVec::default(),
            images: KeyIndexVec::default(),
            spectra: KeyIndexVec::default(),
        }
    }

    // ========================================================================
    // Cubes
    // ========================================================================

    pub fn add_cube(&mut self, key: CubeKey, cube: Cube) -> Result<()> {
        self.cubes
            .push(key, cube)
            .map_err(|_| Error::DuplicateProduct {
                name: key.to_string(),
            })
    }

    pub fn cube(&self, key: CubeKey) -> Result<&Cube> {
        self.cubes.by_key(&key).ok_or_else(|| Error::ProductNotFound {
            name: key.to_string(),
        })
    }

    pub fn cubes(&self) -> impl ExactSizeIterator<Item = (&CubeKey, &Cube)> {
        self.cubes.iter()
    }

    pub fn clear_cubes(&mut self) {
        self.cubes.clear();
    }

    // ========================================================================
    // Images
    // ========================================================================

    pub fn add_image(&mut self, key: impl Into<ImageKey>, image: Image) -> Result<()> {
        let key = key.into();
        let name = key.to_string();
        self.images
            .push(key, image)
            .map_err(|_| Error::DuplicateProduct { name })
    }

    pub fn image(&self, key: &ImageKey) -> Result<&Image> {
        self.images.by_key(key).ok_or_else(|| Error::ProductNotFound {
            name: key.to_string(),
        })
    }

    pub fn images(&self) -> impl ExactSizeIterator<Item = (&ImageKey, &Image)> {
        self.images.iter()
    }

    pub fn retain_images(&mut self, mut keep: impl FnMut(&ImageKey) -> bool) {
        self.images.retain(|k, _| keep(k));
    }

    // ========================================================================
    // Spectra
    // ========================================================================

    pub fn add_spectrum(&mut self, key: SpectrumKey, spectrum: Spectrum) -> Result<()> {
        let name = key.to_string();
        self.spectra
            .push(key, spectrum)
            .map_err(|_| Error::DuplicateProduct { name })
    }

    pub fn spectrum(&self, key: &SpectrumKey) -> Result<&Spectrum> {
        self.spectra.by_key(key).ok_or_else(|| Error::ProductNotFound {
            name: key.to_string(),
        })
    }

    pub fn has_spectrum(&self, key: &SpectrumKey) -> bool {
        self.spectra.contains_key(key)
    }

    pub fn spectra(&self) -> impl ExactSizeIterator<Item = (&SpectrumKey, &Spectrum)> {
        self.spectra.iter()
    }

    pub fn retain_spectra(&mut self, mut keep: impl FnMut(&SpectrumKey) -> bool) {
        self.spectra.retain(|k, _| keep(k));
    }

    /// Names of every attached product in output order.
    pub fn product_names(&self) -> Vec<String> {
        self.cubes
            .keys()
            .map(ToString::to_string)
            .chain(self.images.keys().map(ToString::to_string))
            .chain(self.spectra.keys().map(ToString::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    fn spectrum(values: &[f32]) -> Spectrum {
        Spectrum::new(
            values.to_vec(),
            Some(vec![1.0; values.len()]),
            SpectralAxis::default(),
        )
    }

    #[test]
    fn test_duplicate_spectrum_is_rejected() {
        let mut source = Source::new("42", 150.0, 2.0, Provenance::default());
        let key = SpectrumKey::new(SpectrumKind::Total);
        source.add_spectrum(key.clone(), spectrum(&[1.0])).unwrap();

        let err = source.add_spectrum(key, spectrum(&[2.0])).unwrap_err();
        assert!(matches!(err, Error::DuplicateProduct { ref name } if name == "TOT"));
    }

    #[test]
    fn test_missing_product_reports_name() {
        let source = Source::new("42", 150.0, 2.0, Provenance::default());
        let err = source
            .spectrum(&SpectrumKey::aperture(0.8).sky_subtracted(true))
            .unwrap_err();
        assert_eq!(err.to_string(), "Product not found: APER_0.8_SKYSUB");
        assert!(source.cube(CubeKind::Data).is_err());
    }

    #[test]
    fn test_retain_keeps_order() {
        let mut source = Source::new("7", 0.0, 0.0, Provenance::default());
        for key in [
            SpectrumKey::new(SpectrumKind::Total),
            SpectrumKey::new(SpectrumKind::Sky),
            SpectrumKey::aperture(1.0),
        ] {
            source.add_spectrum(key, spectrum(&[0.0])).unwrap();
        }
        source.retain_spectra(|k| k.kind != SpectrumKind::Sky);
        assert_eq!(source.product_names(), vec!["TOT", "APER_1.0"]);
    }

    #[test]
    fn test_unlabelled_names_are_unique() {
        let names: HashSet<String> = ImageKind::iter()
            .map(|k| ImageKey::new(k).to_string())
            .chain(SpectrumKind::iter().map(|k| SpectrumKey::new(k).to_string()))
            .chain(CubeKind::iter().map(|k| k.to_string()))
            .collect();
        assert_eq!(
            names.len(),
            ImageKind::iter().count() + SpectrumKind::iter().count() + CubeKind::iter().count()
        );
    }

    #[test]
    fn test_subtract_scaled_propagates_variance() {
        let a = spectrum(&[10.0, 20.0]);
        let b = Spectrum::new(vec![1.0, 2.0], Some(vec![0.5, 0.5]), SpectralAxis::default());
        let out = a.subtract_scaled(&b, 4.0);
        assert_eq!(out.flux, vec![6.0, 12.0]);
        assert_eq!(out.var, Some(vec![9.0, 9.0]));
    }
}
