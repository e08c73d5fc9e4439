//! Typed product names.
//!
//! Every product attached to a [`Source`](super::Source) is addressed by a key
//! whose `Display` form is the FITS extension name it is written under, e.g.
//! `MASK_OBJECT`, `SEG_HST_F606W`, `APER_1.0_SKYSUB_CONTSUB`.

use std::fmt;

use strum_macros::{Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum CubeKind {
    #[strum(serialize = "CUBE")]
    Data,
    #[strum(serialize = "CUBE_CONTSUB")]
    ContinuumSubtracted,
}

pub type CubeKey = CubeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageKind {
    #[strum(serialize = "WHITE")]
    WhiteLight,
    #[strum(serialize = "IMG")]
    Reference,
    #[strum(serialize = "SEG")]
    Segmentation,
    MaskObject,
    MaskSky,
    MaskUnion,
    #[strum(serialize = "MASK_INTER")]
    MaskIntersection,
    #[strum(serialize = "MASK_APER")]
    MaskAperture,
    CrossCorrelation,
}

impl ImageKind {
    pub fn is_mask(self) -> bool {
        matches!(
            self,
            ImageKind::MaskObject
                | ImageKind::MaskSky
                | ImageKind::MaskUnion
                | ImageKind::MaskIntersection
                | ImageKind::MaskAperture
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub kind: ImageKind,
    pub label: Option<String>,
}

impl ImageKey {
    pub fn new(kind: ImageKind) -> Self {
        Self { kind, label: None }
    }

    pub fn labelled(kind: ImageKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: Some(label.into()),
        }
    }
}

impl From<ImageKind> for ImageKey {
    fn from(kind: ImageKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}_{}", self.kind, label.to_uppercase()),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SpectrumKind {
    #[strum(serialize = "TOT")]
    Total,
    #[strum(serialize = "APER")]
    Aperture,
    Weighted,
    Sky,
    #[strum(serialize = "CCWEIGHTED")]
    CcWeighted,
}

/// Spectrum name: kind, optional label, then processing suffixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpectrumKey {
    pub kind: SpectrumKind,
    pub label: Option<String>,
    pub sky_subtracted: bool,
    pub continuum_subtracted: bool,
}

impl SpectrumKey {
    pub fn new(kind: SpectrumKind) -> Self {
        Self {
            kind,
            label: None,
            sky_subtracted: false,
            continuum_subtracted: false,
        }
    }

    /// Aperture spectrum; the radius is rendered with one decimal.
    pub fn aperture(radius_arcsec: f64) -> Self {
        Self {
            label: Some(format!("{radius_arcsec:.1}")),
            ..Self::new(SpectrumKind::Aperture)
        }
    }

    pub fn weighted(tag: impl Into<String>) -> Self {
        Self {
            label: Some(tag.into()),
            ..Self::new(SpectrumKind::Weighted)
        }
    }

    pub fn sky_subtracted(mut self, value: bool) -> Self {
        self.sky_subtracted = value;
        self
    }

    pub fn continuum_subtracted(mut self, value: bool) -> Self {
        self.continuum_subtracted = value;
        self
    }
}

impl From<SpectrumKind> for SpectrumKey {
    fn from(kind: SpectrumKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for SpectrumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(label) = &self.label {
            write!(f, "_{}", label.to_uppercase())?;
        }
        if self.sky_subtracted {
            f.write_str("_SKYSUB")?;
        }
        if self.continuum_subtracted {
            f.write_str("_CONTSUB")?;
        }
        Ok(())
    }
}
