//! Run configuration.
//!
//! A single flat YAML document drives a run. Every field has a default so a
//! minimal file only names the datacube and the catalogue. Sections below
//! follow the order of the processing stages.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use strum_macros::Display;

use crate::cube::fits::CubeExtensions;
use crate::error::{Error, Result};
use crate::source::Provenance;

// ============================================================================
// Enums
// ============================================================================

/// Where the extraction mode and reference of each row come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunMode {
    /// Every row uses [`Config::reference`].
    #[default]
    Parameters,
    /// Rows may carry their own mode and reference columns; rows without them
    /// fall back to [`Config::reference`].
    Catalog,
}

/// What to do when the requested cutout does not fit inside the cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EdgePolicy {
    /// Fail the row with an out-of-bounds error.
    #[default]
    Fail,
    /// Clip the cutout to the cube and flag the source as truncated.
    Clip,
}

/// Which combination of segmentation maps defines the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObjectMaskPolicy {
    /// Pixels flagged in any map.
    #[default]
    Union,
    /// Pixels flagged in every map.
    Intersection,
}

/// Sky definition in aperture mode.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkyRegion {
    /// Everything outside the aperture.
    #[default]
    Complement,
    /// Ring between `inner` and `outer` radii, both in arcsec.
    Annulus { inner: f64, outer: f64 },
}

/// How the cross-correlation image turns the cube into a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CcExtraction {
    /// Normalised-weight sum over the whole cutout.
    #[default]
    WeightedMean,
    /// Variance-weighted optimal extraction with the correlation image as
    /// spatial profile.
    Optimal,
}

// ============================================================================
// Sections
// ============================================================================

/// An input image with the name its products are labelled with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamedPath {
    pub name: String,
    pub path: PathBuf,
}

/// Parameters of the built-in threshold segmenter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentationConfig {
    /// Detection threshold above the sigma-clipped background, in sigma.
    pub kappa: f32,
    /// Clipping rounds for the background estimate.
    pub clip_iterations: usize,
    /// Components smaller than this many pixels are discarded.
    pub min_area: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            kappa: 1.5,
            clip_iterations: 5,
            min_area: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaskConfig {
    /// Segment the white-light image too.
    pub use_white: bool,
    /// Segment every configured input image.
    pub use_images: bool,
    /// Precomputed segmentation maps, used in addition to generated ones.
    pub segmentation_maps: Vec<NamedPath>,
    pub object: ObjectMaskPolicy,
    pub segmentation: SegmentationConfig,
    pub sky: SkyRegion,
    /// Aperture radius in arcsec used when every segmentation map is empty.
    pub fallback_aperture: f64,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            use_white: true,
            use_images: true,
            segmentation_maps: Vec::new(),
            object: ObjectMaskPolicy::default(),
            segmentation: SegmentationConfig::default(),
            sky: SkyRegion::default(),
            fallback_aperture: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContinuumConfig {
    pub enabled: bool,
    /// Polynomial degree of the continuum model.
    pub degree: usize,
}

impl Default for ContinuumConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            degree: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrossCorrelationConfig {
    pub enabled: bool,
    /// Zero correlation pixels below `median + kappa * sigma` before
    /// renormalising. Disabled when unset.
    pub threshold_kappa: Option<f32>,
    pub extraction: CcExtraction,
}

impl Default for CrossCorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_kappa: None,
            extraction: CcExtraction::default(),
        }
    }
}

/// Which intermediate products survive into the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Retention {
    pub subcubes: bool,
    pub images: bool,
    pub segmentation: bool,
    pub masks: bool,
    pub cross_correlation: bool,
    pub spectra: bool,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            subcubes: false,
            images: true,
            segmentation: true,
            masks: true,
            cross_correlation: true,
            spectra: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Prepended to the source ID to form the file name.
    pub prefix: String,
    /// Write `run_report.json` next to the outputs.
    pub report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("autospec_output"),
            prefix: "autospec_".to_string(),
            report: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // -- Inputs --
    pub datacube: PathBuf,
    pub cube_extensions: CubeExtensions,
    pub catalog: PathBuf,
    /// Additional images, resampled onto each cutout.
    pub images: Vec<NamedPath>,

    // -- Extraction --
    pub mode: RunMode,
    /// Default reference: a number is an aperture radius in arcsec, anything
    /// else selects image mode with that name as weight image.
    pub reference: String,
    /// Aperture radii in arcsec; one spectrum per radius.
    pub apertures: Vec<f64>,
    /// Weight image name for image mode; the white-light image when unset or
    /// unknown.
    pub weight_image: Option<String>,
    /// Cutout side length in arcsec.
    pub cutout_size: f64,
    pub edge_policy: EdgePolicy,
    pub sky_subtraction: bool,

    // -- Stages --
    pub mask: MaskConfig,
    pub continuum: ContinuumConfig,
    pub cross_correlation: CrossCorrelationConfig,

    // -- Output --
    pub retention: Retention,
    pub output: OutputConfig,
    pub provenance: Provenance,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            datacube: PathBuf::new(),
            cube_extensions: CubeExtensions::default(),
            catalog: PathBuf::new(),
            images: Vec::new(),
            mode: RunMode::default(),
            reference: "white".to_string(),
            apertures: vec![0.4, 0.8, 1.2],
            weight_image: None,
            cutout_size: 5.0,
            edge_policy: EdgePolicy::default(),
            sky_subtraction: true,
            mask: MaskConfig::default(),
            continuum: ContinuumConfig::default(),
            cross_correlation: CrossCorrelationConfig::default(),
            retention: Retention::default(),
            output: OutputConfig::default(),
            provenance: Provenance::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Read and validate a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read config {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yml::from_str(text).map_err(|e| Error::Configuration(format!("Invalid config: {e}")))
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Configuration(msg));

        if self.datacube.as_os_str().is_empty() {
            return fail("datacube path is required".into());
        }
        if self.catalog.as_os_str().is_empty() {
            return fail("catalog path is required".into());
        }
        if !(self.cutout_size.is_finite() && self.cutout_size > 0.0) {
            return fail(format!(
                "cutout_size must be positive, got {}",
                self.cutout_size
            ));
        }
        if let Some(&r) = self.apertures.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
            return fail(format!("aperture radii must be positive, got {r}"));
        }
        if !(self.mask.fallback_aperture.is_finite() && self.mask.fallback_aperture > 0.0) {
            return fail(format!(
                "mask.fallback_aperture must be positive, got {}",
                self.mask.fallback_aperture
            ));
        }
        if let SkyRegion::Annulus { inner, outer } = self.mask.sky
            && !(inner >= 0.0 && outer > inner)
        {
            return fail(format!(
                "sky annulus needs 0 <= inner < outer, got {inner}..{outer}"
            ));
        }
        if self.mask.segmentation.kappa <= 0.0 {
            return fail(format!(
                "mask.segmentation.kappa must be positive, got {}",
                self.mask.segmentation.kappa
            ));
        }
        if let Some(kappa) = self.cross_correlation.threshold_kappa
            && !kappa.is_finite()
        {
            return fail("cross_correlation.threshold_kappa must be finite".into());
        }
        if self.continuum.enabled && !self.cross_correlation.enabled {
            return fail(
                "continuum subtraction only feeds cross-correlation; enable cross_correlation or disable continuum"
                    .into(),
            );
        }

        let mut names: Vec<String> = self
            .images
            .iter()
            .chain(&self.mask.segmentation_maps)
            .map(|n| n.name.to_uppercase())
            .collect();
        if names.iter().any(|n| n.is_empty() || n.contains(char::is_whitespace)) {
            return fail("image names must be non-empty and contain no whitespace".into());
        }
        if names.iter().any(|n| n == "WHITE") {
            return fail("image name WHITE is reserved for the white-light image".into());
        }
        names.sort();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return fail("image and segmentation map names must be unique".into());
        }
        Ok(())
    }

    /// Image names compare case-insensitively.
    pub fn has_image(&self, name: &str) -> bool {
        self.images.iter().any(|i| i.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        Config {
            datacube: "cube.fits".into(),
            catalog: "objects.cat".into(),
            ..Config::default()
        }
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = Config::from_yaml("datacube: cube.fits\ncatalog: objects.cat\n").unwrap();
        assert_eq!(config, minimal());
        config.validate().unwrap();
        assert_eq!(config.edge_policy, EdgePolicy::Fail);
        assert_eq!(config.continuum.degree, 5);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
datacube: data/cube.fits
cube_extensions:
  data: 1
  variance: STAT
catalog: data/objects.cat
images:
  - name: hst_f606w
    path: data/f606w.fits
mode: catalog
reference: "1.0"
apertures: [0.5, 1.0]
weight_image: hst_f606w
cutout_size: 6.0
edge_policy: clip
sky_subtraction: false
mask:
  use_white: false
  object: intersection
  sky:
    annulus: { inner: 2.0, outer: 3.0 }
  segmentation:
    kappa: 2.0
continuum:
  degree: 3
cross_correlation:
  threshold_kappa: 1.0
  extraction: optimal
retention:
  subcubes: true
  masks: false
output:
  dir: out
  prefix: "src_"
provenance:
  from: MUSE-Wide
  cube: candels-cdfs-15
"#;
        let config = Config::from_yaml(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.cube_extensions.data,
            Some(crate::cube::fits::HduRef::Index(1))
        );
        assert_eq!(config.mode, RunMode::Catalog);
        assert_eq!(config.edge_policy, EdgePolicy::Clip);
        assert_eq!(config.mask.object, ObjectMaskPolicy::Intersection);
        assert_eq!(
            config.mask.sky,
            SkyRegion::Annulus {
                inner: 2.0,
                outer: 3.0
            }
        );
        assert_eq!(config.cross_correlation.extraction, CcExtraction::Optimal);
        assert!(config.retention.subcubes && !config.retention.masks);
        assert!(config.has_image("HST_F606W"));
        assert_eq!(config.provenance.from_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = Config::from_yaml(include_str!("../../demos/autospec.yaml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.images.len(), 2);
        assert_eq!(config.weight_image.as_deref(), Some("g"));
        assert_eq!(config.cross_correlation.threshold_kappa, Some(1.0));
    }

    #[test]
    fn test_unknown_field_is_configuration_error() {
        let err = Config::from_yaml("datacube: a\ncatalogue: b\n").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_continuum_without_cross_correlation_is_rejected() {
        let mut config = minimal();
        config.cross_correlation.enabled = false;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        config.continuum.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c: &mut Config| c.cutout_size = 0.0),
            Box::new(|c: &mut Config| c.apertures = vec![1.0, -0.5]),
            Box::new(|c: &mut Config| c.mask.fallback_aperture = f64::NAN),
            Box::new(|c: &mut Config| {
                c.mask.sky = SkyRegion::Annulus {
                    inner: 3.0,
                    outer: 2.0,
                }
            }),
            Box::new(|c: &mut Config| c.datacube = PathBuf::new()),
            Box::new(|c: &mut Config| {
                c.images = vec![
                    NamedPath {
                        name: "g".into(),
                        path: "g.fits".into(),
                    },
                    NamedPath {
                        name: "G".into(),
                        path: "g2.fits".into(),
                    },
                ]
            }),
            Box::new(|c: &mut Config| {
                c.images = vec![NamedPath {
                    name: "white".into(),
                    path: "w.fits".into(),
                }]
            }),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = minimal();
            mutate(&mut config);
            assert!(config.validate().is_err(), "case {i} should fail");
        }
    }
}
