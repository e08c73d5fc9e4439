//! Per-source processing.
//!
//! A run loads its inputs once into an immutable [`ProcessingContext`] and
//! resolves a [`Plan`]: the ordered list of [`Stage`]s the configuration
//! enables. [`process_source`] walks the plan for one catalogue object,
//! each stage reading the row state built so far and adding products to the
//! [`Source`].

mod stages;


use std::time::Instant;

use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, info};

use crate::catalog::{CatalogRow, ExtractionMode};
use crate::config::{Config, NamedPath};
use crate::cube::fits::{load_cube, load_image};
use crate::cube::{Cube, Image};
use crate::error::{Error, Result};
use crate::segmentation::{Segmenter, ThresholdSegmenter};
use crate::source::Source;

use stages::RowState;

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    Cutout,
    Masks,
    Extraction,
    Continuum,
    CrossCorrelation,
    Sanitize,
}

/// Stages enabled by a validated configuration, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    stages: Vec<Stage>,
}

impl Plan {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut stages = vec![Stage::Cutout, Stage::Masks, Stage::Extraction];
        if config.continuum.enabled {
            stages.push(Stage::Continuum);
        }
        if config.cross_correlation.enabled {
            stages.push(Stage::CrossCorrelation);
        }
        stages.push(Stage::Sanitize);
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn includes(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

// ============================================================================
// Context
// ============================================================================

/// An input image and the name its products carry.
#[derive(Debug, Clone)]
pub struct NamedImage {
    pub name: String,
    pub image: Image,
}

/// Everything a run reads: configuration, plan, datacube, images and the
/// segmenter. Built once and shared read-only by every row.
pub struct ProcessingContext {
    pub config: Config,
    pub plan: Plan,
    pub cube: Cube,
    pub images: Vec<NamedImage>,
    pub segmentation_maps: Vec<NamedImage>,
    pub segmenter: Box<dyn Segmenter>,
}

impl ProcessingContext {
    /// Validate the configuration and load every input it names. Any missing
    /// or unreadable input is a configuration error.
    pub fn load(config: Config) -> Result<Self> {
        let plan = Plan::from_config(&config)?;

        for path in [&config.datacube, &config.catalog]
            .into_iter()
            .chain(config.images.iter().map(|i| &i.path))
            .chain(config.mask.segmentation_maps.iter().map(|i| &i.path))
        {
            common::file_utils::require_file(path)
                .map_err(|e| Error::Configuration(e.to_string()))?;
        }

        let started = Instant::now();
        let cube = load_cube(&config.datacube, &config.cube_extensions)
            .map_err(|e| Error::Configuration(format!("{e:#}")))?;
        let images = load_named(&config.images)?;
        let segmentation_maps = load_named(&config.mask.segmentation_maps)?;
        info!(
            cube = %config.datacube.display(),
            images = images.len(),
            segmentation_maps = segmentation_maps.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Inputs loaded"
        );

        let segmenter = Box::new(ThresholdSegmenter::new(config.mask.segmentation.clone()));
        Ok(Self {
            config,
            plan,
            cube,
            images,
            segmentation_maps,
            segmenter,
        })
    }

    /// Context from in-memory inputs.
    pub fn from_parts(
        config: Config,
        cube: Cube,
        images: Vec<NamedImage>,
        segmentation_maps: Vec<NamedImage>,
        segmenter: Box<dyn Segmenter>,
    ) -> Result<Self> {
        let plan = Plan::from_config(&config)?;
        Ok(Self {
            config,
            plan,
            cube,
            images,
            segmentation_maps,
            segmenter,
        })
    }
}

fn load_named(entries: &[NamedPath]) -> Result<Vec<NamedImage>> {
    entries
        .iter()
        .map(|entry| {
            let image = load_image(&entry.path).map_err(|e| {
                Error::Configuration(format!(
                    "Cannot load image '{}': {e:#}",
                    entry.name
                ))
            })?;
            Ok(NamedImage {
                name: entry.name.clone(),
                image,
            })
        })
        .collect()
}

// ============================================================================
// Processing
// ============================================================================

/// One object to extract.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRequest {
    pub id: String,
    pub ra: f64,
    pub dec: f64,
    pub mode: ExtractionMode,
}

impl SourceRequest {
    pub fn from_row(row: &CatalogRow, config: &Config) -> Self {
        Self {
            id: row.id.clone(),
            ra: row.ra,
            dec: row.dec,
            mode: row.resolve_mode(config),
        }
    }
}

/// What happened while processing one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowDiagnostics {
    /// Mode actually used, after any fallback.
    pub mode: String,
    /// Segmentation found nothing and the fallback aperture was used.
    pub aperture_fallback: bool,
    /// Intersection was empty and the union stood in for it.
    pub union_fallback: bool,
    pub object_pixels: usize,
    pub sky_pixels: usize,
    /// Name of the spectrum the correlation was driven by.
    pub reference: String,
    /// Name of the final spectrum.
    pub final_spectrum: String,
}

#[derive(Debug, Clone)]
pub struct ProcessedSource {
    pub source: Source,
    pub diagnostics: RowDiagnostics,
}

/// Run every planned stage for one object.
pub fn process_source(ctx: &ProcessingContext, request: &SourceRequest) -> Result<ProcessedSource> {
    let mut state = RowState::new(ctx, request);
    for &stage in ctx.plan.stages() {
        let started = Instant::now();
        state.run(stage)?;
        debug!(
            id = %request.id,
            %stage,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Stage complete"
        );
    }
    Ok(state.finish())
}
