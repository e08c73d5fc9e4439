//! Stage implementations over the per-row state.

use tracing::{info, warn};

use common::buffer2::Buffer2;

use crate::catalog::ExtractionMode;
use crate::continuum::{subtract_continuum, subtract_continuum_cube};
use crate::cube::Image;
use crate::cutout::{CutoutRegion, extract_cutout};
use crate::error::{Error, Result};
use crate::extraction::{ExtractionInputs, extract_spectra};
use crate::mask::{Mask, Segmentation, aperture_masks, combine_segmentation_maps};
use crate::sanitize::sanitize;
use crate::segmentation::label_segmentation;
use crate::source::{
    CubeKind, ImageKey, ImageKind, Source, Spectrum, SpectrumKey, SpectrumKind,
};
use crate::xcorr::{apply_threshold, cc_weighted_spectrum, correlation_image};

use super::{NamedImage, ProcessedSource, ProcessingContext, RowDiagnostics, SourceRequest, Stage};

/// Tag of weighted spectra that use the white-light image.
const WHITE_TAG: &str = "WHITE";

struct ObjectSky {
    object: Mask,
    sky: Mask,
}

/// Row-scoped state threaded through the stages.
pub(super) struct RowState<'a> {
    ctx: &'a ProcessingContext,
    request: &'a SourceRequest,
    source: Source,
    /// Mode in effect; segmentation may fall back to an aperture.
    mode: ExtractionMode,
    region: Option<CutoutRegion>,
    /// Input images resampled onto the cutout grid.
    references: Vec<NamedImage>,
    masks: Option<ObjectSky>,
    sky: Option<Spectrum>,
    reference: Option<SpectrumKey>,
    correlation_reference: Option<SpectrumKey>,
    final_spectrum: Option<SpectrumKey>,
    diagnostics: RowDiagnostics,
}

fn require<'s, T>(value: &'s Option<T>, name: &str) -> Result<&'s T> {
    value.as_ref().ok_or_else(|| Error::ProductNotFound {
        name: name.to_string(),
    })
}

impl<'a> RowState<'a> {
    pub(super) fn new(ctx: &'a ProcessingContext, request: &'a SourceRequest) -> Self {
        Self {
            ctx,
            request,
            source: Source::new(
                request.id.clone(),
                request.ra,
                request.dec,
                ctx.config.provenance.clone(),
            ),
            mode: request.mode.clone(),
            region: None,
            references: Vec::new(),
            masks: None,
            sky: None,
            reference: None,
            correlation_reference: None,
            final_spectrum: None,
            diagnostics: RowDiagnostics::default(),
        }
    }

    pub(super) fn run(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Cutout => self.cutout(),
            Stage::Masks => self.masks(),
            Stage::Extraction => self.extraction(),
            Stage::Continuum => self.continuum(),
            Stage::CrossCorrelation => self.cross_correlation(),
            Stage::Sanitize => self.sanitize(),
        }
    }

    pub(super) fn finish(mut self) -> ProcessedSource {
        self.diagnostics.mode = match self.mode {
            ExtractionMode::Aperture { radius } => format!("aperture {radius:.1}"),
            ExtractionMode::Image { .. } => "image".to_string(),
        };
        if let Some(masks) = &self.masks {
            self.diagnostics.object_pixels = masks.object.count();
            self.diagnostics.sky_pixels = masks.sky.count();
        }
        let final_spectrum = self.final_spectrum.as_ref().or(self.reference.as_ref());
        self.diagnostics.reference = self
            .correlation_reference
            .as_ref()
            .or(self.reference.as_ref())
            .map(ToString::to_string)
            .unwrap_or_default();
        self.diagnostics.final_spectrum = final_spectrum.map(ToString::to_string).unwrap_or_default();

        ProcessedSource {
            source: self.source,
            diagnostics: self.diagnostics,
        }
    }

    // ========================================================================
    // Cutout
    // ========================================================================

    fn cutout(&mut self) -> Result<()> {
        let config = &self.ctx.config;
        let cutout = extract_cutout(
            &self.ctx.cube,
            self.request.ra,
            self.request.dec,
            config.cutout_size,
            config.edge_policy,
        )?;
        self.source.truncated = cutout.region.truncated;

        let (width, height) = (cutout.region.width, cutout.region.height);
        for named in &self.ctx.images {
            let image = named.image.resample_onto(&cutout.cube.wcs, width, height);
            self.source.add_image(
                ImageKey::labelled(ImageKind::Reference, &named.name),
                image.clone(),
            )?;
            self.references.push(NamedImage {
                name: named.name.clone(),
                image,
            });
        }

        self.source.add_image(ImageKind::WhiteLight, cutout.white)?;
        self.source.add_cube(CubeKind::Data, cutout.cube)?;
        self.region = Some(cutout.region);
        Ok(())
    }

    // ========================================================================
    // Masks
    // ========================================================================

    fn masks(&mut self) -> Result<()> {
        match self.mode.clone() {
            ExtractionMode::Aperture { radius } => self.aperture_masks(radius),
            ExtractionMode::Image { .. } => match self.segmentation_masks() {
                Err(Error::DegenerateMask) => {
                    let radius = self.ctx.config.mask.fallback_aperture;
                    warn!(
                        id = %self.request.id,
                        radius,
                        "Object not found in any segmentation map, falling back to aperture extraction"
                    );
                    self.diagnostics.aperture_fallback = true;
                    self.mode = ExtractionMode::Aperture { radius };
                    self.aperture_masks(radius)
                }
                other => other,
            },
        }
    }

    fn segmentation_masks(&mut self) -> Result<()> {
        let config = &self.ctx.config;
        let center = require(&self.region, "cutout")?.center;
        let white = self.source.image(&ImageKind::WhiteLight.into())?;
        let (width, height) = (white.width(), white.height());
        let wcs = white.wcs.clone();

        let mut maps: Vec<(String, Segmentation)> = Vec::new();
        for named in &self.ctx.segmentation_maps {
            let labels = named.image.resample_onto(&wcs, width, height);
            maps.push((named.name.clone(), label_segmentation(&labels, center)));
        }
        if config.mask.use_images {
            for named in &self.references {
                maps.push((
                    named.name.clone(),
                    self.ctx.segmenter.segment(&named.image, center),
                ));
            }
        }
        if config.mask.use_white {
            maps.push((WHITE_TAG.to_string(), self.ctx.segmenter.segment(white, center)));
        }

        for (name, seg) in &maps {
            self.source.add_image(
                ImageKey::labelled(ImageKind::Segmentation, name),
                seg.detections.to_image(&wcs),
            )?;
        }

        let maps: Vec<Segmentation> = maps.into_iter().map(|(_, seg)| seg).collect();
        let combined = combine_segmentation_maps(&maps, config.mask.object)?;

        self.source
            .add_image(ImageKind::MaskUnion, combined.union.to_image(&wcs))?;
        self.source.add_image(
            ImageKind::MaskIntersection,
            combined.intersection.to_image(&wcs),
        )?;
        self.source
            .add_image(ImageKind::MaskObject, combined.object.to_image(&wcs))?;
        self.source
            .add_image(ImageKind::MaskSky, combined.sky.to_image(&wcs))?;

        self.diagnostics.union_fallback = combined.used_union_fallback;
        self.masks = Some(ObjectSky {
            object: combined.object,
            sky: combined.sky,
        });
        Ok(())
    }

    fn aperture_masks(&mut self, radius: f64) -> Result<()> {
        let region = *require(&self.region, "cutout")?;
        let white = self.source.image(&ImageKind::WhiteLight.into())?;
        let wcs = white.wcs.clone();
        let masks = aperture_masks(
            white.width(),
            white.height(),
            region.center_f64(),
            radius,
            wcs.pixel_scale_arcsec(),
            self.ctx.config.mask.sky,
        )?;

        self.source.add_image(
            ImageKey::labelled(ImageKind::MaskAperture, format!("{radius:.1}")),
            masks.object.to_image(&wcs),
        )?;
        self.source
            .add_image(ImageKind::MaskObject, masks.object.to_image(&wcs))?;
        self.source
            .add_image(ImageKind::MaskSky, masks.sky.to_image(&wcs))?;

        self.masks = Some(ObjectSky {
            object: masks.object,
            sky: masks.sky,
        });
        Ok(())
    }

    // ========================================================================
    // Extraction
    // ========================================================================

    /// Weight image tag and values on the cutout grid.
    fn weight_map(&self) -> Result<(String, Buffer2<f32>)> {
        if let ExtractionMode::Image {
            weight: Some(name),
        } = &self.mode
        {
            if let Some(named) = self
                .references
                .iter()
                .find(|r| r.name.eq_ignore_ascii_case(name))
            {
                return Ok((named.name.to_uppercase(), named.image.data.clone()));
            }
            warn!(
                id = %self.request.id,
                weight = %name,
                "Weight image not found, using white light"
            );
        }
        let white = self.source.image(&ImageKind::WhiteLight.into())?;
        Ok((WHITE_TAG.to_string(), white.data.clone()))
    }

    fn extraction(&mut self) -> Result<()> {
        let config = &self.ctx.config;
        let region = *require(&self.region, "cutout")?;
        let (tag, weight) = self.weight_map()?;

        let mut apertures = config.apertures.clone();
        if let ExtractionMode::Aperture { radius } = self.mode
            && !apertures
                .iter()
                .any(|&r| SpectrumKey::aperture(r) == SpectrumKey::aperture(radius))
        {
            apertures.push(radius);
        }

        let spectra = {
            let masks = require(&self.masks, "MASK_OBJECT")?;
            let cube = self.source.cube(CubeKind::Data)?;
            let inputs = ExtractionInputs {
                object: &masks.object,
                sky: &masks.sky,
                weight: (&tag, &weight),
                apertures: &apertures,
                center: region.center_f64(),
                pixel_scale_arcsec: cube.wcs.pixel_scale_arcsec(),
                sky_subtraction: config.sky_subtraction,
            };
            extract_spectra(cube, &inputs)?
        };

        for (key, spectrum) in spectra {
            if key.kind == SpectrumKind::Sky {
                self.sky = Some(spectrum.clone());
            }
            self.source.add_spectrum(key, spectrum)?;
        }

        let reference = match self.mode {
            ExtractionMode::Aperture { radius } => SpectrumKey::aperture(radius),
            ExtractionMode::Image { .. } => SpectrumKey::new(SpectrumKind::Total),
        }
        .sky_subtracted(config.sky_subtraction);
        self.source.spectrum(&reference)?;
        self.reference = Some(reference);
        Ok(())
    }

    // ========================================================================
    // Continuum
    // ========================================================================

    fn continuum(&mut self) -> Result<()> {
        let degree = self.ctx.config.continuum.degree;
        let reference = require(&self.reference, "reference spectrum")?.clone();

        let spectrum = subtract_continuum(self.source.spectrum(&reference)?, degree)?;
        let cube = subtract_continuum_cube(self.source.cube(CubeKind::Data)?, degree)?;

        let key = reference.continuum_subtracted(true);
        self.source.add_spectrum(key.clone(), spectrum)?;
        self.source.add_cube(CubeKind::ContinuumSubtracted, cube)?;
        self.correlation_reference = Some(key);
        Ok(())
    }

    // ========================================================================
    // Cross-correlation
    // ========================================================================

    fn cross_correlation(&mut self) -> Result<()> {
        let config = &self.ctx.config;
        let key = SpectrumKey::new(SpectrumKind::CcWeighted).sky_subtracted(config.sky_subtraction);

        let (xc_image, spectrum) = {
            let reference_key = self
                .correlation_reference
                .as_ref()
                .or(self.reference.as_ref())
                .ok_or_else(|| Error::ProductNotFound {
                    name: "reference spectrum".into(),
                })?;
            let reference = self.source.spectrum(reference_key)?;
            let cube = self.source.cube(CubeKind::Data)?;
            let correlation_cube = if self.ctx.plan.includes(Stage::Continuum) {
                self.source.cube(CubeKind::ContinuumSubtracted)?
            } else {
                cube
            };

            let mut xc = correlation_image(reference, correlation_cube)?;
            if let Some(kappa) = config.cross_correlation.threshold_kappa {
                xc = apply_threshold(&xc, kappa);
            }

            let sky = if config.sky_subtraction {
                Some(require(&self.sky, "SKY")?)
            } else {
                None
            };
            let spectrum =
                cc_weighted_spectrum(cube, &xc, sky, config.cross_correlation.extraction);
            (Image::new(xc, cube.wcs.clone()), spectrum)
        };

        self.source
            .add_image(ImageKind::CrossCorrelation, xc_image)?;
        self.source.add_spectrum(key.clone(), spectrum)?;
        self.final_spectrum = Some(key);
        Ok(())
    }

    // ========================================================================
    // Sanitize
    // ========================================================================

    fn sanitize(&mut self) -> Result<()> {
        let protected: Vec<SpectrumKey> = [
            &self.reference,
            &self.correlation_reference,
            &self.final_spectrum,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect();

        sanitize(&mut self.source, &self.ctx.config.retention, &protected);
        info!(
            id = %self.request.id,
            products = self.source.product_names().len(),
            truncated = self.source.truncated,
            "Source ready"
        );
        Ok(())
    }
}
