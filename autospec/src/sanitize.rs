//! Removal of intermediate products before writing.

use tracing::debug;

use crate::config::Retention;
use crate::source::{ImageKind, Source, SpectrumKey};

/// Drop every product class not retained by `retention`.
///
/// Spectra listed in `protected` always survive, as do images without a
/// retention flag. Removing a class that is already absent is a no-op.
pub fn sanitize(source: &mut Source, retention: &Retention, protected: &[SpectrumKey]) {
    let before = source.product_names().len();

    if !retention.subcubes {
        source.clear_cubes();
    }

    source.retain_images(|key| match key.kind {
        ImageKind::WhiteLight | ImageKind::Reference => retention.images,
        ImageKind::Segmentation => retention.segmentation,
        ImageKind::CrossCorrelation => retention.cross_correlation,
        kind if kind.is_mask() => retention.masks,
        _ => true,
    });

    if !retention.spectra {
        source.retain_spectra(|key| protected.contains(key));
    }

    debug!(
        id = %source.id,
        removed = before - source.product_names().len(),
        "Sanitized source"
    );
}
