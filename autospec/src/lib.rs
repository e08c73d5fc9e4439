//! AutoSpec - spectrum extraction from integral-field datacubes.
//!
//! For every object of a catalogue the pipeline cuts a sub-cube around the
//! target, builds object and sky masks (segmentation or circular aperture),
//! extracts total, weighted, aperture and sky spectra, subtracts the
//! continuum, and finally extracts a spectrum weighted by the
//! cross-correlation of each spaxel with the reference spectrum.
//!
//! ```rust,ignore
//! use autospec::{Config, ProcessingContext, load_catalog, run_batch, FitsWriter};
//!
//! let config = Config::from_file("autospec.yaml".as_ref())?;
//! let ctx = ProcessingContext::load(config)?;
//! let rows = load_catalog(&ctx.config.catalog)?;
//! let writer = FitsWriter::new(&ctx.config.output.dir, &ctx.config.output.prefix);
//! let report = run_batch(&ctx, &rows, &writer)?;
//! ```

pub mod batch;
pub mod catalog;
pub mod config;
pub mod continuum;
pub mod cube;
pub mod cutout;
mod error;
pub mod extraction;
pub mod mask;
pub(crate) mod math;
pub mod output;
pub mod pipeline;
pub mod sanitize;
pub mod segmentation;
pub mod source;
pub mod xcorr;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Public API
// ============================================================================

pub use batch::{RowReport, RowStatus, RunReport, run_batch};
pub use catalog::{CatalogRow, ExtractionMode, load_catalog};
pub use config::Config;
pub use error::{Error, Result};
pub use output::{FitsWriter, SourceWriter};
pub use pipeline::{ProcessingContext, SourceRequest, process_source};
pub use source::Source;
