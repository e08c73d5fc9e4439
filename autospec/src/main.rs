use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};

use autospec::{Config, FitsWriter, ProcessingContext, load_catalog, run_batch};

const DEFAULT_CONFIG: &str = "autospec.yaml";
const REPORT_FILE: &str = "run_report.json";

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("autospec: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let config = Config::from_file(&config_path)?;
    common::log_setup::setup_logging(&config.logging.level, &config.logging.dir, "autospec")?;
    info!(
        config = %config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "AutoSpec starting"
    );

    let ctx = ProcessingContext::load(config)?;
    let rows = load_catalog(&ctx.config.catalog)?;

    let output = &ctx.config.output;
    common::file_utils::ensure_dir(&output.dir).context("Cannot create output directory")?;
    let writer = FitsWriter::new(&output.dir, &output.prefix);
    let report = run_batch(&ctx, &rows, &writer)?;

    if output.report {
        let path = output.dir.join(REPORT_FILE);
        report.write_json(&path)?;
        info!(path = %path.display(), "Run report written");
    }
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "AutoSpec done"
    );
    Ok(())
}
