//! CLI command implementations

pub mod asset;
pub mod compose;
pub mod config;
pub mod generate;
pub mod health;

use crate::GlobalArgs;
use anyhow::Result;
use sheetsmith_pipeline::manifest::MANIFEST_FILE_NAME;
use sheetsmith_pipeline::{
    AssetRequest, AssetStatus, BatchReport, BuildManifest, ComfyClient, InferenceService, Pipeline,
    PipelineConfig, StubService,
};

/// Resolve configuration: explicit file or layered lookup, then flag overrides
pub fn load_config(global: &GlobalArgs) -> Result<PipelineConfig> {
    let mut config = match &global.config {
        Some(path) => PipelineConfig::load_from_file(path),
        None => PipelineConfig::load(),
    }
    .map_err(|e| anyhow::anyhow!("{}", e))?;

    if let Some(endpoint) = &global.endpoint {
        config.service.endpoint = endpoint.clone();
    }
    if let Some(output) = &global.output {
        config.output.output_root = output.clone();
    }
    config.check().map_err(|e| anyhow::anyhow!("{}", e))?;
    log::debug!(
        "service {} output {}",
        config.service.endpoint,
        config.output.output_root.display()
    );
    Ok(config)
}

/// Run `requests` against the configured service and report the batch.
/// Fails when any asset failed, so the process exits non-zero.
pub fn run_requests(global: &GlobalArgs, requests: &[AssetRequest], write_manifest: bool) -> Result<()> {
    let config = load_config(global)?;
    if global.offline {
        let pipeline = Pipeline::from_config(config, StubService::new());
        execute(&pipeline, requests, write_manifest)
    } else {
        let client = ComfyClient::from_config(&config);
        let pipeline = Pipeline::from_config(config, client);
        execute(&pipeline, requests, write_manifest)
    }
}

fn execute<S: InferenceService>(pipeline: &Pipeline<S>, requests: &[AssetRequest], write_manifest: bool) -> Result<()> {
    println!(
        "Generating {} asset(s) via {} -> {}",
        requests.len(),
        pipeline.service().name(),
        pipeline.config().output.output_root.display()
    );

    let report = pipeline.run_batch(requests);
    print_report(&report);

    if write_manifest {
        let manifest = BuildManifest::from_report(&report, pipeline.service().name());
        let path = pipeline.config().output.output_root.join(MANIFEST_FILE_NAME);
        manifest.save(&path).map_err(|e| anyhow::anyhow!("{}", e))?;
        println!("Build manifest: {}", path.display());
    }

    if !report.all_succeeded() {
        anyhow::bail!("{} of {} asset(s) failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!();
    for outcome in &report.outcomes {
        match &outcome.status {
            AssetStatus::Succeeded(sheet) => println!(
                "  {:<24} OK      {} frames ({}x{}) -> {} [{}]",
                outcome.asset_key,
                sheet.frame_count,
                sheet.columns,
                sheet.rows,
                sheet.sheet_path.display(),
                sheet.content_hash
            ),
            AssetStatus::Failed { stage, error } => println!(
                "  {:<24} FAILED  at {}: {}",
                outcome.asset_key, stage, error
            ),
        }
    }
    let elapsed = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;
    println!(
        "\nBatch: {} succeeded, {} failed ({:.1}s)",
        report.succeeded(),
        report.failed(),
        elapsed
    );
}
