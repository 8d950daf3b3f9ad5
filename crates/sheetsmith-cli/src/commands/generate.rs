//! `sheetsmith generate <batch.toml>`

use crate::GlobalArgs;
use anyhow::Result;
use sheetsmith_pipeline::load_batch;
use std::path::Path;

pub fn run(global: &GlobalArgs, batch: &Path, write_manifest: bool) -> Result<()> {
    let requests = load_batch(batch).map_err(|e| anyhow::anyhow!("{}", e))?;
    if requests.is_empty() {
        anyhow::bail!("Batch file {} contains no [[asset]] entries", batch.display());
    }
    super::run_requests(global, &requests, write_manifest)
}
