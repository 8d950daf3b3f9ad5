//! `sheetsmith config`

use crate::GlobalArgs;
use anyhow::Result;

pub fn run(global: &GlobalArgs) -> Result<()> {
    let config = super::load_config(global)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
