//! `hauler config`: print where the config lives and what it resolves to.

use anyhow::{Context, Result};
use hauler_core::config;

pub fn run_config() -> Result<()> {
    let path = config::config_path()?;
    let cfg = config::load_or_init()?;
    println!("# {}", path.display());
    print!(
        "{}",
        toml::to_string_pretty(&cfg).context("serialize config")?
    );
    Ok(())
}
