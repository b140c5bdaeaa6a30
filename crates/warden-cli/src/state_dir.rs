//! Resolves the on-disk state directory (`<state_dir>/sockets/*.sock`,
//! `<state_dir>/messages/<agent>/*.md`) the core reads/writes paths under.
//!
//! Pointed at `data_dir` unconditionally since sockets here are accompanied
//! by persisted message spool files, not purely ephemeral.

use anyhow::{Context, Result};
use std::path::PathBuf;

const ENV_OVERRIDE: &str = "WARDEN_STATE_DIR";

/// `$WARDEN_STATE_DIR` if set, otherwise `<data_dir>/warden`.
pub fn resolve() -> Result<PathBuf> {
  if let Ok(dir) = std::env::var(ENV_OVERRIDE) {
    return Ok(PathBuf::from(dir));
  }
  dirs::data_dir()
    .map(|d| d.join("warden"))
    .context("could not determine a data directory for this platform; set WARDEN_STATE_DIR")
}
