//! Spools oversized message bodies to disk so other agents can `Read` the
//! path instead of receiving the full body inline.
//!
//! The supervisor never reloads these on restart — they exist purely so a
//! `Read <FilePath>` pointer in a delivered envelope resolves to something.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Writes `body` to `<state_dir>/messages/<agent_name>/<timestamp>-<id_prefix>.md`
/// with mode 0600, creating parent directories as needed.
pub fn spool_message_body(
  state_dir: &Path,
  agent_name: &str,
  timestamp_ms: u64,
  message_id: &str,
  body: &str,
) -> Result<PathBuf> {
  let dir = state_dir.join("messages").join(agent_name);
  fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

  let id_prefix: String = message_id.chars().take(8).collect();
  let path = dir.join(format!("{timestamp_ms}-{id_prefix}.md"));

  fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
  fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
    .with_context(|| format!("chmod {}", path.display()))?;

  Ok(path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn spools_body_with_expected_path_shape_and_mode() {
    let dir = tempdir().unwrap();
    let path = spool_message_body(dir.path(), "claude-1", 1_700_000_000_000, "abcdef12-xyz", "the body")
      .unwrap();
    assert!(path.ends_with("messages/claude-1/1700000000000-abcdef12.md"));
    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "the body");
    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
  }

  #[test]
  fn creates_per_agent_subdirectory() {
    let dir = tempdir().unwrap();
    spool_message_body(dir.path(), "agent-a", 1, "id1", "a").unwrap();
    spool_message_body(dir.path(), "agent-b", 2, "id2", "b").unwrap();
    assert!(dir.path().join("messages/agent-a").is_dir());
    assert!(dir.path().join("messages/agent-b").is_dir());
  }
}
