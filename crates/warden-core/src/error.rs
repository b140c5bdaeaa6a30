//! Error taxonomy for the supervisor core.
//!
//! Mirrors the kinds (not necessarily the exact variant shapes) named in the
//! design: failures that are fatal to startup get typed variants so callers
//! can match on them; transient plumbing failures elsewhere use `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
  #[error("failed to spawn child process: {0}")]
  Spawn(#[source] anyhow::Error),

  #[error("control socket at {path} is already in use by a running agent")]
  AgentAlreadyRunning { path: PathBuf },

  #[error("failed to bind control socket at {path}: {source}")]
  SocketBind {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("PTY write timed out after {millis}ms; process not responding (killed)")]
  PtyWriteTimeout { millis: u64 },

  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("message {0} not found")]
  NotFound(String),

  #[error("frame payload of {len} bytes exceeds the {max} byte cap")]
  FrameTooLarge { len: usize, max: usize },

  #[error("client disconnected")]
  ClientDisconnect,
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
