//! `warden-attach start`: launches a new supervised session, either in the
//! foreground or detached in the background.
//!
//! The foreground path connects before binding to detect an already-running
//! peer; the background path re-execs itself detached, redirects stdio to
//! `/dev/null`, and polls for socket readiness.

use crate::args::StartArgs;
use crate::commands::daemon;
use crate::state_dir;
use anyhow::{Context, Result, bail};
use log::info;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;
use warden_core::session::socket_path;

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READINESS_POLL_ATTEMPTS: u32 = 50;

pub fn run(args: StartArgs) -> Result<()> {
  let state_dir = state_dir::resolve()?;
  let path = socket_path(&state_dir, &args.name);
  if path.exists() && std::os::unix::net::UnixStream::connect(&path).is_ok() {
    bail!("agent '{}' is already running ({})", args.name, path.display());
  }

  if args.foreground {
    return daemon::run_supervisor(args, state_dir);
  }

  let exe = std::env::current_exe().context("resolving current executable")?;
  let mut cmd = Command::new(exe);
  cmd
    .arg("daemon-child")
    .arg(&args.name)
    .arg(&args.program)
    .args(&args.program_args)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .process_group(0);
  if let Some(cwd) = &args.cwd {
    cmd.arg("--cwd").arg(cwd);
  }
  if args.heartbeat {
    cmd.arg("--heartbeat");
  }
  let child = cmd.spawn().context("spawning detached supervisor process")?;
  info!("spawned detached supervisor, pid {}", child.id());

  for _ in 0..READINESS_POLL_ATTEMPTS {
    if path.exists() && std::os::unix::net::UnixStream::connect(&path).is_ok() {
      println!("agent '{}' started ({})", args.name, path.display());
      return Ok(());
    }
    std::thread::sleep(READINESS_POLL_INTERVAL);
  }
  let waited = READINESS_POLL_INTERVAL * READINESS_POLL_ATTEMPTS;
  bail!("agent '{}' did not become ready within {waited:?}", args.name)
}
