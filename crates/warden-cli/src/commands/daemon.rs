//! Runs the supervisor in the foreground: binds the control socket, spawns
//! the child under a PTY, and blocks until the session stops.
//!
//! Shared by `start --foreground` and the hidden `daemon-child` re-exec
//! target.

use crate::args::StartArgs;
use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;
use std::time::Duration;
use warden_core::config::SupervisorOptions;
use warden_core::session::{Session, bind_control_socket, socket_path};
use warden_core::vt::SpawnSpec;

pub fn run_supervisor(args: StartArgs, state_dir: PathBuf) -> Result<()> {
  let path = socket_path(&state_dir, &args.name);
  let listener = bind_control_socket(&path).context("binding control socket")?;
  info!("supervisor listening on {}", path.display());

  let cwd = args.cwd.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
  let spawn_spec = SpawnSpec {
    program: args.program,
    args: args.program_args,
    cwd,
    extra_env: Vec::new(),
  };

  let mut options = SupervisorOptions::default();
  options.heartbeat.enabled = args.heartbeat;

  let session = Session::new(args.name, spawn_spec, options, state_dir);
  session.start_vt().context("starting child under PTY")?;

  let accept_session = session.clone();
  let accept_handle = std::thread::spawn(move || accept_session.accept_loop(listener));
  let _delivery_handle = session.start_delivery_loop();

  session.run_lifecycle();
  session.stop();

  // Give the accept loop a moment to observe the stop flag before we return
  // and the process (possibly) exits, removing the socket cleanly behind it.
  std::thread::sleep(Duration::from_millis(100));
  let _ = accept_handle.join();
  let _ = std::fs::remove_file(&path);
  Ok(())
}
