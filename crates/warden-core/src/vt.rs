//! VT: owns the PTY file descriptor, the child process handle, and the two
//! Screen instances (live + scrollback). Serializes writes under one lock.
//!
//! Built on `portable-pty` plus a single `parking_lot::Mutex` guarding
//! master/writer/child, with a background read pump thread feeding both
//! Screens, a write timeout that marks the VT hung instead of blocking
//! forever, and OSC 10/11 color-query answering.

use crate::error::{Result, SupervisorError};
use crate::osc::{CachedColor, encode_color_reply, scan_osc_color_queries};
use crate::screen::{LiveScreen, Screen, ScrollbackScreen};
use anyhow::Context;
use log::{info, warn};
use parking_lot::Mutex;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

pub struct SpawnSpec {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: std::path::PathBuf,
  pub extra_env: Vec<(String, String)>,
}

struct VtInner {
  master: Box<dyn MasterPty + Send>,
  writer: Box<dyn Write + Send>,
  child: Box<dyn Child + Send + Sync>,
  rows: u16,
  cols: u16,
  child_rows: u16,
  last_output_ts: Instant,
  child_exited: bool,
  child_hung: bool,
  exit_error: Option<String>,
}

/// Shared handle to a running (or hung/exited) child under a PTY.
pub struct Vt {
  inner: Arc<Mutex<VtInner>>,
  pub live: Arc<dyn Screen>,
  pub scrollback: Arc<dyn Screen>,
  write_timeout: Duration,
  cached_fg: CachedColor,
  cached_bg: CachedColor,
}

impl Vt {
  /// `StartPTY`: forks the child connected to a new PTY master with the
  /// requested window size, merging `extra_env` into the child environment.
  pub fn start(
    spec: SpawnSpec,
    rows: u16,
    cols: u16,
    reserved_rows: u16,
    write_timeout: Duration,
    cached_fg: CachedColor,
    cached_bg: CachedColor,
  ) -> Result<Arc<Self>> {
    let child_rows = rows.saturating_sub(reserved_rows).max(1);
    let pty_system = native_pty_system();
    let pair = pty_system
      .openpty(PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
      })
      .map_err(|e| SupervisorError::Spawn(anyhow::anyhow!(e)))?;

    let mut builder = CommandBuilder::new(&spec.program);
    builder.args(&spec.args);
    builder.cwd(&spec.cwd);
    for (k, v) in &spec.extra_env {
      builder.env(k, v);
    }

    let child = pair
      .slave
      .spawn_command(builder)
      .map_err(|e| SupervisorError::Spawn(anyhow::anyhow!(e)))?;
    drop(pair.slave);

    let master = pair.master;
    let writer = master
      .take_writer()
      .context("failed to take PTY writer")
      .map_err(SupervisorError::Spawn)?;

    let live: Arc<dyn Screen> = Arc::new(LiveScreen::new(child_rows, cols));
    let scrollback: Arc<dyn Screen> = Arc::new(ScrollbackScreen::new(cols));

    let vt = Arc::new(Self {
      inner: Arc::new(Mutex::new(VtInner {
        master,
        writer,
        child,
        rows,
        cols,
        child_rows,
        last_output_ts: Instant::now(),
        child_exited: false,
        child_hung: false,
        exit_error: None,
      })),
      live,
      scrollback,
      write_timeout,
      cached_fg,
      cached_bg,
    });
    Ok(vt)
  }

  /// `WritePTY`: attempts to write all bytes within `timeout`; a write that
  /// doesn't complete is treated as a hang and kills the child (the only
  /// path that sets `ChildHung`).
  pub fn write_pty(&self, bytes: &[u8]) -> Result<usize> {
    let (done_tx, done_rx) = mpsc::channel::<std::io::Result<usize>>();
    let bytes_owned = bytes.to_vec();

    // The write itself happens under the VT lock (writes must be
    // serialized), but we bound how long we wait for it on this calling
    // thread so a wedged child doesn't block the caller forever. The write
    // runs on a detached thread holding its own clone of the inner Arc so a
    // timed-out wait here never blocks on joining it.
    let inner = self.inner.clone();
    let timeout = self.write_timeout;
    thread::spawn(move || {
      let mut guard = inner.lock();
      let res = guard.writer.write_all(&bytes_owned).and_then(|()| {
        guard.writer.flush()?;
        Ok(bytes_owned.len())
      });
      let _ = done_tx.send(res);
    });

    match done_rx.recv_timeout(timeout) {
      Ok(Ok(n)) => Ok(n),
      Ok(Err(e)) => Err(SupervisorError::Spawn(anyhow::anyhow!(e))),
      Err(_) => {
        warn!(
          "PTY write timed out after {}ms; marking hung and killing child",
          timeout.as_millis()
        );
        self.mark_hung_and_kill();
        Err(SupervisorError::PtyWriteTimeout {
          millis: timeout.as_millis() as u64,
        })
      }
    }
  }

  fn mark_hung_and_kill(&self) {
    let mut guard = self.inner.lock();
    guard.child_hung = true;
    guard.exit_error = Some("process not responding (killed)".to_string());
    let _ = guard.child.kill();
  }

  #[must_use]
  pub fn is_hung(&self) -> bool {
    self.inner.lock().child_hung
  }

  #[must_use]
  pub fn is_exited(&self) -> bool {
    self.inner.lock().child_exited
  }

  #[must_use]
  pub fn exit_error(&self) -> Option<String> {
    self.inner.lock().exit_error.clone()
  }

  #[must_use]
  pub fn last_output_ts(&self) -> Instant {
    self.inner.lock().last_output_ts
  }

  #[must_use]
  pub fn dims(&self) -> (u16, u16, u16) {
    let g = self.inner.lock();
    (g.rows, g.cols, g.child_rows)
  }

  /// `Resize`: updates dimensions, resizes both Screens, and sets the PTY
  /// window size.
  pub fn resize(&self, rows: u16, cols: u16, reserved_rows: u16) {
    let child_rows = rows.saturating_sub(reserved_rows).max(1);
    {
      let mut g = self.inner.lock();
      g.rows = rows;
      g.cols = cols;
      g.child_rows = child_rows;
      let _ = g.master.resize(PtySize {
        rows: child_rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
      });
    }
    self.live.resize(child_rows, cols);
    self.scrollback.resize(child_rows, cols);
  }

  /// `KillChild`: sends process termination to the child.
  pub fn kill_child(&self) {
    let mut g = self.inner.lock();
    let _ = g.child.kill();
  }

  /// Polls (non-blocking) whether the child has exited, updating flags.
  pub fn poll_exit(&self) -> bool {
    let mut g = self.inner.lock();
    if g.child_exited {
      return true;
    }
    match g.child.try_wait() {
      Ok(Some(status)) => {
        g.child_exited = true;
        if g.exit_error.is_none() {
          g.exit_error = Some(format!("child exited: {status:?}"));
        }
        true
      }
      _ => false,
    }
  }

  /// `PipeOutput`: spawns the read pump. `on_chunk` is called after each
  /// non-empty read, with both Screens already updated and `last_output_ts`
  /// already bumped, typically to trigger a re-render.
  pub fn spawn_pipe_output(self: &Arc<Self>, on_chunk: impl Fn() + Send + 'static) {
    let vt = self.clone();
    let reader_res = {
      let g = vt.inner.lock();
      g.master.try_clone_reader()
    };
    let mut reader = match reader_res {
      Ok(r) => r,
      Err(e) => {
        warn!("failed to clone PTY reader: {e}");
        return;
      }
    };
    thread::spawn(move || {
      let mut buf = [0u8; 8192];
      loop {
        match reader.read(&mut buf) {
          Ok(0) | Err(_) => {
            info!("PTY reader reached EOF");
            return;
          }
          Ok(n) => {
            let chunk = &buf[..n];

            for query in scan_osc_color_queries(chunk) {
              let color = match query {
                crate::osc::OscColorQuery::Foreground => vt.cached_fg,
                crate::osc::OscColorQuery::Background => vt.cached_bg,
              };
              let reply = encode_color_reply(query, color);
              let _ = vt.inner.lock().writer.write_all(&reply);
            }

            {
              let mut g = vt.inner.lock();
              g.last_output_ts = Instant::now();
            }

            vt.live.process(chunk);
            vt.scrollback.process(chunk);

            on_chunk();
          }
        }
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn spec(program: &str, args: &[&str]) -> SpawnSpec {
    SpawnSpec {
      program: program.to_string(),
      args: args.iter().map(|s| s.to_string()).collect(),
      cwd: std::env::temp_dir(),
      extra_env: Vec::new(),
    }
  }

  #[test]
  fn start_spawns_child_and_reports_dims() {
    let vt = Vt::start(
      spec("sh", &["-c", "sleep 1"]),
      24,
      80,
      2,
      Duration::from_secs(3),
      CachedColor::white(),
      CachedColor::black(),
    )
    .expect("spawn sh");
    let (rows, cols, child_rows) = vt.dims();
    assert_eq!((rows, cols), (24, 80));
    assert_eq!(child_rows, 22);
    vt.kill_child();
  }

  #[test]
  fn resize_shrinks_child_rows_by_reserved_amount() {
    let vt = Vt::start(
      spec("sh", &["-c", "sleep 1"]),
      24,
      80,
      2,
      Duration::from_secs(3),
      CachedColor::white(),
      CachedColor::black(),
    )
    .expect("spawn sh");
    vt.resize(30, 100, 3);
    let (rows, cols, child_rows) = vt.dims();
    assert_eq!((rows, cols), (30, 100));
    assert_eq!(child_rows, 27);
    vt.kill_child();
  }

  #[test]
  fn poll_exit_observes_child_exit() {
    let vt = Vt::start(
      spec("sh", &["-c", "exit 0"]),
      24,
      80,
      2,
      Duration::from_secs(3),
      CachedColor::white(),
      CachedColor::black(),
    )
    .expect("spawn sh");
    let start = Instant::now();
    while !vt.poll_exit() && start.elapsed() < Duration::from_secs(2) {
      thread::sleep(Duration::from_millis(20));
    }
    assert!(vt.is_exited());
  }
}
