//! `warden-attach attach`: interactive front-end for one running session.
//!
//! Raw mode guard, writer thread with its own stream clone, stdin reader
//! thread, resize-watcher thread, all over one JSON-handshake-then-framed-
//! binary wire: one handshake request/response, then `Data`/`Control`
//! frames each way on the same stream.

use crate::args::AttachArgs;
use crate::client::{expect_ok, read_response};
use crate::term_reset::write_reset_footer;
use anyhow::{Context, Result};
use crossterm::terminal;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use warden_core::protocol::{ControlFrame, FrameType, Request, decode_frame, encode_frame};

pub fn run(args: AttachArgs, socket_path: &Path) -> Result<()> {
  let (cols, rows) = terminal::size().unwrap_or((80, 24));
  let stream = UnixStream::connect(socket_path)
    .with_context(|| format!("could not connect to {} - is '{}' running?", socket_path.display(), args.name))?;

  serde_json::to_writer(&stream, &Request::Attach { cols, rows }).context("sending attach request")?;
  stream.flush().context("flushing attach request")?;
  expect_ok(read_response(&stream)?)?;

  terminal::enable_raw_mode().context("enabling raw terminal mode")?;
  let result = run_attached(stream, cols, rows);
  let _ = terminal::disable_raw_mode();
  let mut stdout = std::io::stdout();
  let _ = write_reset_footer(&mut stdout);
  result
}

fn run_attached(stream: UnixStream, initial_cols: u16, initial_rows: u16) -> Result<()> {
  let running = Arc::new(AtomicBool::new(true));

  let writer_stream = stream.try_clone().context("cloning attach socket for writer")?;
  let input_handle = spawn_stdin_reader(writer_stream.try_clone()?, running.clone());
  let resize_handle = spawn_resize_watcher(writer_stream, running.clone(), initial_cols, initial_rows);

  read_output_until_closed(stream, &running)?;

  running.store(false, Ordering::Relaxed);
  let _ = input_handle.join();
  let _ = resize_handle.join();
  Ok(())
}

/// Reads `Data` frames off the socket and writes their payload straight to
/// stdout; any other frame type or a decode error ends the attach session.
fn read_output_until_closed(mut stream: UnixStream, running: &Arc<AtomicBool>) -> Result<()> {
  let mut stdout = std::io::stdout();
  while running.load(Ordering::Relaxed) {
    let (frame_type, payload) = match decode_frame(&mut stream) {
      Ok(f) => f,
      Err(_) => break,
    };
    if frame_type == FrameType::Data {
      if stdout.write_all(&payload).is_err() {
        break;
      }
      let _ = stdout.flush();
    }
  }
  Ok(())
}

fn spawn_stdin_reader(mut writer: UnixStream, running: Arc<AtomicBool>) -> thread::JoinHandle<()> {
  thread::spawn(move || {
    let mut stdin = std::io::stdin();
    let mut buf = [0u8; 8192];
    while running.load(Ordering::Relaxed) {
      match stdin.read(&mut buf) {
        Ok(0) => break,
        Ok(n) => {
          let Ok(frame) = encode_frame(FrameType::Data, &buf[..n]) else {
            break;
          };
          if writer.write_all(&frame).is_err() {
            break;
          }
        }
        Err(_) => break,
      }
    }
  })
}

fn spawn_resize_watcher(
  mut writer: UnixStream,
  running: Arc<AtomicBool>,
  initial_cols: u16,
  initial_rows: u16,
) -> thread::JoinHandle<()> {
  thread::spawn(move || {
    let mut last = (initial_cols, initial_rows);
    while running.load(Ordering::Relaxed) {
      if let Ok(size @ (cols, rows)) = terminal::size()
        && size != last
      {
        last = size;
        let payload = match serde_json::to_vec(&ControlFrame::Resize { cols, rows }) {
          Ok(p) => p,
          Err(_) => break,
        };
        let Ok(frame) = encode_frame(FrameType::Control, &payload) else {
          break;
        };
        if writer.write_all(&frame).is_err() {
          break;
        }
      }
      thread::sleep(Duration::from_millis(150));
    }
  })
}
