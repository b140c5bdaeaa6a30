//! Thin control-socket client: one request, one response, over a fresh
//! connection. `attach` is the only request that keeps the connection open
//! past the handshake; that hand-off lives in `commands::attach`.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use warden_core::protocol::{Request, Response};

pub fn connect(socket_path: &Path) -> Result<UnixStream> {
  UnixStream::connect(socket_path).with_context(|| {
    format!(
      "could not connect to {} - is the agent running?",
      socket_path.display()
    )
  })
}

/// Sends one JSON request and reads back one JSON response on a fresh
/// connection, matching the daemon's per-request handshake semantics for
/// every request other than `attach`.
pub fn roundtrip(socket_path: &Path, request: &Request) -> Result<Response> {
  let mut stream = connect(socket_path)?;
  serde_json::to_writer(&stream, request).context("failed to send request")?;
  stream.flush().context("failed to flush request")?;
  read_response(&stream)
}

pub fn read_response(reader: &UnixStream) -> Result<Response> {
  let mut de = serde_json::Deserializer::from_reader(reader);
  let response = Response::deserialize(&mut de).context("failed to parse response")?;
  Ok(response)
}

pub fn expect_ok(response: Response) -> Result<Response> {
  if !response.ok {
    bail!(response.error.unwrap_or_else(|| "request failed".to_string()));
  }
  Ok(response)
}
