//! Loopback telemetry listener: binds a random `127.0.0.1` port and feeds
//! newline-delimited JSON log records into an `OtelCollector`, so a child
//! agent configured with an OTLP-ish endpoint (see
//! `ClaudeCodeProfile::child_env`) has something to export to.
//!
//! The exact wire schema is deliberately out of this core's scope (that's
//! the `TelemetryParser`'s job); this listener only owns framing: one JSON
//! value per line, fed straight to `OtelCollector::record`.
//!
//! Plain accept loop handing each connection to its own reader thread, no
//! handshake beyond the TCP connect itself since no attach semantics apply
//! here.

use crate::collectors::OtelCollector;
use log::{debug, warn};
use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

pub struct OtelListener {
  port: u16,
  stop: Arc<AtomicBool>,
}

impl OtelListener {
  /// Binds `127.0.0.1:0` and starts accepting connections in the
  /// background. Returns `None` if the bind itself fails; a running agent
  /// with no telemetry endpoint is still fully supervisable via the output
  /// collector, so callers should treat that as degraded, not fatal.
  #[must_use]
  pub fn spawn(otel: Arc<OtelCollector>) -> Option<Self> {
    let listener = match TcpListener::bind(("127.0.0.1", 0)) {
      Ok(l) => l,
      Err(e) => {
        warn!("failed to bind otel listener: {e}");
        return None;
      }
    };
    let port = listener.local_addr().ok()?.port();
    listener.set_nonblocking(true).ok()?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_thread = stop.clone();
    thread::spawn(move || {
      loop {
        if stop_for_thread.load(Ordering::Relaxed) {
          return;
        }
        match listener.accept() {
          Ok((stream, _addr)) => {
            let otel = otel.clone();
            let stop = stop_for_thread.clone();
            thread::spawn(move || serve_connection(stream, &otel, &stop));
          }
          Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            thread::sleep(std::time::Duration::from_millis(50));
          }
          Err(e) => {
            warn!("otel listener accept error: {e}");
            thread::sleep(std::time::Duration::from_millis(200));
          }
        }
      }
    });

    Some(Self { port, stop })
  }

  #[must_use]
  pub fn port(&self) -> u16 {
    self.port
  }

  pub fn stop(&self) {
    self.stop.store(true, Ordering::Relaxed);
  }
}

fn serve_connection(stream: TcpStream, otel: &Arc<OtelCollector>, stop: &Arc<AtomicBool>) {
  let mut reader = BufReader::new(stream);
  let mut line = String::new();
  loop {
    if stop.load(Ordering::Relaxed) {
      return;
    }
    line.clear();
    match reader.read_line(&mut line) {
      Ok(0) => return,
      Ok(_) => {
        let trimmed = line.trim();
        if trimmed.is_empty() {
          continue;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
          Ok(record) => {
            otel.record(&record);
          }
          Err(e) => debug!("discarding malformed telemetry record: {e}"),
        }
      }
      Err(e) => {
        debug!("otel connection read error: {e}");
        return;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collectors::otel::GenericUsageParser;
  use std::io::Write;
  use std::net::TcpStream as ClientStream;
  use std::time::Duration;

  #[test]
  fn feeds_line_delimited_records_into_the_collector() {
    let otel = crate::collectors::OtelCollector::new(Duration::from_secs(10), Arc::new(GenericUsageParser));
    let listener = OtelListener::spawn(otel.clone()).expect("bind loopback listener");

    let mut client = ClientStream::connect(("127.0.0.1", listener.port())).expect("connect");
    client
      .write_all(b"{\"attributes\":{\"event.name\":\"api_request\"}}\n")
      .unwrap();

    let update = otel.updates().recv_timeout(Duration::from_millis(500)).expect("state update");
    assert_eq!(update.state, crate::agent::AgentState::Active);

    listener.stop();
    otel.stop();
  }

  #[test]
  fn malformed_line_does_not_crash_the_connection() {
    let otel = crate::collectors::OtelCollector::new(Duration::from_secs(10), Arc::new(GenericUsageParser));
    let listener = OtelListener::spawn(otel.clone()).expect("bind loopback listener");

    let mut client = ClientStream::connect(("127.0.0.1", listener.port())).expect("connect");
    client.write_all(b"not json\n").unwrap();
    client
      .write_all(b"{\"attributes\":{\"event.name\":\"x\"}}\n")
      .unwrap();

    let update = otel.updates().recv_timeout(Duration::from_millis(500)).expect("state update");
    assert_eq!(update.state, crate::agent::AgentState::Active);

    listener.stop();
    otel.stop();
  }
}
