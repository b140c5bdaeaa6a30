//! `warden-attach show`: prints one message's full body, following the
//! spooled-file pointer transparently when the body was too large to inline.

use crate::args::ShowArgs;
use crate::client::{expect_ok, roundtrip};
use anyhow::Result;
use std::path::Path;
use warden_core::protocol::Request;

pub fn run(args: ShowArgs, socket_path: &Path) -> Result<()> {
  let response = expect_ok(roundtrip(
    socket_path,
    &Request::Show {
      message_id: args.message_id,
    },
  )?)?;
  if let Some(message) = response.message {
    println!("from: {}", message.from);
    println!("priority: {:?}", message.priority);
    println!("status: {}", message.status);
    println!();
    if let Some(path) = &message.file_path {
      let body = std::fs::read_to_string(path)
        .unwrap_or_else(|e| format!("<failed to read spooled body at {path}: {e}>"));
      println!("{body}");
    } else {
      println!("{}", message.body);
    }
  }
  Ok(())
}
