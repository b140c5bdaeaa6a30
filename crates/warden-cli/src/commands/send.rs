//! `warden-attach send`: enqueues one message on a running session.

use crate::args::SendArgs;
use crate::client::{expect_ok, roundtrip};
use anyhow::Result;
use std::path::Path;
use warden_core::protocol::Request;

pub fn run(args: SendArgs, socket_path: &Path) -> Result<()> {
  let response = expect_ok(roundtrip(
    socket_path,
    &Request::Send {
      priority: args.priority,
      from: args.from,
      body: args.body,
    },
  )?)?;
  println!("{}", response.message_id.unwrap_or_default());
  Ok(())
}
