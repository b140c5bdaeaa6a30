//! `warden-attach stop`: asks the supervisor to stop the child and exit.

use crate::args::NameArgs;
use crate::client::{expect_ok, roundtrip};
use anyhow::Result;
use std::path::Path;
use warden_core::protocol::Request;

pub fn run(args: NameArgs, socket_path: &Path) -> Result<()> {
  expect_ok(roundtrip(socket_path, &Request::Stop)?)?;
  println!("agent '{}' stopped", args.name);
  Ok(())
}
