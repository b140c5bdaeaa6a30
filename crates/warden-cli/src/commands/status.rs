//! `warden-attach status`: prints the agent's derived activity state and
//! queue depths.

use crate::args::NameArgs;
use crate::client::{expect_ok, roundtrip};
use anyhow::Result;
use std::path::Path;
use warden_core::protocol::Request;

pub fn run(args: NameArgs, socket_path: &Path) -> Result<()> {
  let response = expect_ok(roundtrip(socket_path, &Request::Status)?)?;
  if let Some(agent) = response.agent {
    println!("agent: {}", args.name);
    println!("state: {}", agent.state);
    println!("sub_state: {}", agent.sub_state);
    println!("pending_messages: {}", agent.pending_messages);
    println!("queue_paused: {}", agent.queue_paused);
  }
  Ok(())
}
