use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use warden_core::message::Priority;

#[derive(Debug, Parser)]
#[command(version, about = "warden - supervise a long-running interactive agent", long_about = None, bin_name = "warden-attach")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Start supervising a new agent under a name
  Start(StartArgs),
  /// Attach an interactive terminal to a running agent
  Attach(AttachArgs),
  /// Queue a message for the agent
  Send(SendArgs),
  /// Show one queued or delivered message
  Show(ShowArgs),
  /// Print the agent's current state and queue depth
  Status(NameArgs),
  /// Request the agent's session to stop
  Stop(NameArgs),
  /// Internal: runs the supervisor loop in the foreground. Used by `start`
  /// to re-exec itself detached from the invoking terminal; not meant to be
  /// run directly.
  #[command(hide = true)]
  DaemonChild(StartArgs),
}

#[derive(Debug, ClapArgs)]
pub struct NameArgs {
  /// Agent name this session is registered under
  pub name: String,
}

#[derive(Debug, ClapArgs)]
pub struct StartArgs {
  /// Agent name to register this session under
  pub name: String,
  /// Program to run under the PTY (e.g. `claude`)
  pub program: String,
  /// Arguments passed through to the program
  pub program_args: Vec<String>,
  /// Working directory for the child (defaults to the current directory)
  #[arg(long)]
  pub cwd: Option<PathBuf>,
  /// Keep the supervisor attached to this terminal instead of detaching
  #[arg(long)]
  pub foreground: bool,
  /// Enable the idle heartbeat nudge
  #[arg(long)]
  pub heartbeat: bool,
}

#[derive(Debug, ClapArgs)]
pub struct AttachArgs {
  /// Agent name to attach to
  pub name: String,
}

#[derive(Debug, ClapArgs)]
pub struct SendArgs {
  /// Agent name to deliver the message to
  pub name: String,
  /// Message body
  pub body: String,
  /// Priority: interrupt, normal, idle-first, idle
  #[arg(long, default_value = "normal", value_parser = parse_priority)]
  pub priority: Priority,
  /// Sender label recorded on the message
  #[arg(long, default_value = "cli")]
  pub from: String,
}

#[derive(Debug, ClapArgs)]
pub struct ShowArgs {
  /// Agent name the message was sent to
  pub name: String,
  /// Message id returned by `send`
  pub message_id: String,
}

fn parse_priority(s: &str) -> Result<Priority, String> {
  match s {
    "interrupt" => Ok(Priority::Interrupt),
    "normal" => Ok(Priority::Normal),
    "idle-first" => Ok(Priority::IdleFirst),
    "idle" => Ok(Priority::Idle),
    other => Err(format!(
      "invalid priority '{other}' (expected interrupt, normal, idle-first, idle)"
    )),
  }
}

#[must_use]
pub fn parse() -> Cli {
  Cli::parse()
}
