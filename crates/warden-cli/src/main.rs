//! `warden-attach`: the CLI front-end for starting, attaching to, and
//! messaging a supervised agent session.
//!
//! A thin `main` that parses args, sets up logging, and dispatches into one
//! `commands::*` module per subcommand, with all the protocol and PTY
//! plumbing living in the library crate.

mod args;
mod client;
mod commands;
mod state_dir;
mod term_reset;

use anyhow::Result;
use args::Commands;
use warden_core::session::socket_path;

fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  if let Err(err) = run() {
    eprintln!("error: {err:#}");
    std::process::exit(1);
  }
}

fn run() -> Result<()> {
  let cli = args::parse();
  match cli.command {
    Commands::Start(args) => commands::start::run(args),
    Commands::DaemonChild(args) => {
      let state_dir = state_dir::resolve()?;
      commands::daemon::run_supervisor(args, state_dir)
    }
    Commands::Attach(args) => {
      let state_dir = state_dir::resolve()?;
      let path = socket_path(&state_dir, &args.name);
      commands::attach::run(args, &path)
    }
    Commands::Send(args) => {
      let state_dir = state_dir::resolve()?;
      let path = socket_path(&state_dir, &args.name);
      commands::send::run(args, &path)
    }
    Commands::Show(args) => {
      let state_dir = state_dir::resolve()?;
      let path = socket_path(&state_dir, &args.name);
      commands::show::run(args, &path)
    }
    Commands::Status(args) => {
      let state_dir = state_dir::resolve()?;
      let path = socket_path(&state_dir, &args.name);
      commands::status::run(args, &path)
    }
    Commands::Stop(args) => {
      let state_dir = state_dir::resolve()?;
      let path = socket_path(&state_dir, &args.name);
      commands::stop::run(args, &path)
    }
  }
}
