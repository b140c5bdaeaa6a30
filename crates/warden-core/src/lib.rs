//! Core library for the warden headless terminal multiplexer.
//!
//! Owns one supervised child process per `Session`: a PTY (`vt`), a
//! priority message queue drained by a `DeliveryLoop`, a per-agent-type
//! `Agent` combining up to three `collectors` under an authority rule, and
//! the per-client byte-level input state machine under `client`. The
//! control socket wire format lives in `protocol`; `config` holds the
//! tunables a caller may override and `error` the taxonomy surfaced across
//! the crate boundary.
//!
//! This crate never parses a configuration file, never owns the host
//! terminal, and never initializes a logger — those are the `warden-cli`
//! binary's job. Call sites only need `log::set_logger` (or any
//! `log`-compatible init) done once, upstream.

pub mod agent;
pub mod client;
pub mod collectors;
pub mod config;
pub mod csi;
pub mod delivery;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod osc;
pub mod otel_listener;
pub mod persistence;
pub mod protocol;
pub mod queue;
pub mod screen;
pub mod session;
pub mod vt;

pub use error::{Result, SupervisorError};
