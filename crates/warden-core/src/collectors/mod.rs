//! State collectors: three signal sources (PTY output, telemetry events,
//! lifecycle hooks), each emitting a `StateUpdate` stream with drain-and-
//! replace semantics — the consumer always sees the latest update.
//!
//! Each collector is its own quiet-period + debounce state machine,
//! generalized from a single Active/Idle flag to the richer
//! `AgentState`/`SubState` pair, and reuses the single-slot notification
//! idiom already used for [`crate::queue::Notify`].

pub mod hook;
pub mod otel;
pub mod output;

use crate::agent::{AgentState, SubState};
use crossbeam_channel::Receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateUpdate {
  pub state: AgentState,
  pub sub_state: SubState,
}

/// Authority tier; higher wins when more than one collector is active.
/// Ordered so `Hook > Otel > Output` compares correctly with `>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Authority {
  Output,
  Otel,
  Hook,
}

pub trait Collector: Send + Sync {
  fn authority(&self) -> Authority;
  /// A single-slot receiver of the latest `StateUpdate`; callers should
  /// always re-read after waking since the signal is purely advisory.
  fn updates(&self) -> Receiver<StateUpdate>;
}

pub use hook::HookCollector;
pub use otel::{MetricsDelta, OtelCollector, TelemetryParser};
pub use output::OutputCollector;
