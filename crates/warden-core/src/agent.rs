//! Agent: aggregates the state collectors behind one authority rule,
//! forwards a single combined state stream, and exposes the per-agent-type
//! profile used by the session to compose child arguments and environment.
//!
//! `AgentKind`/`AgentProfile` split the agent-type lookup from the per-kind
//! child-process configuration; the combined state stream reuses the same
//! single-slot forwarding idiom as the individual collectors, picking among
//! three of them rather than tracking one timer.

use crate::collectors::{Authority, Collector, HookCollector, OtelCollector, OutputCollector, StateUpdate};
use crate::collectors::otel::{Metrics, TelemetryParser};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  Initialized,
  Active,
  Idle,
  Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
  None,
  Thinking,
  ToolUse,
  WaitingForPermission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
  Generic,
  ClaudeCode,
}

/// Per-agent-type contract: which collectors it supports, and what to
/// inject into the child's argv/env so those collectors actually have
/// something to observe.
pub trait AgentProfile: Send + Sync {
  fn kind(&self) -> AgentKind;
  fn supported_collectors(&self) -> &'static [Authority];
  fn prepend_args(&self, session_id: &str) -> Vec<String>;
  fn child_env(&self, collector_ports: &CollectorPorts) -> Vec<(String, String)>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CollectorPorts {
  pub otel_port: Option<u16>,
}

pub struct GenericProfile;

impl AgentProfile for GenericProfile {
  fn kind(&self) -> AgentKind {
    AgentKind::Generic
  }

  fn supported_collectors(&self) -> &'static [Authority] {
    &[Authority::Output]
  }

  fn prepend_args(&self, _session_id: &str) -> Vec<String> {
    Vec::new()
  }

  fn child_env(&self, _collector_ports: &CollectorPorts) -> Vec<(String, String)> {
    Vec::new()
  }
}

pub struct ClaudeCodeProfile;

impl AgentProfile for ClaudeCodeProfile {
  fn kind(&self) -> AgentKind {
    AgentKind::ClaudeCode
  }

  fn supported_collectors(&self) -> &'static [Authority] {
    &[Authority::Output, Authority::Otel, Authority::Hook]
  }

  fn prepend_args(&self, session_id: &str) -> Vec<String> {
    vec!["--session-id".to_string(), session_id.to_string()]
  }

  fn child_env(&self, collector_ports: &CollectorPorts) -> Vec<(String, String)> {
    let mut env = vec![("CLAUDE_CODE_ENABLE_TELEMETRY".to_string(), "1".to_string())];
    if let Some(port) = collector_ports.otel_port {
      env.push((
        "CLAUDE_CODE_OTEL_EXPORTER_OTLP_ENDPOINT".to_string(),
        format!("http://127.0.0.1:{port}"),
      ));
    }
    env
  }
}

#[must_use]
pub fn new_session_id() -> String {
  Uuid::new_v4().to_string()
}

struct CollectorEntry {
  authority: Authority,
  updates: Receiver<StateUpdate>,
}

/// Picks the single highest-authority collector among those supplied and
/// forwards only its stream; the lower-tier collectors are still polled
/// (their metrics side-effects still run) but discarded for state
/// derivation, per the committed-authority rule.
pub struct Agent {
  state: Arc<Mutex<(AgentState, SubState)>>,
  tx: Sender<StateUpdate>,
  rx: Receiver<StateUpdate>,
  output: Arc<OutputCollector>,
  otel: Option<Arc<OtelCollector>>,
  hook: Option<Arc<HookCollector>>,
  stop: Arc<std::sync::atomic::AtomicBool>,
}

impl Agent {
  #[must_use]
  pub fn new(
    output_threshold: Duration,
    otel: Option<(Duration, Arc<dyn TelemetryParser>)>,
    with_hook: bool,
  ) -> Arc<Self> {
    let output = OutputCollector::new(output_threshold);
    let otel = otel.map(|(threshold, parser)| OtelCollector::new(threshold, parser));
    let hook = if with_hook { Some(Arc::new(HookCollector::new())) } else { None };

    let mut entries = vec![CollectorEntry {
      authority: output.authority(),
      updates: output.updates(),
    }];
    if let Some(o) = &otel {
      entries.push(CollectorEntry {
        authority: o.authority(),
        updates: o.updates(),
      });
    }
    if let Some(h) = &hook {
      entries.push(CollectorEntry {
        authority: h.authority(),
        updates: h.updates(),
      });
    }
    let primary = entries
      .into_iter()
      .max_by_key(|e| e.authority)
      .expect("at least OutputCollector is always present");

    let (tx, rx) = bounded(1);
    let agent = Arc::new(Self {
      state: Arc::new(Mutex::new((AgentState::Initialized, SubState::None))),
      tx,
      rx,
      output,
      otel,
      hook,
      stop: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    });
    agent.clone().spawn_forwarder(primary.updates);
    agent
  }

  fn spawn_forwarder(self: Arc<Self>, primary: Receiver<StateUpdate>) {
    thread::spawn(move || {
      loop {
        if self.stop.load(std::sync::atomic::Ordering::Relaxed) {
          return;
        }
        match primary.recv_timeout(Duration::from_millis(200)) {
          Ok(update) => self.apply(update),
          Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
          Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        }
      }
    });
  }

  /// Applies a `StateUpdate`, honoring the sticky-Exited invariant: once
  /// Exited, only an explicit relaunch (`reset`) clears it.
  fn apply(&self, update: StateUpdate) {
    let mut guard = self.state.lock();
    if guard.0 == AgentState::Exited {
      return;
    }
    *guard = (update.state, update.sub_state);
    drop(guard);
    let _ = self.rx.try_recv();
    let _ = self.tx.try_send(update);
  }

  #[must_use]
  pub fn state(&self) -> (AgentState, SubState) {
    *self.state.lock()
  }

  /// Single-slot stream of the latest combined state; consumers should
  /// re-read `state()` after waking rather than trust the payload alone,
  /// since intervening updates may have been coalesced.
  #[must_use]
  pub fn updates(&self) -> Receiver<StateUpdate> {
    self.rx.clone()
  }

  /// Resets the sticky Exited flag after a relaunch has produced a fresh VT.
  pub fn reset(&self) {
    *self.state.lock() = (AgentState::Initialized, SubState::None);
  }

  #[must_use]
  pub fn output_collector(&self) -> &Arc<OutputCollector> {
    &self.output
  }

  #[must_use]
  pub fn otel_collector(&self) -> Option<&Arc<OtelCollector>> {
    self.otel.as_ref()
  }

  #[must_use]
  pub fn hook_collector(&self) -> Option<&Arc<HookCollector>> {
    self.hook.as_ref()
  }

  #[must_use]
  pub fn metrics(&self) -> Option<Metrics> {
    self.otel.as_ref().map(|o| o.metrics())
  }

  pub fn stop(&self) {
    self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
    self.output.stop();
    if let Some(o) = &self.otel {
      o.stop();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collectors::otel::GenericUsageParser;

  #[test]
  fn picks_hook_as_primary_when_all_three_present() {
    let agent = Agent::new(
      Duration::from_secs(10),
      Some((Duration::from_secs(10), Arc::new(GenericUsageParser))),
      true,
    );
    agent
      .hook_collector()
      .unwrap()
      .handle_event(&crate::collectors::hook::HookEvent {
        name: "UserPromptSubmit".to_string(),
        permission_decision: None,
      });
    let update = agent.updates().recv_timeout(Duration::from_millis(300)).unwrap();
    assert_eq!(update.state, AgentState::Active);
    assert_eq!(update.sub_state, SubState::Thinking);
    agent.stop();
  }

  #[test]
  fn output_only_is_used_when_alone() {
    let agent = Agent::new(Duration::from_secs(10), None, false);
    agent.output_collector().note_output();
    let update = agent.updates().recv_timeout(Duration::from_millis(300)).unwrap();
    assert_eq!(update.state, AgentState::Active);
    agent.stop();
  }

  #[test]
  fn exited_is_sticky_until_reset() {
    let agent = Agent::new(Duration::from_secs(10), None, true);
    agent
      .hook_collector()
      .unwrap()
      .handle_event(&crate::collectors::hook::HookEvent {
        name: "SessionEnd".to_string(),
        permission_decision: None,
      });
    let _ = agent.updates().recv_timeout(Duration::from_millis(300)).unwrap();
    assert_eq!(agent.state().0, AgentState::Exited);

    agent.output_collector().note_output();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(agent.state().0, AgentState::Exited);

    agent.reset();
    assert_eq!(agent.state().0, AgentState::Initialized);
    agent.stop();
  }

  #[test]
  fn claude_code_profile_injects_session_id_and_otel_endpoint() {
    let profile = ClaudeCodeProfile;
    let args = profile.prepend_args("abc-123");
    assert_eq!(args, vec!["--session-id".to_string(), "abc-123".to_string()]);
    let env = profile.child_env(&CollectorPorts { otel_port: Some(4317) });
    assert!(env.iter().any(|(k, v)| k == "CLAUDE_CODE_OTEL_EXPORTER_OTLP_ENDPOINT" && v.contains("4317")));
  }

  #[test]
  fn generic_profile_only_supports_output() {
    let profile = GenericProfile;
    assert_eq!(profile.supported_collectors(), &[Authority::Output]);
  }
}
