//! `HookCollector`: highest authority. Driven entirely by discrete lifecycle
//! hook events the child agent posts over the control socket — no idle
//! timer, since hooks bracket activity precisely rather than inferring it
//! from quiet periods.

use super::{Authority, Collector, StateUpdate};
use crate::agent::{AgentState, SubState};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEvent {
  pub name: String,
  pub permission_decision: Option<PermissionDecision>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
  AskUser,
  Allow,
  Deny,
}

impl PermissionDecision {
  #[must_use]
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "ask_user" => Some(Self::AskUser),
      "allow" => Some(Self::Allow),
      "deny" => Some(Self::Deny),
      _ => None,
    }
  }
}

struct Inner {
  blocked_on_permission: bool,
}

pub struct HookCollector {
  inner: Mutex<Inner>,
  tx: Sender<StateUpdate>,
  rx: Receiver<StateUpdate>,
}

impl Default for HookCollector {
  fn default() -> Self {
    Self::new()
  }
}

impl HookCollector {
  #[must_use]
  pub fn new() -> Self {
    let (tx, rx) = bounded(1);
    Self {
      inner: Mutex::new(Inner {
        blocked_on_permission: false,
      }),
      tx,
      rx,
    }
  }

  fn emit(&self, update: StateUpdate) {
    let _ = self.rx.try_recv();
    let _ = self.tx.try_send(update);
  }

  /// Feeds one hook event and derives the resulting `StateUpdate`. Always
  /// emits — unlike the timer-driven collectors, every hook is a fact about
  /// the agent's state, never merely a liveness signal.
  pub fn handle_event(&self, event: &HookEvent) {
    if let Some(decision) = event.permission_decision {
      let mut inner = self.inner.lock();
      inner.blocked_on_permission = matches!(decision, PermissionDecision::AskUser);
    }

    let state = match event.name.as_str() {
      "UserPromptSubmit" | "PreToolUse" | "PostToolUse" | "PermissionRequest" => AgentState::Active,
      "SessionStart" | "Stop" => AgentState::Idle,
      "SessionEnd" => AgentState::Exited,
      _ => return,
    };

    let blocked = self.inner.lock().blocked_on_permission;
    let sub_state = if blocked {
      SubState::WaitingForPermission
    } else {
      match event.name.as_str() {
        "UserPromptSubmit" | "PostToolUse" => SubState::Thinking,
        "PreToolUse" => SubState::ToolUse,
        "PermissionRequest" => SubState::WaitingForPermission,
        _ => SubState::None,
      }
    };

    self.emit(StateUpdate { state, sub_state });
  }
}

impl Collector for HookCollector {
  fn authority(&self) -> Authority {
    Authority::Hook
  }

  fn updates(&self) -> Receiver<StateUpdate> {
    self.rx.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  fn event(name: &str) -> HookEvent {
    HookEvent {
      name: name.to_string(),
      permission_decision: None,
    }
  }

  #[test]
  fn user_prompt_submit_emits_active_thinking() {
    let c = HookCollector::new();
    c.handle_event(&event("UserPromptSubmit"));
    let u = c.updates().recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(u.state, AgentState::Active);
    assert_eq!(u.sub_state, SubState::Thinking);
  }

  #[test]
  fn pre_tool_use_emits_active_tool_use() {
    let c = HookCollector::new();
    c.handle_event(&event("PreToolUse"));
    let u = c.updates().recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(u.state, AgentState::Active);
    assert_eq!(u.sub_state, SubState::ToolUse);
  }

  #[test]
  fn post_tool_use_emits_active_thinking() {
    let c = HookCollector::new();
    c.handle_event(&event("PostToolUse"));
    let u = c.updates().recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(u.state, AgentState::Active);
    assert_eq!(u.sub_state, SubState::Thinking);
  }

  #[test]
  fn session_end_emits_exited() {
    let c = HookCollector::new();
    c.handle_event(&event("SessionEnd"));
    let u = c.updates().recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(u.state, AgentState::Exited);
  }

  #[test]
  fn permission_request_sets_blocked_substate() {
    let c = HookCollector::new();
    c.handle_event(&event("PermissionRequest"));
    let u = c.updates().recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(u.sub_state, SubState::WaitingForPermission);
  }

  #[test]
  fn ask_user_decision_sticks_blocked_until_resolved() {
    let c = HookCollector::new();
    c.handle_event(&HookEvent {
      name: "PostToolUse".to_string(),
      permission_decision: Some(PermissionDecision::AskUser),
    });
    let u = c.updates().recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(u.sub_state, SubState::WaitingForPermission);

    c.handle_event(&HookEvent {
      name: "PostToolUse".to_string(),
      permission_decision: Some(PermissionDecision::Allow),
    });
    let u2 = c.updates().recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(u2.sub_state, SubState::None);
  }

  #[test]
  fn unrecognized_event_name_does_not_emit() {
    let c = HookCollector::new();
    c.handle_event(&event("SomeUnknownHook"));
    assert!(c.updates().recv_timeout(Duration::from_millis(50)).is_err());
  }
}
