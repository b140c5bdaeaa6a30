//! Client: per-viewer UI state. Interprets incoming bytes, renders the
//! shared VT screen plus a status bar and editable input line.
//!
//! Owns an output sink and a capability object (`ClientHost`) injected by
//! the composition root, and drives the Normal/Passthrough/Menu/Scroll mode
//! state machine on top of it.

mod input;
mod render;

pub use input::{DispatchOutcome, InputMode};
pub use render::RenderColors;

use crate::agent::SubState;
use crate::message::Priority;
use crate::queue::MessageQueue;
use crate::vt::Vt;
use std::sync::Arc;

/// Capability object the Client holds instead of individual callback
/// fields.
pub trait ClientHost: Send + Sync {
  fn on_submit(&self, from: &str, priority: Priority, body: String);
  fn on_relaunch(&self);
  fn on_detach(&self, client_id: u64);
  fn queue_status(&self) -> (usize, bool);
  fn otel_metrics(&self) -> Option<(u64, f64)>;
  fn is_passthrough_locked_by_other(&self, client_id: u64) -> bool;
  fn try_acquire_passthrough(&self, client_id: u64) -> bool;
  fn force_take_passthrough(&self, client_id: u64);
  fn release_passthrough(&self, client_id: u64);
  fn agent_sub_state(&self) -> SubState;
  fn agent_name(&self) -> String;
}

pub const DEBUG_KEYS_RING_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingEsc {
  None,
  /// A bare ESC was seen; waiting (with a deadline) for a follow-up byte
  /// that decides whether this becomes a CSI/SS3 sequence or a literal ESC.
  AwaitingFollowup,
  /// `ESC [` or `ESC O` seen; accumulating a CSI/SS3 sequence.
  AccumulatingCsi(Vec<u8>),
}

pub struct Client {
  pub id: u64,
  pub buffer: Vec<u8>,
  pub cursor: usize,
  pub history: Vec<String>,
  pub history_cursor: Option<usize>,
  pub saved_buffer: Option<String>,
  pub mode: InputMode,
  pub priority: Priority,
  pub scroll_offset: u16,
  pub pending_esc: PendingEsc,
  pub pending_esc_deadline: Option<std::time::Instant>,
  pub debug_keys: std::collections::VecDeque<String>,
  pub debug_keys_enabled: bool,
  pub vt: Arc<Vt>,
  pub queue: Arc<MessageQueue>,
  pub host: Arc<dyn ClientHost>,
  pub label: String,
}

impl Client {
  #[must_use]
  pub fn new(
    id: u64,
    label: String,
    vt: Arc<Vt>,
    queue: Arc<MessageQueue>,
    host: Arc<dyn ClientHost>,
    debug_keys_enabled: bool,
  ) -> Self {
    Self {
      id,
      buffer: Vec::new(),
      cursor: 0,
      history: Vec::new(),
      history_cursor: None,
      saved_buffer: None,
      mode: InputMode::Normal,
      priority: Priority::Normal,
      scroll_offset: 0,
      pending_esc: PendingEsc::None,
      pending_esc_deadline: None,
      debug_keys: std::collections::VecDeque::with_capacity(DEBUG_KEYS_RING_LEN),
      debug_keys_enabled,
      vt,
      queue,
      host,
      label,
    }
  }

  pub fn push_debug_key(&mut self, symbolic: String) {
    if self.debug_keys.len() == DEBUG_KEYS_RING_LEN {
      self.debug_keys.pop_front();
    }
    self.debug_keys.push_back(symbolic);
  }

  #[must_use]
  pub fn reserved_rows(&self) -> u16 {
    if self.debug_keys_enabled {
      crate::config::RESERVED_ROWS_WITH_DEBUG
    } else {
      crate::config::RESERVED_ROWS
    }
  }
}
