//! The `Message` data model: a single unit of input destined for the child.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Delivery precedence, highest first. `Ord` follows declaration order so
/// `Priority::Interrupt < Priority::Normal < ...` reads backwards from
/// delivery precedence; callers compare via [`Priority::rank`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
  Interrupt,
  Normal,
  IdleFirst,
  Idle,
}

impl Priority {
  /// All priorities in Tab-cycle order: Normal -> Interrupt -> Idle ->
  /// IdleFirst -> Normal.
  pub const CYCLE: [Priority; 4] = [
    Priority::Normal,
    Priority::Interrupt,
    Priority::Idle,
    Priority::IdleFirst,
  ];

  #[must_use]
  pub fn next(self) -> Priority {
    let idx = Self::CYCLE.iter().position(|p| *p == self).unwrap_or(0);
    Self::CYCLE[(idx + 1) % Self::CYCLE.len()]
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
  Queued,
  Delivered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
  pub id: String,
  pub from: String,
  pub priority: Priority,
  pub body: String,
  /// On-disk path where the body was spooled, if it exceeded the inline limit.
  pub file_path: Option<String>,
  pub status: MessageStatus,
  pub created_at_ms: u64,
  pub delivered_at_ms: Option<u64>,
}

impl Message {
  #[must_use]
  pub fn new(from: impl Into<String>, priority: Priority, body: impl Into<String>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      from: from.into(),
      priority,
      body: body.into(),
      file_path: None,
      status: MessageStatus::Queued,
      created_at_ms: now_ms(),
      delivered_at_ms: None,
    }
  }

  #[must_use]
  pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
    self.file_path = Some(path.into());
    self
  }

  pub fn mark_delivered(&mut self) {
    self.status = MessageStatus::Delivered;
    self.delivered_at_ms = Some(now_ms());
  }
}

pub(crate) fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}
