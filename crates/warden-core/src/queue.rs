//! Priority-ordered message queue: admission, ordering, pause/resume.
//!
//! Uses a single-slot `crossbeam_channel` purely as a wakeup signal (drained
//! and replaced rather than carrying payload) alongside a `parking_lot::Mutex`
//! for the FIFO sequences themselves.

use crate::message::{Message, MessageStatus, Priority};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A single-slot, lossy notification: additional `notify()` calls while one
/// is already pending are no-ops.
pub struct Notify {
  tx: Sender<()>,
  rx: Receiver<()>,
}

impl Default for Notify {
  fn default() -> Self {
    let (tx, rx) = bounded(1);
    Self { tx, rx }
  }
}

impl Notify {
  pub fn fire(&self) {
    let _ = self.tx.try_send(());
  }

  #[must_use]
  pub fn receiver(&self) -> Receiver<()> {
    self.rx.clone()
  }
}

#[derive(Default)]
struct Lanes {
  interrupt: VecDeque<String>,
  normal: VecDeque<String>,
  idle_first: VecDeque<String>,
  idle: VecDeque<String>,
}

impl Lanes {
  fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<String> {
    match priority {
      Priority::Interrupt => &mut self.interrupt,
      Priority::Normal => &mut self.normal,
      Priority::IdleFirst => &mut self.idle_first,
      Priority::Idle => &mut self.idle,
    }
  }
}

struct Inner {
  by_id: HashMap<String, Message>,
  lanes: Lanes,
  paused: bool,
}

/// Priority-ordered queue with pause flag and dequeue policy.
///
/// Dequeue policy (see module docs of the crate root for the rationale):
/// 1. `Interrupt` — eligible unless paused. Pause also halts Interrupt; the
///    bypass Interrupt gets is of the idle/blocked gates, not of pause.
/// 2. `Normal` — eligible if not paused and not blocked.
/// 3. `IdleFirst` — eligible if not paused, not blocked, and (`is_idle` or any
///    Normal-or-higher message is present, so it can also be delivered
///    eagerly while the child is already busy).
/// 4. `Idle` — eligible only if not paused, not blocked, and `is_idle`.
pub struct MessageQueue {
  inner: Mutex<Inner>,
  notify: Notify,
}

impl Default for MessageQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl MessageQueue {
  #[must_use]
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        by_id: HashMap::new(),
        lanes: Lanes::default(),
        paused: false,
      }),
      notify: Notify::default(),
    }
  }

  pub fn enqueue(&self, msg: Message) {
    let mut inner = self.inner.lock();
    inner.lanes.lane_mut(msg.priority).push_back(msg.id.clone());
    inner.by_id.insert(msg.id.clone(), msg);
    drop(inner);
    self.notify.fire();
  }

  /// Returns the next eligible message, if any, removing it from its lane.
  /// The message is left in `by_id` (now possibly about to be marked
  /// Delivered by the caller) so `lookup` keeps working afterwards.
  pub fn dequeue(&self, is_idle: bool, is_blocked: bool) -> Option<Message> {
    let mut inner = self.inner.lock();
    if inner.paused {
      return None;
    }

    if let Some(id) = inner.lanes.interrupt.pop_front() {
      return inner.by_id.get(&id).cloned();
    }

    if is_blocked {
      return None;
    }

    if let Some(id) = inner.lanes.normal.pop_front() {
      return inner.by_id.get(&id).cloned();
    }

    let normal_or_higher_present = !inner.lanes.normal.is_empty();
    if is_idle || normal_or_higher_present {
      if let Some(id) = inner.lanes.idle_first.pop_front() {
        return inner.by_id.get(&id).cloned();
      }
    }

    if is_idle {
      if let Some(id) = inner.lanes.idle.pop_front() {
        return inner.by_id.get(&id).cloned();
      }
    }

    None
  }

  pub fn pause(&self) {
    self.inner.lock().paused = true;
  }

  pub fn unpause(&self) {
    self.inner.lock().paused = false;
    self.notify.fire();
  }

  #[must_use]
  pub fn is_paused(&self) -> bool {
    self.inner.lock().paused
  }

  #[must_use]
  pub fn lookup(&self, id: &str) -> Option<Message> {
    self.inner.lock().by_id.get(id).cloned()
  }

  pub fn mark_delivered(&self, id: &str) {
    if let Some(m) = self.inner.lock().by_id.get_mut(id) {
      m.mark_delivered();
    }
  }

  #[must_use]
  pub fn pending_count(&self) -> usize {
    let inner = self.inner.lock();
    inner.lanes.interrupt.len()
      + inner.lanes.normal.len()
      + inner.lanes.idle_first.len()
      + inner.lanes.idle.len()
  }

  #[must_use]
  pub fn notify_receiver(&self) -> Receiver<()> {
    self.notify.receiver()
  }

  pub fn notify(&self) {
    self.notify.fire();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn msg(priority: Priority, body: &str) -> Message {
    Message::new("tester", priority, body)
  }

  #[test]
  fn dequeue_prefers_interrupt_over_everything() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::Normal, "n"));
    q.enqueue(msg(Priority::Interrupt, "i"));
    let got = q.dequeue(false, false).unwrap();
    assert_eq!(got.body, "i");
  }

  #[test]
  fn normal_blocked_when_paused() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::Normal, "n"));
    q.pause();
    assert!(q.dequeue(false, false).is_none());
  }

  #[test]
  fn interrupt_also_blocked_when_paused() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::Interrupt, "i"));
    q.pause();
    assert!(q.dequeue(false, false).is_none());
  }

  #[test]
  fn idle_only_priority_yields_none_when_busy() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::Idle, "i"));
    assert!(q.dequeue(false, false).is_none());
    let got = q.dequeue(true, false).unwrap();
    assert_eq!(got.body, "i");
  }

  #[test]
  fn idle_first_goes_first_when_idle_but_yields_to_normal_when_busy() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::IdleFirst, "first"));
    // Busy, no normal message present: IdleFirst still not eligible.
    assert!(q.dequeue(false, false).is_none());
    // Idle: IdleFirst becomes eligible.
    let got = q.dequeue(true, false).unwrap();
    assert_eq!(got.body, "first");
  }

  #[test]
  fn idle_first_delivered_eagerly_when_normal_present_even_if_busy() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::IdleFirst, "first"));
    q.enqueue(msg(Priority::Normal, "normal"));
    // Normal dequeues before IdleFirst regardless.
    let first = q.dequeue(false, false).unwrap();
    assert_eq!(first.body, "normal");
  }

  #[test]
  fn blocked_gates_normal_and_idle_first_but_not_interrupt() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::Interrupt, "i"));
    q.enqueue(msg(Priority::Normal, "n"));
    let got = q.dequeue(true, true).unwrap();
    assert_eq!(got.body, "i");
    assert!(q.dequeue(true, true).is_none());
  }

  #[test]
  fn pause_then_unpause_is_identity_on_eligibility() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::Normal, "n"));
    q.pause();
    q.unpause();
    let got = q.dequeue(false, false).unwrap();
    assert_eq!(got.body, "n");
  }

  #[test]
  fn lookup_finds_message_after_delivery() {
    let q = MessageQueue::new();
    q.enqueue(msg(Priority::Normal, "n"));
    let got = q.dequeue(false, false).unwrap();
    q.mark_delivered(&got.id);
    let found = q.lookup(&got.id).unwrap();
    assert_eq!(found.status, MessageStatus::Delivered);
  }
}
