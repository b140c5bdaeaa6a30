//! `OutputCollector`: signalled by `NoteOutput()` from the VT's `PipeOutput`
//! callback. An idle timer resets on every note; on fire, emits Idle.

use super::{Authority, Collector, StateUpdate};
use crate::agent::{AgentState, SubState};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Inner {
  last_note: Instant,
  generation: u64,
}

pub struct OutputCollector {
  inner: Arc<Mutex<Inner>>,
  tx: Sender<StateUpdate>,
  rx: Receiver<StateUpdate>,
  threshold: Duration,
  stop: Arc<std::sync::atomic::AtomicBool>,
}

impl OutputCollector {
  #[must_use]
  pub fn new(threshold: Duration) -> Arc<Self> {
    let (tx, rx) = bounded(1);
    let collector = Arc::new(Self {
      inner: Arc::new(Mutex::new(Inner {
        last_note: Instant::now(),
        generation: 0,
      })),
      tx,
      rx,
      threshold,
      stop: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    });
    collector.clone().spawn_timer();
    collector
  }

  /// Drain-and-replace: clears any stale pending update before sending so
  /// the consumer's next receive always observes the latest state.
  fn emit(&self, update: StateUpdate) {
    let _ = self.rx.try_recv();
    let _ = self.tx.try_send(update);
  }

  /// Called from the VT's output callback whenever a chunk is read.
  pub fn note_output(&self) {
    let mut inner = self.inner.lock();
    inner.last_note = Instant::now();
    inner.generation += 1;
    drop(inner);
    self.emit(StateUpdate {
      state: AgentState::Active,
      sub_state: SubState::None,
    });
  }

  fn spawn_timer(self: Arc<Self>) {
    thread::spawn(move || {
      loop {
        if self.stop.load(std::sync::atomic::Ordering::Relaxed) {
          return;
        }
        thread::sleep(Duration::from_millis(100));
        let (elapsed, generation_before) = {
          let inner = self.inner.lock();
          (inner.last_note.elapsed(), inner.generation)
        };
        if elapsed >= self.threshold {
          let still_same = {
            let inner = self.inner.lock();
            inner.generation == generation_before
          };
          if still_same {
            self.emit(StateUpdate {
              state: AgentState::Idle,
              sub_state: SubState::None,
            });
          }
        }
      }
    });
  }

  pub fn stop(&self) {
    self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
  }
}

impl Collector for OutputCollector {
  fn authority(&self) -> Authority {
    Authority::Output
  }

  fn updates(&self) -> Receiver<StateUpdate> {
    self.rx.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn note_output_emits_active() {
    let c = OutputCollector::new(Duration::from_secs(10));
    c.note_output();
    let update = c.updates().recv_timeout(Duration::from_millis(200)).unwrap();
    assert_eq!(update.state, AgentState::Active);
    c.stop();
  }

  #[test]
  fn timer_fires_idle_after_threshold() {
    let c = OutputCollector::new(Duration::from_millis(100));
    c.note_output();
    let _ = c.updates().recv_timeout(Duration::from_millis(200));
    let update = c
      .updates()
      .recv_timeout(Duration::from_millis(500))
      .expect("idle update");
    assert_eq!(update.state, AgentState::Idle);
    c.stop();
  }
}
