//! Heartbeat task: watches an `Agent`'s combined state stream and, after it
//! has sat in `Idle` for `HeartbeatOptions::idle_for`, enqueues a single nudge
//! message so a supervised agent that went quiet without exiting gets
//! prompted rather than supervised forever in silence.
//!
//! Grounded on the same idle-timer idiom as `collectors/output.rs`
//! (last-observed timestamp plus a polling thread) but driven by the
//! `Agent`'s already-arbitrated state rather than raw PTY output, and firing
//! at most once per idle span rather than repeating on every tick.

use crate::agent::{Agent, AgentState};
use crate::config::HeartbeatOptions;
use crate::message::Message;
use crate::queue::MessageQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const HEARTBEAT_FROM: &str = "heartbeat";

pub struct Heartbeat {
  stop: Arc<AtomicBool>,
}

impl Heartbeat {
  /// Spawns the watcher thread. A no-op (returns a handle whose `stop` is a
  /// harmless flag flip) when `options.enabled` is false, so callers can
  /// unconditionally construct and hold on to a `Heartbeat`.
  #[must_use]
  pub fn spawn(agent: Arc<Agent>, queue: Arc<MessageQueue>, options: HeartbeatOptions) -> Self {
    let stop = Arc::new(AtomicBool::new(false));
    if !options.enabled {
      return Self { stop };
    }

    let stop_for_thread = stop.clone();
    thread::spawn(move || {
      let mut went_idle_at: Option<Instant> = None;
      let mut nudged_this_span = false;
      loop {
        if stop_for_thread.load(Ordering::Relaxed) {
          return;
        }
        thread::sleep(POLL_INTERVAL);

        let (state, _) = agent.state();
        match state {
          AgentState::Idle => {
            let since = *went_idle_at.get_or_insert_with(Instant::now);
            if !nudged_this_span && since.elapsed() >= options.idle_for {
              queue.enqueue(Message::new(HEARTBEAT_FROM, options.priority, options.body.clone()));
              nudged_this_span = true;
            }
          }
          AgentState::Exited => return,
          _ => {
            went_idle_at = None;
            nudged_this_span = false;
          }
        }
      }
    });

    Self { stop }
  }

  pub fn stop(&self) {
    self.stop.store(true, Ordering::Relaxed);
  }
}
