//! DeliveryLoop: drains the queue into the PTY with idle gating, interrupt
//! retries, and blocked-state gating.
//!
//! The interrupt path reuses a wait-for-state debounce pattern (a condition
//! observed across a deadline, retried a bounded number of times) for its
//! write/observe/retry cycle.

use crate::agent::{Agent, AgentState};
use crate::config::SupervisorOptions;
use crate::message::{Message, Priority};
use crate::queue::MessageQueue;
use crate::vt::Vt;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const INLINE_BODY_LIMIT: usize = crate::config::INLINE_BODY_LIMIT_BYTES;

pub trait DeliveryObserver: Send + Sync {
  fn on_interrupt_sent(&self) {}
  fn on_delivered(&self, _message: &Message) {}
}

pub struct NullObserver;
impl DeliveryObserver for NullObserver {}

pub struct DeliveryLoop {
  queue: Arc<MessageQueue>,
  vt: Arc<Vt>,
  agent: Arc<Agent>,
  options: SupervisorOptions,
  observer: Arc<dyn DeliveryObserver>,
  is_blocked: Arc<dyn Fn() -> bool + Send + Sync>,
  stop: Arc<AtomicBool>,
}

impl DeliveryLoop {
  #[must_use]
  pub fn new(
    queue: Arc<MessageQueue>,
    vt: Arc<Vt>,
    agent: Arc<Agent>,
    options: SupervisorOptions,
    observer: Arc<dyn DeliveryObserver>,
    is_blocked: Arc<dyn Fn() -> bool + Send + Sync>,
  ) -> Self {
    Self {
      queue,
      vt,
      agent,
      options,
      observer,
      is_blocked,
      stop: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn stop(&self) {
    self.stop.store(true, Ordering::Relaxed);
    self.queue.notify();
  }

  /// Runs until `stop()` is called, alternating between the queue's change
  /// notification and a 1-second periodic tick so idle gates get
  /// re-evaluated even with no new enqueues.
  pub fn run(&self) {
    let notify_rx = self.queue.notify_receiver();
    loop {
      if self.stop.load(Ordering::Relaxed) {
        return;
      }
      let _ = notify_rx.recv_timeout(Duration::from_secs(1));
      if self.stop.load(Ordering::Relaxed) {
        return;
      }
      while let Some(msg) = self.try_dequeue_one() {
        self.deliver(msg);
        if self.stop.load(Ordering::Relaxed) {
          return;
        }
      }
    }
  }

  fn try_dequeue_one(&self) -> Option<Message> {
    let is_idle = matches!(self.agent.state().0, AgentState::Idle);
    let is_blocked = (self.is_blocked)();
    self.queue.dequeue(is_idle, is_blocked)
  }

  fn is_idle_now(&self) -> bool {
    matches!(self.agent.state().0, AgentState::Idle)
  }

  fn wait_for_idle(&self, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
      if self.is_idle_now() {
        return true;
      }
      if self.stop.load(Ordering::Relaxed) {
        return false;
      }
      thread::sleep(Duration::from_millis(50));
    }
    self.is_idle_now()
  }

  fn deliver(&self, mut msg: Message) {
    if msg.priority == Priority::Interrupt {
      let mut reached_idle = false;
      for attempt in 1..=self.options.interrupt_max_retries {
        if self.vt.write_pty(&[0x03]).is_err() {
          warn!("interrupt write failed on attempt {attempt}");
        }
        self.observer.on_interrupt_sent();
        if self.wait_for_idle(self.options.interrupt_idle_deadline) {
          reached_idle = true;
          break;
        }
        thread::sleep(self.options.interrupt_retry_sleep);
      }
      if !reached_idle {
        info!("interrupt did not reach idle after retries; sending body anyway");
      }
    }

    let payload = self.render_body(&msg);
    if self.vt.write_pty(payload.as_bytes()).is_err() {
      return;
    }
    thread::sleep(self.options.submit_settle_delay);
    let _ = self.vt.write_pty(&[0x0d]);

    msg.mark_delivered();
    self.queue.mark_delivered(&msg.id);
    self.observer.on_delivered(&msg);
  }

  fn render_body(&self, msg: &Message) -> String {
    let Some(file_path) = &msg.file_path else {
      return msg.body.clone();
    };
    let prefix = if msg.priority == Priority::Interrupt {
      "URGENT h2 message"
    } else {
      "h2 message"
    };
    let payload = if msg.body.len() <= INLINE_BODY_LIMIT {
      msg.body.clone()
    } else {
      format!("Read {file_path}")
    };
    format!("[{prefix} from: {}] {payload}", msg.from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::osc::CachedColor;
  use crate::vt::SpawnSpec;
  use std::sync::Mutex;

  fn make_vt() -> Arc<Vt> {
    Vt::start(
      SpawnSpec {
        program: "cat".to_string(),
        args: Vec::new(),
        cwd: std::env::temp_dir(),
        extra_env: Vec::new(),
      },
      24,
      80,
      2,
      Duration::from_secs(3),
      CachedColor::white(),
      CachedColor::black(),
    )
    .expect("spawn cat")
  }

  struct RecordingObserver {
    delivered: Mutex<Vec<String>>,
  }

  impl DeliveryObserver for RecordingObserver {
    fn on_delivered(&self, message: &Message) {
      self.delivered.lock().unwrap().push(message.id.clone());
    }
  }

  #[test]
  fn render_body_uses_urgent_prefix_for_interrupt_with_file_path() {
    let queue = Arc::new(MessageQueue::new());
    let vt = make_vt();
    let agent = Agent::new(Duration::from_secs(10), None, false);
    let loop_ = DeliveryLoop::new(
      queue,
      vt.clone(),
      agent,
      SupervisorOptions::default(),
      Arc::new(NullObserver),
      Arc::new(|| false),
    );
    let mut m = Message::new("peer", Priority::Interrupt, "short body").with_file_path("/tmp/x.md");
    m.file_path = Some("/tmp/x.md".to_string());
    let rendered = loop_.render_body(&m);
    assert_eq!(rendered, "[URGENT h2 message from: peer] short body");
    vt.kill_child();
  }

  #[test]
  fn render_body_truncates_to_read_pointer_over_inline_limit() {
    let queue = Arc::new(MessageQueue::new());
    let vt = make_vt();
    let agent = Agent::new(Duration::from_secs(10), None, false);
    let loop_ = DeliveryLoop::new(
      queue,
      vt.clone(),
      agent,
      SupervisorOptions::default(),
      Arc::new(NullObserver),
      Arc::new(|| false),
    );
    let big_body = "x".repeat(INLINE_BODY_LIMIT + 1);
    let m = Message::new("peer", Priority::Normal, big_body).with_file_path("/tmp/big.md");
    let rendered = loop_.render_body(&m);
    assert_eq!(rendered, "[h2 message from: peer] Read /tmp/big.md");
    vt.kill_child();
  }

  #[test]
  fn raw_local_input_has_no_envelope() {
    let queue = Arc::new(MessageQueue::new());
    let vt = make_vt();
    let agent = Agent::new(Duration::from_secs(10), None, false);
    let loop_ = DeliveryLoop::new(
      queue,
      vt.clone(),
      agent,
      SupervisorOptions::default(),
      Arc::new(NullObserver),
      Arc::new(|| false),
    );
    let m = Message::new("peer", Priority::Normal, "hello");
    assert_eq!(loop_.render_body(&m), "hello");
    vt.kill_child();
  }

  #[test]
  fn delivering_a_message_marks_it_delivered_and_notifies_observer() {
    let queue = Arc::new(MessageQueue::new());
    let vt = make_vt();
    let agent = Agent::new(Duration::from_secs(10), None, false);
    let observer = Arc::new(RecordingObserver {
      delivered: Mutex::new(Vec::new()),
    });
    let loop_ = DeliveryLoop::new(
      queue.clone(),
      vt.clone(),
      agent,
      SupervisorOptions::default(),
      observer.clone(),
      Arc::new(|| false),
    );
    let m = Message::new("peer", Priority::Normal, "hi");
    let id = m.id.clone();
    queue.enqueue(m);
    let dequeued = queue.dequeue(false, false).unwrap();
    loop_.deliver(dequeued);
    assert_eq!(observer.delivered.lock().unwrap().as_slice(), &[id.clone()]);
    assert_eq!(queue.lookup(&id).unwrap().status, crate::message::MessageStatus::Delivered);
    vt.kill_child();
  }
}
