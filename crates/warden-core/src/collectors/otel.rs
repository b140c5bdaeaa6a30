//! `OtelCollector`: identical Active/Idle dynamics to `OutputCollector` but
//! signalled by a pluggable `TelemetryParser` recognizing `event.name` on
//! incoming telemetry records, for agent commands that do silent work with
//! no visible screen change. Also the home of telemetry metrics
//! accumulation, kept adjacent because both are fed by the same wire
//! records.

use super::{Authority, Collector, StateUpdate};
use crate::agent::{AgentState, SubState};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Maps a raw telemetry log record into a `MetricsDelta`, kept wire-schema
/// agnostic — the exact Claude Code OTEL attribute schema is not part of
/// this core.
pub trait TelemetryParser: Send + Sync {
  fn parse(&self, record: &Value) -> Option<MetricsDelta>;
}

#[derive(Debug, Clone, Default)]
pub struct MetricsDelta {
  pub input_tokens: u64,
  pub output_tokens: u64,
  pub cost_usd: f64,
  pub tool_name: Option<String>,
  pub model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
  pub input_tokens: u64,
  pub output_tokens: u64,
  pub total_tokens: u64,
  pub cost_usd: f64,
  pub tool_invocations: HashMap<String, u64>,
  pub per_model_cost_usd: HashMap<String, f64>,
  pub per_model_tokens: HashMap<String, u64>,
  /// Distinguishes "no telemetry configured" from "configured, no data yet".
  pub events_received: bool,
}

struct MetricsInner {
  snapshot: MetricsSnapshot,
}

#[derive(Clone)]
pub struct Metrics {
  inner: Arc<Mutex<MetricsInner>>,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      inner: Arc::new(Mutex::new(MetricsInner {
        snapshot: MetricsSnapshot::default(),
      })),
    }
  }
}

impl Metrics {
  pub fn apply(&self, delta: &MetricsDelta) {
    let mut inner = self.inner.lock();
    let snap = &mut inner.snapshot;
    snap.events_received = true;
    snap.input_tokens += delta.input_tokens;
    snap.output_tokens += delta.output_tokens;
    snap.total_tokens = snap.input_tokens + snap.output_tokens;
    snap.cost_usd += delta.cost_usd;
    if let Some(tool) = &delta.tool_name {
      *snap.tool_invocations.entry(tool.clone()).or_insert(0) += 1;
    }
    if let Some(model) = &delta.model {
      *snap.per_model_cost_usd.entry(model.clone()).or_insert(0.0) += delta.cost_usd;
      *snap.per_model_tokens.entry(model.clone()).or_insert(0) +=
        delta.input_tokens + delta.output_tokens;
    }
  }

  /// Deep-copied snapshot, safe to hand to a renderer without holding a lock.
  #[must_use]
  pub fn snapshot(&self) -> MetricsSnapshot {
    self.inner.lock().snapshot.clone()
  }
}

struct Inner {
  last_event: Instant,
  generation: u64,
}

pub struct OtelCollector {
  inner: Arc<Mutex<Inner>>,
  tx: Sender<StateUpdate>,
  rx: Receiver<StateUpdate>,
  threshold: Duration,
  parser: Arc<dyn TelemetryParser>,
  metrics: Metrics,
  stop: Arc<AtomicBool>,
}

impl OtelCollector {
  #[must_use]
  pub fn new(threshold: Duration, parser: Arc<dyn TelemetryParser>) -> Arc<Self> {
    let (tx, rx) = bounded(1);
    let collector = Arc::new(Self {
      inner: Arc::new(Mutex::new(Inner {
        last_event: Instant::now(),
        generation: 0,
      })),
      tx,
      rx,
      threshold,
      parser,
      metrics: Metrics::default(),
      stop: Arc::new(AtomicBool::new(false)),
    });
    collector.clone().spawn_timer();
    collector
  }

  #[must_use]
  pub fn metrics(&self) -> Metrics {
    self.metrics.clone()
  }

  fn emit(&self, update: StateUpdate) {
    let _ = self.rx.try_recv();
    let _ = self.tx.try_send(update);
  }

  /// Feeds one raw telemetry record. Returns `true` if it carried an
  /// `event.name` attribute and thus counted as an activity signal.
  pub fn record(&self, record: &Value) -> bool {
    let has_event_name = record.get("event.name").is_some()
      || record
        .get("attributes")
        .and_then(|a| a.get("event.name"))
        .is_some();

    if let Some(delta) = self.parser.parse(record) {
      self.metrics.apply(&delta);
    }

    if has_event_name {
      let mut inner = self.inner.lock();
      inner.last_event = Instant::now();
      inner.generation += 1;
      drop(inner);
      self.emit(StateUpdate {
        state: AgentState::Active,
        sub_state: SubState::None,
      });
    }
    has_event_name
  }

  fn spawn_timer(self: Arc<Self>) {
    thread::spawn(move || {
      loop {
        if self.stop.load(Ordering::Relaxed) {
          return;
        }
        thread::sleep(Duration::from_millis(100));
        let (elapsed, generation_before) = {
          let inner = self.inner.lock();
          (inner.last_event.elapsed(), inner.generation)
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
    self.stop.store(true, Ordering::Relaxed);
  }
}

impl Collector for OtelCollector {
  fn authority(&self) -> Authority {
    Authority::Otel
  }

  fn updates(&self) -> Receiver<StateUpdate> {
    self.rx.clone()
  }
}

/// A permissive parser matching a Claude-Code-shaped record:
/// `{"usage": {"input_tokens", "output_tokens"}, "cost_usd", "tool_name",
/// "model"}` attributes alongside `event.name`.
pub struct GenericUsageParser;

impl TelemetryParser for GenericUsageParser {
  fn parse(&self, record: &Value) -> Option<MetricsDelta> {
    let attrs = record.get("attributes").unwrap_or(record);
    let input_tokens = attrs.get("usage.input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output_tokens = attrs.get("usage.output_tokens").and_then(Value::as_u64).unwrap_or(0);
    let cost_usd = attrs.get("cost_usd").and_then(Value::as_f64).unwrap_or(0.0);
    let tool_name = attrs
      .get("tool_name")
      .and_then(Value::as_str)
      .map(str::to_string);
    let model = attrs.get("model").and_then(Value::as_str).map(str::to_string);
    if input_tokens == 0 && output_tokens == 0 && cost_usd == 0.0 && tool_name.is_none() {
      return None;
    }
    Some(MetricsDelta {
      input_tokens,
      output_tokens,
      cost_usd,
      tool_name,
      model,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn record_with_event_name_emits_active_and_counts_as_signal() {
    let c = OtelCollector::new(Duration::from_secs(10), Arc::new(GenericUsageParser));
    let was_signal = c.record(&json!({"attributes": {"event.name": "api_request"}}));
    assert!(was_signal);
    let update = c.updates().recv_timeout(Duration::from_millis(200)).unwrap();
    assert_eq!(update.state, AgentState::Active);
    c.stop();
  }

  #[test]
  fn record_without_event_name_is_not_a_signal() {
    let c = OtelCollector::new(Duration::from_secs(10), Arc::new(GenericUsageParser));
    let was_signal = c.record(&json!({"attributes": {"usage.input_tokens": 5}}));
    assert!(!was_signal);
    c.stop();
  }

  #[test]
  fn metrics_accumulate_across_records() {
    let c = OtelCollector::new(Duration::from_secs(10), Arc::new(GenericUsageParser));
    c.record(&json!({"attributes": {"usage.input_tokens": 10, "usage.output_tokens": 20, "cost_usd": 0.5, "model": "m1"}}));
    c.record(&json!({"attributes": {"usage.input_tokens": 5, "cost_usd": 0.1, "model": "m1"}}));
    let snap = c.metrics().snapshot();
    assert_eq!(snap.input_tokens, 15);
    assert_eq!(snap.output_tokens, 20);
    assert!((snap.cost_usd - 0.6).abs() < 1e-9);
    assert!(snap.events_received);
    c.stop();
  }
}
