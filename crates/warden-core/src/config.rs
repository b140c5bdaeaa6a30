//! Runtime tunables for a supervised session.
//!
//! The core never parses a configuration file (that remains the CLI's job);
//! it only exposes a typed struct with `Default`-provided literal defaults.

use std::time::Duration;

/// Number of reserved rows at the bottom of a client's view: separator + input.
pub const RESERVED_ROWS: u16 = 2;
/// Reserved rows when the debug-keys row is enabled.
pub const RESERVED_ROWS_WITH_DEBUG: u16 = 3;

/// Maximum framed payload size accepted on the control socket.
pub const MAX_FRAME_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Inline message body limit before an inter-agent message is spooled to disk.
pub const INLINE_BODY_LIMIT_BYTES: usize = 300;

/// Size of the debug-keys ring kept per client.
pub const DEBUG_KEYS_RING_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct HeartbeatOptions {
  pub enabled: bool,
  /// How long the agent must sit in `Idle` before a nudge is enqueued.
  pub idle_for: Duration,
  /// Priority used for the enqueued nudge message.
  pub priority: crate::message::Priority,
  /// Body of the enqueued nudge message.
  pub body: String,
}

impl Default for HeartbeatOptions {
  fn default() -> Self {
    Self {
      enabled: false,
      idle_for: Duration::from_secs(300),
      priority: crate::message::Priority::IdleFirst,
      body: "heartbeat: still there?".to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
  /// Initial PTY size used in daemon mode before the first client attaches.
  pub default_rows: u16,
  pub default_cols: u16,
  /// Bound on a single PTY write before it is treated as a hang.
  pub pty_write_timeout: Duration,
  /// Quiet period on the output collector before it reports Idle.
  pub output_idle_threshold: Duration,
  /// Quiet period on the otel collector before it reports Idle.
  pub otel_idle_threshold: Duration,
  /// Debounce before a pending state change is committed (matches the
  /// output/otel collectors' idle-timer granularity).
  pub enter_idle_debounce: Duration,
  /// Sleep between writing an Interrupt's Ctrl+C and retrying.
  pub interrupt_retry_sleep: Duration,
  /// Deadline for reaching idle after an Interrupt before retrying.
  pub interrupt_idle_deadline: Duration,
  /// Maximum number of Interrupt (Ctrl+C) retries before delivering anyway.
  pub interrupt_max_retries: u32,
  /// Sleep between writing a message body and the trailing CR.
  pub submit_settle_delay: Duration,
  /// Cap on a single framed payload.
  pub max_frame_payload: usize,
  /// Inline body limit before spooling to disk.
  pub inline_body_limit: usize,
  pub heartbeat: HeartbeatOptions,
  /// Show the last N keystrokes as an extra debug row.
  pub debug_keys: bool,
}

impl Default for SupervisorOptions {
  fn default() -> Self {
    Self {
      default_rows: 24,
      default_cols: 80,
      pty_write_timeout: Duration::from_secs(3),
      output_idle_threshold: Duration::from_secs(2),
      otel_idle_threshold: Duration::from_secs(2),
      enter_idle_debounce: Duration::from_millis(500),
      interrupt_retry_sleep: Duration::from_millis(50),
      interrupt_idle_deadline: Duration::from_secs(5),
      interrupt_max_retries: 3,
      submit_settle_delay: Duration::from_millis(50),
      max_frame_payload: MAX_FRAME_PAYLOAD_BYTES,
      inline_body_limit: INLINE_BODY_LIMIT_BYTES,
      heartbeat: HeartbeatOptions::default(),
      debug_keys: false,
    }
  }
}

impl SupervisorOptions {
  #[must_use]
  pub fn reserved_rows(&self) -> u16 {
    if self.debug_keys {
      RESERVED_ROWS_WITH_DEBUG
    } else {
      RESERVED_ROWS
    }
  }
}
