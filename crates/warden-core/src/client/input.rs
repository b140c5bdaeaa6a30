//! The mode state machine and byte dispatcher.
//!
//! Reads raw bytes off the client connection and dispatches them through
//! the full Normal/Passthrough/Menu/Scroll table, recognizing CSI sequences
//! via `csi.rs` along the way.

use super::{Client, PendingEsc};
use crate::agent::SubState;
use crate::csi::{
  Csi, MouseEventKind, SGR_MOUSE_SCROLL_DOWN, SGR_MOUSE_SCROLL_UP, is_ctrl_enter, is_ctrl_esc,
  is_shift_enter, parse_csi, parse_sgr_mouse, parse_ss3,
};
use crate::message::Priority;
use std::time::{Duration, Instant};

const PENDING_ESC_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
  Normal,
  Passthrough,
  Menu,
  Scroll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
  None,
  Redraw,
  Quit,
  Detach,
  Relaunch,
  /// A left-click (button 0) was seen in Scroll/Normal dispatch; renderer
  /// shows the "hold shift to select" hint for ~3 s.
  MouseLeftClickHint,
}

impl Client {
  /// Processes one chunk of incoming bytes, mutating mode/buffer/cursor and
  /// writing to the PTY as a side effect in passthrough/menu modes. Returns
  /// the most significant outcome observed in the chunk (later outcomes
  /// take precedence over `None`/`Redraw`).
  pub fn process_input(&mut self, bytes: &[u8]) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::None;
    let mut i = 0;
    while i < bytes.len() {
      let (consumed, step_outcome) = self.step(&bytes[i..]);
      i += consumed.max(1);
      outcome = merge(outcome, step_outcome);
    }
    outcome
  }

  /// Called periodically (e.g. every tick) so a pending ESC that never got
  /// a follow-up byte within the chunk still resolves after its timeout.
  pub fn check_pending_esc_timeout(&mut self) -> DispatchOutcome {
    let Some(deadline) = self.pending_esc_deadline else {
      return DispatchOutcome::None;
    };
    if Instant::now() < deadline {
      return DispatchOutcome::None;
    }
    match std::mem::replace(&mut self.pending_esc, PendingEsc::None) {
      PendingEsc::AwaitingFollowup => {
        self.pending_esc_deadline = None;
        if self.mode == InputMode::Passthrough {
          let _ = self.vt.write_pty(&[0x1b]);
        }
        DispatchOutcome::Redraw
      }
      other => {
        self.pending_esc = other;
        DispatchOutcome::None
      }
    }
  }

  /// Advances the dispatcher by one logical step, which may consume more
  /// than one byte (a full CSI sequence). Returns bytes consumed (always
  /// >= 1) and the resulting outcome.
  fn step(&mut self, rest: &[u8]) -> (usize, DispatchOutcome) {
    let b = rest[0];

    if let PendingEsc::AccumulatingCsi(ref mut acc) = self.pending_esc {
      acc.push(b);
      let acc_snapshot = acc.clone();
      if acc_snapshot.get(1) == Some(&b'O') {
        if let Some((final_byte, _len)) = parse_ss3(&acc_snapshot) {
          self.pending_esc = PendingEsc::None;
          self.pending_esc_deadline = None;
          let csi = Csi {
            params: String::new(),
            intermediates: String::new(),
            final_byte,
          };
          let outcome = self.handle_complete_csi(&csi, true);
          return (1, outcome);
        }
      } else if let Some((csi, _len)) = parse_csi(&acc_snapshot) {
        self.pending_esc = PendingEsc::None;
        self.pending_esc_deadline = None;
        let outcome = self.handle_complete_csi(&csi, false);
        return (1, outcome);
      }
      if acc_snapshot.len() > 32 {
        self.pending_esc = PendingEsc::None;
        self.pending_esc_deadline = None;
      }
      return (1, DispatchOutcome::None);
    }

    if let PendingEsc::AwaitingFollowup = self.pending_esc {
      self.pending_esc_deadline = None;
      if b == b'[' || b == b'O' {
        self.pending_esc = PendingEsc::AccumulatingCsi(vec![0x1b, b]);
        self.pending_esc_deadline = Some(Instant::now() + PENDING_ESC_TIMEOUT);
        return (1, DispatchOutcome::None);
      }
      self.pending_esc = PendingEsc::None;
      if self.mode == InputMode::Passthrough {
        let _ = self.vt.write_pty(&[0x1b]);
        let _ = self.vt.write_pty(&[b]);
      }
      return (1, DispatchOutcome::Redraw);
    }

    if b == 0x1b {
      self.pending_esc = PendingEsc::AwaitingFollowup;
      self.pending_esc_deadline = Some(Instant::now() + PENDING_ESC_TIMEOUT);
      return (1, DispatchOutcome::None);
    }

    let outcome = match self.mode {
      InputMode::Normal => self.dispatch_normal(b),
      InputMode::Passthrough => self.dispatch_passthrough(b),
      InputMode::Menu => self.dispatch_menu(b),
      InputMode::Scroll => self.dispatch_scroll(b),
    };
    (1, outcome)
  }

  /// Wheel step size, in lines, for SGR mouse scroll reports. Arrow-key
  /// scrolling in `InputMode::Scroll` moves by 1 line instead.
  const WHEEL_SCROLL_LINES: u16 = 3;

  fn handle_complete_csi(&mut self, csi: &Csi, is_ss3: bool) -> DispatchOutcome {
    if let Some(mouse) = parse_sgr_mouse(csi) {
      if mouse.kind == MouseEventKind::Press {
        if mouse.button == SGR_MOUSE_SCROLL_UP {
          if self.mode != InputMode::Passthrough {
            self.mode = InputMode::Scroll;
            self.scroll_offset = self.scroll_offset.saturating_add(Self::WHEEL_SCROLL_LINES);
          }
          return DispatchOutcome::Redraw;
        }
        if mouse.button == SGR_MOUSE_SCROLL_DOWN && self.mode == InputMode::Scroll {
          if self.scroll_offset == 0 {
            self.mode = InputMode::Normal;
          } else {
            self.scroll_offset = self.scroll_offset.saturating_sub(Self::WHEEL_SCROLL_LINES);
          }
          return DispatchOutcome::Redraw;
        }
        if mouse.button == crate::csi::SGR_MOUSE_BUTTON_LEFT {
          return DispatchOutcome::MouseLeftClickHint;
        }
      }
      return DispatchOutcome::Redraw;
    }

    let is_plain_arrow = csi.params.is_empty() && csi.intermediates.is_empty();

    match self.mode {
      InputMode::Normal => {
        if is_ctrl_enter(csi) {
          self.mode = InputMode::Menu;
          return DispatchOutcome::Redraw;
        }
        if is_plain_arrow {
          match csi.final_byte {
            b'A' | b'B' => {
              self.forward_csi(csi, is_ss3);
            }
            b'C' | b'D' if self.buffer.is_empty() => {
              self.forward_csi(csi, is_ss3);
            }
            _ => {}
          }
        }
        DispatchOutcome::Redraw
      }
      InputMode::Passthrough => {
        if is_shift_enter(csi) {
          let _ = self.vt.write_pty(b"\n");
        } else if is_ctrl_esc(csi) {
          self.mode = InputMode::Normal;
        } else {
          self.forward_csi(csi, is_ss3);
        }
        DispatchOutcome::Redraw
      }
      InputMode::Scroll if is_plain_arrow => {
        match csi.final_byte {
          b'A' => {
            self.scroll_offset = self.scroll_offset.saturating_add(1);
          }
          b'B' => {
            if self.scroll_offset == 0 {
              self.mode = InputMode::Normal;
            } else {
              self.scroll_offset = self.scroll_offset.saturating_sub(1);
            }
          }
          _ => {}
        }
        DispatchOutcome::Redraw
      }
      _ => DispatchOutcome::Redraw,
    }
  }

  /// Re-encodes a parsed CSI/SS3 sequence back to raw bytes and writes it to
  /// the PTY, preserving whichever form (`ESC O` vs `ESC [`) it arrived in.
  fn forward_csi(&mut self, csi: &Csi, is_ss3: bool) {
    let mut raw = vec![0x1b, if is_ss3 { b'O' } else { b'[' }];
    if !is_ss3 {
      raw.extend(csi.params.as_bytes());
      raw.extend(csi.intermediates.as_bytes());
    }
    raw.push(csi.final_byte);
    let _ = self.vt.write_pty(&raw);
  }

  fn dispatch_normal(&mut self, b: u8) -> DispatchOutcome {
    if b == b'q' && self.vt.is_exited() {
      return DispatchOutcome::Quit;
    }
    match b {
      0x1c => {
        self.mode = InputMode::Menu;
        DispatchOutcome::Redraw
      }
      0x09 => {
        self.priority = self.priority.next();
        DispatchOutcome::Redraw
      }
      0x7f | 0x08 => {
        self.backspace();
        DispatchOutcome::Redraw
      }
      0x0d => self.submit(),
      0x01 => {
        self.cursor = 0;
        DispatchOutcome::Redraw
      }
      0x05 => {
        self.cursor = self.buffer.len();
        DispatchOutcome::Redraw
      }
      0x0b => {
        self.buffer.truncate(self.cursor);
        DispatchOutcome::Redraw
      }
      0x15 => {
        self.buffer.drain(0..self.cursor);
        self.cursor = 0;
        DispatchOutcome::Redraw
      }
      0x02 if !self.buffer.is_empty() => {
        self.move_cursor_left();
        DispatchOutcome::Redraw
      }
      0x06 if !self.buffer.is_empty() => {
        self.move_cursor_right();
        DispatchOutcome::Redraw
      }
      0x20..=0x7e => {
        self.insert_byte(b);
        DispatchOutcome::Redraw
      }
      _ => {
        let _ = self.vt.write_pty(&[b]);
        DispatchOutcome::None
      }
    }
  }

  fn dispatch_passthrough(&mut self, b: u8) -> DispatchOutcome {
    match b {
      0x1c => {
        self.mode = InputMode::Normal;
        DispatchOutcome::Redraw
      }
      0x0d | 0x0a => {
        let _ = self.vt.write_pty(&[0x0d]);
        DispatchOutcome::None
      }
      _ => {
        let _ = self.vt.write_pty(&[b]);
        DispatchOutcome::None
      }
    }
  }

  fn dispatch_menu(&mut self, b: u8) -> DispatchOutcome {
    match b {
      0x1b => {
        self.mode = InputMode::Normal;
        DispatchOutcome::Redraw
      }
      b'p' | b'\r' => {
        if self.host.try_acquire_passthrough(self.id) {
          self.mode = InputMode::Passthrough;
        }
        DispatchOutcome::Redraw
      }
      b't' => {
        self.host.force_take_passthrough(self.id);
        self.mode = InputMode::Passthrough;
        DispatchOutcome::Redraw
      }
      b'c' => {
        self.buffer.clear();
        self.cursor = 0;
        self.mode = InputMode::Normal;
        DispatchOutcome::Redraw
      }
      b'r' => DispatchOutcome::Redraw,
      b'd' => {
        self.host.on_detach(self.id);
        DispatchOutcome::Detach
      }
      b'q' => DispatchOutcome::Quit,
      _ => DispatchOutcome::None,
    }
  }

  fn dispatch_scroll(&mut self, b: u8) -> DispatchOutcome {
    match b {
      b'q' => {
        self.mode = InputMode::Normal;
        self.scroll_offset = 0;
        DispatchOutcome::Redraw
      }
      0x00..=0x1f => {
        let _ = self.vt.write_pty(&[b]);
        DispatchOutcome::None
      }
      _ => DispatchOutcome::None,
    }
  }

  fn submit(&mut self) -> DispatchOutcome {
    if self.buffer.is_empty() {
      let _ = self.vt.write_pty(&[0x0d]);
      return DispatchOutcome::None;
    }
    if self.priority == Priority::Normal {
      if self.host.agent_sub_state() == SubState::WaitingForPermission {
        return DispatchOutcome::Redraw;
      }
      let _ = self.vt.write_pty(&self.buffer);
      std::thread::sleep(Duration::from_millis(50));
      let _ = self.vt.write_pty(&[0x0d]);
      self.push_to_history();
      self.buffer.clear();
      self.cursor = 0;
      return DispatchOutcome::Redraw;
    }
    let body = String::from_utf8_lossy(&self.buffer).into_owned();
    self.host.on_submit(&self.label, self.priority, body);
    self.push_to_history();
    self.buffer.clear();
    self.cursor = 0;
    DispatchOutcome::Redraw
  }

  fn push_to_history(&mut self) {
    if let Ok(s) = String::from_utf8(self.buffer.clone()) {
      self.history.push(s);
    }
    self.history_cursor = None;
    self.saved_buffer = None;
  }

  fn insert_byte(&mut self, b: u8) {
    self.buffer.insert(self.cursor, b);
    self.cursor += 1;
  }

  fn backspace(&mut self) {
    if self.cursor == 0 {
      return;
    }
    let mut start = self.cursor - 1;
    while start > 0 && is_utf8_continuation(self.buffer[start]) {
      start -= 1;
    }
    self.buffer.drain(start..self.cursor);
    self.cursor = start;
  }

  fn move_cursor_left(&mut self) {
    if self.cursor == 0 {
      return;
    }
    self.cursor -= 1;
    while self.cursor > 0 && is_utf8_continuation(self.buffer[self.cursor]) {
      self.cursor -= 1;
    }
  }

  fn move_cursor_right(&mut self) {
    if self.cursor >= self.buffer.len() {
      return;
    }
    self.cursor += 1;
    while self.cursor < self.buffer.len() && is_utf8_continuation(self.buffer[self.cursor]) {
      self.cursor += 1;
    }
  }
}

fn is_utf8_continuation(b: u8) -> bool {
  b & 0b1100_0000 == 0b1000_0000
}

fn merge(prev: DispatchOutcome, next: DispatchOutcome) -> DispatchOutcome {
  match next {
    DispatchOutcome::None => prev,
    other => other,
  }
}
