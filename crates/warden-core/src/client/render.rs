//! Frame composition: one byte buffer per render, written to the client's
//! output sink in a single write so a slow sink never tears a frame.
//!
//! Assembles one ANSI byte buffer per frame: the VT viewport, a mode-colored
//! separator line, the editable input row, and an optional debug row.

use super::{Client, InputMode};
use crate::agent::SubState;
use std::time::Duration;

pub struct RenderColors;

impl RenderColors {
  pub const PASSTHROUGH: &'static str = "\x1b[43;30m"; // yellow bg
  pub const MENU: &'static str = "\x1b[44;37m"; // blue bg
  pub const SCROLL_OR_NORMAL: &'static str = "\x1b[46;30m"; // cyan bg
  pub const EXITED: &'static str = "\x1b[41;37m"; // red bg
  pub const RESET: &'static str = "\x1b[0m";
  pub const PROMPT_NORMAL: &'static str = "\x1b[36m"; // cyan fg
  pub const PROMPT_INTERRUPT: &'static str = "\x1b[31m"; // red fg
}

fn clear_line() -> &'static str {
  "\x1b[2K"
}

fn move_to(row: u16, col: u16) -> String {
  format!("\x1b[{};{}H", row + 1, col + 1)
}

impl Client {
  /// Assembles one full frame: content rows, separator bar, input row, and
  /// an optional debug row. `exit_reason`, when set, overrides the bar
  /// color/label regardless of `self.mode` and is shown verbatim.
  #[must_use]
  pub fn render_frame(&self, cols: u16, idle_for: Option<Duration>, exit_reason: Option<&str>) -> Vec<u8> {
    let (_rows, vt_cols, child_rows) = self.vt.dims();
    let cols = if cols == 0 { vt_cols } else { cols };
    let mut out = Vec::new();
    out.extend_from_slice(b"\x1b[?25l"); // hide cursor

    let (cursor_y, _cursor_x) = if self.mode == InputMode::Scroll {
      self.vt.scrollback.cursor_position()
    } else {
      self.vt.live.cursor_position()
    };

    let screen: &dyn crate::screen::Screen = if self.mode == InputMode::Scroll {
      self.vt.scrollback.as_ref()
    } else {
      self.vt.live.as_ref()
    };

    let anchor = if self.mode == InputMode::Scroll {
      (cursor_y as i64 - i64::from(child_rows) + 1 - i64::from(self.scroll_offset)).max(0) as u16
    } else {
      (cursor_y as i64 - i64::from(child_rows) + 1).max(0) as u16
    };

    for (row_idx, row) in screen.rows(anchor, child_rows).into_iter().enumerate() {
      out.extend_from_slice(move_to(row_idx as u16, 0).as_bytes());
      out.extend_from_slice(clear_line().as_bytes());
      out.extend_from_slice(&row);
    }

    self.render_separator(&mut out, child_rows, cols, idle_for, exit_reason);
    self.render_input_row(&mut out, child_rows + 1, cols);
    if self.debug_keys_enabled {
      self.render_debug_row(&mut out, child_rows + 2, cols);
    }

    out
  }

  fn mode_color(&self, exit_reason: Option<&str>) -> (&'static str, String) {
    if let Some(reason) = exit_reason {
      return (RenderColors::EXITED, reason.to_string());
    }
    match self.mode {
      InputMode::Passthrough => (RenderColors::PASSTHROUGH, "Passthrough".to_string()),
      InputMode::Menu => (RenderColors::MENU, "Menu".to_string()),
      InputMode::Scroll | InputMode::Normal => (RenderColors::SCROLL_OR_NORMAL, "Normal".to_string()),
    }
  }

  fn render_separator(
    &self,
    out: &mut Vec<u8>,
    row: u16,
    cols: u16,
    idle_for: Option<Duration>,
    exit_reason: Option<&str>,
  ) {
    let exited = exit_reason.is_some();
    let (color, mode_label) = self.mode_color(exit_reason);
    let activity = match idle_for {
      Some(d) if !exited => format!("Idle {}s", d.as_secs()),
      None if !exited => {
        let sub = sub_state_label(self.host.agent_sub_state());
        if sub.is_empty() {
          "Active".to_string()
        } else {
          format!("Active ({sub})")
        }
      }
      _ => String::new(),
    };

    let queue_label = {
      let (pending, paused) = self.host.queue_status();
      if paused {
        format!("[{pending} paused]")
      } else if pending > 0 {
        format!("[{pending} queued]")
      } else {
        String::new()
      }
    };

    let metrics_label = self
      .host
      .otel_metrics()
      .map(|(tokens, cost)| format!("{tokens}tok ${cost:.2}"))
      .unwrap_or_default();

    let help = match self.mode {
      InputMode::Menu if self.host.is_passthrough_locked_by_other(self.id) => {
        "[p]assthrough LOCKED [t]ake [c]lear [r]edraw [d]etach [q]uit".to_string()
      }
      InputMode::Menu => "[p]assthrough [c]lear [r]edraw [d]etach [q]uit".to_string(),
      InputMode::Scroll => "arrows/wheel scroll, q exit".to_string(),
      InputMode::Passthrough => "Ctrl+\\ or Ctrl+Esc to exit".to_string(),
      InputMode::Normal => "Ctrl+\\ menu, Tab priority".to_string(),
    };

    let agent_name = self.host.agent_name();

    let mut label = format!(" {mode_label} ");
    if !activity.is_empty() {
      label.push_str(&activity);
      label.push(' ');
    }
    if !metrics_label.is_empty() {
      label.push_str(&metrics_label);
      label.push(' ');
    }
    if !queue_label.is_empty() {
      label.push_str(&queue_label);
      label.push(' ');
    }

    let budget = cols as usize;
    let mut right = agent_name.clone();
    let mut middle = help.clone();
    if label.chars().count() + middle.chars().count() + right.chars().count() + 2 > budget {
      middle.clear();
    }
    if label.chars().count() + middle.chars().count() + right.chars().count() + 2 > budget {
      right.clear();
    }

    let mut line = format!("{label}{middle}");
    let used = line.chars().count() + right.chars().count();
    if used < budget {
      line.push_str(&" ".repeat(budget - used));
    }
    line.push_str(&right);
    let line: String = line.chars().take(budget).collect();

    out.extend_from_slice(move_to(row, 0).as_bytes());
    out.extend_from_slice(color.as_bytes());
    out.extend_from_slice(clear_line().as_bytes());
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(RenderColors::RESET.as_bytes());
  }

  fn render_input_row(&self, out: &mut Vec<u8>, row: u16, cols: u16) {
    let prompt_color = match self.priority {
      crate::message::Priority::Interrupt => RenderColors::PROMPT_INTERRUPT,
      _ => RenderColors::PROMPT_NORMAL,
    };
    let prompt = format!("{} > ", priority_label(self.priority));
    out.extend_from_slice(move_to(row, 0).as_bytes());
    out.extend_from_slice(clear_line().as_bytes());
    out.extend_from_slice(prompt_color.as_bytes());
    out.extend_from_slice(prompt.as_bytes());
    out.extend_from_slice(RenderColors::RESET.as_bytes());

    let text = String::from_utf8_lossy(&self.buffer);
    let runes: Vec<char> = text.chars().collect();
    let cursor_rune = String::from_utf8_lossy(&self.buffer[..self.cursor]).chars().count();

    let window_width = (cols as usize).saturating_sub(prompt.chars().count()).max(1);
    let window_start = cursor_rune.saturating_sub(window_width.saturating_sub(1));
    let window_end = (window_start + window_width).min(runes.len());
    let visible: String = runes[window_start..window_end].iter().collect();
    out.extend_from_slice(visible.as_bytes());

    let cursor_col = prompt.chars().count() + (cursor_rune - window_start);
    out.extend_from_slice(move_to(row, cursor_col as u16).as_bytes());
    out.extend_from_slice(b"\x1b[?25h"); // show cursor
  }

  fn render_debug_row(&self, out: &mut Vec<u8>, row: u16, _cols: u16) {
    out.extend_from_slice(move_to(row, 0).as_bytes());
    out.extend_from_slice(clear_line().as_bytes());
    let joined = self
      .debug_keys
      .iter()
      .cloned()
      .collect::<Vec<_>>()
      .join(" ");
    out.extend_from_slice(joined.as_bytes());
  }
}

fn priority_label(p: crate::message::Priority) -> &'static str {
  match p {
    crate::message::Priority::Interrupt => "interrupt",
    crate::message::Priority::Normal => "normal",
    crate::message::Priority::IdleFirst => "idle-first",
    crate::message::Priority::Idle => "idle",
  }
}

fn sub_state_label(s: SubState) -> &'static str {
  match s {
    SubState::None => "",
    SubState::Thinking => "thinking",
    SubState::ToolUse => "tool use",
    SubState::WaitingForPermission => "waiting for permission",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::ClientHost;
  use crate::message::Priority;
  use crate::osc::CachedColor;
  use crate::queue::MessageQueue;
  use crate::vt::{SpawnSpec, Vt};
  use std::sync::Arc;

  struct NullHost;
  impl ClientHost for NullHost {
    fn on_submit(&self, _from: &str, _priority: Priority, _body: String) {}
    fn on_relaunch(&self) {}
    fn on_detach(&self, _client_id: u64) {}
    fn queue_status(&self) -> (usize, bool) {
      (0, false)
    }
    fn otel_metrics(&self) -> Option<(u64, f64)> {
      None
    }
    fn is_passthrough_locked_by_other(&self, _client_id: u64) -> bool {
      false
    }
    fn try_acquire_passthrough(&self, _client_id: u64) -> bool {
      true
    }
    fn force_take_passthrough(&self, _client_id: u64) {}
    fn release_passthrough(&self, _client_id: u64) {}
    fn agent_sub_state(&self) -> SubState {
      SubState::None
    }
    fn agent_name(&self) -> String {
      "agent".to_string()
    }
  }

  fn make_client() -> Client {
    let vt = Vt::start(
      SpawnSpec {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), "sleep 1".to_string()],
        cwd: std::env::temp_dir(),
        extra_env: Vec::new(),
      },
      24,
      80,
      2,
      std::time::Duration::from_secs(3),
      CachedColor::white(),
      CachedColor::black(),
    )
    .expect("spawn sh");
    Client::new(1, "tester".to_string(), vt, Arc::new(MessageQueue::new()), Arc::new(NullHost), false)
  }

  #[test]
  fn frame_ends_with_cursor_show_escape() {
    let c = make_client();
    let frame = c.render_frame(80, None, None);
    let tail = &frame[frame.len() - 6..];
    assert_eq!(tail, b"\x1b[?25h");
  }

  #[test]
  fn frame_begins_by_hiding_cursor() {
    let c = make_client();
    let frame = c.render_frame(80, None, None);
    assert!(frame.starts_with(b"\x1b[?25l"));
  }

  #[test]
  fn help_text_dropped_before_agent_name_when_too_narrow() {
    let c = make_client();
    let frame = c.render_frame(10, None, None);
    let text = String::from_utf8_lossy(&frame);
    assert!(!text.contains("menu"));
  }
}
