//! The `Screen` contract: a headless terminal emulator that consumes byte
//! streams and exposes a 2-D character grid and cursor.
//!
//! `vt100` satisfies this contract directly; `Screen` is a thin wrapper so the rest
//! of the crate depends on our own trait rather than the `vt100` API shape.
//! `ScrollbackScreen` adds the append-only, auto-grow behavior the live
//! screen does not need: it never shrinks its row count and instead grows it
//! (doubling, capped) as content approaches the bottom of the buffer, so
//! history beyond the viewport is retained without the unbounded-memory risk
//! of growing one row at a time forever.

use std::sync::Mutex;

/// Rows are raw bytes (already rendered by the parser, i.e. not necessarily
/// valid UTF-8 on their own).
pub type ContentRow = Vec<u8>;

pub trait Screen: Send + Sync {
  fn process(&self, bytes: &[u8]);
  fn resize(&self, rows: u16, cols: u16);
  fn size(&self) -> (u16, u16);
  fn cursor_position(&self) -> (u16, u16);
  fn contents_formatted(&self) -> Vec<u8>;
  /// Plain-text rows (no ANSI), used by the client renderer to slice a
  /// viewport out of the full buffer.
  fn rows(&self, start: u16, count: u16) -> Vec<ContentRow>;
}

pub struct LiveScreen {
  parser: Mutex<vt100::Parser>,
}

impl LiveScreen {
  #[must_use]
  pub fn new(rows: u16, cols: u16) -> Self {
    Self {
      parser: Mutex::new(vt100::Parser::new(rows, cols, 0)),
    }
  }
}

impl Screen for LiveScreen {
  fn process(&self, bytes: &[u8]) {
    self.parser.lock().unwrap().process(bytes);
  }

  fn resize(&self, rows: u16, cols: u16) {
    self.parser.lock().unwrap().screen_mut().set_size(rows, cols);
  }

  fn size(&self) -> (u16, u16) {
    self.parser.lock().unwrap().screen().size()
  }

  fn cursor_position(&self) -> (u16, u16) {
    self.parser.lock().unwrap().screen().cursor_position()
  }

  fn contents_formatted(&self) -> Vec<u8> {
    self.parser.lock().unwrap().screen().contents_formatted()
  }

  fn rows(&self, start: u16, count: u16) -> Vec<ContentRow> {
    let p = self.parser.lock().unwrap();
    let screen = p.screen();
    let (total_rows, cols) = screen.size();
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
      let row_idx = start + i;
      if row_idx >= total_rows {
        out.push(Vec::new());
        continue;
      }
      let mut row_bytes = Vec::with_capacity(cols as usize);
      for col in 0..cols {
        if let Some(cell) = screen.cell(row_idx, col) {
          row_bytes.extend_from_slice(cell.contents().as_bytes());
        }
      }
      out.push(row_bytes);
    }
    out
  }
}

const SCROLLBACK_MIN_ROWS: u16 = 200;
const SCROLLBACK_MAX_ROWS: u16 = 20_000;

/// Append-only scrollback: grows its row count rather than evicting history,
/// up to `SCROLLBACK_MAX_ROWS`. Writers feed it the same bytes as the live
/// screen; it never shrinks on resize, only widens/narrows `cols`.
pub struct ScrollbackScreen {
  parser: Mutex<vt100::Parser>,
}

impl ScrollbackScreen {
  #[must_use]
  pub fn new(cols: u16) -> Self {
    Self {
      parser: Mutex::new(vt100::Parser::new(SCROLLBACK_MIN_ROWS, cols, 0)),
    }
  }

  /// Grow vertically if the cursor is nearing the current capacity.
  fn maybe_grow(&self, parser: &mut vt100::Parser) {
    let (rows, cols) = parser.screen().size();
    let (_, cursor_row) = parser.screen().cursor_position();
    if cursor_row + 1 >= rows && rows < SCROLLBACK_MAX_ROWS {
      let new_rows = (rows.saturating_mul(2)).min(SCROLLBACK_MAX_ROWS);
      parser.set_size(new_rows, cols);
    }
  }
}

impl Screen for ScrollbackScreen {
  fn process(&self, bytes: &[u8]) {
    let mut p = self.parser.lock().unwrap();
    p.process(bytes);
    self.maybe_grow(&mut p);
  }

  fn resize(&self, _rows: u16, cols: u16) {
    // Never shrinks vertically; only the width tracks the live screen.
    let mut p = self.parser.lock().unwrap();
    let (rows, _) = p.screen().size();
    p.set_size(rows, cols);
  }

  fn size(&self) -> (u16, u16) {
    self.parser.lock().unwrap().screen().size()
  }

  fn cursor_position(&self) -> (u16, u16) {
    self.parser.lock().unwrap().screen().cursor_position()
  }

  fn contents_formatted(&self) -> Vec<u8> {
    self.parser.lock().unwrap().screen().contents_formatted()
  }

  fn rows(&self, start: u16, count: u16) -> Vec<ContentRow> {
    let p = self.parser.lock().unwrap();
    let screen = p.screen();
    let (total_rows, cols) = screen.size();
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
      let row_idx = start + i;
      if row_idx >= total_rows {
        out.push(Vec::new());
        continue;
      }
      let mut row_bytes = Vec::with_capacity(cols as usize);
      for col in 0..cols {
        if let Some(cell) = screen.cell(row_idx, col) {
          row_bytes.extend_from_slice(cell.contents().as_bytes());
        }
      }
      out.push(row_bytes);
    }
    out
  }
}

/// Clamp a scroll request against the scrollback's current row count so
/// scrolling past the top or with an empty/nil scrollback never underflows.
#[must_use]
pub fn clamp_scroll_offset(offset: i64, scrollback_rows: u16) -> u16 {
  if scrollback_rows == 0 {
    return 0;
  }
  offset.clamp(0, i64::from(scrollback_rows)) as u16
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clamp_scroll_offset_with_empty_scrollback_is_zero() {
    assert_eq!(clamp_scroll_offset(5, 0), 0);
  }

  #[test]
  fn clamp_scroll_offset_never_goes_negative() {
    assert_eq!(clamp_scroll_offset(-3, 100), 0);
  }

  #[test]
  fn live_screen_reports_requested_size() {
    let screen = LiveScreen::new(24, 80);
    assert_eq!(screen.size(), (24, 80));
  }

  #[test]
  fn live_screen_resize_updates_size() {
    let screen = LiveScreen::new(24, 80);
    screen.resize(30, 100);
    assert_eq!(screen.size(), (30, 100));
  }

  #[test]
  fn scrollback_screen_grows_when_cursor_nears_bottom() {
    let screen = ScrollbackScreen::new(80);
    let (initial_rows, _) = screen.size();
    for _ in 0..(initial_rows as usize + 5) {
      screen.process(b"line\r\n");
    }
    let (grown_rows, _) = screen.size();
    assert!(grown_rows > initial_rows);
  }
}
