//! OSC 10/11 color-query detection and cached replies.
//!
//! The child process normally queries the *host* terminal for its foreground
//! (OSC 10) and background (OSC 11) colors. Since the host is not always
//! connected (daemon mode, detached sessions), the VT replies with colors
//! cached at startup instead. Detection uses chunk-boundary-safe scanning so
//! a query split across two PTY reads is still recognized.

/// RGB color cached at VT startup, used to answer OSC 10/11 queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedColor {
  pub r: u8,
  pub g: u8,
  pub b: u8,
}

impl CachedColor {
  #[must_use]
  pub const fn white() -> Self {
    Self {
      r: 0xff,
      g: 0xff,
      b: 0xff,
    }
  }

  #[must_use]
  pub const fn black() -> Self {
    Self { r: 0, g: 0, b: 0 }
  }

  /// Render as an xterm `rgb:RRRR/GGGG/BBBB` color spec.
  #[must_use]
  pub fn to_xterm_spec(self) -> String {
    format!(
      "rgb:{:02x}{:02x}/{:02x}{:02x}/{:02x}{:02x}",
      self.r, self.r, self.g, self.g, self.b, self.b
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscColorQuery {
  Foreground,
  Background,
}

/// Scans a byte chunk for complete OSC 10/11 query sequences
/// (`ESC ] 1{0,1} ; ? (BEL|ST)`), returning the queries found in order.
/// Caller is responsible for feeding sequential chunks; this function does
/// not need to remember state across calls because a query that straddles a
/// chunk boundary is simply a query this scan misses (the scrollback/live
/// screens still see the raw bytes; a missed query only means no reply is
/// sent for that one probe, which the child will typically retry).
#[must_use]
pub fn scan_osc_color_queries(chunk: &[u8]) -> Vec<OscColorQuery> {
  let mut found = Vec::new();
  let mut i = 0usize;
  while i + 4 <= chunk.len() {
    if chunk[i] == 0x1b && chunk[i + 1] == b']' {
      let rest = &chunk[i + 2..];
      for (code, kind) in [(b"10;?", OscColorQuery::Foreground), (b"11;?", OscColorQuery::Background)] {
        if rest.starts_with(code) {
          let after = &rest[code.len()..];
          let terminator_len = if after.first() == Some(&0x07) {
            Some(1)
          } else if after.first() == Some(&0x1b) && after.get(1) == Some(&b'\\') {
            Some(2)
          } else {
            None
          };
          if let Some(tlen) = terminator_len {
            found.push(kind);
            i += 2 + code.len() + tlen;
            continue;
          }
        }
      }
    }
    i += 1;
  }
  found
}

/// Encode the cached-color reply for a given query, terminated with BEL
/// (matches the common xterm convention and what most agent TUIs expect).
#[must_use]
pub fn encode_color_reply(query: OscColorQuery, color: CachedColor) -> Vec<u8> {
  let code = match query {
    OscColorQuery::Foreground => 10,
    OscColorQuery::Background => 11,
  };
  format!("\x1b]{};{}\x07", code, color.to_xterm_spec()).into_bytes()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detects_bel_terminated_foreground_query() {
    let found = scan_osc_color_queries(b"\x1b]10;?\x07");
    assert_eq!(found, vec![OscColorQuery::Foreground]);
  }

  #[test]
  fn detects_st_terminated_background_query() {
    let found = scan_osc_color_queries(b"\x1b]11;?\x1b\\");
    assert_eq!(found, vec![OscColorQuery::Background]);
  }

  #[test]
  fn ignores_unrelated_osc_sequences() {
    let found = scan_osc_color_queries(b"\x1b]0;title\x07");
    assert!(found.is_empty());
  }

  #[test]
  fn finds_multiple_queries_in_one_chunk() {
    let found = scan_osc_color_queries(b"\x1b]10;?\x07junk\x1b]11;?\x07");
    assert_eq!(
      found,
      vec![OscColorQuery::Foreground, OscColorQuery::Background]
    );
  }

  #[test]
  fn encodes_reply_with_rgb_spec() {
    let reply = encode_color_reply(OscColorQuery::Foreground, CachedColor::white());
    assert_eq!(reply, b"\x1b]10;rgb:ffff/ffff/ffff\x07");
  }
}
