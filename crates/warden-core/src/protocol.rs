//! Control-socket wire protocol: a JSON request/response handshake, then
//! (after a successful `attach`) a binary framed mode on the same stream.
//!
//! Typed request/response enums with `read_frame`/`write_frame`-style helpers
//! over a `Read`/`Write`, but the wire format itself is JSON for the
//! handshake and a `[type u8][len u32 BE][payload]` frame header for the
//! attached phase.

use crate::error::{Result, SupervisorError};
use crate::message::{Message, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
  Send {
    priority: Priority,
    from: String,
    body: String,
  },
  Show {
    message_id: String,
  },
  Status,
  Attach {
    cols: u16,
    rows: u16,
  },
  HookEvent {
    event_name: String,
    payload: Value,
  },
  Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInfo {
  pub id: String,
  pub from: String,
  pub priority: Priority,
  pub status: String,
  pub created_at_ms: u64,
  pub delivered_at_ms: Option<u64>,
  pub body: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file_path: Option<String>,
}

impl From<&Message> for MessageInfo {
  fn from(m: &Message) -> Self {
    Self {
      id: m.id.clone(),
      from: m.from.clone(),
      priority: m.priority,
      status: format!("{:?}", m.status).to_lowercase(),
      created_at_ms: m.created_at_ms,
      delivered_at_ms: m.delivered_at_ms,
      body: m.body.clone(),
      file_path: m.file_path.clone(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
  pub name: String,
  pub state: String,
  pub sub_state: String,
  pub pending_messages: usize,
  pub queue_paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Response {
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<MessageInfo>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub agent: Option<AgentInfo>,
}

impl Response {
  #[must_use]
  pub fn ok() -> Self {
    Self {
      ok: true,
      ..Self::default()
    }
  }

  #[must_use]
  pub fn err(message: impl Into<String>) -> Self {
    Self {
      ok: false,
      error: Some(message.into()),
      ..Self::default()
    }
  }
}

/// Reads exactly one JSON request off `reader`, leaving any trailing bytes
/// for the caller to consume next (e.g. the framed phase after `attach`).
/// The deserializer stops at the first complete value.
pub fn read_json_request<R: Read>(reader: R) -> Result<Request> {
  let mut stream = serde_json::Deserializer::from_reader(reader).into_iter::<Request>();
  match stream.next() {
    Some(Ok(req)) => Ok(req),
    Some(Err(e)) => Err(SupervisorError::InvalidRequest(e.to_string())),
    None => Err(SupervisorError::ClientDisconnect),
  }
}

pub fn write_json_response<W: Write>(mut writer: W, response: &Response) -> Result<()> {
  let bytes = serde_json::to_vec(response)
    .map_err(|e| SupervisorError::InvalidRequest(e.to_string()))?;
  writer
    .write_all(&bytes)
    .map_err(|_| SupervisorError::ClientDisconnect)?;
  writer.flush().map_err(|_| SupervisorError::ClientDisconnect)?;
  Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
  Data,
  Control,
}

impl FrameType {
  #[must_use]
  pub fn to_byte(self) -> u8 {
    match self {
      FrameType::Data => 0x00,
      FrameType::Control => 0x01,
    }
  }

  #[must_use]
  pub fn from_byte(b: u8) -> Option<Self> {
    match b {
      0x00 => Some(FrameType::Data),
      0x01 => Some(FrameType::Control),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
  Resize { cols: u16, rows: u16 },
}

/// Encodes `[1 byte type][4 byte BE length][payload]`.
pub fn encode_frame(frame_type: FrameType, payload: &[u8]) -> Result<Vec<u8>> {
  if payload.len() > crate::config::MAX_FRAME_PAYLOAD_BYTES {
    return Err(SupervisorError::FrameTooLarge {
      len: payload.len(),
      max: crate::config::MAX_FRAME_PAYLOAD_BYTES,
    });
  }
  let mut out = Vec::with_capacity(5 + payload.len());
  out.push(frame_type.to_byte());
  out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
  out.extend_from_slice(payload);
  Ok(out)
}

/// Decodes one frame from `reader`, rejecting (without reading the body)
/// any declared length over the 10 MiB cap.
pub fn decode_frame<R: Read>(mut reader: R) -> Result<(FrameType, Vec<u8>)> {
  let mut header = [0u8; 5];
  reader
    .read_exact(&mut header)
    .map_err(|_| SupervisorError::ClientDisconnect)?;
  let frame_type = FrameType::from_byte(header[0])
    .ok_or_else(|| SupervisorError::InvalidRequest(format!("unknown frame type {}", header[0])))?;
  let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
  if len > crate::config::MAX_FRAME_PAYLOAD_BYTES {
    return Err(SupervisorError::FrameTooLarge {
      len,
      max: crate::config::MAX_FRAME_PAYLOAD_BYTES,
    });
  }
  let mut payload = vec![0u8; len];
  reader
    .read_exact(&mut payload)
    .map_err(|_| SupervisorError::ClientDisconnect)?;
  Ok((frame_type, payload))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn frame_round_trips_data_payload() {
    let encoded = encode_frame(FrameType::Data, b"hello").unwrap();
    let (ty, payload) = decode_frame(Cursor::new(encoded)).unwrap();
    assert_eq!(ty, FrameType::Data);
    assert_eq!(payload, b"hello");
  }

  #[test]
  fn frame_round_trips_empty_payload() {
    let encoded = encode_frame(FrameType::Control, b"").unwrap();
    let (ty, payload) = decode_frame(Cursor::new(encoded)).unwrap();
    assert_eq!(ty, FrameType::Control);
    assert!(payload.is_empty());
  }

  #[test]
  fn encode_rejects_oversized_payload() {
    let oversized = vec![0u8; crate::config::MAX_FRAME_PAYLOAD_BYTES + 1];
    let result = encode_frame(FrameType::Data, &oversized);
    assert!(matches!(result, Err(SupervisorError::FrameTooLarge { .. })));
  }

  #[test]
  fn decode_rejects_declared_length_over_cap_without_reading_body() {
    let mut header = vec![0x00];
    header.extend_from_slice(&((crate::config::MAX_FRAME_PAYLOAD_BYTES as u32) + 1).to_be_bytes());
    let result = decode_frame(Cursor::new(header));
    assert!(matches!(result, Err(SupervisorError::FrameTooLarge { .. })));
  }

  #[test]
  fn send_request_round_trips_through_json() {
    let req = Request::Send {
      priority: Priority::Interrupt,
      from: "peer".to_string(),
      body: "stop".to_string(),
    };
    let encoded = serde_json::to_vec(&req).unwrap();
    let decoded = read_json_request(Cursor::new(encoded)).unwrap();
    match decoded {
      Request::Send { priority, from, body } => {
        assert_eq!(priority, Priority::Interrupt);
        assert_eq!(from, "peer");
        assert_eq!(body, "stop");
      }
      _ => panic!("wrong variant"),
    }
  }

  #[test]
  fn invalid_json_is_invalid_request() {
    let result = read_json_request(Cursor::new(b"not json".to_vec()));
    assert!(matches!(result, Err(SupervisorError::InvalidRequest(_))));
  }
}
