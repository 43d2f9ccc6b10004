//! JSON hub protocol framing.
//!
//! Every frame is a JSON object terminated by the ASCII record separator
//! (`0x1E`). A single WebSocket text message may carry several frames.
//! The connection opens with a handshake:
//!
//! ```text
//! client -> {"protocol":"json","version":1}\x1e
//! server -> {}\x1e                      (or {"error":"..."}\x1e)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Frame terminator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const TYPE_INVOCATION: u8 = 1;
const TYPE_STREAM_ITEM: u8 = 2;
const TYPE_COMPLETION: u8 = 3;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

/// A decoded hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Remote call. Server pushes arrive without an invocation id.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    StreamItem {
        invocation_id: String,
        item: Value,
    },
    /// Result of a client invocation.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// A message type this client does not handle.
    Other(u8),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

#[derive(Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u8,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// The handshake frame sent right after the socket opens.
pub fn handshake_request() -> String {
    let body = serde_json::to_string(&HandshakeRequest {
        protocol: "json",
        version: 1,
    })
    .unwrap_or_else(|_| r#"{"protocol":"json","version":1}"#.to_string());
    format!("{body}{RECORD_SEPARATOR}")
}

/// Parse the server handshake reply.
///
/// Returns whatever follows the handshake frame in the same text message.
pub fn parse_handshake_response(text: &str) -> Result<&str, ProtocolError> {
    let (frame, rest) = text
        .split_once(RECORD_SEPARATOR)
        .ok_or(ProtocolError::Incomplete)?;
    let response: HandshakeResponse = serde_json::from_str(frame)?;
    match response.error {
        Some(error) => Err(ProtocolError::HandshakeRejected(error)),
        None => Ok(rest),
    }
}

/// Encode a message as a single terminated frame.
pub fn encode(message: &HubMessage) -> Result<String, ProtocolError> {
    let raw = match message {
        HubMessage::Invocation {
            invocation_id,
            target,
            arguments,
        } => RawMessage {
            kind: TYPE_INVOCATION,
            invocation_id: invocation_id.clone(),
            target: Some(target.clone()),
            arguments: Some(arguments.clone()),
            ..Default::default()
        },
        HubMessage::StreamItem {
            invocation_id,
            item,
        } => RawMessage {
            kind: TYPE_STREAM_ITEM,
            invocation_id: Some(invocation_id.clone()),
            item: Some(item.clone()),
            ..Default::default()
        },
        HubMessage::Completion {
            invocation_id,
            result,
            error,
        } => RawMessage {
            kind: TYPE_COMPLETION,
            invocation_id: Some(invocation_id.clone()),
            result: result.clone(),
            error: error.clone(),
            ..Default::default()
        },
        HubMessage::Ping => RawMessage {
            kind: TYPE_PING,
            ..Default::default()
        },
        HubMessage::Close {
            error,
            allow_reconnect,
        } => RawMessage {
            kind: TYPE_CLOSE,
            error: error.clone(),
            allow_reconnect: Some(*allow_reconnect),
            ..Default::default()
        },
        HubMessage::Other(kind) => {
            return Err(ProtocolError::malformed(format!(
                "cannot encode message type {kind}"
            )))
        }
    };

    let json = serde_json::to_string(&raw)?;
    Ok(format!("{json}{RECORD_SEPARATOR}"))
}

/// Decode one frame body (without the separator).
pub fn decode(frame: &str) -> Result<HubMessage, ProtocolError> {
    let raw: RawMessage = serde_json::from_str(frame)?;
    let message = match raw.kind {
        TYPE_INVOCATION => HubMessage::Invocation {
            invocation_id: raw.invocation_id,
            target: raw
                .target
                .ok_or_else(|| ProtocolError::malformed("invocation without target"))?,
            arguments: raw.arguments.unwrap_or_default(),
        },
        TYPE_STREAM_ITEM => HubMessage::StreamItem {
            invocation_id: raw
                .invocation_id
                .ok_or_else(|| ProtocolError::malformed("stream item without invocation id"))?,
            item: raw.item.unwrap_or(Value::Null),
        },
        TYPE_COMPLETION => HubMessage::Completion {
            invocation_id: raw
                .invocation_id
                .ok_or_else(|| ProtocolError::malformed("completion without invocation id"))?,
            result: raw.result,
            error: raw.error,
        },
        TYPE_PING => HubMessage::Ping,
        TYPE_CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect.unwrap_or(false),
        },
        other => HubMessage::Other(other),
    };
    Ok(message)
}

/// Decode every complete frame contained in a text message.
///
/// Empty segments are skipped. A trailing segment without separator is
/// reported as [`ProtocolError::Incomplete`].
pub fn decode_frames(text: &str) -> Vec<Result<HubMessage, ProtocolError>> {
    let mut messages = Vec::new();
    let mut segments = text.split(RECORD_SEPARATOR).peekable();

    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        if segment.trim().is_empty() {
            continue;
        }
        if is_last {
            messages.push(Err(ProtocolError::Incomplete));
        } else {
            messages.push(decode(segment));
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_handshake_request() {
        assert_eq!(handshake_request(), "{\"protocol\":\"json\",\"version\":1}\u{1e}");
    }

    #[test]
    fn test_handshake_response_ok_with_trailing_frames() {
        let text = "{}\u{1e}{\"type\":6}\u{1e}";
        let rest = parse_handshake_response(text).unwrap();
        assert_eq!(rest, "{\"type\":6}\u{1e}");
    }

    #[test]
    fn test_handshake_response_error() {
        let err = parse_handshake_response("{\"error\":\"bad protocol\"}\u{1e}").unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeRejected(ref e) if e == "bad protocol"));
    }

    #[test]
    fn test_handshake_response_incomplete() {
        assert!(matches!(
            parse_handshake_response("{}"),
            Err(ProtocolError::Incomplete)
        ));
    }

    #[test]
    fn test_encode_invocation() {
        let frame = encode(&HubMessage::Invocation {
            invocation_id: Some("3".to_string()),
            target: "SubscribeToStaffUpdates".to_string(),
            arguments: vec![json!("42")],
        })
        .unwrap();
        let body = frame.trim_end_matches(RECORD_SEPARATOR);
        let value: Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            value,
            json!({
                "type": 1,
                "invocationId": "3",
                "target": "SubscribeToStaffUpdates",
                "arguments": ["42"]
            })
        );
    }

    #[test]
    fn test_decode_multiple_frames() {
        let text = concat!(
            "{\"type\":1,\"target\":\"ReceiveSlotLocked\",\"arguments\":[{\"staffId\":1}]}\u{1e}",
            "{\"type\":3,\"invocationId\":\"1\",\"result\":true}\u{1e}",
            "{\"type\":6}\u{1e}"
        );
        let messages: Vec<_> = decode_frames(text).into_iter().map(Result::unwrap).collect();
        assert_eq!(
            messages,
            vec![
                HubMessage::Invocation {
                    invocation_id: None,
                    target: "ReceiveSlotLocked".to_string(),
                    arguments: vec![json!({"staffId": 1})],
                },
                HubMessage::Completion {
                    invocation_id: "1".to_string(),
                    result: Some(json!(true)),
                    error: None,
                },
                HubMessage::Ping,
            ]
        );
    }

    #[test]
    fn test_decode_completion_error() {
        let message = decode("{\"type\":3,\"invocationId\":\"7\",\"error\":\"denied\"}").unwrap();
        assert_eq!(
            message,
            HubMessage::Completion {
                invocation_id: "7".to_string(),
                result: None,
                error: Some("denied".to_string()),
            }
        );
    }

    #[test]
    fn test_decode_close_and_unknown() {
        assert_eq!(
            decode("{\"type\":7,\"error\":\"shutdown\",\"allowReconnect\":true}").unwrap(),
            HubMessage::Close {
                error: Some("shutdown".to_string()),
                allow_reconnect: true,
            }
        );
        assert_eq!(decode("{\"type\":4}").unwrap(), HubMessage::Other(4));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode("{\"type\":1}").is_err());
        assert!(decode("not json").is_err());
        let results = decode_frames("{\"type\":6}");
        assert!(matches!(results.as_slice(), [Err(ProtocolError::Incomplete)]));
    }
}
