//! JSON codec for deskrelay frames.
//!
//! One frame is one JSON object carried in a single WebSocket message.

use thiserror::Error;

use crate::frames::{Envelope, Event};

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is not UTF-8.
    #[error("Frame is not valid UTF-8")]
    NotUtf8,

    /// JSON encoding or decoding error.
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an outbound event.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &Event) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode an inbound envelope from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, not an object, has an unknown
/// `type`, or lacks a required field.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode an inbound envelope from a binary frame holding UTF-8 JSON.
///
/// # Errors
///
/// Returns an error if the bytes are not UTF-8 or [`decode`] fails.
pub fn decode_bytes(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NotUtf8)?;
    decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::Role;
    use crate::records::MessageRecord;

    #[test]
    fn test_decode_device_register() {
        let env = decode(
            r#"{"type":"register","clientId":"host1-alice","hostname":"host1","username":"alice","platform":"win32"}"#,
        )
        .unwrap();

        match env {
            Envelope::Register {
                role,
                client_id,
                platform,
                ..
            } => {
                assert_eq!(role, None);
                assert_eq!(client_id.as_deref(), Some("host1-alice"));
                assert_eq!(platform.as_deref(), Some("win32"));
            }
            other => panic!("Expected Register, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_admin_register() {
        let env = decode(r#"{"type":"register","role":"admin"}"#).unwrap();
        assert!(matches!(
            env,
            Envelope::Register {
                role: Some(Role::Admin),
                ..
            }
        ));
    }

    #[test]
    fn test_decode_typing() {
        let env = decode(r#"{"type":"typing","isTyping":true,"to":"alice@host1"}"#).unwrap();
        assert_eq!(env, Envelope::typing(true, Some("alice@host1".into())));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(matches!(
            decode(r#"{"type":"subscribe","channel":"x"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        assert!(decode(r#"{"type":"chat_message"}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_decode_bytes_rejects_invalid_utf8() {
        assert!(matches!(
            decode_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::NotUtf8)
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let big = format!(
            r#"{{"type":"chat_message","message":"{}"}}"#,
            "a".repeat(MAX_FRAME_SIZE)
        );
        assert!(matches!(decode(&big), Err(ProtocolError::FrameTooLarge(_))));
    }

    #[test]
    fn test_encode_incoming_message() {
        let record = MessageRecord {
            from: "IT".into(),
            to: Some("alice@host1".into()),
            message: "hi".into(),
            timestamp: "2026-01-02T03:04:05.678Z".into(),
        };
        let text = encode(&Event::incoming(record)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "incoming_message",
                "from": "IT",
                "to": "alice@host1",
                "message": "hi",
                "timestamp": "2026-01-02T03:04:05.678Z"
            })
        );
    }

    #[test]
    fn test_encode_client_list() {
        let text = encode(&Event::client_list(Vec::new())).unwrap();
        assert_eq!(text, r#"{"type":"client_list","clients":[]}"#);
    }
}
