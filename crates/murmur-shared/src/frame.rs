//! JSON wire frames exchanged over the WebSocket.
//!
//! Every frame is a standalone JSON object whose `type` field selects the
//! payload. Unrecognised types decode to [`Frame::Unknown`] so that newer
//! servers can add frame kinds without breaking older clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::FrameError;
use crate::types::PresenceStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Chat message (plaintext or channel-key ciphertext)
    Message(ChatMessage),

    /// Typing state: `isTyping` from clients, rendered `message` from the server
    Typing(TypingFrame),

    /// User came online or went offline
    Presence(PresenceFrame),

    /// A member without the channel key asks existing members for it
    KeyRequest(KeyRequestFrame),

    /// A channel key sealed for one recipient's identity key
    KeyShare(KeyShareFrame),

    #[serde(other)]
    Unknown,
}

/// A chat message as it travels on the wire and as the history endpoint
/// returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    /// `content` is `base64(nonce || ciphertext)` under the channel key
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TypingFrame {
    #[serde(rename = "isTyping", default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TypingFrame {
    /// What a client sends when its local typing state flips.
    pub fn state(is_typing: bool) -> Self {
        Self {
            is_typing: Some(is_typing),
            message: None,
        }
    }

    /// What the server sends: indicator text, empty when nobody types.
    pub fn indicator(message: impl Into<String>) -> Self {
        Self {
            is_typing: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceFrame {
    pub username: String,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequestFrame {
    pub username: String,
    /// Requester's identity public key (SPKI PEM)
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShareFrame {
    pub recipient: String,
    /// Channel key sealed with the recipient's public key (base64)
    pub sealed_key: String,
}

impl Frame {
    pub fn to_json(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(serde_json::from_str(text)?)
    }

    /// Discriminator as it appears on the wire, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Typing(_) => "typing",
            Self::Presence(_) => "presence",
            Self::KeyRequest(_) => "key_request",
            Self::KeyShare(_) => "key_share",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_wire_shape() {
        let frame = Frame::Message(ChatMessage {
            content: "hi".into(),
            username: "a".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            encrypted: false,
        });

        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "message",
                "content": "hi",
                "username": "a",
                "created_at": "2024-05-01T12:00:00Z",
            })
        );
    }

    #[test]
    fn test_encrypted_flag_only_when_set() {
        let json = r#"{"type":"message","content":"x","username":"b","created_at":"2024-05-01T12:00:00Z","encrypted":true}"#;
        match Frame::from_json(json).unwrap() {
            Frame::Message(m) => assert!(m.encrypted),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_typing_outbound_and_inbound_shapes() {
        let outbound = Frame::Typing(TypingFrame::state(true)).to_json().unwrap();
        assert_eq!(outbound, r#"{"type":"typing","isTyping":true}"#);

        let inbound = Frame::from_json(r#"{"type":"typing","message":"a is typing..."}"#).unwrap();
        assert_eq!(
            inbound,
            Frame::Typing(TypingFrame::indicator("a is typing..."))
        );
    }

    #[test]
    fn test_presence_parses() {
        let frame =
            Frame::from_json(r#"{"type":"presence","username":"c","status":"online"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Presence(PresenceFrame {
                username: "c".into(),
                status: PresenceStatus::Online,
            })
        );
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let frame = Frame::from_json(r#"{"type":"reaction","emoji":"+1"}"#).unwrap();
        assert_eq!(frame, Frame::Unknown);
        assert_eq!(frame.kind(), "unknown");
    }

    #[test]
    fn test_malformed_frames_error() {
        assert!(Frame::from_json("not json").is_err());
        assert!(Frame::from_json(r#"{"content":"no type"}"#).is_err());
        assert!(Frame::from_json(r#"{"type":"message","content":1}"#).is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let huge = format!(
            r#"{{"type":"message","content":"{}"}}"#,
            "x".repeat(MAX_FRAME_SIZE)
        );
        assert!(matches!(
            Frame::from_json(&huge),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_key_frames_use_snake_case_tags() {
        let share = Frame::KeyShare(KeyShareFrame {
            recipient: "d".into(),
            sealed_key: "c2VhbGVk".into(),
        });
        let json = share.to_json().unwrap();
        assert!(json.starts_with(r#"{"type":"key_share""#));
        assert_eq!(Frame::from_json(&json).unwrap(), share);
    }
}
