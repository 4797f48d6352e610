//! Frames exchanged over the persistent connection.
//!
//! A [`Frame`] is an opaque text payload. Nothing in a reply identifies the
//! request that caused it, so correlation works on the frame's shape: the
//! helpers here parse a frame and project the [`Turn`] it carries, if any.
//!
//! # Control Frames
//!
//! | Frame | Direction | Literal |
//! |-------|-----------|---------|
//! | connect | Local → Remote | `{"connect":{"name":"<client>"},"id":1}` |
//! | subscribe | Local → Remote | `{"subscribe":{"channel":"<scope>"},"id":1}` |
//! | heartbeat | Both | `{}` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

use super::Turn;

// ============================================================================
// Constants
// ============================================================================

/// Literal keepalive frame, echoed back verbatim.
const HEARTBEAT: &str = "{}";

/// Request id carried by both handshake frames.
const HANDSHAKE_ID: u32 = 1;

/// Command name of error frames pushed by the service.
const REMOTE_ERROR_COMMAND: &str = "neo_error";

// ============================================================================
// ConnectionKind
// ============================================================================

/// Which kind of conversation a connection is attached to.
///
/// The kind decides where a turn lives inside an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionKind {
    /// No conversation attached.
    #[default]
    Disconnected,
    /// One-to-one chat with a character.
    DirectMessage,
    /// Multi-participant room.
    GroupChat,
}

impl ConnectionKind {
    /// Returns `true` for the two attached states.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::DirectMessage => f.write_str("direct message"),
            Self::GroupChat => f.write_str("group chat"),
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One text message sent or received over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    text: String,
}

impl Frame {
    /// Wraps raw frame text.
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Serializes a value into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn from_json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    /// Builds the connect frame sent first during the handshake.
    #[must_use]
    pub fn connect(client_name: &str) -> Self {
        #[derive(Serialize)]
        struct Connect<'a> {
            connect: Name<'a>,
            id: u32,
        }

        #[derive(Serialize)]
        struct Name<'a> {
            name: &'a str,
        }

        Self::encode_control(&Connect {
            connect: Name { name: client_name },
            id: HANDSHAKE_ID,
        })
    }

    /// Builds the subscribe frame sent right after the connect frame.
    #[must_use]
    pub fn subscribe(channel: &str) -> Self {
        #[derive(Serialize)]
        struct Subscribe<'a> {
            subscribe: Channel<'a>,
            id: u32,
        }

        #[derive(Serialize)]
        struct Channel<'a> {
            channel: &'a str,
        }

        Self::encode_control(&Subscribe {
            subscribe: Channel { channel },
            id: HANDSHAKE_ID,
        })
    }

    /// Builds the keepalive frame.
    #[inline]
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(HEARTBEAT)
    }

    /// Returns `true` if this is the empty keepalive frame.
    #[inline]
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.text.trim() == HEARTBEAT
    }

    /// Returns the frame text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consumes the frame, returning its text.
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }

    /// Parses the frame as JSON.
    ///
    /// Returns `None` for non-JSON text; such frames are never an error on
    /// the shared stream.
    #[inline]
    #[must_use]
    pub fn parse_json(&self) -> Option<Value> {
        serde_json::from_str(&self.text).ok()
    }

    fn encode_control<T: Serialize>(value: &T) -> Self {
        // Control frames hold only strings and integers.
        Self::new(serde_json::to_string(value).unwrap_or_default())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<String> for Frame {
    #[inline]
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Frame {
    #[inline]
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

// ============================================================================
// Projection
// ============================================================================

/// Extracts the turn carried by a parsed frame.
///
/// Direct-message frames carry it under `turn`; room frames nest it under
/// `push.data.turn`. Returns `None` for control frames and for anything that
/// does not deserialize as a turn.
#[must_use]
pub fn project_turn(kind: ConnectionKind, value: &Value) -> Option<Turn> {
    let raw = match kind {
        ConnectionKind::DirectMessage => value.get("turn")?,
        ConnectionKind::GroupChat => value.pointer("/push/data/turn")?,
        ConnectionKind::Disconnected => return None,
    };

    Turn::deserialize(raw).ok()
}

/// Extracts the upstream message of a service error frame.
///
/// Recognizes `{"command":"neo_error", ...}` at the top level (direct
/// messages) or under `push.data` (rooms).
#[must_use]
pub fn remote_error(kind: ConnectionKind, value: &Value) -> Option<String> {
    let body = match kind {
        ConnectionKind::GroupChat => value.pointer("/push/data").unwrap_or(value),
        _ => value,
    };

    if body.get("command").and_then(Value::as_str) != Some(REMOTE_ERROR_COMMAND) {
        return None;
    }

    let message = ["comment", "error_comment", "message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .unwrap_or("unknown remote error");

    Some(message.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn turn_json(is_final: bool) -> Value {
        json!({
            "turn_key": {"chat_id": "c1", "turn_id": "t1"},
            "author": {"author_id": "42", "name": "Ada", "is_human": false},
            "candidates": [{"candidate_id": "k1", "raw_content": "hi", "is_final": is_final}],
            "primary_candidate_id": "k1"
        })
    }

    #[test]
    fn test_connect_frame_literal() {
        assert_eq!(
            Frame::connect("js").as_str(),
            r#"{"connect":{"name":"js"},"id":1}"#
        );
    }

    #[test]
    fn test_subscribe_frame_literal() {
        assert_eq!(
            Frame::subscribe("user#7").as_str(),
            r#"{"subscribe":{"channel":"user#7"},"id":1}"#
        );
    }

    #[test]
    fn test_connect_frame_escapes_name() {
        let frame = Frame::connect("a\"b");
        let value = frame.parse_json().expect("valid json");
        assert_eq!(value["connect"]["name"], "a\"b");
    }

    #[test]
    fn test_heartbeat_detection() {
        assert!(Frame::heartbeat().is_heartbeat());
        assert!(Frame::new(" {} ").is_heartbeat());
        assert!(!Frame::new("{\"a\":1}").is_heartbeat());
        assert!(!Frame::new("").is_heartbeat());
    }

    #[test]
    fn test_parse_json_rejects_text() {
        assert!(Frame::new("not json").parse_json().is_none());
        assert!(Frame::new("[1,2]").parse_json().is_some());
    }

    #[test]
    fn test_project_direct_message() {
        let value = json!({"command": "update_turn", "turn": turn_json(false)});
        let turn = project_turn(ConnectionKind::DirectMessage, &value).expect("turn");
        assert_eq!(turn.id().as_str(), "t1");
        assert!(!turn.is_final());

        assert!(project_turn(ConnectionKind::GroupChat, &value).is_none());
    }

    #[test]
    fn test_project_group_chat() {
        let value = json!({"push": {"data": {"turn": turn_json(true)}}});
        let turn = project_turn(ConnectionKind::GroupChat, &value).expect("turn");
        assert!(turn.is_final());

        assert!(project_turn(ConnectionKind::DirectMessage, &value).is_none());
    }

    #[test]
    fn test_project_disconnected_is_none() {
        let value = json!({"turn": turn_json(true)});
        assert!(project_turn(ConnectionKind::Disconnected, &value).is_none());
    }

    #[test]
    fn test_project_malformed_turn() {
        let value = json!({"turn": {"candidates": "nope"}});
        assert!(project_turn(ConnectionKind::DirectMessage, &value).is_none());
    }

    #[test]
    fn test_remote_error_frames() {
        let dm = json!({"command": "neo_error", "comment": "too many requests"});
        assert_eq!(
            remote_error(ConnectionKind::DirectMessage, &dm).as_deref(),
            Some("too many requests")
        );

        let room = json!({"push": {"data": {"command": "neo_error", "error_comment": "banned"}}});
        assert_eq!(
            remote_error(ConnectionKind::GroupChat, &room).as_deref(),
            Some("banned")
        );

        let ok = json!({"command": "add_turn"});
        assert!(remote_error(ConnectionKind::DirectMessage, &ok).is_none());
    }

    #[test]
    fn test_connection_kind_display() {
        assert_eq!(ConnectionKind::DirectMessage.to_string(), "direct message");
        assert!(ConnectionKind::GroupChat.is_active());
        assert!(!ConnectionKind::default().is_active());
    }
}
