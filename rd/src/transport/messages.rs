//! Socket message types
//!
//! One request per connection. For `Message`, the relay streams events back
//! (typing indicators and replies) and closes with `Done` or `Error`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Requests from the CLI to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RelayRequest {
    /// An inbound message to answer
    Message {
        sender: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Check if the relay is alive
    Ping,

    /// Request the relay to stop gracefully
    Shutdown,
}

/// Events from the relay to the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// Working indicator
    Typing,

    /// One outbound chunk
    Reply { text: String },

    /// Message fully handled
    Done,

    Pong { version: String },

    Ok,

    Error { message: String },
}

impl RelayEvent {
    /// Whether this event ends the exchange
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Typing | RelayEvent::Reply { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialize_omits_empty_fields() {
        let msg = RelayRequest::Message {
            sender: "cli".to_string(),
            text: "hi".to_string(),
            attachment: None,
            context: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"Message","sender":"cli","text":"hi"}"#);
    }

    #[test]
    fn test_message_deserialize_with_attachment() {
        let json = r#"{"type":"Message","sender":"bob","text":"look","attachment":"/tmp/x.png","context":"ctx"}"#;
        let msg: RelayRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            RelayRequest::Message {
                sender: "bob".to_string(),
                text: "look".to_string(),
                attachment: Some(PathBuf::from("/tmp/x.png")),
                context: Some("ctx".to_string()),
            }
        );
    }

    #[test]
    fn test_ping_serialize() {
        let json = serde_json::to_string(&RelayRequest::Ping).unwrap();
        assert_eq!(json, r#"{"type":"Ping"}"#);
    }

    #[test]
    fn test_shutdown_deserialize() {
        let msg: RelayRequest = serde_json::from_str(r#"{"type":"Shutdown"}"#).unwrap();
        assert_eq!(msg, RelayRequest::Shutdown);
    }

    #[test]
    fn test_reply_serialize() {
        let event = RelayEvent::Reply {
            text: "chunk".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"Reply","text":"chunk"}"#);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<RelayRequest, _> = serde_json::from_str(r#"{"type":"Reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_terminal_events() {
        assert!(!RelayEvent::Typing.is_terminal());
        assert!(!RelayEvent::Reply { text: String::new() }.is_terminal());
        assert!(RelayEvent::Done.is_terminal());
        assert!(RelayEvent::Ok.is_terminal());
        assert!(
            RelayEvent::Error {
                message: "x".to_string()
            }
            .is_terminal()
        );
    }
}
