use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessagePayload;
use crate::models::{MessageKind, MessageStatus};

/// Events sent over the WebSocket gateway. Wire names keep the
/// `scope:action` convention clients already speak.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready { participant_id: Uuid, name: String },

    /// A message was accepted by the pipeline and stored
    #[serde(rename = "message:new")]
    MessageNew { message: MessagePayload },

    /// A stored message changed (pin, tombstone, enrichment merge)
    #[serde(rename = "message:updated")]
    MessageUpdated { message: MessagePayload },

    /// Focus-mode auto-reply, delivered to the sending connection only
    /// and never stored
    #[serde(rename = "message:auto-reply")]
    MessageAutoReply {
        conversation_id: Uuid,
        from: Uuid,
        text: String,
    },

    /// A recipient marked a message as seen; sent to the sender
    #[serde(rename = "message:seen-update")]
    MessageSeenUpdate {
        conversation_id: Uuid,
        message_id: Uuid,
        seen_by: Uuid,
        seen_at: DateTime<Utc>,
        status: MessageStatus,
    },

    /// A participant's first connection came up
    #[serde(rename = "user:online")]
    UserOnline { participant_id: Uuid },

    /// A participant's last connection went away
    #[serde(rename = "user:offline")]
    UserOffline {
        participant_id: Uuid,
        last_seen: DateTime<Utc>,
    },

    #[serde(rename = "user:typing")]
    UserTyping {
        conversation_id: Uuid,
        participant_id: Uuid,
        name: String,
    },

    #[serde(rename = "user:stop-typing")]
    UserStopTyping {
        conversation_id: Uuid,
        participant_id: Uuid,
    },

    /// Call signaling, relayed opaque between the two ends
    #[serde(rename = "call:incoming")]
    CallIncoming {
        conversation_id: Uuid,
        from: Uuid,
        from_name: String,
        payload: serde_json::Value,
    },

    #[serde(rename = "call:accepted")]
    CallAccepted {
        from: Uuid,
        payload: serde_json::Value,
    },

    #[serde(rename = "call:rejected")]
    CallRejected { from: Uuid },

    #[serde(rename = "call:ended")]
    CallEnded { from: Uuid },

    /// A command from this connection failed
    #[serde(rename = "error")]
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Subscribe this connection to a conversation's room-scoped events
    #[serde(rename = "chat:join")]
    Join { conversation_id: Uuid },

    #[serde(rename = "chat:leave")]
    Leave { conversation_id: Uuid },

    #[serde(rename = "message:send")]
    Send {
        conversation_id: Uuid,
        text: Option<String>,
        media_url: Option<String>,
        media_kind: Option<MessageKind>,
        reply_to: Option<Uuid>,
    },

    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "message:seen")]
    MarkSeen {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    },

    #[serde(rename = "call:initiate")]
    CallInitiate {
        conversation_id: Uuid,
        to: Uuid,
        payload: serde_json::Value,
    },

    #[serde(rename = "call:accept")]
    CallAccept {
        to: Uuid,
        payload: serde_json::Value,
    },

    #[serde(rename = "call:reject")]
    CallReject { to: Uuid },

    #[serde(rename = "call:end")]
    CallEnd { to: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_with_wire_names() {
        let event = GatewayEvent::UserTyping {
            conversation_id: Uuid::nil(),
            participant_id: Uuid::nil(),
            name: "ada".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user:typing");
        assert_eq!(json["data"]["name"], "ada");
    }

    #[test]
    fn commands_parse_from_wire_names() {
        let raw = r#"{"type":"chat:join","data":{"conversation_id":"00000000-0000-0000-0000-000000000000"}}"#;
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        assert!(matches!(cmd, ClientCommand::Join { .. }));
    }

    #[test]
    fn send_command_fields_are_optional() {
        let raw = r#"{"type":"message:send","data":{"conversation_id":"00000000-0000-0000-0000-000000000000","text":"hi"}}"#;
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            ClientCommand::Send {
                text, media_url, ..
            } => {
                assert_eq!(text.as_deref(), Some("hi"));
                assert!(media_url.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
