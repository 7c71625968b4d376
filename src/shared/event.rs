/**
 * Real-time Event Frames
 *
 * This module defines the WebSocket wire protocol. Every text frame is a JSON
 * envelope `{"type": "...", "payload": {...}}`; the `type` values are
 * snake_case and payload fields are camelCase.
 *
 * Client → server: `join_channel`, `leave_channel`, `post_message`,
 * `typing`, `update_read_state`.
 *
 * Server → client: `new_message`, `message_updated`, `message_deleted`,
 * `unread_count`, `typing`, `ack`, `error`.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::SharedError;
use crate::shared::message::MessageView;

/// Frame sent by a client over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinChannel(ChannelRef),
    LeaveChannel(ChannelRef),
    /// Intent only; the message itself is created through the HTTP API.
    PostMessage(PostMessageIntent),
    Typing(ChannelRef),
    /// Intent only; the watermark itself is written through the HTTP API.
    UpdateReadState(ReadStateIntent),
}

impl ClientFrame {
    /// Parse a client text frame
    pub fn parse(text: &str) -> Result<Self, SharedError> {
        serde_json::from_str(text)
            .map_err(|e| SharedError::validation("frame", format!("malformed frame: {}", e)))
    }

    /// Wire name of this frame's type, echoed back in acks
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinChannel(_) => "join_channel",
            Self::LeaveChannel(_) => "leave_channel",
            Self::PostMessage(_) => "post_message",
            Self::Typing(_) => "typing",
            Self::UpdateReadState(_) => "update_read_state",
        }
    }

    pub fn channel_id(&self) -> Uuid {
        match self {
            Self::JoinChannel(c) | Self::LeaveChannel(c) | Self::Typing(c) => c.channel_id,
            Self::PostMessage(p) => p.channel_id,
            Self::UpdateReadState(r) => r.channel_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub channel_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageIntent {
    pub channel_id: Uuid,
    /// Client-side correlation id, echoed in the ack
    #[serde(default)]
    pub client_msg_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadStateIntent {
    pub channel_id: Uuid,
    pub last_read_at: DateTime<Utc>,
}

/// Frame sent by the server over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    NewMessage(MessageEnvelope),
    MessageUpdated(MessageEnvelope),
    MessageDeleted(DeletedEnvelope),
    UnreadCount(UnreadCountEnvelope),
    Typing(TypingEnvelope),
    Ack(AckEnvelope),
    Error(ErrorEnvelope),
}

impl ServerFrame {
    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> Result<String, SharedError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorEnvelope {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn ack(of: &str, channel_id: Option<Uuid>, client_msg_id: Option<String>) -> Self {
        Self::Ack(AckEnvelope {
            of: of.to_string(),
            channel_id,
            client_msg_id,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub channel_id: Uuid,
    pub message: MessageView,
}

/// Deleted message ids, including cascaded thread replies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedEnvelope {
    pub channel_id: Uuid,
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountEnvelope {
    pub channel_id: Uuid,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingEnvelope {
    pub channel_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckEnvelope {
    /// Type of the client frame being acknowledged
    pub of: String,
    pub channel_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_channel() {
        let id = Uuid::new_v4();
        let text = format!(r#"{{"type":"join_channel","payload":{{"channelId":"{}"}}}}"#, id);
        let frame = ClientFrame::parse(&text).unwrap();
        assert_eq!(frame, ClientFrame::JoinChannel(ChannelRef { channel_id: id }));
        assert_eq!(frame.kind(), "join_channel");
        assert_eq!(frame.channel_id(), id);
    }

    #[test]
    fn test_parse_update_read_state() {
        let id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"update_read_state","payload":{{"channelId":"{}","lastReadAt":"2024-05-01T10:00:00Z"}}}}"#,
            id
        );
        match ClientFrame::parse(&text).unwrap() {
            ClientFrame::UpdateReadState(intent) => {
                assert_eq!(intent.channel_id, id);
                assert_eq!(intent.last_read_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
            }
            other => panic!("Expected UpdateReadState, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_type_is_validation_error() {
        let result = ClientFrame::parse(r#"{"type":"shout","payload":{}}"#);
        assert!(matches!(result, Err(SharedError::ValidationError { .. })));
    }

    #[test]
    fn test_server_frame_envelope_shape() {
        let channel_id = Uuid::new_v4();
        let frame = ServerFrame::MessageDeleted(DeletedEnvelope {
            channel_id,
            message_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        });
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "message_deleted");
        assert_eq!(json["payload"]["channelId"], channel_id.to_string());
        assert_eq!(json["payload"]["messageIds"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_ack_omits_missing_correlation_id() {
        let frame = ServerFrame::ack("typing", None, None);
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["payload"]["of"], "typing");
        assert!(json["payload"].get("clientMsgId").is_none());
    }
}
