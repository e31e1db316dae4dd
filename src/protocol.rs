use crate::types::ClientId;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current time as an ISO8601 string (`2026-01-01T12:00:00.000Z`)
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application-level keepalive, for clients that cannot send transport pings
    Ping,
    /// Any other kind. Acknowledged generically so newer clients keep working.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Decode an inbound text frame.
    ///
    /// Only frames that are not JSON at all are rejected; valid JSON without a
    /// recognised `type` decodes to [`ClientMessage::Unknown`].
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::deserialize(&value).unwrap_or(ClientMessage::Unknown))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection {
        message: String,
        #[serde(rename = "clientId")]
        client_id: ClientId,
        timestamp: String,
    },
    Pong {
        timestamp: String,
    },
    Error {
        message: String,
        timestamp: String,
    },
    Acknowledge {
        message: String,
        timestamp: String,
    },
}

impl ServerMessage {
    pub fn connection(client_id: ClientId) -> Self {
        ServerMessage::Connection {
            message: "Connected to connection hub".to_string(),
            client_id,
            timestamp: now_iso(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: now_iso(),
        }
    }

    pub fn malformed() -> Self {
        ServerMessage::Error {
            message: "Invalid message format".to_string(),
            timestamp: now_iso(),
        }
    }

    pub fn acknowledge() -> Self {
        ServerMessage::Acknowledge {
            message: "Message received".to_string(),
            timestamp: now_iso(),
        }
    }
}

/// Anything the server can put on the wire, as seen by a client.
///
/// Control messages carry a `type` tag; broadcast events are free-form objects.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Control(ServerMessage),
    Event(Value),
}

impl InboundMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => Ok(InboundMessage::Control(msg)),
            Err(_) => serde_json::from_str::<Value>(text).map(InboundMessage::Event),
        }
    }
}

/// Body of `POST /api/push`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    pub event: Option<String>,
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

pub const MATCH_EVENT: &str = "match";
