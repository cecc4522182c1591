use serde::{Deserialize, Serialize};

use crate::broadcast::ChatMessage;

/// Signals sent from client to server.
///
/// Names and payload shapes are part of the client contract and must
/// stay stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientSignal {
    #[serde(rename = "join-event", rename_all = "camelCase")]
    JoinEvent { event_id: String },
    #[serde(rename = "leave-event", rename_all = "camelCase")]
    LeaveEvent { event_id: String },
    #[serde(rename = "chat-message", rename_all = "camelCase")]
    ChatMessage { event_id: String, body: String },
    #[serde(rename = "ping")]
    Ping,
}

/// Signals sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerSignal {
    /// Ordered membership snapshot for one room
    #[serde(rename = "active-users", rename_all = "camelCase")]
    ActiveUsers {
        event_id: String,
        users: Vec<String>,
    },
    #[serde(rename = "chat-message")]
    Chat {
        #[serde(flatten)]
        message: ChatMessage,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerSignal {
    pub fn active_users(event_id: &str, users: Vec<String>) -> Self {
        Self::ActiveUsers {
            event_id: event_id.to_string(),
            users,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
