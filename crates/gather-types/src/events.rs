use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Notification};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A message was appended to a conversation
    MessageCreate { message: Message },

    /// A notification was created for the receiving user
    NotificationCreate { notification: Notification },
}

impl GatewayEvent {
    /// Returns the conversation id if this event is scoped to a conversation.
    /// Scoped events are only forwarded to connections subscribed to it.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.conversation_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace the set of conversations this connection receives messages for.
    Subscribe { conversation_ids: Vec<Uuid> },
}
