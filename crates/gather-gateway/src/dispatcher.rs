use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use gather_types::events::GatewayEvent;

const CONVERSATION_BACKLOG: usize = 1024;

/// The live gateway connection of one user.
struct Session {
    id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Fans gateway events out to connected clients.
///
/// Conversation-scoped events go through one broadcast channel and each
/// connection filters by its own subscriptions. Notifications are targeted
/// at a single user through that user's session.
#[derive(Clone)]
pub struct Dispatcher {
    conversations: broadcast::Sender<GatewayEvent>,
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (conversations, _) = broadcast::channel(CONVERSATION_BACKLOG);
        Self {
            conversations,
            sessions: Arc::default(),
        }
    }

    pub fn subscribe_conversations(&self) -> broadcast::Receiver<GatewayEvent> {
        self.conversations.subscribe()
    }

    /// Publish a conversation-scoped event. Dropped when nobody is connected.
    pub fn publish(&self, event: GatewayEvent) {
        if self.conversations.send(event).is_err() {
            tracing::trace!("No gateway listeners for published event");
        }
    }

    /// Start a session for `user_id`, replacing any older one. Returns the
    /// session id needed to detach and the receiving end for targeted events.
    pub async fn attach(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            id: Uuid::new_v4(),
            tx,
        };
        let id = session.id;
        self.sessions.write().await.insert(user_id, session);
        (id, rx)
    }

    /// End a session. A stale session id leaves the newer session in place.
    pub async fn detach(&self, user_id: Uuid, session_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(&user_id).is_some_and(|s| s.id == session_id) {
            sessions.remove(&user_id);
        }
    }

    /// Deliver an event to one user. False when they have no live session.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        match self.sessions.read().await.get(&user_id) {
            Some(session) => session.tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use gather_types::models::{Message, Notification, NotificationKind};

    use super::*;

    fn notification(recipient: Uuid) -> GatewayEvent {
        GatewayEvent::NotificationCreate {
            notification: Notification {
                id: Uuid::new_v4(),
                recipient_id: recipient,
                kind: NotificationKind::AdminInvite,
                group_id: Uuid::new_v4(),
                related_id: None,
                read_at: None,
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn targeted_events_reach_only_the_latest_session() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_session, mut old_rx) = dispatcher.attach(user).await;
        let (new_session, mut new_rx) = dispatcher.attach(user).await;

        assert!(dispatcher.send_to_user(user, notification(user)).await);
        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());

        // A stale session closing must not drop the live one.
        dispatcher.detach(user, old_session).await;
        assert!(dispatcher.send_to_user(user, notification(user)).await);

        dispatcher.detach(user, new_session).await;
        assert!(!dispatcher.send_to_user(user, notification(user)).await);
    }

    #[tokio::test]
    async fn published_events_carry_conversation_scope() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe_conversations();
        let conversation_id = Uuid::new_v4();
        dispatcher.publish(GatewayEvent::MessageCreate {
            message: Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id: Uuid::new_v4(),
                sender_username: "ada".into(),
                content: "hi".into(),
                created_at: Utc::now(),
            },
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.conversation_id(), Some(conversation_id));
    }
}
