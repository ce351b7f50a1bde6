use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use gather_types::api::{MessagePage, SendMessageResponse};
use gather_types::models::Message;

use crate::error::ClientError;

/// Cloneable handle that reports whether the owning view is still on screen.
/// Loads started before an unmount check it before touching the view.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn is_mounted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Messages of one conversation as the UI shows them, oldest first.
///
/// Older pages are prepended as the user scrolls back. Sent messages are
/// appended immediately with a local timestamp and never reconciled with the
/// server's, so the order can differ slightly from a fresh load.
#[derive(Debug)]
pub struct ConversationView {
    conversation_id: Uuid,
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
    next_cursor: Option<String>,
    loaded_once: bool,
    mounted: Arc<AtomicBool>,
}

pub type SharedView = Arc<Mutex<ConversationView>>;

impl ConversationView {
    pub fn mount(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            seen: HashSet::new(),
            next_cursor: None,
            loaded_once: false,
            mounted: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True until a page arrives without a `next_cursor`.
    pub fn has_older(&self) -> bool {
        !self.loaded_once || self.next_cursor.is_some()
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref()
    }

    pub fn liveness(&self) -> Liveness {
        Liveness(self.mounted.clone())
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    /// Prepend an older page, skipping messages already shown.
    pub fn apply_page(&mut self, page: MessagePage) {
        let older: Vec<Message> = page
            .messages
            .into_iter()
            .filter(|m| self.seen.insert(m.id))
            .collect();
        self.messages.splice(0..0, older);
        self.next_cursor = page.next_cursor;
        self.loaded_once = true;
    }

    /// Append a message this client just sent, stamped with local time.
    pub fn append_optimistic(
        &mut self,
        sent: &SendMessageResponse,
        sender_id: Uuid,
        sender_username: &str,
        content: &str,
    ) {
        self.push(Message {
            id: sent.id,
            conversation_id: self.conversation_id,
            sender_id,
            sender_username: sender_username.to_string(),
            content: content.trim().to_string(),
            created_at: Utc::now(),
        });
    }

    /// Append a message pushed by the gateway. Ignored for other
    /// conversations and for messages already shown.
    pub fn receive(&mut self, message: Message) {
        if message.conversation_id == self.conversation_id {
            self.push(message);
        }
    }

    fn push(&mut self, message: Message) {
        if self.seen.insert(message.id) {
            self.messages.push(message);
        }
    }
}

/// Fetch the page before the view's current cursor and prepend it.
///
/// The view is not locked while the request is in flight. Returns false when
/// nothing was applied: there was nothing older, or the view was unmounted
/// before the response arrived.
pub async fn load_older<F, Fut>(view: &SharedView, fetch: F) -> Result<bool, ClientError>
where
    F: FnOnce(Uuid, Option<String>) -> Fut,
    Fut: Future<Output = Result<MessagePage, ClientError>>,
{
    let (conversation_id, cursor, liveness) = {
        let view = view.lock().await;
        if !view.has_older() {
            return Ok(false);
        }
        (view.conversation_id(), view.next_cursor.clone(), view.liveness())
    };

    let page = fetch(conversation_id, cursor).await?;

    if !liveness.is_mounted() {
        debug!("Dropping page for {}, view unmounted", conversation_id);
        return Ok(false);
    }
    view.lock().await.apply_page(page);
    Ok(true)
}
