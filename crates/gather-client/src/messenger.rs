use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::debug;
use uuid::Uuid;

use gather_types::models::ConversationSubject;

/// The conversation the messenger panel is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTarget {
    pub conversation_id: Uuid,
    pub subject: ConversationSubject,
    /// Heading shown in the panel, e.g. the group or event name.
    pub title: String,
}

/// Runs once when the conversation it was opened with is closed.
pub type OnClose = Box<dyn FnOnce(&ConversationTarget) + Send>;

struct Active {
    target: ConversationTarget,
    on_close: Option<OnClose>,
}

/// Shared messenger state: at most one conversation is open across the
/// whole UI. Clone it into every component that opens or observes the panel.
#[derive(Clone)]
pub struct Messenger {
    active: Arc<Mutex<Option<Active>>>,
    changes: Arc<watch::Sender<Option<ConversationTarget>>>,
}

impl Default for Messenger {
    fn default() -> Self {
        Self::new()
    }
}

impl Messenger {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            active: Arc::new(Mutex::new(None)),
            changes: Arc::new(changes),
        }
    }

    /// Open `target`. A conversation that was already open is closed first
    /// and its callback runs.
    pub async fn open(&self, target: ConversationTarget, on_close: Option<OnClose>) {
        let previous = {
            let mut active = self.active.lock().await;
            // Published under the lock so observers see opens in lock order.
            self.changes.send_replace(Some(target.clone()));
            active.replace(Active {
                target: target.clone(),
                on_close,
            })
        };
        debug!("Messenger opened {}", target.conversation_id);

        if let Some(previous) = previous {
            run_callback(previous);
        }
    }

    /// Close the open conversation, running and clearing its callback.
    /// Returns what was closed.
    pub async fn close(&self) -> Option<ConversationTarget> {
        let closed = {
            let mut active = self.active.lock().await;
            let closed = active.take()?;
            self.changes.send_replace(None);
            closed
        };
        let target = closed.target.clone();
        run_callback(closed);
        Some(target)
    }

    pub async fn current(&self) -> Option<ConversationTarget> {
        self.active.lock().await.as_ref().map(|a| a.target.clone())
    }

    /// Follow open/close transitions.
    pub fn subscribe(&self) -> watch::Receiver<Option<ConversationTarget>> {
        self.changes.subscribe()
    }
}

fn run_callback(active: Active) {
    debug!("Messenger closed {}", active.target.conversation_id);
    if let Some(on_close) = active.on_close {
        on_close(&active.target);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn target(title: &str) -> ConversationTarget {
        ConversationTarget {
            conversation_id: Uuid::new_v4(),
            subject: ConversationSubject::Group(Uuid::new_v4()),
            title: title.into(),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, OnClose) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = count.clone();
        let on_close: OnClose = Box::new(move |_: &ConversationTarget| {
            hook.fetch_add(1, Ordering::SeqCst);
        });
        (count, on_close)
    }

    #[tokio::test]
    async fn callback_runs_once_on_close() {
        let messenger = Messenger::new();
        let (closed, on_close) = counter();

        let chess = target("Chess club");
        messenger.open(chess.clone(), Some(on_close)).await;
        assert_eq!(messenger.current().await, Some(chess.clone()));

        assert_eq!(messenger.close().await, Some(chess));
        assert_eq!(messenger.close().await, None);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(messenger.current().await, None);
    }

    #[tokio::test]
    async fn opening_another_closes_the_first() {
        let messenger = Messenger::new();
        let mut changes = messenger.subscribe();
        let (first_closed, on_close) = counter();

        messenger.open(target("Chess club"), Some(on_close)).await;
        let swim = target("Harbour swim");
        messenger.open(swim.clone(), None).await;

        assert_eq!(first_closed.load(Ordering::SeqCst), 1);
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), Some(swim));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_opens_leave_watch_and_state_agreeing() {
        let messenger = Messenger::new();
        let changes = messenger.subscribe();
        for round in 0..200 {
            let tasks: Vec<_> = (0..4)
                .map(|i| {
                    let messenger = messenger.clone();
                    let title = format!("room {}-{}", round, i);
                    tokio::spawn(async move { messenger.open(target(&title), None).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }
            assert_eq!(*changes.borrow(), messenger.current().await);
        }
    }

    #[tokio::test]
    async fn clones_share_state() {
        let messenger = Messenger::new();
        let panel = messenger.clone();
        messenger.open(target("Book club"), None).await;
        assert!(panel.current().await.is_some());
        panel.close().await;
        assert!(messenger.current().await.is_none());
    }
}
