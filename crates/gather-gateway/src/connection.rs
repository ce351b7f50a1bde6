use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use gather_db::Database;
use gather_types::api::Claims;
use gather_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

const PING_EVERY: Duration = Duration::from_secs(15);
/// Consecutive unanswered pings before the connection is dropped.
const MAX_MISSED_PONGS: u8 = 2;
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;
type Sink = SplitSink<WebSocket, Message>;

/// Pong bookkeeping shared by the reader (sets) and the writer (checks).
struct Heartbeat {
    answered: Arc<AtomicBool>,
    missed: u8,
}

impl Heartbeat {
    fn new() -> Self {
        Self {
            answered: Arc::new(AtomicBool::new(true)),
            missed: 0,
        }
    }

    /// Called on every ping tick. False once too many pings went unanswered.
    fn still_alive(&mut self) -> bool {
        if self.answered.swap(false, Ordering::AcqRel) {
            self.missed = 0;
        } else {
            self.missed += 1;
        }
        self.missed < MAX_MISSED_PONGS
    }
}

/// Serve one WebSocket client: wait for `Identify`, answer `Ready`, then
/// push subscribed conversation messages and the user's own notifications
/// until either side hangs up.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sink, mut stream) = socket.split();

    let Some(claims) = wait_for_identify(&mut stream, &jwt_secret).await else {
        warn!("Gateway client never identified, closing");
        return;
    };
    let user_id = claims.sub;

    let ready = GatewayEvent::Ready {
        user_id,
        username: claims.username.clone(),
    };
    if send_event(&mut sink, &ready).await.is_err() {
        return;
    }
    info!("Gateway session opened for {} ({})", claims.username, user_id);

    let (session_id, targeted) = dispatcher.attach(user_id).await;
    let subscriptions: Subscriptions = Arc::default();
    let heartbeat = Heartbeat::new();
    let answered = heartbeat.answered.clone();

    let mut writer = tokio::spawn(write_loop(
        sink,
        dispatcher.subscribe_conversations(),
        targeted,
        subscriptions.clone(),
        heartbeat,
    ));
    let mut reader = tokio::spawn(read_loop(stream, db, user_id, subscriptions, answered));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    dispatcher.detach(user_id, session_id).await;
    info!("Gateway session closed for {} ({})", claims.username, user_id);
}

async fn write_loop(
    mut sink: Sink,
    mut conversations: broadcast::Receiver<GatewayEvent>,
    mut targeted: mpsc::UnboundedReceiver<GatewayEvent>,
    subscriptions: Subscriptions,
    mut heartbeat: Heartbeat,
) {
    let mut ping = tokio::time::interval(PING_EVERY);
    ping.tick().await;

    loop {
        let event = tokio::select! {
            received = conversations.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Gateway writer fell behind, skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return,
            },
            received = targeted.recv() => match received {
                Some(event) => event,
                None => return,
            },
            _ = ping.tick() => {
                if !heartbeat.still_alive() {
                    warn!("No pong after {} pings, dropping gateway client", MAX_MISSED_PONGS);
                    return;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
                continue;
            }
        };

        if let Some(conversation_id) = event.conversation_id() {
            if !subscriptions.read().await.contains(&conversation_id) {
                continue;
            }
        }
        if send_event(&mut sink, &event).await.is_err() {
            return;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    db: Arc<Database>,
    user_id: Uuid,
    subscriptions: Subscriptions,
    answered: Arc<AtomicBool>,
) {
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                Ok(command) => handle_command(&db, user_id, command, &subscriptions).await,
                Err(e) => {
                    let preview: String = text.chars().take(200).collect();
                    warn!("Unparseable gateway command from {}: {} ({})", user_id, e, preview);
                }
            },
            Message::Pong(_) => answered.store(true, Ordering::Release),
            Message::Close(_) => return,
            _ => {}
        }
    }
}

async fn send_event(sink: &mut Sink, event: &GatewayEvent) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        warn!("Could not encode gateway event: {}", e);
    })?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Read frames until a valid `Identify` arrives. Anything else before it is
/// ignored; a bad token or the timeout ends the handshake.
async fn wait_for_identify(
    stream: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    let key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let handshake = async {
        while let Some(Ok(frame)) = stream.next().await {
            let Message::Text(text) = frame else { continue };
            let Ok(GatewayCommand::Identify { token }) = serde_json::from_str(&text) else {
                continue;
            };
            return decode::<Claims>(&token, &key, &Validation::default())
                .map(|data| data.claims)
                .ok();
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, handshake)
        .await
        .ok()
        .flatten()
}

async fn handle_command(
    db: &Arc<Database>,
    user_id: Uuid,
    command: GatewayCommand,
    subscriptions: &Subscriptions,
) {
    let GatewayCommand::Subscribe { conversation_ids } = command else {
        // A repeated Identify changes nothing.
        return;
    };

    let requested = conversation_ids.len();
    let db = db.clone();
    let checked =
        tokio::task::spawn_blocking(move || allowed_conversations(&db, user_id, conversation_ids))
            .await;

    match checked {
        Ok(Ok(allowed)) => {
            debug!(
                "{} subscribed to {} of {} requested conversations",
                user_id,
                allowed.len(),
                requested
            );
            *subscriptions.write().await = allowed;
        }
        Ok(Err(e)) => warn!("Subscription check failed for {}: {:#}", user_id, e),
        Err(e) => warn!("Subscription check task failed: {}", e),
    }
}

/// Keep only conversations whose subject the user takes part in.
fn allowed_conversations(
    db: &Database,
    user_id: Uuid,
    conversation_ids: Vec<Uuid>,
) -> anyhow::Result<HashSet<Uuid>> {
    let mut allowed = HashSet::new();
    for id in conversation_ids {
        if let Some(conversation) = db.get_conversation(&id)? {
            if db.is_participant(&user_id, conversation.subject)? {
                allowed.insert(id);
            }
        }
    }
    Ok(allowed)
}
