use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use gather_db::{Database, MessageCursor};
use gather_types::api::{
    Claims, ConversationResponse, CreateConversationRequest, MessagePage, MessageQuery,
    SendMessageRequest, SendMessageResponse, UnreadResponse,
};
use gather_types::events::GatewayEvent;
use gather_types::models::{Conversation, ConversationSubject};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Trimmed message text, or a field error.
fn message_text(content: &str) -> Result<&str, ApiError> {
    let text = content.trim();
    if text.is_empty() {
        return Err(ApiError::field("content", "message cannot be empty"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::field(
            "content",
            format!("message must be at most {} characters", MAX_MESSAGE_CHARS),
        ));
    }
    Ok(text)
}

fn page_size(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn subject_exists(db: &Database, subject: ConversationSubject) -> anyhow::Result<bool> {
    Ok(match subject {
        ConversationSubject::Group(id) => db.get_group(&id)?.is_some(),
        ConversationSubject::Event(id) => db.get_event(&id)?.is_some(),
    })
}

/// Load a conversation the user is allowed to read and post in.
fn authorized_conversation(
    db: &Database,
    conversation_id: &Uuid,
    user_id: &Uuid,
) -> Result<Conversation, ApiError> {
    let conversation = db.get_conversation(conversation_id)?.ok_or(ApiError::NotFound)?;
    if !db.is_participant(user_id, conversation.subject)? {
        return Err(ApiError::Forbidden);
    }
    Ok(conversation)
}

/// Open the conversation for a group or event, creating it on first use.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let subject = req.subject;
    let conversation = blocking(move || {
        if !subject_exists(&db, subject)? {
            return Err(ApiError::NotFound);
        }
        if !db.is_participant(&claims.sub, subject)? {
            return Err(ApiError::Forbidden);
        }
        Ok(db.create_or_get_conversation(subject)?)
    })
    .await?;

    Ok(Json(ConversationResponse {
        id: conversation.id,
        subject: conversation.subject,
        created_at: conversation.created_at,
    }))
}

/// One page of history, oldest first. Pass the previous page's
/// `next_cursor` to continue backwards.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let cursor = query
        .cursor
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(MessageCursor::decode)
        .transpose()
        .map_err(|_| ApiError::field("cursor", "invalid cursor"))?;
    let limit = page_size(query.limit);

    let db = state.db.clone();
    let page = blocking(move || {
        authorized_conversation(&db, &conversation_id, &claims.sub)?;
        Ok(db.get_messages(&conversation_id, cursor.as_ref(), limit)?)
    })
    .await?;

    Ok(Json(MessagePage {
        messages: page.messages,
        next_cursor: page.next_cursor.map(|c| c.encode()),
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = message_text(&req.content)?.to_string();

    let db = state.db.clone();
    let sender_id = claims.sub;
    let message = blocking(move || {
        authorized_conversation(&db, &conversation_id, &sender_id)?;
        Ok(db.insert_message(&conversation_id, &sender_id, &text)?)
    })
    .await?;

    debug!("{} posted {} in {}", claims.username, message.id, conversation_id);

    let response = SendMessageResponse {
        id: message.id,
        created_at: message.created_at,
    };
    state.dispatcher.publish(GatewayEvent::MessageCreate { message });

    Ok((StatusCode::CREATED, Json(response)))
}

/// Move the caller's read marker forward. Idempotent.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        authorized_conversation(&db, &conversation_id, &claims.sub)?;
        Ok(db.mark_conversation_read(&claims.sub, &conversation_id)?)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// How many of the caller's conversations have unseen messages.
pub async fn unread_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let count = blocking(move || Ok(db.unread_conversation_count(&claims.sub)?)).await?;
    Ok(Json(UnreadResponse { count }))
}
