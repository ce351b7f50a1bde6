use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use gather_types::api::{Claims, UnreadResponse};
use gather_types::events::GatewayEvent;
use gather_types::models::{Notification, NotificationKind};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

const LIST_LIMIT: u32 = 50;

/// Store a notification and push it to the recipient if they are connected.
pub(crate) async fn notify(
    state: &AppState,
    recipient_id: Uuid,
    kind: NotificationKind,
    group_id: Uuid,
    related_id: Option<String>,
) -> Result<Notification, ApiError> {
    let notification = Notification {
        id: Uuid::new_v4(),
        recipient_id,
        kind,
        group_id,
        related_id,
        read_at: None,
        created_at: Utc::now(),
    };

    let db = state.db.clone();
    let stored = notification.clone();
    blocking(move || Ok(db.insert_notification(&stored)?)).await?;

    let delivered = state
        .dispatcher
        .send_to_user(
            recipient_id,
            GatewayEvent::NotificationCreate {
                notification: notification.clone(),
            },
        )
        .await;
    if !delivered {
        debug!("{} is offline, {} notification stored only", recipient_id, kind);
    }

    Ok(notification)
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let notifications =
        blocking(move || Ok(db.list_notifications(&claims.sub, LIST_LIMIT)?)).await?;
    Ok(Json(notifications))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let count = blocking(move || Ok(db.unread_notification_count(&claims.sub)?)).await?;
    Ok(Json(UnreadResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let found =
        blocking(move || Ok(db.mark_notification_read(&claims.sub, &notification_id)?)).await?;
    if !found {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();
    let changed = blocking(move || Ok(db.mark_all_notifications_read(&user_id)?)).await?;
    debug!("{} marked {} notifications read", user_id, changed);
    Ok(StatusCode::NO_CONTENT)
}
