use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use gather_types::api::{
    Claims, CreateGroupRequest, GroupResponse, JoinGroupResponse, JoinOutcome, TargetUserRequest,
};
use gather_db::Database;
use gather_types::models::{Group, MemberRole, NotificationKind};

use crate::error::{ApiError, FieldErrors, blocking};
use crate::notifications::notify;
use crate::search::member_count;
use crate::state::AppState;

const NAME_MAX_CHARS: usize = 80;

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let mut errors = FieldErrors::new();
    if name.is_empty() {
        errors.add("name", "name is required");
    } else if name.chars().count() > NAME_MAX_CHARS {
        errors.add("name", format!("name must be at most {} characters", NAME_MAX_CHARS));
    }
    errors.into_result()?;

    let group = Group {
        id: Uuid::new_v4(),
        name,
        description: trimmed(req.description),
        city: trimmed(req.city),
        organizer_id: claims.sub,
        requires_approval: req.requires_approval,
        created_at: Utc::now(),
    };

    let db = state.db.clone();
    let stored = group.clone();
    blocking(move || Ok(db.insert_group(&stored)?)).await?;
    info!("{} created group {}", claims.username, group.id);

    Ok((
        StatusCode::CREATED,
        Json(GroupResponse {
            member_count: member_count(&[], group.organizer_id),
            group,
        }),
    ))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let (group, members) = blocking(move || {
        let group = db.get_group(&group_id)?.ok_or(ApiError::NotFound)?;
        let members = db.member_ids(&group_id)?;
        Ok((group, members))
    })
    .await?;

    Ok(Json(GroupResponse {
        member_count: member_count(&members, group.organizer_id),
        group,
    }))
}

/// Join directly, or file a request the organizer has to approve.
pub async fn join_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();
    let (group, outcome, newly_requested) = blocking(move || {
        let group = db.get_group(&group_id)?.ok_or(ApiError::NotFound)?;
        if group.organizer_id == user_id || db.is_member(&group_id, &user_id)? {
            return Ok((group, JoinOutcome::AlreadyMember, false));
        }
        if group.requires_approval {
            let new = db.add_member_request(&group_id, &user_id)?;
            return Ok((group, JoinOutcome::Requested, new));
        }
        db.add_member(&group_id, &user_id, MemberRole::Member)?;
        Ok((group, JoinOutcome::Joined, false))
    })
    .await?;

    // Only the first request for a user notifies the organizer.
    if newly_requested {
        notify(
            &state,
            group.organizer_id,
            NotificationKind::NewMemberRequest,
            group.id,
            Some(user_id.to_string()),
        )
        .await?;
    }

    Ok(Json(JoinGroupResponse { outcome }))
}

/// Admit a user whose join request is pending. Organizer only.
pub async fn approve_request(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let db = state.db.clone();
    blocking(move || {
        organized_group(&db, &group_id, caller)?;
        if !db.approve_member_request(&group_id, &user_id)? {
            return Err(ApiError::NotFound);
        }
        Ok(())
    })
    .await?;

    info!("{} approved {} into group {}", claims.username, user_id, group_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Turn down a pending join request. The user may ask again later.
pub async fn decline_request(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let db = state.db.clone();
    blocking(move || {
        organized_group(&db, &group_id, caller)?;
        if !db.decline_member_request(&group_id, &user_id)? {
            return Err(ApiError::NotFound);
        }
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Soft delete. The group disappears from lookups and search but its rows
/// stay.
pub async fn delete_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();
    blocking(move || {
        let group = db.get_group(&group_id)?.ok_or(ApiError::NotFound)?;
        if group.organizer_id != user_id {
            return Err(ApiError::Forbidden);
        }
        if !db.soft_delete_group(&group_id)? {
            return Err(ApiError::NotFound);
        }
        Ok(())
    })
    .await?;

    info!("{} deleted group {}", claims.username, group_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn invite_admin(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TargetUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = organizer_group_with_target(&state, group_id, claims.sub, req.user_id, false).await?;
    let notification = notify(
        &state,
        req.user_id,
        NotificationKind::AdminInvite,
        group.id,
        Some(claims.sub.to_string()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// Accept an admin invite sent to the caller, joining as admin if they were
/// not a member yet.
pub async fn accept_admin_invite(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();
    blocking(move || {
        db.get_group(&group_id)?.ok_or(ApiError::NotFound)?;
        if !db.has_notification(&user_id, NotificationKind::AdminInvite, &group_id)? {
            return Err(ApiError::Forbidden);
        }
        db.set_member_role(&group_id, &user_id, MemberRole::Admin)?;
        Ok(())
    })
    .await?;

    info!("{} is now an admin of group {}", claims.username, group_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Ask a member to take over the group. Ownership moves only once they
/// accept.
pub async fn request_transfer(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TargetUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = organizer_group_with_target(&state, group_id, claims.sub, req.user_id, true).await?;
    let notification = notify(
        &state,
        req.user_id,
        NotificationKind::OwnershipTransferRequest,
        group.id,
        Some(claims.sub.to_string()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// Load a group the caller organizes and check the target user.
async fn organizer_group_with_target(
    state: &AppState,
    group_id: Uuid,
    caller: Uuid,
    target: Uuid,
    target_must_be_member: bool,
) -> Result<Group, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        let group = organized_group(&db, &group_id, caller)?;
        if target == caller {
            return Err(ApiError::field("user_id", "you already organize this group"));
        }
        if db.get_user_by_id(&target.to_string())?.is_none() {
            return Err(ApiError::field("user_id", "unknown user"));
        }
        if target_must_be_member && !db.is_member(&group_id, &target)? {
            return Err(ApiError::field("user_id", "user is not a member of this group"));
        }
        Ok(group)
    })
    .await
}

fn organized_group(db: &Database, group_id: &Uuid, caller: Uuid) -> Result<Group, ApiError> {
    let group = db.get_group(group_id)?.ok_or(ApiError::NotFound)?;
    if group.organizer_id != caller {
        return Err(ApiError::Forbidden);
    }
    Ok(group)
}
