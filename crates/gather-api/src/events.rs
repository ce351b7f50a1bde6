use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, FixedOffset, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use gather_db::Database;
use gather_db::events::RsvpOutcome;
use gather_recurrence::{Occurrence, RecurrenceRule};
use gather_types::api::{
    AttendeeResponse, Claims, CreateEventRequest, EventResponse, OccurrenceQuery,
    OccurrenceResponse, RsvpRequest, RsvpResponse, UpdateEventRequest,
};
use gather_types::models::{ConversationSubject, Event, Location, Privacy};

use crate::error::{ApiError, FieldErrors, blocking};
use crate::maps::map_link;
use crate::state::AppState;

const TITLE_MAX_CHARS: usize = 120;
const DEFAULT_OCCURRENCES: usize = 5;
const MAX_OCCURRENCES: usize = 52;

/// Normalize and check an event before it is stored. Recurrence fields are
/// rewritten to their canonical form; a blank rule makes the event one-off.
fn validate_event(event: &mut Event, attendee_limit: Option<i64>) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();

    event.title = event.title.trim().to_string();
    if event.title.is_empty() {
        errors.add("title", "title is required");
    } else if event.title.chars().count() > TITLE_MAX_CHARS {
        errors.add("title", format!("title must be at most {} characters", TITLE_MAX_CHARS));
    }

    event.recurrence = match event.recurrence.take().filter(|raw| !raw.is_empty()) {
        None => None,
        Some(raw) => match RecurrenceRule::from_raw(&raw) {
            Ok(rule) => Some(rule.to_raw()),
            Err(e) => {
                errors.add(e.field(), e.to_string());
                Some(raw)
            }
        },
    };

    if event.recurrence.is_none() && event.starts_at.is_none() {
        errors.add("starts_at", "start time is required for one-off events");
    }
    if let (Some(starts_at), Some(ends_at)) = (event.starts_at, event.ends_at) {
        if ends_at < starts_at {
            errors.add("ends_at", "end time must not be before the start");
        }
    }

    if let Location::Address { address, .. } = &mut event.location {
        *address = address.trim().to_string();
        if address.is_empty() {
            errors.add("address", "address is required");
        }
    }

    if let Some(limit) = attendee_limit {
        match u32::try_from(limit) {
            Ok(limit) if limit > 0 => event.attendee_limit = Some(limit),
            _ => errors.add("attendee_limit", "attendee limit must be a positive whole number"),
        }
    }

    errors.into_result()
}

/// Private events are visible to their organizer, RSVP holders and members
/// of the hosting group.
fn can_view(db: &Database, event: &Event, user_id: &Uuid) -> anyhow::Result<bool> {
    if event.privacy != Privacy::Private {
        return Ok(true);
    }
    if db.is_participant(user_id, ConversationSubject::Event(event.id))? {
        return Ok(true);
    }
    match event.group_id {
        Some(group_id) => db.is_participant(user_id, ConversationSubject::Group(group_id)),
        None => Ok(false),
    }
}

fn load_visible_event(db: &Database, event_id: &Uuid, user_id: &Uuid) -> Result<Event, ApiError> {
    let event = db.get_event(event_id)?.ok_or(ApiError::NotFound)?;
    if !can_view(db, &event, user_id)? {
        return Err(ApiError::Forbidden);
    }
    Ok(event)
}

/// Resolve the reference time for occurrences from the optional
/// `tz_offset` (seconds east of UTC) and requested count.
fn occurrence_window(query: &OccurrenceQuery) -> Result<(DateTime<FixedOffset>, usize), ApiError> {
    let mut errors = FieldErrors::new();

    let count = query.count.unwrap_or(DEFAULT_OCCURRENCES);
    if count == 0 || count > MAX_OCCURRENCES {
        errors.add("count", format!("count must be between 1 and {}", MAX_OCCURRENCES));
    }

    let offset = FixedOffset::east_opt(query.tz_offset.unwrap_or(0));
    if offset.is_none() {
        errors.add("tz_offset", "tz_offset must be within a day of UTC");
    }

    errors.into_result()?;
    let offset = offset.ok_or_else(|| ApiError::field("tz_offset", "invalid offset"))?;
    Ok((Utc::now().with_timezone(&offset), count))
}

/// Upcoming occurrences, or none for a one-off event. A stored rule that no
/// longer parses is logged and treated as having no occurrences.
fn upcoming(event: &Event, from: DateTime<FixedOffset>, count: usize) -> Vec<OccurrenceResponse> {
    let Some(raw) = &event.recurrence else {
        return Vec::new();
    };
    match gather_recurrence::compute_next_occurrences(raw, from, count) {
        Ok(occurrences) => occurrences.into_iter().map(to_response).collect(),
        Err(e) => {
            warn!("Event {} has an unusable recurrence rule: {}", event.id, e);
            Vec::new()
        }
    }
}

fn to_response(occurrence: Occurrence) -> OccurrenceResponse {
    OccurrenceResponse {
        starts_at: occurrence.starts_at,
        label: occurrence.label,
    }
}

fn event_response(
    state: &AppState,
    event: Event,
    attendee_count: u32,
    from: DateTime<FixedOffset>,
    count: usize,
) -> EventResponse {
    EventResponse {
        occurrences: upcoming(&event, from, count),
        map: map_link(&event.location, state.maps_api_key.as_deref()),
        attendee_count,
        event,
    }
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let mut event = Event {
        id: Uuid::new_v4(),
        organizer_id: claims.sub,
        group_id: req.group_id,
        title: req.title,
        description: req.description,
        kind: req.kind,
        privacy: req.privacy,
        starts_at: req.starts_at,
        ends_at: req.ends_at,
        recurrence: req.recurrence,
        location: req.location,
        attendee_limit: None,
        created_at: now,
        updated_at: now,
    };
    validate_event(&mut event, req.attendee_limit)?;

    let db = state.db.clone();
    let stored = event.clone();
    let user_id = claims.sub;
    blocking(move || {
        if let Some(group_id) = stored.group_id {
            db.get_group(&group_id)?
                .ok_or_else(|| ApiError::field("group_id", "unknown group"))?;
            if !db.is_participant(&user_id, ConversationSubject::Group(group_id))? {
                return Err(ApiError::Forbidden);
            }
        }
        Ok(db.insert_event(&stored)?)
    })
    .await?;

    info!("{} created event {}", claims.username, event.id);
    let from = now.fixed_offset();
    Ok((
        StatusCode::CREATED,
        Json(event_response(&state, event, 0, from, DEFAULT_OCCURRENCES)),
    ))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<OccurrenceQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (from, count) = occurrence_window(&query)?;
    let db = state.db.clone();
    let (event, going) = blocking(move || {
        let event = load_visible_event(&db, &event_id, &claims.sub)?;
        let going = db.count_going(&event_id)?;
        Ok((event, going))
    })
    .await?;

    Ok(Json(event_response(&state, event, going, from, count)))
}

/// Organizer-only partial edit. Concurrent edits are last-write-wins.
pub async fn update_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let (event, going) = blocking(move || {
        let mut event = db.get_event(&event_id)?.ok_or(ApiError::NotFound)?;
        if event.organizer_id != user_id {
            return Err(ApiError::Forbidden);
        }

        if let Some(title) = req.title {
            event.title = title;
        }
        if let Some(description) = req.description {
            event.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(kind) = req.kind {
            event.kind = kind;
        }
        if let Some(privacy) = req.privacy {
            event.privacy = privacy;
        }
        if req.starts_at.is_some() {
            event.starts_at = req.starts_at;
        }
        if req.ends_at.is_some() {
            event.ends_at = req.ends_at;
        }
        if req.recurrence.is_some() {
            event.recurrence = req.recurrence;
        }
        if let Some(location) = req.location {
            event.location = location;
        }
        validate_event(&mut event, req.attendee_limit)?;
        event.updated_at = Utc::now();

        if !db.update_event(&event)? {
            return Err(ApiError::NotFound);
        }
        let going = db.count_going(&event_id)?;
        Ok((event, going))
    })
    .await?;

    info!("{} updated event {}", claims.username, event_id);
    let from = Utc::now().fixed_offset();
    Ok(Json(event_response(&state, event, going, from, DEFAULT_OCCURRENCES)))
}

pub async fn list_occurrences(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<OccurrenceQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (from, count) = occurrence_window(&query)?;
    let db = state.db.clone();
    let event = blocking(move || load_visible_event(&db, &event_id, &claims.sub)).await?;
    Ok(Json(upcoming(&event, from, count)))
}

/// RSVP to the whole series, or to one occurrence via `occurrence_at`.
pub async fn rsvp(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RsvpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let status = req.status;
    let db = state.db.clone();
    let (occurrence_at, outcome) = blocking(move || {
        let event = load_visible_event(&db, &event_id, &user_id)?;

        let occurrence_at = match req.occurrence_at {
            None => None,
            Some(at) => Some(check_occurrence(&event, at)?),
        };

        let outcome =
            db.upsert_rsvp(&event_id, &user_id, status, occurrence_at, event.attendee_limit)?;
        Ok((occurrence_at, outcome))
    })
    .await?;

    match outcome {
        RsvpOutcome::Full => Err(ApiError::Conflict("event is full".into())),
        RsvpOutcome::Saved { updated_at } => Ok(Json(RsvpResponse {
            event_id,
            user_id,
            status,
            occurrence_at,
            updated_at,
        })),
    }
}

/// `at` must be a future occurrence of the event's rule.
fn check_occurrence(event: &Event, at: DateTime<FixedOffset>) -> Result<DateTime<Utc>, ApiError> {
    let raw = event
        .recurrence
        .as_ref()
        .ok_or_else(|| ApiError::field("occurrence_at", "event does not repeat"))?;
    let rule = RecurrenceRule::from_raw(raw)
        .map_err(|e| anyhow::anyhow!("stored rule for {} is invalid: {}", event.id, e))?;

    if !rule.matches(at) {
        return Err(ApiError::field("occurrence_at", "not an occurrence of this event"));
    }
    let at = at.with_timezone(&Utc);
    if at <= Utc::now() {
        return Err(ApiError::field("occurrence_at", "occurrence has already started"));
    }
    Ok(at)
}

pub async fn list_attendees(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = blocking(move || {
        load_visible_event(&db, &event_id, &claims.sub)?;
        Ok(db.list_attendees(&event_id)?)
    })
    .await?;

    let attendees: Vec<AttendeeResponse> = rows
        .into_iter()
        .map(|row| AttendeeResponse {
            user_id: row.user_id,
            username: row.username,
            status: row.status,
            occurrence_at: row.occurrence_at,
        })
        .collect();
    Ok(Json(attendees))
}
