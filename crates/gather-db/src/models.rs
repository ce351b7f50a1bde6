//! Database row types. These map directly to SQLite rows and are converted
//! into gather-types models at the edge of this crate.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use gather_types::models::{
    Event, EventKind, Group, Location, Message, Notification, NotificationKind, Privacy,
    RawRecurrence, RsvpStatus,
};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct EventRow {
    pub id: String,
    pub organizer_id: String,
    pub group_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub kind: String,
    pub privacy: String,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    pub repeat_interval: Option<String>,
    pub recurrence_weekday: Option<String>,
    pub recurrence_week_of_month: Option<String>,
    pub recurrence_start_date: Option<String>,
    pub recurrence_time: Option<String>,
    pub location_kind: String,
    pub address: Option<String>,
    pub location_name: Option<String>,
    pub online_url: Option<String>,
    pub attendee_limit: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub city: Option<String>,
    pub organizer_id: String,
    pub requires_approval: bool,
    pub created_at: String,
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub created_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub recipient_id: String,
    pub kind: String,
    pub group_id: String,
    pub related_id: Option<String>,
    pub read_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct RsvpRow {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub status: RsvpStatus,
    pub occurrence_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Fixed-width UTC text so lexical order matches chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("invalid timestamp '{}'", raw))
}

pub fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("invalid uuid '{}'", raw))
}

fn parse_opt_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

impl TryFrom<EventRow> for Event {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> Result<Self> {
        let location = match row.location_kind.as_str() {
            "address" => Location::Address {
                address: row.address.unwrap_or_default(),
                location_name: row.location_name,
            },
            "online" => Location::Online { url: row.online_url },
            other => return Err(anyhow!("unknown location kind '{}' on event {}", other, row.id)),
        };

        let recurrence = row.repeat_interval.is_some().then(|| RawRecurrence {
            repeat_interval: row.repeat_interval,
            recurrence_weekday: row.recurrence_weekday,
            recurrence_week_of_month: row.recurrence_week_of_month,
            recurrence_start_date: row.recurrence_start_date,
            recurrence_time: row.recurrence_time,
        });

        Ok(Event {
            id: parse_uuid(&row.id)?,
            organizer_id: parse_uuid(&row.organizer_id)?,
            group_id: row.group_id.as_deref().map(parse_uuid).transpose()?,
            title: row.title,
            description: row.description,
            kind: row.kind.parse::<EventKind>()?,
            privacy: row.privacy.parse::<Privacy>()?,
            starts_at: parse_opt_timestamp(row.starts_at)?,
            ends_at: parse_opt_timestamp(row.ends_at)?,
            recurrence,
            location,
            attendee_limit: row.attendee_limit.and_then(|n| u32::try_from(n).ok()),
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TryFrom<GroupRow> for Group {
    type Error = anyhow::Error;

    fn try_from(row: GroupRow) -> Result<Self> {
        Ok(Group {
            id: parse_uuid(&row.id)?,
            name: row.name,
            description: row.description,
            city: row.city,
            organizer_id: parse_uuid(&row.organizer_id)?,
            requires_approval: row.requires_approval,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_uuid(&row.id)?,
            conversation_id: parse_uuid(&row.conversation_id)?,
            sender_id: parse_uuid(&row.sender_id)?,
            sender_username: row.sender_username,
            content: row.content,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: parse_uuid(&row.id)?,
            recipient_id: parse_uuid(&row.recipient_id)?,
            kind: row.kind.parse::<NotificationKind>()?,
            group_id: parse_uuid(&row.group_id)?,
            related_id: row.related_id,
            read_at: parse_opt_timestamp(row.read_at)?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

/// Extension trait for optional query results
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
