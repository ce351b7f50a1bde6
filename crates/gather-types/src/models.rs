use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lenient;

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str` / `FromStr` for a closed string enum so the DB layer
/// and the JSON layer agree on the encoding.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Flagship,
    Standard,
    Lightning,
}

string_enum!(EventKind, "event kind", {
    Flagship => "flagship",
    Standard => "standard",
    Lightning => "lightning",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Private,
    Exclusive,
}

string_enum!(Privacy, "privacy level", {
    Public => "public",
    Private => "private",
    Exclusive => "exclusive",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Going,
    NotGoing,
}

string_enum!(RsvpStatus, "rsvp status", {
    Going => "going",
    NotGoing => "not_going",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Member,
    Admin,
}

string_enum!(MemberRole, "member role", {
    Member => "member",
    Admin => "admin",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewMemberRequest,
    OwnershipTransferRequest,
    AdminInvite,
}

string_enum!(NotificationKind, "notification type", {
    NewMemberRequest => "new_member_request",
    OwnershipTransferRequest => "ownership_transfer_request",
    AdminInvite => "admin_invite",
});

/// Where an event takes place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Address {
        address: String,
        #[serde(default)]
        location_name: Option<String>,
    },
    Online {
        #[serde(default)]
        url: Option<String>,
    },
}

/// Recurrence fields as they arrive from forms and stored rows.
///
/// Every field is optional and may arrive as a string or a number; the
/// resolver decides which combination is valid for the interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecurrence {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub repeat_interval: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub recurrence_weekday: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub recurrence_week_of_month: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub recurrence_start_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub recurrence_time: Option<String>,
}

impl RawRecurrence {
    /// True when no recurrence field was given at all. A weekday or time
    /// without an interval is not empty; it is an incomplete rule.
    pub fn is_empty(&self) -> bool {
        self.repeat_interval.is_none()
            && self.recurrence_weekday.is_none()
            && self.recurrence_week_of_month.is_none()
            && self.recurrence_start_date.is_none()
            && self.recurrence_time.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub group_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub kind: EventKind,
    pub privacy: Privacy,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub recurrence: Option<RawRecurrence>,
    pub location: Location,
    pub attendee_limit: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub city: Option<String>,
    pub organizer_id: Uuid,
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
}

/// The group or event a conversation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ConversationSubject {
    Group(Uuid),
    Event(Uuid),
}

impl ConversationSubject {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::Event(_) => "event",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Group(id) | Self::Event(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Result<Self, UnknownVariant> {
        match kind {
            "group" => Ok(Self::Group(id)),
            "event" => Ok(Self::Event(id)),
            other => Err(UnknownVariant {
                kind: "conversation subject",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub subject: ConversationSubject,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub group_id: Uuid,
    pub related_id: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
