use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use gather_types::models::{Event, Location, RsvpStatus};

use crate::Database;
use crate::models::{
    EventRow, OptionalExt, RsvpRow, format_timestamp, parse_timestamp, parse_uuid,
};

const EVENT_COLUMNS: &str = "id, organizer_id, group_id, title, description, kind, privacy, \
     starts_at, ends_at, repeat_interval, recurrence_weekday, recurrence_week_of_month, \
     recurrence_start_date, recurrence_time, location_kind, address, location_name, online_url, \
     attendee_limit, created_at, updated_at";

/// Result of an RSVP write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RsvpOutcome {
    Saved { updated_at: DateTime<Utc> },
    /// Every seat for the series (or the pinned occurrence) is taken.
    Full,
}

impl Database {
    // -- Events --

    pub fn insert_event(&self, event: &Event) -> Result<()> {
        self.with_conn(|conn| {
            let sql = format!(
                "INSERT INTO events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                 ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                EVENT_COLUMNS
            );
            write_event(conn, &sql, event)?;
            Ok(())
        })
    }

    /// Overwrite every mutable column. Concurrent edits are last-write-wins.
    /// Returns false when the event does not exist.
    pub fn update_event(&self, event: &Event) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = "UPDATE events SET organizer_id = ?2, group_id = ?3, title = ?4, \
                 description = ?5, kind = ?6, privacy = ?7, starts_at = ?8, ends_at = ?9, \
                 repeat_interval = ?10, recurrence_weekday = ?11, recurrence_week_of_month = ?12, \
                 recurrence_start_date = ?13, recurrence_time = ?14, location_kind = ?15, \
                 address = ?16, location_name = ?17, online_url = ?18, attendee_limit = ?19, \
                 created_at = ?20, updated_at = ?21 WHERE id = ?1";
            Ok(write_event(conn, sql, event)? == 1)
        })
    }

    pub fn get_event(&self, id: &Uuid) -> Result<Option<Event>> {
        let row = self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS);
            conn.query_row(&sql, [id.to_string()], event_row).optional()
        })?;
        row.map(Event::try_from).transpose()
    }

    // -- RSVPs --

    /// Insert or replace the caller's RSVP, enforcing the attendee limit for
    /// `going` answers inside the same write.
    pub fn upsert_rsvp(
        &self,
        event_id: &Uuid,
        user_id: &Uuid,
        status: RsvpStatus,
        occurrence_at: Option<DateTime<Utc>>,
        attendee_limit: Option<u32>,
    ) -> Result<RsvpOutcome> {
        let event_id = event_id.to_string();
        let user_id = user_id.to_string();
        let occurrence_at = occurrence_at.map(format_timestamp);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let (RsvpStatus::Going, Some(limit)) = (status, attendee_limit) {
                let taken: u32 = tx.query_row(
                    "SELECT COUNT(*) FROM rsvps
                     WHERE event_id = ?1 AND status = 'going' AND user_id != ?2
                       AND occurrence_at IS ?3",
                    params![event_id, user_id, occurrence_at],
                    |row| row.get(0),
                )?;
                if taken >= limit {
                    return Ok(RsvpOutcome::Full);
                }
            }

            let now = Utc::now();
            tx.execute(
                "INSERT INTO rsvps (event_id, user_id, status, occurrence_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(event_id, user_id) DO UPDATE SET
                    status = excluded.status,
                    occurrence_at = excluded.occurrence_at,
                    updated_at = excluded.updated_at",
                params![event_id, user_id, status.as_str(), occurrence_at, format_timestamp(now)],
            )?;
            tx.commit()?;

            Ok(RsvpOutcome::Saved { updated_at: now })
        })
    }

    /// Number of `going` RSVPs across the series and all pinned occurrences.
    pub fn count_going(&self, event_id: &Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM rsvps WHERE event_id = ?1 AND status = 'going'",
                [event_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    pub fn list_attendees(&self, event_id: &Uuid) -> Result<Vec<RsvpRow>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.event_id, r.user_id, COALESCE(u.username, 'unknown'), r.status,
                        r.occurrence_at, r.updated_at
                 FROM rsvps r
                 LEFT JOIN users u ON r.user_id = u.id
                 WHERE r.event_id = ?1
                 ORDER BY r.updated_at ASC",
            )?;
            let rows = stmt
                .query_map([event_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        raw.into_iter()
            .map(|(event_id, user_id, username, status, occurrence_at, updated_at)| -> Result<RsvpRow> {
                Ok(RsvpRow {
                    event_id: parse_uuid(&event_id)?,
                    user_id: parse_uuid(&user_id)?,
                    username,
                    status: status.parse()?,
                    occurrence_at: occurrence_at.as_deref().map(parse_timestamp).transpose()?,
                    updated_at: parse_timestamp(&updated_at)?,
                })
            })
            .collect()
    }
}

fn write_event(conn: &Connection, sql: &str, event: &Event) -> Result<usize> {
    let (location_kind, address, location_name, online_url) = match &event.location {
        Location::Address {
            address,
            location_name,
        } => ("address", Some(address.as_str()), location_name.as_deref(), None),
        Location::Online { url } => ("online", None, None, url.as_deref()),
    };
    let recurrence = event.recurrence.clone().unwrap_or_default();

    let changed = conn.execute(
        sql,
        params![
            event.id.to_string(),
            event.organizer_id.to_string(),
            event.group_id.map(|g| g.to_string()),
            event.title,
            event.description,
            event.kind.as_str(),
            event.privacy.as_str(),
            event.starts_at.map(format_timestamp),
            event.ends_at.map(format_timestamp),
            recurrence.repeat_interval,
            recurrence.recurrence_weekday,
            recurrence.recurrence_week_of_month,
            recurrence.recurrence_start_date,
            recurrence.recurrence_time,
            location_kind,
            address,
            location_name,
            online_url,
            event.attendee_limit,
            format_timestamp(event.created_at),
            format_timestamp(event.updated_at),
        ],
    )?;
    Ok(changed)
}

fn event_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        organizer_id: row.get(1)?,
        group_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        kind: row.get(5)?,
        privacy: row.get(6)?,
        starts_at: row.get(7)?,
        ends_at: row.get(8)?,
        repeat_interval: row.get(9)?,
        recurrence_weekday: row.get(10)?,
        recurrence_week_of_month: row.get(11)?,
        recurrence_start_date: row.get(12)?,
        recurrence_time: row.get(13)?,
        location_kind: row.get(14)?,
        address: row.get(15)?,
        location_name: row.get(16)?,
        online_url: row.get(17)?,
        attendee_limit: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, TimeZone};
    use gather_types::models::{EventKind, Privacy, RawRecurrence};

    use super::*;
    use crate::users::tests::seed_user;

    pub(crate) fn sample_event(organizer: &str, title: &str) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            organizer_id: organizer.parse().unwrap(),
            group_id: None,
            title: title.into(),
            description: None,
            kind: EventKind::Standard,
            privacy: Privacy::Public,
            starts_at: Some(now + Duration::days(3)),
            ends_at: None,
            recurrence: None,
            location: Location::Address {
                address: "12 Harbour Rd".into(),
                location_name: Some("Boathouse".into()),
            },
            attendee_limit: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn event_round_trips_through_its_row() {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let mut event = sample_event(&organizer, "Monthly social");
        event.starts_at = None;
        event.recurrence = Some(RawRecurrence {
            repeat_interval: Some("monthly".into()),
            recurrence_weekday: Some("5".into()),
            recurrence_week_of_month: Some("5".into()),
            recurrence_time: Some("19:00".into()),
            ..Default::default()
        });
        event.location = Location::Online {
            url: Some("https://meet.example/abc".into()),
        };
        db.insert_event(&event).unwrap();

        let stored = db.get_event(&event.id).unwrap().unwrap();
        assert_eq!(stored.title, "Monthly social");
        assert_eq!(stored.recurrence, event.recurrence);
        assert_eq!(stored.location, event.location);
        assert!(stored.starts_at.is_none());
    }

    #[test]
    fn update_is_last_write_wins() {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let mut event = sample_event(&organizer, "Draft");
        db.insert_event(&event).unwrap();

        event.title = "First edit".into();
        assert!(db.update_event(&event).unwrap());
        event.title = "Second edit".into();
        assert!(db.update_event(&event).unwrap());
        assert_eq!(db.get_event(&event.id).unwrap().unwrap().title, "Second edit");

        let ghost = sample_event(&organizer, "Ghost");
        assert!(!db.update_event(&ghost).unwrap());
    }

    #[test]
    fn rsvp_respects_attendee_limit_per_occurrence() {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let event = sample_event(&organizer, "Small dinner");
        db.insert_event(&event).unwrap();

        let a: Uuid = seed_user(&db, "a").parse().unwrap();
        let b: Uuid = seed_user(&db, "b").parse().unwrap();
        let first = Utc.with_ymd_and_hms(2024, 2, 23, 19, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 3, 29, 19, 0, 0).unwrap();

        let saved = db.upsert_rsvp(&event.id, &a, RsvpStatus::Going, Some(first), Some(1)).unwrap();
        assert!(matches!(saved, RsvpOutcome::Saved { .. }));
        assert_eq!(
            db.upsert_rsvp(&event.id, &b, RsvpStatus::Going, Some(first), Some(1)).unwrap(),
            RsvpOutcome::Full
        );
        // A different occurrence has its own seats.
        assert!(matches!(
            db.upsert_rsvp(&event.id, &b, RsvpStatus::Going, Some(second), Some(1)).unwrap(),
            RsvpOutcome::Saved { .. }
        ));
        // Re-answering your own RSVP never counts against you.
        assert!(matches!(
            db.upsert_rsvp(&event.id, &a, RsvpStatus::Going, Some(first), Some(1)).unwrap(),
            RsvpOutcome::Saved { .. }
        ));

        assert_eq!(db.count_going(&event.id).unwrap(), 2);
        let attendees = db.list_attendees(&event.id).unwrap();
        assert_eq!(attendees.len(), 2);
        assert!(attendees.iter().any(|r| r.username == "b" && r.occurrence_at == Some(second)));
    }
}
