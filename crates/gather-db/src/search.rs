//! Case-insensitive substring search over events and groups.
//!
//! Callers choose which columns participate so they can retry with a smaller
//! set when the full one fails.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use gather_types::api::EventSummary;

use crate::Database;
use crate::models::{format_timestamp, parse_timestamp, parse_uuid};

/// A `LIKE` pattern matching `term` anywhere, with `%`, `_` and `\` in the
/// term taken literally. Only valid with `ESCAPE '\'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikePattern(String);

impl LikePattern {
    pub fn contains(term: &str) -> Self {
        let mut pattern = String::with_capacity(term.len() + 2);
        pattern.push('%');
        for c in term.chars() {
            if matches!(c, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Self(pattern)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Title,
    Address,
    LocationName,
}

impl EventField {
    fn column(self) -> &'static str {
        match self {
            Self::Title => "e.title",
            Self::Address => "e.address",
            Self::LocationName => "e.location_name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Name,
    Description,
    City,
}

impl GroupField {
    fn column(self) -> &'static str {
        match self {
            Self::Name => "g.name",
            Self::Description => "g.description",
            Self::City => "g.city",
        }
    }
}

/// A matching group with the raw inputs for its member count.
#[derive(Debug, Clone)]
pub struct GroupHit {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub city: Option<String>,
    pub organizer_id: Uuid,
    pub member_ids: Vec<Uuid>,
}

fn match_clause(columns: impl Iterator<Item = &'static str>) -> String {
    columns
        .map(|c| format!("fold_case({}) LIKE fold_case(?1) ESCAPE '\\'", c))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl Database {
    /// Events that have not finished yet (or recur) and are not private,
    /// soonest first, recurring events last.
    pub fn search_events(
        &self,
        pattern: &LikePattern,
        fields: &[EventField],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EventSummary>> {
        if fields.is_empty() {
            bail!("event search needs at least one field");
        }
        let sql = format!(
            "SELECT e.id, e.title, e.kind, e.starts_at, e.address, e.location_name, e.repeat_interval
             FROM events e
             WHERE ({})
               AND e.privacy != 'private'
               AND (e.starts_at >= ?2 OR e.ends_at >= ?2 OR e.repeat_interval IS NOT NULL)
             ORDER BY e.starts_at IS NULL, e.starts_at ASC, e.title ASC
             LIMIT ?3",
            match_clause(fields.iter().map(|f| f.column()))
        );

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![pattern.as_str(), format_timestamp(now), limit as i64],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, Option<String>>(6)?,
                        ))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(
                |(id, title, kind, starts_at, address, location_name, interval)| -> Result<EventSummary> {
                    Ok(EventSummary {
                        id: parse_uuid(&id)?,
                        title,
                        kind: kind.parse()?,
                        starts_at: starts_at.as_deref().map(parse_timestamp).transpose()?,
                        address,
                        location_name,
                        recurring: interval.is_some(),
                    })
                },
            )
            .collect()
    }

    /// Groups that are not soft-deleted, by name.
    pub fn search_groups(
        &self,
        pattern: &LikePattern,
        fields: &[GroupField],
        limit: usize,
    ) -> Result<Vec<GroupHit>> {
        if fields.is_empty() {
            bail!("group search needs at least one field");
        }
        let sql = format!(
            "SELECT g.id, g.name, g.description, g.city, g.organizer_id
             FROM groups g
             WHERE ({})
               AND g.deleted_at IS NULL
             ORDER BY g.name ASC
             LIMIT ?2",
            match_clause(fields.iter().map(|f| f.column()))
        );

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![pattern.as_str(), limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut hits = rows
            .into_iter()
            .map(|(id, name, description, city, organizer_id)| -> Result<GroupHit> {
                Ok(GroupHit {
                    id: parse_uuid(&id)?,
                    name,
                    description,
                    city,
                    organizer_id: parse_uuid(&organizer_id)?,
                    member_ids: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        let mut members = self.member_ids_for_groups(&ids)?;
        for hit in &mut hits {
            hit.member_ids = members.remove(&hit.id).unwrap_or_default();
        }
        Ok(hits)
    }
}
