use anyhow::Result;
use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use gather_types::models::{Notification, NotificationKind};

use crate::Database;
use crate::models::{NotificationRow, OptionalExt, format_timestamp};

impl Database {
    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, recipient_id, kind, group_id, related_id, read_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    notification.id.to_string(),
                    notification.recipient_id.to_string(),
                    notification.kind.as_str(),
                    notification.group_id.to_string(),
                    notification.related_id,
                    notification.read_at.map(format_timestamp),
                    format_timestamp(notification.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Whether `recipient_id` was ever sent a `kind` notification for the group.
    pub fn has_notification(
        &self,
        recipient_id: &Uuid,
        kind: NotificationKind,
        group_id: &Uuid,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM notifications
                     WHERE recipient_id = ?1 AND kind = ?2 AND group_id = ?3
                     LIMIT 1",
                    params![recipient_id.to_string(), kind.as_str(), group_id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Newest first.
    pub fn list_notifications(&self, recipient_id: &Uuid, limit: u32) -> Result<Vec<Notification>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, kind, group_id, related_id, read_at, created_at
                 FROM notifications
                 WHERE recipient_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![recipient_id.to_string(), limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        kind: row.get(2)?,
                        group_id: row.get(3)?,
                        related_id: row.get(4)?,
                        read_at: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(Notification::try_from).collect()
    }

    pub fn unread_notification_count(&self, recipient_id: &Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read_at IS NULL",
                [recipient_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    /// Set `read_at` if it is still unset. Read is one-way: an existing
    /// timestamp is never overwritten. Returns false if the notification does
    /// not belong to `recipient_id`.
    pub fn mark_notification_read(&self, recipient_id: &Uuid, id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read_at = COALESCE(read_at, ?3)
                 WHERE id = ?1 AND recipient_id = ?2",
                params![id.to_string(), recipient_id.to_string(), format_timestamp(Utc::now())],
            )?;
            Ok(changed == 1)
        })
    }

    /// Returns how many notifications changed from unread to read.
    pub fn mark_all_notifications_read(&self, recipient_id: &Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read_at = ?2 WHERE recipient_id = ?1 AND read_at IS NULL",
                params![recipient_id.to_string(), format_timestamp(Utc::now())],
            )?;
            Ok(changed)
        })
    }
}
