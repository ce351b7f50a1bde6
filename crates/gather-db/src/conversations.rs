use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use gather_types::models::{Conversation, ConversationSubject, Message};

use crate::Database;
use crate::models::{MessageRow, OptionalExt, format_timestamp, parse_timestamp, parse_uuid};

/// Boundary of a message page: everything strictly older than
/// `(created_at, seq)` belongs to the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCursor {
    created_at: String,
    seq: i64,
}

impl MessageCursor {
    /// Opaque token handed to clients.
    pub fn encode(&self) -> String {
        B64.encode(format!("{}|{}", self.created_at, self.seq))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = B64.decode(token).context("cursor is not valid base64")?;
        let text = String::from_utf8(bytes).context("cursor is not valid utf-8")?;
        let (created_at, seq) = text
            .rsplit_once('|')
            .ok_or_else(|| anyhow!("cursor is malformed"))?;
        parse_timestamp(created_at)?;
        Ok(Self {
            created_at: created_at.to_string(),
            seq: seq.parse().context("cursor sequence is not a number")?,
        })
    }
}

/// One page of messages, oldest first.
#[derive(Debug, Clone)]
pub struct MessagePageRows {
    pub messages: Vec<Message>,
    pub next_cursor: Option<MessageCursor>,
}

impl Database {
    /// Return the conversation for `subject`, creating it on first use.
    /// Safe under concurrent callers: the unique (subject_type, subject_id)
    /// key decides which insert wins and everyone reads that row back.
    pub fn create_or_get_conversation(&self, subject: ConversationSubject) -> Result<Conversation> {
        let (id, created_at) = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, subject_type, subject_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(subject_type, subject_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    subject.kind(),
                    subject.id().to_string(),
                    format_timestamp(Utc::now()),
                ],
            )?;
            let row = conn.query_row(
                "SELECT id, created_at FROM conversations WHERE subject_type = ?1 AND subject_id = ?2",
                params![subject.kind(), subject.id().to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?;
            Ok(row)
        })?;

        Ok(Conversation {
            id: parse_uuid(&id)?,
            subject,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    pub fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT subject_type, subject_id, created_at FROM conversations WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(kind, subject_id, created_at)| -> Result<Conversation> {
            Ok(Conversation {
                id: *id,
                subject: ConversationSubject::from_parts(&kind, parse_uuid(&subject_id)?)?,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .transpose()
    }

    /// Whether `user_id` takes part in the subject: organizer or member of a
    /// group, organizer or RSVP holder of an event.
    pub fn is_participant(&self, user_id: &Uuid, subject: ConversationSubject) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = match subject {
                ConversationSubject::Group(_) => {
                    "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?2 AND organizer_id = ?1 AND deleted_at IS NULL)
                         OR EXISTS(SELECT 1 FROM group_members WHERE group_id = ?2 AND user_id = ?1)"
                }
                ConversationSubject::Event(_) => {
                    "SELECT EXISTS(SELECT 1 FROM events WHERE id = ?2 AND organizer_id = ?1)
                         OR EXISTS(SELECT 1 FROM rsvps WHERE event_id = ?2 AND user_id = ?1)"
                }
            };
            let allowed: bool = conn.query_row(
                sql,
                params![user_id.to_string(), subject.id().to_string()],
                |row| row.get(0),
            )?;
            Ok(allowed)
        })
    }

    /// Append a message. The timestamp is taken under the write lock and
    /// never earlier than the conversation's newest message, so a new message
    /// always sorts after every page a reader has already fetched.
    pub fn insert_message(
        &self,
        conversation_id: &Uuid,
        sender_id: &Uuid,
        content: &str,
    ) -> Result<Message> {
        let id = Uuid::new_v4();
        let row = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let latest: Option<String> = tx.query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;
            let mut created_at = format_timestamp(Utc::now());
            if let Some(latest) = latest {
                if latest > created_at {
                    created_at = latest;
                }
            }

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    conversation_id.to_string(),
                    sender_id.to_string(),
                    content,
                    created_at
                ],
            )?;
            let seq = tx.last_insert_rowid();
            let row = query_message(&tx, seq)?;
            tx.commit()?;
            Ok(row)
        })?;

        Message::try_from(row)
    }

    /// Fetch up to `limit` messages strictly older than `before` (or the most
    /// recent ones when `before` is `None`), returned oldest first.
    pub fn get_messages(
        &self,
        conversation_id: &Uuid,
        before: Option<&MessageCursor>,
        limit: u32,
    ) -> Result<MessagePageRows> {
        let mut rows =
            self.with_conn(|conn| query_messages(conn, conversation_id, before, limit + 1))?;

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        rows.reverse();

        let next_cursor = match rows.first() {
            Some(oldest) if has_more => Some(MessageCursor {
                created_at: oldest.created_at.clone(),
                seq: oldest.seq,
            }),
            _ => None,
        };

        let messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(MessagePageRows {
            messages,
            next_cursor,
        })
    }

    /// Move the caller's read marker to the conversation's newest activity.
    /// The marker only moves forward, so repeated calls are no-ops.
    pub fn mark_conversation_read(&self, user_id: &Uuid, conversation_id: &Uuid) -> Result<()> {
        self.with_conn(|conn| {
            let latest: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;
            let now = format_timestamp(Utc::now());
            let marker = match latest {
                Some(latest) if latest > now => latest,
                _ => now,
            };

            conn.execute(
                "INSERT INTO conversation_reads (user_id, conversation_id, last_read_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, conversation_id) DO UPDATE SET
                    last_read_at = MAX(last_read_at, excluded.last_read_at)",
                params![user_id.to_string(), conversation_id.to_string(), marker],
            )?;
            Ok(())
        })
    }

    /// Conversations the user takes part in that have messages from someone
    /// else newer than the user's read marker.
    pub fn unread_conversation_count(&self, user_id: &Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM conversations c
                 WHERE (
                    (c.subject_type = 'group' AND (
                        EXISTS(SELECT 1 FROM groups g WHERE g.id = c.subject_id AND g.organizer_id = ?1 AND g.deleted_at IS NULL)
                        OR EXISTS(SELECT 1 FROM group_members gm WHERE gm.group_id = c.subject_id AND gm.user_id = ?1)))
                    OR
                    (c.subject_type = 'event' AND (
                        EXISTS(SELECT 1 FROM events e WHERE e.id = c.subject_id AND e.organizer_id = ?1)
                        OR EXISTS(SELECT 1 FROM rsvps r WHERE r.event_id = c.subject_id AND r.user_id = ?1)))
                 )
                 AND EXISTS(
                    SELECT 1 FROM messages m
                    WHERE m.conversation_id = c.id
                      AND m.sender_id != ?1
                      AND m.created_at > COALESCE(
                        (SELECT cr.last_read_at FROM conversation_reads cr
                         WHERE cr.user_id = ?1 AND cr.conversation_id = c.id), '')
                 )",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

const MESSAGE_SELECT: &str =
    "SELECT m.seq, m.id, m.conversation_id, m.sender_id, COALESCE(u.username, 'unknown'),
            m.content, m.created_at
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        conversation_id: row.get(2)?,
        sender_id: row.get(3)?,
        sender_username: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_message(conn: &Connection, seq: i64) -> Result<MessageRow> {
    let sql = format!("{} WHERE m.seq = ?1", MESSAGE_SELECT);
    Ok(conn.query_row(&sql, [seq], message_row)?)
}

/// Newest first; the caller reverses.
fn query_messages(
    conn: &Connection,
    conversation_id: &Uuid,
    before: Option<&MessageCursor>,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let rows = match before {
        Some(cursor) => {
            let sql = format!(
                "{} WHERE m.conversation_id = ?1
                   AND (m.created_at < ?2 OR (m.created_at = ?2 AND m.seq < ?3))
                 ORDER BY m.created_at DESC, m.seq DESC
                 LIMIT ?4",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(
                params![conversation_id.to_string(), cursor.created_at, cursor.seq, limit],
                message_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!(
                "{} WHERE m.conversation_id = ?1
                 ORDER BY m.created_at DESC, m.seq DESC
                 LIMIT ?2",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![conversation_id.to_string(), limit], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::groups::tests::sample_group;
    use crate::users::tests::seed_user;

    struct Fixture {
        db: Database,
        organizer: Uuid,
        member: Uuid,
        conversation: Conversation,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let group = sample_group(&organizer, "Hikers", "Bath");
        db.insert_group(&group).unwrap();
        let member: Uuid = seed_user(&db, "member").parse().unwrap();
        db.add_member(&group.id, &member, gather_types::models::MemberRole::Member)
            .unwrap();
        let conversation = db
            .create_or_get_conversation(ConversationSubject::Group(group.id))
            .unwrap();
        Fixture {
            db,
            organizer: organizer.parse().unwrap(),
            member,
            conversation,
        }
    }

    #[test]
    fn conversation_per_subject_is_unique() {
        let f = fixture();
        let again = f
            .db
            .create_or_get_conversation(f.conversation.subject)
            .unwrap();
        assert_eq!(again.id, f.conversation.id);
        assert_eq!(f.db.get_conversation(&again.id).unwrap().unwrap().subject, again.subject);
    }

    #[test]
    fn concurrent_create_or_get_agrees_on_one_conversation() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let subject = ConversationSubject::Event(Uuid::new_v4());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.create_or_get_conversation(subject).unwrap().id)
            })
            .collect();
        let ids: HashSet<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn pages_concatenate_to_full_history() {
        let f = fixture();
        let mut sent = Vec::new();
        for i in 0..23 {
            let sender = if i % 2 == 0 { f.organizer } else { f.member };
            sent.push(
                f.db.insert_message(&f.conversation.id, &sender, &format!("message {}", i))
                    .unwrap()
                    .id,
            );
        }

        let mut pages = Vec::new();
        let mut cursor: Option<MessageCursor> = None;
        loop {
            let page = f
                .db
                .get_messages(&f.conversation.id, cursor.as_ref(), 5)
                .unwrap();
            // Round-trip through the opaque token like a client would.
            cursor = page
                .next_cursor
                .map(|c| MessageCursor::decode(&c.encode()).unwrap());
            pages.push(page.messages);
            if cursor.is_none() {
                break;
            }
        }
        assert_eq!(pages.len(), 5);
        assert_eq!(pages[0].len(), 5);
        assert_eq!(pages[4].len(), 3);

        // Older pages go in front.
        let stitched: Vec<Uuid> = pages.into_iter().rev().flatten().map(|m| m.id).collect();
        assert_eq!(stitched, sent);

        let full = f.db.get_messages(&f.conversation.id, None, 200).unwrap();
        assert!(full.next_cursor.is_none());
        assert_eq!(full.messages.iter().map(|m| m.id).collect::<Vec<_>>(), sent);
    }

    #[test]
    fn sends_between_pages_do_not_leak_into_older_pages() {
        let f = fixture();
        for i in 0..6 {
            f.db.insert_message(&f.conversation.id, &f.member, &format!("m{}", i))
                .unwrap();
        }
        let first = f.db.get_messages(&f.conversation.id, None, 3).unwrap();
        let late = f.db.insert_message(&f.conversation.id, &f.organizer, "late").unwrap();
        let second = f
            .db
            .get_messages(&f.conversation.id, first.next_cursor.as_ref(), 3)
            .unwrap();

        assert!(second.messages.iter().all(|m| m.id != late.id));
        assert_eq!(second.messages.len(), 3);
        assert!(second.next_cursor.is_none());
        assert!(second.messages.last().unwrap().created_at <= first.messages[0].created_at);
    }

    #[test]
    fn malformed_cursor_is_rejected() {
        assert!(MessageCursor::decode("not base64!").is_err());
        assert!(MessageCursor::decode(&B64.encode("no separator")).is_err());
        assert!(MessageCursor::decode(&B64.encode("2024-01-01T00:00:00.000Z|x")).is_err());
    }

    #[test]
    fn mark_read_is_idempotent_and_clears_unread() {
        let f = fixture();
        f.db.insert_message(&f.conversation.id, &f.organizer, "welcome").unwrap();
        assert_eq!(f.db.unread_conversation_count(&f.member).unwrap(), 1);
        // Your own messages never count as unread.
        assert_eq!(f.db.unread_conversation_count(&f.organizer).unwrap(), 0);

        f.db.mark_conversation_read(&f.member, &f.conversation.id).unwrap();
        let read_at = |db: &Database| -> String {
            db.with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT last_read_at FROM conversation_reads WHERE user_id = ?1",
                    [f.member.to_string()],
                    |row| row.get(0),
                )?)
            })
            .unwrap()
        };
        let once = read_at(&f.db);
        f.db.mark_conversation_read(&f.member, &f.conversation.id).unwrap();
        assert!(read_at(&f.db) >= once);
        assert_eq!(f.db.unread_conversation_count(&f.member).unwrap(), 0);

        let rows: i64 = f
            .db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM conversation_reads", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn participants_are_members_or_organizer() {
        let f = fixture();
        let outsider: Uuid = seed_user(&f.db, "outsider").parse().unwrap();
        assert!(f.db.is_participant(&f.member, f.conversation.subject).unwrap());
        assert!(f.db.is_participant(&f.organizer, f.conversation.subject).unwrap());
        assert!(!f.db.is_participant(&outsider, f.conversation.subject).unwrap());
    }
}
