use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE groups (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                description         TEXT,
                city                TEXT,
                organizer_id        TEXT NOT NULL REFERENCES users(id),
                requires_approval   INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL,
                deleted_at          TEXT
            );

            CREATE TABLE group_members (
                group_id    TEXT NOT NULL REFERENCES groups(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                role        TEXT NOT NULL DEFAULT 'member',
                created_at  TEXT NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );

            CREATE TABLE member_requests (
                group_id    TEXT NOT NULL REFERENCES groups(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );

            CREATE TABLE events (
                id                          TEXT PRIMARY KEY,
                organizer_id                TEXT NOT NULL REFERENCES users(id),
                group_id                    TEXT REFERENCES groups(id),
                title                       TEXT NOT NULL,
                description                 TEXT,
                kind                        TEXT NOT NULL,
                privacy                     TEXT NOT NULL,
                starts_at                   TEXT,
                ends_at                     TEXT,
                repeat_interval             TEXT,
                recurrence_weekday          TEXT,
                recurrence_week_of_month    TEXT,
                recurrence_start_date       TEXT,
                recurrence_time             TEXT,
                location_kind               TEXT NOT NULL,
                address                     TEXT,
                location_name               TEXT,
                online_url                  TEXT,
                attendee_limit              INTEGER,
                created_at                  TEXT NOT NULL,
                updated_at                  TEXT NOT NULL
            );

            CREATE INDEX idx_events_starts_at ON events(starts_at);

            CREATE TABLE rsvps (
                event_id        TEXT NOT NULL REFERENCES events(id),
                user_id         TEXT NOT NULL REFERENCES users(id),
                status          TEXT NOT NULL,
                occurrence_at   TEXT,
                updated_at      TEXT NOT NULL,
                PRIMARY KEY (event_id, user_id)
            );

            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                subject_type    TEXT NOT NULL,
                subject_id      TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                UNIQUE (subject_type, subject_id)
            );

            CREATE TABLE messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at, seq);

            CREATE TABLE conversation_reads (
                user_id         TEXT NOT NULL REFERENCES users(id),
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                last_read_at    TEXT NOT NULL,
                PRIMARY KEY (user_id, conversation_id)
            );

            CREATE TABLE notifications (
                id              TEXT PRIMARY KEY,
                recipient_id    TEXT NOT NULL REFERENCES users(id),
                kind            TEXT NOT NULL,
                group_id        TEXT NOT NULL REFERENCES groups(id),
                related_id      TEXT,
                read_at         TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_recipient
                ON notifications(recipient_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
