use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use gather_types::models::{Group, MemberRole};

use crate::Database;
use crate::models::{GroupRow, OptionalExt, format_timestamp, parse_uuid};

impl Database {
    pub fn insert_group(&self, group: &Group) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO groups (id, name, description, city, organizer_id, requires_approval, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    group.id.to_string(),
                    group.name,
                    group.description,
                    group.city,
                    group.organizer_id.to_string(),
                    group.requires_approval,
                    format_timestamp(group.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch a group unless it has been soft-deleted.
    pub fn get_group(&self, id: &Uuid) -> Result<Option<Group>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, description, city, organizer_id, requires_approval, created_at
                 FROM groups WHERE id = ?1 AND deleted_at IS NULL",
                [id.to_string()],
                |row| {
                    Ok(GroupRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        city: row.get(3)?,
                        organizer_id: row.get(4)?,
                        requires_approval: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
        })?;
        row.map(Group::try_from).transpose()
    }

    /// Returns false if the group was missing or already deleted.
    pub fn soft_delete_group(&self, id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE groups SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), format_timestamp(Utc::now())],
            )?;
            Ok(changed == 1)
        })
    }

    /// Add a member. Returns false if they already were one.
    pub fn add_member(&self, group_id: &Uuid, user_id: &Uuid, role: MemberRole) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    group_id.to_string(),
                    user_id.to_string(),
                    role.as_str(),
                    format_timestamp(Utc::now())
                ],
            )?;
            tx.execute(
                "DELETE FROM member_requests WHERE group_id = ?1 AND user_id = ?2",
                params![group_id.to_string(), user_id.to_string()],
            )?;
            tx.commit()?;
            Ok(inserted == 1)
        })
    }

    /// Record a pending join request. Returns false if one was already pending.
    pub fn add_member_request(&self, group_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO member_requests (group_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![group_id.to_string(), user_id.to_string(), format_timestamp(Utc::now())],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Turn a pending request into a membership. Returns false if no request
    /// was pending.
    pub fn approve_member_request(&self, group_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM member_requests WHERE group_id = ?1 AND user_id = ?2",
                params![group_id.to_string(), user_id.to_string()],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    group_id.to_string(),
                    user_id.to_string(),
                    MemberRole::Member.as_str(),
                    format_timestamp(Utc::now())
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Drop a pending request. Returns false if none was pending.
    pub fn decline_member_request(&self, group_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM member_requests WHERE group_id = ?1 AND user_id = ?2",
                params![group_id.to_string(), user_id.to_string()],
            )?;
            Ok(removed == 1)
        })
    }

    /// Insert the membership or change the role of an existing one.
    pub fn set_member_role(&self, group_id: &Uuid, user_id: &Uuid, role: MemberRole) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_members (group_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (group_id, user_id) DO UPDATE SET role = excluded.role",
                params![
                    group_id.to_string(),
                    user_id.to_string(),
                    role.as_str(),
                    format_timestamp(Utc::now())
                ],
            )?;
            Ok(())
        })
    }

    pub fn member_role(&self, group_id: &Uuid, user_id: &Uuid) -> Result<Option<MemberRole>> {
        let role: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    params![group_id.to_string(), user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        Ok(role.map(|r| r.parse::<MemberRole>()).transpose()?)
    }

    pub fn is_member(&self, group_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    params![group_id.to_string(), user_id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn member_ids(&self, group_id: &Uuid) -> Result<Vec<Uuid>> {
        let mut by_group = self.member_ids_for_groups(&[*group_id])?;
        Ok(by_group.remove(group_id).unwrap_or_default())
    }

    /// Batch-fetch member ids for a set of groups.
    pub fn member_ids_for_groups(&self, group_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        if group_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let pairs = self.with_conn(|conn| query_members(conn, group_ids))?;

        let mut by_group: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (group_id, user_id) in pairs {
            by_group
                .entry(parse_uuid(&group_id)?)
                .or_default()
                .push(parse_uuid(&user_id)?);
        }
        Ok(by_group)
    }
}

fn query_members(conn: &Connection, group_ids: &[Uuid]) -> Result<Vec<(String, String)>> {
    let placeholders: Vec<String> = (1..=group_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT group_id, user_id FROM group_members WHERE group_id IN ({})",
        placeholders.join(", ")
    );

    let ids: Vec<String> = group_ids.iter().map(Uuid::to_string).collect();
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::users::tests::seed_user;

    pub(crate) fn sample_group(organizer: &str, name: &str, city: &str) -> Group {
        Group {
            id: Uuid::new_v4(),
            name: name.into(),
            description: Some(format!("{} meets weekly", name)),
            city: Some(city.into()),
            organizer_id: organizer.parse().unwrap(),
            requires_approval: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn membership_is_idempotent_and_clears_requests() {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let group = sample_group(&organizer, "Runners", "Leeds");
        db.insert_group(&group).unwrap();
        let user: Uuid = seed_user(&db, "u").parse().unwrap();

        assert!(db.add_member_request(&group.id, &user).unwrap());
        assert!(!db.add_member_request(&group.id, &user).unwrap());

        assert!(db.add_member(&group.id, &user, MemberRole::Member).unwrap());
        assert!(!db.add_member(&group.id, &user, MemberRole::Member).unwrap());
        assert!(db.is_member(&group.id, &user).unwrap());
        assert_eq!(db.member_ids(&group.id).unwrap(), vec![user]);
        // The pending request was consumed by the join.
        assert!(db.add_member_request(&group.id, &user).unwrap());
    }

    #[test]
    fn approving_needs_a_pending_request() {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let group = sample_group(&organizer, "Rowers", "Hull");
        db.insert_group(&group).unwrap();
        let user: Uuid = seed_user(&db, "u").parse().unwrap();

        assert!(!db.approve_member_request(&group.id, &user).unwrap());
        assert!(!db.is_member(&group.id, &user).unwrap());

        db.add_member_request(&group.id, &user).unwrap();
        assert!(db.approve_member_request(&group.id, &user).unwrap());
        assert_eq!(db.member_role(&group.id, &user).unwrap(), Some(MemberRole::Member));
        assert!(!db.approve_member_request(&group.id, &user).unwrap());
    }

    #[test]
    fn declining_removes_the_request_only() {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let group = sample_group(&organizer, "Climbers", "Bath");
        db.insert_group(&group).unwrap();
        let user: Uuid = seed_user(&db, "u").parse().unwrap();

        db.add_member_request(&group.id, &user).unwrap();
        assert!(db.decline_member_request(&group.id, &user).unwrap());
        assert!(!db.decline_member_request(&group.id, &user).unwrap());
        assert!(!db.is_member(&group.id, &user).unwrap());
        // A declined user may ask again.
        assert!(db.add_member_request(&group.id, &user).unwrap());
    }

    #[test]
    fn role_upgrade_keeps_a_single_membership() {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let group = sample_group(&organizer, "Singers", "Derby");
        db.insert_group(&group).unwrap();
        let user: Uuid = seed_user(&db, "u").parse().unwrap();

        db.add_member(&group.id, &user, MemberRole::Member).unwrap();
        db.set_member_role(&group.id, &user, MemberRole::Admin).unwrap();
        assert_eq!(db.member_role(&group.id, &user).unwrap(), Some(MemberRole::Admin));
        assert_eq!(db.member_ids(&group.id).unwrap(), vec![user]);
    }

    #[test]
    fn soft_deleted_groups_are_hidden() {
        let db = Database::open_in_memory().unwrap();
        let organizer = seed_user(&db, "org");
        let group = sample_group(&organizer, "Chess", "York");
        db.insert_group(&group).unwrap();

        assert!(db.get_group(&group.id).unwrap().is_some());
        assert!(db.soft_delete_group(&group.id).unwrap());
        assert!(!db.soft_delete_group(&group.id).unwrap());
        assert!(db.get_group(&group.id).unwrap().is_none());
    }
}
