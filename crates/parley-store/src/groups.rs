//! CRUD operations for [`Group`] records and their memberships.
//!
//! Admin rules are enforced by the server before it calls into this module.
//! The store guarantees that a user appears at most once per group and that
//! no insert takes a group past [`MAX_GROUP_MEMBERS`].

use chrono::Utc;
use rusqlite::params;

use parley_shared::constants::MAX_GROUP_MEMBERS;
use parley_shared::types::{GroupId, GroupMember, GroupSummary, UserId};

use crate::database::Database;
use crate::error::{map_unique, Result, StoreError};
use crate::models::{parse_ts, Group};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a group with `creator` as its first member and admin.
    pub fn create_group(&self, name: &str, creator: UserId) -> Result<Group> {
        let tx = self.conn().unchecked_transaction()?;
        let created_at = Utc::now();

        tx.execute(
            "INSERT INTO chat_groups (name, created_by, created_at) VALUES (?1, ?2, ?3)",
            params![name, creator.0, created_at.to_rfc3339()],
        )?;
        let id = GroupId(tx.last_insert_rowid());

        tx.execute(
            "INSERT INTO group_members (group_id, user_id, is_admin, joined_at)
             VALUES (?1, ?2, 1, ?3)",
            params![id.0, creator.0, created_at.to_rfc3339()],
        )?;
        tx.commit()?;

        tracing::debug!(group = %id, name, creator = %creator, "created group");

        Ok(Group {
            id,
            name: name.to_string(),
            created_by: creator,
            created_at,
        })
    }

    /// Add `user` to `group`.
    ///
    /// The size check and the insert are one statement, so concurrent adds
    /// can never push the group past [`MAX_GROUP_MEMBERS`]; the loser gets
    /// [`StoreError::GroupFull`].
    pub fn add_group_member(&self, group: GroupId, user: UserId, is_admin: bool) -> Result<()> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO group_members (group_id, user_id, is_admin, joined_at)
                 SELECT ?1, ?2, ?3, ?4
                 WHERE (SELECT COUNT(*) FROM group_members WHERE group_id = ?1) < ?5",
                params![
                    group.0,
                    user.0,
                    is_admin,
                    Utc::now().to_rfc3339(),
                    MAX_GROUP_MEMBERS as i64
                ],
            )
            .map_err(|e| map_unique(e, "member"))?;
        if inserted == 0 {
            return Err(StoreError::GroupFull);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        self.conn()
            .query_row(
                "SELECT id, name, created_by, created_at FROM chat_groups WHERE id = ?1",
                params![id.0],
                |row| {
                    let created_raw: String = row.get(3)?;
                    Ok(Group {
                        id: GroupId(row.get(0)?),
                        name: row.get(1)?,
                        created_by: UserId(row.get(2)?),
                        created_at: parse_ts(3, &created_raw)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Members in join order.
    pub fn get_group_members(&self, group: GroupId) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT gm.user_id, u.username, gm.is_admin
             FROM group_members gm
             JOIN users u ON u.id = gm.user_id
             WHERE gm.group_id = ?1
             ORDER BY gm.joined_at ASC, gm.user_id ASC",
        )?;

        let rows = stmt.query_map(params![group.0], |row| {
            Ok(GroupMember {
                user_id: UserId(row.get(0)?),
                username: row.get(1)?,
                is_admin: row.get(2)?,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Groups `user` belongs to, ordered by name.
    pub fn get_groups_by_user(&self, user: UserId) -> Result<Vec<GroupSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name,
                    (SELECT COUNT(*) FROM group_members c WHERE c.group_id = g.id)
             FROM chat_groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.user_id = ?1
             ORDER BY g.name ASC, g.id ASC",
        )?;

        let rows = stmt.query_map(params![user.0], |row| {
            let count: i64 = row.get(2)?;
            Ok(GroupSummary {
                id: GroupId(row.get(0)?),
                name: row.get(1)?,
                member_count: count as usize,
            })
        })?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove `user` from `group`. Returns `true` if a row was deleted.
    pub fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.0, user.0],
        )?;
        Ok(affected > 0)
    }
}
