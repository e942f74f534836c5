//! Membership store: group lifecycle and roster changes.
//!
//! Roster changes are row-level statements against `group_members` rather
//! than a rewrite of the whole member list, and every precondition check runs
//! inside the same immediate transaction as the write it guards.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use huddle_shared::{Group, GroupId, GroupListing, GroupMember, Role, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::rows::{id_at, ts_at, ts_to_sql, user_at};
use crate::unseen::group_unseen_count;

/// Input for [`Database::create_group`]. `avatar` must already be a URL.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub admin: UserId,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub member_ids: Vec<UserId>,
}

/// Partial update for [`Database::update_group`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct GroupChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The roster became empty and the group was soft deleted.
    pub deactivated: bool,
}

const GROUP_NOT_FOUND: &str = "Group not found";
const NOT_A_MEMBER: &str = "Group not found or you are not a member";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a group. The admin is always the first member with role
    /// `admin`; repeated ids (including the admin's own) are dropped.
    pub fn create_group(&mut self, new: &NewGroup) -> Result<Group> {
        let name = validate_name(&new.name)?;

        let id = GroupId::new();
        let now = ts_to_sql(&Utc::now());

        let tx = self.write_tx()?;
        tx.execute(
            "INSERT INTO groups (id, name, description, avatar, admin_id, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![
                id.to_string(),
                name,
                new.description,
                new.avatar,
                new.admin.to_string(),
                now,
            ],
        )?;

        let mut seen = HashSet::new();
        let roster = std::iter::once((new.admin, Role::Admin))
            .chain(new.member_ids.iter().map(|m| (*m, Role::Member)))
            .filter(|(user, _)| seen.insert(*user));

        {
            let mut insert = tx.prepare(
                "INSERT INTO group_members (group_id, user_id, role, position, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, (user, role)) in roster.enumerate() {
                insert.execute(params![
                    id.to_string(),
                    user.to_string(),
                    role.as_str(),
                    position as i64,
                    now,
                ])?;
            }
        }

        let group = load_group(&tx, id)?.ok_or(StoreError::NotFound(GROUP_NOT_FOUND))?;
        tx.commit()?;

        tracing::debug!(group = %id, members = group.members.len(), "group created");
        Ok(group)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a group regardless of its state. Callers exposing the result to
    /// a user should go through [`Database::get_group_for_member`].
    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        load_group(self.conn(), id)?.ok_or(StoreError::NotFound(GROUP_NOT_FOUND))
    }

    /// Fetch an active group the viewer currently belongs to.
    pub fn get_group_for_member(&self, id: GroupId, viewer: UserId) -> Result<Group> {
        if !is_active_member(self.conn(), id, viewer)? {
            return Err(StoreError::NotFound(GROUP_NOT_FOUND));
        }
        self.get_group(id)
    }

    /// Active groups the user belongs to, most recently updated first, each
    /// with the user's unseen count.
    pub fn list_groups_for_user(&self, user: UserId) -> Result<Vec<GroupListing>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id
             FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1 AND g.is_active = 1
             ORDER BY g.updated_at DESC, g.rowid DESC",
        )?;

        let ids = stmt
            .query_map(params![user.to_string()], |row| id_at::<GroupId>(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut listings = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(group) = load_group(self.conn(), id)? else {
                continue;
            };
            let unseen_count = group_unseen_count(self.conn(), id, user)?;
            listings.push(GroupListing {
                group,
                unseen_count,
            });
        }
        Ok(listings)
    }

    // ------------------------------------------------------------------
    // Roster changes
    // ------------------------------------------------------------------

    /// Append `member` to the roster. Only the admin of an active group may
    /// do this.
    pub fn add_member(&mut self, id: GroupId, requester: UserId, member: UserId) -> Result<Group> {
        let tx = self.write_tx()?;

        let (admin, active) = group_authority(&tx, id)?;
        if !active || admin != requester {
            return Err(StoreError::NotAuthorized(
                "Only the group admin can add members",
            ));
        }

        let now = ts_to_sql(&Utc::now());
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, role, position, joined_at)
             SELECT ?1, ?2, 'member', COALESCE(MAX(position), -1) + 1, ?3
             FROM group_members WHERE group_id = ?1",
            params![id.to_string(), member.to_string(), now],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyMember);
        }
        touch(&tx, id, &now)?;

        let group = load_group(&tx, id)?.ok_or(StoreError::NotFound(GROUP_NOT_FOUND))?;
        tx.commit()?;

        tracing::debug!(group = %id, member = %member, "member added");
        Ok(group)
    }

    /// Remove `member` from an active group. The requester must be the admin
    /// but does not need to still be on the roster. Emptying the roster soft
    /// deletes the group.
    pub fn remove_member(
        &mut self,
        id: GroupId,
        requester: UserId,
        member: UserId,
    ) -> Result<Group> {
        let tx = self.write_tx()?;

        let (admin, active) = group_authority(&tx, id)?;
        if !active {
            return Err(StoreError::NotFound(GROUP_NOT_FOUND));
        }
        if admin != requester {
            return Err(StoreError::NotAuthorized(
                "Only the group admin can remove members",
            ));
        }

        let removed = tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![id.to_string(), member.to_string()],
        )?;
        if removed == 0 {
            return Err(StoreError::NotFound("Member not found"));
        }

        let now = ts_to_sql(&Utc::now());
        touch(&tx, id, &now)?;
        let deactivated = deactivate_if_empty(&tx, id, &now)?;

        let group = load_group(&tx, id)?.ok_or(StoreError::NotFound(GROUP_NOT_FOUND))?;
        tx.commit()?;

        tracing::debug!(group = %id, member = %member, deactivated, "member removed");
        Ok(group)
    }

    /// Remove `user` from the roster regardless of role. The last member
    /// leaving soft deletes the group.
    pub fn leave_group(&mut self, id: GroupId, user: UserId) -> Result<LeaveOutcome> {
        let tx = self.write_tx()?;

        let removed = tx.execute(
            "DELETE FROM group_members
             WHERE group_id = ?1 AND user_id = ?2
               AND EXISTS (SELECT 1 FROM groups WHERE id = ?1 AND is_active = 1)",
            params![id.to_string(), user.to_string()],
        )?;
        if removed == 0 {
            return Err(StoreError::NotFound(GROUP_NOT_FOUND));
        }

        let now = ts_to_sql(&Utc::now());
        touch(&tx, id, &now)?;
        let deactivated = deactivate_if_empty(&tx, id, &now)?;
        tx.commit()?;

        tracing::debug!(group = %id, user = %user, deactivated, "member left group");
        Ok(LeaveOutcome { deactivated })
    }

    // ------------------------------------------------------------------
    // Update / delete
    // ------------------------------------------------------------------

    /// Apply a partial update. Any current member of an active group may do
    /// this; `changes.avatar` must already be a URL.
    pub fn update_group(
        &mut self,
        id: GroupId,
        requester: UserId,
        changes: &GroupChanges,
    ) -> Result<Group> {
        let name = changes.name.as_deref().map(validate_name).transpose()?;
        let now = ts_to_sql(&Utc::now());

        let tx = self.write_tx()?;
        let updated = tx.execute(
            "UPDATE groups SET
                 name        = COALESCE(?3, name),
                 description = COALESCE(?4, description),
                 avatar      = COALESCE(?5, avatar),
                 updated_at  = ?6
             WHERE id = ?1 AND is_active = 1
               AND EXISTS (SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2)",
            params![
                id.to_string(),
                requester.to_string(),
                name,
                changes.description,
                changes.avatar,
                now,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(NOT_A_MEMBER));
        }

        let group = load_group(&tx, id)?.ok_or(StoreError::NotFound(GROUP_NOT_FOUND))?;
        tx.commit()?;
        Ok(group)
    }

    /// Soft delete. Membership is enough; the admin role is not required.
    pub fn delete_group(&mut self, id: GroupId, requester: UserId) -> Result<()> {
        let now = ts_to_sql(&Utc::now());
        let updated = self.conn().execute(
            "UPDATE groups SET is_active = 0, updated_at = ?3
             WHERE id = ?1 AND is_active = 1
               AND EXISTS (SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2)",
            params![id.to_string(), requester.to_string(), now],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(NOT_A_MEMBER));
        }

        tracing::debug!(group = %id, by = %requester, "group soft deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Validation("Group name is required".into()));
    }
    Ok(trimmed)
}

/// `true` if the group is active and `user` is on its roster.
pub(crate) fn is_active_member(conn: &Connection, id: GroupId, user: UserId) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE g.id = ?1 AND g.is_active = 1 AND m.user_id = ?2
         )",
        params![id.to_string(), user.to_string()],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Admin id and active flag of a group.
fn group_authority(conn: &Connection, id: GroupId) -> Result<(UserId, bool)> {
    conn.query_row(
        "SELECT admin_id, is_active FROM groups WHERE id = ?1",
        params![id.to_string()],
        |row| Ok((id_at(row, 0)?, row.get::<_, bool>(1)?)),
    )
    .optional()?
    .ok_or(StoreError::NotFound(GROUP_NOT_FOUND))
}

fn touch(conn: &Connection, id: GroupId, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE groups SET updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), now],
    )?;
    Ok(())
}

/// Soft delete the group if nobody is left on its roster.
fn deactivate_if_empty(conn: &Connection, id: GroupId, now: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE groups SET is_active = 0, updated_at = ?2
         WHERE id = ?1 AND is_active = 1
           AND NOT EXISTS (SELECT 1 FROM group_members WHERE group_id = ?1)",
        params![id.to_string(), now],
    )?;
    Ok(changed > 0)
}

pub(crate) fn load_group(conn: &Connection, id: GroupId) -> Result<Option<Group>> {
    let group = conn
        .query_row(
            "SELECT g.id, g.name, g.description, g.avatar,
                    g.admin_id, u.display_name, u.avatar,
                    g.is_active, g.created_at, g.updated_at
             FROM groups g
             LEFT JOIN users u ON u.id = g.admin_id
             WHERE g.id = ?1",
            params![id.to_string()],
            row_to_group,
        )
        .optional()?;

    let Some(mut group) = group else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT m.user_id, u.display_name, u.avatar, m.role
         FROM group_members m
         LEFT JOIN users u ON u.id = m.user_id
         WHERE m.group_id = ?1
         ORDER BY m.position ASC",
    )?;
    group.members = stmt
        .query_map(params![id.to_string()], row_to_member)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(group))
}

/// Map a `rusqlite::Row` to a [`Group`] with an empty roster.
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: id_at(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        avatar: row.get(3)?,
        admin: user_at(row, 4)?,
        members: Vec::new(),
        is_active: row.get(7)?,
        created_at: ts_at(row, 8)?,
        updated_at: ts_at(row, 9)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMember> {
    let role_str: String = row.get(3)?;
    let role = Role::parse(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown role '{role_str}'").into(),
        )
    })?;
    Ok(GroupMember {
        user: user_at(row, 0)?,
        role,
    })
}
