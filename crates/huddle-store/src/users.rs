//! User display profiles.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use huddle_shared::{UserId, UserSummary};

use crate::database::Database;
use crate::error::Result;
use crate::rows::{ts_to_sql, user_at};

impl Database {
    /// Create or update the profile for `id`. Fields passed as `None` keep
    /// their stored value.
    pub fn upsert_user(
        &self,
        id: UserId,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<UserSummary> {
        let now = ts_to_sql(&Utc::now());
        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = COALESCE(excluded.display_name, users.display_name),
                 avatar       = COALESCE(excluded.avatar, users.avatar),
                 updated_at   = excluded.updated_at",
            params![id.to_string(), display_name, avatar, now],
        )?;
        user_summary(self.conn(), id)
    }

    pub fn get_user(&self, id: UserId) -> Result<UserSummary> {
        user_summary(self.conn(), id)
    }
}

/// Display info for `id`, or an anonymous summary if no profile is stored.
pub(crate) fn user_summary(conn: &Connection, id: UserId) -> Result<UserSummary> {
    let found = conn
        .query_row(
            "SELECT id, display_name, avatar FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| user_at(row, 0),
        )
        .optional()?;
    Ok(found.unwrap_or_else(|| UserSummary::anonymous(id)))
}
