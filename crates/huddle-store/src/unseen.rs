//! Unseen-count aggregation.
//!
//! Counts are derived from the stored read markers on every call and never
//! cached, so they cannot drift from the messages they describe.

use rusqlite::{params, Connection};

use huddle_shared::{GroupId, PeerListing, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::rows::user_at;

impl Database {
    /// Unread `peer -> viewer` direct messages.
    pub fn direct_unseen_count(&self, viewer: UserId, peer: UserId) -> Result<u64> {
        direct_unseen_count(self.conn(), viewer, peer)
    }

    /// Messages in `group` whose readBy set does not contain `viewer`.
    pub fn group_unseen_count(&self, group: GroupId, viewer: UserId) -> Result<u64> {
        group_unseen_count(self.conn(), group, viewer)
    }

    /// Everyone the viewer can start or continue a direct conversation with:
    /// users with a stored profile plus anyone the viewer has exchanged
    /// messages with, each with the viewer's unseen count.
    pub fn list_direct_peers(&self, viewer: UserId) -> Result<Vec<PeerListing>> {
        let mut stmt = self.conn().prepare(
            "WITH peers(id) AS (
                 SELECT id FROM users WHERE id != ?1
                 UNION
                 SELECT sender_id FROM direct_messages WHERE receiver_id = ?1 AND sender_id != ?1
                 UNION
                 SELECT receiver_id FROM direct_messages WHERE sender_id = ?1 AND receiver_id != ?1
             )
             SELECT p.id, u.display_name, u.avatar
             FROM peers p
             LEFT JOIN users u ON u.id = p.id
             ORDER BY u.display_name IS NULL, u.display_name COLLATE NOCASE, p.id",
        )?;

        let users = stmt
            .query_map(params![viewer.to_string()], |row| user_at(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut listings = Vec::with_capacity(users.len());
        for user in users {
            let unseen_count = direct_unseen_count(self.conn(), viewer, user.id)?;
            listings.push(PeerListing { user, unseen_count });
        }
        Ok(listings)
    }
}

pub(crate) fn direct_unseen_count(conn: &Connection, viewer: UserId, peer: UserId) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM direct_messages
         WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
        params![peer.to_string(), viewer.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub(crate) fn group_unseen_count(conn: &Connection, group: GroupId, viewer: UserId) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM group_messages m
         WHERE m.group_id = ?1
           AND NOT EXISTS (
               SELECT 1 FROM group_message_reads r
               WHERE r.message_id = m.id AND r.user_id = ?2
           )",
        params![group.to_string(), viewer.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
