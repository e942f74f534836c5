//! Message store: one-to-one messages.

use rusqlite::params;

use huddle_shared::{DirectMessage, MessageId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::rows::{id_at, now, ts_at, ts_to_sql, user_at};
use crate::users::user_summary;

const SELECT_DIRECT: &str = "
    SELECT d.id, d.sender_id, u.display_name, u.avatar,
           d.receiver_id, d.text, d.image, d.is_read, d.created_at
    FROM direct_messages d
    LEFT JOIN users u ON u.id = d.sender_id";

impl Database {
    /// Persist a new unread message. Non-emptiness of the payload is checked
    /// by the caller; `image` must already be a URL.
    pub fn insert_direct_message(
        &self,
        sender: UserId,
        receiver: UserId,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<DirectMessage> {
        let id = MessageId::new();
        let created_at = now();

        self.conn().execute(
            "INSERT INTO direct_messages (id, sender_id, receiver_id, text, image, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                id.to_string(),
                sender.to_string(),
                receiver.to_string(),
                text,
                image,
                ts_to_sql(&created_at),
            ],
        )?;

        Ok(DirectMessage {
            id,
            sender: user_summary(self.conn(), sender)?,
            receiver_id: receiver,
            text: text.map(str::to_owned),
            image: image.map(str::to_owned),
            read: false,
            created_at,
        })
    }

    /// Full history between two users in both directions, oldest first.
    pub fn list_direct_messages(&self, a: UserId, b: UserId) -> Result<Vec<DirectMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_DIRECT}
             WHERE (d.sender_id = ?1 AND d.receiver_id = ?2)
                OR (d.sender_id = ?2 AND d.receiver_id = ?1)
             ORDER BY d.created_at ASC, d.rowid ASC"
        ))?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_direct)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Mark every unread `peer -> viewer` message as read and return how many
    /// changed. A single statement, so messages committed after it are left
    /// unread.
    pub fn mark_direct_read(&self, viewer: UserId, peer: UserId) -> Result<usize> {
        let changed = self.conn().execute(
            "UPDATE direct_messages SET is_read = 1
             WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
            params![peer.to_string(), viewer.to_string()],
        )?;
        Ok(changed)
    }
}

fn row_to_direct(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectMessage> {
    Ok(DirectMessage {
        id: id_at(row, 0)?,
        sender: user_at(row, 1)?,
        receiver_id: id_at(row, 4)?,
        text: row.get(5)?,
        image: row.get(6)?,
        read: row.get(7)?,
        created_at: ts_at(row, 8)?,
    })
}
