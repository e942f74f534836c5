//! Message store: group messages and their readBy sets.

use std::collections::HashMap;

use rusqlite::params;

use huddle_shared::{GroupId, GroupMessage, MessageId, ReadReceipt, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::groups::is_active_member;
use crate::rows::{id_at, now, ts_at, ts_to_sql, user_at};
use crate::users::user_summary;

const NOT_FOUND: &str = "Group not found";

impl Database {
    /// Persist a message from an active member. `image` must already be a URL.
    pub fn insert_group_message(
        &mut self,
        sender: UserId,
        group: GroupId,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<GroupMessage> {
        let id = MessageId::new();
        let created_at = now();

        let tx = self.write_tx()?;
        if !is_active_member(&tx, group, sender)? {
            return Err(StoreError::NotFound(NOT_FOUND));
        }

        tx.execute(
            "INSERT INTO group_messages (id, group_id, sender_id, text, image, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                group.to_string(),
                sender.to_string(),
                text,
                image,
                ts_to_sql(&created_at),
            ],
        )?;
        let sender = user_summary(&tx, sender)?;
        tx.commit()?;

        Ok(GroupMessage {
            id,
            group_id: group,
            sender,
            text: text.map(str::to_owned),
            image: image.map(str::to_owned),
            read_by: Vec::new(),
            created_at,
        })
    }

    /// Full group history, oldest first, for an active member.
    pub fn list_group_messages(
        &mut self,
        group: GroupId,
        requester: UserId,
    ) -> Result<Vec<GroupMessage>> {
        // Read markers and messages come from one snapshot.
        let tx = self.conn_mut().transaction()?;
        if !is_active_member(&tx, group, requester)? {
            return Err(StoreError::NotFound(NOT_FOUND));
        }

        let mut receipts: HashMap<MessageId, Vec<ReadReceipt>> = HashMap::new();
        {
            let mut stmt = tx.prepare(
                "SELECT r.message_id, r.user_id, r.read_at
                 FROM group_message_reads r
                 JOIN group_messages m ON m.id = r.message_id
                 WHERE m.group_id = ?1
                 ORDER BY r.read_at ASC, r.rowid ASC",
            )?;
            let rows = stmt.query_map(params![group.to_string()], |row| {
                Ok((
                    id_at::<MessageId>(row, 0)?,
                    ReadReceipt {
                        user_id: id_at(row, 1)?,
                        read_at: ts_at(row, 2)?,
                    },
                ))
            })?;
            for row in rows {
                let (message_id, receipt) = row?;
                receipts.entry(message_id).or_default().push(receipt);
            }
        }

        let mut messages = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT m.id, m.group_id, m.sender_id, u.display_name, u.avatar,
                        m.text, m.image, m.created_at
                 FROM group_messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.group_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC",
            )?;
            let rows = stmt.query_map(params![group.to_string()], row_to_group_message)?;
            for row in rows {
                let mut message = row?;
                message.read_by = receipts.remove(&message.id).unwrap_or_default();
                messages.push(message);
            }
        }

        tx.commit()?;
        Ok(messages)
    }

    /// Add `viewer` to the readBy set of every message in the group that does
    /// not have it yet, and return how many receipts were added. Repeating the
    /// call adds nothing; messages committed afterwards are not covered.
    pub fn mark_group_read(&mut self, viewer: UserId, group: GroupId) -> Result<usize> {
        let tx = self.write_tx()?;
        if !is_active_member(&tx, group, viewer)? {
            return Err(StoreError::NotFound(NOT_FOUND));
        }

        let added = tx.execute(
            "INSERT OR IGNORE INTO group_message_reads (message_id, user_id, read_at)
             SELECT m.id, ?2, ?3
             FROM group_messages m
             WHERE m.group_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM group_message_reads r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )",
            params![
                group.to_string(),
                viewer.to_string(),
                ts_to_sql(&now()),
            ],
        )?;
        tx.commit()?;

        tracing::debug!(group = %group, viewer = %viewer, added, "group messages marked read");
        Ok(added)
    }
}

fn row_to_group_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMessage> {
    Ok(GroupMessage {
        id: id_at(row, 0)?,
        group_id: id_at(row, 1)?,
        sender: user_at(row, 2)?,
        text: row.get(5)?,
        image: row.get(6)?,
        read_by: Vec::new(),
        created_at: ts_at(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::NewGroup;
    use huddle_shared::Group;

    fn setup() -> (Database, Group, UserId, UserId) {
        let mut db = Database::open_in_memory().unwrap();
        let admin = UserId::new();
        let u2 = UserId::new();
        let group = db
            .create_group(&NewGroup {
                admin,
                name: "Team".into(),
                description: None,
                avatar: None,
                member_ids: vec![u2],
            })
            .unwrap();
        (db, group, admin, u2)
    }

    #[test]
    fn team_scenario() {
        let (mut db, group, admin, u2) = setup();

        db.insert_group_message(u2, group.id, Some("hi"), None).unwrap();

        let messages = db.list_group_messages(group.id, admin).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text.as_deref(), Some("hi"));
        assert_eq!(messages[0].sender_id(), u2);
        assert!(messages[0].read_by.is_empty());

        db.mark_group_read(admin, group.id).unwrap();
        assert_eq!(db.group_unseen_count(group.id, admin).unwrap(), 0);

        let messages = db.list_group_messages(group.id, admin).unwrap();
        assert!(messages[0].is_read_by(admin));
        assert!(!messages[0].is_read_by(u2));
    }

    #[test]
    fn non_members_cannot_send_or_read() {
        let (mut db, group, _admin, _u2) = setup();
        let outsider = UserId::new();

        assert!(matches!(
            db.insert_group_message(outsider, group.id, Some("x"), None),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.list_group_messages(group.id, outsider),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.mark_group_read(outsider, group.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn mark_read_is_idempotent() {
        let (mut db, group, admin, u2) = setup();
        db.insert_group_message(u2, group.id, Some("a"), None).unwrap();
        db.insert_group_message(u2, group.id, Some("b"), None).unwrap();

        assert_eq!(db.mark_group_read(admin, group.id).unwrap(), 2);
        let first = db.list_group_messages(group.id, admin).unwrap();

        assert_eq!(db.mark_group_read(admin, group.id).unwrap(), 0);
        let second = db.list_group_messages(group.id, admin).unwrap();

        assert_eq!(first, second);
        assert!(second.iter().all(|m| m.read_by.len() == 1));
    }

    #[test]
    fn history_survives_soft_delete_but_is_hidden() {
        let (mut db, group, admin, u2) = setup();
        db.insert_group_message(u2, group.id, Some("kept"), None).unwrap();
        db.delete_group(group.id, admin).unwrap();

        assert!(matches!(
            db.list_group_messages(group.id, admin),
            Err(StoreError::NotFound(_))
        ));
        let stored: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM group_messages WHERE group_id = ?1",
                params![group.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, 1);
    }
}
