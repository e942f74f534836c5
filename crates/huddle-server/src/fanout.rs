//! Real-time fan-out.
//!
//! Each connected user owns exactly one event channel. Notifications are
//! fire-and-forget: a user without a live connection simply misses the
//! event and catches up by re-fetching on reconnect. Callers only notify
//! after the change has been persisted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use huddle_shared::{DirectMessage, Group, GroupMessage, ServerEvent, UserId};

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

struct Connection {
    id: u64,
    tx: EventSender,
}

/// Identifies one registration, so a stale connection cannot unregister the
/// one that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub user: UserId,
    id: u64,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<UserId, Connection>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fresh channel to `user`. A previous connection for the same
    /// user is dropped, which closes its receiver.
    pub fn register(&self, user: UserId) -> (ConnectionHandle, EventReceiver) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        if self
            .connections
            .insert(user, Connection { id, tx })
            .is_some()
        {
            tracing::info!(user = %user, "Replacing existing connection");
        }

        (ConnectionHandle { user, id }, rx)
    }

    pub fn unregister(&self, handle: &ConnectionHandle) {
        self.connections
            .remove_if(&handle.user, |_, conn| conn.id == handle.id);
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// Push an event to `user` if they are connected. Returns whether it was
    /// handed to a live channel.
    pub fn send_to(&self, user: UserId, event: ServerEvent) -> bool {
        let Some(conn) = self.connections.get(&user) else {
            return false;
        };
        if conn.tx.send(event).is_err() {
            tracing::debug!(user = %user, "Dropping event for closed connection");
            return false;
        }
        true
    }

    /// Deliver a direct message to its receiver only.
    pub fn notify_direct_message(&self, message: &DirectMessage) {
        let delivered = self.send_to(
            message.receiver_id,
            ServerEvent::NewDirectMessage(message.clone()),
        );
        tracing::debug!(message = %message.id, delivered, "newDirectMessage");
    }

    /// Deliver a group message to every listed member except its sender.
    pub fn notify_group_message(&self, members: &[UserId], message: &GroupMessage) {
        let sender = message.sender_id();
        let delivered = members
            .iter()
            .filter(|m| **m != sender)
            .filter(|m| self.send_to(**m, ServerEvent::NewGroupMessage(message.clone())))
            .count();
        tracing::debug!(message = %message.id, delivered, "newGroupMessage");
    }

    /// Announce a new group to its members, skipping the creator.
    pub fn notify_group_created(&self, group: &Group) {
        let delivered = group
            .member_ids()
            .filter(|m| *m != group.admin.id)
            .filter(|m| self.send_to(*m, ServerEvent::GroupCreated(group.clone())))
            .count();
        tracing::debug!(group = %group.id, delivered, "groupCreated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use huddle_shared::{GroupId, GroupMember, MessageId, Role, UserSummary};

    fn group_message(group: GroupId, sender: UserId) -> GroupMessage {
        GroupMessage {
            id: MessageId::new(),
            group_id: group,
            sender: UserSummary::anonymous(sender),
            text: Some("hi".into()),
            image: None,
            read_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_direct_message_reaches_receiver_only() {
        let registry = ConnectionRegistry::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let (_ha, mut rx_alice) = registry.register(alice);
        let (_hb, mut rx_bob) = registry.register(bob);

        let message = DirectMessage {
            id: MessageId::new(),
            sender: UserSummary::anonymous(alice),
            receiver_id: bob,
            text: Some("hello".into()),
            image: None,
            read: false,
            created_at: Utc::now(),
        };
        registry.notify_direct_message(&message);

        match rx_bob.try_recv().unwrap() {
            ServerEvent::NewDirectMessage(m) => assert_eq!(m.id, message.id),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx_alice.try_recv().is_err());
    }

    #[test]
    fn test_group_message_skips_sender() {
        let registry = ConnectionRegistry::new();
        let group = GroupId::new();
        let members = [UserId::new(), UserId::new(), UserId::new()];
        let mut receivers: Vec<_> = members.iter().map(|m| registry.register(*m).1).collect();

        registry.notify_group_message(&members, &group_message(group, members[1]));

        assert!(receivers[0].try_recv().is_ok());
        assert!(receivers[1].try_recv().is_err());
        assert!(receivers[2].try_recv().is_ok());
    }

    #[test]
    fn test_group_created_skips_creator() {
        let registry = ConnectionRegistry::new();
        let (admin, member) = (UserId::new(), UserId::new());
        let (_ha, mut rx_admin) = registry.register(admin);
        let (_hm, mut rx_member) = registry.register(member);

        let now = Utc::now();
        let group = Group {
            id: GroupId::new(),
            name: "Team".into(),
            description: None,
            avatar: None,
            admin: UserSummary::anonymous(admin),
            members: vec![
                GroupMember {
                    user: UserSummary::anonymous(admin),
                    role: Role::Admin,
                },
                GroupMember {
                    user: UserSummary::anonymous(member),
                    role: Role::Member,
                },
            ],
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        registry.notify_group_created(&group);

        assert!(matches!(
            rx_member.try_recv(),
            Ok(ServerEvent::GroupCreated(_))
        ));
        assert!(rx_admin.try_recv().is_err());
    }

    #[test]
    fn test_offline_users_are_skipped() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to(
            UserId::new(),
            ServerEvent::NewGroupMessage(group_message(GroupId::new(), UserId::new()))
        ));
    }

    #[test]
    fn test_replacement_keeps_newest_connection() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();

        let (old, mut old_rx) = registry.register(user);
        let (new, mut new_rx) = registry.register(user);

        // The replaced channel is closed.
        assert!(matches!(
            old_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // A late cleanup from the old connection leaves the new one alone.
        registry.unregister(&old);
        assert_eq!(registry.connected_count(), 1);

        let event = ServerEvent::NewGroupMessage(group_message(GroupId::new(), UserId::new()));
        assert!(registry.send_to(user, event));
        assert!(new_rx.try_recv().is_ok());

        registry.unregister(&new);
        assert_eq!(registry.connected_count(), 0);
    }
}
