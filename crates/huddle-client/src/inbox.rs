//! Local conversation state and its reconciliation with pushed events.
//!
//! Both inboxes are plain data: applying an event mutates the lists and may
//! return an [`Effect`] that the caller is expected to carry out against
//! the server. Listings fetched from the server are authoritative and
//! replace whatever was counted locally. A message id is acted on at most
//! once, however often it is delivered.

use std::collections::{HashSet, VecDeque};

use huddle_shared::{
    DirectMessage, Group, GroupId, GroupListing, GroupMessage, MessageId, PeerListing, UserId,
};

/// Follow-up work an event asks of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The message landed in the open direct conversation.
    MarkDirectRead(UserId),
    /// The message landed in the open group conversation.
    MarkGroupRead(GroupId),
    /// A message arrived for a group we do not know yet.
    RefreshGroups,
}

/// Ids of recently handled messages, oldest evicted first.
#[derive(Debug, Clone, Default)]
struct SeenIds {
    ids: HashSet<MessageId>,
    order: VecDeque<MessageId>,
}

impl SeenIds {
    const CAPACITY: usize = 4096;

    /// Record `id`; false if it was already recorded.
    fn insert(&mut self, id: MessageId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > Self::CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Direct conversations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DirectInbox {
    me: UserId,
    peers: Vec<PeerListing>,
    open: Option<UserId>,
    transcript: Vec<DirectMessage>,
    seen: SeenIds,
}

impl DirectInbox {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            peers: Vec::new(),
            open: None,
            transcript: Vec::new(),
            seen: SeenIds::default(),
        }
    }

    pub fn peers(&self) -> &[PeerListing] {
        &self.peers
    }

    pub fn open_peer(&self) -> Option<UserId> {
        self.open
    }

    pub fn transcript(&self) -> &[DirectMessage] {
        &self.transcript
    }

    pub fn unseen(&self, peer: UserId) -> u64 {
        self.peers
            .iter()
            .find(|p| p.user.id == peer)
            .map_or(0, |p| p.unseen_count)
    }

    pub fn total_unseen(&self) -> u64 {
        self.peers.iter().map(|p| p.unseen_count).sum()
    }

    /// Replace the peer list with a fresh server listing. Ids already seen
    /// stay seen: the listing counts them if they are still unread.
    pub fn set_peers(&mut self, peers: Vec<PeerListing>) {
        self.peers = peers;
    }

    /// Show `peer`'s conversation. The caller has marked it read on the
    /// server, so the local count drops to zero as well.
    pub fn open(&mut self, peer: UserId, transcript: Vec<DirectMessage>) {
        self.open = Some(peer);
        self.transcript = transcript;
        if let Some(listing) = self.peers.iter_mut().find(|p| p.user.id == peer) {
            listing.unseen_count = 0;
        }
    }

    pub fn close(&mut self) {
        self.open = None;
        self.transcript.clear();
    }

    /// Append a message we just sent to the open transcript.
    pub fn record_sent(&mut self, message: DirectMessage) {
        if self.open == Some(message.receiver_id) {
            push_unique(&mut self.transcript, message, |m| m.id);
        }
    }

    /// Apply a pushed `newDirectMessage`.
    pub fn apply(&mut self, message: &DirectMessage) -> Option<Effect> {
        let peer = message.sender_id();
        if peer == self.me || message.receiver_id != self.me {
            return None;
        }

        if !self.seen.insert(message.id) {
            return None;
        }

        if self.open == Some(peer) {
            push_unique(&mut self.transcript, message.clone(), |m| m.id);
            return Some(Effect::MarkDirectRead(peer));
        }

        match self.peers.iter_mut().find(|p| p.user.id == peer) {
            Some(listing) => listing.unseen_count += 1,
            None => self.peers.insert(
                0,
                PeerListing {
                    user: message.sender.clone(),
                    unseen_count: 1,
                },
            ),
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Group conversations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GroupInbox {
    me: UserId,
    groups: Vec<GroupListing>,
    open: Option<GroupId>,
    transcript: Vec<GroupMessage>,
    seen: SeenIds,
}

impl GroupInbox {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            groups: Vec::new(),
            open: None,
            transcript: Vec::new(),
            seen: SeenIds::default(),
        }
    }

    pub fn groups(&self) -> &[GroupListing] {
        &self.groups
    }

    pub fn open_group(&self) -> Option<GroupId> {
        self.open
    }

    pub fn transcript(&self) -> &[GroupMessage] {
        &self.transcript
    }

    pub fn unseen(&self, group: GroupId) -> u64 {
        self.groups
            .iter()
            .find(|g| g.group.id == group)
            .map_or(0, |g| g.unseen_count)
    }

    pub fn set_groups(&mut self, groups: Vec<GroupListing>) {
        self.groups = groups;
    }

    pub fn open(&mut self, group: GroupId, transcript: Vec<GroupMessage>) {
        self.open = Some(group);
        self.transcript = transcript;
        if let Some(listing) = self.groups.iter_mut().find(|g| g.group.id == group) {
            listing.unseen_count = 0;
        }
    }

    pub fn close(&mut self) {
        self.open = None;
        self.transcript.clear();
    }

    /// Drop a group we left or deleted.
    pub fn forget(&mut self, group: GroupId) {
        self.groups.retain(|g| g.group.id != group);
        if self.open == Some(group) {
            self.close();
        }
    }

    /// Replace a listed group's details after an update.
    pub fn update(&mut self, group: Group) {
        if let Some(listing) = self.groups.iter_mut().find(|g| g.group.id == group.id) {
            listing.group = group;
        }
    }

    pub fn record_sent(&mut self, message: GroupMessage) {
        if self.open == Some(message.group_id) {
            push_unique(&mut self.transcript, message, |m| m.id);
        }
    }

    /// Apply a pushed `newGroupMessage`.
    pub fn apply(&mut self, message: &GroupMessage) -> Option<Effect> {
        if message.sender_id() == self.me {
            return None;
        }

        if !self.seen.insert(message.id) {
            return None;
        }

        if self.open == Some(message.group_id) {
            push_unique(&mut self.transcript, message.clone(), |m| m.id);
            return Some(Effect::MarkGroupRead(message.group_id));
        }

        match self
            .groups
            .iter_mut()
            .find(|g| g.group.id == message.group_id)
        {
            Some(listing) => {
                listing.unseen_count += 1;
                None
            }
            // The refreshed listing already counts this message.
            None => Some(Effect::RefreshGroups),
        }
    }

    /// Apply a pushed `groupCreated`. Returns whether the group was added.
    pub fn apply_group_created(&mut self, group: &Group) -> bool {
        if !group.has_member(self.me) || self.groups.iter().any(|g| g.group.id == group.id) {
            return false;
        }
        self.groups.insert(
            0,
            GroupListing {
                group: group.clone(),
                unseen_count: 0,
            },
        );
        true
    }
}

fn push_unique<T>(list: &mut Vec<T>, item: T, id: impl Fn(&T) -> MessageId) {
    let new_id = id(&item);
    if !list.iter().any(|existing| id(existing) == new_id) {
        list.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use huddle_shared::{GroupMember, Role, UserSummary};

    fn direct(from: UserId, to: UserId) -> DirectMessage {
        DirectMessage {
            id: MessageId::new(),
            sender: UserSummary::anonymous(from),
            receiver_id: to,
            text: Some("hi".into()),
            image: None,
            read: false,
            created_at: Utc::now(),
        }
    }

    fn group(admin: UserId, members: &[UserId]) -> Group {
        let now = Utc::now();
        let roster = std::iter::once(GroupMember {
            user: UserSummary::anonymous(admin),
            role: Role::Admin,
        })
        .chain(members.iter().map(|m| GroupMember {
            user: UserSummary::anonymous(*m),
            role: Role::Member,
        }))
        .collect();
        Group {
            id: GroupId::new(),
            name: "Team".into(),
            description: None,
            avatar: None,
            admin: UserSummary::anonymous(admin),
            members: roster,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn group_message(group: GroupId, from: UserId) -> GroupMessage {
        GroupMessage {
            id: MessageId::new(),
            group_id: group,
            sender: UserSummary::anonymous(from),
            text: Some("hi".into()),
            image: None,
            read_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn closed_direct_conversation_counts_each_message_once() {
        let (me, alice) = (UserId::new(), UserId::new());
        let mut inbox = DirectInbox::new(me);
        inbox.set_peers(vec![PeerListing {
            user: UserSummary::anonymous(alice),
            unseen_count: 0,
        }]);

        let msg = direct(alice, me);
        assert_eq!(inbox.apply(&msg), None);
        assert_eq!(inbox.apply(&msg), None);
        assert_eq!(inbox.apply(&direct(alice, me)), None);

        assert_eq!(inbox.unseen(alice), 2);
        assert!(inbox.transcript().is_empty());
    }

    #[test]
    fn open_direct_conversation_appends_and_requests_read() {
        let (me, alice) = (UserId::new(), UserId::new());
        let mut inbox = DirectInbox::new(me);
        inbox.set_peers(vec![PeerListing {
            user: UserSummary::anonymous(alice),
            unseen_count: 4,
        }]);
        inbox.open(alice, Vec::new());
        assert_eq!(inbox.unseen(alice), 0);

        let msg = direct(alice, me);
        assert_eq!(inbox.apply(&msg), Some(Effect::MarkDirectRead(alice)));
        assert_eq!(inbox.apply(&msg), None);

        assert_eq!(inbox.transcript().len(), 1);
        assert_eq!(inbox.unseen(alice), 0);
    }

    #[test]
    fn unknown_sender_gets_a_listing() {
        let (me, stranger) = (UserId::new(), UserId::new());
        let mut inbox = DirectInbox::new(me);

        inbox.apply(&direct(stranger, me));

        assert_eq!(inbox.peers()[0].user.id, stranger);
        assert_eq!(inbox.unseen(stranger), 1);
        assert_eq!(inbox.total_unseen(), 1);
    }

    #[test]
    fn messages_for_someone_else_are_ignored() {
        let (me, alice, bob) = (UserId::new(), UserId::new(), UserId::new());
        let mut inbox = DirectInbox::new(me);

        assert_eq!(inbox.apply(&direct(alice, bob)), None);
        assert!(inbox.peers().is_empty());
    }

    #[test]
    fn server_listing_replaces_local_counts() {
        let (me, alice) = (UserId::new(), UserId::new());
        let mut inbox = DirectInbox::new(me);
        inbox.apply(&direct(alice, me));
        inbox.apply(&direct(alice, me));

        inbox.set_peers(vec![PeerListing {
            user: UserSummary::anonymous(alice),
            unseen_count: 0,
        }]);
        assert_eq!(inbox.unseen(alice), 0);
    }

    #[test]
    fn group_messages_reconcile_by_open_conversation() {
        let (me, other) = (UserId::new(), UserId::new());
        let team = group(other, &[me]);
        let side = group(other, &[me]);

        let mut inbox = GroupInbox::new(me);
        inbox.set_groups(vec![
            GroupListing {
                group: team.clone(),
                unseen_count: 0,
            },
            GroupListing {
                group: side.clone(),
                unseen_count: 0,
            },
        ]);
        inbox.open(team.id, Vec::new());

        let in_open = group_message(team.id, other);
        assert_eq!(inbox.apply(&in_open), Some(Effect::MarkGroupRead(team.id)));
        assert_eq!(inbox.apply(&in_open), None);
        assert_eq!(inbox.transcript().len(), 1);
        assert_eq!(inbox.unseen(team.id), 0);

        let elsewhere = group_message(side.id, other);
        assert_eq!(inbox.apply(&elsewhere), None);
        assert_eq!(inbox.apply(&elsewhere), None);
        assert_eq!(inbox.unseen(side.id), 1);
    }

    #[test]
    fn message_for_unlisted_group_requests_refresh() {
        let me = UserId::new();
        let mut inbox = GroupInbox::new(me);
        let msg = group_message(GroupId::new(), UserId::new());
        assert_eq!(inbox.apply(&msg), Some(Effect::RefreshGroups));
    }

    #[test]
    fn group_created_only_for_members() {
        let (me, admin, outsider) = (UserId::new(), UserId::new(), UserId::new());
        let mut inbox = GroupInbox::new(me);

        let not_mine = group(admin, &[outsider]);
        assert!(!inbox.apply_group_created(&not_mine));
        assert!(inbox.groups().is_empty());

        let mine = group(admin, &[me]);
        assert!(inbox.apply_group_created(&mine));
        assert!(!inbox.apply_group_created(&mine));
        assert_eq!(inbox.groups().len(), 1);
        assert_eq!(inbox.unseen(mine.id), 0);
    }

    #[test]
    fn forgetting_the_open_group_closes_it() {
        let (me, admin) = (UserId::new(), UserId::new());
        let team = group(admin, &[me]);
        let mut inbox = GroupInbox::new(me);
        inbox.apply_group_created(&team);
        inbox.open(team.id, vec![group_message(team.id, admin)]);

        inbox.forget(team.id);
        assert!(inbox.open_group().is_none());
        assert!(inbox.transcript().is_empty());
        assert!(inbox.groups().is_empty());
    }

    #[test]
    fn direct_redelivery_after_closing_is_not_counted() {
        let (me, alice) = (UserId::new(), UserId::new());
        let mut inbox = DirectInbox::new(me);
        inbox.open(alice, Vec::new());

        let msg = direct(alice, me);
        assert_eq!(inbox.apply(&msg), Some(Effect::MarkDirectRead(alice)));
        inbox.close();

        assert_eq!(inbox.apply(&msg), None);
        assert_eq!(inbox.unseen(alice), 0);
    }

    #[test]
    fn direct_redelivery_after_resync_is_not_counted_twice() {
        let (me, alice) = (UserId::new(), UserId::new());
        let mut inbox = DirectInbox::new(me);

        let msg = direct(alice, me);
        inbox.apply(&msg);
        inbox.set_peers(vec![PeerListing {
            user: UserSummary::anonymous(alice),
            unseen_count: 1,
        }]);

        inbox.apply(&msg);
        assert_eq!(inbox.unseen(alice), 1);

        inbox.apply(&direct(alice, me));
        assert_eq!(inbox.unseen(alice), 2);
    }

    #[test]
    fn group_redelivery_after_closing_is_not_counted() {
        let (me, other) = (UserId::new(), UserId::new());
        let team = group(other, &[me]);
        let mut inbox = GroupInbox::new(me);
        inbox.apply_group_created(&team);
        inbox.open(team.id, Vec::new());

        let msg = group_message(team.id, other);
        assert_eq!(inbox.apply(&msg), Some(Effect::MarkGroupRead(team.id)));
        inbox.close();

        assert_eq!(inbox.apply(&msg), None);
        assert_eq!(inbox.unseen(team.id), 0);
    }

    #[test]
    fn group_redelivery_after_resync_is_not_counted_twice() {
        let (me, other) = (UserId::new(), UserId::new());
        let team = group(other, &[me]);
        let mut inbox = GroupInbox::new(me);
        inbox.apply_group_created(&team);

        let msg = group_message(team.id, other);
        inbox.apply(&msg);
        inbox.set_groups(vec![GroupListing {
            group: team.clone(),
            unseen_count: 1,
        }]);

        assert_eq!(inbox.apply(&msg), None);
        assert_eq!(inbox.unseen(team.id), 1);
    }

    #[test]
    fn seen_ids_forget_the_oldest_past_capacity() {
        let mut seen = SeenIds::default();
        let first = MessageId::new();
        assert!(seen.insert(first));
        assert!(!seen.insert(first));

        for _ in 0..SeenIds::CAPACITY {
            seen.insert(MessageId::new());
        }
        assert_eq!(seen.order.len(), SeenIds::CAPACITY);
        assert!(seen.insert(first));
    }
}
