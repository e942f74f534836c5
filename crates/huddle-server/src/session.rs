//! Conversation operations.
//!
//! Each operation runs in the same order: resolve any inline image, apply
//! the change in the store, then notify connected users. An upload failure
//! therefore never leaves a half-applied change behind, and nobody is
//! notified about something that was not persisted.

use std::sync::Arc;

use huddle_shared::api::{
    CreateGroupRequest, SendMessageRequest, UpdateGroupRequest, UpdateProfileRequest,
};
use huddle_shared::{
    DirectMessage, Group, GroupId, GroupListing, GroupMessage, PeerListing, UserId, UserSummary,
};
use huddle_store::{GroupChanges, NewGroup};

use crate::blob_store::BlobStore;
use crate::error::ServerError;
use crate::fanout::ConnectionRegistry;
use crate::store::Store;

#[derive(Clone)]
pub struct ChatService {
    store: Store,
    blobs: Arc<BlobStore>,
    registry: ConnectionRegistry,
}

/// Message body after validation and image upload.
struct Payload {
    text: Option<String>,
    image: Option<String>,
}

impl ChatService {
    pub fn new(store: Store, blobs: Arc<BlobStore>, registry: ConnectionRegistry) -> Self {
        Self {
            store,
            blobs,
            registry,
        }
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    pub async fn update_profile(
        &self,
        me: UserId,
        req: UpdateProfileRequest,
    ) -> Result<UserSummary, ServerError> {
        let avatar = self.blobs.resolve_reference(req.avatar).await?;
        let display_name = req
            .display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        self.store
            .call(move |db| db.upsert_user(me, display_name.as_deref(), avatar.as_deref()))
            .await
    }

    pub async fn profile(&self, me: UserId) -> Result<UserSummary, ServerError> {
        self.store.read(move |db| db.get_user(me)).await
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub async fn create_group(
        &self,
        me: UserId,
        req: CreateGroupRequest,
    ) -> Result<Group, ServerError> {
        if req.name.trim().is_empty() {
            return Err(ServerError::Validation("Group name is required".to_string()));
        }
        let avatar = self.blobs.resolve_reference(req.avatar).await?;

        let new = NewGroup {
            admin: me,
            name: req.name,
            description: req.description,
            avatar,
            member_ids: req.member_ids,
        };
        let group = self.store.call(move |db| db.create_group(&new)).await?;

        tracing::info!(group = %group.id, admin = %me, members = group.members.len(), "Group created");
        self.registry.notify_group_created(&group);
        Ok(group)
    }

    pub async fn list_groups(&self, me: UserId) -> Result<Vec<GroupListing>, ServerError> {
        self.store.read(move |db| db.list_groups_for_user(me)).await
    }

    pub async fn group_details(&self, me: UserId, id: GroupId) -> Result<Group, ServerError> {
        self.store
            .read(move |db| db.get_group_for_member(id, me))
            .await
    }

    pub async fn update_group(
        &self,
        me: UserId,
        id: GroupId,
        req: UpdateGroupRequest,
    ) -> Result<Group, ServerError> {
        if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ServerError::Validation("Group name cannot be empty".to_string()));
        }
        let avatar = self.blobs.resolve_reference(req.avatar).await?;

        let changes = GroupChanges {
            name: req.name,
            description: req.description,
            avatar,
        };
        self.store
            .call(move |db| db.update_group(id, me, &changes))
            .await
    }

    pub async fn delete_group(&self, me: UserId, id: GroupId) -> Result<(), ServerError> {
        self.store.call(move |db| db.delete_group(id, me)).await?;
        tracing::info!(group = %id, by = %me, "Group deleted");
        Ok(())
    }

    pub async fn add_member(
        &self,
        me: UserId,
        id: GroupId,
        member: UserId,
    ) -> Result<Group, ServerError> {
        self.store
            .call(move |db| db.add_member(id, me, member))
            .await
    }

    pub async fn remove_member(
        &self,
        me: UserId,
        id: GroupId,
        member: UserId,
    ) -> Result<Group, ServerError> {
        self.store
            .call(move |db| db.remove_member(id, me, member))
            .await
    }

    pub async fn leave_group(&self, me: UserId, id: GroupId) -> Result<(), ServerError> {
        let outcome = self.store.call(move |db| db.leave_group(id, me)).await?;
        if outcome.deactivated {
            tracing::info!(group = %id, "Last member left, group deactivated");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Group messages
    // ------------------------------------------------------------------

    pub async fn group_messages(
        &self,
        me: UserId,
        id: GroupId,
    ) -> Result<Vec<GroupMessage>, ServerError> {
        self.store
            .read(move |db| db.list_group_messages(id, me))
            .await
    }

    pub async fn send_group_message(
        &self,
        me: UserId,
        id: GroupId,
        req: SendMessageRequest,
    ) -> Result<GroupMessage, ServerError> {
        let payload = self.payload(req).await?;

        let (message, members) = self
            .store
            .call(move |db| {
                let message = db.insert_group_message(
                    me,
                    id,
                    payload.text.as_deref(),
                    payload.image.as_deref(),
                )?;
                let members: Vec<UserId> = db.get_group(id)?.member_ids().collect();
                Ok((message, members))
            })
            .await?;

        self.registry.notify_group_message(&members, &message);
        Ok(message)
    }

    pub async fn mark_group_read(&self, me: UserId, id: GroupId) -> Result<usize, ServerError> {
        self.store.call(move |db| db.mark_group_read(me, id)).await
    }

    // ------------------------------------------------------------------
    // Direct messages
    // ------------------------------------------------------------------

    pub async fn direct_peers(&self, me: UserId) -> Result<Vec<PeerListing>, ServerError> {
        self.store.read(move |db| db.list_direct_peers(me)).await
    }

    pub async fn direct_messages(
        &self,
        me: UserId,
        peer: UserId,
    ) -> Result<Vec<DirectMessage>, ServerError> {
        self.store
            .read(move |db| db.list_direct_messages(me, peer))
            .await
    }

    pub async fn send_direct_message(
        &self,
        me: UserId,
        peer: UserId,
        req: SendMessageRequest,
    ) -> Result<DirectMessage, ServerError> {
        if me == peer {
            return Err(ServerError::Validation(
                "Cannot send a direct message to yourself".to_string(),
            ));
        }
        let payload = self.payload(req).await?;

        let message = self
            .store
            .call(move |db| {
                db.insert_direct_message(me, peer, payload.text.as_deref(), payload.image.as_deref())
            })
            .await?;

        self.registry.notify_direct_message(&message);
        Ok(message)
    }

    pub async fn mark_direct_read(&self, me: UserId, peer: UserId) -> Result<usize, ServerError> {
        self.store
            .call(move |db| db.mark_direct_read(me, peer))
            .await
    }

    /// Reject empty messages, then upload the image if it is inline.
    async fn payload(&self, req: SendMessageRequest) -> Result<Payload, ServerError> {
        let text = req.text.filter(|t| !t.trim().is_empty());
        let has_image = req.image.as_deref().is_some_and(|i| !i.trim().is_empty());
        if text.is_none() && !has_image {
            return Err(ServerError::Validation(
                "A message needs text or an image".to_string(),
            ));
        }

        let image = self.blobs.resolve_reference(req.image).await?;
        Ok(Payload { text, image })
    }
}
