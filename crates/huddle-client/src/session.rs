//! Client-side chat session.
//!
//! [`ChatSession`] ties the HTTP API, the two inboxes and the event stream
//! together. The local user id is fixed at construction; there is no global
//! "current user".

use huddle_shared::api::{CreateGroupRequest, SendMessageRequest, UpdateGroupRequest};
use huddle_shared::{DirectMessage, Group, GroupId, GroupMessage, ServerEvent, UserId};

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::events::ConnectionEvent;
use crate::inbox::{DirectInbox, Effect, GroupInbox};

pub struct ChatSession {
    api: ApiClient,
    me: UserId,
    direct: DirectInbox,
    groups: GroupInbox,
}

impl ChatSession {
    pub fn new(api: ApiClient, me: UserId) -> Self {
        Self {
            api,
            me,
            direct: DirectInbox::new(me),
            groups: GroupInbox::new(me),
        }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn direct(&self) -> &DirectInbox {
        &self.direct
    }

    pub fn groups(&self) -> &GroupInbox {
        &self.groups
    }

    /// Re-fetch everything the server is authoritative for: both listings
    /// and the open transcript, if any.
    pub async fn resync(&mut self) -> Result<()> {
        self.direct.set_peers(self.api.direct_peers().await?);
        self.groups.set_groups(self.api.list_groups().await?);

        if let Some(peer) = self.direct.open_peer() {
            self.open_direct(peer).await?;
        }
        if let Some(group) = self.groups.open_group() {
            self.open_group(group).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Direct conversations
    // ------------------------------------------------------------------

    pub async fn open_direct(&mut self, peer: UserId) -> Result<()> {
        let transcript = self.api.direct_messages(peer).await?;
        self.api.mark_direct_read(peer).await?;
        self.direct.open(peer, transcript);
        Ok(())
    }

    pub fn close_direct(&mut self) {
        self.direct.close();
    }

    pub async fn send_direct(
        &mut self,
        text: Option<String>,
        image: Option<String>,
    ) -> Result<DirectMessage> {
        let peer = self
            .direct
            .open_peer()
            .ok_or(ClientError::NoOpenConversation)?;
        let message = self
            .api
            .send_direct_message(peer, &SendMessageRequest { text, image })
            .await?;
        self.direct.record_sent(message.clone());
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Group conversations
    // ------------------------------------------------------------------

    pub async fn open_group(&mut self, group: GroupId) -> Result<()> {
        let transcript = self.api.group_messages(group).await?;
        self.api.mark_group_read(group).await?;
        self.groups.open(group, transcript);
        Ok(())
    }

    pub fn close_group(&mut self) {
        self.groups.close();
    }

    pub async fn send_group(
        &mut self,
        text: Option<String>,
        image: Option<String>,
    ) -> Result<GroupMessage> {
        let group = self
            .groups
            .open_group()
            .ok_or(ClientError::NoOpenConversation)?;
        let message = self
            .api
            .send_group_message(group, &SendMessageRequest { text, image })
            .await?;
        self.groups.record_sent(message.clone());
        Ok(message)
    }

    pub async fn create_group(&mut self, req: &CreateGroupRequest) -> Result<Group> {
        let group = self.api.create_group(req).await?;
        self.groups.apply_group_created(&group);
        Ok(group)
    }

    pub async fn update_group(&mut self, id: GroupId, req: &UpdateGroupRequest) -> Result<Group> {
        let group = self.api.update_group(id, req).await?;
        self.groups.update(group.clone());
        Ok(group)
    }

    pub async fn leave_group(&mut self, id: GroupId) -> Result<()> {
        self.api.leave_group(id).await?;
        self.groups.forget(id);
        Ok(())
    }

    pub async fn delete_group(&mut self, id: GroupId) -> Result<()> {
        self.api.delete_group(id).await?;
        self.groups.forget(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Real-time events
    // ------------------------------------------------------------------

    /// Feed one item from [`crate::events::spawn_listener`] into the session.
    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::Connected { resumed: true } => {
                tracing::info!("Event stream resumed, re-fetching");
                self.resync().await
            }
            ConnectionEvent::Connected { resumed: false } => Ok(()),
            ConnectionEvent::Event(event) => self.handle_event(event).await,
            ConnectionEvent::Disconnected => {
                tracing::debug!("Event stream dropped");
                Ok(())
            }
            ConnectionEvent::Closed { code } => {
                tracing::warn!(code, "Event stream closed by server");
                Ok(())
            }
        }
    }

    pub async fn handle_event(&mut self, event: ServerEvent) -> Result<()> {
        let effect = match &event {
            ServerEvent::NewDirectMessage(message) => self.direct.apply(message),
            ServerEvent::NewGroupMessage(message) => self.groups.apply(message),
            ServerEvent::GroupCreated(group) => {
                if self.groups.apply_group_created(group) {
                    tracing::debug!(group = %group.id, "Added to new group");
                }
                None
            }
        };

        match effect {
            Some(Effect::MarkDirectRead(peer)) => {
                self.api.mark_direct_read(peer).await?;
            }
            Some(Effect::MarkGroupRead(group)) => {
                self.api.mark_group_read(group).await?;
            }
            Some(Effect::RefreshGroups) => {
                self.groups.set_groups(self.api.list_groups().await?);
            }
            None => {}
        }
        Ok(())
    }
}
