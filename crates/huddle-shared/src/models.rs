//! Entities returned by the server and consumed by clients.
//!
//! Every struct serializes with camelCase field names, which is the shape the
//! HTTP API and the real-time events both use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Display information for a user. Users are owned by the identity provider;
/// a user without a stored profile has no display name or avatar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl UserSummary {
    pub fn anonymous(id: UserId) -> Self {
        Self {
            id,
            display_name: None,
            avatar: None,
        }
    }
}

/// A direct-conversation peer together with the viewer's unseen count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerListing {
    #[serde(flatten)]
    pub user: UserSummary,
    pub unseen_count: u64,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user: UserSummary,
    pub role: Role,
}

/// A group conversation with its roster in join order.
///
/// `admin` is the owner-like authority and is tracked separately from the
/// `Role::Admin` entry in `members`: the admin may leave or be removed from
/// the roster without the authority moving to anyone else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub admin: UserSummary,
    pub members: Vec<GroupMember>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn has_member(&self, user: UserId) -> bool {
        self.members.iter().any(|m| m.user.id == user)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.members.iter().map(|m| m.user.id)
    }
}

/// A group as it appears in the viewer's group list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupListing {
    #[serde(flatten)]
    pub group: Group,
    pub unseen_count: u64,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A one-to-one message. Only `read` ever changes after creation, and only
/// from `false` to `true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: MessageId,
    pub sender: UserSummary,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl DirectMessage {
    pub fn sender_id(&self) -> UserId {
        self.sender.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// A message posted to a group. `read_by` holds at most one receipt per user
/// and only grows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender: UserSummary,
    pub text: Option<String>,
    pub image: Option<String>,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

impl GroupMessage {
    pub fn sender_id(&self) -> UserId {
        self.sender.id
    }

    pub fn is_read_by(&self, user: UserId) -> bool {
        self.read_by.iter().any(|r| r.user_id == user)
    }
}
