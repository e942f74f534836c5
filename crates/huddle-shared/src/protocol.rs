use serde::{Deserialize, Serialize};

use crate::models::{DirectMessage, Group, GroupMessage};

/// Events pushed from the server to connected clients over the real-time
/// channel. There are no client-to-server events.
///
/// On the wire each event is a JSON text frame of the form
/// `{"event": "newGroupMessage", "data": { ... }}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Sent to the receiver of a direct message only.
    NewDirectMessage(DirectMessage),
    /// Sent to every connected member of the group except the sender.
    NewGroupMessage(GroupMessage),
    /// Sent to connected members of a freshly created group.
    GroupCreated(Group),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewDirectMessage(_) => "newDirectMessage",
            ServerEvent::NewGroupMessage(_) => "newGroupMessage",
            ServerEvent::GroupCreated(_) => "groupCreated",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}
