//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Inline `data:` image or an existing URL.
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
}

/// Partial update: absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub member_id: UserId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    /// Inline `data:` image or an existing URL.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Plain acknowledgement for operations that return no entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub message: String,
}

impl StatusResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_group_defaults() {
        let req: CreateGroupRequest = serde_json::from_str(r#"{"name":"Team"}"#).unwrap();
        assert_eq!(req.name, "Team");
        assert!(req.member_ids.is_empty());
        assert!(req.avatar.is_none());
    }

    #[test]
    fn test_update_group_only_serializes_present_fields() {
        let req = UpdateGroupRequest {
            description: Some("new".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"description":"new"}"#);
    }
}
