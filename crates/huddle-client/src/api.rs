//! Typed wrapper over the server's HTTP API.

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use huddle_shared::api::{
    AddMemberRequest, CreateGroupRequest, SendMessageRequest, StatusResponse, UpdateGroupRequest,
    UpdateProfileRequest,
};
use huddle_shared::constants::WS_PATH;
use huddle_shared::{
    DirectMessage, ErrorBody, Group, GroupId, GroupListing, GroupMessage, PeerListing, UserId,
    UserSummary,
};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// URL of the real-time channel, with the session token attached.
    pub fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}{WS_PATH}?token={}", self.token)
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    pub async fn update_profile(&self, req: &UpdateProfileRequest) -> Result<UserSummary> {
        self.send_json(Method::PUT, "/users/me", req).await
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub async fn create_group(&self, req: &CreateGroupRequest) -> Result<Group> {
        self.send_json(Method::POST, "/groups", req).await
    }

    pub async fn list_groups(&self) -> Result<Vec<GroupListing>> {
        self.get("/groups").await
    }

    pub async fn update_group(&self, id: GroupId, req: &UpdateGroupRequest) -> Result<Group> {
        self.send_json(Method::PUT, &format!("/groups/{id}"), req).await
    }

    pub async fn delete_group(&self, id: GroupId) -> Result<StatusResponse> {
        self.send(Method::DELETE, &format!("/groups/{id}")).await
    }

    pub async fn leave_group(&self, id: GroupId) -> Result<StatusResponse> {
        self.send(Method::POST, &format!("/groups/{id}/leave")).await
    }

    pub async fn add_member(&self, id: GroupId, member_id: UserId) -> Result<Group> {
        self.send_json(
            Method::POST,
            &format!("/groups/{id}/members"),
            &AddMemberRequest { member_id },
        )
        .await
    }

    pub async fn remove_member(&self, id: GroupId, member_id: UserId) -> Result<Group> {
        self.send(Method::DELETE, &format!("/groups/{id}/members/{member_id}"))
            .await
    }

    pub async fn group_messages(&self, id: GroupId) -> Result<Vec<GroupMessage>> {
        self.get(&format!("/groups/{id}/messages")).await
    }

    pub async fn send_group_message(
        &self,
        id: GroupId,
        req: &SendMessageRequest,
    ) -> Result<GroupMessage> {
        self.send_json(Method::POST, &format!("/groups/{id}/messages"), req)
            .await
    }

    pub async fn mark_group_read(&self, id: GroupId) -> Result<StatusResponse> {
        self.send(Method::PUT, &format!("/groups/{id}/messages/read"))
            .await
    }

    // ------------------------------------------------------------------
    // Direct messages
    // ------------------------------------------------------------------

    pub async fn direct_peers(&self) -> Result<Vec<PeerListing>> {
        self.get("/messages/users").await
    }

    pub async fn direct_messages(&self, peer: UserId) -> Result<Vec<DirectMessage>> {
        self.get(&format!("/messages/{peer}")).await
    }

    pub async fn send_direct_message(
        &self,
        peer: UserId,
        req: &SendMessageRequest,
    ) -> Result<DirectMessage> {
        self.send_json(Method::POST, &format!("/messages/send/{peer}"), req)
            .await
    }

    pub async fn mark_direct_read(&self, peer: UserId) -> Result<StatusResponse> {
        self.send(Method::PUT, &format!("/messages/read/{peer}"))
            .await
    }

    // ------------------------------------------------------------------

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::GET, path).await
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T> {
        decode(self.request(method, path).send().await?).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        decode(self.request(method, path).json(body).send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let bytes = resp.bytes().await?;
    match serde_json::from_slice::<ErrorBody>(&bytes) {
        Ok(body) => Err(ClientError::Api {
            status,
            code: body.code,
            message: body.error,
        }),
        Err(_) => Err(ClientError::Api {
            status,
            code: huddle_shared::ErrorCode::Internal,
            message: String::from_utf8_lossy(&bytes).into_owned(),
        }),
    }
}
