//! Caller identity.
//!
//! Sessions are issued by an upstream identity service. The server only
//! needs to turn the presented token into a [`UserId`], which is what an
//! [`IdentityProvider`] does. HTTP requests carry the token as
//! `Authorization: Bearer <token>`; WebSocket upgrades pass it as `?token=`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use huddle_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

pub trait IdentityProvider: Send + Sync {
    /// Resolve a session token to the user it belongs to.
    fn resolve(&self, token: &str) -> Option<UserId>;
}

/// Accepts the user id itself as the token. For deployments behind a
/// gateway that has already authenticated the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustedGatewayIdentity;

impl IdentityProvider for TrustedGatewayIdentity {
    fn resolve(&self, token: &str) -> Option<UserId> {
        token.trim().parse().ok()
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ServerError::Unauthenticated)?;

        state
            .identity
            .resolve(token)
            .map(AuthUser)
            .ok_or(ServerError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trusted_gateway_parses_ids() {
        let id = UserId::new();
        assert_eq!(TrustedGatewayIdentity.resolve(&id.to_string()), Some(id));
        assert_eq!(TrustedGatewayIdentity.resolve("nobody"), None);
        assert_eq!(TrustedGatewayIdentity.resolve(""), None);
    }
}
