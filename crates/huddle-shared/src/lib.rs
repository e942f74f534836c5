//! # huddle-shared
//!
//! Types shared by the Huddle server, store and client: identifiers, the
//! entities exchanged over HTTP, request bodies, the real-time event enum and
//! the stable error codes.

pub mod api;
pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::{ErrorBody, ErrorCode};
pub use models::*;
pub use protocol::ServerEvent;
pub use types::{GroupId, MessageId, UserId};
