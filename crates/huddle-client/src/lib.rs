//! # huddle-client
//!
//! Client library for Huddle: a typed HTTP client, the WebSocket event
//! listener and the local inbox state that reconciles pushed events with
//! server listings.

pub mod api;
pub mod error;
pub mod events;
pub mod inbox;
pub mod session;

pub use api::ApiClient;
pub use error::{ClientError, Result};
pub use events::{spawn_listener, ConnectionEvent};
pub use inbox::{DirectInbox, Effect, GroupInbox};
pub use session::ChatSession;
