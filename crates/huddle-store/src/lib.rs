//! # huddle-store
//!
//! Persistent storage for Huddle, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and implements the membership store, the message
//! store and the unseen-count queries on top of it. Every mutation that
//! depends on the current state of a group (membership checks, roster
//! changes, read markers) runs as conditional SQL inside an immediate
//! transaction, so concurrent writers can never lose each other's updates.

pub mod database;
pub mod direct;
pub mod group_messages;
pub mod groups;
pub mod migrations;
pub mod unseen;
pub mod users;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use groups::{GroupChanges, LeaveOutcome, NewGroup};
