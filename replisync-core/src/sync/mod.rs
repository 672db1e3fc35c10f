//! The sync protocol: errors, version handshake, sessions and participants.

mod client;
mod error;
pub mod protocol;
mod session;
mod web;

pub use client::{LocalSyncClient, SyncClient, SyncClientSettings};
pub use error::SyncError;
pub use protocol::{ErrorResponse, Operation, PROTOCOL_VERSION, PROTOCOL_VERSION_KEY};
pub use session::{SessionKey, SessionState, SessionStore};
pub use web::{check_server, WebSyncClient};
