//! Client-side room state machine for syncroom.
//!
//! A *room* is a shared workspace whose participants exchange ephemeral
//! presence and a durable CRDT document over one full-duplex text-framed
//! connection. This crate is the per-room machine that orchestrates the
//! connection lifecycle (auth, backoff, heartbeat), applies local and remote
//! operations, buffers presence, queues offline ops, bounds undo/redo, and
//! fans out typed subscription notifications.
//!
//! The machine is synchronous and single-threaded by design: all transports
//! and timers are injected through [`effects::Effects`] and
//! [`effects::Socket`], and their completions re-enter the machine through
//! named entry points on [`room::Room`]. Hosts on multi-threaded runtimes
//! serialize access behind their event loop.

pub mod auth;
pub mod config;
pub mod effects;
pub mod error;
pub mod history;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod subscriptions;

pub use auth::{
    auth_request_body, parse_auth_response, socket_url, AuthEndpoint, AuthRequest, AuthToken,
};
pub use config::{RoomConfig, DEFAULT_THROTTLE_MS};
pub use effects::{Effects, ReadyState, Socket, TimerId};
pub use error::{AuthError, ProtocolError, RoomError};
pub use history::{HistoryEvent, HistoryItem, HISTORY_LIMIT};
pub use presence::{OtherUser, OthersEvent, OthersView};
pub use room::{ConnectionInfo, ConnectionState, PresenceOptions, Room};
pub use subscriptions::{CustomEvent, SubscriptionHandle};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
