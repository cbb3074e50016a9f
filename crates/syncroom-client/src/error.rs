//! Error taxonomy of the room machine.
//!
//! Transport and auth failures are recovered locally with backoff; protocol
//! failures in the 4000 range surface to `error` listeners; malformed inbound
//! frames are dropped. Programmer errors (mutating storage before a
//! connection ever existed, nesting batches, undo during a batch) panic.

use thiserror::Error;

use syncroom_crdt::WireError;

/// Failure to obtain or decode an auth token.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// The auth endpoint was unreachable or returned a non-success status.
    #[error("auth request failed: {0}")]
    Request(String),
    /// The endpoint answered, but not with `{"token": "..."}`.
    #[error("auth endpoint returned a malformed response: {0}")]
    MalformedResponse(String),
    /// The token was not a decodable JWT with the expected claims.
    #[error("auth token is malformed: {0}")]
    MalformedToken(String),
}

/// A server-indicated close in the 4000..=4100 range.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("room closed by server ({code}): {reason}")]
pub struct RoomError {
    pub code: u16,
    pub reason: String,
}

/// A frame that could not be interpreted. Dropped by the router.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    NotJson(String),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("unknown server message type: {0}")]
    UnknownMessageType(u64),
    #[error(transparent)]
    Wire(#[from] WireError),
}
