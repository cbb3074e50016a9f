//! Per-room configuration.

use syncroom_crdt::JsonObject;

use crate::auth::AuthEndpoint;

/// Outgoing flushes are coalesced to at most one per this many milliseconds
/// unless overridden.
pub const DEFAULT_THROTTLE_MS: u64 = 100;

/// Everything needed to run one room machine.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub room_id: String,
    /// Websocket endpoint, e.g. `wss://rooms.example.com`.
    pub server: String,
    pub auth: AuthEndpoint,
    /// Milliseconds between outbound flushes; clamped to 80..=1000.
    pub throttle_ms: u64,
    /// Presence announced by the first flush after connecting.
    pub initial_presence: JsonObject,
    /// Keys set on the storage root when the room is first populated.
    pub initial_storage: JsonObject,
}

impl RoomConfig {
    pub fn new(room_id: impl Into<String>, server: impl Into<String>, auth: AuthEndpoint) -> Self {
        Self {
            room_id: room_id.into(),
            server: server.into(),
            auth,
            throttle_ms: DEFAULT_THROTTLE_MS,
            initial_presence: JsonObject::new(),
            initial_storage: JsonObject::new(),
        }
    }

    pub fn with_throttle(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms.clamp(80, 1000);
        self
    }

    pub fn with_initial_presence(mut self, presence: JsonObject) -> Self {
        self.initial_presence = presence;
        self
    }

    pub fn with_initial_storage(mut self, storage: JsonObject) -> Self {
        self.initial_storage = storage;
        self
    }
}
