//! Presence state: self, peers, and the outgoing buffer.
//!
//! Presence is ephemeral per-connection JSON. Partial updates are diffs; a
//! key set to `null` removes it, which is also how history reverses record
//! "this key did not exist before".

use serde_json::Value;

use syncroom_crdt::JsonObject;

/// Merge a partial update into `target`. `null` values remove keys.
pub fn merge_presence(target: &mut JsonObject, partial: &JsonObject) {
    for (key, value) in partial {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// The diff that restores `current` after `partial` is merged into it.
pub fn reverse_presence(current: &JsonObject, partial: &JsonObject) -> JsonObject {
    partial
        .keys()
        .map(|key| {
            (
                key.clone(),
                current.get(key).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

// ── Outgoing buffer ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// "My entire presence is this."
    Full,
    /// Changed keys only.
    Partial,
}

/// The pending outgoing presence update, coalescing writes between flushes.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceBuffer {
    pub kind: BufferKind,
    pub data: JsonObject,
}

impl PresenceBuffer {
    pub fn full(data: JsonObject) -> Self {
        Self {
            kind: BufferKind::Full,
            data,
        }
    }

    pub fn partial(data: JsonObject) -> Self {
        Self {
            kind: BufferKind::Partial,
            data,
        }
    }

    /// Absorb a later update. The buffer keeps its kind: a pending full
    /// update stays the whole truth after gaining keys, and a pending partial
    /// stays a diff.
    pub fn absorb(&mut self, update: &JsonObject) {
        merge_presence(&mut self.data, update);
    }
}

/// Fold an update into an optional buffer slot.
pub fn buffer_update(buffer: &mut Option<PresenceBuffer>, kind: BufferKind, data: &JsonObject) {
    match buffer {
        Some(pending) => pending.absorb(data),
        None => {
            *buffer = Some(PresenceBuffer {
                kind,
                data: data.clone(),
            })
        }
    }
}

// ── Peers ──────────────────────────────────────────────────────────────────

/// Book-keeping record for one peer connection.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEntry {
    pub connection_id: u32,
    pub id: Option<String>,
    pub info: Option<Value>,
    pub presence: Option<JsonObject>,
    /// Until the peer's full presence has arrived, incoming diffs have
    /// nothing to apply against and are dropped.
    pub has_received_initial_presence: bool,
}

/// One peer as exposed to subscribers; the internal gating flag is omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct OtherUser {
    pub connection_id: u32,
    pub id: Option<String>,
    pub info: Option<Value>,
    pub presence: Option<JsonObject>,
}

/// Immutable snapshot of everyone else in the room.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OthersView {
    users: Vec<OtherUser>,
}

impl OthersView {
    pub fn new(users: Vec<OtherUser>) -> Self {
        Self { users }
    }

    pub fn count(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OtherUser> {
        self.users.iter()
    }

    pub fn get(&self, connection_id: u32) -> Option<&OtherUser> {
        self.users.iter().find(|u| u.connection_id == connection_id)
    }

    pub fn map<T>(&self, f: impl FnMut(&OtherUser) -> T) -> Vec<T> {
        self.users.iter().map(f).collect()
    }
}

/// Change notifications delivered alongside an [`OthersView`].
#[derive(Debug, Clone, PartialEq)]
pub enum OthersEvent {
    Enter { connection_id: u32 },
    Leave { connection_id: u32 },
    Update { connection_id: u32, updated: JsonObject },
    Reset,
}
