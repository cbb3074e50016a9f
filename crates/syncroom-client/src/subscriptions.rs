//! Typed listener registries.
//!
//! Each event kind has its own registry; subscribing returns a
//! [`SubscriptionHandle`] that [`crate::room::Room::unsubscribe`] resolves
//! back to the right registry. Listeners fire in registration order.

use std::collections::BTreeMap;

use serde_json::Value;
use syncroom_crdt::{ItemId, JsonObject, NodeUpdate};

use crate::error::RoomError;
use crate::history::HistoryEvent;
use crate::presence::{OthersEvent, OthersView};
use crate::room::ConnectionState;

/// A broadcast event relayed from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub actor: u32,
    pub event: Value,
}

pub(crate) struct Registry<F: ?Sized> {
    next_id: u64,
    entries: BTreeMap<u64, Box<F>>,
}

impl<F: ?Sized> Default for Registry<F> {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
        }
    }
}

impl<F: ?Sized> Registry<F> {
    pub fn add(&mut self, listener: Box<F>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, listener);
        id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Box<F>> {
        self.entries.values_mut()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A node-scoped storage subscription.
pub(crate) struct NodeSubscription {
    pub target: ItemId,
    pub deep: bool,
    pub callback: Box<dyn FnMut(&[NodeUpdate])>,
}

/// Which registry a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Event,
    MyPresence,
    Others,
    Error,
    Connection,
    Storage,
    History,
    StorageLoaded,
    Node,
}

/// Returned by every `subscribe_*`; pass to `Room::unsubscribe` to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub(crate) kind: EventKind,
    pub(crate) id: u64,
}

#[derive(Default)]
pub(crate) struct Listeners {
    pub event: Registry<dyn FnMut(&CustomEvent)>,
    pub my_presence: Registry<dyn FnMut(&JsonObject)>,
    pub others: Registry<dyn FnMut(&OthersView, &OthersEvent)>,
    pub error: Registry<dyn FnMut(&RoomError)>,
    pub connection: Registry<dyn FnMut(&ConnectionState)>,
    pub storage: Registry<dyn FnMut(&[NodeUpdate])>,
    pub history: Registry<dyn FnMut(&HistoryEvent)>,
    pub storage_loaded: Registry<dyn FnMut()>,
    pub nodes: BTreeMap<u64, NodeSubscription>,
    pub next_node_id: u64,
}

impl Listeners {
    pub fn add_node(&mut self, subscription: NodeSubscription) -> u64 {
        self.next_node_id += 1;
        let id = self.next_node_id;
        self.nodes.insert(id, subscription);
        id
    }

    pub fn remove(&mut self, handle: SubscriptionHandle) -> bool {
        match handle.kind {
            EventKind::Event => self.event.remove(handle.id),
            EventKind::MyPresence => self.my_presence.remove(handle.id),
            EventKind::Others => self.others.remove(handle.id),
            EventKind::Error => self.error.remove(handle.id),
            EventKind::Connection => self.connection.remove(handle.id),
            EventKind::Storage => self.storage.remove(handle.id),
            EventKind::History => self.history.remove(handle.id),
            EventKind::StorageLoaded => self.storage_loaded.remove(handle.id),
            EventKind::Node => self.nodes.remove(&handle.id).is_some(),
        }
    }

    pub fn clear(&mut self) {
        self.event.clear();
        self.my_presence.clear();
        self.others.clear();
        self.error.clear();
        self.connection.clear();
        self.storage.clear();
        self.history.clear();
        self.storage_loaded.clear();
        self.nodes.clear();
    }
}
