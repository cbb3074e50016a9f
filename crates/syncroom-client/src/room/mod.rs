//! The per-room client state machine.
//!
//! One [`Room`] exists per joined room. It is a synchronous struct: the host
//! runtime owns it, implements [`Effects`](crate::effects::Effects) and
//! [`Socket`](crate::effects::Socket), and forwards socket events and timer
//! expirations into the entry points defined across this module's files:
//!
//! | File            | Responsibility                             |
//! |-----------------|--------------------------------------------|
//! | `connection.rs` | lifecycle FSM, backoff, heartbeat          |
//! | `router.rs`     | inbound frame dispatch                     |
//! | `apply.rs`      | apply loop for local and remote entries    |
//! | `storage.rs`    | storage load, mutation API, offline replay |
//! | `flush.rs`      | throttled outbound coalescing              |

mod apply;
mod connection;
mod flush;
mod router;
mod storage;

pub use connection::{CLOSE_WITHOUT_RETRY, HEARTBEAT_INTERVAL_MS, PONG_TIMEOUT_MS};

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use syncroom_crdt::{ClockPair, CrdtNode, ItemId, JsonObject, NodeStore, NodeUpdate, Op};

use crate::config::RoomConfig;
use crate::effects::{Effects, Socket, TimerId};
use crate::error::RoomError;
use crate::history::{History, HistoryEvent, HistoryItem};
use crate::presence::{OtherUser, OthersEvent, OthersView, PresenceBuffer, UserEntry};
use crate::protocol::ClientMessage;
use crate::subscriptions::{
    CustomEvent, EventKind, Listeners, NodeSubscription, SubscriptionHandle,
};

pub(crate) use apply::PendingUpdates;

// ── Connection state ───────────────────────────────────────────────────────

/// Identity attached to an established (or establishing) connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    /// Server-assigned actor id, stable for the connection's lifetime.
    pub id: u32,
    pub user_id: Option<String>,
    pub user_info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Authenticating,
    Connecting(ConnectionInfo),
    Open(ConnectionInfo),
    Unavailable,
    Failed,
}

impl ConnectionState {
    pub fn connection_id(&self) -> Option<u32> {
        match self {
            ConnectionState::Connecting(info) | ConnectionState::Open(info) => Some(info.id),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open(_))
    }
}

// ── Supporting state ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct Timers {
    pub flush: Option<TimerId>,
    pub heartbeat: Option<TimerId>,
    pub pong: Option<TimerId>,
    pub reconnect: Option<TimerId>,
}

/// Accumulator for one running batch.
#[derive(Default)]
pub(crate) struct BatchAcc {
    pub reverse: Vec<HistoryItem>,
    pub updates: PendingUpdates,
    pub ops: Vec<Op>,
    /// Nodes created anywhere in this batch, for update suppression.
    pub created: BTreeSet<ItemId>,
}

/// Options for [`Room::update_presence`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceOptions {
    pub add_to_history: bool,
}

impl PresenceOptions {
    pub fn history() -> Self {
        Self {
            add_to_history: true,
        }
    }
}

// ── The machine ────────────────────────────────────────────────────────────

pub struct Room {
    pub(crate) config: RoomConfig,
    pub(crate) effects: Box<dyn Effects>,

    // Connection
    pub(crate) connection: ConnectionState,
    pub(crate) socket: Option<Box<dyn Socket>>,
    pub(crate) token: Option<crate::auth::AuthToken>,
    pub(crate) num_retries: u32,
    pub(crate) last_connection_id: Option<u32>,
    pub(crate) timers: Timers,

    // Storage
    pub(crate) clocks: ClockPair,
    pub(crate) store: NodeStore,
    pub(crate) storage_pending: bool,

    // Presence
    pub(crate) me: JsonObject,
    pub(crate) users: BTreeMap<u32, UserEntry>,
    pub(crate) presence_buffer: Option<PresenceBuffer>,

    // Outbound
    pub(crate) out_messages: Vec<ClientMessage>,
    pub(crate) out_storage_ops: Vec<Op>,
    pub(crate) offline_ops: BTreeMap<ItemId, Op>,
    pub(crate) last_flush_at: Option<u64>,

    // History
    pub(crate) history: History,
    pub(crate) batch: Option<BatchAcc>,

    pub(crate) listeners: Listeners,
}

impl Room {
    pub fn new(config: RoomConfig, effects: Box<dyn Effects>) -> Self {
        let me = config.initial_presence.clone();
        // The first flush after connecting announces the new participant.
        let presence_buffer = Some(PresenceBuffer::full(me.clone()));
        Self {
            config,
            effects,
            connection: ConnectionState::Closed,
            socket: None,
            token: None,
            num_retries: 0,
            last_connection_id: None,
            timers: Timers::default(),
            clocks: ClockPair::new(),
            store: NodeStore::new(),
            storage_pending: false,
            me,
            users: BTreeMap::new(),
            presence_buffer,
            out_messages: Vec::new(),
            out_storage_ops: Vec::new(),
            offline_ops: BTreeMap::new(),
            last_flush_at: None,
            history: History::new(),
            batch: None,
            listeners: Listeners::default(),
        }
    }

    // ── Read surface ───────────────────────────────────────────────────────

    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn presence(&self) -> &JsonObject {
        &self.me
    }

    pub fn others(&self) -> OthersView {
        OthersView::new(
            self.users
                .values()
                .map(|entry| OtherUser {
                    connection_id: entry.connection_id,
                    id: entry.id.clone(),
                    info: entry.info.clone(),
                    presence: entry.presence.clone(),
                })
                .collect(),
        )
    }

    pub fn node(&self, id: ItemId) -> Option<&CrdtNode> {
        self.store.get(id)
    }

    // ── Presence & events ──────────────────────────────────────────────────

    /// Merge `partial` into this connection's presence. A `null` value
    /// removes the key.
    pub fn update_presence(&mut self, partial: JsonObject, options: PresenceOptions) {
        self.commit_local(
            vec![HistoryItem::Presence(partial)],
            options.add_to_history,
        );
    }

    /// Queue an application event for every other participant.
    pub fn broadcast_event(&mut self, event: Value) {
        self.out_messages.push(ClientMessage::BroadcastEvent { event });
        self.try_flushing();
    }

    // ── Batch ──────────────────────────────────────────────────────────────

    /// Group mutations into one history entry, one notification, and one
    /// flush. Panics when nested.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        assert!(self.batch.is_none(), "batch() cannot be nested");
        self.batch = Some(BatchAcc::default());
        let result = f(self);
        let acc = self.batch.take().expect("batch accumulator vanished");

        if !acc.ops.is_empty() {
            self.history.clear_redo();
        }
        if !acc.reverse.is_empty() {
            self.history.record(acc.reverse);
        }
        self.out_storage_ops.extend(acc.ops);
        self.notify_updates(acc.updates);
        self.fire_history();
        self.try_flushing();
        result
    }

    // ── History ────────────────────────────────────────────────────────────

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn is_history_paused(&self) -> bool {
        self.history.is_paused()
    }

    pub fn pause_history(&mut self) {
        self.history.pause();
    }

    pub fn resume_history(&mut self) {
        self.history.resume();
        self.fire_history();
    }

    pub fn undo(&mut self) {
        assert!(self.batch.is_none(), "undo() is not available during a batch");
        let Some(mut entry) = self.history.pop_undo() else {
            return;
        };
        let (reverse, updates) = self.apply_items(&mut entry, true);
        self.history.push_redo(reverse);
        self.finish_history_replay(entry, updates);
    }

    pub fn redo(&mut self) {
        assert!(self.batch.is_none(), "redo() is not available during a batch");
        let Some(mut entry) = self.history.pop_redo() else {
            return;
        };
        let (reverse, updates) = self.apply_items(&mut entry, true);
        self.history.push_undo(reverse);
        self.finish_history_replay(entry, updates);
    }

    fn finish_history_replay(&mut self, entry: Vec<HistoryItem>, updates: PendingUpdates) {
        self.notify_updates(updates);
        let ops = collect_ops(&entry);
        if !ops.is_empty() {
            self.out_storage_ops.extend(ops);
        }
        self.fire_history();
        self.try_flushing();
    }

    // ── Local commit path ──────────────────────────────────────────────────

    /// Apply a locally produced entry: inside a batch the side effects
    /// accumulate; outside, history/notify/flush happen immediately.
    pub(crate) fn commit_local(&mut self, mut items: Vec<HistoryItem>, add_to_history: bool) {
        let (reverse, updates) = self.apply_items(&mut items, true);
        let ops = collect_ops(&items);

        if let Some(batch) = self.batch.as_mut() {
            if add_to_history {
                batch.reverse.splice(0..0, reverse);
            }
            batch.updates.merge(updates);
            batch.ops.extend(ops);
            return;
        }

        if add_to_history {
            self.history.clear_redo();
            self.history.record(reverse);
            self.fire_history();
        }
        self.notify_updates(updates);
        if !ops.is_empty() {
            self.out_storage_ops.extend(ops);
        }
        self.try_flushing();
    }

    // ── Subscriptions ──────────────────────────────────────────────────────

    pub fn subscribe_storage(
        &mut self,
        f: impl FnMut(&[NodeUpdate]) + 'static,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::Storage,
            id: self.listeners.storage.add(Box::new(f)),
        }
    }

    /// Fires when `id` itself appears in a storage update.
    pub fn subscribe_node(
        &mut self,
        id: ItemId,
        f: impl FnMut(&[NodeUpdate]) + 'static,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::Node,
            id: self.listeners.add_node(NodeSubscription {
                target: id,
                deep: false,
                callback: Box::new(f),
            }),
        }
    }

    /// Fires when `id` or any of its descendants appears in a storage update.
    pub fn subscribe_node_deep(
        &mut self,
        id: ItemId,
        f: impl FnMut(&[NodeUpdate]) + 'static,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::Node,
            id: self.listeners.add_node(NodeSubscription {
                target: id,
                deep: true,
                callback: Box::new(f),
            }),
        }
    }

    pub fn subscribe_my_presence(
        &mut self,
        f: impl FnMut(&JsonObject) + 'static,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::MyPresence,
            id: self.listeners.my_presence.add(Box::new(f)),
        }
    }

    pub fn subscribe_others(
        &mut self,
        f: impl FnMut(&OthersView, &OthersEvent) + 'static,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::Others,
            id: self.listeners.others.add(Box::new(f)),
        }
    }

    pub fn subscribe_event(
        &mut self,
        f: impl FnMut(&CustomEvent) + 'static,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::Event,
            id: self.listeners.event.add(Box::new(f)),
        }
    }

    pub fn subscribe_error(&mut self, f: impl FnMut(&RoomError) + 'static) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::Error,
            id: self.listeners.error.add(Box::new(f)),
        }
    }

    pub fn subscribe_connection(
        &mut self,
        f: impl FnMut(&ConnectionState) + 'static,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::Connection,
            id: self.listeners.connection.add(Box::new(f)),
        }
    }

    pub fn subscribe_history(
        &mut self,
        f: impl FnMut(&HistoryEvent) + 'static,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::History,
            id: self.listeners.history.add(Box::new(f)),
        }
    }

    pub fn subscribe_storage_loaded(&mut self, f: impl FnMut() + 'static) -> SubscriptionHandle {
        SubscriptionHandle {
            kind: EventKind::StorageLoaded,
            id: self.listeners.storage_loaded.add(Box::new(f)),
        }
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        self.listeners.remove(handle)
    }

    // ── Notification fan-out ───────────────────────────────────────────────

    pub(crate) fn notify_updates(&mut self, updates: PendingUpdates) {
        self.notify_storage(&updates.storage);
        if updates.presence {
            self.fire_my_presence();
        }
    }

    pub(crate) fn notify_storage(&mut self, updates: &BTreeMap<ItemId, NodeUpdate>) {
        if updates.is_empty() {
            return;
        }
        let list: Vec<NodeUpdate> = updates.values().cloned().collect();
        for listener in self.listeners.storage.values_mut() {
            listener(&list);
        }

        // Node-scoped subscriptions: resolve matches against the tree first,
        // then invoke, so callbacks never observe a partial borrow.
        let mut dispatch: Vec<(u64, Vec<NodeUpdate>)> = Vec::new();
        for (sub_id, sub) in &self.listeners.nodes {
            let matched: Vec<NodeUpdate> = list
                .iter()
                .filter(|u| {
                    if sub.deep {
                        self.store.is_in_subtree(u.id, sub.target)
                    } else {
                        u.id == sub.target
                    }
                })
                .cloned()
                .collect();
            if !matched.is_empty() {
                dispatch.push((*sub_id, matched));
            }
        }
        for (sub_id, matched) in dispatch {
            if let Some(sub) = self.listeners.nodes.get_mut(&sub_id) {
                (sub.callback)(&matched);
            }
        }
    }

    pub(crate) fn fire_my_presence(&mut self) {
        let me = self.me.clone();
        for listener in self.listeners.my_presence.values_mut() {
            listener(&me);
        }
    }

    pub(crate) fn fire_others(&mut self, event: OthersEvent) {
        let view = self.others();
        for listener in self.listeners.others.values_mut() {
            listener(&view, &event);
        }
    }

    pub(crate) fn fire_event(&mut self, event: CustomEvent) {
        for listener in self.listeners.event.values_mut() {
            listener(&event);
        }
    }

    pub(crate) fn fire_error(&mut self, error: &RoomError) {
        for listener in self.listeners.error.values_mut() {
            listener(error);
        }
    }

    pub(crate) fn fire_history(&mut self) {
        let event = self.history.event();
        for listener in self.listeners.history.values_mut() {
            listener(&event);
        }
    }

    pub(crate) fn fire_connection(&mut self) {
        let state = self.connection.clone();
        for listener in self.listeners.connection.values_mut() {
            listener(&state);
        }
    }

    pub(crate) fn fire_storage_loaded(&mut self) {
        for listener in self.listeners.storage_loaded.values_mut() {
            listener();
        }
    }

    // ── Shared internals ───────────────────────────────────────────────────

    /// The actor id stamped onto locally minted ids.
    ///
    /// Calling this before any connection was ever established is a
    /// programming error: storage cannot be mutated before the first load,
    /// and the first load requires a connection.
    pub(crate) fn expect_actor(&self) -> u32 {
        self.connection
            .connection_id()
            .or(self.last_connection_id)
            .expect("no connection has ever been established for this room")
    }
}

pub(crate) fn collect_ops(items: &[HistoryItem]) -> Vec<Op> {
    items
        .iter()
        .filter_map(|item| match item {
            HistoryItem::Op(op) => Some(op.clone()),
            HistoryItem::Presence(_) => None,
        })
        .collect()
}
