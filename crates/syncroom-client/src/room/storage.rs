//! Storage: initial load, the mutation API, and offline replay.

use serde_json::Value;
use tracing::debug;

use syncroom_crdt::{
    position, CrdtNode, ItemId, JsonObject, NodeStore, Op, SerializedCrdt, storage_diff_ops,
};

use crate::history::HistoryItem;
use crate::protocol::{encode_frame, ClientMessage};
use crate::room::{collect_ops, PendingUpdates, Room};

impl Room {
    // ── Read surface ───────────────────────────────────────────────────────

    pub fn storage_is_loaded(&self) -> bool {
        self.store.is_loaded()
    }

    pub fn root_id(&self) -> Option<ItemId> {
        self.store.root_id()
    }

    /// The JSON view of the whole document.
    pub fn storage_snapshot(&self) -> Value {
        self.store.snapshot_json()
    }

    /// Locally applied ops the server has not echoed back yet.
    pub fn unacknowledged_ops(&self) -> usize {
        self.offline_ops.len()
    }

    /// Ask for the document. If it is already loaded the `storage-loaded`
    /// listeners fire immediately; otherwise a fetch is queued and they fire
    /// when the initial state arrives.
    pub fn request_storage(&mut self) {
        if self.store.is_loaded() {
            self.fire_storage_loaded();
            return;
        }
        self.storage_pending = true;
        self.out_messages.push(ClientMessage::FetchStorage);
        self.try_flushing();
    }

    // ── Mutations ──────────────────────────────────────────────────────────

    /// Merge JSON values into an object node's data.
    pub fn update_object(&mut self, id: ItemId, data: JsonObject) {
        self.commit_op(Op::UpdateObject {
            op_id: None,
            id,
            data,
        });
    }

    pub fn delete_object_key(&mut self, id: ItemId, key: impl Into<String>) {
        self.commit_op(Op::DeleteObjectKey {
            op_id: None,
            id,
            key: key.into(),
        });
    }

    pub fn create_object(&mut self, parent: ItemId, key: impl Into<String>, data: JsonObject) -> ItemId {
        let id = self.mint_node_id();
        self.commit_op(Op::CreateObject {
            op_id: None,
            id,
            parent_id: Some(parent),
            parent_key: Some(key.into()),
            data,
        });
        id
    }

    pub fn create_map(&mut self, parent: ItemId, key: impl Into<String>) -> ItemId {
        let id = self.mint_node_id();
        self.commit_op(Op::CreateMap {
            op_id: None,
            id,
            parent_id: Some(parent),
            parent_key: Some(key.into()),
        });
        id
    }

    pub fn create_list(&mut self, parent: ItemId, key: impl Into<String>) -> ItemId {
        let id = self.mint_node_id();
        self.commit_op(Op::CreateList {
            op_id: None,
            id,
            parent_id: Some(parent),
            parent_key: Some(key.into()),
        });
        id
    }

    pub fn create_register(
        &mut self,
        parent: ItemId,
        key: impl Into<String>,
        value: Value,
    ) -> ItemId {
        let id = self.mint_node_id();
        self.commit_op(Op::CreateRegister {
            op_id: None,
            id,
            parent_id: Some(parent),
            parent_key: Some(key.into()),
            data: value,
        });
        id
    }

    /// Delete a node and its whole subtree.
    pub fn delete_node(&mut self, id: ItemId) {
        self.commit_op(Op::DeleteCrdt { op_id: None, id });
    }

    /// Move a list child to a new position.
    pub fn set_parent_key(&mut self, id: ItemId, position: impl Into<String>) {
        self.commit_op(Op::SetParentKey {
            op_id: None,
            id,
            parent_key: position.into(),
        });
    }

    /// A position that inserts at `index` in the list, between the current
    /// occupants. `None` when `id` is not a list.
    pub fn list_insert_position(&self, id: ItemId, index: usize) -> Option<String> {
        let Some(CrdtNode::List(list)) = self.store.get(id) else {
            return None;
        };
        let positions: Vec<&String> = list.children.keys().collect();
        let position = if positions.is_empty() {
            position::first()
        } else if index == 0 {
            position::before(positions[0])
        } else if index >= positions.len() {
            position::after(positions[positions.len() - 1])
        } else {
            position::between(positions[index - 1], positions[index])
        };
        Some(position)
    }

    fn mint_node_id(&mut self) -> ItemId {
        let actor = self.expect_actor();
        self.clocks.next_id(actor)
    }

    fn commit_op(&mut self, op: Op) {
        self.commit_local(vec![HistoryItem::Op(op)], true);
    }

    // ── Initial load ───────────────────────────────────────────────────────

    /// Handle an initial-storage message: build or reconcile the tree, seed
    /// default keys, replay offline ops, resolve pending requests.
    pub(crate) fn handle_initial_storage(
        &mut self,
        items: Vec<(ItemId, SerializedCrdt)>,
    ) -> PendingUpdates {
        assert!(
            !items.is_empty(),
            "initial storage message contained no items"
        );
        // Snapshot first: ops buffered while reconciling must not be mistaken
        // for stale resends.
        let snapshot = self.offline_ops.clone();
        let first_load = !self.store.is_loaded();
        let mut updates = PendingUpdates::default();

        if first_load {
            match NodeStore::load(&items) {
                Ok(store) => {
                    debug!(nodes = store.len(), "storage loaded");
                    self.store = store;
                }
                Err(error) => panic!("initial storage state was unusable: {error}"),
            }
        } else {
            let current = self.store.serialize_items();
            let incoming = items.into_iter().collect();
            let ops = storage_diff_ops(&current, &incoming);
            debug!(ops = ops.len(), "reconciling storage after refetch");
            updates.merge(self.apply_remote_ops(ops));
        }

        updates.merge(self.seed_default_storage());
        updates.merge(self.apply_and_send_offline_ops(snapshot));

        if first_load || self.storage_pending {
            self.storage_pending = false;
            self.fire_storage_loaded();
        }
        updates
    }

    /// Populate missing root keys from the configured default shape.
    fn seed_default_storage(&mut self) -> PendingUpdates {
        let Some(root) = self.store.root_id() else {
            return PendingUpdates::default();
        };
        let missing: JsonObject = match self.store.get(root) {
            Some(CrdtNode::Object(node)) => self
                .config
                .initial_storage
                .iter()
                .filter(|(key, _)| !node.entries.contains_key(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => return PendingUpdates::default(),
        };
        if missing.is_empty() {
            return PendingUpdates::default();
        }

        // Seeding is not a user action: it is dispatched but not undoable.
        let mut items = vec![HistoryItem::Op(Op::UpdateObject {
            op_id: None,
            id: root,
            data: missing,
        })];
        let (_reverse, updates) = self.apply_items(&mut items, true);
        self.out_storage_ops.extend(collect_ops(&items));
        self.try_flushing();
        updates
    }

    /// Replay the offline snapshot as local and push it out in one storage
    /// message, past the throttle.
    fn apply_and_send_offline_ops(
        &mut self,
        snapshot: std::collections::BTreeMap<ItemId, Op>,
    ) -> PendingUpdates {
        if snapshot.is_empty() {
            return PendingUpdates::default();
        }
        debug!(ops = snapshot.len(), "resending offline ops");
        let mut items: Vec<HistoryItem> = snapshot.into_values().map(HistoryItem::Op).collect();
        let (_reverse, updates) = self.apply_items(&mut items, true);
        let ops = collect_ops(&items);
        let frame = encode_frame(&[ClientMessage::UpdateStorage { ops }]);
        self.send_frame(&frame);
        updates
    }
}
