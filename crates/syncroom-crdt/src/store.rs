//! Id-keyed node registry.
//!
//! The store owns every node of the storage tree. Links in both directions
//! are ids, so there is no ownership cycle to manage: destruction is removal
//! from the registry, and lookups go through [`NodeStore::get`].

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::id::ItemId;
use crate::nodes::{
    CrdtKind, CrdtNode, Entry, ListNode, MapNode, ObjectNode, Parent, RegisterNode, SerializedCrdt,
};
use crate::op::Op;
use crate::JsonObject;

#[derive(Debug, Error, PartialEq)]
pub enum StorageError {
    #[error("initial storage contained no items")]
    EmptyInitialStorage,
    #[error("initial storage has no root item")]
    MissingRoot,
    #[error("initial storage has more than one root item")]
    MultipleRoots,
}

/// What an attach displaced at the parent's key, if anything.
#[derive(Debug, Clone, PartialEq)]
pub enum Displaced {
    None,
    Json(Value),
    Child(ItemId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStore {
    nodes: HashMap<ItemId, CrdtNode>,
    root: Option<ItemId>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_id(&self) -> Option<ItemId> {
        self.root
    }

    pub fn is_loaded(&self) -> bool {
        self.root.is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&CrdtNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut CrdtNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn insert(&mut self, node: CrdtNode) {
        self.nodes.insert(node.id(), node);
    }

    /// Install an empty object root, used when a fresh room has no storage
    /// yet. The root id is `{actor}:0`.
    pub fn create_root(&mut self, actor: u32) -> ItemId {
        let id = ItemId::root(actor);
        self.insert(CrdtNode::Object(ObjectNode::new(
            id,
            Parent::Root,
            JsonObject::new(),
        )));
        self.root = Some(id);
        id
    }

    // ── Links ──────────────────────────────────────────────────────────────

    /// Register `child` under `key` in `parent`, returning whatever entry the
    /// key previously held. The child node itself must already be inserted.
    pub fn link_child(&mut self, parent: ItemId, key: &str, child: ItemId) -> Displaced {
        match self.nodes.get_mut(&parent) {
            Some(CrdtNode::Object(node)) => match node.entries.insert(key.into(), Entry::Child(child)) {
                Some(Entry::Json(v)) => Displaced::Json(v),
                Some(Entry::Child(id)) => Displaced::Child(id),
                None => Displaced::None,
            },
            Some(CrdtNode::Map(node)) => match node.entries.insert(key.into(), child) {
                Some(id) => Displaced::Child(id),
                None => Displaced::None,
            },
            Some(CrdtNode::List(node)) => match node.children.insert(key.into(), child) {
                Some(id) => Displaced::Child(id),
                None => Displaced::None,
            },
            Some(CrdtNode::Register(_)) | None => Displaced::None,
        }
    }

    /// Remove the entry for `key` from `parent` without touching the child
    /// node itself.
    pub fn unlink_child(&mut self, parent: ItemId, key: &str) -> Displaced {
        match self.nodes.get_mut(&parent) {
            Some(CrdtNode::Object(node)) => match node.entries.remove(key) {
                Some(Entry::Json(v)) => Displaced::Json(v),
                Some(Entry::Child(id)) => Displaced::Child(id),
                None => Displaced::None,
            },
            Some(CrdtNode::Map(node)) => match node.entries.remove(key) {
                Some(id) => Displaced::Child(id),
                None => Displaced::None,
            },
            Some(CrdtNode::List(node)) => match node.children.remove(key) {
                Some(id) => Displaced::Child(id),
                None => Displaced::None,
            },
            Some(CrdtNode::Register(_)) | None => Displaced::None,
        }
    }

    /// Remove `id` and all its descendants from the registry. Does not
    /// unlink `id` from its parent; callers do that first.
    pub fn delete_subtree(&mut self, id: ItemId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        if self.root == Some(id) {
            self.root = None;
        }
        for child in child_ids(&node) {
            self.delete_subtree(child);
        }
    }

    /// True if `ancestor` appears on `id`'s parent chain (or is `id`).
    pub fn is_in_subtree(&self, id: ItemId, ancestor: ItemId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.get(current).and_then(|n| n.parent().id());
        }
        false
    }

    // ── Serialization ──────────────────────────────────────────────────────

    /// Flat snapshot of every node, keyed by id.
    pub fn serialize_items(&self) -> BTreeMap<ItemId, SerializedCrdt> {
        self.nodes
            .iter()
            .map(|(id, node)| (*id, node.serialize()))
            .collect()
    }

    /// Creation ops that rebuild the subtree at `id`, parents before
    /// children. Op ids are left unassigned.
    pub fn subtree_create_ops(&self, id: ItemId) -> Vec<Op> {
        let mut ops = Vec::new();
        self.push_subtree_ops(id, &mut ops);
        ops
    }

    fn push_subtree_ops(&self, id: ItemId, ops: &mut Vec<Op>) {
        let Some(node) = self.get(id) else { return };
        let parent_id = node.parent().id();
        let parent_key = node.parent().key().map(str::to_owned);
        let op = match node {
            CrdtNode::Object(n) => Op::CreateObject {
                op_id: None,
                id,
                parent_id,
                parent_key,
                data: n.data(),
            },
            CrdtNode::List(_) => Op::CreateList {
                op_id: None,
                id,
                parent_id,
                parent_key,
            },
            CrdtNode::Map(_) => Op::CreateMap {
                op_id: None,
                id,
                parent_id,
                parent_key,
            },
            CrdtNode::Register(n) => Op::CreateRegister {
                op_id: None,
                id,
                parent_id,
                parent_key,
                data: n.data.clone(),
            },
        };
        ops.push(op);
        if let Some(node) = self.get(id) {
            for child in child_ids(node) {
                self.push_subtree_ops(child, ops);
            }
        }
    }

    /// The JSON view of the whole tree: objects and maps as JSON objects,
    /// lists as arrays in position order, registers as their payload.
    pub fn snapshot_json(&self) -> Value {
        match self.root {
            Some(root) => self.node_view(root),
            None => Value::Null,
        }
    }

    pub fn node_view(&self, id: ItemId) -> Value {
        let Some(node) = self.get(id) else {
            return Value::Null;
        };
        match node {
            CrdtNode::Object(n) => {
                let mut out = Map::new();
                for (key, entry) in &n.entries {
                    let value = match entry {
                        Entry::Json(v) => v.clone(),
                        Entry::Child(child) => self.node_view(*child),
                    };
                    out.insert(key.clone(), value);
                }
                Value::Object(out)
            }
            CrdtNode::Map(n) => {
                let mut out = Map::new();
                for (key, child) in &n.entries {
                    out.insert(key.clone(), self.node_view(*child));
                }
                Value::Object(out)
            }
            CrdtNode::List(n) => {
                Value::Array(n.children.values().map(|c| self.node_view(*c)).collect())
            }
            CrdtNode::Register(n) => n.data.clone(),
        }
    }

    // ── Initial load ───────────────────────────────────────────────────────

    /// Build a store from the flat item list of an initial storage message.
    ///
    /// Exactly one item must be a root object; items whose parent is absent
    /// from the list are dropped.
    pub fn load(items: &[(ItemId, SerializedCrdt)]) -> Result<Self, StorageError> {
        if items.is_empty() {
            return Err(StorageError::EmptyInitialStorage);
        }
        let mut store = Self::new();
        let mut root = None;
        for (id, serialized) in items {
            if serialized.is_root() {
                if root.replace(*id).is_some() {
                    return Err(StorageError::MultipleRoots);
                }
            }
        }
        let root = root.ok_or(StorageError::MissingRoot)?;

        for (id, serialized) in items {
            let parent = match (&serialized.parent_id, &serialized.parent_key) {
                (Some(parent), Some(key)) => Parent::keyed(*parent, key.clone()),
                _ => Parent::Root,
            };
            let node = match serialized.kind {
                CrdtKind::Object => CrdtNode::Object(ObjectNode::new(
                    *id,
                    parent,
                    match &serialized.data {
                        Some(Value::Object(map)) => map.clone(),
                        _ => JsonObject::new(),
                    },
                )),
                CrdtKind::List => CrdtNode::List(ListNode::new(*id, parent)),
                CrdtKind::Map => CrdtNode::Map(MapNode::new(*id, parent)),
                CrdtKind::Register => CrdtNode::Register(RegisterNode {
                    id: *id,
                    parent,
                    data: serialized.data.clone().unwrap_or(Value::Null),
                }),
            };
            store.insert(node);
        }

        // Second pass: register children with their parents, dropping
        // orphans whose parent never arrived.
        let mut orphans = Vec::new();
        for (id, serialized) in items {
            let (Some(parent), Some(key)) = (&serialized.parent_id, &serialized.parent_key) else {
                continue;
            };
            if store.contains(*parent) {
                store.link_child(*parent, key, *id);
            } else {
                orphans.push(*id);
            }
        }
        for orphan in orphans {
            store.delete_subtree(orphan);
        }

        store.root = Some(root);
        Ok(store)
    }
}

fn child_ids(node: &CrdtNode) -> Vec<ItemId> {
    match node {
        CrdtNode::Object(n) => n
            .entries
            .values()
            .filter_map(|e| match e {
                Entry::Child(id) => Some(*id),
                Entry::Json(_) => None,
            })
            .collect(),
        CrdtNode::Map(n) => n.entries.values().copied().collect(),
        CrdtNode::List(n) => n.children.values().copied().collect(),
        CrdtNode::Register(_) => Vec::new(),
    }
}
