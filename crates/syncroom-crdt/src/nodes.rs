//! Typed CRDT node state.
//!
//! Nodes live in the [`NodeStore`](crate::store::NodeStore) keyed by id;
//! parents refer to children (and children to parents) by id only, never by
//! reference, so subtree destruction is removal from the store.
//!
//! | Node type      | Semantics                                        |
//! |----------------|--------------------------------------------------|
//! | `ObjectNode`   | LWW map of JSON leaves and child-node keys       |
//! | `ListNode`     | Children ordered by fractional position strings  |
//! | `MapNode`      | Key → child-node map                             |
//! | `RegisterNode` | Immutable JSON payload, replaced wholesale       |

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::id::ItemId;
use crate::op::{opt_id, opt_string, req_u64, WireError};
use crate::JsonObject;

// ── Parent links ───────────────────────────────────────────────────────────

/// Where a node hangs in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    Root,
    Keyed { parent: ItemId, key: String },
}

impl Parent {
    pub fn keyed(parent: ItemId, key: impl Into<String>) -> Self {
        Self::Keyed {
            parent,
            key: key.into(),
        }
    }

    pub fn id(&self) -> Option<ItemId> {
        match self {
            Parent::Root => None,
            Parent::Keyed { parent, .. } => Some(*parent),
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Parent::Root => None,
            Parent::Keyed { key, .. } => Some(key),
        }
    }
}

// ── Node kinds ─────────────────────────────────────────────────────────────

/// Wire discriminants for serialized nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CrdtKind {
    Object = 0,
    List = 1,
    Map = 2,
    Register = 3,
}

impl CrdtKind {
    pub fn from_code(code: u64) -> Result<Self, WireError> {
        match code {
            0 => Ok(CrdtKind::Object),
            1 => Ok(CrdtKind::List),
            2 => Ok(CrdtKind::Map),
            3 => Ok(CrdtKind::Register),
            other => Err(WireError::UnknownCrdtCode(other)),
        }
    }
}

// ── Node state ─────────────────────────────────────────────────────────────

/// One entry of an [`ObjectNode`]: a plain JSON leaf or a child node.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Json(Value),
    Child(ItemId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectNode {
    pub id: ItemId,
    pub parent: Parent,
    pub entries: BTreeMap<String, Entry>,
}

impl ObjectNode {
    pub fn new(id: ItemId, parent: Parent, data: JsonObject) -> Self {
        let entries = data
            .into_iter()
            .map(|(k, v)| (k, Entry::Json(v)))
            .collect();
        Self { id, parent, entries }
    }

    /// JSON leaves only; child entries are serialized as their own items.
    pub fn data(&self) -> JsonObject {
        self.entries
            .iter()
            .filter_map(|(k, e)| match e {
                Entry::Json(v) => Some((k.clone(), v.clone())),
                Entry::Child(_) => None,
            })
            .collect()
    }

    pub fn child(&self, key: &str) -> Option<ItemId> {
        match self.entries.get(key) {
            Some(Entry::Child(id)) => Some(*id),
            _ => None,
        }
    }
}

/// Children keyed by fractional position; the map order is the list order.
#[derive(Debug, Clone, PartialEq)]
pub struct ListNode {
    pub id: ItemId,
    pub parent: Parent,
    pub children: BTreeMap<String, ItemId>,
}

impl ListNode {
    pub fn new(id: ItemId, parent: Parent) -> Self {
        Self {
            id,
            parent,
            children: BTreeMap::new(),
        }
    }

    pub fn position_of(&self, child: ItemId) -> Option<&str> {
        self.children
            .iter()
            .find(|(_, id)| **id == child)
            .map(|(pos, _)| pos.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapNode {
    pub id: ItemId,
    pub parent: Parent,
    pub entries: BTreeMap<String, ItemId>,
}

impl MapNode {
    pub fn new(id: ItemId, parent: Parent) -> Self {
        Self {
            id,
            parent,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterNode {
    pub id: ItemId,
    pub parent: Parent,
    pub data: Value,
}

/// Any node of the storage tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CrdtNode {
    Object(ObjectNode),
    List(ListNode),
    Map(MapNode),
    Register(RegisterNode),
}

impl CrdtNode {
    pub fn id(&self) -> ItemId {
        match self {
            CrdtNode::Object(n) => n.id,
            CrdtNode::List(n) => n.id,
            CrdtNode::Map(n) => n.id,
            CrdtNode::Register(n) => n.id,
        }
    }

    pub fn parent(&self) -> &Parent {
        match self {
            CrdtNode::Object(n) => &n.parent,
            CrdtNode::List(n) => &n.parent,
            CrdtNode::Map(n) => &n.parent,
            CrdtNode::Register(n) => &n.parent,
        }
    }

    pub fn parent_mut(&mut self) -> &mut Parent {
        match self {
            CrdtNode::Object(n) => &mut n.parent,
            CrdtNode::List(n) => &mut n.parent,
            CrdtNode::Map(n) => &mut n.parent,
            CrdtNode::Register(n) => &mut n.parent,
        }
    }

    pub fn kind(&self) -> CrdtKind {
        match self {
            CrdtNode::Object(_) => CrdtKind::Object,
            CrdtNode::List(_) => CrdtKind::List,
            CrdtNode::Map(_) => CrdtKind::Map,
            CrdtNode::Register(_) => CrdtKind::Register,
        }
    }

    /// Serialized form of this node alone (children are separate items).
    pub fn serialize(&self) -> SerializedCrdt {
        let (parent_id, parent_key) = match self.parent() {
            Parent::Root => (None, None),
            Parent::Keyed { parent, key } => (Some(*parent), Some(key.clone())),
        };
        let data = match self {
            CrdtNode::Object(n) => Some(Value::Object(n.data())),
            CrdtNode::Register(n) => Some(n.data.clone()),
            CrdtNode::List(_) | CrdtNode::Map(_) => None,
        };
        SerializedCrdt {
            kind: self.kind(),
            parent_id,
            parent_key,
            data,
        }
    }
}

// ── Serialized form ────────────────────────────────────────────────────────

/// The flat snapshot form of one node, as carried by the initial storage
/// message: `{"type": kind, "parentId"?, "parentKey"?, "data"?}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedCrdt {
    pub kind: CrdtKind,
    pub parent_id: Option<ItemId>,
    pub parent_key: Option<String>,
    pub data: Option<Value>,
}

impl SerializedCrdt {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn to_wire(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), (self.kind as u8).into());
        if let Some(parent_id) = self.parent_id {
            out.insert("parentId".into(), parent_id.to_string().into());
        }
        if let Some(parent_key) = &self.parent_key {
            out.insert("parentKey".into(), parent_key.clone().into());
        }
        if let Some(data) = &self.data {
            out.insert("data".into(), data.clone());
        }
        Value::Object(out)
    }

    pub fn from_wire(value: &Value) -> Result<Self, WireError> {
        let obj = value.as_object().ok_or(WireError::NotAnObject)?;
        Ok(Self {
            kind: CrdtKind::from_code(req_u64(obj, "type")?)?,
            parent_id: opt_id(obj, "parentId")?,
            parent_key: opt_string(obj, "parentKey")?,
            data: obj.get("data").filter(|v| !v.is_null()).cloned(),
        })
    }
}
