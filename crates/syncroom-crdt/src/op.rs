//! Storage operations as a single sum type.
//!
//! Every mutation of the storage tree travels (and is undone) as an [`Op`].
//! On the wire an op is a JSON object with an integer `type` discriminant;
//! the codec lives here next to the type so the two cannot drift apart.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::id::{IdParseError, ItemId};
use crate::JsonObject;

/// Wire discriminants for [`Op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    SetParentKey = 1,
    CreateList = 2,
    UpdateObject = 3,
    CreateObject = 4,
    DeleteCrdt = 5,
    DeleteObjectKey = 6,
    CreateMap = 7,
    CreateRegister = 8,
}

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("op is not a JSON object")]
    NotAnObject,
    #[error("unknown op type code: {0}")]
    UnknownOpCode(u64),
    #[error("unknown crdt type code: {0}")]
    UnknownCrdtCode(u64),
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("field {0:?} has the wrong type")]
    BadField(&'static str),
    #[error("malformed item id: {0}")]
    BadId(#[from] IdParseError),
}

/// A single mutation of the storage tree.
///
/// `op_id` is `None` only on ops synthesized by undo/redo or tree diffing; it
/// is assigned on first local application and is unique per connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CreateObject {
        op_id: Option<ItemId>,
        id: ItemId,
        parent_id: Option<ItemId>,
        parent_key: Option<String>,
        data: JsonObject,
    },
    CreateList {
        op_id: Option<ItemId>,
        id: ItemId,
        parent_id: Option<ItemId>,
        parent_key: Option<String>,
    },
    CreateMap {
        op_id: Option<ItemId>,
        id: ItemId,
        parent_id: Option<ItemId>,
        parent_key: Option<String>,
    },
    CreateRegister {
        op_id: Option<ItemId>,
        id: ItemId,
        parent_id: Option<ItemId>,
        parent_key: Option<String>,
        data: Value,
    },
    UpdateObject {
        op_id: Option<ItemId>,
        id: ItemId,
        data: JsonObject,
    },
    DeleteObjectKey {
        op_id: Option<ItemId>,
        id: ItemId,
        key: String,
    },
    DeleteCrdt {
        op_id: Option<ItemId>,
        id: ItemId,
    },
    SetParentKey {
        op_id: Option<ItemId>,
        id: ItemId,
        parent_key: String,
    },
}

impl Op {
    /// The id of the node this op targets.
    pub fn target(&self) -> ItemId {
        match self {
            Op::CreateObject { id, .. }
            | Op::CreateList { id, .. }
            | Op::CreateMap { id, .. }
            | Op::CreateRegister { id, .. }
            | Op::UpdateObject { id, .. }
            | Op::DeleteObjectKey { id, .. }
            | Op::DeleteCrdt { id, .. }
            | Op::SetParentKey { id, .. } => *id,
        }
    }

    pub fn op_id(&self) -> Option<ItemId> {
        match self {
            Op::CreateObject { op_id, .. }
            | Op::CreateList { op_id, .. }
            | Op::CreateMap { op_id, .. }
            | Op::CreateRegister { op_id, .. }
            | Op::UpdateObject { op_id, .. }
            | Op::DeleteObjectKey { op_id, .. }
            | Op::DeleteCrdt { op_id, .. }
            | Op::SetParentKey { op_id, .. } => *op_id,
        }
    }

    pub fn set_op_id(&mut self, new: ItemId) {
        match self {
            Op::CreateObject { op_id, .. }
            | Op::CreateList { op_id, .. }
            | Op::CreateMap { op_id, .. }
            | Op::CreateRegister { op_id, .. }
            | Op::UpdateObject { op_id, .. }
            | Op::DeleteObjectKey { op_id, .. }
            | Op::DeleteCrdt { op_id, .. }
            | Op::SetParentKey { op_id, .. } => *op_id = Some(new),
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Op::CreateObject { .. }
                | Op::CreateList { .. }
                | Op::CreateMap { .. }
                | Op::CreateRegister { .. }
        )
    }

    pub fn code(&self) -> OpCode {
        match self {
            Op::SetParentKey { .. } => OpCode::SetParentKey,
            Op::CreateList { .. } => OpCode::CreateList,
            Op::UpdateObject { .. } => OpCode::UpdateObject,
            Op::CreateObject { .. } => OpCode::CreateObject,
            Op::DeleteCrdt { .. } => OpCode::DeleteCrdt,
            Op::DeleteObjectKey { .. } => OpCode::DeleteObjectKey,
            Op::CreateMap { .. } => OpCode::CreateMap,
            Op::CreateRegister { .. } => OpCode::CreateRegister,
        }
    }

    // ── Wire codec ─────────────────────────────────────────────────────────

    pub fn to_wire(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), (self.code() as u8).into());
        if let Some(op_id) = self.op_id() {
            out.insert("opId".into(), op_id.to_string().into());
        }
        out.insert("id".into(), self.target().to_string().into());
        match self {
            Op::CreateObject {
                parent_id,
                parent_key,
                data,
                ..
            } => {
                put_parent(&mut out, parent_id, parent_key);
                out.insert("data".into(), Value::Object(data.clone()));
            }
            Op::CreateList {
                parent_id,
                parent_key,
                ..
            }
            | Op::CreateMap {
                parent_id,
                parent_key,
                ..
            } => put_parent(&mut out, parent_id, parent_key),
            Op::CreateRegister {
                parent_id,
                parent_key,
                data,
                ..
            } => {
                put_parent(&mut out, parent_id, parent_key);
                out.insert("data".into(), data.clone());
            }
            Op::UpdateObject { data, .. } => {
                out.insert("data".into(), Value::Object(data.clone()));
            }
            Op::DeleteObjectKey { key, .. } => {
                out.insert("key".into(), key.clone().into());
            }
            Op::DeleteCrdt { .. } => {}
            Op::SetParentKey { parent_key, .. } => {
                out.insert("parentKey".into(), parent_key.clone().into());
            }
        }
        Value::Object(out)
    }

    pub fn from_wire(value: &Value) -> Result<Self, WireError> {
        let obj = value.as_object().ok_or(WireError::NotAnObject)?;
        let code = req_u64(obj, "type")?;
        let op_id = opt_id(obj, "opId")?;
        let id = req_id(obj, "id")?;
        let op = match code {
            c if c == OpCode::CreateObject as u64 => Op::CreateObject {
                op_id,
                id,
                parent_id: opt_id(obj, "parentId")?,
                parent_key: opt_string(obj, "parentKey")?,
                data: req_object(obj, "data")?,
            },
            c if c == OpCode::CreateList as u64 => Op::CreateList {
                op_id,
                id,
                parent_id: opt_id(obj, "parentId")?,
                parent_key: opt_string(obj, "parentKey")?,
            },
            c if c == OpCode::CreateMap as u64 => Op::CreateMap {
                op_id,
                id,
                parent_id: opt_id(obj, "parentId")?,
                parent_key: opt_string(obj, "parentKey")?,
            },
            c if c == OpCode::CreateRegister as u64 => Op::CreateRegister {
                op_id,
                id,
                parent_id: opt_id(obj, "parentId")?,
                parent_key: opt_string(obj, "parentKey")?,
                data: obj
                    .get("data")
                    .cloned()
                    .ok_or(WireError::MissingField("data"))?,
            },
            c if c == OpCode::UpdateObject as u64 => Op::UpdateObject {
                op_id,
                id,
                data: req_object(obj, "data")?,
            },
            c if c == OpCode::DeleteObjectKey as u64 => Op::DeleteObjectKey {
                op_id,
                id,
                key: req_string(obj, "key")?,
            },
            c if c == OpCode::DeleteCrdt as u64 => Op::DeleteCrdt { op_id, id },
            c if c == OpCode::SetParentKey as u64 => Op::SetParentKey {
                op_id,
                id,
                parent_key: req_string(obj, "parentKey")?,
            },
            other => return Err(WireError::UnknownOpCode(other)),
        };
        Ok(op)
    }
}

fn put_parent(out: &mut Map<String, Value>, parent_id: &Option<ItemId>, parent_key: &Option<String>) {
    if let Some(parent_id) = parent_id {
        out.insert("parentId".into(), parent_id.to_string().into());
    }
    if let Some(parent_key) = parent_key {
        out.insert("parentKey".into(), parent_key.clone().into());
    }
}

pub fn req_u64(obj: &Map<String, Value>, field: &'static str) -> Result<u64, WireError> {
    obj.get(field)
        .ok_or(WireError::MissingField(field))?
        .as_u64()
        .ok_or(WireError::BadField(field))
}

pub fn req_string(obj: &Map<String, Value>, field: &'static str) -> Result<String, WireError> {
    Ok(obj
        .get(field)
        .ok_or(WireError::MissingField(field))?
        .as_str()
        .ok_or(WireError::BadField(field))?
        .to_owned())
}

pub fn opt_string(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, WireError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(WireError::BadField(field)),
    }
}

pub fn req_id(obj: &Map<String, Value>, field: &'static str) -> Result<ItemId, WireError> {
    Ok(obj
        .get(field)
        .ok_or(WireError::MissingField(field))?
        .as_str()
        .ok_or(WireError::BadField(field))?
        .parse()?)
}

pub fn opt_id(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<ItemId>, WireError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.parse()?)),
        Some(_) => Err(WireError::BadField(field)),
    }
}

pub fn req_object(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<JsonObject, WireError> {
    obj.get(field)
        .ok_or(WireError::MissingField(field))?
        .as_object()
        .cloned()
        .ok_or(WireError::BadField(field))
}
