//! Snapshot reconciliation.
//!
//! When storage is re-fetched over an existing tree (reconnection), the
//! incoming flat snapshot is not applied wholesale; instead a synthetic op
//! stream is computed against the current snapshot and applied as remote.
//! Subscribers then observe the reconciliation as ordinary storage updates.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::id::ItemId;
use crate::nodes::{CrdtKind, SerializedCrdt};
use crate::op::Op;
use crate::JsonObject;

/// Ops that transform the `current` snapshot into `incoming`.
///
/// Emission order: deletions, then creations (parents before children), then
/// in-place updates. All op ids are left unassigned; the ops are meant to be
/// applied as remote.
pub fn storage_diff_ops(
    current: &BTreeMap<ItemId, SerializedCrdt>,
    incoming: &BTreeMap<ItemId, SerializedCrdt>,
) -> Vec<Op> {
    let mut ops = Vec::new();

    for id in current.keys() {
        if !incoming.contains_key(id) {
            ops.push(Op::DeleteCrdt { op_id: None, id: *id });
        }
    }

    push_creations(&mut ops, current, incoming);

    for (id, new) in incoming {
        let Some(old) = current.get(id) else { continue };
        if new.kind == CrdtKind::Object {
            push_object_updates(&mut ops, *id, old, new);
        }
        if new.parent_id == old.parent_id && new.parent_key != old.parent_key {
            if let Some(parent_key) = new.parent_key.clone() {
                ops.push(Op::SetParentKey {
                    op_id: None,
                    id: *id,
                    parent_key,
                });
            }
        }
    }

    ops
}

/// Creations in parent-before-child order: an item is emitted once its
/// parent either already existed or has been emitted.
fn push_creations(
    ops: &mut Vec<Op>,
    current: &BTreeMap<ItemId, SerializedCrdt>,
    incoming: &BTreeMap<ItemId, SerializedCrdt>,
) {
    let mut pending: Vec<ItemId> = incoming
        .keys()
        .filter(|id| !current.contains_key(id))
        .copied()
        .collect();
    let mut emitted: std::collections::BTreeSet<ItemId> = Default::default();

    while !pending.is_empty() {
        let ready: Vec<ItemId> = pending
            .iter()
            .filter(|id| match incoming[*id].parent_id {
                None => true,
                Some(p) => current.contains_key(&p) || emitted.contains(&p),
            })
            .copied()
            .collect();
        if ready.is_empty() {
            // Remaining items hang off parents that exist in neither
            // snapshot; they are unreachable and dropped.
            break;
        }
        for id in ready {
            ops.push(create_op(id, &incoming[&id]));
            emitted.insert(id);
            pending.retain(|p| *p != id);
        }
    }
}

fn create_op(id: ItemId, serialized: &SerializedCrdt) -> Op {
    let parent_id = serialized.parent_id;
    let parent_key = serialized.parent_key.clone();
    match serialized.kind {
        CrdtKind::Object => Op::CreateObject {
            op_id: None,
            id,
            parent_id,
            parent_key,
            data: data_object(serialized),
        },
        CrdtKind::List => Op::CreateList {
            op_id: None,
            id,
            parent_id,
            parent_key,
        },
        CrdtKind::Map => Op::CreateMap {
            op_id: None,
            id,
            parent_id,
            parent_key,
        },
        CrdtKind::Register => Op::CreateRegister {
            op_id: None,
            id,
            parent_id,
            parent_key,
            data: serialized.data.clone().unwrap_or(Value::Null),
        },
    }
}

fn data_object(serialized: &SerializedCrdt) -> JsonObject {
    match &serialized.data {
        Some(Value::Object(map)) => map.clone(),
        _ => JsonObject::new(),
    }
}

fn push_object_updates(ops: &mut Vec<Op>, id: ItemId, old: &SerializedCrdt, new: &SerializedCrdt) {
    let old_data = data_object(old);
    let new_data = data_object(new);

    let changed: JsonObject = new_data
        .iter()
        .filter(|(key, value)| old_data.get(*key) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !changed.is_empty() {
        ops.push(Op::UpdateObject {
            op_id: None,
            id,
            data: changed,
        });
    }
    for key in old_data.keys() {
        if !new_data.contains_key(key) {
            ops.push(Op::DeleteObjectKey {
                op_id: None,
                id,
                key: key.clone(),
            });
        }
    }
}
