//! Applies one operation to the storage tree.
//!
//! [`apply_op`] mutates the [`NodeStore`] and reports what happened: a
//! per-node change summary for subscribers and the reverse ops that undo the
//! mutation. Unknown target ids are not an error, since the server may have
//! garbage-collected the node; they report no modification.

use crate::id::ItemId;
use crate::nodes::{
    CrdtKind, CrdtNode, Entry, ListNode, MapNode, ObjectNode, Parent, RegisterNode,
};
use crate::op::Op;
use crate::position;
use crate::store::{Displaced, NodeStore};
use crate::update::{KeyChange, NodeChange, NodeUpdate};
use crate::JsonObject;

/// Where an op came from, as seen by the apply loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSource {
    /// Local (re)application: first apply, undo/redo replay, or reconnect
    /// resend. Accepted without further conflict resolution.
    UndoRedoReconnect,
    /// A remote peer's op relayed by the server.
    Remote,
    /// The server echoing one of our own offline ops back to us.
    Ack,
}

/// Outcome of applying a single op.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    /// Change summaries, empty when the op had no effect. Most ops touch one
    /// node; a whole-node deletion reports both the parent that lost the key
    /// and the deleted node itself.
    pub modified: Vec<NodeUpdate>,
    /// Ops that undo this one when replayed in order. Empty when unmodified.
    pub reverse: Vec<Op>,
}

impl ApplyResult {
    fn unmodified() -> Self {
        Self {
            modified: Vec::new(),
            reverse: Vec::new(),
        }
    }

    fn modified(update: NodeUpdate, reverse: Vec<Op>) -> Self {
        Self {
            modified: vec![update],
            reverse,
        }
    }
}

pub fn apply_op(store: &mut NodeStore, op: &Op, source: OpSource) -> ApplyResult {
    match op {
        Op::UpdateObject { id, data, .. } => apply_update_object(store, *id, data),
        Op::DeleteObjectKey { id, key, .. } => apply_delete_object_key(store, *id, key),
        Op::DeleteCrdt { id, .. } => apply_delete_crdt(store, *id),
        Op::SetParentKey { id, parent_key, .. } => apply_set_parent_key(store, *id, parent_key),
        Op::CreateObject {
            id,
            parent_id,
            parent_key,
            data,
            ..
        } => apply_create(store, *id, *parent_id, parent_key.as_deref(), source, |parent| {
            CrdtNode::Object(ObjectNode::new(*id, parent, data.clone()))
        }),
        Op::CreateList {
            id,
            parent_id,
            parent_key,
            ..
        } => apply_create(store, *id, *parent_id, parent_key.as_deref(), source, |parent| {
            CrdtNode::List(ListNode::new(*id, parent))
        }),
        Op::CreateMap {
            id,
            parent_id,
            parent_key,
            ..
        } => apply_create(store, *id, *parent_id, parent_key.as_deref(), source, |parent| {
            CrdtNode::Map(MapNode::new(*id, parent))
        }),
        Op::CreateRegister {
            id,
            parent_id,
            parent_key,
            data,
            ..
        } => apply_create(store, *id, *parent_id, parent_key.as_deref(), source, |parent| {
            CrdtNode::Register(RegisterNode {
                id: *id,
                parent,
                data: data.clone(),
            })
        }),
    }
}

// ── Object mutation ────────────────────────────────────────────────────────

fn apply_update_object(store: &mut NodeStore, id: ItemId, data: &JsonObject) -> ApplyResult {
    if data.is_empty() || !matches!(store.get(id), Some(CrdtNode::Object(_))) {
        return ApplyResult::unmodified();
    }

    let mut old_values = JsonObject::new();
    let mut added_keys: Vec<String> = Vec::new();
    let mut restore_ops: Vec<Op> = Vec::new();
    let mut keys = std::collections::BTreeMap::new();

    for (key, value) in data {
        // Displaced child subtrees must be captured before removal so the
        // reverse can rebuild them.
        let displaced_child = match store.get(id) {
            Some(CrdtNode::Object(node)) => node.child(key),
            _ => None,
        };
        if let Some(child) = displaced_child {
            restore_ops.extend(store.subtree_create_ops(child));
            store.unlink_child(id, key);
            store.delete_subtree(child);
        }

        let Some(CrdtNode::Object(node)) = store.get_mut(id) else {
            return ApplyResult::unmodified();
        };
        match node.entries.insert(key.clone(), Entry::Json(value.clone())) {
            Some(Entry::Json(old)) => {
                old_values.insert(key.clone(), old);
            }
            Some(Entry::Child(_)) => {} // captured above
            None => added_keys.push(key.clone()),
        }
        keys.insert(key.clone(), KeyChange::Set);
    }

    let mut reverse = Vec::new();
    if !old_values.is_empty() {
        reverse.push(Op::UpdateObject {
            op_id: None,
            id,
            data: old_values,
        });
    }
    for key in added_keys {
        reverse.push(Op::DeleteObjectKey { op_id: None, id, key });
    }
    reverse.extend(restore_ops);

    ApplyResult::modified(
        NodeUpdate {
            id,
            kind: CrdtKind::Object,
            change: NodeChange::Updated { keys },
        },
        reverse,
    )
}

fn apply_delete_object_key(store: &mut NodeStore, id: ItemId, key: &str) -> ApplyResult {
    if !matches!(store.get(id), Some(CrdtNode::Object(_))) {
        return ApplyResult::unmodified();
    }
    let reverse = match store.unlink_child(id, key) {
        Displaced::None => return ApplyResult::unmodified(),
        Displaced::Json(old) => vec![Op::UpdateObject {
            op_id: None,
            id,
            data: [(key.to_owned(), old)].into_iter().collect(),
        }],
        Displaced::Child(child) => {
            let rebuild = store.subtree_create_ops(child);
            store.delete_subtree(child);
            rebuild
        }
    };
    ApplyResult::modified(
        NodeUpdate {
            id,
            kind: CrdtKind::Object,
            change: NodeChange::single(key, KeyChange::Removed),
        },
        reverse,
    )
}

// ── Node deletion ──────────────────────────────────────────────────────────

fn apply_delete_crdt(store: &mut NodeStore, id: ItemId) -> ApplyResult {
    let Some(node) = store.get(id) else {
        return ApplyResult::unmodified();
    };
    let kind = node.kind();
    let Parent::Keyed { parent, key } = node.parent().clone() else {
        // The root is not deletable through ops.
        return ApplyResult::unmodified();
    };
    let parent_kind = match store.get(parent) {
        Some(node) => node.kind(),
        None => return ApplyResult::unmodified(),
    };

    let reverse = store.subtree_create_ops(id);
    store.unlink_child(parent, &key);
    store.delete_subtree(id);

    // Two summaries: the parent lost a key, and the node itself is gone so
    // its direct subscribers hear about it.
    ApplyResult {
        modified: vec![
            NodeUpdate {
                id: parent,
                kind: parent_kind,
                change: NodeChange::single(key, KeyChange::Removed),
            },
            NodeUpdate {
                id,
                kind,
                change: NodeChange::Deleted,
            },
        ],
        reverse,
    }
}

// ── List reordering ────────────────────────────────────────────────────────

fn apply_set_parent_key(store: &mut NodeStore, id: ItemId, requested: &str) -> ApplyResult {
    let Some(node) = store.get(id) else {
        return ApplyResult::unmodified();
    };
    let Parent::Keyed { parent, key: old } = node.parent().clone() else {
        return ApplyResult::unmodified();
    };
    if old == requested {
        return ApplyResult::unmodified();
    }
    let Some(CrdtNode::List(list)) = store.get(parent) else {
        return ApplyResult::unmodified();
    };
    let target = resolve_list_position(list, requested, id);

    store.unlink_child(parent, &old);
    store.link_child(parent, &target, id);
    if let Some(node) = store.get_mut(id) {
        *node.parent_mut() = Parent::keyed(parent, target.clone());
    }

    ApplyResult::modified(
        NodeUpdate {
            id: parent,
            kind: CrdtKind::List,
            change: NodeChange::updated([
                (old.clone(), KeyChange::Removed),
                (target, KeyChange::Set),
            ]),
        },
        vec![Op::SetParentKey {
            op_id: None,
            id,
            parent_key: old,
        }],
    )
}

/// The position actually used for an insert or move. If `requested` is taken
/// by a different child, the incoming child shifts right to the next gap.
fn resolve_list_position(list: &ListNode, requested: &str, incoming: ItemId) -> String {
    match list.children.get(requested) {
        None => requested.to_owned(),
        Some(occupant) if *occupant == incoming => requested.to_owned(),
        Some(_) => {
            let next = list
                .children
                .range::<str, _>((
                    std::ops::Bound::Excluded(requested),
                    std::ops::Bound::Unbounded,
                ))
                .next()
                .map(|(pos, _)| pos.clone());
            match next {
                Some(next) => position::between(requested, &next),
                None => position::after(requested),
            }
        }
    }
}

// ── Creation ───────────────────────────────────────────────────────────────

fn apply_create(
    store: &mut NodeStore,
    id: ItemId,
    parent_id: Option<ItemId>,
    parent_key: Option<&str>,
    _source: OpSource,
    make: impl FnOnce(Parent) -> CrdtNode,
) -> ApplyResult {
    // Re-applying a create (an ack echo, or a duplicate remote) is a no-op.
    if store.contains(id) {
        return ApplyResult::unmodified();
    }
    let (Some(parent), Some(requested)) = (parent_id, parent_key) else {
        return ApplyResult::unmodified();
    };
    let parent_kind = match store.get(parent) {
        Some(node) => node.kind(),
        None => return ApplyResult::unmodified(),
    };

    let key = match store.get(parent) {
        Some(CrdtNode::List(list)) => resolve_list_position(list, requested, id),
        Some(CrdtNode::Register(_)) | None => return ApplyResult::unmodified(),
        Some(_) => requested.to_owned(),
    };

    // Capture whatever the key held so the reverse can put it back.
    let mut restore_ops: Vec<Op> = Vec::new();
    if let Some(CrdtNode::Object(node)) = store.get(parent) {
        if let Some(Entry::Json(old)) = node.entries.get(&key) {
            restore_ops.push(Op::UpdateObject {
                op_id: None,
                id: parent,
                data: [(key.clone(), old.clone())].into_iter().collect(),
            });
        }
    }
    let displaced_child = match store.get(parent) {
        Some(CrdtNode::Object(node)) => node.child(&key),
        Some(CrdtNode::Map(node)) => node.entries.get(&key).copied(),
        _ => None,
    };
    if let Some(child) = displaced_child {
        restore_ops.extend(store.subtree_create_ops(child));
        store.unlink_child(parent, &key);
        store.delete_subtree(child);
    }

    store.insert(make(Parent::keyed(parent, key.clone())));
    store.link_child(parent, &key, id);

    let mut reverse = vec![Op::DeleteCrdt { op_id: None, id }];
    reverse.extend(restore_ops);

    ApplyResult::modified(
        NodeUpdate {
            id: parent,
            kind: parent_kind,
            change: NodeChange::single(key, KeyChange::Set),
        },
        reverse,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::item_id;
    use serde_json::json;

    fn store_with_root() -> NodeStore {
        let mut store = NodeStore::new();
        store.create_root(1);
        store
    }

    fn object_data(value: serde_json::Value) -> JsonObject {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn update_object_reports_reverse_values() {
        let mut store = store_with_root();
        let root = store.root_id().unwrap();
        apply_op(
            &mut store,
            &Op::UpdateObject {
                op_id: None,
                id: root,
                data: object_data(json!({"x": 1})),
            },
            OpSource::UndoRedoReconnect,
        );
        let result = apply_op(
            &mut store,
            &Op::UpdateObject {
                op_id: None,
                id: root,
                data: object_data(json!({"x": 2, "y": 3})),
            },
            OpSource::UndoRedoReconnect,
        );
        assert!(!result.modified.is_empty());
        // Old value of x restored, y removed.
        assert_eq!(
            result.reverse,
            vec![
                Op::UpdateObject {
                    op_id: None,
                    id: root,
                    data: object_data(json!({"x": 1})),
                },
                Op::DeleteObjectKey {
                    op_id: None,
                    id: root,
                    key: "y".into()
                },
            ]
        );
        assert_eq!(store.snapshot_json(), json!({"x": 2, "y": 3}));
    }

    #[test]
    fn update_object_on_unknown_id_is_silent() {
        let mut store = store_with_root();
        let result = apply_op(
            &mut store,
            &Op::UpdateObject {
                op_id: None,
                id: item_id(9, 9),
                data: object_data(json!({"x": 1})),
            },
            OpSource::Remote,
        );
        assert_eq!(result, ApplyResult::unmodified());
    }

    #[test]
    fn create_register_then_reverse_restores_previous_value() {
        let mut store = store_with_root();
        let root = store.root_id().unwrap();
        apply_op(
            &mut store,
            &Op::UpdateObject {
                op_id: None,
                id: root,
                data: object_data(json!({"name": "before"})),
            },
            OpSource::UndoRedoReconnect,
        );
        let create = Op::CreateRegister {
            op_id: None,
            id: item_id(1, 1),
            parent_id: Some(root),
            parent_key: Some("name".into()),
            data: json!("after"),
        };
        let result = apply_op(&mut store, &create, OpSource::UndoRedoReconnect);
        assert_eq!(store.snapshot_json(), json!({"name": "after"}));

        for op in &result.reverse {
            apply_op(&mut store, op, OpSource::UndoRedoReconnect);
        }
        assert_eq!(store.snapshot_json(), json!({"name": "before"}));
    }

    #[test]
    fn create_is_idempotent_for_echoes() {
        let mut store = store_with_root();
        let root = store.root_id().unwrap();
        let create = Op::CreateMap {
            op_id: Some(item_id(1, 1)),
            id: item_id(1, 1),
            parent_id: Some(root),
            parent_key: Some("m".into()),
        };
        assert!(!apply_op(&mut store, &create, OpSource::UndoRedoReconnect)
            .modified
            .is_empty());
        assert_eq!(
            apply_op(&mut store, &create, OpSource::Ack),
            ApplyResult::unmodified()
        );
    }

    #[test]
    fn delete_crdt_reports_parent_and_rebuild_ops() {
        let mut store = store_with_root();
        let root = store.root_id().unwrap();
        apply_op(
            &mut store,
            &Op::CreateList {
                op_id: None,
                id: item_id(1, 1),
                parent_id: Some(root),
                parent_key: Some("items".into()),
            },
            OpSource::UndoRedoReconnect,
        );
        apply_op(
            &mut store,
            &Op::CreateRegister {
                op_id: None,
                id: item_id(1, 2),
                parent_id: Some(item_id(1, 1)),
                parent_key: Some("P".into()),
                data: json!(7),
            },
            OpSource::UndoRedoReconnect,
        );

        let result = apply_op(
            &mut store,
            &Op::DeleteCrdt {
                op_id: None,
                id: item_id(1, 1),
            },
            OpSource::UndoRedoReconnect,
        );
        assert_eq!(result.modified.len(), 2);
        assert_eq!(result.modified[0].id, root);
        assert_eq!(
            result.modified[0].change,
            NodeChange::single("items", KeyChange::Removed)
        );
        assert_eq!(
            result.modified[1],
            NodeUpdate {
                id: item_id(1, 1),
                kind: CrdtKind::List,
                change: NodeChange::Deleted,
            }
        );
        assert_eq!(result.reverse.len(), 2);
        assert!(!store.contains(item_id(1, 2)));

        for op in &result.reverse {
            apply_op(&mut store, op, OpSource::UndoRedoReconnect);
        }
        assert_eq!(store.snapshot_json(), json!({"items": [7]}));
    }

    #[test]
    fn list_insert_conflict_shifts_right() {
        let mut store = store_with_root();
        let root = store.root_id().unwrap();
        apply_op(
            &mut store,
            &Op::CreateList {
                op_id: None,
                id: item_id(1, 1),
                parent_id: Some(root),
                parent_key: Some("l".into()),
            },
            OpSource::UndoRedoReconnect,
        );
        let ins = |id: ItemId, data: serde_json::Value| Op::CreateRegister {
            op_id: None,
            id,
            parent_id: Some(item_id(1, 1)),
            parent_key: Some("P".into()),
            data,
        };
        apply_op(&mut store, &ins(item_id(1, 2), json!("ours")), OpSource::UndoRedoReconnect);
        apply_op(&mut store, &ins(item_id(2, 2), json!("theirs")), OpSource::Remote);
        // Both live; the later arrival sits after the first.
        assert_eq!(store.snapshot_json(), json!({"l": ["ours", "theirs"]}));
    }

    #[test]
    fn set_parent_key_moves_and_reverses() {
        let mut store = store_with_root();
        let root = store.root_id().unwrap();
        apply_op(
            &mut store,
            &Op::CreateList {
                op_id: None,
                id: item_id(1, 1),
                parent_id: Some(root),
                parent_key: Some("l".into()),
            },
            OpSource::UndoRedoReconnect,
        );
        for (clock, pos, val) in [(2, "P", "a"), (3, "g", "b")] {
            apply_op(
                &mut store,
                &Op::CreateRegister {
                    op_id: None,
                    id: item_id(1, clock),
                    parent_id: Some(item_id(1, 1)),
                    parent_key: Some(pos.into()),
                    data: json!(val),
                },
                OpSource::UndoRedoReconnect,
            );
        }
        assert_eq!(store.snapshot_json(), json!({"l": ["a", "b"]}));

        // Move "b" before "a".
        let result = apply_op(
            &mut store,
            &Op::SetParentKey {
                op_id: None,
                id: item_id(1, 3),
                parent_key: "8".into(),
            },
            OpSource::UndoRedoReconnect,
        );
        assert_eq!(store.snapshot_json(), json!({"l": ["b", "a"]}));
        for op in &result.reverse {
            apply_op(&mut store, op, OpSource::UndoRedoReconnect);
        }
        assert_eq!(store.snapshot_json(), json!({"l": ["a", "b"]}));
    }
}
