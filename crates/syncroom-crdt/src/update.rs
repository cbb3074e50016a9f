//! Per-node change summaries.
//!
//! Applying ops produces one [`NodeUpdate`] per touched node. Updates for the
//! same node within one inbound frame (or one batch) are merged with
//! [`merge_node_updates`] so subscribers see a single coalesced notification
//! per node.

use std::collections::BTreeMap;

use crate::id::ItemId;
use crate::nodes::CrdtKind;

/// What happened to a single key (object/map) or position (list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChange {
    Set,
    Removed,
}

/// Node-level change: either field-level updates or whole-node deletion.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeChange {
    Updated { keys: BTreeMap<String, KeyChange> },
    Deleted,
}

impl NodeChange {
    pub fn updated(keys: impl IntoIterator<Item = (String, KeyChange)>) -> Self {
        Self::Updated {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn single(key: impl Into<String>, change: KeyChange) -> Self {
        Self::updated([(key.into(), change)])
    }
}

/// One storage-subscriber notification unit.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub id: ItemId,
    pub kind: CrdtKind,
    pub change: NodeChange,
}

/// Merge rule for two updates of the same node, `new` observed after `old`.
///
/// A deletion dominates in either order; two updates union their key sets
/// with the later change winning per key. The rule is associative, so a whole
/// frame can be folded pairwise.
pub fn merge_node_updates(old: NodeUpdate, new: NodeUpdate) -> NodeUpdate {
    debug_assert_eq!(old.id, new.id);
    let change = match (old.change, new.change) {
        (NodeChange::Deleted, _) | (_, NodeChange::Deleted) => NodeChange::Deleted,
        (NodeChange::Updated { keys: mut merged }, NodeChange::Updated { keys }) => {
            merged.extend(keys);
            NodeChange::Updated { keys: merged }
        }
    };
    NodeUpdate {
        id: new.id,
        kind: new.kind,
        change,
    }
}

/// Fold `update` into an accumulating per-node map.
pub fn accumulate(acc: &mut BTreeMap<ItemId, NodeUpdate>, update: NodeUpdate) {
    match acc.remove(&update.id) {
        Some(existing) => {
            let merged = merge_node_updates(existing, update);
            acc.insert(merged.id, merged);
        }
        None => {
            acc.insert(update.id, update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::item_id;

    fn upd(keys: &[(&str, KeyChange)]) -> NodeUpdate {
        NodeUpdate {
            id: item_id(1, 1),
            kind: CrdtKind::Object,
            change: NodeChange::updated(
                keys.iter().map(|(k, c)| ((*k).to_owned(), *c)),
            ),
        }
    }

    fn deleted() -> NodeUpdate {
        NodeUpdate {
            id: item_id(1, 1),
            kind: CrdtKind::Object,
            change: NodeChange::Deleted,
        }
    }

    #[test]
    fn updates_union_keys_later_wins() {
        let merged = merge_node_updates(
            upd(&[("a", KeyChange::Set), ("b", KeyChange::Set)]),
            upd(&[("b", KeyChange::Removed), ("c", KeyChange::Set)]),
        );
        match merged.change {
            NodeChange::Updated { keys } => {
                assert_eq!(keys.len(), 3);
                assert_eq!(keys["a"], KeyChange::Set);
                assert_eq!(keys["b"], KeyChange::Removed);
                assert_eq!(keys["c"], KeyChange::Set);
            }
            NodeChange::Deleted => panic!("merge lost the update"),
        }
    }

    #[test]
    fn delete_dominates_both_orders() {
        let a = merge_node_updates(upd(&[("a", KeyChange::Set)]), deleted());
        let b = merge_node_updates(deleted(), upd(&[("a", KeyChange::Set)]));
        assert_eq!(a.change, NodeChange::Deleted);
        assert_eq!(b.change, NodeChange::Deleted);
    }

    #[test]
    fn accumulate_keeps_one_entry_per_node() {
        let mut acc = BTreeMap::new();
        accumulate(&mut acc, upd(&[("a", KeyChange::Set)]));
        accumulate(&mut acc, upd(&[("b", KeyChange::Set)]));
        assert_eq!(acc.len(), 1);
    }
}
