//! Law: for any sequence of tree mutations, replaying the accumulated
//! reverse ops restores the exact pre-mutation snapshot.

use proptest::prelude::*;
use serde_json::{json, Value};

use syncroom_crdt::{
    apply_op, item_id, position, CrdtNode, ItemId, NodeStore, Op, OpSource, SerializedCrdt,
};

#[derive(Debug, Clone)]
enum Step {
    SetKey(u8, u8),
    DeleteKey(u8),
    InsertItem(u8),
    DeleteItem(u8),
    MoveItem(u8, u8),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..4, 0u8..8).prop_map(|(k, v)| Step::SetKey(k, v)),
        (0u8..4).prop_map(Step::DeleteKey),
        (0u8..8).prop_map(Step::InsertItem),
        (0u8..4).prop_map(Step::DeleteItem),
        (0u8..4, 0u8..4).prop_map(|(i, j)| Step::MoveItem(i, j)),
    ]
}

struct Fixture {
    store: NodeStore,
    root: ItemId,
    list: ItemId,
    next_clock: u64,
}

impl Fixture {
    fn new() -> Self {
        let mut store = NodeStore::new();
        let root = store.create_root(1);
        let mut fixture = Self {
            store,
            root,
            list: item_id(1, 1),
            next_clock: 1,
        };
        let list = fixture.mint();
        assert_eq!(list, fixture.list);
        apply_op(
            &mut fixture.store,
            &Op::CreateList {
                op_id: None,
                id: list,
                parent_id: Some(root),
                parent_key: Some("items".into()),
            },
            OpSource::UndoRedoReconnect,
        );
        fixture
    }

    fn mint(&mut self) -> ItemId {
        let id = item_id(1, self.next_clock);
        self.next_clock += 1;
        id
    }

    fn list_positions(&self) -> Vec<String> {
        match self.store.get(self.list) {
            Some(CrdtNode::List(list)) => list.children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn list_child_at(&self, index: usize) -> Option<ItemId> {
        match self.store.get(self.list) {
            Some(CrdtNode::List(list)) => list.children.values().copied().nth(index),
            _ => None,
        }
    }

    fn op_for(&mut self, step: &Step) -> Option<Op> {
        match step {
            Step::SetKey(key, value) => Some(Op::UpdateObject {
                op_id: None,
                id: self.root,
                data: [(format!("k{key}"), json!(value))].into_iter().collect(),
            }),
            Step::DeleteKey(key) => Some(Op::DeleteObjectKey {
                op_id: None,
                id: self.root,
                key: format!("k{key}"),
            }),
            Step::InsertItem(value) => {
                let positions = self.list_positions();
                let position = match positions.last() {
                    Some(last) => position::after(last),
                    None => position::first(),
                };
                let id = self.mint();
                Some(Op::CreateRegister {
                    op_id: None,
                    id,
                    parent_id: Some(self.list),
                    parent_key: Some(position),
                    data: json!(value),
                })
            }
            Step::DeleteItem(index) => {
                let id = self.list_child_at(*index as usize)?;
                Some(Op::DeleteCrdt { op_id: None, id })
            }
            Step::MoveItem(from, to) => {
                let id = self.list_child_at(*from as usize)?;
                let positions = self.list_positions();
                let target = positions.get(*to as usize)?.clone();
                Some(Op::SetParentKey {
                    op_id: None,
                    id,
                    parent_key: target,
                })
            }
        }
    }
}

fn snapshot_items(store: &NodeStore) -> Vec<(ItemId, SerializedCrdt)> {
    store.serialize_items().into_iter().collect()
}

proptest! {
    #[test]
    fn reverse_replay_restores_the_snapshot(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let mut fixture = Fixture::new();
        let before_view = fixture.store.snapshot_json();
        let before_items = snapshot_items(&fixture.store);

        // Apply forward, unshifting reverses like the client's apply loop.
        let mut reverse: Vec<Op> = Vec::new();
        for step in &steps {
            let Some(op) = fixture.op_for(step) else { continue };
            let result = apply_op(&mut fixture.store, &op, OpSource::UndoRedoReconnect);
            reverse.splice(0..0, result.reverse);
        }

        for op in &reverse {
            apply_op(&mut fixture.store, op, OpSource::UndoRedoReconnect);
        }

        prop_assert_eq!(fixture.store.snapshot_json(), before_view);
        prop_assert_eq!(snapshot_items(&fixture.store), before_items);
    }

    /// The registry never leaks: every node is reachable from the root.
    #[test]
    fn no_orphans_after_arbitrary_mutations(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let mut fixture = Fixture::new();
        for step in &steps {
            let Some(op) = fixture.op_for(step) else { continue };
            apply_op(&mut fixture.store, &op, OpSource::UndoRedoReconnect);
        }
        let root = fixture.root;
        let items = fixture.store.serialize_items();
        for id in items.keys() {
            prop_assert!(
                fixture.store.is_in_subtree(*id, root),
                "node {} unreachable from root", id
            );
        }
    }
}

#[test]
fn snapshot_round_trips_through_load() {
    let mut fixture = Fixture::new();
    for step in [
        Step::SetKey(0, 5),
        Step::InsertItem(1),
        Step::InsertItem(2),
        Step::MoveItem(1, 0),
    ] {
        if let Some(op) = fixture.op_for(&step) {
            apply_op(&mut fixture.store, &op, OpSource::UndoRedoReconnect);
        }
    }
    let items = snapshot_items(&fixture.store);
    let reloaded = NodeStore::load(&items).unwrap();
    assert_eq!(reloaded.snapshot_json(), fixture.store.snapshot_json());
    assert_eq!(reloaded.root_id(), fixture.store.root_id());
}

#[test]
fn serialized_wire_forms_round_trip() {
    let mut fixture = Fixture::new();
    for step in [Step::SetKey(1, 3), Step::InsertItem(9)] {
        if let Some(op) = fixture.op_for(&step) {
            apply_op(&mut fixture.store, &op, OpSource::UndoRedoReconnect);
        }
    }
    for (_, serialized) in snapshot_items(&fixture.store) {
        let wire: Value = serialized.to_wire();
        assert_eq!(SerializedCrdt::from_wire(&wire).unwrap(), serialized);
    }
}
