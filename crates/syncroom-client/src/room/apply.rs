//! The apply loop.
//!
//! One entry (a sequence of ops and presence snapshots) is applied against
//! the tree and `me`, producing the inverse entry and a coalesced set of
//! per-node diffs. Reverses are unshifted so that replaying the inverse
//! entry front-to-back undoes the forward entry.

use std::collections::{BTreeMap, BTreeSet};

use syncroom_crdt::{accumulate, apply_op, ItemId, NodeUpdate, OpSource};

use crate::history::HistoryItem;
use crate::presence::{buffer_update, merge_presence, reverse_presence, BufferKind};
use crate::room::Room;

/// Diffs accumulated by one apply pass (or one batch, or one inbound frame).
#[derive(Default)]
pub(crate) struct PendingUpdates {
    pub storage: BTreeMap<ItemId, NodeUpdate>,
    pub presence: bool,
}

impl PendingUpdates {
    pub fn merge(&mut self, other: PendingUpdates) {
        for update in other.storage.into_values() {
            accumulate(&mut self.storage, update);
        }
        self.presence |= other.presence;
    }
}

impl Room {
    /// Apply `items` in order. `is_local` marks entries produced on this
    /// connection (first application, undo/redo replay, offline resend);
    /// remote entries additionally resolve acknowledgements of offline ops.
    ///
    /// Ops without an op id are assigned one here on local application, in
    /// place, so callers buffer the stamped ops afterwards.
    pub(crate) fn apply_items(
        &mut self,
        items: &mut [HistoryItem],
        is_local: bool,
    ) -> (Vec<HistoryItem>, PendingUpdates) {
        let mut reverse: Vec<HistoryItem> = Vec::new();
        let mut updates = PendingUpdates::default();
        // Inside a batch the created-node set spans every mutation of the
        // batch, so a subtree built up across several calls still coalesces
        // into its top-level update.
        let mut created: BTreeSet<ItemId> = match self.batch.as_mut() {
            Some(batch) => std::mem::take(&mut batch.created),
            None => BTreeSet::new(),
        };

        for item in items.iter_mut() {
            match item {
                HistoryItem::Presence(partial) => {
                    let restore = reverse_presence(&self.me, partial);
                    merge_presence(&mut self.me, partial);
                    buffer_update(&mut self.presence_buffer, BufferKind::Partial, partial);
                    reverse.insert(0, HistoryItem::Presence(restore));
                    updates.presence = true;
                }
                HistoryItem::Op(op) => {
                    if is_local && op.op_id().is_none() {
                        // Only ops synthesized by undo/redo or diffing lack an
                        // id; stamp one before the op can leave the machine.
                        let actor = self.expect_actor();
                        let op_id = self.clocks.next_op_id(actor);
                        op.set_op_id(op_id);
                    }

                    let source = if is_local {
                        OpSource::UndoRedoReconnect
                    } else {
                        match op.op_id() {
                            Some(op_id) if self.offline_ops.remove(&op_id).is_some() => {
                                OpSource::Ack
                            }
                            _ => OpSource::Remote,
                        }
                    };

                    let result = apply_op(&mut self.store, op, source);
                    if result.modified.is_empty() {
                        continue;
                    }
                    for update in result.modified {
                        if op.is_create() {
                            // The attach was reported against the parent;
                            // whatever lands under that node later in this
                            // pass is covered by this report.
                            created.insert(update.id);
                        }
                        // A node whose parent was created earlier in this
                        // same pass is covered by the parent's own update.
                        let parent_created = self
                            .store
                            .get(update.id)
                            .and_then(|node| node.parent().id())
                            .is_some_and(|parent| created.contains(&parent));
                        if !parent_created {
                            accumulate(&mut updates.storage, update);
                        }
                    }
                    reverse.splice(0..0, result.reverse.into_iter().map(HistoryItem::Op));
                }
            }
        }

        if let Some(batch) = self.batch.as_mut() {
            batch.created = created;
        }
        (reverse, updates)
    }

    /// Apply a remote op stream, resolving acks against the offline map.
    pub(crate) fn apply_remote_ops(&mut self, ops: Vec<syncroom_crdt::Op>) -> PendingUpdates {
        let mut items: Vec<HistoryItem> = ops.into_iter().map(HistoryItem::Op).collect();
        let (_reverse, updates) = self.apply_items(&mut items, false);
        updates
    }
}
