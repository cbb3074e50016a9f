//! Storage tree for syncroom.
//!
//! A room's storage is a server-ordered tree of typed CRDT nodes. This crate
//! holds everything below the connection machinery:
//!
//! | Module       | Responsibility                                         |
//! |--------------|--------------------------------------------------------|
//! | [`id`]       | `{actor}:{clock}` item ids and the per-connection clock|
//! | [`op`]       | The operation sum type and its wire codec              |
//! | [`position`] | Fractional list positions                              |
//! | [`nodes`]    | Object / List / Map / Register node state              |
//! | [`store`]    | Id-keyed node registry, load and serialization         |
//! | [`engine`]   | Applies one op to the tree, returns reverse + summary  |
//! | [`diff`]     | Synthetic op stream between two serialized snapshots   |
//! | [`update`]   | Per-node change summaries and their merge rule         |

pub mod diff;
pub mod engine;
pub mod id;
pub mod nodes;
pub mod op;
pub mod position;
pub mod store;
pub mod update;

/// JSON object payloads as they appear in presence and node data.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

pub use diff::storage_diff_ops;
pub use engine::{apply_op, ApplyResult, OpSource};
pub use id::{item_id, ClockPair, IdParseError, ItemId};
pub use nodes::{CrdtKind, CrdtNode, Parent, SerializedCrdt};
pub use op::{Op, OpCode, WireError};
pub use store::{NodeStore, StorageError};
pub use update::{accumulate, merge_node_updates, KeyChange, NodeChange, NodeUpdate};
