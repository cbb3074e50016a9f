//! Item ids and the per-connection clock pair.
//!
//! Every node and every operation is identified by an [`ItemId`], printed on
//! the wire as `"{actor}:{clock}"`. The actor component is the server-assigned
//! connection id of the creator; the clock component is local to that
//! connection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("item id is missing the ':' separator: {0:?}")]
    MissingSeparator(String),
    #[error("item id has a non-numeric component: {0:?}")]
    BadComponent(String),
}

/// A `(actor, clock)` pair identifying a node or an operation.
///
/// Ordering is actor-major so that [`BTreeMap`](std::collections::BTreeMap)
/// keyed by id iterates deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId {
    pub actor: u32,
    pub clock: u64,
}

impl ItemId {
    pub const fn new(actor: u32, clock: u64) -> Self {
        Self { actor, clock }
    }

    /// The root node of a storage tree created by `actor`.
    pub const fn root(actor: u32) -> Self {
        Self { actor, clock: 0 }
    }
}

/// Shorthand constructor.
#[inline]
pub fn item_id(actor: u32, clock: u64) -> ItemId {
    ItemId::new(actor, clock)
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor, self.clock)
    }
}

impl FromStr for ItemId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (actor, clock) = s
            .split_once(':')
            .ok_or_else(|| IdParseError::MissingSeparator(s.to_owned()))?;
        let actor = actor
            .parse::<u32>()
            .map_err(|_| IdParseError::BadComponent(s.to_owned()))?;
        let clock = clock
            .parse::<u64>()
            .map_err(|_| IdParseError::BadComponent(s.to_owned()))?;
        Ok(Self { actor, clock })
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Two monotonically increasing counters, one for node ids and one for op
/// ids. Reset whenever a new connection is established.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockPair {
    clock: u64,
    op_clock: u64,
}

impl ClockPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next node id for `actor`. Clock `0` is reserved for the root.
    pub fn next_id(&mut self, actor: u32) -> ItemId {
        self.clock += 1;
        ItemId::new(actor, self.clock)
    }

    /// Next op id for `actor`.
    pub fn next_op_id(&mut self, actor: u32) -> ItemId {
        self.op_clock += 1;
        ItemId::new(actor, self.op_clock)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
