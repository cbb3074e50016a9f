//! Wire protocol: framed JSON messages discriminated by an integer `type`.
//!
//! `"ping"` / `"pong"` are control frames and never reach this codec. Every
//! other frame is a JSON object (one message) or array (batch).

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use syncroom_crdt::op::{opt_string, req_u64};
use syncroom_crdt::{ItemId, JsonObject, Op, SerializedCrdt};

use crate::error::ProtocolError;

// Client → server discriminants.
pub const CLIENT_UPDATE_PRESENCE: u64 = 100;
pub const CLIENT_BROADCAST_EVENT: u64 = 103;
pub const CLIENT_FETCH_STORAGE: u64 = 200;
pub const CLIENT_UPDATE_STORAGE: u64 = 201;

// Server → client discriminants.
pub const SERVER_UPDATE_PRESENCE: u64 = 100;
pub const SERVER_USER_JOINED: u64 = 101;
pub const SERVER_USER_LEFT: u64 = 102;
pub const SERVER_BROADCASTED_EVENT: u64 = 103;
pub const SERVER_ROOM_STATE: u64 = 104;
pub const SERVER_INITIAL_STORAGE_STATE: u64 = 200;
pub const SERVER_UPDATE_STORAGE: u64 = 201;

/// Scope of an outgoing presence update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceScope {
    /// Changed keys only; no `targetActor` on the wire.
    Partial,
    /// Entire presence, to everyone; `targetActor: -1`.
    FullBroadcast,
    /// Entire presence, to one newcomer; `targetActor: <actor>`.
    Targeted(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    UpdatePresence {
        data: JsonObject,
        scope: PresenceScope,
    },
    BroadcastEvent {
        event: Value,
    },
    FetchStorage,
    UpdateStorage {
        ops: Vec<Op>,
    },
}

impl ClientMessage {
    pub fn to_wire(&self) -> Value {
        let mut out = Map::new();
        match self {
            ClientMessage::UpdatePresence { data, scope } => {
                out.insert("type".into(), CLIENT_UPDATE_PRESENCE.into());
                out.insert("data".into(), Value::Object(data.clone()));
                match scope {
                    PresenceScope::Partial => {}
                    PresenceScope::FullBroadcast => {
                        out.insert("targetActor".into(), (-1).into());
                    }
                    PresenceScope::Targeted(actor) => {
                        out.insert("targetActor".into(), (*actor).into());
                    }
                }
            }
            ClientMessage::BroadcastEvent { event } => {
                out.insert("type".into(), CLIENT_BROADCAST_EVENT.into());
                out.insert("event".into(), event.clone());
            }
            ClientMessage::FetchStorage => {
                out.insert("type".into(), CLIENT_FETCH_STORAGE.into());
            }
            ClientMessage::UpdateStorage { ops } => {
                out.insert("type".into(), CLIENT_UPDATE_STORAGE.into());
                out.insert(
                    "ops".into(),
                    Value::Array(ops.iter().map(Op::to_wire).collect()),
                );
            }
        }
        Value::Object(out)
    }
}

/// Encode one outbound frame: a bare object for a single message, an array
/// otherwise.
pub fn encode_frame(messages: &[ClientMessage]) -> String {
    let value = match messages {
        [single] => single.to_wire(),
        many => Value::Array(many.iter().map(ClientMessage::to_wire).collect()),
    };
    value.to_string()
}

/// Identity and metadata of a peer as seeded by a room-state message.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerMeta {
    pub id: Option<String>,
    pub info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    UpdatePresence {
        actor: u32,
        data: JsonObject,
        target_actor: Option<u32>,
    },
    UserJoined {
        actor: u32,
        id: Option<String>,
        info: Option<Value>,
    },
    UserLeft {
        actor: u32,
    },
    BroadcastedEvent {
        actor: u32,
        event: Value,
    },
    RoomState {
        users: BTreeMap<u32, PeerMeta>,
    },
    InitialStorageState {
        items: Vec<(ItemId, SerializedCrdt)>,
    },
    UpdateStorage {
        ops: Vec<Op>,
    },
}

impl ServerMessage {
    pub fn from_wire(value: &Value) -> Result<Self, ProtocolError> {
        let obj = value.as_object().ok_or(ProtocolError::NotAnObject)?;
        let message = match req_u64(obj, "type")? {
            SERVER_UPDATE_PRESENCE => ServerMessage::UpdatePresence {
                actor: req_actor(obj)?,
                data: req_data_object(obj)?,
                target_actor: match obj.get("targetActor") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(
                        v.as_u64()
                            .and_then(|a| u32::try_from(a).ok())
                            .ok_or(syncroom_crdt::WireError::BadField("targetActor"))?,
                    ),
                },
            },
            SERVER_USER_JOINED => ServerMessage::UserJoined {
                actor: req_actor(obj)?,
                id: opt_string(obj, "id")?,
                info: obj.get("info").filter(|v| !v.is_null()).cloned(),
            },
            SERVER_USER_LEFT => ServerMessage::UserLeft {
                actor: req_actor(obj)?,
            },
            SERVER_BROADCASTED_EVENT => ServerMessage::BroadcastedEvent {
                actor: req_actor(obj)?,
                event: obj
                    .get("event")
                    .cloned()
                    .ok_or(syncroom_crdt::WireError::MissingField("event"))?,
            },
            SERVER_ROOM_STATE => {
                let raw = obj
                    .get("users")
                    .and_then(Value::as_object)
                    .ok_or(syncroom_crdt::WireError::MissingField("users"))?;
                let mut users = BTreeMap::new();
                for (actor, meta) in raw {
                    let actor: u32 = actor
                        .parse()
                        .map_err(|_| syncroom_crdt::WireError::BadField("users"))?;
                    let meta = meta
                        .as_object()
                        .ok_or(syncroom_crdt::WireError::BadField("users"))?;
                    users.insert(
                        actor,
                        PeerMeta {
                            id: opt_string(meta, "id")?,
                            info: meta.get("info").filter(|v| !v.is_null()).cloned(),
                        },
                    );
                }
                ServerMessage::RoomState { users }
            }
            SERVER_INITIAL_STORAGE_STATE => {
                let raw = obj
                    .get("items")
                    .and_then(Value::as_array)
                    .ok_or(syncroom_crdt::WireError::MissingField("items"))?;
                let mut items = Vec::with_capacity(raw.len());
                for pair in raw {
                    let [id, serialized] = pair
                        .as_array()
                        .and_then(|p| <&[Value; 2]>::try_from(p.as_slice()).ok())
                        .ok_or(syncroom_crdt::WireError::BadField("items"))?;
                    let id: ItemId = id
                        .as_str()
                        .ok_or(syncroom_crdt::WireError::BadField("items"))?
                        .parse()
                        .map_err(syncroom_crdt::WireError::BadId)?;
                    items.push((id, SerializedCrdt::from_wire(serialized)?));
                }
                ServerMessage::InitialStorageState { items }
            }
            SERVER_UPDATE_STORAGE => ServerMessage::UpdateStorage {
                ops: req_ops(obj)?,
            },
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };
        Ok(message)
    }
}

/// Decode one inbound frame into its message batch.
pub fn decode_frame(text: &str) -> Result<Vec<ServerMessage>, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::NotJson(e.to_string()))?;
    match value {
        Value::Array(items) => items.iter().map(ServerMessage::from_wire).collect(),
        other => Ok(vec![ServerMessage::from_wire(&other)?]),
    }
}

fn req_actor(obj: &Map<String, Value>) -> Result<u32, ProtocolError> {
    u32::try_from(req_u64(obj, "actor")?)
        .map_err(|_| syncroom_crdt::WireError::BadField("actor").into())
}

fn req_data_object(obj: &Map<String, Value>) -> Result<JsonObject, ProtocolError> {
    Ok(syncroom_crdt::op::req_object(obj, "data")?)
}

fn req_ops(obj: &Map<String, Value>) -> Result<Vec<Op>, ProtocolError> {
    let raw = obj
        .get("ops")
        .and_then(Value::as_array)
        .ok_or(syncroom_crdt::WireError::MissingField("ops"))?;
    Ok(raw
        .iter()
        .map(Op::from_wire)
        .collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use syncroom_crdt::item_id;

    fn data(value: Value) -> JsonObject {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn single_message_frames_are_bare_objects() {
        let frame = encode_frame(&[ClientMessage::FetchStorage]);
        assert_eq!(frame, r#"{"type":200}"#);
    }

    #[test]
    fn multi_message_frames_are_arrays() {
        let frame = encode_frame(&[
            ClientMessage::UpdatePresence {
                data: data(json!({"x": 1})),
                scope: PresenceScope::FullBroadcast,
            },
            ClientMessage::FetchStorage,
        ]);
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            parsed,
            json!([
                {"type": 100, "data": {"x": 1}, "targetActor": -1},
                {"type": 200}
            ])
        );
    }

    #[test]
    fn presence_scopes_encode_target_actor() {
        let partial = ClientMessage::UpdatePresence {
            data: data(json!({})),
            scope: PresenceScope::Partial,
        };
        assert!(partial.to_wire().get("targetActor").is_none());

        let targeted = ClientMessage::UpdatePresence {
            data: data(json!({})),
            scope: PresenceScope::Targeted(7),
        };
        assert_eq!(targeted.to_wire()["targetActor"], json!(7));
    }

    #[test]
    fn decodes_server_batch() {
        let frame = json!([
            {"type": 101, "actor": 3, "id": "u3"},
            {"type": 100, "actor": 3, "data": {"cursor": 5}},
            {"type": 102, "actor": 3},
        ])
        .to_string();
        let messages = decode_frame(&frame).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0],
            ServerMessage::UserJoined {
                actor: 3,
                id: Some("u3".into()),
                info: None
            }
        );
        assert!(
            matches!(&messages[1], ServerMessage::UpdatePresence { actor: 3, target_actor: None, .. })
        );
    }

    #[test]
    fn decodes_initial_storage() {
        let frame = json!({
            "type": 200,
            "items": [
                ["1:0", {"type": 0, "data": {"a": 1}}],
                ["1:1", {"type": 3, "parentId": "1:0", "parentKey": "r", "data": 9}],
            ]
        })
        .to_string();
        let messages = decode_frame(&frame).unwrap();
        match &messages[0] {
            ServerMessage::InitialStorageState { items } => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].0, item_id(1, 0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn update_storage_round_trips_ops() {
        let op = Op::DeleteCrdt {
            op_id: Some(item_id(2, 1)),
            id: item_id(1, 4),
        };
        let frame = encode_frame(&[ClientMessage::UpdateStorage { ops: vec![op.clone()] }]);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, vec![ServerMessage::UpdateStorage { ops: vec![op] }]);
    }

    #[test]
    fn unknown_type_and_garbage_are_errors() {
        assert!(matches!(
            decode_frame(r#"{"type": 555}"#),
            Err(ProtocolError::UnknownMessageType(555))
        ));
        assert!(matches!(
            decode_frame("not json"),
            Err(ProtocolError::NotJson(_))
        ));
    }
}
