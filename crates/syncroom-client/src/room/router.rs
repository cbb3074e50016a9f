//! Inbound frame routing.
//!
//! Control frames are handled inline; JSON frames are decoded into message
//! batches and dispatched. Storage diffs from one frame are merged per node
//! and emitted as a single notification; presence events fire per message.

use serde_json::Value;
use tracing::warn;

use syncroom_crdt::JsonObject;

use crate::presence::{merge_presence, OthersEvent, UserEntry};
use crate::protocol::{decode_frame, ClientMessage, PeerMeta, PresenceScope, ServerMessage};
use crate::room::{PendingUpdates, Room};
use crate::subscriptions::CustomEvent;

impl Room {
    pub fn on_socket_message(&mut self, frame: &str) {
        if frame == "pong" {
            if let Some(timer) = self.timers.pong.take() {
                self.effects.clear_timer(timer);
            }
            return;
        }
        if frame == "ping" {
            return;
        }

        let messages = match decode_frame(frame) {
            Ok(messages) => messages,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return;
            }
        };

        let mut updates = PendingUpdates::default();
        for message in messages {
            match message {
                ServerMessage::UserJoined { actor, id, info } => {
                    self.handle_user_joined(actor, id, info);
                }
                ServerMessage::UpdatePresence {
                    actor,
                    data,
                    target_actor,
                } => {
                    self.handle_update_presence(actor, data, target_actor);
                }
                ServerMessage::UserLeft { actor } => {
                    if self.users.remove(&actor).is_some() {
                        self.fire_others(OthersEvent::Leave {
                            connection_id: actor,
                        });
                    }
                }
                ServerMessage::RoomState { users } => {
                    self.handle_room_state(users);
                }
                ServerMessage::BroadcastedEvent { actor, event } => {
                    self.fire_event(CustomEvent { actor, event });
                }
                ServerMessage::InitialStorageState { items } => {
                    updates.merge(self.handle_initial_storage(items));
                }
                ServerMessage::UpdateStorage { ops } => {
                    updates.merge(self.apply_remote_ops(ops));
                }
            }
        }
        self.notify_updates(updates);
    }

    fn handle_user_joined(&mut self, actor: u32, id: Option<String>, info: Option<Value>) {
        self.users.insert(
            actor,
            UserEntry {
                connection_id: actor,
                id,
                info,
                presence: None,
                // The newcomer's full presence arrives separately; diffs seen
                // before it are unusable.
                has_received_initial_presence: false,
            },
        );
        self.fire_others(OthersEvent::Enter {
            connection_id: actor,
        });
        // Introduce ourselves to the newcomer only.
        self.out_messages.push(ClientMessage::UpdatePresence {
            data: self.me.clone(),
            scope: PresenceScope::Targeted(actor),
        });
        self.try_flushing();
    }

    fn handle_update_presence(
        &mut self,
        actor: u32,
        data: JsonObject,
        target_actor: Option<u32>,
    ) {
        match self.users.get_mut(&actor) {
            None => {
                self.users.insert(
                    actor,
                    UserEntry {
                        connection_id: actor,
                        id: None,
                        info: None,
                        presence: Some(data.clone()),
                        has_received_initial_presence: true,
                    },
                );
            }
            Some(entry) => {
                if !entry.has_received_initial_presence && target_actor.is_none() {
                    // A diff against nothing; the targeted full presence has
                    // not arrived yet.
                    return;
                }
                if target_actor.is_some() {
                    entry.presence = Some(data.clone());
                    entry.has_received_initial_presence = true;
                } else {
                    merge_presence(entry.presence.get_or_insert_with(JsonObject::new), &data);
                }
            }
        }
        self.fire_others(OthersEvent::Update {
            connection_id: actor,
            updated: data,
        });
    }

    fn handle_room_state(&mut self, users: std::collections::BTreeMap<u32, PeerMeta>) {
        self.users = users
            .into_iter()
            .map(|(actor, meta)| {
                (
                    actor,
                    UserEntry {
                        connection_id: actor,
                        id: meta.id,
                        info: meta.info,
                        presence: None,
                        has_received_initial_presence: false,
                    },
                )
            })
            .collect();
        self.fire_others(OthersEvent::Reset);
    }
}
