//! Throttled outbound coalescing and the offline op ledger.

use crate::effects::ReadyState;
use crate::presence::BufferKind;
use crate::protocol::{encode_frame, ClientMessage, PresenceScope};
use crate::room::Room;

impl Room {
    /// Called after every local mutation and whenever the flush timer fires.
    ///
    /// Buffered storage ops are recorded as offline ops first, socket or no
    /// socket; they stay recorded until the server echoes them back.
    pub(crate) fn try_flushing(&mut self) {
        for op in &self.out_storage_ops {
            let op_id = op
                .op_id()
                .expect("buffered storage op was never assigned an op id");
            self.offline_ops.insert(op_id, op.clone());
        }

        let open = self
            .socket
            .as_ref()
            .is_some_and(|socket| socket.ready_state() == ReadyState::Open);
        if !open {
            self.out_storage_ops.clear();
            return;
        }

        let now = self.effects.now_ms();
        let elapsed = match self.last_flush_at {
            Some(last) => now.saturating_sub(last),
            None => u64::MAX,
        };
        if elapsed > self.config.throttle_ms {
            let messages = self.compose_flush();
            if messages.is_empty() {
                return;
            }
            let frame = encode_frame(&messages);
            self.send_frame(&frame);
            self.last_flush_at = Some(now);
        } else {
            if let Some(timer) = self.timers.flush.take() {
                self.effects.clear_timer(timer);
            }
            self.timers.flush = Some(
                self.effects
                    .delay_flush(self.config.throttle_ms - elapsed),
            );
        }
    }

    pub fn on_flush_timer(&mut self) {
        self.timers.flush = None;
        self.try_flushing();
    }

    /// Drain the buffers into an ordered message list: presence first, then
    /// queued client messages, then a single storage message.
    fn compose_flush(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        if let Some(pending) = self.presence_buffer.take() {
            let scope = match pending.kind {
                BufferKind::Full => PresenceScope::FullBroadcast,
                BufferKind::Partial => PresenceScope::Partial,
            };
            messages.push(ClientMessage::UpdatePresence {
                data: pending.data,
                scope,
            });
        }
        messages.append(&mut self.out_messages);
        if !self.out_storage_ops.is_empty() {
            messages.push(ClientMessage::UpdateStorage {
                ops: std::mem::take(&mut self.out_storage_ops),
            });
        }
        messages
    }

    pub(crate) fn send_frame(&mut self, frame: &str) {
        let socket = self
            .socket
            .as_mut()
            .expect("attempted to send with no active socket");
        socket.send(frame);
    }
}
