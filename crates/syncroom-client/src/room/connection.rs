//! Connection lifecycle: auth, open/close, backoff, heartbeat.

use tracing::{debug, error, warn};

use crate::auth::{AuthRequest, AuthToken};
use crate::effects::{ReadyState, Socket};
use crate::error::{AuthError, RoomError};
use crate::presence::{OthersEvent, PresenceBuffer};
use crate::protocol::ClientMessage;
use crate::room::{ConnectionInfo, ConnectionState, Room};

pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const PONG_TIMEOUT_MS: u64 = 2_000;

/// Server-instructed terminal close; the room stays closed until the caller
/// reconnects explicitly.
pub const CLOSE_WITHOUT_RETRY: u16 = 4999;

/// Retry delays for transient failures, indexed by retry count.
const BACKOFF_FAST_MS: [u64; 7] = [250, 500, 1000, 2000, 4000, 8000, 10_000];
/// Retry delays after a server-semantic (4000-range) close.
const BACKOFF_SLOW_MS: [u64; 4] = [2000, 30_000, 60_000, 300_000];

fn backoff(table: &[u64], retries: u32) -> u64 {
    let index = (retries.saturating_sub(1) as usize).min(table.len() - 1);
    table[index]
}

impl Room {
    /// Start connecting. A no-op unless the room is closed or waiting out a
    /// transient failure.
    pub fn connect(&mut self) {
        match self.connection {
            ConnectionState::Closed | ConnectionState::Unavailable => {}
            _ => return,
        }
        self.set_connection(ConnectionState::Authenticating);

        let now_secs = self.effects.now_ms() / 1000;
        let cached_token = self
            .token
            .as_ref()
            .filter(|token| !token.is_expired(now_secs))
            .map(|token| token.raw.clone());
        let request = AuthRequest {
            room: self.config.room_id.clone(),
            endpoint: self.config.auth.clone(),
            cached_token,
        };
        self.effects.authenticate(request);
    }

    /// Host callback: authentication produced a token and a fresh socket.
    pub fn authentication_success(&mut self, raw_token: &str, socket: Box<dyn Socket>) {
        let token = match AuthToken::parse(raw_token) {
            Ok(token) => token,
            Err(error) => {
                self.authentication_failure(error);
                return;
            }
        };
        debug!(actor = token.actor, room = %self.config.room_id, "authenticated");
        self.clocks.reset();
        self.socket = Some(socket);
        let info = ConnectionInfo {
            id: token.actor,
            user_id: token.user_id.clone(),
            user_info: token.user_info.clone(),
        };
        self.token = Some(token);
        self.set_connection(ConnectionState::Connecting(info));
    }

    /// Host callback: authentication failed. Retries with fast backoff.
    pub fn authentication_failure(&mut self, error: AuthError) {
        warn!(%error, room = %self.config.room_id, "authentication failed, retrying");
        self.set_connection(ConnectionState::Unavailable);
        self.num_retries += 1;
        self.arm_reconnect(backoff(&BACKOFF_FAST_MS, self.num_retries));
    }

    // ── Socket events ──────────────────────────────────────────────────────

    pub fn on_socket_open(&mut self) {
        self.restart_heartbeat();
        if let ConnectionState::Connecting(info) = &self.connection {
            let info = info.clone();
            self.num_retries = 0;
            self.set_connection(ConnectionState::Open(info));
        }

        if self.last_connection_id.is_some() {
            // Reconnection: peers dropped our presence with the old
            // connection, so announce it whole, and refresh storage.
            self.presence_buffer = Some(PresenceBuffer::full(self.me.clone()));
            if self.store.is_loaded() {
                self.out_messages.push(ClientMessage::FetchStorage);
            }
        }
        self.last_connection_id = self.connection.connection_id();
        self.try_flushing();
    }

    pub fn on_socket_close(&mut self, code: u16, reason: &str) {
        self.clear_all_timers();
        self.socket = None;
        self.users.clear();
        self.fire_others(OthersEvent::Reset);

        if (4000..=4100).contains(&code) {
            error!(code, reason, "room connection rejected by server");
            self.set_connection(ConnectionState::Failed);
            let room_error = RoomError {
                code,
                reason: reason.to_owned(),
            };
            self.fire_error(&room_error);
            self.set_connection(ConnectionState::Unavailable);
            self.num_retries += 1;
            self.arm_reconnect(backoff(&BACKOFF_SLOW_MS, self.num_retries));
        } else if code == CLOSE_WITHOUT_RETRY {
            debug!(code, reason, "connection closed without retry");
            self.set_connection(ConnectionState::Closed);
        } else {
            debug!(code, reason, "connection lost, retrying");
            self.set_connection(ConnectionState::Unavailable);
            self.num_retries += 1;
            self.arm_reconnect(backoff(&BACKOFF_FAST_MS, self.num_retries));
        }
    }

    pub fn on_socket_error(&mut self) {
        warn!(room = %self.config.room_id, "socket error");
    }

    // ── Heartbeat ──────────────────────────────────────────────────────────

    pub fn on_heartbeat(&mut self) {
        let open = self
            .socket
            .as_ref()
            .is_some_and(|socket| socket.ready_state() == ReadyState::Open);
        if !open {
            return;
        }
        if let Some(socket) = self.socket.as_mut() {
            socket.send("ping");
        }
        if let Some(timer) = self.timers.pong.take() {
            self.effects.clear_timer(timer);
        }
        self.timers.pong = Some(self.effects.schedule_pong_timeout(PONG_TIMEOUT_MS));
    }

    pub fn on_pong_timeout(&mut self) {
        self.timers.pong = None;
        debug!("pong timeout, tearing the socket down");
        self.reconnect();
    }

    pub fn on_reconnect_timer(&mut self) {
        self.timers.reconnect = None;
        self.connect();
    }

    // ── External conditions ────────────────────────────────────────────────

    /// Host hint: the page became visible. Probe the socket immediately so a
    /// connection that died during sleep is detected without waiting out the
    /// heartbeat interval.
    pub fn on_visibility_change(&mut self, visible: bool) {
        if visible && self.connection.is_open() {
            self.on_heartbeat();
        }
    }

    /// Host hint: the network came back.
    pub fn on_navigator_online(&mut self) {
        if matches!(self.connection, ConnectionState::Unavailable) {
            self.reconnect();
        }
    }

    // ── Teardown ───────────────────────────────────────────────────────────

    /// Full socket teardown followed by a fresh [`Room::connect`].
    pub fn reconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        self.clear_all_timers();
        self.set_connection(ConnectionState::Unavailable);
        self.connect();
    }

    /// Tear everything down. Idempotent; terminal until the next `connect`.
    pub fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        self.clear_all_timers();
        self.set_connection(ConnectionState::Closed);
        self.users.clear();
        self.fire_others(OthersEvent::Reset);
        self.listeners.clear();
    }

    /// Test hook: force a server-style close on the live socket.
    pub fn simulate_close(&mut self, code: u16, reason: &str) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        self.on_socket_close(code, reason);
    }

    // ── Internals ──────────────────────────────────────────────────────────

    pub(crate) fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == state {
            return;
        }
        self.connection = state;
        self.fire_connection();
    }

    pub(crate) fn restart_heartbeat(&mut self) {
        if let Some(timer) = self.timers.heartbeat.take() {
            self.effects.clear_timer(timer);
        }
        self.timers.heartbeat = Some(
            self.effects
                .start_heartbeat_interval(HEARTBEAT_INTERVAL_MS),
        );
    }

    fn arm_reconnect(&mut self, delay_ms: u64) {
        if let Some(timer) = self.timers.reconnect.take() {
            self.effects.clear_timer(timer);
        }
        self.timers.reconnect = Some(self.effects.schedule_reconnect(delay_ms));
    }

    pub(crate) fn clear_all_timers(&mut self) {
        for timer in [
            self.timers.flush.take(),
            self.timers.heartbeat.take(),
            self.timers.pong.take(),
            self.timers.reconnect.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.effects.clear_timer(timer);
        }
    }
}
