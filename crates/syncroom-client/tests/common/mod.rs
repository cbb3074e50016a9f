#![allow(dead_code)]

//! Shared harness: a recording [`Effects`] double with a virtual clock and a
//! scripted socket, plus helpers to drive a [`Room`] through whole
//! connection lifecycles.

use std::cell::RefCell;
use std::rc::Rc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{json, Value};

use syncroom_client::auth::AuthRequest;
use syncroom_client::{
    AuthEndpoint, Effects, ReadyState, Room, RoomConfig, Socket, TimerId,
};
use syncroom_crdt::JsonObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Flush,
    Heartbeat,
    Pong,
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct RecordedTimer {
    pub id: TimerId,
    pub kind: TimerKind,
    pub delay_ms: u64,
    pub cleared: bool,
}

#[derive(Debug, Default)]
pub struct EffectsLog {
    pub now_ms: u64,
    pub auth_requests: Vec<AuthRequest>,
    pub timers: Vec<RecordedTimer>,
    next_timer: TimerId,
}

impl EffectsLog {
    fn arm(&mut self, kind: TimerKind, delay_ms: u64) -> TimerId {
        self.next_timer += 1;
        let id = self.next_timer;
        self.timers.push(RecordedTimer {
            id,
            kind,
            delay_ms,
            cleared: false,
        });
        id
    }

    /// Latest armed-and-not-cleared timer of `kind`.
    pub fn armed(&self, kind: TimerKind) -> Option<RecordedTimer> {
        self.timers
            .iter()
            .rev()
            .find(|t| t.kind == kind && !t.cleared)
            .cloned()
    }
}

pub struct MockEffects {
    pub log: Rc<RefCell<EffectsLog>>,
}

impl Effects for MockEffects {
    fn authenticate(&mut self, request: AuthRequest) {
        self.log.borrow_mut().auth_requests.push(request);
    }

    fn now_ms(&self) -> u64 {
        self.log.borrow().now_ms
    }

    fn delay_flush(&mut self, delay_ms: u64) -> TimerId {
        self.log.borrow_mut().arm(TimerKind::Flush, delay_ms)
    }

    fn start_heartbeat_interval(&mut self, interval_ms: u64) -> TimerId {
        self.log.borrow_mut().arm(TimerKind::Heartbeat, interval_ms)
    }

    fn schedule_pong_timeout(&mut self, delay_ms: u64) -> TimerId {
        self.log.borrow_mut().arm(TimerKind::Pong, delay_ms)
    }

    fn schedule_reconnect(&mut self, delay_ms: u64) -> TimerId {
        self.log.borrow_mut().arm(TimerKind::Reconnect, delay_ms)
    }

    fn clear_timer(&mut self, timer: TimerId) {
        if let Some(t) = self
            .log
            .borrow_mut()
            .timers
            .iter_mut()
            .find(|t| t.id == timer)
        {
            t.cleared = true;
        }
    }
}

#[derive(Debug)]
pub struct SocketState {
    pub sent: Vec<String>,
    pub ready: ReadyState,
}

pub struct MockSocket {
    pub state: Rc<RefCell<SocketState>>,
}

impl MockSocket {
    pub fn open() -> (Self, Rc<RefCell<SocketState>>) {
        let state = Rc::new(RefCell::new(SocketState {
            sent: Vec::new(),
            ready: ReadyState::Open,
        }));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl Socket for MockSocket {
    fn send(&mut self, frame: &str) {
        self.state.borrow_mut().sent.push(frame.to_owned());
    }

    fn close(&mut self) {
        self.state.borrow_mut().ready = ReadyState::Closed;
    }

    fn ready_state(&self) -> ReadyState {
        self.state.borrow().ready
    }
}

/// A signed-looking token whose payload decodes to the given claims.
pub fn token_for(actor: u32) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&json!({
            "actor": actor,
            "id": format!("user-{actor}"),
            "info": {"name": format!("peer {actor}")},
            "exp": 4_000_000_000u64,
        }))
        .unwrap(),
    );
    format!("{header}.{payload}.sig")
}

pub fn obj(value: Value) -> JsonObject {
    value.as_object().expect("not a JSON object").clone()
}

pub struct Harness {
    pub room: Room,
    pub fx: Rc<RefCell<EffectsLog>>,
    pub socket: Option<Rc<RefCell<SocketState>>>,
}

impl Harness {
    pub fn new(config: RoomConfig) -> Self {
        let fx = Rc::new(RefCell::new(EffectsLog::default()));
        let room = Room::new(
            config,
            Box::new(MockEffects {
                log: Rc::clone(&fx),
            }),
        );
        Self {
            room,
            fx,
            socket: None,
        }
    }

    pub fn default_config() -> RoomConfig {
        RoomConfig::new(
            "test-room",
            "wss://rooms.test",
            AuthEndpoint::Private {
                url: "https://example.test/auth".into(),
            },
        )
    }

    /// Run connect → auth success → socket open for `actor`.
    pub fn connect_as(&mut self, actor: u32) {
        self.room.connect();
        let (socket, state) = MockSocket::open();
        self.room
            .authentication_success(&token_for(actor), Box::new(socket));
        self.socket = Some(state);
        self.room.on_socket_open();
    }

    pub fn advance(&mut self, ms: u64) {
        self.fx.borrow_mut().now_ms += ms;
    }

    /// Frames written to the current socket so far.
    pub fn sent(&self) -> Vec<String> {
        self.socket
            .as_ref()
            .map(|s| s.borrow().sent.clone())
            .unwrap_or_default()
    }

    /// Parsed JSON frames (control frames skipped).
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .filter(|f| f.as_str() != "ping")
            .map(|f| serde_json::from_str(f).expect("frame was not JSON"))
            .collect()
    }

    pub fn deliver(&mut self, message: Value) {
        self.room.on_socket_message(&message.to_string());
    }

    /// Fire the most recent uncleared timer of `kind` and route it to the
    /// machine's entry point.
    pub fn fire_timer(&mut self, kind: TimerKind) {
        let timer = self
            .fx
            .borrow()
            .armed(kind)
            .expect("no armed timer of that kind");
        if kind != TimerKind::Heartbeat {
            // One-shot timers are consumed by firing.
            self.fx
                .borrow_mut()
                .timers
                .iter_mut()
                .find(|t| t.id == timer.id)
                .unwrap()
                .cleared = true;
        }
        match kind {
            TimerKind::Flush => self.room.on_flush_timer(),
            TimerKind::Heartbeat => self.room.on_heartbeat(),
            TimerKind::Pong => self.room.on_pong_timeout(),
            TimerKind::Reconnect => self.room.on_reconnect_timer(),
        }
    }

    /// A minimal initial-storage message: one empty root object `1:0`.
    pub fn initial_storage_frame() -> Value {
        json!({
            "type": 200,
            "items": [["1:0", {"type": 0, "data": {}}]],
        })
    }
}
