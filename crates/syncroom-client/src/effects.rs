//! Injected side-effect surface.
//!
//! The machine is a plain synchronous struct; everything asynchronous
//! (fetching tokens, socket I/O, timers) is behind these traits. The host
//! runtime implements them and feeds completions back through the `Room`'s
//! entry points (`authentication_success`, `on_socket_message`,
//! `on_flush_timer`, ...), which is also exactly how the test harness drives
//! the machine with a virtual clock.

use crate::auth::AuthRequest;

/// Opaque handle for a scheduled timer.
pub type TimerId = u64;

/// Outbound effect requests. Each `schedule_*`/`delay_*` call returns a
/// handle the machine may later pass to [`Effects::clear_timer`]; firing a
/// cleared timer must be a no-op.
pub trait Effects {
    /// Run one authentication attempt, then call
    /// `Room::authentication_success` or `Room::authentication_failure`.
    fn authenticate(&mut self, request: AuthRequest);

    /// Monotonic wall-clock milliseconds; drives flush throttling.
    fn now_ms(&self) -> u64;

    /// One-shot timer ending in `Room::on_flush_timer`.
    fn delay_flush(&mut self, delay_ms: u64) -> TimerId;

    /// Repeating timer ending in `Room::on_heartbeat`.
    fn start_heartbeat_interval(&mut self, interval_ms: u64) -> TimerId;

    /// One-shot timer ending in `Room::on_pong_timeout`.
    fn schedule_pong_timeout(&mut self, delay_ms: u64) -> TimerId;

    /// One-shot timer ending in `Room::on_reconnect_timer`.
    fn schedule_reconnect(&mut self, delay_ms: u64) -> TimerId;

    fn clear_timer(&mut self, timer: TimerId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A full-duplex text-framed connection. Inbound traffic enters the machine
/// through `Room::on_socket_open` / `on_socket_message` / `on_socket_close` /
/// `on_socket_error`; the machine never learns transport details.
pub trait Socket {
    fn send(&mut self, frame: &str);
    fn close(&mut self);
    fn ready_state(&self) -> ReadyState;
}
