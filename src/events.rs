//! Instrumentation events.
//!
//! The engine reports every request/response transition and every
//! connection-level transition to an [`EventHandler`] threaded through its
//! operations. Handlers run inline and must not block; implementations that
//! only care about a few events lean on the default no-op methods.
//!
//! DNS, TLS, push-lifecycle, cancel-lifecycle and WebSocket events are
//! reserved for the wider client and have no hooks here.

use crate::hpack::Header;
use crate::messages::{ErrorCause, ReplyTo};
use crate::stream_table::StreamRef;

/// The engine came up on a freshly connected transport.
#[derive(Debug, Clone)]
pub struct ConnectionInit {
    pub scheme: &'static str,
}

/// A connection attempt started (raised by the owning client, not the
/// engine).
#[derive(Debug, Clone)]
pub struct ConnectStart {
    pub authority: String,
}

/// A connection attempt finished (raised by the owning client).
#[derive(Debug, Clone)]
pub struct ConnectEnd {
    pub authority: String,
}

#[derive(Debug, Clone)]
pub struct RequestStart {
    pub stream_ref: StreamRef,
    pub method: String,
    pub authority: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct RequestHeaders {
    pub stream_ref: StreamRef,
    pub method: String,
    pub authority: String,
    pub path: String,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestEnd {
    pub stream_ref: StreamRef,
}

#[derive(Debug, Clone)]
pub struct ResponseStart {
    pub stream_ref: StreamRef,
    pub reply_to: ReplyTo,
}

#[derive(Debug, Clone)]
pub struct ResponseInform {
    pub stream_ref: StreamRef,
    pub status: u16,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone)]
pub struct ResponseHeaders {
    pub stream_ref: StreamRef,
    pub status: u16,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone)]
pub struct ResponseTrailers {
    pub stream_ref: StreamRef,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseEnd {
    pub stream_ref: StreamRef,
}

/// The coordinator closed the engine after losing the transport.
#[derive(Debug, Clone)]
pub struct Disconnect {
    pub reason: &'static str,
}

/// The engine terminated: connection error, GOAWAY, or owner stop.
#[derive(Debug, Clone)]
pub struct Terminate {
    pub cause: ErrorCause,
}

/// Telemetry sink. One method per event; every method defaults to a no-op
/// so the engine can always call through.
pub trait EventHandler {
    fn init(&mut self, _event: &ConnectionInit) {}
    fn connect_start(&mut self, _event: &ConnectStart) {}
    fn connect_end(&mut self, _event: &ConnectEnd) {}
    fn request_start(&mut self, _event: &RequestStart) {}
    fn request_headers(&mut self, _event: &RequestHeaders) {}
    fn request_end(&mut self, _event: &RequestEnd) {}
    fn response_start(&mut self, _event: &ResponseStart) {}
    fn response_inform(&mut self, _event: &ResponseInform) {}
    fn response_headers(&mut self, _event: &ResponseHeaders) {}
    fn response_trailers(&mut self, _event: &ResponseTrailers) {}
    fn response_end(&mut self, _event: &ResponseEnd) {}
    fn disconnect(&mut self, _event: &Disconnect) {}
    fn terminate(&mut self, _event: &Terminate) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventHandler;

impl EventHandler for NoopEventHandler {}
