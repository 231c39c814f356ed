//! The engine loop: the stateful shell around the protocol machine.
//!
//! One engine drives one HTTP/2 connection. It owns the transport, the
//! machine and the stream table; the coordinator feeds it inbound byte
//! chunks and outbound application commands, one call at a time. Response
//! messages go to each stream's reply target (fire-and-forget), telemetry
//! goes to the event handler threaded through every operation, and every
//! call reports through [`Control`] whether the connection is still usable.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{InitError, ProtoError};
use crate::events::{
    ConnectionInit, Disconnect, EventHandler, RequestEnd, RequestHeaders, RequestStart,
    ResponseEnd, ResponseHeaders, ResponseInform, ResponseStart, ResponseTrailers, Terminate,
};
use crate::frame::{self, build, Frame, Reason, Verdict};
use crate::hpack::Header;
use crate::machine::{
    Fin, HalfState, Machine, Outcome, OutboundData, ProtocolEvent, PseudoHeaders, SendOutcome,
    StreamId,
};
use crate::messages::{ErrorCause, Message, ReplyTo};
use crate::options::{Keepalive, Options};
use crate::stream_table::{Stream, StreamRef, StreamTable};
use crate::transport::Transport;

/// Headers that must never appear in an HTTP/2 request. `host` is folded
/// into `:authority` instead of being dropped outright.
const HOP_BY_HOP: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Whether the connection survives the operation. `Close` tells the
/// coordinator to tear down the transport; the engine has already delivered
/// a terminal message to every live stream.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Close,
}

/// Introspection snapshot for one stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_ref: StreamRef,
    pub reply_to: ReplyTo,
    pub running: bool,
}

/// A client-side HTTP/2 connection engine.
#[derive(Debug)]
pub struct Engine<T> {
    /// Supervisor notified when the whole engine goes down.
    owner: ReplyTo,
    transport: T,
    opts: Options,
    /// Residual unparsed bytes carried between inbound chunks.
    buffer: BytesMut,
    machine: Machine,
    streams: StreamTable,
    /// Refs that were live when the engine went down.
    down_refs: Vec<StreamRef>,
    closed: bool,
}

impl<T: Transport> Engine<T> {
    /// Bring up an engine on a freshly connected transport. Emits the
    /// connection preface and initial SETTINGS before returning.
    pub fn new<H: EventHandler>(
        owner: ReplyTo,
        transport: T,
        opts: Options,
        evh: &mut H,
    ) -> Result<Self, InitError> {
        opts.validate()?;
        let (preface, machine) = Machine::new(&opts);
        let mut engine = Engine {
            owner,
            transport,
            opts,
            buffer: BytesMut::new(),
            machine,
            streams: StreamTable::new(),
            down_refs: Vec::new(),
            closed: false,
        };
        engine.transport.send(&preface)?;
        evh.init(&ConnectionInit {
            scheme: engine.transport.scheme(),
        });
        debug!(scheme = engine.transport.scheme(), "engine up, preface sent");
        Ok(engine)
    }

    /// The keepalive interval the coordinator should schedule, if any.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        match self.opts.keepalive {
            Keepalive::Infinity => None,
            Keepalive::Interval(interval) => Some(interval),
        }
    }

    /// Refs of the streams that were still live when the engine went down.
    pub fn down(&self) -> &[StreamRef] {
        &self.down_refs
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn stream_info(&self, stream_ref: StreamRef) -> Option<StreamInfo> {
        self.streams.by_ref(stream_ref).map(|stream| StreamInfo {
            stream_ref: stream.stream_ref,
            reply_to: stream.reply_to.clone(),
            running: true,
        })
    }

    // ===== Ingress =====

    /// Consume one inbound chunk from the transport.
    pub fn handle<H: EventHandler>(&mut self, data: &[u8], evh: &mut H) -> Control {
        if self.closed {
            return Control::Close;
        }
        self.buffer.extend_from_slice(data);
        loop {
            let max_frame_size = self.machine.max_frame_size();
            match frame::parse(&self.buffer, max_frame_size) {
                Verdict::More => return Control::Continue,
                Verdict::Ignore { consumed } => {
                    self.buffer.advance(consumed);
                    self.machine.ignored_frame();
                }
                Verdict::StreamError {
                    id,
                    reason,
                    message,
                    consumed,
                } => {
                    self.buffer.advance(consumed);
                    if self.stream_error(id, reason, message) == Control::Close {
                        return Control::Close;
                    }
                }
                Verdict::ConnectionError { reason, message } => {
                    return self.terminate(ErrorCause::Connection { reason, message }, evh);
                }
                Verdict::Frame { frame, consumed } => {
                    self.buffer.advance(consumed);
                    if self.dispatch(frame, evh) == Control::Close {
                        return Control::Close;
                    }
                }
            }
        }
    }

    fn dispatch<H: EventHandler>(&mut self, frame: Frame, evh: &mut H) -> Control {
        // `response_start` must fire before the machine observes the HEADERS
        // that open the remote half; this is its only emission point.
        if let Frame::Headers { id, .. } = &frame {
            if self.machine.remote_state(*id) == Some(HalfState::Idle) {
                if let Some(stream) = self.streams.by_id(*id) {
                    evh.response_start(&ResponseStart {
                        stream_ref: stream.stream_ref,
                        reply_to: stream.reply_to.clone(),
                    });
                }
            }
        }
        // Acks go out only after the machine accepts the frame.
        let ack = match &frame {
            Frame::Settings { ack: false, .. } => Some(build::settings_ack()),
            Frame::Ping {
                ack: false,
                payload,
            } => Some(build::ping(*payload, true)),
            _ => None,
        };
        match self.machine.recv_frame(frame) {
            Ok(outcome) => {
                if let Some(bytes) = ack {
                    if let Err(ctrl) = self.send_bytes(&bytes) {
                        return ctrl;
                    }
                }
                match outcome {
                    Outcome::Consumed => Control::Continue,
                    Outcome::Event(event) => self.dispatch_event(event, evh),
                    Outcome::Unblocked(batches) => self.write_outbound(batches, evh),
                }
            }
            Err(ProtoError::Stream {
                id,
                reason,
                message,
            }) => self.stream_error(id, reason, message),
            Err(ProtoError::Connection { reason, message }) => {
                self.terminate(ErrorCause::Connection { reason, message }, evh)
            }
        }
    }

    fn dispatch_event<H: EventHandler>(&mut self, event: ProtocolEvent, evh: &mut H) -> Control {
        match event {
            ProtocolEvent::Data { id, fin, payload } => self.data_event(id, fin, payload, evh),
            ProtocolEvent::Headers {
                id,
                fin,
                status,
                headers,
                ..
            } => self.headers_event(id, fin, status, headers, evh),
            ProtocolEvent::Trailers { id, headers } => self.trailers_event(id, headers, evh),
            ProtocolEvent::RstStream { id, reason } => self.rst_event(id, reason),
            ProtocolEvent::PushPromise {
                parent_id,
                promised_id,
                method,
                scheme,
                authority,
                path,
                headers,
            } => self.push_event(parent_id, promised_id, method, scheme, authority, path, headers),
            ProtocolEvent::GoAway {
                last_stream_id,
                reason,
                ..
            } => {
                debug!(last_stream_id, %reason, "server is going away");
                self.terminate(
                    ErrorCause::GoingAway {
                        message: "Server is going away.",
                    },
                    evh,
                )
            }
        }
    }

    fn data_event<H: EventHandler>(
        &mut self,
        id: StreamId,
        fin: Fin,
        payload: Bytes,
        evh: &mut H,
    ) -> Control {
        let size = payload.len() as u32;
        let Some(stream) = self.streams.by_id_mut(id) else {
            return Control::Continue;
        };
        let stream_ref = stream.stream_ref;
        if let Some(handler) = stream.handler.as_mut() {
            handler.data(fin, payload);
        }
        if size > 0 {
            // Credit the connection window for every frame, the stream
            // window only when the stream still lives on.
            self.machine.update_window(size);
            if let Err(ctrl) = self.send_bytes(&build::window_update(0, size)) {
                return ctrl;
            }
            if !fin.is_fin() {
                self.machine.update_stream_window(id, size);
                if let Err(ctrl) = self.send_bytes(&build::window_update(id, size)) {
                    return ctrl;
                }
            }
        }
        if fin.is_fin() {
            evh.response_end(&ResponseEnd { stream_ref });
            if let Some(stream) = self.streams.by_id_mut(id) {
                stream.handler = None;
            }
            self.maybe_delete(id);
        }
        Control::Continue
    }

    fn headers_event<H: EventHandler>(
        &mut self,
        id: StreamId,
        fin: Fin,
        status: u16,
        headers: Vec<Header>,
        evh: &mut H,
    ) -> Control {
        let Some(stream) = self.streams.by_id(id) else {
            return Control::Continue;
        };
        let stream_ref = stream.stream_ref;
        let reply_to = stream.reply_to.clone();
        if (100..200).contains(&status) {
            let _ = reply_to.send(Message::Inform {
                stream_ref,
                status,
                headers: headers.clone(),
            });
            evh.response_inform(&ResponseInform {
                stream_ref,
                status,
                headers,
            });
            return Control::Continue;
        }
        let _ = reply_to.send(Message::Response {
            stream_ref,
            fin,
            status,
            headers: headers.clone(),
        });
        if fin.is_fin() {
            evh.response_headers(&ResponseHeaders {
                stream_ref,
                status,
                headers,
            });
            evh.response_end(&ResponseEnd { stream_ref });
        } else {
            let handler = self
                .opts
                .content_handlers
                .build(stream_ref, &reply_to, status, &headers);
            if let Some(stream) = self.streams.by_id_mut(id) {
                stream.handler = Some(handler);
            }
            evh.response_headers(&ResponseHeaders {
                stream_ref,
                status,
                headers,
            });
        }
        self.maybe_delete(id);
        Control::Continue
    }

    fn trailers_event<H: EventHandler>(
        &mut self,
        id: StreamId,
        headers: Vec<Header>,
        evh: &mut H,
    ) -> Control {
        let Some(stream) = self.streams.by_id_mut(id) else {
            return Control::Continue;
        };
        let stream_ref = stream.stream_ref;
        stream.handler = None;
        let _ = stream.reply_to.send(Message::Trailers {
            stream_ref,
            headers: headers.clone(),
        });
        evh.response_trailers(&ResponseTrailers {
            stream_ref,
            headers,
        });
        evh.response_end(&ResponseEnd { stream_ref });
        self.maybe_delete(id);
        Control::Continue
    }

    fn rst_event(&mut self, id: StreamId, reason: Reason) -> Control {
        if let Some(stream) = self.streams.remove(id) {
            let _ = stream.reply_to.send(Message::Error {
                stream_ref: stream.stream_ref,
                cause: ErrorCause::Stream {
                    reason,
                    message: "Stream reset by server.",
                },
            });
        }
        Control::Continue
    }

    #[allow(clippy::too_many_arguments)]
    fn push_event(
        &mut self,
        parent_id: StreamId,
        promised_id: StreamId,
        method: String,
        scheme: String,
        authority: String,
        path: String,
        headers: Vec<Header>,
    ) -> Control {
        let Some(parent) = self.streams.by_id(parent_id) else {
            return Control::Continue;
        };
        let parent_ref = parent.stream_ref;
        let reply_to = parent.reply_to.clone();
        // The pushed response is delivered to the parent's reply target
        // under a freshly minted ref.
        let promised_ref = StreamRef::new();
        self.streams.insert(Stream {
            id: promised_id,
            stream_ref: promised_ref,
            reply_to: reply_to.clone(),
            handler: None,
        });
        let uri = format!("{scheme}://{authority}{path}");
        let _ = reply_to.send(Message::Push {
            parent_ref,
            promised_ref,
            method,
            uri,
            headers,
        });
        Control::Continue
    }

    // ===== Egress =====

    /// Start a request whose body (if any) will follow via [`Engine::data`].
    #[allow(clippy::too_many_arguments)]
    pub fn headers<H: EventHandler>(
        &mut self,
        stream_ref: StreamRef,
        reply_to: ReplyTo,
        method: &str,
        host: &str,
        port: u16,
        path: &str,
        headers: Vec<Header>,
        evh: &mut H,
    ) -> Control {
        if self.closed {
            return Control::Close;
        }
        match self.begin_request(
            stream_ref, reply_to, method, host, port, path, headers, Fin::Nofin, evh,
        ) {
            Ok(_) => Control::Continue,
            Err(ctrl) => ctrl,
        }
    }

    /// Start a request and send its complete body.
    #[allow(clippy::too_many_arguments)]
    pub fn request<H: EventHandler>(
        &mut self,
        stream_ref: StreamRef,
        reply_to: ReplyTo,
        method: &str,
        host: &str,
        port: u16,
        path: &str,
        mut headers: Vec<Header>,
        body: Bytes,
        evh: &mut H,
    ) -> Control {
        if self.closed {
            return Control::Close;
        }
        headers.push(Header::new("content-length", body.len().to_string()));
        let fin_hint = if body.is_empty() { Fin::Fin } else { Fin::Nofin };
        let id = match self.begin_request(
            stream_ref, reply_to, method, host, port, path, headers, fin_hint, evh,
        ) {
            Ok(id) => id,
            Err(ctrl) => return ctrl,
        };
        if body.is_empty() {
            return Control::Continue;
        }
        self.send_data(id, Fin::Fin, body, evh)
    }

    /// Send request body data on an open stream.
    pub fn data<H: EventHandler>(
        &mut self,
        stream_ref: StreamRef,
        reply_to: &ReplyTo,
        fin: Fin,
        payload: Bytes,
        evh: &mut H,
    ) -> Control {
        if self.closed {
            return Control::Close;
        }
        let Some(stream) = self.streams.by_ref(stream_ref) else {
            let _ = reply_to.send(Message::Error {
                stream_ref,
                cause: ErrorCause::BadState {
                    message: "The stream cannot be found.",
                },
            });
            return Control::Continue;
        };
        let id = stream.id;
        let local_open = self.machine.local_state(id) == Some(HalfState::Open);
        let remote_dead = !matches!(
            self.machine.remote_state(id),
            Some(HalfState::Idle | HalfState::Open)
        );
        if !local_open || remote_dead {
            let _ = reply_to.send(Message::Error {
                stream_ref,
                cause: ErrorCause::BadState {
                    message: "The stream has already been closed.",
                },
            });
            return Control::Continue;
        }
        self.send_data(id, fin, payload, evh)
    }

    /// Abandon a stream. No further messages or events reference it.
    pub fn cancel(&mut self, stream_ref: StreamRef, reply_to: &ReplyTo) -> Control {
        if self.closed {
            return Control::Close;
        }
        let Some(stream) = self.streams.by_ref(stream_ref) else {
            let _ = reply_to.send(Message::Error {
                stream_ref,
                cause: ErrorCause::BadState {
                    message: "The stream cannot be found.",
                },
            });
            return Control::Continue;
        };
        let id = stream.id;
        debug!(id, ?stream_ref, "stream cancelled");
        self.machine.reset_stream(id);
        self.streams.remove(id);
        match self.send_bytes(&build::rst_stream(id, Reason::CANCEL)) {
            Ok(()) => Control::Continue,
            Err(ctrl) => ctrl,
        }
    }

    /// Probe the connection with a PING.
    pub fn keepalive(&mut self) -> Control {
        if self.closed {
            return Control::Close;
        }
        match self.send_bytes(&build::ping([0; 8], false)) {
            Ok(()) => Control::Continue,
            Err(ctrl) => ctrl,
        }
    }

    /// Coordinator-initiated close after the transport went away. Every
    /// live stream receives one `Closed` error, in table order.
    pub fn close<H: EventHandler>(&mut self, evh: &mut H) -> Control {
        if self.closed {
            return Control::Close;
        }
        evh.disconnect(&Disconnect {
            reason: "the connection was lost",
        });
        self.shutdown_streams(ErrorCause::Closed {
            message: "The connection was lost.",
        });
        Control::Close
    }

    // ===== Internals =====

    #[allow(clippy::too_many_arguments)]
    fn begin_request<H: EventHandler>(
        &mut self,
        stream_ref: StreamRef,
        reply_to: ReplyTo,
        method: &str,
        host: &str,
        port: u16,
        path: &str,
        headers: Vec<Header>,
        fin_hint: Fin,
        evh: &mut H,
    ) -> Result<StreamId, Control> {
        let id = self.machine.init_stream(method);
        let scheme = self.transport.scheme();
        let (authority, headers) = prepare_request_headers(host, port, scheme, headers);
        let pseudo = PseudoHeaders {
            method: method.to_string(),
            scheme,
            authority,
            path: path.to_string(),
        };
        evh.request_start(&RequestStart {
            stream_ref,
            method: pseudo.method.clone(),
            authority: pseudo.authority.clone(),
            path: pseudo.path.clone(),
        });
        let (fin, block) = self.machine.prepare_headers(id, fin_hint, &pseudo, &headers);
        self.streams.insert(Stream {
            id,
            stream_ref,
            reply_to,
            handler: None,
        });
        trace!(id, method, authority = %pseudo.authority, "sending request headers");
        if let Err(ctrl) = self.send_bytes(&build::headers(id, fin.is_fin(), &block)) {
            return Err(ctrl);
        }
        evh.request_headers(&RequestHeaders {
            stream_ref,
            method: pseudo.method,
            authority: pseudo.authority,
            path: pseudo.path,
            headers,
        });
        if fin.is_fin() {
            evh.request_end(&RequestEnd { stream_ref });
        }
        Ok(id)
    }

    fn send_data<H: EventHandler>(
        &mut self,
        id: StreamId,
        fin: Fin,
        payload: Bytes,
        evh: &mut H,
    ) -> Control {
        match self.machine.send_or_queue_data(id, fin, payload) {
            SendOutcome::Queued => Control::Continue,
            SendOutcome::Send(batches) => self.write_outbound(batches, evh),
        }
    }

    /// Serialize data the machine released, firing `request_end` for every
    /// stream whose fin reached the wire.
    fn write_outbound<H: EventHandler>(
        &mut self,
        batches: Vec<OutboundData>,
        evh: &mut H,
    ) -> Control {
        for batch in batches {
            let OutboundData { id, fin, chunks } = batch;
            let last = chunks.len() - 1;
            for (index, chunk) in chunks.iter().enumerate() {
                let end_stream = fin.is_fin() && index == last;
                if let Err(ctrl) = self.send_bytes(&build::data(id, end_stream, chunk)) {
                    return ctrl;
                }
            }
            if fin.is_fin() {
                if let Some(stream) = self.streams.by_id(id) {
                    evh.request_end(&RequestEnd {
                        stream_ref: stream.stream_ref,
                    });
                }
                self.maybe_delete(id);
            }
        }
        Control::Continue
    }

    /// Recoverable per-stream fault: reset, drop, notify. The connection
    /// lives on.
    fn stream_error(&mut self, id: StreamId, reason: Reason, message: &'static str) -> Control {
        debug!(id, %reason, message, "stream error");
        self.machine.reset_stream(id);
        if let Err(ctrl) = self.send_bytes(&build::rst_stream(id, reason)) {
            return ctrl;
        }
        if let Some(stream) = self.streams.remove(id) {
            let _ = stream.reply_to.send(Message::Error {
                stream_ref: stream.stream_ref,
                cause: ErrorCause::Stream { reason, message },
            });
        }
        Control::Continue
    }

    /// Fatal shutdown: GOAWAY out, one terminal error per live stream, and
    /// the `terminate` telemetry event.
    fn terminate<H: EventHandler>(&mut self, cause: ErrorCause, evh: &mut H) -> Control {
        if self.closed {
            return Control::Close;
        }
        let reason = match &cause {
            ErrorCause::Connection { reason, .. } => *reason,
            _ => Reason::NO_ERROR,
        };
        debug!(%reason, %cause, "terminating connection");
        let goaway = build::goaway(self.machine.last_stream_id(), reason, b"");
        let _ = self.transport.send(&goaway);
        self.shutdown_streams(cause.clone());
        evh.terminate(&Terminate { cause });
        Control::Close
    }

    /// Deliver a terminal error to every live stream, in stable table
    /// order, and notify the owner. Marks the engine closed.
    fn shutdown_streams(&mut self, cause: ErrorCause) {
        for stream in self.streams.drain() {
            self.down_refs.push(stream.stream_ref);
            let _ = stream.reply_to.send(Message::Error {
                stream_ref: stream.stream_ref,
                cause: cause.clone(),
            });
        }
        let _ = self.owner.send(Message::Down {
            cause,
            streams: self.down_refs.clone(),
        });
        self.closed = true;
    }

    /// A transport write failed: the connection is gone.
    fn connection_lost(&mut self) -> Control {
        debug!("transport write failed; connection lost");
        self.shutdown_streams(ErrorCause::Closed {
            message: "The connection was lost.",
        });
        Control::Close
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), Control> {
        match self.transport.send(bytes) {
            Ok(()) => Ok(()),
            Err(_) => Err(self.connection_lost()),
        }
    }

    /// Drop the stream once both halves are terminal. Runs strictly after
    /// all terminal messages and events for the stream went out.
    fn maybe_delete(&mut self, id: StreamId) {
        if self.machine.finish_stream(id) {
            trace!(id, "stream reached end of life");
            self.streams.remove(id);
        }
    }
}

/// Compute `:authority` and scrub the header list for HTTP/2.
///
/// An explicit `host` header wins over the transport's host and port; the
/// default port for the scheme is elided. Hop-by-hop headers never reach
/// the wire, and names are lowercased on the way through.
fn prepare_request_headers(
    host: &str,
    port: u16,
    scheme: &'static str,
    headers: Vec<Header>,
) -> (String, Vec<Header>) {
    let mut authority = None;
    let mut kept = Vec::with_capacity(headers.len());
    for header in headers {
        let name = header.name.to_ascii_lowercase();
        if name == "host" {
            if authority.is_none() {
                authority = Some(header.value);
            }
        } else if HOP_BY_HOP.contains(&name.as_str()) {
            trace!(name = name.as_str(), "dropping hop-by-hop header");
        } else {
            kept.push(Header {
                name,
                value: header.value,
            });
        }
    }
    let authority = authority.unwrap_or_else(|| {
        let default_port = if scheme == "https" { 443 } else { 80 };
        if port == default_port {
            host.to_string()
        } else {
            format!("{host}:{port}")
        }
    });
    (authority, kept)
}
