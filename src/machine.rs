//! The pure HTTP/2 protocol machine.
//!
//! Owns everything that evolves with the protocol and nothing that touches
//! I/O: HPACK tables, settings, flow-control windows, per-stream half-states
//! and queued outbound data. Inbound frames go in through [`Machine::recv_frame`]
//! and come out as validated [`ProtocolEvent`]s; outbound sends come back as
//! data for the engine to serialize. This separation keeps the machine
//! unit-testable frame by frame.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::ProtoError;
use crate::frame::{self, settings_id, Frame, Reason};
use crate::hpack::{Header, HpackDecoder, HpackEncoder};
use crate::options::Options;

/// Wire identity of a stream: non-zero, 31 bits. Client-initiated ids are
/// odd, server-pushed ids are even.
pub type StreamId = u32;

const MAX_WINDOW_SIZE: i64 = (1 << 31) - 1;
const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Terminal flag on HEADERS and DATA: does the sending side half-close
/// after this frame?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fin {
    Fin,
    Nofin,
}

impl Fin {
    pub fn is_fin(self) -> bool {
        matches!(self, Fin::Fin)
    }

    pub fn from_flag(end_stream: bool) -> Fin {
        if end_stream {
            Fin::Fin
        } else {
            Fin::Nofin
        }
    }
}

/// State of one half (local or remote) of a stream.
///
/// `HalfClosed` means that side has sent its terminal frame; `Closed` means
/// the stream was reset. A half in either is terminal for end-of-life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    Idle,
    Open,
    HalfClosed,
    Closed,
}

impl HalfState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HalfState::HalfClosed | HalfState::Closed)
    }
}

/// Request pseudo-headers, encoded ahead of the regular headers.
#[derive(Debug, Clone)]
pub struct PseudoHeaders {
    pub method: String,
    pub scheme: &'static str,
    pub authority: String,
    pub path: String,
}

/// A validated protocol transition the engine must surface.
#[derive(Debug)]
pub enum ProtocolEvent {
    Data {
        id: StreamId,
        fin: Fin,
        payload: Bytes,
    },
    Headers {
        id: StreamId,
        fin: Fin,
        status: u16,
        headers: Vec<Header>,
        body_length: Option<u64>,
    },
    Trailers {
        id: StreamId,
        headers: Vec<Header>,
    },
    RstStream {
        id: StreamId,
        reason: Reason,
    },
    PushPromise {
        parent_id: StreamId,
        promised_id: StreamId,
        method: String,
        scheme: String,
        authority: String,
        path: String,
        headers: Vec<Header>,
    },
    GoAway {
        last_stream_id: StreamId,
        reason: Reason,
        debug: Bytes,
    },
}

/// What [`Machine::recv_frame`] produced.
#[derive(Debug)]
pub enum Outcome {
    /// Frame consumed; nothing application-visible (SETTINGS, PING, ...).
    Consumed,
    /// An application-visible transition.
    Event(ProtocolEvent),
    /// A window credit unblocked queued data; the engine must serialize it.
    Unblocked(Vec<OutboundData>),
}

/// Queued DATA released by flow control. `fin` applies after the last chunk.
/// Every chunk respects the peer's maximum frame size.
#[derive(Debug, PartialEq, Eq)]
pub struct OutboundData {
    pub id: StreamId,
    pub fin: Fin,
    pub chunks: Vec<Bytes>,
}

/// Result of [`Machine::send_or_queue_data`].
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing could be sent now; the payload is parked in the machine.
    Queued,
    /// Serialize these now. A remainder may still be parked.
    Send(Vec<OutboundData>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Settings {
    header_table_size: u32,
    enable_push: bool,
    max_concurrent_streams: Option<u32>,
    initial_window_size: u32,
    max_frame_size: u32,
    max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            header_table_size: 4_096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

#[derive(Debug)]
struct StreamSlot {
    method: String,
    local: HalfState,
    remote: HalfState,
    /// Credit granted to us by the peer.
    send_window: i64,
    /// Credit we granted to the peer.
    recv_window: i64,
    /// Remaining declared response length, when content-length was present.
    remaining_length: Option<u64>,
    /// Outbound data waiting for window credit.
    queue: VecDeque<(Fin, Bytes)>,
}

impl StreamSlot {
    fn new(method: &str, local: HalfState, send_window: i64, recv_window: i64) -> Self {
        StreamSlot {
            method: method.to_string(),
            local,
            remote: HalfState::Idle,
            send_window,
            recv_window,
            remaining_length: None,
            queue: VecDeque::new(),
        }
    }
}

fn stream_error(id: StreamId, reason: Reason, message: &'static str) -> ProtoError {
    ProtoError::Stream { id, reason, message }
}

fn connection_error(reason: Reason, message: &'static str) -> ProtoError {
    ProtoError::Connection { reason, message }
}

/// The protocol state for one HTTP/2 connection, client role.
#[derive(Debug)]
pub struct Machine {
    decoder: HpackDecoder,
    encoder: HpackEncoder,
    local_settings: Settings,
    remote_settings: Settings,
    local_settings_acked: bool,
    next_stream_id: StreamId,
    last_remote_stream_id: StreamId,
    /// Connection-level credit granted to us by the peer.
    send_window: i64,
    /// Connection-level credit we granted to the peer.
    recv_window: i64,
    streams: BTreeMap<StreamId, StreamSlot>,
    ignored_frames: u64,
}

impl Machine {
    /// Create a client machine. Returns the bytes that must hit the wire
    /// before anything else: the connection preface plus initial SETTINGS.
    pub fn new(_opts: &Options) -> (Vec<u8>, Machine) {
        let local_settings = Settings::default();
        let mut preface = Vec::from(frame::CONNECTION_PREFACE);
        preface.extend_from_slice(&frame::build::settings(&[]));
        let machine = Machine {
            decoder: HpackDecoder::new(),
            encoder: HpackEncoder::new(),
            local_settings,
            remote_settings: Settings::default(),
            local_settings_acked: false,
            next_stream_id: 1,
            last_remote_stream_id: 0,
            send_window: DEFAULT_INITIAL_WINDOW_SIZE as i64,
            recv_window: DEFAULT_INITIAL_WINDOW_SIZE as i64,
            streams: BTreeMap::new(),
            ignored_frames: 0,
        };
        (preface, machine)
    }

    /// The frame size we advertised; bounds inbound parsing.
    pub fn max_frame_size(&self) -> u32 {
        self.local_settings.max_frame_size
    }

    /// Highest server-initiated stream id processed, for composing GOAWAY.
    pub fn last_stream_id(&self) -> StreamId {
        self.last_remote_stream_id
    }

    pub fn local_settings_acked(&self) -> bool {
        self.local_settings_acked
    }

    /// Concurrency limit advertised by the peer, if any.
    pub fn remote_max_concurrent_streams(&self) -> Option<u32> {
        self.remote_settings.max_concurrent_streams
    }

    /// Header table size advertised by the peer.
    pub fn remote_header_table_size(&self) -> u32 {
        self.remote_settings.header_table_size
    }

    /// Header list cap advertised by the peer, if any.
    pub fn remote_max_header_list_size(&self) -> Option<u32> {
        self.remote_settings.max_header_list_size
    }

    /// Frames skipped on request of the codec.
    pub fn ignored_frames(&self) -> u64 {
        self.ignored_frames
    }

    pub fn local_state(&self, id: StreamId) -> Option<HalfState> {
        self.streams.get(&id).map(|slot| slot.local)
    }

    pub fn remote_state(&self, id: StreamId) -> Option<HalfState> {
        self.streams.get(&id).map(|slot| slot.remote)
    }

    /// Bytes parked for `id`, waiting on window credit.
    pub fn queued_bytes(&self, id: StreamId) -> usize {
        self.streams
            .get(&id)
            .map(|slot| slot.queue.iter().map(|(_, data)| data.len()).sum())
            .unwrap_or(0)
    }

    /// Drop the slot once both halves are terminal. Returns whether the
    /// stream has reached end of life.
    pub fn finish_stream(&mut self, id: StreamId) -> bool {
        let done = match self.streams.get(&id) {
            Some(slot) => slot.local.is_terminal() && slot.remote.is_terminal(),
            None => true,
        };
        if done {
            self.streams.remove(&id);
        }
        done
    }

    /// Allocate the next client-initiated stream id. Odd, strictly
    /// increasing.
    pub fn init_stream(&mut self, method: &str) -> StreamId {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        self.streams.insert(
            id,
            StreamSlot::new(
                method,
                HalfState::Idle,
                self.remote_settings.initial_window_size as i64,
                self.local_settings.initial_window_size as i64,
            ),
        );
        trace!(id, method, "initiated stream");
        id
    }

    /// HPACK-encode request headers and transition the local half. Returns
    /// the END_STREAM bit the engine must put on the wire.
    pub fn prepare_headers(
        &mut self,
        id: StreamId,
        fin: Fin,
        pseudo: &PseudoHeaders,
        headers: &[Header],
    ) -> (Fin, Vec<u8>) {
        let mut pairs: Vec<(&str, &str)> = vec![
            (":method", pseudo.method.as_str()),
            (":scheme", pseudo.scheme),
            (":authority", pseudo.authority.as_str()),
            (":path", pseudo.path.as_str()),
        ];
        for header in headers {
            pairs.push((header.name.as_str(), header.value.as_str()));
        }
        let block = self.encoder.encode(pairs);
        if let Some(slot) = self.streams.get_mut(&id) {
            slot.local = if fin.is_fin() {
                HalfState::HalfClosed
            } else {
                HalfState::Open
            };
        }
        (fin, block)
    }

    /// HPACK-encode trailers. The local half closes with them.
    pub fn prepare_trailers(&mut self, id: StreamId, trailers: &[Header]) -> Vec<u8> {
        let pairs: Vec<(&str, &str)> = trailers
            .iter()
            .map(|header| (header.name.as_str(), header.value.as_str()))
            .collect();
        let block = self.encoder.encode(pairs);
        if let Some(slot) = self.streams.get_mut(&id) {
            slot.local = HalfState::HalfClosed;
        }
        block
    }

    /// Queue outbound DATA and release as much of it as the stream window,
    /// the connection window and the peer's frame size allow. The unsent
    /// remainder stays parked until a WINDOW_UPDATE arrives.
    pub fn send_or_queue_data(&mut self, id: StreamId, fin: Fin, payload: Bytes) -> SendOutcome {
        match self.streams.get_mut(&id) {
            Some(slot) => {
                slot.queue.push_back((fin, payload));
                if fin.is_fin() {
                    slot.local = HalfState::HalfClosed;
                }
            }
            None => return SendOutcome::Queued,
        }
        match self.flush_stream(id) {
            Some(batch) => SendOutcome::Send(vec![batch]),
            None => SendOutcome::Queued,
        }
    }

    /// Credit the connection-level receive window (we sent a WINDOW_UPDATE).
    pub fn update_window(&mut self, increment: u32) {
        self.recv_window += increment as i64;
    }

    /// Credit a stream-level receive window.
    pub fn update_stream_window(&mut self, id: StreamId, increment: u32) {
        if let Some(slot) = self.streams.get_mut(&id) {
            slot.recv_window += increment as i64;
        }
    }

    /// Locally reset a stream. Queued data is dropped.
    pub fn reset_stream(&mut self, id: StreamId) {
        if self.streams.remove(&id).is_some() {
            trace!(id, "stream reset locally");
        }
    }

    /// Bookkeeping for frames the codec told us to skip.
    pub fn ignored_frame(&mut self) {
        self.ignored_frames += 1;
    }

    /// Whether `id` refers to a stream that existed once and is now gone,
    /// as opposed to one that was never opened.
    fn forgotten_stream(&self, id: StreamId) -> bool {
        (id % 2 == 1 && id < self.next_stream_id)
            || (id % 2 == 0 && id != 0 && id <= self.last_remote_stream_id)
    }

    /// Consume one inbound frame.
    pub fn recv_frame(&mut self, frame: Frame) -> Result<Outcome, ProtoError> {
        match frame {
            Frame::Data {
                id,
                end_stream,
                payload,
            } => self.recv_data(id, end_stream, payload),
            Frame::Headers {
                id,
                end_stream,
                block,
            } => self.recv_headers(id, end_stream, &block),
            Frame::PushPromise {
                id,
                promised_id,
                block,
            } => self.recv_push_promise(id, promised_id, &block),
            Frame::RstStream { id, reason } => self.recv_rst_stream(id, reason),
            Frame::Settings { ack, settings } => self.recv_settings(ack, &settings),
            Frame::Ping { .. } => Ok(Outcome::Consumed),
            Frame::GoAway {
                last_stream_id,
                reason,
                debug,
            } => Ok(Outcome::Event(ProtocolEvent::GoAway {
                last_stream_id,
                reason,
                debug,
            })),
            Frame::WindowUpdate { id, increment } => self.recv_window_update(id, increment),
        }
    }

    fn recv_data(
        &mut self,
        id: StreamId,
        end_stream: bool,
        payload: Bytes,
    ) -> Result<Outcome, ProtoError> {
        let len = payload.len() as i64;
        if len > self.recv_window {
            return Err(connection_error(
                Reason::FLOW_CONTROL_ERROR,
                "connection flow-control window exceeded",
            ));
        }
        {
            if !self.streams.contains_key(&id) {
                if self.forgotten_stream(id) {
                    return Err(stream_error(
                        id,
                        Reason::STREAM_CLOSED,
                        "DATA frame received for a closed stream",
                    ));
                }
                return Err(connection_error(
                    Reason::PROTOCOL_ERROR,
                    "DATA frame received for an idle stream",
                ));
            }
            let Some(slot) = self.streams.get_mut(&id) else {
                return Ok(Outcome::Consumed);
            };
            match slot.remote {
                HalfState::Open => {}
                HalfState::Idle => {
                    return Err(connection_error(
                        Reason::PROTOCOL_ERROR,
                        "DATA frame received before the response HEADERS",
                    ))
                }
                HalfState::HalfClosed | HalfState::Closed => {
                    return Err(stream_error(
                        id,
                        Reason::STREAM_CLOSED,
                        "DATA frame received after the end of the stream",
                    ))
                }
            }
            if len > slot.recv_window {
                return Err(stream_error(
                    id,
                    Reason::FLOW_CONTROL_ERROR,
                    "stream flow-control window exceeded",
                ));
            }
            slot.recv_window -= len;
            if let Some(remaining) = slot.remaining_length.as_mut() {
                let size = payload.len() as u64;
                if size > *remaining {
                    return Err(stream_error(
                        id,
                        Reason::PROTOCOL_ERROR,
                        "DATA received beyond the declared content-length",
                    ));
                }
                *remaining -= size;
                if end_stream && *remaining != 0 {
                    return Err(stream_error(
                        id,
                        Reason::PROTOCOL_ERROR,
                        "stream ended before the declared content-length",
                    ));
                }
            }
            if end_stream {
                slot.remote = HalfState::HalfClosed;
            }
        }
        self.recv_window -= len;
        Ok(Outcome::Event(ProtocolEvent::Data {
            id,
            fin: Fin::from_flag(end_stream),
            payload,
        }))
    }

    fn recv_headers(
        &mut self,
        id: StreamId,
        end_stream: bool,
        block: &[u8],
    ) -> Result<Outcome, ProtoError> {
        // Decode before anything else: the dynamic table must advance even
        // for streams we no longer track.
        let headers = self.decoder.decode(block).map_err(|_| {
            connection_error(Reason::COMPRESSION_ERROR, "failed to decode a header block")
        })?;
        if !self.streams.contains_key(&id) {
            if self.forgotten_stream(id) {
                return Err(stream_error(
                    id,
                    Reason::STREAM_CLOSED,
                    "HEADERS received for a closed stream",
                ));
            }
            return Err(connection_error(
                Reason::PROTOCOL_ERROR,
                "HEADERS received for an idle stream",
            ));
        }
        let Some(slot) = self.streams.get_mut(&id) else {
            return Ok(Outcome::Consumed);
        };
        match slot.remote {
            HalfState::Idle => {
                let (status, regular) = split_response_headers(id, headers)?;
                if (100..200).contains(&status) {
                    if end_stream {
                        return Err(stream_error(
                            id,
                            Reason::PROTOCOL_ERROR,
                            "informational response carried END_STREAM",
                        ));
                    }
                    // The remote half stays idle: the final response is
                    // still to come.
                    debug!(id, status, "informational response");
                    return Ok(Outcome::Event(ProtocolEvent::Headers {
                        id,
                        fin: Fin::Nofin,
                        status,
                        headers: regular,
                        body_length: None,
                    }));
                }
                let body_length = if no_body_expected(&slot.method, status) {
                    Some(0)
                } else {
                    parse_content_length(id, &regular)?
                };
                if end_stream && body_length.is_some_and(|length| length != 0) {
                    return Err(stream_error(
                        id,
                        Reason::PROTOCOL_ERROR,
                        "stream ended before the declared content-length",
                    ));
                }
                slot.remaining_length = body_length;
                slot.remote = if end_stream {
                    HalfState::HalfClosed
                } else {
                    HalfState::Open
                };
                debug!(id, status, "response headers");
                Ok(Outcome::Event(ProtocolEvent::Headers {
                    id,
                    fin: Fin::from_flag(end_stream),
                    status,
                    headers: regular,
                    body_length,
                }))
            }
            HalfState::Open => {
                if !end_stream {
                    return Err(stream_error(
                        id,
                        Reason::PROTOCOL_ERROR,
                        "trailing HEADERS without END_STREAM",
                    ));
                }
                if headers.iter().any(Header::is_pseudo) {
                    return Err(stream_error(
                        id,
                        Reason::PROTOCOL_ERROR,
                        "trailers must not carry pseudo-headers",
                    ));
                }
                if slot.remaining_length.is_some_and(|remaining| remaining != 0) {
                    return Err(stream_error(
                        id,
                        Reason::PROTOCOL_ERROR,
                        "stream ended before the declared content-length",
                    ));
                }
                slot.remote = HalfState::HalfClosed;
                Ok(Outcome::Event(ProtocolEvent::Trailers { id, headers }))
            }
            HalfState::HalfClosed | HalfState::Closed => Err(stream_error(
                id,
                Reason::STREAM_CLOSED,
                "HEADERS received after the end of the stream",
            )),
        }
    }

    fn recv_push_promise(
        &mut self,
        parent_id: StreamId,
        promised_id: StreamId,
        block: &[u8],
    ) -> Result<Outcome, ProtoError> {
        let headers = self.decoder.decode(block).map_err(|_| {
            connection_error(Reason::COMPRESSION_ERROR, "failed to decode a header block")
        })?;
        if !self.local_settings.enable_push {
            return Err(connection_error(
                Reason::PROTOCOL_ERROR,
                "PUSH_PROMISE received although push is disabled",
            ));
        }
        match self.streams.get(&parent_id) {
            Some(parent) if !parent.remote.is_terminal() => {}
            _ => {
                return Err(connection_error(
                    Reason::PROTOCOL_ERROR,
                    "PUSH_PROMISE on an unknown or finished stream",
                ))
            }
        }
        if promised_id % 2 != 0
            || promised_id <= self.last_remote_stream_id
            || self.streams.contains_key(&promised_id)
        {
            return Err(connection_error(
                Reason::PROTOCOL_ERROR,
                "PUSH_PROMISE with an invalid promised stream id",
            ));
        }
        let (pseudo, regular) = split_push_headers(promised_id, headers)?;
        let (method, scheme, authority, path) = pseudo;
        self.last_remote_stream_id = promised_id;
        // We can never send on a pushed stream; it is born locally closed.
        self.streams.insert(
            promised_id,
            StreamSlot::new(
                &method,
                HalfState::HalfClosed,
                self.remote_settings.initial_window_size as i64,
                self.local_settings.initial_window_size as i64,
            ),
        );
        debug!(parent_id, promised_id, %method, "push promise");
        Ok(Outcome::Event(ProtocolEvent::PushPromise {
            parent_id,
            promised_id,
            method,
            scheme,
            authority,
            path,
            headers: regular,
        }))
    }

    fn recv_rst_stream(&mut self, id: StreamId, reason: Reason) -> Result<Outcome, ProtoError> {
        if self.streams.remove(&id).is_none() {
            // Resets for streams we already forgot are not an error.
            return Ok(Outcome::Consumed);
        }
        debug!(id, %reason, "stream reset by the server");
        Ok(Outcome::Event(ProtocolEvent::RstStream { id, reason }))
    }

    fn recv_settings(&mut self, ack: bool, entries: &[(u16, u32)]) -> Result<Outcome, ProtoError> {
        if ack {
            self.local_settings_acked = true;
            return Ok(Outcome::Consumed);
        }
        let mut updated = self.remote_settings;
        for &(id, value) in entries {
            match id {
                settings_id::HEADER_TABLE_SIZE => updated.header_table_size = value,
                settings_id::ENABLE_PUSH => match value {
                    0 => updated.enable_push = false,
                    1 => updated.enable_push = true,
                    _ => {
                        return Err(connection_error(
                            Reason::PROTOCOL_ERROR,
                            "invalid ENABLE_PUSH setting value",
                        ))
                    }
                },
                settings_id::MAX_CONCURRENT_STREAMS => {
                    updated.max_concurrent_streams = Some(value)
                }
                settings_id::INITIAL_WINDOW_SIZE => {
                    if value as i64 > MAX_WINDOW_SIZE {
                        return Err(connection_error(
                            Reason::FLOW_CONTROL_ERROR,
                            "INITIAL_WINDOW_SIZE exceeds the maximum window",
                        ));
                    }
                    updated.initial_window_size = value;
                }
                settings_id::MAX_FRAME_SIZE => {
                    if !(16_384..=16_777_215).contains(&value) {
                        return Err(connection_error(
                            Reason::PROTOCOL_ERROR,
                            "MAX_FRAME_SIZE outside the allowed range",
                        ));
                    }
                    updated.max_frame_size = value;
                }
                settings_id::MAX_HEADER_LIST_SIZE => {
                    updated.max_header_list_size = Some(value)
                }
                _ => {}
            }
        }
        // A changed INITIAL_WINDOW_SIZE re-bases every stream's send window,
        // which can unblock queued data (or push a window negative).
        let delta =
            updated.initial_window_size as i64 - self.remote_settings.initial_window_size as i64;
        self.remote_settings = updated;
        if delta != 0 {
            for slot in self.streams.values_mut() {
                slot.send_window += delta;
                if slot.send_window > MAX_WINDOW_SIZE {
                    return Err(connection_error(
                        Reason::FLOW_CONTROL_ERROR,
                        "stream window overflow after SETTINGS",
                    ));
                }
            }
        }
        let unblocked = self.flush_all();
        if unblocked.is_empty() {
            Ok(Outcome::Consumed)
        } else {
            Ok(Outcome::Unblocked(unblocked))
        }
    }

    fn recv_window_update(&mut self, id: StreamId, increment: u32) -> Result<Outcome, ProtoError> {
        if id == 0 {
            self.send_window += increment as i64;
            if self.send_window > MAX_WINDOW_SIZE {
                return Err(connection_error(
                    Reason::FLOW_CONTROL_ERROR,
                    "connection flow-control window overflow",
                ));
            }
        } else {
            match self.streams.get_mut(&id) {
                Some(slot) => {
                    slot.send_window += increment as i64;
                    if slot.send_window > MAX_WINDOW_SIZE {
                        return Err(stream_error(
                            id,
                            Reason::FLOW_CONTROL_ERROR,
                            "stream flow-control window overflow",
                        ));
                    }
                }
                // Updates for finished streams arrive routinely; skip them.
                None => return Ok(Outcome::Consumed),
            }
        }
        let unblocked = self.flush_all();
        if unblocked.is_empty() {
            Ok(Outcome::Consumed)
        } else {
            Ok(Outcome::Unblocked(unblocked))
        }
    }

    /// Release queued data across all streams, lowest id first.
    fn flush_all(&mut self) -> Vec<OutboundData> {
        let pending: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, slot)| !slot.queue.is_empty())
            .map(|(&id, _)| id)
            .collect();
        let mut batches = Vec::new();
        for id in pending {
            if let Some(batch) = self.flush_stream(id) {
                batches.push(batch);
            }
            if self.send_window <= 0 {
                break;
            }
        }
        batches
    }

    /// Release as much of one stream's queue as the windows permit.
    fn flush_stream(&mut self, id: StreamId) -> Option<OutboundData> {
        let max_frame = self.remote_settings.max_frame_size as usize;
        let mut conn_window = self.send_window;
        let slot = self.streams.get_mut(&id)?;
        let mut chunks = Vec::new();
        let mut fin = Fin::Nofin;
        while let Some((item_fin, data)) = slot.queue.front_mut() {
            let item_fin = *item_fin;
            if data.is_empty() {
                chunks.push(Bytes::new());
                slot.queue.pop_front();
                if item_fin.is_fin() {
                    fin = Fin::Fin;
                    break;
                }
                continue;
            }
            let allowed = conn_window.min(slot.send_window).max(0) as usize;
            let take = allowed.min(max_frame).min(data.len());
            if take == 0 {
                break;
            }
            let chunk = data.split_to(take);
            conn_window -= take as i64;
            slot.send_window -= take as i64;
            chunks.push(chunk);
            if data.is_empty() {
                slot.queue.pop_front();
                if item_fin.is_fin() {
                    fin = Fin::Fin;
                    break;
                }
            }
        }
        self.send_window = conn_window;
        if chunks.is_empty() {
            return None;
        }
        trace!(id, frames = chunks.len(), fin = fin.is_fin(), "releasing queued data");
        Some(OutboundData { id, fin, chunks })
    }
}

/// Responses whose body is defined to be empty regardless of headers.
fn no_body_expected(method: &str, status: u16) -> bool {
    method.eq_ignore_ascii_case("HEAD") || status == 204 || status == 304
}

/// Split a response header list into the `:status` code and the regular
/// headers, enforcing pseudo-header rules.
fn split_response_headers(
    id: StreamId,
    headers: Vec<Header>,
) -> Result<(u16, Vec<Header>), ProtoError> {
    let malformed = |message| stream_error(id, Reason::PROTOCOL_ERROR, message);
    let mut status = None;
    let mut regular = Vec::with_capacity(headers.len());
    let mut seen_regular = false;
    for header in headers {
        if header.is_pseudo() {
            if seen_regular {
                return Err(malformed("pseudo-header after a regular header"));
            }
            if header.name != ":status" || status.is_some() {
                return Err(malformed("invalid response pseudo-headers"));
            }
            status = Some(
                header
                    .value
                    .parse::<u16>()
                    .map_err(|_| malformed("invalid :status value"))?,
            );
        } else {
            seen_regular = true;
            regular.push(header);
        }
    }
    let status = status.ok_or_else(|| malformed("response without a :status pseudo-header"))?;
    Ok((status, regular))
}

/// Split a push-promise header list into its four request pseudo-headers
/// and the regular headers.
#[allow(clippy::type_complexity)]
fn split_push_headers(
    id: StreamId,
    headers: Vec<Header>,
) -> Result<((String, String, String, String), Vec<Header>), ProtoError> {
    let malformed = |message| stream_error(id, Reason::PROTOCOL_ERROR, message);
    let mut method = None;
    let mut scheme = None;
    let mut authority = None;
    let mut path = None;
    let mut regular = Vec::with_capacity(headers.len());
    let mut seen_regular = false;
    for header in headers {
        if header.is_pseudo() {
            if seen_regular {
                return Err(malformed("pseudo-header after a regular header"));
            }
            let target = match header.name.as_str() {
                ":method" => &mut method,
                ":scheme" => &mut scheme,
                ":authority" => &mut authority,
                ":path" => &mut path,
                _ => return Err(malformed("invalid push pseudo-headers")),
            };
            if target.is_some() {
                return Err(malformed("duplicate push pseudo-header"));
            }
            *target = Some(header.value);
        } else {
            seen_regular = true;
            regular.push(header);
        }
    }
    match (method, scheme, authority, path) {
        (Some(method), Some(scheme), Some(authority), Some(path)) => {
            Ok(((method, scheme, authority, path), regular))
        }
        _ => Err(malformed("push promise missing request pseudo-headers")),
    }
}

fn parse_content_length(id: StreamId, headers: &[Header]) -> Result<Option<u64>, ProtoError> {
    for header in headers {
        if header.name.eq_ignore_ascii_case("content-length") {
            let length = header.value.parse::<u64>().map_err(|_| {
                stream_error(id, Reason::PROTOCOL_ERROR, "invalid content-length header")
            })?;
            return Ok(Some(length));
        }
    }
    Ok(None)
}
