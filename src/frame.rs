//! HTTP/2 frame codec: a pure byte to frame translator.
//!
//! The parser consumes a byte buffer and classifies what it finds into a
//! [`Verdict`]: a complete typed frame, an ignorable frame, a recoverable
//! per-stream violation, a fatal connection violation, or a request for more
//! bytes. Header blocks that span HEADERS/PUSH_PROMISE plus CONTINUATION
//! frames are reassembled here by looking ahead in the same buffer, so the
//! protocol machine only ever sees complete header blocks.
//!
//! The builder half ([`build`]) produces wire-ready byte strings for every
//! frame the client emits.
//!
//! Reference: RFC 7540 (HTTP/2), Sections 4 and 6.

use std::fmt;

use bytes::Bytes;
use tracing::trace;

/// Length of the fixed frame header, in bytes.
pub const HEADER_LEN: usize = 9;

/// The client connection preface (24 bytes), sent before any frame.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Maximum reassembled header block size (256 KiB).
/// Bounds memory growth from CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// An HTTP/2 error code (RFC 7540 Section 7).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reason(u32);

impl Reason {
    pub const NO_ERROR: Reason = Reason(0x0);
    pub const PROTOCOL_ERROR: Reason = Reason(0x1);
    pub const INTERNAL_ERROR: Reason = Reason(0x2);
    pub const FLOW_CONTROL_ERROR: Reason = Reason(0x3);
    pub const SETTINGS_TIMEOUT: Reason = Reason(0x4);
    pub const STREAM_CLOSED: Reason = Reason(0x5);
    pub const FRAME_SIZE_ERROR: Reason = Reason(0x6);
    pub const REFUSED_STREAM: Reason = Reason(0x7);
    pub const CANCEL: Reason = Reason(0x8);
    pub const COMPRESSION_ERROR: Reason = Reason(0x9);
    pub const CONNECT_ERROR: Reason = Reason(0xa);
    pub const ENHANCE_YOUR_CALM: Reason = Reason(0xb);
    pub const INADEQUATE_SECURITY: Reason = Reason(0xc);
    pub const HTTP_1_1_REQUIRED: Reason = Reason(0xd);

    /// The wire representation of the error code.
    pub fn code(self) -> u32 {
        self.0
    }

    pub fn description(self) -> &'static str {
        match self.0 {
            0x0 => "no error",
            0x1 => "protocol error",
            0x2 => "internal error",
            0x3 => "flow control error",
            0x4 => "settings timeout",
            0x5 => "stream closed",
            0x6 => "frame size error",
            0x7 => "refused stream",
            0x8 => "cancel",
            0x9 => "compression error",
            0xa => "connect error",
            0xb => "enhance your calm",
            0xc => "inadequate security",
            0xd => "http/1.1 required",
            _ => "unknown error code",
        }
    }
}

impl From<u32> for Reason {
    fn from(code: u32) -> Self {
        Reason(code)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0x0 => "NO_ERROR",
            0x1 => "PROTOCOL_ERROR",
            0x2 => "INTERNAL_ERROR",
            0x3 => "FLOW_CONTROL_ERROR",
            0x4 => "SETTINGS_TIMEOUT",
            0x5 => "STREAM_CLOSED",
            0x6 => "FRAME_SIZE_ERROR",
            0x7 => "REFUSED_STREAM",
            0x8 => "CANCEL",
            0x9 => "COMPRESSION_ERROR",
            0xa => "CONNECT_ERROR",
            0xb => "ENHANCE_YOUR_CALM",
            0xc => "INADEQUATE_SECURITY",
            0xd => "HTTP_1_1_REQUIRED",
            _ => return write!(f, "Reason({:#x})", self.0),
        };
        f.write_str(name)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// The fixed 9-byte frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse a frame header from the front of `src`.
    pub fn parse(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_LEN {
            return None;
        }
        let length = ((src[0] as u32) << 16) | ((src[1] as u32) << 8) | (src[2] as u32);
        let stream_id = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) & 0x7fff_ffff;
        Some(Self {
            length,
            kind: src[3],
            flags: src[4],
            stream_id,
        })
    }

    /// Total frame size including the header.
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.length as usize
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
}

/// A complete inbound frame. Header blocks are raw HPACK bytes; decoding
/// them is the protocol machine's job because it owns the dynamic tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        id: u32,
        end_stream: bool,
        payload: Bytes,
    },
    Headers {
        id: u32,
        end_stream: bool,
        block: Bytes,
    },
    PushPromise {
        id: u32,
        promised_id: u32,
        block: Bytes,
    },
    RstStream {
        id: u32,
        reason: Reason,
    },
    Settings {
        ack: bool,
        settings: Vec<(u16, u32)>,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        reason: Reason,
        debug: Bytes,
    },
    WindowUpdate {
        id: u32,
        increment: u32,
    },
}

/// Outcome of one [`parse`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// A complete frame; `consumed` bytes may be dropped from the buffer.
    Frame { frame: Frame, consumed: usize },
    /// A frame that must be silently skipped (unknown type, PRIORITY).
    Ignore { consumed: usize },
    /// A recoverable per-stream violation; the frame has been consumed.
    StreamError {
        id: u32,
        reason: Reason,
        message: &'static str,
        consumed: usize,
    },
    /// A fatal violation; the connection must be torn down.
    ConnectionError {
        reason: Reason,
        message: &'static str,
    },
    /// The buffer holds a strict prefix of a frame (or header block).
    More,
}

fn connection_error(reason: Reason, message: &'static str) -> Verdict {
    trace!(%reason, message, "connection error while parsing");
    Verdict::ConnectionError { reason, message }
}

/// Parse the first complete frame out of `src`.
///
/// Pure: the same input always yields the same verdict. The caller owns the
/// buffer and advances it by the `consumed` count of the returned verdict.
pub fn parse(src: &[u8], max_frame_size: u32) -> Verdict {
    let Some(head) = FrameHeader::parse(src) else {
        return Verdict::More;
    };

    if head.length > max_frame_size {
        return connection_error(
            Reason::FRAME_SIZE_ERROR,
            "frame exceeds the negotiated maximum frame size",
        );
    }

    let total = head.total_len();
    if src.len() < total {
        return Verdict::More;
    }

    trace!(kind = head.kind, id = head.stream_id, length = head.length, "parsing frame");

    let payload = &src[HEADER_LEN..total];

    match head.kind {
        frame_type::DATA => parse_data(&head, payload, total),
        frame_type::HEADERS => parse_headers(&head, payload, src, total, max_frame_size),
        frame_type::PUSH_PROMISE => parse_push_promise(&head, payload, src, total, max_frame_size),
        frame_type::RST_STREAM => parse_rst_stream(&head, payload, total),
        frame_type::SETTINGS => parse_settings(&head, payload, total),
        frame_type::PING => parse_ping(&head, payload, total),
        frame_type::GOAWAY => parse_goaway(&head, payload, total),
        frame_type::WINDOW_UPDATE => parse_window_update(&head, payload, total),
        frame_type::PRIORITY => {
            if head.stream_id == 0 {
                return connection_error(
                    Reason::PROTOCOL_ERROR,
                    "PRIORITY frame on the connection control stream",
                );
            }
            if head.length != 5 {
                return Verdict::StreamError {
                    id: head.stream_id,
                    reason: Reason::FRAME_SIZE_ERROR,
                    message: "PRIORITY frame with invalid length",
                    consumed: total,
                };
            }
            Verdict::Ignore { consumed: total }
        }
        frame_type::CONTINUATION => connection_error(
            Reason::PROTOCOL_ERROR,
            "CONTINUATION frame without a preceding header block",
        ),
        _ => Verdict::Ignore { consumed: total },
    }
}

fn parse_data(head: &FrameHeader, payload: &[u8], total: usize) -> Verdict {
    if head.stream_id == 0 {
        return connection_error(
            Reason::PROTOCOL_ERROR,
            "DATA frame on the connection control stream",
        );
    }
    let data = match strip_padding(head, payload) {
        Ok(data) => data,
        Err(verdict) => return verdict,
    };
    Verdict::Frame {
        frame: Frame::Data {
            id: head.stream_id,
            end_stream: head.is_end_stream(),
            payload: Bytes::copy_from_slice(data),
        },
        consumed: total,
    }
}

fn parse_headers(
    head: &FrameHeader,
    payload: &[u8],
    src: &[u8],
    total: usize,
    max_frame_size: u32,
) -> Verdict {
    if head.stream_id == 0 {
        return connection_error(
            Reason::PROTOCOL_ERROR,
            "HEADERS frame on the connection control stream",
        );
    }
    let fragment = match strip_headers_fields(head, payload) {
        Ok(fragment) => fragment,
        Err(verdict) => return verdict,
    };
    if head.is_end_headers() {
        return Verdict::Frame {
            frame: Frame::Headers {
                id: head.stream_id,
                end_stream: head.is_end_stream(),
                block: Bytes::copy_from_slice(fragment),
            },
            consumed: total,
        };
    }
    match collect_continuations(src, total, head.stream_id, fragment, max_frame_size) {
        Ok((block, consumed)) => Verdict::Frame {
            frame: Frame::Headers {
                id: head.stream_id,
                end_stream: head.is_end_stream(),
                block,
            },
            consumed,
        },
        Err(verdict) => verdict,
    }
}

fn parse_push_promise(
    head: &FrameHeader,
    payload: &[u8],
    src: &[u8],
    total: usize,
    max_frame_size: u32,
) -> Verdict {
    if head.stream_id == 0 {
        return connection_error(
            Reason::PROTOCOL_ERROR,
            "PUSH_PROMISE frame on the connection control stream",
        );
    }
    let fields = match strip_padding(head, payload) {
        Ok(fields) => fields,
        Err(verdict) => return verdict,
    };
    if fields.len() < 4 {
        return connection_error(Reason::FRAME_SIZE_ERROR, "PUSH_PROMISE frame too short");
    }
    let promised_id =
        u32::from_be_bytes([fields[0], fields[1], fields[2], fields[3]]) & 0x7fff_ffff;
    let fragment = &fields[4..];
    if head.is_end_headers() {
        return Verdict::Frame {
            frame: Frame::PushPromise {
                id: head.stream_id,
                promised_id,
                block: Bytes::copy_from_slice(fragment),
            },
            consumed: total,
        };
    }
    match collect_continuations(src, total, head.stream_id, fragment, max_frame_size) {
        Ok((block, consumed)) => Verdict::Frame {
            frame: Frame::PushPromise {
                id: head.stream_id,
                promised_id,
                block,
            },
            consumed,
        },
        Err(verdict) => verdict,
    }
}

fn parse_rst_stream(head: &FrameHeader, payload: &[u8], total: usize) -> Verdict {
    if head.stream_id == 0 {
        return connection_error(
            Reason::PROTOCOL_ERROR,
            "RST_STREAM frame on the connection control stream",
        );
    }
    if head.length != 4 {
        return connection_error(Reason::FRAME_SIZE_ERROR, "RST_STREAM frame with invalid length");
    }
    let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Verdict::Frame {
        frame: Frame::RstStream {
            id: head.stream_id,
            reason: Reason::from(code),
        },
        consumed: total,
    }
}

fn parse_settings(head: &FrameHeader, payload: &[u8], total: usize) -> Verdict {
    if head.stream_id != 0 {
        return connection_error(
            Reason::PROTOCOL_ERROR,
            "SETTINGS frame on a non-zero stream",
        );
    }
    if head.is_ack() {
        if head.length != 0 {
            return connection_error(
                Reason::FRAME_SIZE_ERROR,
                "SETTINGS acknowledgement with a payload",
            );
        }
        return Verdict::Frame {
            frame: Frame::Settings {
                ack: true,
                settings: Vec::new(),
            },
            consumed: total,
        };
    }
    if head.length % 6 != 0 {
        return connection_error(Reason::FRAME_SIZE_ERROR, "SETTINGS frame with invalid length");
    }
    let settings = payload
        .chunks_exact(6)
        .map(|entry| {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            (id, value)
        })
        .collect();
    Verdict::Frame {
        frame: Frame::Settings {
            ack: false,
            settings,
        },
        consumed: total,
    }
}

fn parse_ping(head: &FrameHeader, payload: &[u8], total: usize) -> Verdict {
    if head.stream_id != 0 {
        return connection_error(Reason::PROTOCOL_ERROR, "PING frame on a non-zero stream");
    }
    if head.length != 8 {
        return connection_error(Reason::FRAME_SIZE_ERROR, "PING frame with invalid length");
    }
    let mut data = [0u8; 8];
    data.copy_from_slice(payload);
    Verdict::Frame {
        frame: Frame::Ping {
            ack: head.is_ack(),
            payload: data,
        },
        consumed: total,
    }
}

fn parse_goaway(head: &FrameHeader, payload: &[u8], total: usize) -> Verdict {
    if head.stream_id != 0 {
        return connection_error(Reason::PROTOCOL_ERROR, "GOAWAY frame on a non-zero stream");
    }
    if head.length < 8 {
        return connection_error(Reason::FRAME_SIZE_ERROR, "GOAWAY frame too short");
    }
    let last_stream_id =
        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
    let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    Verdict::Frame {
        frame: Frame::GoAway {
            last_stream_id,
            reason: Reason::from(code),
            debug: Bytes::copy_from_slice(&payload[8..]),
        },
        consumed: total,
    }
}

fn parse_window_update(head: &FrameHeader, payload: &[u8], total: usize) -> Verdict {
    if head.length != 4 {
        return connection_error(
            Reason::FRAME_SIZE_ERROR,
            "WINDOW_UPDATE frame with invalid length",
        );
    }
    let increment =
        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
    if increment == 0 {
        if head.stream_id == 0 {
            return connection_error(
                Reason::PROTOCOL_ERROR,
                "WINDOW_UPDATE with a zero increment",
            );
        }
        return Verdict::StreamError {
            id: head.stream_id,
            reason: Reason::PROTOCOL_ERROR,
            message: "WINDOW_UPDATE with a zero increment",
            consumed: total,
        };
    }
    Verdict::Frame {
        frame: Frame::WindowUpdate {
            id: head.stream_id,
            increment,
        },
        consumed: total,
    }
}

/// Reassemble a header block that continues past its opening frame.
///
/// `offset` points just past the opening HEADERS/PUSH_PROMISE frame. Every
/// following frame must be a CONTINUATION for the same stream until one
/// carries END_HEADERS. Returns the full block and the total consumed count.
fn collect_continuations(
    src: &[u8],
    mut offset: usize,
    id: u32,
    first: &[u8],
    max_frame_size: u32,
) -> Result<(Bytes, usize), Verdict> {
    let mut block = first.to_vec();
    loop {
        let Some(cont) = FrameHeader::parse(&src[offset..]) else {
            return Err(Verdict::More);
        };
        if cont.kind != frame_type::CONTINUATION {
            return Err(connection_error(
                Reason::PROTOCOL_ERROR,
                "expected a CONTINUATION frame",
            ));
        }
        if cont.stream_id != id {
            return Err(connection_error(
                Reason::PROTOCOL_ERROR,
                "CONTINUATION frame for the wrong stream",
            ));
        }
        if cont.length > max_frame_size {
            return Err(connection_error(
                Reason::FRAME_SIZE_ERROR,
                "frame exceeds the negotiated maximum frame size",
            ));
        }
        let end = offset + cont.total_len();
        if src.len() < end {
            return Err(Verdict::More);
        }
        block.extend_from_slice(&src[offset + HEADER_LEN..end]);
        if block.len() > MAX_HEADER_BLOCK_SIZE {
            return Err(connection_error(
                Reason::ENHANCE_YOUR_CALM,
                "header block too large",
            ));
        }
        offset = end;
        if cont.is_end_headers() {
            return Ok((Bytes::from(block), offset));
        }
    }
}

/// Remove trailing padding when the PADDED flag is set.
fn strip_padding<'a>(head: &FrameHeader, payload: &'a [u8]) -> Result<&'a [u8], Verdict> {
    if head.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    let Some((&pad_length, rest)) = payload.split_first() else {
        return Err(connection_error(
            Reason::PROTOCOL_ERROR,
            "padded frame without a padding length",
        ));
    };
    if pad_length as usize > rest.len() {
        return Err(connection_error(
            Reason::PROTOCOL_ERROR,
            "padding exceeds the frame payload",
        ));
    }
    Ok(&rest[..rest.len() - pad_length as usize])
}

/// Remove padding and the priority fields from a HEADERS payload.
fn strip_headers_fields<'a>(head: &FrameHeader, payload: &'a [u8]) -> Result<&'a [u8], Verdict> {
    let fields = strip_padding(head, payload)?;
    if head.flags & flags::PRIORITY == 0 {
        return Ok(fields);
    }
    // 4 bytes of stream dependency plus 1 byte of weight.
    if fields.len() < 5 {
        return Err(connection_error(
            Reason::FRAME_SIZE_ERROR,
            "HEADERS frame too short for its priority fields",
        ));
    }
    Ok(&fields[5..])
}

/// Wire encoders for the frames the client sends.
pub mod build {
    use super::{flags, frame_type, Reason, HEADER_LEN};

    fn head(length: usize, kind: u8, flag: u8, stream_id: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + length);
        frame.extend_from_slice(&[(length >> 16) as u8, (length >> 8) as u8, length as u8]);
        frame.push(kind);
        frame.push(flag);
        frame.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
        frame
    }

    pub fn settings(settings: &[(u16, u32)]) -> Vec<u8> {
        let mut frame = head(settings.len() * 6, frame_type::SETTINGS, 0, 0);
        for &(id, value) in settings {
            frame.extend_from_slice(&id.to_be_bytes());
            frame.extend_from_slice(&value.to_be_bytes());
        }
        frame
    }

    pub fn settings_ack() -> Vec<u8> {
        head(0, frame_type::SETTINGS, flags::ACK, 0)
    }

    pub fn ping(payload: [u8; 8], ack: bool) -> Vec<u8> {
        let flag = if ack { flags::ACK } else { 0 };
        let mut frame = head(8, frame_type::PING, flag, 0);
        frame.extend_from_slice(&payload);
        frame
    }

    /// `stream_id` 0 credits the connection window.
    pub fn window_update(stream_id: u32, increment: u32) -> Vec<u8> {
        let mut frame = head(4, frame_type::WINDOW_UPDATE, 0, stream_id);
        frame.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
        frame
    }

    /// END_HEADERS is always set; the block must be complete.
    pub fn headers(stream_id: u32, end_stream: bool, block: &[u8]) -> Vec<u8> {
        let mut flag = flags::END_HEADERS;
        if end_stream {
            flag |= flags::END_STREAM;
        }
        let mut frame = head(block.len(), frame_type::HEADERS, flag, stream_id);
        frame.extend_from_slice(block);
        frame
    }

    pub fn data(stream_id: u32, end_stream: bool, payload: &[u8]) -> Vec<u8> {
        let flag = if end_stream { flags::END_STREAM } else { 0 };
        let mut frame = head(payload.len(), frame_type::DATA, flag, stream_id);
        frame.extend_from_slice(payload);
        frame
    }

    pub fn rst_stream(stream_id: u32, reason: Reason) -> Vec<u8> {
        let mut frame = head(4, frame_type::RST_STREAM, 0, stream_id);
        frame.extend_from_slice(&reason.code().to_be_bytes());
        frame
    }

    pub fn goaway(last_stream_id: u32, reason: Reason, debug: &[u8]) -> Vec<u8> {
        let mut frame = head(8 + debug.len(), frame_type::GOAWAY, 0, 0);
        frame.extend_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
        frame.extend_from_slice(&reason.code().to_be_bytes());
        frame.extend_from_slice(debug);
        frame
    }
}
