//! Application-facing messages and terminal causes.
//!
//! Every live stream has a reply target: a plain `mpsc` sender the engine
//! fires messages into without ever blocking. A disconnected receiver is not
//! an error; the send result is discarded.

use std::fmt;
use std::sync::mpsc::Sender;

use bytes::Bytes;

use crate::frame::Reason;
use crate::hpack::Header;
use crate::machine::Fin;
use crate::stream_table::StreamRef;

/// The identity that receives application messages for a stream.
pub type ReplyTo = Sender<Message>;

/// Messages delivered to a stream's reply target, plus the engine-wide
/// `Down` notification delivered to the owner.
#[derive(Debug, Clone)]
pub enum Message {
    /// An informational (1xx) response.
    Inform {
        stream_ref: StreamRef,
        status: u16,
        headers: Vec<Header>,
    },
    /// The final response headers.
    Response {
        stream_ref: StreamRef,
        fin: Fin,
        status: u16,
        headers: Vec<Header>,
    },
    /// A chunk of the response body, emitted by the content pipeline.
    Data {
        stream_ref: StreamRef,
        fin: Fin,
        payload: Bytes,
    },
    /// Trailing headers, after the body.
    Trailers {
        stream_ref: StreamRef,
        headers: Vec<Header>,
    },
    /// A server push announced on `parent_ref`.
    Push {
        parent_ref: StreamRef,
        promised_ref: StreamRef,
        method: String,
        uri: String,
        headers: Vec<Header>,
    },
    /// The stream terminated abnormally. Exactly one terminal message is
    /// delivered per stream: this one or the end of a normal response.
    Error {
        stream_ref: StreamRef,
        cause: ErrorCause,
    },
    /// Engine-wide failure notification for the owner, carrying the refs of
    /// the streams that were still live.
    Down {
        cause: ErrorCause,
        streams: Vec<StreamRef>,
    },
}

/// Why a stream (or the whole engine) went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCause {
    /// A per-stream protocol fault, ours or the server's.
    Stream {
        reason: Reason,
        message: &'static str,
    },
    /// A connection-level protocol fault.
    Connection {
        reason: Reason,
        message: &'static str,
    },
    /// The transport went away.
    Closed { message: &'static str },
    /// The server sent GOAWAY.
    GoingAway { message: &'static str },
    /// The caller used a stream that does not exist or is already closed.
    BadState { message: &'static str },
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::Stream { reason, message } => {
                write!(f, "stream error ({reason}): {message}")
            }
            ErrorCause::Connection { reason, message } => {
                write!(f, "connection error ({reason}): {message}")
            }
            ErrorCause::Closed { message }
            | ErrorCause::GoingAway { message }
            | ErrorCause::BadState { message } => f.write_str(message),
        }
    }
}
