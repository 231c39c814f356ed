//! Typed faults: protocol violations, option rejection, startup failures.

use thiserror::Error;

use crate::frame::Reason;

/// A protocol fault raised by the machine while consuming a frame.
///
/// A `Stream` fault is recoverable: the engine resets the offending stream
/// and the connection continues. A `Connection` fault tears the whole
/// connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("stream {id} error ({reason}): {message}")]
    Stream {
        id: u32,
        reason: Reason,
        message: &'static str,
    },
    #[error("connection error ({reason}): {message}")]
    Connection {
        reason: Reason,
        message: &'static str,
    },
}

/// Rejected engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("invalid http2 option `keepalive`: interval must be positive")]
    Keepalive,
    #[error("invalid http2 option `content_handlers`: {0}")]
    ContentHandlers(String),
}

/// Failure to bring an engine up on a freshly connected transport.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("transport write failed during the connection preface: {0}")]
    Io(#[from] std::io::Error),
}
