//! h2-engine: a client-side HTTP/2 protocol engine
//!
//! This crate drives a single HTTP/2 connection over any byte-oriented
//! transport (plain TCP, TLS, or a TLS proxy), multiplexing many concurrent
//! request/response streams on it. It is sans-I/O at the core: the protocol
//! state machine never touches a socket, the engine only writes to an
//! abstract byte sink, and inbound bytes are fed in as opaque chunks by
//! whoever owns the connection.
//!
//! # Features
//!
//! - **Sans-I/O machine**: settings, HPACK tables, stream states and flow
//!   control live in a pure state object, testable frame by frame
//! - **Multiplexing**: client-initiated streams and server pushes share one
//!   connection, keyed by opaque stream refs on the application side
//! - **Flow control**: per-stream and connection windows on both directions;
//!   outbound data queues inside the machine until credit arrives
//! - **HPACK**: header compression via `fluke-hpack`
//! - **Telemetry**: every request/response transition reported through a
//!   pluggable event handler
//!
//! # Quick start
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::sync::mpsc;
//!
//! use h2_engine::{Engine, IoTransport, NoopEventHandler, Options, StreamRef};
//!
//! let io = TcpStream::connect("example.com:80")?;
//! let (owner, _messages) = mpsc::channel();
//! let mut events = NoopEventHandler;
//!
//! let mut engine = Engine::new(
//!     owner.clone(),
//!     IoTransport::tcp(io),
//!     Options::default(),
//!     &mut events,
//! )?;
//!
//! // Submit a request; the response arrives as messages on the channel.
//! let stream_ref = StreamRef::new();
//! let _ = engine.headers(
//!     stream_ref,
//!     owner,
//!     "GET",
//!     "example.com",
//!     80,
//!     "/",
//!     vec![],
//!     &mut events,
//! );
//!
//! // Feed bytes read from the socket into `engine.handle(..)` until it
//! // returns `Control::Close`.
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! Dataflow: bytes in → frame codec → protocol machine → engine (messages,
//! events, stream table, outbound frames) → frame codec → bytes out.
//!
//! - [`frame`]: pure byte/frame translator with CONTINUATION reassembly
//! - [`machine`]: the protocol state machine; no I/O
//! - [`engine`]: the stateful shell that owns the transport and the streams
//!
//! The crate does not do connection establishment (DNS, TCP, TLS), response
//! body decoding beyond the pluggable content pipeline, or HTTP/1.1.

pub mod content;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod hpack;
pub mod machine;
pub mod messages;
pub mod options;
pub mod stream_table;
pub mod transport;

pub use content::{ContentHandler, HandlerFactory, PassthroughFactory};
pub use engine::{Control, Engine, StreamInfo};
pub use error::{InitError, OptionsError, ProtoError};
pub use events::{EventHandler, NoopEventHandler};
pub use frame::{Reason, CONNECTION_PREFACE};
pub use hpack::{Header, HpackDecoder, HpackEncoder};
pub use machine::{Fin, HalfState, Machine, StreamId};
pub use messages::{ErrorCause, Message, ReplyTo};
pub use options::{Keepalive, Options};
pub use stream_table::StreamRef;
pub use transport::{IoTransport, Transport, TransportKind};
