//! The byte sink the engine writes to.
//!
//! The engine owns its transport exclusively and never partial-writes.
//! Reads are not modeled here: the coordinator delivers inbound bytes as
//! opaque chunks to [`Engine::handle`](crate::engine::Engine::handle).
//! The only semantic the engine derives from the transport is the request
//! scheme: TLS variants map to `https`.

use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Tls,
    TlsProxy,
}

impl TransportKind {
    pub fn scheme(self) -> &'static str {
        match self {
            TransportKind::Tcp => "http",
            TransportKind::Tls | TransportKind::TlsProxy => "https",
        }
    }
}

pub trait Transport {
    /// Write exactly `bytes`.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn kind(&self) -> TransportKind;

    fn scheme(&self) -> &'static str {
        self.kind().scheme()
    }
}

/// Adapter over any [`Write`] sink, `std::net::TcpStream` included.
#[derive(Debug)]
pub struct IoTransport<W> {
    io: W,
    kind: TransportKind,
}

impl<W: Write> IoTransport<W> {
    pub fn tcp(io: W) -> Self {
        Self {
            io,
            kind: TransportKind::Tcp,
        }
    }

    pub fn tls(io: W) -> Self {
        Self {
            io,
            kind: TransportKind::Tls,
        }
    }

    pub fn tls_proxy(io: W) -> Self {
        Self {
            io,
            kind: TransportKind::TlsProxy,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.io
    }

    pub fn into_inner(self) -> W {
        self.io
    }
}

impl<W: Write> Transport for IoTransport<W> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.io.write_all(bytes)
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}
