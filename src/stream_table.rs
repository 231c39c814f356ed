//! The engine's table of active streams.
//!
//! Streams are addressable two ways: by wire id and by the opaque ref the
//! application holds. Iteration follows insertion order so shutdown
//! messaging is deterministic.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::content::ContentHandler;
use crate::machine::StreamId;
use crate::messages::ReplyTo;

static NEXT_REF: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique stream handle. This is the identity the
/// application sees; the wire id never leaves the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamRef(u64);

impl StreamRef {
    /// Mint a fresh ref. Never repeats within a process.
    #[allow(clippy::new_without_default)]
    pub fn new() -> StreamRef {
        StreamRef(NEXT_REF.fetch_add(1, Ordering::Relaxed))
    }
}

/// One active request or server push.
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    pub stream_ref: StreamRef,
    pub reply_to: ReplyTo,
    /// Body pipeline state; present between the final response headers and
    /// the end of the body.
    pub handler: Option<Box<dyn ContentHandler>>,
}

#[derive(Debug, Default)]
pub struct StreamTable {
    streams: IndexMap<StreamId, Stream>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stream: Stream) {
        debug_assert!(!self.streams.contains_key(&stream.id));
        self.streams.insert(stream.id, stream);
    }

    pub fn by_id(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn by_id_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn by_ref(&self, stream_ref: StreamRef) -> Option<&Stream> {
        self.streams
            .values()
            .find(|stream| stream.stream_ref == stream_ref)
    }

    /// `shift_remove` keeps the iteration order of the survivors stable.
    pub fn remove(&mut self, id: StreamId) -> Option<Stream> {
        self.streams.shift_remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    /// Empty the table in insertion order.
    pub fn drain(&mut self) -> Vec<Stream> {
        self.streams.drain(..).map(|(_, stream)| stream).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
