//! Response body pipelines.
//!
//! When the final response headers arrive on a stream, the engine asks the
//! configured [`HandlerFactory`] to build that stream's [`ContentHandler`]
//! and feeds every DATA payload through it. The default pipeline forwards
//! chunks verbatim to the stream's reply target; richer factories can stack
//! decoders (content decompression and the like) in front of that.

use std::fmt;

use bytes::Bytes;

use crate::error::OptionsError;
use crate::hpack::Header;
use crate::machine::Fin;
use crate::messages::{Message, ReplyTo};
use crate::stream_table::StreamRef;

/// Per-stream body pipeline state.
pub trait ContentHandler: fmt::Debug {
    /// Feed one decoded DATA payload. `fin` marks the last chunk.
    fn data(&mut self, fin: Fin, payload: Bytes);
}

/// Describes how to build a body pipeline; this is the `content_handlers`
/// engine option.
pub trait HandlerFactory: fmt::Debug {
    /// Checked once during option validation.
    fn validate(&self) -> Result<(), OptionsError> {
        Ok(())
    }

    /// Build the pipeline for a stream whose final response headers just
    /// arrived.
    fn build(
        &self,
        stream_ref: StreamRef,
        reply_to: &ReplyTo,
        status: u16,
        headers: &[Header],
    ) -> Box<dyn ContentHandler>;
}

/// The default pipeline: hand every chunk to the reply target untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFactory;

impl HandlerFactory for PassthroughFactory {
    fn build(
        &self,
        stream_ref: StreamRef,
        reply_to: &ReplyTo,
        _status: u16,
        _headers: &[Header],
    ) -> Box<dyn ContentHandler> {
        Box::new(Passthrough {
            stream_ref,
            reply_to: reply_to.clone(),
        })
    }
}

#[derive(Debug)]
struct Passthrough {
    stream_ref: StreamRef,
    reply_to: ReplyTo,
}

impl ContentHandler for Passthrough {
    fn data(&mut self, fin: Fin, payload: Bytes) {
        let _ = self.reply_to.send(Message::Data {
            stream_ref: self.stream_ref,
            fin,
            payload,
        });
    }
}
