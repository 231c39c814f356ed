//! HPACK header compression (RFC 7541).
//!
//! Thin wrapper around `fluke-hpack`. The decoder and encoder each own the
//! dynamic table state for one connection and therefore live inside the
//! protocol machine; they must never be shared across connections.

use std::fmt;

use thiserror::Error;

/// A decoded header pair. Names are kept lowercase on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Pseudo-headers (`:method`, `:status`, ...) sort before regular ones.
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

#[derive(Debug, Error)]
#[error("hpack decoding failed: {detail}")]
pub struct HpackError {
    detail: String,
}

/// Decoder for inbound header blocks.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
        }
    }

    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>, HpackError> {
        let pairs = self.inner.decode(block).map_err(|e| HpackError {
            detail: format!("{e:?}"),
        })?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| {
                Header::new(
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }
}

/// Encoder for outbound header blocks.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encode `(name, value)` pairs, pseudo-headers first.
    pub fn encode<'a, I>(&mut self, headers: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .into_iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();
        self.inner.encode(pairs)
    }
}
