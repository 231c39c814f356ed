//! Engine configuration.

use std::time::Duration;

use crate::content::{HandlerFactory, PassthroughFactory};
use crate::error::OptionsError;

/// How often the engine owner should trigger a keepalive PING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keepalive {
    /// Never ping.
    Infinity,
    /// Ping every interval. Must be positive.
    Interval(Duration),
}

/// Validated engine options. Construction goes through struct update on
/// `Options::default()`; `validate` runs once at engine creation.
#[derive(Debug)]
pub struct Options {
    /// How to build per-stream response body pipelines.
    pub content_handlers: Box<dyn HandlerFactory>,
    pub keepalive: Keepalive,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            content_handlers: Box::new(PassthroughFactory),
            keepalive: Keepalive::Infinity,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if let Keepalive::Interval(interval) = self.keepalive {
            if interval.is_zero() {
                return Err(OptionsError::Keepalive);
            }
        }
        self.content_handlers.validate()
    }
}
