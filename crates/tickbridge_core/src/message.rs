//! # Messages and Bindings
//!
//! The two pieces of data that cross the relay boundary.

use std::fmt;

use crate::error::PayloadResult;
use crate::payload::PayloadCodec;

/// A message delivered by the broker.
///
/// Immutable once built: the relay only moves messages, it never edits them.
/// Arrival order is implicit in the position a message takes in the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// Routing key the message was delivered on.
    routing_key: String,
    /// Raw payload bytes, uninterpreted.
    payload: Vec<u8>,
}

impl Message {
    /// Creates a message from a routing key and raw payload.
    #[must_use]
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }

    /// Creates a message whose payload is UTF-8 text.
    #[must_use]
    pub fn text(routing_key: impl Into<String>, text: &str) -> Self {
        Self::new(routing_key, text.as_bytes().to_vec())
    }

    /// Returns the routing key the message was delivered on.
    #[inline]
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Returns the raw payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Interprets the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::InvalidUtf8`](crate::PayloadError::InvalidUtf8)
    /// if the bytes are not valid UTF-8.
    pub fn as_text(&self) -> PayloadResult<&str> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    /// Decodes the payload with the given codec.
    ///
    /// # Errors
    ///
    /// Propagates whatever the codec reports for malformed payloads.
    pub fn decode<C: PayloadCodec>(&self, codec: &C) -> PayloadResult<C::Value> {
        codec.decode(&self.payload)
    }

    /// Splits the message into routing key and payload.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<u8>) {
        (self.routing_key, self.payload)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Message");
        debug.field("routing_key", &self.routing_key);
        match std::str::from_utf8(&self.payload) {
            Ok(text) => debug.field("payload", &text),
            Err(_) => debug.field("payload", &format_args!("<{} bytes>", self.payload.len())),
        };
        debug.finish()
    }
}

/// Which inbound traffic reaches the buffer.
///
/// Fixed at setup. Several bindings may feed the same buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionBinding {
    /// Exchange the queue is bound to.
    exchange: String,
    /// Routing key (or topic pattern) of the binding.
    routing_key: String,
}

impl SubscriptionBinding {
    /// Creates a binding of `routing_key` on `exchange`.
    #[must_use]
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Returns the exchange name.
    #[inline]
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Returns the routing key or topic pattern.
    #[inline]
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Returns true if a message published to `exchange` with `routing_key`
    /// is selected by this binding under topic-exchange rules.
    #[must_use]
    pub fn matches(&self, exchange: &str, routing_key: &str) -> bool {
        self.exchange == exchange && crate::topic::topic_matches(&self.routing_key, routing_key)
    }
}

impl fmt::Display for SubscriptionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exchange, self.routing_key)
    }
}
