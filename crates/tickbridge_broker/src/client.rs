//! # Broker Client Trait
//!
//! The boundary the relay needs from a messaging client: deliver bytes with a
//! routing key, asynchronously and in arrival order, and accept bytes for
//! publishing.

use std::sync::Arc;

use tickbridge_core::{Message, SubscriptionBinding};

use crate::error::BrokerResult;
use crate::status::ConnectionStatus;

/// Callback invoked once per delivered message.
///
/// Called from the client's delivery context, which is usually not the thread
/// that owns the client. Must return quickly.
pub type DeliverySink = Arc<dyn Fn(Message) + Send + Sync>;

/// A messaging client the relay can drive.
///
/// Lifecycle: `open` once, then `publish` any number of times while
/// connected, then `close`. `close` is idempotent.
pub trait BrokerClient: Send {
    /// Connects, declares a queue, binds it to every binding and starts push
    /// delivery into `sink`.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::AlreadyOpen`](crate::BrokerError::AlreadyOpen) if the
    ///   client was already opened.
    /// - [`BrokerError::Unreachable`](crate::BrokerError::Unreachable) or
    ///   [`BrokerError::Rejected`](crate::BrokerError::Rejected) if the
    ///   connection cannot be established.
    /// - [`BrokerError::Operation`](crate::BrokerError::Operation) if a
    ///   declare, bind or consume step fails.
    fn open(&mut self, bindings: &[SubscriptionBinding], sink: DeliverySink) -> BrokerResult<()>;

    /// Current connection state.
    fn status(&self) -> ConnectionStatus;

    /// Publishes `payload` to `exchange` with `routing_key`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NotConnected`](crate::BrokerError::NotConnected) is
    /// returned before any I/O is attempted when the client is not connected.
    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()>;

    /// Stops deliveries and closes the connection. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker reported a failure while closing. The
    /// client counts as closed either way.
    fn close(&mut self) -> BrokerResult<()>;
}

impl<B: BrokerClient + ?Sized> BrokerClient for Box<B> {
    fn open(&mut self, bindings: &[SubscriptionBinding], sink: DeliverySink) -> BrokerResult<()> {
        (**self).open(bindings, sink)
    }

    fn status(&self) -> ConnectionStatus {
        (**self).status()
    }

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        (**self).publish(exchange, routing_key, payload)
    }

    fn close(&mut self) -> BrokerResult<()> {
        (**self).close()
    }
}
