//! # Broker Relay
//!
//! Joins a [`BrokerClient`] to a tick loop.
//!
//! ```text
//! delivery context                         tick thread
//! ────────────────                         ───────────
//! sink(Message) ──append──▶ RelayBuffer ──process()──▶ ObserverRegistry
//!                                                      (registration order)
//! publish()/publish_to() ─────────────────────────────▶ BrokerClient
//! ```
//!
//! Observers only ever run on the thread calling [`BrokerRelay::process`].
//! Teardown closes the broker first and then seals the buffer, so a delivery
//! racing `close` is either buffered whole or rejected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tickbridge_broker::{BrokerClient, BrokerError, BrokerResult, ConnectionStatus, DeliverySink};
use tickbridge_core::{Message, ObserverRegistry, PayloadCodec, RelayBuffer, SubscriptionBinding};
use tracing::{debug, error, info, trace, warn};

use crate::config::RelayConfig;

/// Relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Processing cycles run.
    pub cycles: AtomicU64,
    /// Messages forwarded to observers.
    pub forwarded: AtomicU64,
    /// Messages published.
    pub published: AtomicU64,
    /// Publishes that were refused or failed.
    pub publish_failures: AtomicU64,
}

/// Broker deliveries in, one batch per tick out.
pub struct BrokerRelay<B: BrokerClient> {
    broker: B,
    bindings: Vec<SubscriptionBinding>,
    exchange: String,
    publish_routing_key: String,
    buffer: Arc<RelayBuffer>,
    observers: ObserverRegistry,
    stats: RelayStats,
    /// Reused drain target.
    scratch: Vec<Message>,
    closed: bool,
}

impl<B: BrokerClient> BrokerRelay<B> {
    /// Creates an unopened relay.
    ///
    /// # Arguments
    ///
    /// * `broker` - Client to receive from and publish through
    /// * `bindings` - Subscriptions passed to the client on open
    /// * `exchange` - Exchange used by [`BrokerRelay::publish`]
    /// * `publish_routing_key` - Routing key used by [`BrokerRelay::publish`]
    #[must_use]
    pub fn new(
        broker: B,
        bindings: Vec<SubscriptionBinding>,
        exchange: impl Into<String>,
        publish_routing_key: impl Into<String>,
    ) -> Self {
        Self::with_capacity(
            broker,
            bindings,
            exchange,
            publish_routing_key,
            tickbridge_core::DEFAULT_BUFFER_CAPACITY,
        )
    }

    /// Creates an unopened relay whose buffer starts with `capacity` slots.
    #[must_use]
    pub fn with_capacity(
        broker: B,
        bindings: Vec<SubscriptionBinding>,
        exchange: impl Into<String>,
        publish_routing_key: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            broker,
            bindings,
            exchange: exchange.into(),
            publish_routing_key: publish_routing_key.into(),
            buffer: Arc::new(RelayBuffer::with_capacity(capacity)),
            observers: ObserverRegistry::new(),
            stats: RelayStats::default(),
            scratch: Vec::with_capacity(capacity),
            closed: false,
        }
    }

    /// Creates an unopened relay from a loaded config.
    #[must_use]
    pub fn from_config(broker: B, config: &RelayConfig) -> Self {
        Self::with_capacity(
            broker,
            config.broker.subscription_bindings(),
            config.broker.exchange.name.clone(),
            config.relay.publish_routing_key.clone(),
            config.relay.buffer_capacity,
        )
    }

    /// Connects and starts buffering deliveries.
    ///
    /// A failure is logged once and returned; the relay stays usable but
    /// receives nothing and refuses to publish.
    ///
    /// # Errors
    ///
    /// Whatever the client reported, or [`BrokerError::NotConnected`] if the
    /// relay was already closed. A second `open` returns
    /// [`BrokerError::AlreadyOpen`] and leaves the existing connection alone.
    pub fn open(&mut self) -> BrokerResult<()> {
        if self.closed {
            return Err(BrokerError::NotConnected);
        }

        let buffer = Arc::clone(&self.buffer);
        let sink: DeliverySink = Arc::new(move |message: Message| {
            trace!(routing_key = message.routing_key(), "delivery received");
            if !buffer.append(message) {
                debug!("delivery after close dropped");
            }
        });

        match self.broker.open(&self.bindings, sink) {
            Ok(()) => {
                info!(bindings = self.bindings.len(), "connection established");
                Ok(())
            }
            Err(BrokerError::AlreadyOpen) => {
                warn!(status = %self.broker.status(), "relay already opened, ignoring open");
                Err(BrokerError::AlreadyOpen)
            }
            Err(err) => {
                error!(error = %err, "connection failed, relay will not receive messages");
                Err(err)
            }
        }
    }

    /// Runs one polling cycle: drains the buffer and forwards every message
    /// to every observer.
    ///
    /// The batch leaves the relay before any observer runs. If an observer
    /// panics, the rest of that batch is dropped rather than replayed.
    ///
    /// # Returns
    ///
    /// Number of messages forwarded.
    pub fn process(&mut self) -> usize {
        let mut batch = std::mem::take(&mut self.scratch);
        let count = self.buffer.drain_into(&mut batch);
        let forwarded = self.observers.forward_all(&batch);
        batch.clear();
        self.scratch = batch;

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        self.stats
            .forwarded
            .fetch_add(forwarded as u64, Ordering::Relaxed);
        if count > 0 {
            trace!(count, "forwarded batch");
        }
        forwarded
    }

    /// Publishes to the configured exchange and routing key.
    ///
    /// # Returns
    ///
    /// `true` if the client accepted the message.
    pub fn publish(&self, payload: &[u8]) -> bool {
        self.publish_to(&self.publish_routing_key, payload)
    }

    /// Publishes to the configured exchange with `routing_key`.
    ///
    /// Publishing while not connected logs an error and sends nothing.
    ///
    /// # Returns
    ///
    /// `true` if the client accepted the message.
    pub fn publish_to(&self, routing_key: &str, payload: &[u8]) -> bool {
        let status = self.broker.status();
        if !status.is_connected() {
            error!(routing_key, %status, "cannot publish, not connected to broker");
            self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.broker.publish(&self.exchange, routing_key, payload) {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                error!(routing_key, error = %err, "publish failed");
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Encodes `value` with `codec` and publishes it to the configured
    /// routing key.
    ///
    /// # Returns
    ///
    /// `true` if the value encoded and the client accepted it.
    pub fn publish_value<C: PayloadCodec>(&self, codec: &C, value: &C::Value) -> bool {
        match codec.encode(value) {
            Ok(payload) => self.publish(&payload),
            Err(err) => {
                warn!(error = %err, "payload encoding failed, nothing published");
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Closes the broker, then seals the buffer. Safe to call repeatedly.
    ///
    /// Messages buffered before the seal can still be drained by
    /// [`BrokerRelay::process`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(err) = self.broker.close() {
            warn!(error = %err, "broker reported an error while closing");
        }
        self.buffer.seal();
        info!(pending = self.buffer.len(), "relay closed");
    }

    /// Connection state of the underlying client.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.broker.status()
    }

    /// Observers notified by [`BrokerRelay::process`].
    #[must_use]
    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Messages waiting for the next cycle.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Relay counters.
    #[must_use]
    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// The shared delivery buffer.
    #[must_use]
    pub fn buffer(&self) -> &Arc<RelayBuffer> {
        &self.buffer
    }

    /// The underlying client.
    #[must_use]
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Returns true once [`BrokerRelay::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<B: BrokerClient> Drop for BrokerRelay<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: BrokerClient> std::fmt::Debug for BrokerRelay<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerRelay")
            .field("status", &self.broker.status())
            .field("exchange", &self.exchange)
            .field("publish_routing_key", &self.publish_routing_key)
            .field("pending", &self.buffer.len())
            .field("observers", &self.observers.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tickbridge_broker::{MemoryBroker, MemoryHub};
    use tickbridge_core::IntegerListCodec;

    const EXCHANGE: &str = "BuildingSimulation";

    fn relay(hub: &MemoryHub) -> BrokerRelay<MemoryBroker> {
        BrokerRelay::new(
            MemoryBroker::new(hub.clone(), "guest", "guest"),
            vec![SubscriptionBinding::new(EXCHANGE, "building.record.click")],
            EXCHANGE,
            "building.clicked",
        )
    }

    fn record(relay: &BrokerRelay<MemoryBroker>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let clone = Arc::clone(&seen);
        relay.observers().subscribe(move |message| {
            clone.lock().push(message.as_text().unwrap_or("?").to_string());
        });
        seen
    }

    #[test]
    fn test_deliveries_wait_for_process() {
        let hub = MemoryHub::new();
        let mut relay = relay(&hub);
        let seen = record(&relay);
        relay.open().unwrap();

        hub.publish(EXCHANGE, "building.record.click", b"A");
        hub.publish(EXCHANGE, "building.record.click", b"B");
        assert!(seen.lock().is_empty());
        assert_eq!(relay.pending(), 2);

        assert_eq!(relay.process(), 2);
        assert_eq!(*seen.lock(), ["A", "B"]);
        assert_eq!(relay.process(), 0);
        assert_eq!(relay.stats().forwarded.load(Ordering::Relaxed), 2);
        assert_eq!(relay.stats().cycles.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_publish_goes_to_configured_key() {
        let hub = MemoryHub::new();
        let mut relay = relay(&hub);
        relay.open().unwrap();

        assert!(relay.publish(b"17"));
        assert!(relay.publish_value(&IntegerListCodec::new(), &vec![1, 2]));

        let published = hub.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, EXCHANGE);
        assert_eq!(published[0].1.routing_key(), "building.clicked");
        assert_eq!(published[1].1.payload(), b"[1,2]");
        assert_eq!(relay.stats().published.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_publish_before_open_is_refused() {
        let hub = MemoryHub::new();
        let relay = relay(&hub);

        assert!(!relay.publish(b"17"));
        assert!(hub.published().is_empty());
        assert_eq!(relay.pending(), 0);
        assert_eq!(relay.stats().publish_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panicking_observer_does_not_replay_batch() {
        use std::panic::{catch_unwind, AssertUnwindSafe};
        use std::sync::atomic::AtomicBool;

        let hub = MemoryHub::new();
        let mut relay = relay(&hub);
        let panicked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&panicked);
        relay.observers().subscribe(move |_| {
            if !flag.swap(true, Ordering::SeqCst) {
                panic!("observer failure");
            }
        });
        let seen = record(&relay);
        relay.open().unwrap();

        hub.publish(EXCHANGE, "building.record.click", b"A");
        assert!(catch_unwind(AssertUnwindSafe(|| relay.process())).is_err());

        hub.publish(EXCHANGE, "building.record.click", b"B");
        assert_eq!(relay.process(), 1);
        assert_eq!(*seen.lock(), ["B"]);
        assert_eq!(relay.pending(), 0);
    }

    #[test]
    fn test_second_open_keeps_connection() {
        let hub = MemoryHub::new();
        let mut relay = relay(&hub);
        let seen = record(&relay);
        relay.open().unwrap();

        assert_eq!(relay.open().unwrap_err(), BrokerError::AlreadyOpen);
        assert_eq!(relay.status(), ConnectionStatus::Connected);
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(EXCHANGE, "building.record.click", b"A");
        assert_eq!(relay.process(), 1);
        assert_eq!(*seen.lock(), ["A"]);
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_reopen() {
        let hub = MemoryHub::new();
        let mut relay = relay(&hub);
        relay.open().unwrap();

        relay.close();
        relay.close();
        assert!(relay.is_closed());
        assert!(relay.buffer().is_sealed());
        assert_eq!(relay.status(), ConnectionStatus::Closed);
        assert_eq!(relay.open().unwrap_err(), BrokerError::NotConnected);
    }
}
