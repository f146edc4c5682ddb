//! # In-Process Broker
//!
//! A topic exchange living in process memory. [`MemoryHub`] plays the broker;
//! [`MemoryBroker`] is a [`BrokerClient`] attached to it.
//!
//! ```text
//!   MemoryBroker::publish ─┐
//!   MemoryHub::publish ────┼─▶ MemoryHub ──(topic match)──▶ sink of each
//!                          │   (Mutex)                      attached client
//! ```
//!
//! Deliveries run synchronously on the publishing thread, after the hub lock
//! is released. A sink may therefore publish back into the hub.
//!
//! The hub can be made unreachable, can demand credentials and can drop every
//! attached connection, so failure paths are testable without a network.
//!
//! Every publish is recorded in an unbounded log for inspection; see
//! [`MemoryHub::clear_published`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tickbridge_core::{Message, SubscriptionBinding};
use tracing::{debug, info, warn};

use crate::client::{BrokerClient, DeliverySink};
use crate::error::{BrokerError, BrokerResult};
use crate::status::{ConnectionStatus, SharedStatus};

/// Address reported in errors and logs for the in-process hub.
const HUB_ADDRESS: &str = "memory://hub";

struct Subscriber {
    id: u64,
    bindings: Vec<SubscriptionBinding>,
    sink: DeliverySink,
    status: Arc<SharedStatus>,
}

struct HubState {
    reachable: bool,
    credentials: Option<(String, String)>,
    next_id: u64,
    subscribers: Vec<Subscriber>,
    published: Vec<(String, Message)>,
}

/// In-process topic exchange.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    /// Creates a reachable hub that accepts any credentials.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                reachable: true,
                credentials: None,
                next_id: 1,
                subscribers: Vec::new(),
                published: Vec::new(),
            })),
        }
    }

    /// Routes a message to every attached client with a matching binding.
    ///
    /// A client bound several times with overlapping patterns still receives
    /// one copy.
    ///
    /// # Returns
    ///
    /// Number of clients the message was delivered to.
    pub fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> usize {
        let sinks: Vec<DeliverySink> = {
            let mut state = self.state.lock();
            state
                .published
                .push((exchange.to_string(), Message::new(routing_key, payload.to_vec())));
            state
                .subscribers
                .iter()
                .filter(|sub| sub.bindings.iter().any(|b| b.matches(exchange, routing_key)))
                .map(|sub| Arc::clone(&sub.sink))
                .collect()
        };

        for sink in &sinks {
            sink(Message::new(routing_key, payload.to_vec()));
        }

        debug!(exchange, routing_key, receivers = sinks.len(), "hub routed message");
        sinks.len()
    }

    /// Makes new connections succeed (`true`) or fail as unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Rejects connections that do not present these credentials.
    pub fn require_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        self.state.lock().credentials = Some((username.into(), password.into()));
    }

    /// Detaches every client as if the broker went away.
    ///
    /// Affected clients report [`ConnectionStatus::Disconnected`].
    ///
    /// # Returns
    ///
    /// Number of clients dropped.
    pub fn drop_connections(&self) -> usize {
        let dropped = std::mem::take(&mut self.state.lock().subscribers);
        for sub in &dropped {
            sub.status
                .transition(ConnectionStatus::Connected, ConnectionStatus::Disconnected);
        }
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "hub dropped all connections");
        }
        dropped.len()
    }

    /// Everything published so far as `(exchange, message)`, oldest first.
    ///
    /// The log keeps every message for the life of the hub. Long-running
    /// demos should call [`MemoryHub::clear_published`] periodically.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Message)> {
        self.state.lock().published.clone()
    }

    /// Empties the publish log.
    ///
    /// # Returns
    ///
    /// Number of entries removed.
    pub fn clear_published(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.published.len();
        state.published.clear();
        removed
    }

    /// Number of attached clients.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    fn attach(
        &self,
        username: &str,
        password: &str,
        bindings: &[SubscriptionBinding],
        sink: DeliverySink,
        status: Arc<SharedStatus>,
    ) -> BrokerResult<u64> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(BrokerError::Unreachable {
                address: HUB_ADDRESS.to_string(),
                reason: "hub is not accepting connections".to_string(),
            });
        }
        if let Some((user, pass)) = &state.credentials {
            if user != username || pass != password {
                return Err(BrokerError::Rejected(format!(
                    "access refused for user `{username}`"
                )));
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(Subscriber {
            id,
            bindings: bindings.to_vec(),
            sink,
            status,
        });
        Ok(id)
    }

    fn detach(&self, id: u64) {
        self.state.lock().subscribers.retain(|sub| sub.id != id);
    }

    fn is_reachable(&self) -> bool {
        self.state.lock().reachable
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryHub")
            .field("reachable", &state.reachable)
            .field("subscribers", &state.subscribers.len())
            .field("published", &state.published.len())
            .finish()
    }
}

/// [`BrokerClient`] attached to a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryBroker {
    hub: MemoryHub,
    username: String,
    password: String,
    subscriber: Option<u64>,
    opened: bool,
    status: Arc<SharedStatus>,
}

impl MemoryBroker {
    /// Creates an unopened client for `hub`.
    #[must_use]
    pub fn new(hub: MemoryHub, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            hub,
            username: username.into(),
            password: password.into(),
            subscriber: None,
            opened: false,
            status: Arc::new(SharedStatus::default()),
        }
    }

    /// The hub this client talks to.
    #[must_use]
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

impl BrokerClient for MemoryBroker {
    fn open(&mut self, bindings: &[SubscriptionBinding], sink: DeliverySink) -> BrokerResult<()> {
        if self.opened {
            return Err(BrokerError::AlreadyOpen);
        }
        self.opened = true;
        self.status.store(ConnectionStatus::Connecting);

        match self.hub.attach(
            &self.username,
            &self.password,
            bindings,
            sink,
            Arc::clone(&self.status),
        ) {
            Ok(id) => {
                self.subscriber = Some(id);
                self.status.store(ConnectionStatus::Connected);
                info!(bindings = bindings.len(), "attached to memory hub");
                Ok(())
            }
            Err(err) => {
                self.status.store(ConnectionStatus::Failed);
                Err(err)
            }
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.status.load()
    }

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        if !self.status.load().is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if !self.hub.is_reachable() {
            return Err(BrokerError::Operation {
                operation: "publish",
                reason: "hub is not accepting messages".to_string(),
            });
        }
        self.hub.publish(exchange, routing_key, payload);
        Ok(())
    }

    fn close(&mut self) -> BrokerResult<()> {
        if self.status.load().is_closed() {
            return Ok(());
        }
        if let Some(id) = self.subscriber.take() {
            self.hub.detach(id);
        }
        self.status.store(ConnectionStatus::Closed);
        Ok(())
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        if let Some(id) = self.subscriber.take() {
            self.hub.detach(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn collecting_sink() -> (DeliverySink, Arc<PlMutex<Vec<Message>>>) {
        let received = Arc::new(PlMutex::new(Vec::new()));
        let clone = Arc::clone(&received);
        let sink: DeliverySink = Arc::new(move |message| clone.lock().push(message));
        (sink, received)
    }

    fn bindings(keys: &[&str]) -> Vec<SubscriptionBinding> {
        keys.iter()
            .map(|key| SubscriptionBinding::new("BuildingSimulation", *key))
            .collect()
    }

    #[test]
    fn test_open_and_receive() {
        let hub = MemoryHub::new();
        let mut client = MemoryBroker::new(hub.clone(), "guest", "guest");
        assert_eq!(client.status(), ConnectionStatus::Disconnected);

        let (sink, received) = collecting_sink();
        client.open(&bindings(&["building.record.click"]), sink).unwrap();
        assert_eq!(client.status(), ConnectionStatus::Connected);

        assert_eq!(hub.publish("BuildingSimulation", "building.record.click", b"A"), 1);
        assert_eq!(hub.publish("BuildingSimulation", "building.record.update", b"B"), 0);
        assert_eq!(hub.publish("OtherExchange", "building.record.click", b"C"), 0);

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload(), b"A");
    }

    #[test]
    fn test_overlapping_bindings_deliver_once() {
        let hub = MemoryHub::new();
        let mut client = MemoryBroker::new(hub.clone(), "guest", "guest");
        let (sink, received) = collecting_sink();
        client
            .open(&bindings(&["building.record.click", "building.#"]), sink)
            .unwrap();

        hub.publish("BuildingSimulation", "building.record.click", b"A");
        assert_eq!(received.lock().len(), 1);
    }

    #[test]
    fn test_unreachable_and_rejected() {
        let hub = MemoryHub::new();
        hub.set_reachable(false);
        let mut client = MemoryBroker::new(hub.clone(), "guest", "guest");
        let (sink, _) = collecting_sink();
        let err = client.open(&bindings(&["a"]), Arc::clone(&sink)).unwrap_err();
        assert!(matches!(err, BrokerError::Unreachable { .. }));
        assert_eq!(client.status(), ConnectionStatus::Failed);

        hub.set_reachable(true);
        hub.require_credentials("incubator", "incubator");
        let mut client = MemoryBroker::new(hub.clone(), "guest", "guest");
        let err = client.open(&bindings(&["a"]), sink).unwrap_err();
        assert!(matches!(err, BrokerError::Rejected(_)));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let hub = MemoryHub::new();
        let mut client = MemoryBroker::new(hub, "guest", "guest");
        let (sink, _) = collecting_sink();
        client.open(&bindings(&["a"]), Arc::clone(&sink)).unwrap();
        assert_eq!(
            client.open(&bindings(&["a"]), sink).unwrap_err(),
            BrokerError::AlreadyOpen
        );
    }

    #[test]
    fn test_publish_requires_connection() {
        let hub = MemoryHub::new();
        let client = MemoryBroker::new(hub.clone(), "guest", "guest");
        assert_eq!(
            client.publish("BuildingSimulation", "building.clicked", b"1").unwrap_err(),
            BrokerError::NotConnected
        );
        assert!(hub.published().is_empty());
    }

    #[test]
    fn test_drop_connections_and_close() {
        let hub = MemoryHub::new();
        let mut client = MemoryBroker::new(hub.clone(), "guest", "guest");
        let (sink, received) = collecting_sink();
        client.open(&bindings(&["#"]), sink).unwrap();

        assert_eq!(hub.drop_connections(), 1);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        hub.publish("BuildingSimulation", "x", b"late");
        assert!(received.lock().is_empty());

        client.close().unwrap();
        client.close().unwrap();
        assert_eq!(client.status(), ConnectionStatus::Closed);
    }

    #[test]
    fn test_clear_published_log() {
        let hub = MemoryHub::new();
        hub.publish("BuildingSimulation", "building.clicked", b"1");
        hub.publish("BuildingSimulation", "building.clicked", b"2");

        assert_eq!(hub.clear_published(), 2);
        assert!(hub.published().is_empty());

        hub.publish("BuildingSimulation", "building.clicked", b"3");
        assert_eq!(hub.published().len(), 1);
    }

    #[test]
    fn test_sink_may_publish_back_into_hub() {
        let hub = MemoryHub::new();
        let mut client = MemoryBroker::new(hub.clone(), "guest", "guest");
        let echo_hub = hub.clone();
        let sink: DeliverySink = Arc::new(move |message: Message| {
            if message.routing_key() == "ping" {
                echo_hub.publish("BuildingSimulation", "pong", message.payload());
            }
        });
        client.open(&bindings(&["ping"]), sink).unwrap();

        hub.publish("BuildingSimulation", "ping", b"1");
        let published = hub.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].1.routing_key(), "pong");
    }
}
