//! # Observer Registry
//!
//! Synchronous fan-out of drained messages to interested parties.
//!
//! Observers are invoked on the tick thread, in registration order, once per
//! forwarded message. The handler list is snapshotted before each forward, so
//! an observer may subscribe or unsubscribe from inside its own callback; the
//! change applies from the next forward on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::message::Message;
use crate::payload::PayloadCodec;
use crate::topic::topic_matches;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Registry of message observers.
pub struct ObserverRegistry {
    /// Registered handlers, in registration order.
    handlers: RwLock<Vec<(ObserverId, Handler)>>,
    /// Next id to hand out.
    next_id: AtomicU64,
    /// Total handler invocations.
    notifications: AtomicU64,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            notifications: AtomicU64::new(0),
        }
    }

    /// Registers a handler for every forwarded message.
    pub fn subscribe<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Registers a handler for messages whose routing key matches `pattern`.
    pub fn subscribe_topic<F>(&self, pattern: impl Into<String>, handler: F) -> ObserverId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        self.subscribe(move |message| {
            if topic_matches(&pattern, message.routing_key()) {
                handler(message);
            }
        })
    }

    /// Registers a handler that receives the decoded payload.
    ///
    /// Payloads the codec rejects are logged and skipped for this handler
    /// only; other observers still see the message.
    pub fn subscribe_decoded<C, F>(&self, codec: C, handler: F) -> ObserverId
    where
        C: PayloadCodec + Send + Sync + 'static,
        F: Fn(&Message, C::Value) + Send + Sync + 'static,
    {
        self.subscribe(move |message| match codec.decode(message.payload()) {
            Ok(value) => handler(message, value),
            Err(err) => {
                tracing::warn!(
                    routing_key = message.routing_key(),
                    bytes = message.len(),
                    "dropping undecodable payload: {}",
                    err
                );
            }
        })
    }

    /// Removes a handler.
    ///
    /// # Returns
    ///
    /// `true` if the handler was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Total handler invocations so far.
    #[must_use]
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Forwards one message to every handler, in registration order.
    pub fn forward(&self, message: &Message) {
        let handlers = self.snapshot();
        self.notify(&handlers, message);
    }

    /// Forwards each message, in slice order, to every handler.
    ///
    /// # Returns
    ///
    /// The number of messages forwarded.
    pub fn forward_all(&self, messages: &[Message]) -> usize {
        if messages.is_empty() {
            return 0;
        }
        let handlers = self.snapshot();
        for message in messages {
            self.notify(&handlers, message);
        }
        messages.len()
    }

    fn snapshot(&self) -> Vec<Handler> {
        self.handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    fn notify(&self, handlers: &[Handler], message: &Message) {
        for handler in handlers {
            handler(message);
        }
        self.notifications
            .fetch_add(handlers.len() as u64, Ordering::Relaxed);
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .field("notifications", &self.notifications())
            .finish()
    }
}
