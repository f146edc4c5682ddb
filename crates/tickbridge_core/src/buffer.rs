//! # Inbound Relay Buffer
//!
//! Hand-off point between the broker's delivery context and the tick loop.
//!
//! ## Architecture
//!
//! ```text
//!   Delivery thread(s)                         Tick thread
//!   ──────────────────                         ───────────
//!   append(msg) ──┐                       ┌──▶ drain_into(&mut scratch)
//!   append(msg) ──┼──▶ Mutex<BufferState> ┤       │
//!   append(msg) ──┘     - messages: Vec   │       ▼
//!                       - sealed: bool    └──  forward each, in order
//! ```
//!
//! ## Guarantees
//!
//! - Every append and every drain runs under the same lock, so a drain is a
//!   consistent snapshot: nothing torn, nothing seen twice, nothing lost.
//! - An append that races a drain lands in exactly one of that drain or the
//!   next.
//! - Once sealed, appends are rejected whole. Messages already in the buffer
//!   stay drainable.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::message::Message;
use crate::DEFAULT_BUFFER_CAPACITY;

/// Counters for the relay buffer.
#[derive(Debug, Default)]
pub struct BufferStats {
    /// Messages accepted by `append`.
    pub appended: AtomicU64,
    /// Messages rejected because the buffer was sealed.
    pub rejected: AtomicU64,
    /// Messages handed out by drains.
    pub drained: AtomicU64,
    /// Number of drain calls (empty ones included).
    pub drain_cycles: AtomicU64,
    /// Largest number of messages returned by a single drain.
    pub max_batch: AtomicU64,
}

impl BufferStats {
    /// Messages appended but not yet drained.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.appended
            .load(Ordering::Relaxed)
            .saturating_sub(self.drained.load(Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct BufferState {
    messages: Vec<Message>,
    sealed: bool,
}

/// Ordered, append-only message buffer drained once per tick.
///
/// Shared between producers and the consumer through an `Arc`. All methods
/// take `&self`.
///
/// # Example
///
/// ```rust
/// use tickbridge_core::{Message, RelayBuffer};
///
/// let buffer = RelayBuffer::new();
/// buffer.append(Message::text("k", "A"));
/// buffer.append(Message::text("k", "B"));
///
/// let drained: Vec<_> = buffer
///     .drain_all()
///     .iter()
///     .map(|m| m.as_text().unwrap().to_owned())
///     .collect();
/// assert_eq!(drained, ["A", "B"]);
/// assert!(buffer.drain_all().is_empty());
/// ```
#[derive(Debug)]
pub struct RelayBuffer {
    state: Mutex<BufferState>,
    stats: BufferStats,
}

impl RelayBuffer {
    /// Creates an empty buffer with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Creates an empty buffer with room for `capacity` messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                messages: Vec::with_capacity(capacity),
                sealed: false,
            }),
            stats: BufferStats::default(),
        }
    }

    /// Appends a message in arrival order.
    ///
    /// Safe to call from any thread, including while a drain is running.
    ///
    /// # Returns
    ///
    /// `true` if the message was accepted, `false` if the buffer was sealed.
    pub fn append(&self, message: Message) -> bool {
        let mut state = self.state.lock();
        if state.sealed {
            drop(state);
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        state.messages.push(message);
        drop(state);

        self.stats.appended.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Takes every buffered message, in arrival order, and empties the buffer.
    ///
    /// The take and the clear are one step under the lock.
    #[must_use]
    pub fn drain_all(&self) -> Vec<Message> {
        let mut drained = Vec::new();
        self.drain_into(&mut drained);
        drained
    }

    /// Moves every buffered message onto the end of `out`.
    ///
    /// The buffer keeps its allocation, so a tick loop that reuses `out`
    /// drains without allocating.
    ///
    /// # Returns
    ///
    /// The number of messages moved.
    pub fn drain_into(&self, out: &mut Vec<Message>) -> usize {
        let count = {
            let mut state = self.state.lock();
            let count = state.messages.len();
            out.append(&mut state.messages);
            count
        };

        self.stats.drain_cycles.fetch_add(1, Ordering::Relaxed);
        self.stats.drained.fetch_add(count as u64, Ordering::Relaxed);
        self.stats.max_batch.fetch_max(count as u64, Ordering::Relaxed);
        count
    }

    /// Rejects all further appends. Idempotent.
    ///
    /// # Returns
    ///
    /// `true` on the call that actually sealed the buffer.
    pub fn seal(&self) -> bool {
        let mut state = self.state.lock();
        let newly_sealed = !state.sealed;
        state.sealed = true;
        newly_sealed
    }

    /// Returns true once the buffer has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Number of messages waiting for the next drain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Returns true if nothing is waiting for the next drain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    /// Returns the buffer counters.
    #[must_use]
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }
}

impl Default for RelayBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn texts(messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .map(|m| m.as_text().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn test_append_then_drain_preserves_order() {
        let buffer = RelayBuffer::new();
        for i in 0..100 {
            assert!(buffer.append(Message::text("k", &i.to_string())));
        }

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 100);
        let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(texts(&drained), expected);
    }

    #[test]
    fn test_drain_twice_second_is_empty() {
        let buffer = RelayBuffer::new();
        buffer.append(Message::text("k", "A"));
        buffer.append(Message::text("k", "B"));

        assert_eq!(texts(&buffer.drain_all()), ["A", "B"]);
        assert!(buffer.drain_all().is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_into_appends_and_counts() {
        let buffer = RelayBuffer::new();
        let mut scratch = vec![Message::text("k", "old")];
        buffer.append(Message::text("k", "new"));

        assert_eq!(buffer.drain_into(&mut scratch), 1);
        assert_eq!(texts(&scratch), ["old", "new"]);
        assert_eq!(buffer.drain_into(&mut scratch), 0);
    }

    #[test]
    fn test_seal_rejects_but_keeps_buffered() {
        let buffer = RelayBuffer::new();
        buffer.append(Message::text("k", "before"));

        assert!(buffer.seal());
        assert!(!buffer.seal());
        assert!(buffer.is_sealed());
        assert!(!buffer.append(Message::text("k", "after")));

        assert_eq!(texts(&buffer.drain_all()), ["before"]);
        assert_eq!(buffer.stats().rejected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stats_tracking() {
        let buffer = RelayBuffer::new();
        for _ in 0..5 {
            buffer.append(Message::text("k", "x"));
        }
        assert_eq!(buffer.stats().in_flight(), 5);

        let _ = buffer.drain_all();
        let _ = buffer.drain_all();

        let stats = buffer.stats();
        assert_eq!(stats.appended.load(Ordering::Relaxed), 5);
        assert_eq!(stats.drained.load(Ordering::Relaxed), 5);
        assert_eq!(stats.drain_cycles.load(Ordering::Relaxed), 2);
        assert_eq!(stats.max_batch.load(Ordering::Relaxed), 5);
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_append_and_drain_no_loss_no_duplicates() {
        let buffer = Arc::new(RelayBuffer::new());
        let producers = 4;
        let per_producer = 2_000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        buffer.append(Message::text("k", &format!("{p}:{i}")));
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while handles.iter().any(|h| !h.is_finished()) {
            buffer.drain_into(&mut seen);
        }
        for handle in handles {
            handle.join().unwrap();
        }
        buffer.drain_into(&mut seen);

        assert_eq!(seen.len(), producers * per_producer);
        let unique: HashSet<String> = texts(&seen).into_iter().collect();
        assert_eq!(unique.len(), producers * per_producer);

        // Per-producer arrival order survives the drains.
        for p in 0..producers {
            let prefix = format!("{p}:");
            let order: Vec<usize> = texts(&seen)
                .iter()
                .filter_map(|t| t.strip_prefix(&prefix).map(|i| i.parse().unwrap()))
                .collect();
            assert!(order.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
