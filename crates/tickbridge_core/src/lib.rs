//! # TICKBRIDGE Core
//!
//! Relay primitives for handing broker deliveries to a fixed-cadence loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  append   ┌──────────────┐  drain   ┌──────────────┐
//! │  Delivery    │ ────────▶ │ RelayBuffer  │ ───────▶ │  Observer    │
//! │  (any thread)│           │ (Mutex<Vec>) │  per tick│  Registry    │
//! └──────────────┘           └──────────────┘          └──────────────┘
//! ```
//!
//! - Appends come from whatever thread the messaging client delivers on.
//! - One drain per tick takes everything appended so far, in arrival order.
//! - Each drained message is forwarded to every observer exactly once.
//!
//! ## Example
//!
//! ```rust
//! use tickbridge_core::{Message, ObserverRegistry, RelayBuffer};
//!
//! let buffer = RelayBuffer::new();
//! let observers = ObserverRegistry::new();
//! observers.subscribe(|message| println!("{}", message.routing_key()));
//!
//! buffer.append(Message::new("building.record.click", b"A".to_vec()));
//! let drained = buffer.drain_all();
//! assert_eq!(observers.forward_all(&drained), 1);
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod error;
pub mod message;
pub mod observer;
pub mod payload;
pub mod topic;

pub use buffer::{BufferStats, RelayBuffer};
pub use error::{PayloadError, PayloadResult};
pub use message::{Message, SubscriptionBinding};
pub use observer::{ObserverId, ObserverRegistry};
pub use payload::{IntegerListCodec, JsonCodec, PayloadCodec, Utf8Codec};
pub use topic::{is_valid_pattern, topic_matches};

/// Default initial capacity of the relay buffer.
///
/// Sized for a burst of deliveries between two ticks at 60Hz.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;
