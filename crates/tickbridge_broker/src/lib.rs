//! # TICKBRIDGE Broker
//!
//! The messaging-client side of the relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  push   ┌──────────────┐  sink(Message)  ┌──────────────┐
//! │   Broker     │ ──────▶ │ BrokerClient │ ──────────────▶ │ RelayBuffer  │
//! │ (AMQP/memory)│ ◀────── │  (open/close)│                 │  (core)      │
//! └──────────────┘ publish └──────────────┘                 └──────────────┘
//! ```
//!
//! Two implementations of [`BrokerClient`]:
//!
//! - [`AmqpBroker`]: a real broker over AMQP 0-9-1 (lapin on a private tokio
//!   runtime).
//! - [`MemoryBroker`]: an in-process topic exchange ([`MemoryHub`]) for tests
//!   and demos. Deliveries run on the publisher's thread.
//!
//! Both deliver `(routing key, payload)` in arrival order and accept bytes for
//! publishing. Nothing else about the broker leaks out of this crate.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod amqp;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod status;

pub use amqp::AmqpBroker;
pub use client::{BrokerClient, DeliverySink};
pub use config::{BrokerConfig, ExchangeConfig, ExchangeKind, QueueConfig};
pub use error::{BrokerError, BrokerResult, ConfigError};
pub use memory::{MemoryBroker, MemoryHub};
pub use status::{ConnectionStatus, SharedStatus};

/// Default AMQP port.
pub const DEFAULT_AMQP_PORT: u16 = 5672;
