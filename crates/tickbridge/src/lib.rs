//! # TICKBRIDGE
//!
//! Relays messages from a broker into a fixed-cadence loop.
//!
//! ## Quick Start
//!
//! ```rust
//! use tickbridge::{BrokerRelay, RelayConfig};
//! use tickbridge_broker::{MemoryBroker, MemoryHub};
//!
//! let config = RelayConfig::default();
//! let hub = MemoryHub::new();
//! let mut relay = BrokerRelay::from_config(MemoryBroker::new(hub.clone(), "guest", "guest"), &config);
//! relay.observers().subscribe(|message| println!("{message:?}"));
//! relay.open().unwrap();
//!
//! hub.publish("BuildingSimulation", "building.record.click", b"17");
//! assert_eq!(relay.process(), 1);
//! relay.close();
//! ```
//!
//! ## Crates
//!
//! | Crate               | Contents                                        |
//! |---------------------|-------------------------------------------------|
//! | `tickbridge_core`   | buffer, observers, topics, payload codecs       |
//! | `tickbridge_broker` | client trait, AMQP client, in-process hub, config|
//! | `tickbridge`        | relay component, tick loop, listener binary     |

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod relay;
pub mod tick;

pub use config::{PayloadKind, RelayConfig, RelaySettings};
pub use relay::{BrokerRelay, RelayStats};
pub use tick::{TickLoop, TickStats, DEFAULT_TICK_RATE};
