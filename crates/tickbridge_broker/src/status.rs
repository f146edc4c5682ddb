//! # Connection Status
//!
//! Lock-free connection state, readable from delivery tasks and the tick
//! thread alike.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// State of a broker connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Never opened, or the connection dropped.
    #[default]
    Disconnected = 0,
    /// `open` is in progress.
    Connecting = 1,
    /// Open and receiving deliveries.
    Connected = 2,
    /// `open` failed. The client will not receive messages.
    Failed = 3,
    /// Torn down by `close`.
    Closed = 4,
}

impl ConnectionStatus {
    /// Returns true if deliveries can arrive and publishes can be sent.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true once the client has been closed.
    #[inline]
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Failed,
            4 => Self::Closed,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Atomic cell holding a [`ConnectionStatus`].
#[derive(Debug, Default)]
pub struct SharedStatus(AtomicU8);

impl SharedStatus {
    /// Creates a cell in the given state.
    #[must_use]
    pub const fn new(status: ConnectionStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    /// Reads the current status.
    #[inline]
    #[must_use]
    pub fn load(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Overwrites the current status.
    #[inline]
    pub fn store(&self, status: ConnectionStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Moves from `from` to `to` only if the status is still `from`.
    ///
    /// # Returns
    ///
    /// `true` if the transition happened.
    pub fn transition(&self, from: ConnectionStatus, to: ConnectionStatus) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_cell() {
        let cell = SharedStatus::default();
        assert_eq!(cell.load(), ConnectionStatus::Disconnected);

        for status in [
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Failed,
            ConnectionStatus::Closed,
        ] {
            cell.store(status);
            assert_eq!(cell.load(), status);
        }
    }

    #[test]
    fn test_transition_only_from_expected_state() {
        let cell = SharedStatus::new(ConnectionStatus::Connected);
        assert!(!cell.transition(ConnectionStatus::Closed, ConnectionStatus::Disconnected));
        assert!(cell.transition(ConnectionStatus::Connected, ConnectionStatus::Disconnected));
        assert_eq!(cell.load(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_predicates() {
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(!ConnectionStatus::Failed.is_connected());
        assert!(ConnectionStatus::Closed.is_closed());
        assert_eq!(ConnectionStatus::Failed.to_string(), "failed");
    }
}
