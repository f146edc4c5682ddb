//! # Relay Configuration
//!
//! One TOML file with two tables: `[broker]` (see
//! [`BrokerConfig`](tickbridge_broker::BrokerConfig)) and `[relay]`.
//!
//! ```toml
//! [broker]
//! host = "localhost"
//! bindings = ["building.record.click", "building.record.update"]
//!
//! [broker.exchange]
//! name = "BuildingSimulation"
//!
//! [relay]
//! tick_rate = 60
//! publish_routing_key = "building.clicked"
//! payload = "text"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tickbridge_broker::{BrokerConfig, ConfigError};
use tickbridge_core::{IntegerListCodec, Message, PayloadCodec, PayloadResult};

use crate::tick::DEFAULT_TICK_RATE;

/// How the listener reads and writes payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// UTF-8 text.
    #[default]
    Text,
    /// JSON array of integers.
    Integers,
}

impl PayloadKind {
    /// Renders a delivered payload for logging.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not decode as this kind.
    pub fn render(self, message: &Message) -> PayloadResult<String> {
        match self {
            Self::Text => message.as_text().map(str::to_string),
            Self::Integers => message.decode(&IntegerListCodec::new()).map(|values| format!("{values:?}")),
        }
    }

    /// Turns one line of user input into payload bytes.
    ///
    /// For [`PayloadKind::Integers`] the line is a JSON array or a list of
    /// integers separated by whitespace or commas.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not valid for this kind.
    pub fn encode_line(self, line: &str) -> PayloadResult<Vec<u8>> {
        match self {
            Self::Text => Ok(line.as_bytes().to_vec()),
            Self::Integers => {
                let codec = IntegerListCodec::new();
                let trimmed = line.trim();
                if trimmed.starts_with('[') {
                    let values = codec.decode(trimmed.as_bytes())?;
                    return codec.encode(&values);
                }
                let joined = trimmed
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(",");
                let values = codec.decode(format!("[{joined}]").as_bytes())?;
                codec.encode(&values)
            }
        }
    }
}

/// Relay-side settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Ticks per second.
    pub tick_rate: u32,
    /// Routing key for outgoing messages.
    pub publish_routing_key: String,
    /// Payload format.
    pub payload: PayloadKind,
    /// Initial relay buffer capacity.
    pub buffer_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            publish_routing_key: "building.clicked".to_string(),
            payload: PayloadKind::Text,
            buffer_capacity: tickbridge_core::DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Full listener configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Broker connection and subscriptions.
    pub broker: BrokerConfig,
    /// Relay behaviour.
    pub relay: RelaySettings,
}

impl RelayConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`RelayConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks both tables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;
        if self.relay.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be at least 1".into()));
        }
        if self.relay.publish_routing_key.is_empty() {
            return Err(ConfigError::Invalid(
                "publish_routing_key must not be empty".into(),
            ));
        }
        Ok(())
    }
}
