//! # Broker Configuration
//!
//! Connection, exchange, queue and binding settings, loaded once at startup
//! from TOML.
//!
//! ## Example
//!
//! ```toml
//! host = "localhost"
//! port = 5672
//! username = "guest"
//! password = "guest"
//! bindings = ["building.record.click", "building.record.update"]
//!
//! [exchange]
//! name = "BuildingSimulation"
//! kind = "topic"
//! ```
//!
//! Every field has a default; the defaults connect to a local broker with
//! guest credentials and bind the two building-record keys.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tickbridge_core::{is_valid_pattern, SubscriptionBinding};

use crate::error::ConfigError;
use crate::DEFAULT_AMQP_PORT;

/// Exchange type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Routing keys are matched against topic patterns.
    #[default]
    Topic,
    /// Routing keys must match exactly.
    Direct,
    /// Every bound queue receives every message.
    Fanout,
}

/// Exchange settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Exchange name.
    pub name: String,
    /// Exchange type.
    pub kind: ExchangeKind,
    /// Declare the exchange on open. Off means it must already exist.
    pub declare: bool,
    /// Declare the exchange as durable.
    pub durable: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: "BuildingSimulation".to_string(),
            kind: ExchangeKind::Topic,
            declare: true,
            durable: false,
        }
    }
}

/// Queue settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name. Empty lets the broker pick a unique name.
    pub name: String,
    /// Only this connection may use the queue.
    pub exclusive: bool,
    /// Delete the queue once the last consumer goes away.
    pub auto_delete: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Everything needed to open a broker connection and subscribe.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Virtual host.
    pub vhost: String,
    /// Heartbeat interval in seconds (`None` = broker default).
    pub heartbeat_secs: Option<u16>,
    /// TCP connect timeout in milliseconds (`None` = client default).
    pub connection_timeout_ms: Option<u64>,
    /// Exchange to bind to and publish on.
    pub exchange: ExchangeConfig,
    /// Queue that receives bound traffic.
    pub queue: QueueConfig,
    /// Routing keys (topic patterns on topic exchanges) to bind.
    pub bindings: Vec<String>,
    /// Consumer tag announced to the broker.
    pub consumer_tag: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_AMQP_PORT,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            heartbeat_secs: None,
            connection_timeout_ms: None,
            exchange: ExchangeConfig::default(),
            queue: QueueConfig::default(),
            bindings: vec![
                "building.record.click".to_string(),
                "building.record.update".to_string(),
            ],
            consumer_tag: "tickbridge".to_string(),
        }
    }
}

impl BrokerConfig {
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
    /// [`BrokerConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks that the settings can be used to open a connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".into()));
        }
        if self.exchange.name.is_empty() {
            return Err(ConfigError::Invalid("exchange name must not be empty".into()));
        }
        if self.bindings.is_empty() {
            return Err(ConfigError::Invalid("at least one binding is required".into()));
        }
        if let Some(bad) = self.bindings.iter().find(|key| !is_valid_pattern(key)) {
            return Err(ConfigError::Invalid(format!("invalid binding key `{bad}`")));
        }
        Ok(())
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the configured bindings on the configured exchange.
    #[must_use]
    pub fn subscription_bindings(&self) -> Vec<SubscriptionBinding> {
        self.bindings
            .iter()
            .map(|key| SubscriptionBinding::new(self.exchange.name.clone(), key.clone()))
            .collect()
    }

    /// Builds the `amqp://` connection URI.
    ///
    /// Credentials and vhost are percent-encoded; heartbeat and connection
    /// timeout go in the query string when set.
    #[must_use]
    pub fn amqp_uri(&self) -> String {
        let mut uri = format!(
            "amqp://{}:{}@{}:{}/{}",
            encode_component(&self.username),
            encode_component(&self.password),
            self.host,
            self.port,
            encode_component(&self.vhost),
        );

        let mut query = Vec::new();
        if let Some(heartbeat) = self.heartbeat_secs {
            query.push(format!("heartbeat={heartbeat}"));
        }
        if let Some(timeout) = self.connection_timeout_ms {
            query.push(format!("connection_timeout={timeout}"));
        }
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query.join("&"));
        }
        uri
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("vhost", &self.vhost)
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("exchange", &self.exchange)
            .field("queue", &self.queue)
            .field("bindings", &self.bindings)
            .field("consumer_tag", &self.consumer_tag)
            .finish()
    }
}

/// Percent-encodes everything but RFC 3986 unreserved characters.
fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
