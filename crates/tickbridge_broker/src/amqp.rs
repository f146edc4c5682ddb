//! # AMQP Broker Client
//!
//! [`BrokerClient`] over AMQP 0-9-1 using lapin.
//!
//! ## Threading
//!
//! ```text
//! caller thread                      tickbridge-amqp worker
//! ─────────────                      ──────────────────────
//! open()    ──block_on──▶ connect, declare, bind, consume
//!                                    spawn consumer loop ──▶ sink(Message)
//! publish() ──block_on──▶ basic_publish
//! close()   ──block_on──▶ close channel + connection, stop runtime
//! ```
//!
//! The tokio runtime is private to the client, so callers stay synchronous.
//! Deliveries are auto-acknowledged and handed to the sink in the order the
//! consumer stream yields them.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tickbridge_core::{Message, SubscriptionBinding};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{BrokerClient, DeliverySink};
use crate::config::{BrokerConfig, ExchangeKind};
use crate::error::{BrokerError, BrokerResult};
use crate::status::{ConnectionStatus, SharedStatus};

/// How long `close` waits for in-flight runtime work.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

struct Session {
    connection: Connection,
    channel: Channel,
    queue: String,
    consumer: JoinHandle<()>,
}

/// AMQP 0-9-1 client.
pub struct AmqpBroker {
    config: BrokerConfig,
    runtime: Option<Runtime>,
    session: Option<Session>,
    status: Arc<SharedStatus>,
    opened: bool,
}

impl AmqpBroker {
    /// Creates an unopened client. No I/O happens until [`BrokerClient::open`].
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            runtime: None,
            session: None,
            status: Arc::new(SharedStatus::default()),
            opened: false,
        }
    }

    /// Connection settings.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Name of the consuming queue, once open.
    #[must_use]
    pub fn queue_name(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.queue.as_str())
    }

    fn build_runtime() -> BrokerResult<Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tickbridge-amqp")
            .enable_all()
            .build()
            .map_err(|err| BrokerError::Runtime(err.to_string()))
    }

    fn teardown(&mut self) -> BrokerResult<()> {
        let mut result = Ok(());

        if let (Some(session), Some(runtime)) = (self.session.take(), self.runtime.as_ref()) {
            result = runtime.block_on(async {
                let channel = session
                    .channel
                    .close(REPLY_SUCCESS, "relay closing")
                    .await
                    .map_err(|err| operation_error("channel.close", &err));
                let connection = session
                    .connection
                    .close(REPLY_SUCCESS, "relay closing")
                    .await
                    .map_err(|err| operation_error("connection.close", &err));
                channel.and(connection)
            });
            session.consumer.abort();
        }

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        }
        result
    }
}

impl BrokerClient for AmqpBroker {
    fn open(&mut self, bindings: &[SubscriptionBinding], sink: DeliverySink) -> BrokerResult<()> {
        if self.opened {
            return Err(BrokerError::AlreadyOpen);
        }
        self.opened = true;
        self.status.store(ConnectionStatus::Connecting);
        info!(address = %self.config.address(), exchange = %self.config.exchange.name, "connecting to broker");

        let runtime = match Self::build_runtime() {
            Ok(runtime) => runtime,
            Err(err) => {
                self.status.store(ConnectionStatus::Failed);
                return Err(err);
            }
        };

        match runtime.block_on(establish(&self.config, bindings, sink, Arc::clone(&self.status))) {
            Ok(session) => {
                if self.status.transition(ConnectionStatus::Connecting, ConnectionStatus::Connected) {
                    info!(queue = %session.queue, bindings = bindings.len(), "broker connected");
                } else {
                    warn!(queue = %session.queue, "broker connection lost while opening");
                }
                self.session = Some(session);
                self.runtime = Some(runtime);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "broker connection failed");
                self.status.store(ConnectionStatus::Failed);
                runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
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
        let (Some(session), Some(runtime)) = (self.session.as_ref(), self.runtime.as_ref()) else {
            return Err(BrokerError::NotConnected);
        };

        runtime.block_on(async {
            session
                .channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default(),
                )
                .await
                .map_err(|err| operation_error("basic.publish", &err))?;
            Ok(())
        })?;

        debug!(exchange, routing_key, bytes = payload.len(), "published");
        Ok(())
    }

    fn close(&mut self) -> BrokerResult<()> {
        if self.status.load().is_closed() {
            return Ok(());
        }
        self.status.store(ConnectionStatus::Closed);
        let result = self.teardown();
        info!("broker connection closed");
        result
    }
}

impl Drop for AmqpBroker {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "error closing broker connection on drop");
        }
    }
}

impl std::fmt::Debug for AmqpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpBroker")
            .field("config", &self.config)
            .field("status", &self.status.load())
            .field("queue", &self.queue_name())
            .finish_non_exhaustive()
    }
}

/// Connects, declares, binds and starts the consumer loop.
async fn establish(
    config: &BrokerConfig,
    bindings: &[SubscriptionBinding],
    sink: DeliverySink,
    status: Arc<SharedStatus>,
) -> BrokerResult<Session> {
    let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
        .await
        .map_err(|err| connect_error(config, &err))?;

    let on_error_status = Arc::clone(&status);
    connection.on_error(move |err| {
        if mark_lost(&on_error_status) {
            warn!(error = %err, "broker connection lost");
        }
    });

    let channel = connection
        .create_channel()
        .await
        .map_err(|err| operation_error("channel.open", &err))?;

    if config.exchange.declare {
        channel
            .exchange_declare(
                &config.exchange.name,
                exchange_kind(config.exchange.kind),
                ExchangeDeclareOptions {
                    durable: config.exchange.durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| operation_error("exchange.declare", &err))?;
    }

    let queue = channel
        .queue_declare(
            &config.queue.name,
            QueueDeclareOptions {
                exclusive: config.queue.exclusive,
                auto_delete: config.queue.auto_delete,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|err| operation_error("queue.declare", &err))?;
    let queue_name = queue.name().as_str().to_string();

    for binding in bindings {
        channel
            .queue_bind(
                &queue_name,
                binding.exchange(),
                binding.routing_key(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| operation_error("queue.bind", &err))?;
        debug!(queue = %queue_name, %binding, "queue bound");
    }

    let consumer = channel
        .basic_consume(
            &queue_name,
            &config.consumer_tag,
            BasicConsumeOptions {
                no_ack: true,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|err| operation_error("basic.consume", &err))?;

    let consumer = tokio::spawn(consume(consumer, sink, status));

    Ok(Session {
        connection,
        channel,
        queue: queue_name,
        consumer,
    })
}

/// Hands every delivery to the sink until the stream ends.
async fn consume(mut consumer: Consumer, sink: DeliverySink, status: Arc<SharedStatus>) {
    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => sink(Message::new(delivery.routing_key.as_str(), delivery.data)),
            Err(err) => {
                warn!(error = %err, "consumer stream failed");
                break;
            }
        }
    }
    if mark_lost(&status) {
        warn!("consumer stream ended, broker disconnected");
    }
}

/// Moves an opening or open connection to `Disconnected`.
///
/// `Closed` and `Failed` are left alone, so a loss reported during `close`
/// does not resurrect the status.
fn mark_lost(status: &SharedStatus) -> bool {
    status.transition(ConnectionStatus::Connected, ConnectionStatus::Disconnected)
        || status.transition(ConnectionStatus::Connecting, ConnectionStatus::Disconnected)
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

fn connect_error(config: &BrokerConfig, err: &lapin::Error) -> BrokerError {
    match err {
        lapin::Error::IOError(io) => BrokerError::Unreachable {
            address: config.address(),
            reason: io.to_string(),
        },
        other => BrokerError::Rejected(other.to_string()),
    }
}

fn operation_error(operation: &'static str, err: &lapin::Error) -> BrokerError {
    BrokerError::Operation {
        operation,
        reason: err.to_string(),
    }
}
