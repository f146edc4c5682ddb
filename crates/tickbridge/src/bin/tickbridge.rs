//! # TICKBRIDGE Listener
//!
//! Headless listener: subscribes to the configured bindings, logs every
//! message once per tick and optionally publishes lines read from stdin.
//!
//! ```bash
//! # Defaults: guest@localhost:5672, exchange BuildingSimulation
//! tickbridge
//!
//! # Custom config, 30Hz, stop after a minute, publish stdin lines
//! tickbridge --config tickbridge.toml --tick-rate 30 --duration 60 --echo-stdin
//!
//! # More detail
//! RUST_LOG=tickbridge=trace tickbridge
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::Receiver;
use tickbridge::{BrokerRelay, RelayConfig, TickLoop};
use tickbridge_broker::AmqpBroker;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Relay broker messages into a fixed-rate loop.
#[derive(Parser, Debug)]
#[command(name = "tickbridge", version, about)]
struct Args {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ticks per second, overriding the config.
    #[arg(long)]
    tick_rate: Option<u32>,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<u64>,

    /// Publish each stdin line to the configured routing key.
    #[arg(long)]
    echo_stdin: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    if let Some(rate) = args.tick_rate {
        config.relay.tick_rate = rate;
    }
    config.validate()?;

    info!(
        address = %config.broker.address(),
        exchange = %config.broker.exchange.name,
        bindings = ?config.broker.bindings,
        tick_rate = config.relay.tick_rate,
        "tickbridge starting"
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrl_c(Arc::clone(&running))?;

    let payload = config.relay.payload;
    let mut relay = BrokerRelay::from_config(AmqpBroker::new(config.broker.clone()), &config);
    relay.observers().subscribe(move |message| match payload.render(message) {
        Ok(text) => info!(routing_key = message.routing_key(), payload = %text, "received"),
        Err(err) => warn!(
            routing_key = message.routing_key(),
            bytes = message.len(),
            error = %err,
            "received undecodable payload"
        ),
    });

    if relay.open().is_err() {
        warn!("continuing without a broker connection");
    }

    let lines = args.echo_stdin.then(spawn_stdin_reader).transpose()?;
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let mut tick_loop = TickLoop::new(config.relay.tick_rate);
    tick_loop.run(&running, |_tick| {
        if let Some(lines) = &lines {
            for line in lines.try_iter() {
                match payload.encode_line(&line) {
                    Ok(bytes) => {
                        relay.publish(&bytes);
                    }
                    Err(err) => warn!(%line, error = %err, "input line not sent"),
                }
            }
        }

        relay.process();

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            running.store(false, Ordering::Release);
        }
    });

    relay.close();
    relay.process();

    let ticks = tick_loop.stats();
    let relayed = relay.stats();
    info!(
        ticks = ticks.total_ticks,
        late_ticks = ticks.late_ticks,
        avg_tick_us = ticks.avg_tick_us,
        forwarded = relayed.forwarded.load(Ordering::Relaxed),
        published = relayed.published.load(Ordering::Relaxed),
        "tickbridge stopped"
    );
    Ok(())
}

/// Clears `running` on Ctrl-C.
fn install_ctrl_c(running: Arc<AtomicBool>) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("tickbridge-signal".into())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("ctrl-c received, shutting down");
                    running.store(false, Ordering::Release);
                }
            });
        })?;
    Ok(())
}

/// Reads stdin lines on their own thread and hands them to the tick thread.
fn spawn_stdin_reader() -> std::io::Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();

    thread::Builder::new()
        .name("tickbridge-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
