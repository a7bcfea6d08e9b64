//! # mm-runner
//!
//! Entry point for one market-making engine deployment.
//!
//! Reads the exchange / mode / pair selection from the environment (or CLI),
//! loads persisted state behind the bootstrap barrier, wires the engine,
//! serves the HTTP mirror and waits for the first shutdown trigger. The
//! process exit code reports the shutdown outcome: 0 when every open order
//! was cancelled, 2 when the cleanup deadline passed, 1 on any other failure.
//!
//! # Usage
//!
//! ```bash
//! EXCHANGE=null MM_MODE=dev PAIR=BTC/USD mm-runner --log-level info
//! ```

mod http;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use mm_bus::{BroadcastTransport, Bus, HttpMirror, pump_inbound};
use mm_core::config::{EngineConfig, Selection};
use mm_engine::shutdown::{install_panic_hook, spawn_signal_listeners};
use mm_engine::{Engine, Persistence, ShutdownOrchestrator, Trigger};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Market-making engine runner.
#[derive(Parser)]
#[command(name = "mm-runner", about = "Market-making engine runner")]
struct Cli {
    /// Exchange to trade on (hitbtc, okcoin, coinbase, null).
    #[arg(long, env = "EXCHANGE")]
    exchange: String,

    /// Deployment environment (dev, prod).
    #[arg(long, env = "MM_MODE", default_value = "dev")]
    mode: String,

    /// Currency pair, e.g. BTC/USD.
    #[arg(long, env = "PAIR", default_value = "BTC/USD")]
    pair: String,

    /// Optional engine config file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit console logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    mm_core::logging::init_logging(&cli.log_level, cli.log_dir.as_deref(), "mm-runner", cli.log_json);

    // 2. Resolve the selection and engine config
    let selection = Selection::parse(&cli.exchange, &cli.mode, &cli.pair)?;
    let config = match &cli.config {
        Some(path) => mm_core::config::load_config(path)?,
        None => EngineConfig::default(),
    };
    info!(
        "mm-runner starting: {} ({}), cleanup deadline {:?}",
        selection.identity,
        selection.environment,
        config.cleanup_deadline()
    );

    // 3. Transport, bus, HTTP mirror
    let transport = Arc::new(BroadcastTransport::new(config.transport_capacity));
    let bus = Bus::with_transport(transport.clone());
    let mirror = HttpMirror::new();
    tokio::spawn(log_outbound(transport.observe()));

    // 4. Bootstrap barrier and wiring
    let stores = Persistence::in_memory();
    let ctx = Engine::start(selection, &config, &stores, bus.clone(), mirror.clone()).await?;

    // 5. Arm shutdown
    let orchestrator = ShutdownOrchestrator::new(ctx.cleanup_action(), config.cleanup_deadline());
    install_panic_hook(orchestrator.handle());
    spawn_signal_listeners(orchestrator.handle());

    // 6. HTTP mirror and inbound commands
    let (inbound_tx, inbound_rx) = mpsc::channel(config.transport_capacity.max(1));
    tokio::spawn(pump_inbound(bus, inbound_rx));

    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    info!("[http] listening on {}", config.http_bind);
    let app = http::router(http::HttpState {
        mirror,
        inbound: inbound_tx,
    });
    let on_exit = orchestrator.handle();
    tokio::spawn(async move {
        match axum::serve(listener, app).await {
            Ok(()) => {
                on_exit.trigger(Trigger::Exit);
            }
            Err(e) => {
                on_exit.trigger(Trigger::Fault {
                    message: format!("http server failed: {e}"),
                    backtrace: None,
                });
            }
        }
    });

    info!("engine running with {} subscription(s), press Ctrl+C to stop", ctx.subscription_count());

    // 7. Wait for the first trigger and report
    let report = orchestrator.run().await;
    match report.exit_code() {
        0 => info!("shutdown complete: {}", report.state),
        code => error!("shutdown {} (exit code {code})", report.state),
    }
    drop(ctx);
    std::process::exit(report.exit_code());
}

/// Debug-log every envelope leaving the engine.
async fn log_outbound(mut rx: broadcast::Receiver<mm_bus::Envelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => debug!("[transport] {} {}", envelope.topic, envelope.value),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("[transport] log observer lagged by {n}"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
