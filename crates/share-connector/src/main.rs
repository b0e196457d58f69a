use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use share_connector::{
    build_validator, hash_key, HubConfig, RateLimiter, RpcServer, ServerContext, WsServer,
};
use share_hub::{spawn_liveness_sweep, Hub};

#[derive(Parser)]
#[command(name = "share-connector")]
#[command(about = "Realtime context-sharing hub for cooperating agents")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-RPC TCP listen address (overrides config file)
    #[arg(long)]
    rpc_addr: Option<String>,

    /// WebSocket/HTTP listen address (overrides config file)
    #[arg(long)]
    ws_addr: Option<String>,

    /// Log level or filter directive (overrides config file; RUST_LOG wins)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the SHA-256 digest of an API key for `[auth] credentials` and exit
    #[arg(long, value_name = "KEY")]
    hash_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(key) = cli.hash_key {
        println!("{}", hash_key(&key));
        return Ok(());
    }

    let (mut config, config_path) =
        HubConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(addr) = cli.rpc_addr {
        config.rpc.bind_addr = addr;
    }
    if let Some(addr) = cli.ws_addr {
        config.websocket.bind_addr = addr;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "Loaded configuration"),
        None => tracing::info!("No config file found, using defaults"),
    }

    let hub = Arc::new(Hub::new(config.hub_settings()));
    let ctx = ServerContext::new(
        Arc::clone(&hub),
        build_validator(&config.auth),
        RateLimiter::from_config(&config.rate_limit),
    );

    let sweep = spawn_liveness_sweep(Arc::clone(&hub));

    let rpc = RpcServer::new(
        config.rpc.bind_addr.clone(),
        ctx.clone(),
        config.rpc.max_connections,
    );
    let rpc_task = tokio::spawn(rpc.run());

    let ws_task = if config.websocket.enabled {
        let ws = WsServer::new(
            config.websocket.bind_addr.clone(),
            ctx,
            Duration::from_secs(config.websocket.heartbeat_interval_secs),
        );
        Some(tokio::spawn(ws.run()))
    } else {
        tracing::info!("WebSocket server disabled");
        None
    };

    let result = tokio::select! {
        res = rpc_task => res.context("JSON-RPC server task panicked")?.context("JSON-RPC server"),
        res = async {
            match ws_task {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        } => res.context("WebSocket server task panicked")?.context("WebSocket server"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    };

    sweep.abort();
    result
}
