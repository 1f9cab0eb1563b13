use anyhow::Context;
use clap::Parser;
use pollcall::signaling::MemoryRelay;
use pollcall::telemetry::logging::{self, LogConfig, LogLevel};
use pollcall_relay::{build_router, config::Config};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pollcall-relay", about = "Store-and-forward relay for pollcall signaling")]
struct Cli {
    /// Port to listen on (overrides POLLCALL_RELAY_PORT)
    #[arg(long, short)]
    port: Option<u16>,

    #[arg(
        long = "log-level",
        value_enum,
        env = "POLLCALL_LOG_LEVEL",
        default_value_t = LogLevel::Info
    )]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: None,
    })?;

    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }

    let app = build_router(MemoryRelay::new());
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("relay server stopped")?;
    Ok(())
}
