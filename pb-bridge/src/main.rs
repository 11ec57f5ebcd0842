use std::{env, net::SocketAddr};

use pb_bridge::{BridgeConfig, BridgeState, build_bridge_app};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if wants_version_flag() {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_logging();

    let addr = parse_addr("BRIDGE_ADDR", "0.0.0.0:9100")?;
    let config = BridgeConfig {
        reply_timeout_ms: parse_u64("BRIDGE_REPLY_TIMEOUT_MS", 200)?,
        max_parameters: parse_usize("BRIDGE_MAX_PARAMETERS", 256)?,
    };

    let state = BridgeState::new(config);
    let app = build_bridge_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("bridge listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_logging() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn parse_addr(key: &str, default: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    Ok(value.parse()?)
}

fn parse_u64(key: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_usize(key: &str, default: usize) -> Result<usize, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn wants_version_flag() -> bool {
    env::args()
        .skip(1)
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
}
