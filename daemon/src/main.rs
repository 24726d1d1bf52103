//! Gateway daemon: serves `/ws`, `/health` and `/metrics` for a cluster of
//! Ethereum-compatible nodes.

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use clap::Parser;
use ethws_gateway::{parse_list, parse_ports, Gateway, GatewayConfig};
use ethws_utils::LogFormat;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Parser, Debug)]
#[command(name = "ethws-daemon", about = "Real-time websocket gateway for an Ethereum node cluster")]
struct Cli {
    /// Number of upstream nodes. Node 0 is the primary and is reached over
    /// websocket; the rest over HTTP.
    #[arg(long, env = "ETHWS_NODES")]
    nodes: Option<usize>,

    /// Node addresses, comma-separated, in node order.
    #[arg(long, env = "ETHWS_ADDRESSES")]
    addresses: Option<String>,

    /// Node ports, comma-separated, in node order.
    #[arg(long, env = "ETHWS_PORTS")]
    ports: Option<String>,

    /// Address the HTTP server binds, e.g. "0.0.0.0:8080".
    #[arg(long, env = "ETHWS_LISTEN")]
    listen: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "ETHWS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "ETHWS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "ETHWS_CONFIG")]
    config: Option<PathBuf>,
}

/// Merge the optional config file with CLI overrides.
fn build_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    if let Some(nodes) = cli.nodes {
        config.node_count = nodes;
    }
    if let Some(addresses) = &cli.addresses {
        config.addresses = parse_list(addresses);
    }
    if let Some(ports) = &cli.ports {
        config.ports = parse_ports(ports)?;
    }
    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    config.validate()?;
    Ok(config)
}

fn app(gateway: Arc<Gateway>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let service_routes = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(gateway.clone());

    gateway.router().merge(service_routes).layer(cors)
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics(State(gateway): State<Arc<Gateway>>) -> Response {
    match gateway.metrics_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    ethws_utils::init_logging(config.log_format, &config.log_level);

    tracing::info!(
        nodes = config.node_count,
        listen = %config.listen,
        "starting ethws gateway"
    );

    let gateway = Arc::new(Gateway::new(config)?);
    gateway.start().await?;

    let listener = tokio::net::TcpListener::bind(&gateway.config().listen)
        .await
        .with_context(|| format!("binding {}", gateway.config().listen))?;
    tracing::info!(addr = %listener.local_addr()?, status = %gateway.status(), "listening");

    let stopping = gateway.clone();
    axum::serve(listener, app(gateway.clone()))
        .with_graceful_shutdown(async move {
            stopping.shutdown_controller().wait_for_signal().await;
            tracing::info!(status = %stopping.status(), "shutdown signal received, stopping gateway");
            if let Err(e) = stopping.stop().await {
                tracing::warn!(error = %e, "gateway did not stop cleanly");
            }
        })
        .await?;

    tracing::info!("ethws daemon exited cleanly");
    Ok(())
}
