//! Graph Sync Service Binary
//!
//! Runs the infrastructure knowledge graph as a REST API service:
//! - Structured JSON logging
//! - Request tracing with correlation IDs
//! - Graceful shutdown handling
//! - Health check endpoints
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `PORT`: Service port (default: 8001)
//! - `HOST`: Service host (default: 0.0.0.0)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://... cargo run --bin graph_sync_service --features service
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::{self, Next},
    response::Response,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use infra_graph_kernel::governance::ChangeGovernor;
use infra_graph_kernel::policy::MockPolicyBackend;
use infra_graph_kernel::risk::RiskConfig;
use infra_graph_kernel::service::{create_router, ServiceState};
use infra_graph_kernel::store::PostgresGraphStore;

/// Output format for the process's own logs, as opposed to the structured
/// events it emits about requests it handles.
enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("pretty") => Self::Pretty,
            _ => Self::Json,
        }
    }
}

/// Process-wide settings read once at startup.
struct Config {
    host: String,
    port: u16,
    db_connect_timeout: Duration,
}

impl Config {
    fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8001),
            db_connect_timeout: Duration::from_secs(30),
        }
    }

    fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "graph_sync_service=info,tower_http=info,sqlx=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            registry.with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE)).init();
        }
        LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_current_span(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .flatten_event(true),
                )
                .init();
        }
    }
}

/// Pulls a correlation id out of an inbound `X-Cloud-Trace-Context` header,
/// or mints a fresh one when the caller didn't supply one.
fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get("X-Cloud-Trace-Context")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split('/').next().unwrap_or(s).to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let trace_id = correlation_id(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let response = next.run(request).instrument(span.clone()).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    span.record("status", status);
    span.record("latency_ms", latency_ms);

    info!(
        target: "graph_sync_service::access",
        trace_id = %trace_id,
        method = %method,
        path = %path,
        status = status,
        latency_ms = latency_ms,
        "request completed"
    );

    response
}

async fn connect_store(timeout: Duration) -> Result<PostgresGraphStore, Box<dyn std::error::Error>> {
    info!("Connecting to PostgreSQL...");
    let started = Instant::now();

    match tokio::time::timeout(timeout, PostgresGraphStore::from_env()).await {
        Ok(Ok(store)) => {
            info!(latency_ms = started.elapsed().as_millis() as u64, "PostgreSQL connection established");
            Ok(store)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            Err(e.into())
        }
        Err(_) => {
            tracing::error!(timeout_secs = timeout.as_secs(), "PostgreSQL connection timeout");
            Err("Database connection timeout".into())
        }
    }
}

/// Resolves once either Ctrl+C or SIGTERM (on Unix) is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let version = env!("CARGO_PKG_VERSION");
    info!(version = version, build_sha = option_env!("BUILD_SHA").unwrap_or("dev"), "starting graph sync service");

    let config = Config::from_env();
    let store = connect_store(config.db_connect_timeout).await?;

    // No discovery sources or policy rule set is wired by default; operators
    // register their own cloud adapters and policy set at deployment time.
    // A mock policy backend keeps the service usable out of the box.
    let governor = ChangeGovernor::new(RiskConfig::default(), Arc::new(MockPolicyBackend::new()), Default::default());
    let state = ServiceState::new(store, Vec::new(), governor);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = create_router(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, version = version, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("shutdown complete");
    Ok(())
}
