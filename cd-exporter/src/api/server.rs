//! API server setup and configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::{DEFAULT_HTTP_PORT, ExporterConfig};
use crate::error::{Error, Result};
use crate::metrics::{HealthChecker, PrometheusExporter};

/// Polled constantly by monitoring; no request spans for these.
fn is_quiet(path: &str) -> bool {
    matches!(path, "/metrics" | "/health") || path.starts_with("/health/")
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

impl From<&ExporterConfig> for ApiServerConfig {
    fn from(config: &ExporterConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.http_port,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub exporter: Arc<PrometheusExporter>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(exporter: Arc<PrometheusExporter>, health: Arc<HealthChecker>) -> Self {
        Self {
            exporter,
            health,
        }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// Create a server that shuts down when `cancel_token` is cancelled.
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if is_quiet(req.uri().path()) {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_request(|req: &Request, span: &Span| {
                    if span.is_disabled() || is_quiet(req.uri().path()) {
                        return;
                    }
                    let mut on_request =
                        tower_http::trace::DefaultOnRequest::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnRequest;
                    on_request.on_request(req, span);
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                )
                .on_failure(
                    |class: tower_http::classify::ServerErrorsFailureClass,
                     latency: Duration,
                     span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let mut on_failure =
                            tower_http::trace::DefaultOnFailure::new().level(tracing::Level::ERROR);
                        use tower_http::trace::OnFailure;
                        on_failure.on_failure(class, latency, span);
                    },
                ),
        )
    }

    /// Bind the listening socket. A port already in use is reported here,
    /// before any background work starts.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        TcpListener::bind(addr.as_str())
            .await
            .map_err(|e| Error::server(format!("Failed to bind {addr}: {e}")))
    }

    /// Serve on an already bound listener until the cancel token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let router = self.build_router();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Metrics available at http://{}/metrics", addr);
        }

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::server(format!("Server error: {e}")))?;

        Ok(())
    }
}
