use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Request, Response},
    middleware,
    routing::get,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use ward_core::{ChannelRegistry, Classify, NotificationComposer, RetryExecutor};

use crate::{
    config::AppConfig, error::ApiError, handlers, metrics, middleware as app_middleware, routes,
    storage::TableClient, websocket,
};

/// Shared handler state. Everything behind it is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub storage: TableClient,
    pub retry: Arc<RetryExecutor>,
    pub composer: NotificationComposer,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig, storage: TableClient) -> Self {
        let registry = Arc::new(ChannelRegistry::with_send_timeout(config.send_timeout()));
        let composer =
            NotificationComposer::with_station_channel(registry, &config.realtime.station_channel);
        Self {
            storage,
            retry: Arc::new(RetryExecutor::new(config.retry.clone())),
            composer,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        self.composer.registry()
    }

    pub fn station_channel(&self) -> &str {
        self.composer.station_channel()
    }

    /// Run a storage call under the retry policy and surface failure as an [`ApiError`].
    pub async fn storage_call<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
        ApiError: From<E>,
    {
        Ok(self.retry.execute(label, operation).await?)
    }
}

pub struct WardServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        // Dashboard sockets
        .route("/ws/{token}", get(websocket::ws_handler))
        // Write API
        .nest("/api/v1", routes::api_routes())
        // Middleware stack, innermost first; request id wraps the trace layer so spans see it
        .layer(middleware::from_fn(app_middleware::http_metrics))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    use tracing::field::Empty;
                    // Probes are polled constantly; keep them out of the access log
                    if req.uri().path() == "/healthz" {
                        return tracing::span!(tracing::Level::TRACE, "noop");
                    }
                    let req_id = req
                        .extensions()
                        .get::<HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        if let Some(meta) = span.metadata() {
                            if meta.name() != "noop" {
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            }
                        }
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    storage: Option<TableClient>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            storage: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use a preconfigured storage client instead of one built from `storage` config.
    pub fn with_storage(mut self, storage: TableClient) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn build(self) -> anyhow::Result<WardServer> {
        metrics::init_metrics();

        let storage = match self.storage {
            Some(storage) => storage,
            None => TableClient::new(&self.config.storage)?,
        };
        tracing::info!(
            storage = %self.config.storage.url,
            station_channel = %self.config.realtime.station_channel,
            max_attempts = self.config.retry.max_attempts,
            "Application state initialized"
        );

        let app = build_app(AppState::new(self.config, storage));
        Ok(WardServer {
            addr: self.addr,
            app,
        })
    }
}

impl WardServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
