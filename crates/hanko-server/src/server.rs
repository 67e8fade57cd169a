use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware, routing::get};
use hanko_auth::{AuthState, Persister, auth_router};
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, health, middleware as app_middleware, storage};

/// State of the server-level routes.
#[derive(Clone)]
pub struct AppState {
    pub persister: Arc<dyn Persister>,
}

pub struct HankoServer {
    addr: SocketAddr,
    app: Router,
    token_purge: Option<JoinHandle<()>>,
}

/// Builds the router with the storage backend selected by `cfg`.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let persister = storage::create_persister(&cfg.storage).await?;
    build_router(cfg, persister)
}

/// Builds the router on an existing persister.
pub fn build_router(cfg: &AppConfig, persister: Arc<dyn Persister>) -> anyhow::Result<Router> {
    let auth = AuthState::from_config(&cfg.auth, Arc::clone(&persister))?;

    let health_routes = Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/alive", get(health::alive))
        .with_state(AppState { persister });

    let body_limit = cfg.server.body_limit_bytes;
    Ok(auth_router(auth)
        .merge(health_routes)
        // Layers apply bottom-up: the request id is assigned before the trace span is opened.
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit)))
}

pub struct ServerBuilder {
    config: AppConfig,
    persister: Option<Arc<dyn Persister>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            persister: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Uses `persister` instead of the configured storage backend.
    pub fn with_persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub async fn build(self) -> anyhow::Result<HankoServer> {
        let persister = match self.persister {
            Some(persister) => persister,
            None => storage::create_persister(&self.config.storage).await?,
        };
        let app = build_router(&self.config, Arc::clone(&persister))?;

        let purge_secs = self.config.storage.token_purge_interval_secs;
        let token_purge = (purge_secs > 0).then(|| {
            storage::start_token_purge(persister, Duration::from_secs(purge_secs))
        });

        Ok(HankoServer {
            addr: self.config.addr(),
            app,
            token_purge,
        })
    }
}

impl HankoServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Some(task) = self.token_purge {
            task.abort();
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
