//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the governed gateway router and the admin router
//! - Wire up middleware (request ID, tracing, timeout, governance)
//! - Start the sweepers and serve until shutdown
//!
//! # Data Flow
//! ```text
//! TcpListener
//!     → SetRequestId → Trace → PropagateRequestId → Timeout
//!     → governance_middleware (route layer)
//!     → proxy::forward → upstream
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware::from_fn_with_state, routing::any, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::{setup_admin_router, AdminState};
use crate::clock::{Clock, SystemClock};
use crate::config::GovernorConfig;
use crate::governance::{GovernancePipeline, GovernanceStore, Sweeper};
use crate::http::middleware::{governance_middleware, GovernanceState};
use crate::http::proxy::{forward, ProxyState};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;

/// The governing gateway: one upstream, one set of governance stores.
pub struct HttpServer {
    config: GovernorConfig,
    store: Arc<GovernanceStore>,
    pipeline: GovernancePipeline,
    sweeper: Arc<Sweeper>,
}

impl HttpServer {
    /// Create a server on the system clock.
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a server on an injected clock.
    pub fn with_clock(config: GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(GovernanceStore::new(&config, clock));
        let pipeline = GovernancePipeline::new(&config, store.clone());
        let sweeper = Arc::new(Sweeper::new(store.clone(), config.sweep.clone()));
        Self {
            config,
            store,
            pipeline,
            sweeper,
        }
    }

    pub fn store(&self) -> &Arc<GovernanceStore> {
        &self.store
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Gateway router: every path is governed, then forwarded.
    #[allow(deprecated)]
    pub fn router(&self) -> Result<Router, axum::http::uri::InvalidUri> {
        let governance = GovernanceState {
            pipeline: self.pipeline.clone(),
            identity: Arc::new(self.config.identity.clone()),
        };
        let proxy = ProxyState::new(&self.config)?;

        Ok(Router::new()
            .route("/", any(forward))
            .route("/{*path}", any(forward))
            .route_layer(from_fn_with_state(governance, governance_middleware))
            .with_state(proxy)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs))),
            ))
    }

    pub fn admin_router(&self) -> Router {
        setup_admin_router(AdminState {
            store: self.store.clone(),
            policy: self.pipeline.policy().clone(),
            invalidator: self.store.invalidator(),
            sweeper: self.sweeper.clone(),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
            slowest_limit: self.config.metrics.slowest_limit,
            started_at: Instant::now(),
        })
    }

    /// Run the gateway on `listener`, binding the admin listener from config
    /// when enabled.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let admin_listener = if self.config.admin.enabled {
            Some(TcpListener::bind(&self.config.admin.bind_address).await?)
        } else {
            None
        };
        self.serve(listener, admin_listener, shutdown).await
    }

    /// Run the gateway and optional admin API on pre-bound listeners until
    /// `shutdown` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        admin_listener: Option<TcpListener>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let router = self
            .router()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.address,
            "HTTP server starting"
        );

        let sweepers = self.sweeper.spawn(&shutdown);

        let admin_task = match admin_listener {
            Some(admin_listener) => {
                let admin_addr = admin_listener.local_addr()?;
                let admin = self.admin_router();
                let mut admin_shutdown = shutdown.subscribe();
                tracing::info!(address = %admin_addr, "Admin API listening");
                Some(tokio::spawn(async move {
                    let result = axum::serve(admin_listener, admin)
                        .with_graceful_shutdown(async move {
                            let _ = admin_shutdown.recv().await;
                        })
                        .await;
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Admin API stopped with error");
                    }
                }))
            }
            None => None,
        };

        let mut shutdown_rx = shutdown.subscribe();
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;

        // The gateway can also stop on its own error; take the rest down with it.
        shutdown.trigger();
        for handle in sweepers.into_iter().chain(admin_task) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }

        tracing::info!("HTTP server stopped");
        result
    }
}
