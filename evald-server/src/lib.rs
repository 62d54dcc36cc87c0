//! evald-server - HTTP API for the evaluation orchestrator
//!
//! The server owns nothing itself: it exposes the [`Orchestrator`], its
//! registry and record store, and the resource monitor held in [`AppState`].
//!
//! [`Orchestrator`]: evald_core::Orchestrator

mod error;
pub mod http;
mod state;

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

pub use error::{ApiError, ErrorResponse, ServerError};
pub use http::{ApiResponse, create_router};
pub use state::AppState;

/// The evald HTTP server
pub struct EvaldServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl EvaldServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the shared application state
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Bind to the configured address and serve until `shutdown` resolves
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// Once `shutdown` resolves the orchestrator is stopped first, which
    /// cancels every task and so ends open event streams, then in-flight
    /// requests are drained.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        tracing::info!("evald server listening on {}", local);

        let orchestrator = self.state.orchestrator.clone();
        let shutdown = async move {
            shutdown.await;
            orchestrator.shutdown().await;
        };

        let router = create_router(Arc::clone(&self.state));
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        tracing::info!("evald server stopped");
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

impl ServerConfig {
    /// Create a new ServerConfig with the specified host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the socket address string (e.g., "127.0.0.1:9000")
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
