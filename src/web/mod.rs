//! HTTP surface of the panel.
//!
//! ## Endpoints
//!
//! - `GET /health` - liveness, no authorization
//! - `GET /api/destinations` - one report per destination disk
//! - `POST /api/backups` - start a backup (`{"option": "only-db"}`)
//! - `GET /api/status?progress_key=` - progress of a queued backup
//! - `GET /api/download/{disk}/{*path}` - stream an archive
//! - `DELETE /api/delete/{disk}/{*path}` - delete an archive
//! - `POST /api/clean` - run the clean command
//! - `GET /api/diagnostics` - configuration and connectivity report

pub mod auth;
mod handlers;

use axum::{
    Router,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::context::AppContext;
use auth::{Authorizer, TokenAuthorizer};

/// Shared state for the web server
#[derive(Clone)]
pub struct WebState {
    pub ctx: AppContext,
    pub authorizer: Arc<dyn Authorizer>,
}

impl WebState {
    /// State gated by the configured bearer tokens.
    pub fn new(ctx: AppContext) -> Self {
        let authorizer = Arc::new(TokenAuthorizer::new(ctx.config.auth.tokens.clone()));
        Self { ctx, authorizer }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/destinations", get(handlers::destinations))
        .route("/api/backups", post(handlers::create_backup))
        .route("/api/status", get(handlers::status))
        .route("/api/download/{disk}/{*path}", get(handlers::download))
        .route("/api/delete/{disk}/{*path}", delete(handlers::delete_backup))
        .route("/api/clean", post(handlers::clean))
        .route("/api/diagnostics", get(handlers::diagnostics))
        .with_state(state)
}

pub struct WebServer {
    bind_addr: SocketAddr,
    state: WebState,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            bind_addr,
            state: WebState::new(ctx),
            shutdown_tx,
        }
    }

    /// Bind and serve. Runs until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        tracing::info!(addr = %listener.local_addr()?, "Backup panel listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
