//! HTTP startup hook: the first `GET /` authorizes, resolves the label and starts the loop

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::auth::CredentialProvider;
use crate::config::Config;
use crate::error::Result;

/// Starts the auto-reply loop in the background, returning the target label id
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<String>;
}

/// Launches a poller against the real Gmail API
pub struct GmailLauncher {
    provider: Arc<dyn CredentialProvider>,
    config: Config,
}

impl GmailLauncher {
    pub fn new(provider: Arc<dyn CredentialProvider>, config: Config) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl Launcher for GmailLauncher {
    async fn launch(&self) -> Result<String> {
        let poller = crate::cli::connect(self.provider.as_ref(), &self.config).await?;
        let label_id = poller.label_id().to_string();
        poller.spawn();
        Ok(label_id)
    }
}

/// Shared state for the trigger route
#[derive(Clone)]
pub struct TriggerState {
    launcher: Arc<dyn Launcher>,
    /// Label id once the loop is running
    started: Arc<Mutex<Option<String>>>,
}

impl TriggerState {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            started: Arc::new(Mutex::new(None)),
        }
    }
}

/// GET /
///
/// Starts the loop on the first successful call. Later calls report that it
/// is already running. A failed start leaves the trigger armed.
async fn start(State(state): State<TriggerState>) -> Response {
    // Held across launch so concurrent requests cannot start two loops
    let mut started = state.started.lock().await;

    if let Some(label_id) = started.as_ref() {
        return Json(json!({"status": "already_running", "label_id": label_id})).into_response();
    }

    match state.launcher.launch().await {
        Ok(label_id) => {
            info!("Auto-reply loop started from HTTP trigger, label {}", label_id);
            let body = json!({"status": "started", "label_id": label_id});
            *started = Some(label_id);
            Json(body).into_response()
        }
        Err(e) => {
            error!("Failed to start auto-reply loop: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// Build the trigger routes
pub fn router(state: TriggerState) -> Router {
    Router::new().route("/", get(start)).with_state(state)
}

/// Listen on `addr` until the process exits
pub async fn serve(addr: SocketAddr, launcher: Arc<dyn Launcher>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Trigger listening at http://{}", addr);
    axum::serve(listener, router(TriggerState::new(launcher))).await?;
    Ok(())
}
