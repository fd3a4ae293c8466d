use std::{path::PathBuf, sync::Arc};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use frame_pipe::{SessionState, stats::PipelineStats};
use tokio::{net::TcpListener, sync::watch};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::{config::AppConfig, handler};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Read-only view of the running session.
#[derive(Clone)]
pub(crate) struct StreamView {
    pub state: watch::Receiver<SessionState>,
    pub stats: Arc<PipelineStats>,
    pub destination: Arc<str>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub content_dir: Arc<PathBuf>,
    pub stream: StreamView,
}

pub(crate) fn app_router(state: AppState, public_dir: PathBuf) -> Router {
    let content = ServeDir::new(state.content_dir.as_path());
    Router::new()
        .route("/upload", post(handler::content::upload))
        .route("/api/files", get(handler::content::list_files))
        .route("/api/files/{name}", delete(handler::content::delete_file))
        .route("/api/stream", get(handler::stream::status))
        .nest_service("/content", content)
        .fallback_service(ServeDir::new(public_dir))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub(crate) fn start_api_server(config: &AppConfig, stream: StreamView, cancel: CancellationToken) {
    let listen = config.listen.clone();
    let state = AppState {
        content_dir: Arc::new(config.content_dir.clone()),
        stream,
    };
    let app = app_router(state, config.public_dir.clone());

    tokio::spawn(async move {
        let listener = match TcpListener::bind(&listen).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API server failed to bind {}: {}", listen, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", listen);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running API server: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
