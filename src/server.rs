//! HTTP front end: one generation endpoint and a websocket that relays
//! progress statuses.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;

#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/generate-video", post(generate_video))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub async fn serve(pipeline: Pipeline, addr: SocketAddr) -> anyhow::Result<()> {
    let state = AppState {
        pipeline: Arc::new(pipeline),
    };
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Talking avatar API is running. Connect to /ws for progress updates.",
        "preset": state.pipeline.config().preset,
        "listeners": state.pipeline.listeners(),
    }))
}

async fn generate_video(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> impl IntoResponse {
    info!("POST /generate-video ({} chars)", request.text.chars().count());
    let record = state
        .pipeline
        .run(&request.text, request.image_path.as_deref())
        .await;
    let status = if record.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(record))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_progress(socket, state))
}

async fn relay_progress(socket: WebSocket, state: AppState) {
    let mut progress = state.pipeline.subscribe();
    let (mut sink, mut stream) = socket.split();
    debug!(
        "Progress listener connected ({} total)",
        state.pipeline.listeners()
    );
    loop {
        tokio::select! {
            update = progress.recv() => match update {
                Ok(update) => {
                    let frame = match serde_json::to_string(&update) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Could not encode progress frame: {}", e);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Progress listener lagged, {} updates dropped", missed);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                // Client messages carry nothing; only a close ends the stream.
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Progress listener disconnected");
}
