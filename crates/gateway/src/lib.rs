//! HTTP gateway for Flavia.
//!
//! - `POST /flavia/chat/`: run one turn, streaming the answer text as it is
//!   generated (`text/event-stream`). A failed turn ends the body with the
//!   in-band marker `data: [ERROR] <description>`.
//! - `GET /health`: liveness probe.
//!
//! Built on Axum. A caller that disconnects mid-answer cancels its turn and
//! the thread's checkpoint is left as it was.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use flavia_agent::{AgentLoop, AgentStreamEvent};
use flavia_config::GatewayConfig;
use flavia_core::message::ThreadId;

/// Prefix of the terminal error line in a chat stream.
pub const ERROR_MARKER: &str = "data: [ERROR]";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: Arc<AgentLoop>,
    pub default_thread_id: String,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/flavia/chat/", post(chat_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors_layer(&config.allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(
    config: &GatewayConfig,
    agent: Arc<AgentLoop>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(GatewayState {
        agent,
        default_thread_id: config.default_thread_id.clone(),
    });
    let app = build_router(state, config);

    info!(addr = %addr, origins = ?config.allowed_origins, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn chat_handler(State(state): State<SharedState>, Json(payload): Json<ChatRequest>) -> Response {
    if payload.question.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "question must not be empty".into(),
            }),
        )
            .into_response();
    }

    let thread_id = payload
        .thread_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| state.default_thread_id.clone());

    info!(thread_id = %thread_id, question_len = payload.question.len(), "Chat request");

    let turn = state
        .agent
        .run_stream(ThreadId(thread_id), payload.question);
    // The guard lives as long as the body; a disconnect drops both.
    let (events, guard) = turn.into_parts();

    let body = ReceiverStream::new(events).filter_map(move |event| {
        let _ = &guard;
        chat_frame(event).map(Ok::<_, std::convert::Infallible>)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Wire form of one event: answer text verbatim, the error marker, or nothing.
fn chat_frame(event: AgentStreamEvent) -> Option<Bytes> {
    match event {
        AgentStreamEvent::Chunk { content } => Some(Bytes::from(content)),
        AgentStreamEvent::Error { message } => {
            Some(Bytes::from(format!("{ERROR_MARKER} {message}\n\n")))
        }
        _ => None,
    }
}
