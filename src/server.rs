//! HTTP surface for the chat service.
//!
//! Thin glue over the pipeline: routing, status mapping, and CORS. All
//! retrieval semantics live in `chat` and `rag`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatError, ChatPipeline, ChatTurn};
use crate::rag::{IndexStats, VectorIndex};

/// State shared across requests.
pub struct AppState {
    pub pipeline: ChatPipeline,
    pub index: Arc<VectorIndex>,
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

/// Body of a successful `POST /chat` response.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Stage timeouts become 504 so clients can tell "try again later"
/// from a failed request; everything else is 500.
fn error_status(error: &ChatError) -> StatusCode {
    if error.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(error: ChatError) -> Response {
    log::error!("chat request failed: {}", error);
    (
        error_status(&error),
        Json(json!({ "detail": error.to_string() })),
    )
        .into_response()
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "TestWise RAG Backend API", "status": "running" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "message": "RAG backend is running" }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<IndexStats> {
    Json(state.index.stats())
}

async fn chat(State(state): State<Arc<AppState>>, Json(request): Json<ChatRequest>) -> Response {
    match state
        .pipeline
        .answer(&request.question, &request.conversation_history)
        .await
    {
        Ok(answer) => Json(ChatResponse {
            answer: answer.answer,
            sources: answer.sources,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Streaming variant of `/chat`: a `sources` event first, then `delta`
/// fragments, then `done`.
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    use futures_util::StreamExt;

    match state
        .pipeline
        .answer_stream(&request.question, &request.conversation_history)
        .await
    {
        Ok((sources, mut fragments)) => {
            let events = async_stream::stream! {
                yield Ok::<_, std::convert::Infallible>(
                    Event::default()
                        .event("sources")
                        .data(serde_json::to_string(&sources).unwrap_or_default()),
                );
                while let Some(item) = fragments.next().await {
                    match item {
                        Ok(delta) => yield Ok(Event::default().event("delta").data(delta)),
                        Err(e) => {
                            log::error!("generation stream failed: {}", e);
                            yield Ok(Event::default().event("error").data(e.to_string()));
                            break;
                        }
                    }
                }
                yield Ok(Event::default().event("done").data(""));
            };
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: Arc<AppState>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("RAG backend listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
        })
        .await
}
