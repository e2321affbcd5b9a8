// HTTP server
// Chat over server-sent events plus reset and health endpoints


use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::ChatError;
use crate::chat::ChatEvent;
use crate::context::ServiceContext;

pub const SESSION_COOKIE: &str = "ragchat_sid";
const DONE_FRAME: &str = "[DONE]";
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    context: Arc<ServiceContext>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body plus status; expired sessions also clear the cookie
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
    clear_cookie: bool,
}

impl ApiError {
    const fn new(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message,
            clear_cookie: false,
        }
    }

    fn session_expired() -> Self {
        Self {
            status: StatusCode::from_u16(440).unwrap_or(StatusCode::UNAUTHORIZED),
            message: "Session expired",
            clear_cookie: true,
        }
    }
}

impl From<ChatError> for ApiError {
    #[inline]
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidRequest(_) => {
                Self::new(StatusCode::BAD_REQUEST, "Message is required")
            }
            ChatError::SessionExpired => Self::session_expired(),
            ChatError::SessionBusy => Self::new(
                StatusCode::CONFLICT,
                "A response is already in progress for this session",
            ),
            other => {
                error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Error processing request")
            }
        }
    }
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(json!({ "error": self.message }))).into_response();
        if self.clear_cookie {
            if let Ok(value) = HeaderValue::from_str(&format!(
                "{SESSION_COOKIE}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax"
            )) {
                response.headers_mut().insert(SET_COOKIE, value);
            }
        }
        response
    }
}

#[inline]
pub fn router(context: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/chat", post(chat))
        .route("/reset-chat", post(reset_chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { context })
}

/// Load the pipeline, then serve until ctrl-c
#[inline]
pub async fn serve(context: Arc<ServiceContext>) -> anyhow::Result<()> {
    context
        .orchestrator()
        .await
        .context("Failed to initialize the conversation pipeline; run `ragchat ingest` first")?;

    let addr = format!(
        "{}:{}",
        context.config().server.host,
        context.config().server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", addr))?;

    let purger = tokio::spawn(purge_expired_sessions(Arc::clone(&context)));

    info!("Server listening on {}", addr);
    let result = axum::serve(listener, router(context))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    purger.abort();
    info!("Server stopped");
    result
}

async fn purge_expired_sessions(context: Arc<ServiceContext>) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = context.sessions().purge_expired().await {
            warn!("Failed to purge expired sessions: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

async fn root() -> &'static str {
    "Server is running!"
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let message = body
        .ok()
        .and_then(|Json(request)| request.message)
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Message is required"))?;

    let orchestrator = state.context.orchestrator().await?;
    let session_id = session_cookie(&headers);
    let response = orchestrator.respond(session_id.as_deref(), &message).await?;

    let cookie = session_cookie_header(&response.session_id, state.context.as_ref());
    let sse = Sse::new(event_frames(response.events)).keep_alive(KeepAlive::default());

    Ok(([(SET_COOKIE, cookie)], sse).into_response())
}

async fn reset_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = session_cookie(&headers);
    let lease = state.context.sessions().reset(session_id.as_deref()).await?;

    let cookie = session_cookie_header(lease.id(), state.context.as_ref());
    Ok((
        [(SET_COOKIE, cookie)],
        Json(json!({ "success": true, "message": "Chat history reset" })),
    )
        .into_response())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.context.health())
}

/// Heartbeat comment, then one `{"text"}` frame per token, then `[DONE]`
fn event_frames(
    events: impl Stream<Item = ChatEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let heartbeat = futures::stream::once(async { Ok(Event::default().comment("connected")) });

    let frames = events.map(|event| {
        let frame = match event {
            ChatEvent::Token(text) | ChatEvent::Error(text) => {
                Event::default().data(json!({ "text": text }).to_string())
            }
            ChatEvent::End => Event::default().data(DONE_FRAME),
        };
        Ok(frame)
    });

    heartbeat.chain(frames)
}

/// Session id from the request cookies, if any
#[inline]
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn session_cookie_header(session_id: &str, context: &ServiceContext) -> HeaderValue {
    let max_age = context.config().cookie_max_age().as_secs();
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={session_id}; HttpOnly; Path=/; Max-Age={max_age}; SameSite=Lax"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("ragchat_sid=; Path=/"))
}
