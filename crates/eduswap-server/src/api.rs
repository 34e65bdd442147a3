//! HTTP and WebSocket surface.
//!
//! REST endpoints cover the row-level reads the UI hydrates from and the
//! swap lifecycle actions taken outside a chat (request/offer/confirm/
//! reject/cancel/rate); the three WebSocket routes carry the real-time
//! channels.  Lifecycle handlers explicitly push the new swap state into the
//! fanout hub — domain objects never reach into other subsystems themselves.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, Path, Query, State},
    http::{header, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use eduswap_shared::{StudentId, Subject, SwapId};
use eduswap_store::{Review, Student, Swap};

use crate::ai::AiChatService;
use crate::ai_hub::AiHub;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::directory::StudentDirectory;
use crate::engine::{RequestOutcome, SwapEngine};
use crate::error::ServerError;
use crate::files::FileStore;
use crate::hub::ChatHub;
use crate::matching::{MatchCandidate, MatchFinder};
use crate::presence::PresenceHub;
use crate::reviews::RatingService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub engine: Arc<SwapEngine>,
    pub chat: Arc<ChatService>,
    pub hub: Arc<ChatHub>,
    pub ai: Arc<AiChatService>,
    pub ai_hub: Arc<AiHub>,
    pub presence: Arc<PresenceHub>,
    pub directory: Arc<StudentDirectory>,
    pub rating: Arc<RatingService>,
    pub matching: Arc<MatchFinder>,
    pub files: Arc<FileStore>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Swap lifecycle
        .route("/swaps/request", post(request_help))
        .route("/swaps/offer", post(offer_help))
        .route("/swaps/:id", get(get_swap))
        .route("/swaps/:id/confirm", post(confirm_swap))
        .route("/swaps/:id/reject", post(reject_swap))
        .route("/swaps/:id/cancel", post(cancel_swap))
        .route("/swaps/:id/rate", post(rate_swap))
        .route("/swaps/:id/messages", get(swap_messages))
        .route("/swaps/:id/unread", get(swap_unread))
        // Students
        .route("/students", post(add_student))
        .route("/students/:id/swaps", get(student_swaps))
        .route("/students/:id/incomes", get(student_incomes))
        .route("/students/:id/unread-chats", get(student_unread_chats))
        .route("/students/:id/reviews", get(student_reviews))
        .route("/students/:id/matches", get(student_matches))
        .route("/students/:id/online", get(student_online))
        .route("/students/:id/ai-messages", get(student_ai_messages))
        // Attachments
        .route("/files/:name", get(download_file))
        // Real-time channels
        .route("/ws/chat", get(chat_socket))
        .route("/ws/ai", get(ai_socket))
        .route("/ws/presence", get(presence_socket))
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Swap lifecycle
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelpRequest {
    /// The acting student (requester of this swap).
    student_id: StudentId,
    /// The other side of the exchange.
    target_id: StudentId,
    subject: Subject,
    comment: Option<String>,
}

/// Duplicate requests are a benign no-op, reported rather than failed.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HelpResponse {
    created: bool,
    swap: Option<Swap>,
    existing_swap_id: Option<SwapId>,
}

impl From<RequestOutcome> for HelpResponse {
    fn from(outcome: RequestOutcome) -> Self {
        match outcome {
            RequestOutcome::Created(swap) => Self {
                created: true,
                swap: Some(swap),
                existing_swap_id: None,
            },
            RequestOutcome::AlreadyActive(id) => Self {
                created: false,
                swap: None,
                existing_swap_id: Some(id),
            },
        }
    }
}

async fn request_help(
    State(state): State<AppState>,
    Json(req): Json<HelpRequest>,
) -> Result<Json<HelpResponse>, ServerError> {
    let outcome = state
        .engine
        .request_help(req.student_id, req.target_id, req.subject, req.comment)
        .await?;
    Ok(Json(outcome.into()))
}

async fn offer_help(
    State(state): State<AppState>,
    Json(req): Json<HelpRequest>,
) -> Result<Json<HelpResponse>, ServerError> {
    let outcome = state
        .engine
        .offer_help(req.student_id, req.target_id, req.subject, req.comment)
        .await?;
    Ok(Json(outcome.into()))
}

async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<SwapId>,
) -> Result<Json<Swap>, ServerError> {
    // Active and history are separate lookup paths; try both for reads.
    let swap = match state.engine.find_swap(id).await {
        Some(swap) => swap,
        None => state
            .engine
            .find_history_swap(id)
            .await
            .ok_or_else(|| ServerError::NotFound(format!("no swap {id}")))?,
    };
    Ok(Json(swap))
}

async fn confirm_swap(
    State(state): State<AppState>,
    Path(id): Path<SwapId>,
) -> Result<Json<Swap>, ServerError> {
    let swap = state.engine.confirm(id).await?;
    state.hub.broadcast_swap_updated(&swap).await;
    Ok(Json(swap))
}

async fn reject_swap(
    State(state): State<AppState>,
    Path(id): Path<SwapId>,
) -> Result<Json<Swap>, ServerError> {
    let swap = state.engine.reject(id).await?;
    state.hub.broadcast_swap_updated(&swap).await;
    Ok(Json(swap))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    student_id: StudentId,
}

async fn cancel_swap(
    State(state): State<AppState>,
    Path(id): Path<SwapId>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.engine.cancel_request(id, req.student_id).await?;
    Ok(Json(serde_json::json!({ "canceled": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateRequest {
    student_id: StudentId,
    comment: String,
    rating: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RateResponse {
    review: Review,
    swap: Swap,
}

async fn rate_swap(
    State(state): State<AppState>,
    Path(id): Path<SwapId>,
    Json(req): Json<RateRequest>,
) -> Result<Json<RateResponse>, ServerError> {
    let (review, swap) = state
        .rating
        .rate_swap(id, req.student_id, req.comment, req.rating)
        .await?;
    state.hub.broadcast_swap_updated(&swap).await;
    Ok(Json(RateResponse { review, swap }))
}

async fn swap_messages(
    State(state): State<AppState>,
    Path(id): Path<SwapId>,
) -> Result<Json<Vec<eduswap_store::Message>>, ServerError> {
    Ok(Json(state.chat.messages(id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadQuery {
    student_id: StudentId,
}

async fn swap_unread(
    State(state): State<AppState>,
    Path(id): Path<SwapId>,
    Query(query): Query<UnreadQuery>,
) -> Result<Json<i64>, ServerError> {
    Ok(Json(state.chat.unread_count(id, query.student_id).await?))
}

// ---------------------------------------------------------------------------
// Students
// ---------------------------------------------------------------------------

async fn add_student(
    State(state): State<AppState>,
    Json(student): Json<Student>,
) -> Result<Json<Student>, ServerError> {
    state.directory.add_student(student.clone()).await?;
    info!(student = %student.id, username = %student.username, "student registered");
    Ok(Json(student))
}

async fn student_swaps(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> Result<Json<Vec<Swap>>, ServerError> {
    Ok(Json(state.engine.swaps_for_student(id).await))
}

async fn student_incomes(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> Result<Json<usize>, ServerError> {
    Ok(Json(state.engine.new_incomes_count(id).await))
}

async fn student_unread_chats(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> Result<Json<usize>, ServerError> {
    Ok(Json(state.chat.unread_chats_count(id).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewsResponse {
    reviews: Vec<Review>,
    average_rating: Option<f64>,
}

async fn student_reviews(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> Result<Json<ReviewsResponse>, ServerError> {
    Ok(Json(ReviewsResponse {
        reviews: state.rating.reviews_for(id).await?,
        average_rating: state.rating.average_rating(id).await?,
    }))
}

async fn student_matches(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> Result<Json<Vec<MatchCandidate>>, ServerError> {
    Ok(Json(state.matching.candidates_for(id).await?))
}

async fn student_online(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> Result<Json<bool>, ServerError> {
    Ok(Json(state.presence.is_online(id).await))
}

async fn student_ai_messages(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> Result<Json<Vec<eduswap_store::AiMessage>>, ServerError> {
    Ok(Json(state.ai.conversation(id).await?))
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

async fn download_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    let data = state.files.get_file(&name).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Real-time channels
// ---------------------------------------------------------------------------

async fn chat_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub.handle_socket(socket))
}

async fn ai_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.ai_hub.clone();
    ws.on_upgrade(move |socket| hub.handle_socket(socket))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceQuery {
    student_id: StudentId,
}

async fn presence_socket(
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let presence = state.presence.clone();
    ws.on_upgrade(move |socket| presence.handle_socket(query.student_id, socket))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
