use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{ChatRequest, ChatResponse, FeedbackRequest, SupportRequest, SupportResponse};

/// Ask a question; returns the generated SQL, its rows and an analysis
pub async fn chat(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let response = state.chat.chat(&pod_id, payload).await?;
    Ok(Json(response))
}

pub async fn feedback(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.chat.record_feedback(&pod_id, payload).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Help & support assistant; answers product questions only
pub async fn concierge(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<SupportRequest>,
) -> Result<Json<SupportResponse>, AppError> {
    let response = state.chat.support(&pod_id, payload).await?;
    Ok(Json(response))
}
