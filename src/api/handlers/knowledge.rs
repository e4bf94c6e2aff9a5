use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{
    ChatOverrideRequest, CreateKnowledgeBankEntryRequest, KnowledgeBankEntry, KnowledgeBase, KnowledgeQuality,
    QualityEvaluator, QUALITY_THRESHOLD,
};

pub async fn get_knowledge(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<KnowledgeBase>, AppError> {
    let pod = state.pod(&pod_id).await?;
    Ok(Json(pod.knowledge))
}

/// Replace the pod's knowledge base wholesale
pub async fn update_knowledge(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(knowledge): Json<KnowledgeBase>,
) -> Result<Json<KnowledgeBase>, AppError> {
    let mut pod = state.pod(&pod_id).await?;
    pod.knowledge = knowledge;
    state.storage.update_pod(&pod).await?;
    Ok(Json(pod.knowledge))
}

pub async fn get_quality(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (pod, org) = state.pod_with_org(&pod_id).await?;
    Ok(Json(json!({
        "quality": pod.knowledge_quality,
        "chatEnabled": pod.chat_allowed(&org),
        "chatOverride": pod.chat_override,
        "threshold": QUALITY_THRESHOLD,
    })))
}

/// Score the knowledge base and store the result; BUSINESS orgs only
pub async fn evaluate_quality(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (mut pod, org) = state.pod_with_org(&pod_id).await?;
    if !org.is_business() {
        return Err(AppError::Forbidden(
            "Quality scoring is available for enterprise plans only.".to_string(),
        ));
    }

    let bank = state.storage.list_bank_entries(&pod.id).await?;
    let api_key = Some(pod.settings.api_key.as_str()).filter(|k| !k.trim().is_empty());
    let result = state
        .llm
        .evaluate_knowledge_quality(&pod.knowledge, Some(pod.settings.llm_provider), api_key, &bank)
        .await;
    tracing::info!("Pod {} knowledge scored {}", pod.id, result.score);

    pod.knowledge_quality = Some(KnowledgeQuality {
        score: result.score,
        notes: result.notes,
        updated_at: Utc::now(),
        evaluated_by: QualityEvaluator::Admin,
    });
    pod.chat_enabled = pod.chat_override || result.score >= QUALITY_THRESHOLD;
    state.storage.update_pod(&pod).await?;

    Ok(Json(json!({
        "quality": pod.knowledge_quality,
        "chatEnabled": pod.chat_enabled,
        "chatOverride": pod.chat_override,
        "threshold": QUALITY_THRESHOLD,
    })))
}

/// Force chat on or off regardless of the quality score
pub async fn set_chat_override(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<ChatOverrideRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (mut pod, org) = state.pod_with_org(&pod_id).await?;
    if !org.is_business() {
        return Err(AppError::Forbidden(
            "Chat override is only available for enterprise plans.".to_string(),
        ));
    }

    pod.chat_enabled = payload.enabled;
    pod.chat_override = true;
    state.storage.update_pod(&pod).await?;

    Ok(Json(json!({
        "chatEnabled": pod.chat_enabled,
        "chatOverride": pod.chat_override,
    })))
}

pub async fn list_bank_entries(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<Vec<KnowledgeBankEntry>>, AppError> {
    let pod = state.pod(&pod_id).await?;
    let entries = state.storage.list_bank_entries(&pod.id).await?;
    Ok(Json(entries))
}

/// Append a dated highlights/lowlights note; returns the whole bank
pub async fn add_bank_entry(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<CreateKnowledgeBankEntryRequest>,
) -> Result<Json<Vec<KnowledgeBankEntry>>, AppError> {
    let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    let (Some(title), Some(date), Some(highlights), Some(lowlights)) = (
        present(payload.title),
        present(payload.date),
        present(payload.highlights),
        present(payload.lowlights),
    ) else {
        return Err(AppError::Validation(
            "title, date, highlights, and lowlights are required.".to_string(),
        ));
    };

    let pod = state.pod(&pod_id).await?;
    let entry = KnowledgeBankEntry::new(pod.id.clone(), title, date, highlights, lowlights, payload.doc_text);
    state.storage.add_bank_entry(&entry).await?;

    let entries = state.storage.list_bank_entries(&pod.id).await?;
    Ok(Json(entries))
}
