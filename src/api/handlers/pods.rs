use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{CreatePodRequest, Pod, PodSettingsView, PodView, UpdatePodSettingsRequest};

/// List the pods of an organization
pub async fn list_pods(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let org = state
        .storage
        .get_org(&org_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", org_id)))?;
    let pods = state.storage.list_pods(&org.id).await?;
    let pods: Vec<PodView> = pods.iter().map(PodView::from).collect();

    Ok(Json(serde_json::json!({
        "pods": pods,
        "licenseType": org.tier,
    })))
}

/// Create a pod with starter knowledge and empty data sources
pub async fn create_pod(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Json(payload): Json<CreatePodRequest>,
) -> Result<(StatusCode, Json<PodView>), AppError> {
    let name = payload.name.as_deref().map(str::trim).unwrap_or_default();
    if name.chars().count() < 2 {
        return Err(AppError::Validation("Pod name must be at least 2 characters.".to_string()));
    }

    let org = state
        .storage
        .get_org(&org_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", org_id)))?;

    let pod = Pod::new(org.id.clone(), name.to_string());
    let cap = org.account_type.pod_cap();
    if !state.storage.create_pod(&pod, cap).await? {
        return Err(AppError::Forbidden("Individual license allows up to 2 pods.".to_string()));
    }
    tracing::info!("Created pod {} in org {}", pod.id, org.id);

    Ok((StatusCode::CREATED, Json(PodView::from(&pod))))
}

pub async fn get_pod(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<PodView>, AppError> {
    let pod = state.pod(&pod_id).await?;
    Ok(Json(PodView::from(&pod)))
}

/// Delete a pod and everything it owns
pub async fn delete_pod(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !state.storage.delete_pod(&pod_id).await? {
        return Err(AppError::NotFound(format!("Pod {} not found", pod_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_settings(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<PodSettingsView>, AppError> {
    let pod = state.pod(&pod_id).await?;
    Ok(Json(PodSettingsView::from(&pod.settings)))
}

/// Update provider, API key and active data source; omitted fields are kept
pub async fn update_settings(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<UpdatePodSettingsRequest>,
) -> Result<Json<PodSettingsView>, AppError> {
    let mut pod = state.pod(&pod_id).await?;

    if let Some(provider) = payload.llm_provider {
        pod.settings.llm_provider = provider;
    }
    if let Some(api_key) = payload.api_key {
        pod.settings.api_key = api_key.trim().to_string();
    }
    if let Some(source) = payload.active_data_source {
        pod.settings.active_data_source = source;
    }

    state.storage.update_pod(&pod).await?;
    Ok(Json(PodSettingsView::from(&pod.settings)))
}
