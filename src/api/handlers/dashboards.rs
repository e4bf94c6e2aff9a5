use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{CreateDashboardRequest, Dashboard, QueryResult, RunWidgetRequest, UpdateDashboardRequest};

fn dashboard_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Dashboard {} not found", id))
}

pub async fn list_dashboards(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<Vec<Dashboard>>, AppError> {
    let pod = state.pod(&pod_id).await?;
    let dashboards = state.storage.list_dashboards(&pod.id).await?;
    Ok(Json(dashboards))
}

/// Create an empty dashboard; returns every dashboard of the pod
pub async fn create_dashboard(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<CreateDashboardRequest>,
) -> Result<(StatusCode, Json<Vec<Dashboard>>), AppError> {
    let name = payload.name.as_deref().map(str::trim).unwrap_or_default();
    if name.chars().count() < 2 {
        return Err(AppError::Validation("Dashboard name is required.".to_string()));
    }

    let pod = state.pod(&pod_id).await?;
    let dashboard = Dashboard::new(pod.id.clone(), name.to_string(), payload.description);
    state.storage.save_dashboard(&dashboard).await?;

    let dashboards = state.storage.list_dashboards(&pod.id).await?;
    Ok((StatusCode::CREATED, Json(dashboards)))
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    Path((pod_id, dashboard_id)): Path<(String, String)>,
) -> Result<Json<Dashboard>, AppError> {
    let dashboard = state
        .storage
        .get_dashboard(&pod_id, &dashboard_id)
        .await?
        .ok_or_else(|| dashboard_not_found(&dashboard_id))?;
    Ok(Json(dashboard))
}

/// Patch name, description or the widget list
pub async fn update_dashboard(
    State(state): State<AppState>,
    Path((pod_id, dashboard_id)): Path<(String, String)>,
    Json(payload): Json<UpdateDashboardRequest>,
) -> Result<Json<Dashboard>, AppError> {
    let mut dashboard = state
        .storage
        .get_dashboard(&pod_id, &dashboard_id)
        .await?
        .ok_or_else(|| dashboard_not_found(&dashboard_id))?;

    if let Some(name) = payload.name {
        let name = name.trim();
        if name.chars().count() < 2 {
            return Err(AppError::Validation("Dashboard name is required.".to_string()));
        }
        dashboard.name = name.to_string();
    }
    if let Some(description) = payload.description {
        dashboard.description = Some(description);
    }
    if let Some(widgets) = payload.widgets {
        dashboard.widgets = widgets;
    }
    dashboard.touch();

    state.storage.save_dashboard(&dashboard).await?;
    Ok(Json(dashboard))
}

pub async fn delete_dashboard(
    State(state): State<AppState>,
    Path((pod_id, dashboard_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    if !state.storage.delete_dashboard(&pod_id, &dashboard_id).await? {
        return Err(dashboard_not_found(&dashboard_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Compile and run one widget against the pod's active data source
pub async fn run_widget(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<RunWidgetRequest>,
) -> Result<Json<QueryResult>, AppError> {
    let pod = state.pod(&pod_id).await?;
    let result = state.dashboards.run_widget(&payload.widget, &pod).await?;
    Ok(Json(result))
}

/// Widgets flagged for chat, already run
pub async fn chat_trends(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let pod = state.pod(&pod_id).await?;
    let dashboards = state.storage.list_dashboards(&pod.id).await?;
    let widgets = state.dashboards.chat_trends(&pod, &dashboards).await?;
    Ok(Json(serde_json::json!({ "widgets": widgets })))
}
