use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{DataSources, TestFirebaseConnectionRequest, TestSqlConnectionRequest, UpdateDataSourcesRequest};
use crate::services::connectors::SqlProtocol;

pub async fn get_data_sources(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> Result<Json<DataSources>, AppError> {
    let pod = state.pod(&pod_id).await?;
    Ok(Json(pod.data_sources))
}

/// Merge connection settings into the pod; omitted fields are kept.
/// Pools for connection strings the pod stopped using are dropped.
pub async fn update_data_sources(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
    Json(payload): Json<UpdateDataSourcesRequest>,
) -> Result<Json<DataSources>, AppError> {
    let mut pod = state.pod(&pod_id).await?;
    let previous = pod.data_sources.clone();
    pod.data_sources.apply(payload);
    state.storage.update_pod(&pod).await?;

    for connection_string in pod.data_sources.replaced_connection_strings(&previous) {
        state.pool_manager.remove_pool(&connection_string).await;
    }
    tracing::info!("Updated data sources for pod {}", pod.id);
    Ok(Json(pod.data_sources))
}

fn required_connection_string(payload: TestSqlConnectionRequest) -> Result<String, AppError> {
    payload
        .connection_string
        .map(|cs| cs.trim().to_string())
        .filter(|cs| !cs.is_empty())
        .ok_or_else(|| AppError::Validation("connectionString is required.".to_string()))
}

async fn test_sql(state: &AppState, connection_string: &str, expected: Option<SqlProtocol>) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(expected) = expected {
        if SqlProtocol::from_connection_string(connection_string)? != expected {
            let scheme = match expected {
                SqlProtocol::Postgres => "postgres://",
                SqlProtocol::MySql => "mysql://",
            };
            return Err(AppError::Validation(format!("Connection string must start with {}", scheme)));
        }
    }

    state.query.test_sql_connection(connection_string).await?;
    Ok(Json(json!({ "ok": true })))
}

/// `SELECT 1` through whichever protocol the URL names
pub async fn test_local_sql(
    State(state): State<AppState>,
    Json(payload): Json<TestSqlConnectionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let connection_string = required_connection_string(payload)?;
    test_sql(&state, &connection_string, None).await
}

pub async fn test_postgres(
    State(state): State<AppState>,
    Json(payload): Json<TestSqlConnectionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let connection_string = required_connection_string(payload)?;
    test_sql(&state, &connection_string, Some(SqlProtocol::Postgres)).await
}

pub async fn test_mysql(
    State(state): State<AppState>,
    Json(payload): Json<TestSqlConnectionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let connection_string = required_connection_string(payload)?;
    test_sql(&state, &connection_string, Some(SqlProtocol::MySql)).await
}

/// List collections of the project with the supplied or server token
pub async fn test_firebase(
    State(state): State<AppState>,
    Json(payload): Json<TestFirebaseConnectionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let project_id = payload.project_id.as_deref().map(str::trim).unwrap_or_default();
    if project_id.is_empty() {
        return Err(AppError::Validation("projectId is required.".to_string()));
    }

    state
        .query
        .test_firebase_connection(project_id, payload.access_token.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}
