use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{AccountType, CreateOrganizationRequest, LicenseTier, Organization};

/// Create an organization with a fresh token bucket for its tier
pub async fn create_org(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<Organization>), AppError> {
    let name = payload.name.as_deref().map(str::trim).unwrap_or_default();
    if name.chars().count() < 2 {
        return Err(AppError::Validation(
            "Organization name must be at least 2 characters.".to_string(),
        ));
    }

    let account_type = payload.account_type.unwrap_or(AccountType::Individual);
    let tier = payload.tier.unwrap_or_else(|| LicenseTier::default_for(account_type));
    let org = Organization::new(name.to_string(), account_type, tier, state.usage.token_limit(tier));

    state.storage.create_org(&org).await?;
    tracing::info!("Created {} org {}", account_type.as_str(), org.id);

    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn get_org(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<Json<Organization>, AppError> {
    let org = state
        .storage
        .get_org(&org_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", org_id)))?;
    Ok(Json(org))
}

/// Current token usage, rolling the bucket over first when its window ended
pub async fn get_usage(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let usage = &state.usage;
    let org = state
        .storage
        .modify_org(&org_id, |org| {
            usage.reset_if_needed(org, Utc::now());
            org.clone()
        })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", org_id)))?;

    Ok(Json(serde_json::json!({
        "tier": org.tier,
        "limit": org.token_bucket.limit,
        "used": org.token_bucket.used,
        "remaining": org.token_bucket.remaining(),
        "resetAt": org.token_bucket.reset_at,
    })))
}
