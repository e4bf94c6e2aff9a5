use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{chat, dashboards, data_sources, knowledge, orgs, pods, AppState};
use crate::config::Config;
use crate::storage::SqliteStorage;

/// Create router with application state
pub fn create_router_with_state(storage: Arc<SqliteStorage>, config: Config) -> Router {
    create_router(AppState::new(storage, config))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/orgs", post(orgs::create_org))
        .route("/api/orgs/{org_id}", get(orgs::get_org))
        .route("/api/orgs/{org_id}/usage", get(orgs::get_usage))
        .route(
            "/api/orgs/{org_id}/pods",
            get(pods::list_pods).post(pods::create_pod),
        )
        .route(
            "/api/pods/{pod_id}",
            get(pods::get_pod).delete(pods::delete_pod),
        )
        .route(
            "/api/pods/{pod_id}/settings",
            get(pods::get_settings).put(pods::update_settings),
        )
        .route(
            "/api/pods/{pod_id}/data-sources",
            get(data_sources::get_data_sources).put(data_sources::update_data_sources),
        )
        .route(
            "/api/pods/{pod_id}/knowledge",
            get(knowledge::get_knowledge).put(knowledge::update_knowledge),
        )
        .route(
            "/api/pods/{pod_id}/knowledge/quality",
            get(knowledge::get_quality).post(knowledge::evaluate_quality),
        )
        .route(
            "/api/pods/{pod_id}/knowledge/chat-override",
            post(knowledge::set_chat_override),
        )
        .route(
            "/api/pods/{pod_id}/knowledge-bank",
            get(knowledge::list_bank_entries).post(knowledge::add_bank_entry),
        )
        .route(
            "/api/pods/{pod_id}/dashboards",
            get(dashboards::list_dashboards).post(dashboards::create_dashboard),
        )
        .route("/api/pods/{pod_id}/dashboards/run", post(dashboards::run_widget))
        .route("/api/pods/{pod_id}/dashboards/trends", get(dashboards::chat_trends))
        .route(
            "/api/pods/{pod_id}/dashboards/{dashboard_id}",
            get(dashboards::get_dashboard)
                .put(dashboards::update_dashboard)
                .delete(dashboards::delete_dashboard),
        )
        .route("/api/pods/{pod_id}/chat", post(chat::chat))
        .route("/api/pods/{pod_id}/feedback", post(chat::feedback))
        .route("/api/pods/{pod_id}/concierge", post(chat::concierge))
        .route("/api/connectors/local-sql", post(data_sources::test_local_sql))
        .route("/api/connectors/postgres", post(data_sources::test_postgres))
        .route("/api/connectors/mysql", post(data_sources::test_mysql))
        .route("/api/connectors/firebase", post(data_sources::test_firebase))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
