pub mod chat;
pub mod dashboards;
pub mod data_sources;
pub mod knowledge;
pub mod orgs;
pub mod pods;

use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::{Organization, Pod};
use crate::services::{ChatService, ConnectionPoolManager, DashboardService, LlmService, QueryService, UsageService};
use crate::storage::SqliteStorage;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<SqliteStorage>,
    pub config: Config,
    pub pool_manager: Arc<ConnectionPoolManager>,
    pub llm: Arc<LlmService>,
    pub query: Arc<QueryService>,
    pub dashboards: Arc<DashboardService>,
    pub chat: Arc<ChatService>,
    pub usage: UsageService,
}

impl AppState {
    pub fn new(storage: Arc<SqliteStorage>, config: Config) -> Self {
        let http = reqwest::Client::new();
        let llm = LlmService::new(&config.llm, http.clone());
        Self::with_llm(storage, config, llm, http)
    }

    /// Wire every service around a prepared LLM service
    pub fn with_llm(storage: Arc<SqliteStorage>, config: Config, llm: LlmService, http: reqwest::Client) -> Self {
        let pool_manager = Arc::new(ConnectionPoolManager::new());
        let llm = Arc::new(llm);
        let query = Arc::new(QueryService::new(&config, pool_manager.clone(), http));
        let dashboards = Arc::new(DashboardService::new(query.clone()));
        let usage = UsageService::new(config.billing.clone());
        let chat = Arc::new(ChatService::new(
            storage.clone(),
            llm.clone(),
            query.clone(),
            usage.clone(),
        ));

        Self {
            storage,
            config,
            pool_manager,
            llm,
            query,
            dashboards,
            chat,
            usage,
        }
    }

    pub(crate) async fn pod(&self, pod_id: &str) -> Result<Pod, AppError> {
        self.storage
            .get_pod(pod_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Pod {} not found", pod_id)))
    }

    pub(crate) async fn pod_with_org(&self, pod_id: &str) -> Result<(Pod, Organization), AppError> {
        self.storage
            .get_pod_with_org(pod_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Pod {} not found", pod_id)))
    }
}
