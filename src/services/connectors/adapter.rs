// Connector adapter trait shared by the SQL drivers and Firestore
use crate::api::middleware::AppError;
use crate::models::QueryResult;
use crate::services::sql_builder::SqlDialect;

/// A data source that can run a query and report columns plus JSON rows
#[async_trait::async_trait]
pub trait ConnectorAdapter: Send + Sync {
    /// Execute a query, failing with `AppError::Database` once `timeout_secs` elapses
    async fn execute_query(&self, sql: &str, timeout_secs: u64) -> Result<QueryResult, AppError>;

    /// Connector name used in logs ("postgres", "mysql", "firestore")
    fn kind(&self) -> &str;

    /// SQL dialect for validation; `None` for non-SQL stores
    fn dialect(&self) -> Option<SqlDialect>;

    async fn test_connection(&self) -> Result<(), AppError>;
}
