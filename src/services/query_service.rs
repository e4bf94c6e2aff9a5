use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::{DataSourceKind, DataSources, QueryResult};
use crate::services::connectors::{self, ConnectorDeps, FirestoreAdapter};
use crate::services::ConnectionPoolManager;
use crate::validation::SqlValidator;
use std::sync::Arc;

/// Active data source plus the settings of every source the pod knows about
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub data_source: DataSourceKind,
    pub data_sources: &'a DataSources,
}

pub struct QueryService {
    deps: ConnectorDeps,
    timeout_secs: u64,
    max_rows: u64,
}

impl QueryService {
    pub fn new(config: &Config, pool_manager: Arc<ConnectionPoolManager>, http: reqwest::Client) -> Self {
        Self {
            deps: ConnectorDeps {
                pool_manager,
                http,
                firestore: config.firestore.clone(),
            },
            timeout_secs: config.query.timeout_secs,
            max_rows: config.query.max_rows,
        }
    }

    /// Run SQL against the active data source.
    ///
    /// SQL sources only accept a single SELECT, parsed with the source's own
    /// dialect; a `LIMIT` is appended when the statement has none.
    pub async fn run_query(&self, sql: &str, ctx: QueryContext<'_>) -> Result<QueryResult, AppError> {
        let adapter = connectors::create_adapter(ctx.data_source, ctx.data_sources, &self.deps).await?;

        let prepared_sql = match adapter.dialect() {
            Some(dialect) => {
                let (prepared, limit_applied) = SqlValidator::validate_and_prepare(sql, dialect, self.max_rows)?;
                if limit_applied {
                    tracing::debug!("Applied LIMIT {} to {} query", self.max_rows, adapter.kind());
                }
                prepared
            }
            None => sql.to_string(),
        };

        tracing::info!("Executing query on {} ({})", ctx.data_source.as_str(), adapter.kind());
        let result = adapter.execute_query(&prepared_sql, self.timeout_secs).await?;
        tracing::info!(
            "Query returned {} rows in {} ms",
            result.row_count,
            result.execution_time_ms
        );

        Ok(result)
    }

    /// `SELECT 1` against a Postgres or MySQL connection string
    pub async fn test_sql_connection(&self, connection_string: &str) -> Result<(), AppError> {
        if connection_string.trim().is_empty() {
            return Err(AppError::Validation("Connection string is required.".to_string()));
        }
        let adapter = connectors::create_sql_adapter(connection_string, &self.deps.pool_manager).await?;
        adapter.test_connection().await
    }

    /// List collections of a Firestore project
    pub async fn test_firebase_connection(&self, project_id: &str, access_token: Option<&str>) -> Result<(), AppError> {
        let token = access_token
            .filter(|t| !t.trim().is_empty())
            .or(self.deps.firestore.access_token.as_deref());

        match (project_id.trim(), token) {
            (project, Some(token)) if !project.is_empty() => {
                let adapter = FirestoreAdapter::new(self.deps.http.clone(), &self.deps.firestore.base_url, project, token)?;
                connectors::ConnectorAdapter::test_connection(&adapter).await
            }
            _ => Err(AppError::Validation("Firebase credentials not configured.".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> QueryService {
        let config = Config::for_tests(":memory:");
        QueryService::new(&config, Arc::new(ConnectionPoolManager::new()), reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_run_query_requires_configured_source() {
        let sources = DataSources::default();
        let ctx = QueryContext {
            data_source: DataSourceKind::Postgres,
            data_sources: &sources,
        };
        let err = service().run_query("SELECT 1", ctx).await.unwrap_err();
        assert!(err.to_string().contains("PostgreSQL connection string not configured."));
    }

    #[tokio::test]
    async fn test_run_query_rejects_writes_before_connecting() {
        let mut sources = DataSources::default();
        sources.postgres.connection_string = "postgres://u:p@127.0.0.1:1/db".to_string();
        let ctx = QueryContext {
            data_source: DataSourceKind::Postgres,
            data_sources: &sources,
        };
        let err = service().run_query("DELETE FROM orders", ctx).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSql(_)));
    }

    #[tokio::test]
    async fn test_connection_checks_validate_input() {
        let svc = service();
        assert!(svc.test_sql_connection("  ").await.is_err());

        let err = svc.test_sql_connection("redis://localhost").await.unwrap_err();
        assert!(err.to_string().contains("Unsupported SQL protocol"));

        let err = svc.test_firebase_connection("", Some("token")).await.unwrap_err();
        assert!(err.to_string().contains("Firebase credentials not configured."));
    }
}
