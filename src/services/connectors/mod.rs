// Connector layer: one adapter per data-source kind
pub mod adapter;
pub mod firestore;
pub mod mysql;
pub mod postgresql;

pub use adapter::ConnectorAdapter;
pub use firestore::FirestoreAdapter;
pub use mysql::MySqlAdapter;
pub use postgresql::PostgresAdapter;

use crate::api::middleware::AppError;
use crate::config::FirestoreConfig;
use crate::models::{DataSourceKind, DataSources};
use crate::services::ConnectionPoolManager;
use std::sync::Arc;

const UNSUPPORTED_PROTOCOL: &str = "Unsupported SQL protocol. Use postgres:// or mysql://";

/// Wire protocol implied by a SQL connection string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlProtocol {
    Postgres,
    MySql,
}

impl SqlProtocol {
    pub fn from_connection_string(connection_string: &str) -> Result<Self, AppError> {
        let scheme = url::Url::parse(connection_string.trim())
            .map(|u| u.scheme().to_string())
            .unwrap_or_default();
        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(SqlProtocol::Postgres),
            "mysql" | "mysql2" => Ok(SqlProtocol::MySql),
            _ => Err(AppError::Validation(UNSUPPORTED_PROTOCOL.to_string())),
        }
    }
}

/// Shared handles the factory needs to build adapters
#[derive(Clone)]
pub struct ConnectorDeps {
    pub pool_manager: Arc<ConnectionPoolManager>,
    pub http: reqwest::Client,
    pub firestore: FirestoreConfig,
}

/// Build an adapter for a SQL connection string, routing on its scheme
pub async fn create_sql_adapter(
    connection_string: &str,
    pool_manager: &ConnectionPoolManager,
) -> Result<Box<dyn ConnectorAdapter>, AppError> {
    let connection_string = connection_string.trim();
    match SqlProtocol::from_connection_string(connection_string)? {
        SqlProtocol::Postgres => {
            let pool = pool_manager.get_or_create_pg_pool(connection_string).await?;
            Ok(Box::new(PostgresAdapter::new(pool, connection_string)?))
        }
        SqlProtocol::MySql => {
            let pool = pool_manager.get_or_create_mysql_pool(connection_string).await?;
            Ok(Box::new(MySqlAdapter::new(pool, connection_string)?))
        }
    }
}

/// Bearer token for Firestore: the pod's own token wins over the server default
pub fn firestore_token<'a>(sources: &'a DataSources, config: &'a FirestoreConfig) -> Option<&'a str> {
    sources
        .firebase
        .access_token
        .as_deref()
        .or(config.access_token.as_deref())
        .filter(|t| !t.trim().is_empty())
}

/// Factory for the active data source of a pod
pub async fn create_adapter(
    kind: DataSourceKind,
    sources: &DataSources,
    deps: &ConnectorDeps,
) -> Result<Box<dyn ConnectorAdapter>, AppError> {
    match kind {
        DataSourceKind::Firebase => {
            let project_id = sources.firebase.project_id.trim();
            let token = firestore_token(sources, &deps.firestore);
            match (project_id.is_empty(), token) {
                (false, Some(token)) => Ok(Box::new(FirestoreAdapter::new(
                    deps.http.clone(),
                    &deps.firestore.base_url,
                    project_id,
                    token,
                )?)),
                _ => Err(AppError::Validation("Firebase credentials not configured.".to_string())),
            }
        }
        sql_kind => {
            let connection_string = sources.connection_string(sql_kind).unwrap_or_default();
            if connection_string.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "{} connection string not configured.",
                    sql_kind.label()
                )));
            }
            create_sql_adapter(connection_string, &deps.pool_manager).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(token: Option<&str>) -> ConnectorDeps {
        ConnectorDeps {
            pool_manager: Arc::new(ConnectionPoolManager::new()),
            http: reqwest::Client::new(),
            firestore: FirestoreConfig {
                base_url: "http://127.0.0.1:9/v1".to_string(),
                access_token: token.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_protocol_detection() {
        assert_eq!(SqlProtocol::from_connection_string("postgres://u@h/db").unwrap(), SqlProtocol::Postgres);
        assert_eq!(SqlProtocol::from_connection_string("postgresql://u@h/db").unwrap(), SqlProtocol::Postgres);
        assert_eq!(SqlProtocol::from_connection_string("mysql2://u@h/db").unwrap(), SqlProtocol::MySql);

        let err = SqlProtocol::from_connection_string("sqlite:///tmp/x.db").unwrap_err();
        assert!(err.to_string().contains(UNSUPPORTED_PROTOCOL));
        assert!(SqlProtocol::from_connection_string("not a url").is_err());
    }

    #[tokio::test]
    async fn test_missing_connection_strings() {
        let sources = DataSources::default();
        let deps = deps(None);

        for (kind, label) in [
            (DataSourceKind::LocalSql, "Local SQL"),
            (DataSourceKind::Postgres, "PostgreSQL"),
            (DataSourceKind::MySql, "MySQL"),
        ] {
            let err = create_adapter(kind, &sources, &deps).await.err().unwrap();
            assert_eq!(
                err.to_string(),
                format!("Validation error: {} connection string not configured.", label)
            );
        }
    }

    #[tokio::test]
    async fn test_firebase_requires_project_and_token() {
        let mut sources = DataSources::default();
        let err = create_adapter(DataSourceKind::Firebase, &sources, &deps(Some("t"))).await.err().unwrap();
        assert!(err.to_string().contains("Firebase credentials not configured."));

        sources.firebase.project_id = "proj".to_string();
        assert!(create_adapter(DataSourceKind::Firebase, &sources, &deps(None)).await.is_err());

        let adapter = create_adapter(DataSourceKind::Firebase, &sources, &deps(Some("t"))).await.unwrap();
        assert_eq!(adapter.kind(), "firestore");
    }

    #[tokio::test]
    async fn test_local_sql_routes_on_scheme() {
        let mut sources = DataSources::default();
        sources.local_sql.connection_string = "mysql://u:p@127.0.0.1:1/db".to_string();
        let adapter = create_adapter(DataSourceKind::LocalSql, &sources, &deps(None)).await.unwrap();
        assert_eq!(adapter.kind(), "mysql");

        sources.local_sql.connection_string = "ftp://example.com".to_string();
        assert!(create_adapter(DataSourceKind::LocalSql, &sources, &deps(None)).await.is_err());
    }

    #[test]
    fn test_pod_token_overrides_server_token() {
        let mut sources = DataSources::default();
        let config = FirestoreConfig {
            base_url: String::new(),
            access_token: Some("server".to_string()),
        };
        assert_eq!(firestore_token(&sources, &config), Some("server"));
        sources.firebase.access_token = Some("pod".to_string());
        assert_eq!(firestore_token(&sources, &config), Some("pod"));
    }
}
