use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod};
use mysql_async::{Opts, OptsBuilder, PoolConstraints, PoolOpts};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::NoTls;

use crate::api::middleware::AppError;

/// Connections per MySQL data-source pool
const MYSQL_MAX_CONNECTIONS: usize = 4;

/// Keeps one pool per data-source connection string so repeated chat and
/// dashboard queries reuse connections
pub struct ConnectionPoolManager {
    pg_pools: Arc<RwLock<HashMap<String, Pool>>>,
    mysql_pools: Arc<RwLock<HashMap<String, mysql_async::Pool>>>,
    max_pool_size: usize,
}

impl ConnectionPoolManager {
    pub fn new() -> Self {
        Self::with_config(16)
    }

    pub fn with_config(max_pool_size: usize) -> Self {
        Self {
            pg_pools: Arc::new(RwLock::new(HashMap::new())),
            mysql_pools: Arc::new(RwLock::new(HashMap::new())),
            max_pool_size,
        }
    }

    /// Get or create a PostgreSQL pool for the given connection URL.
    /// Safe to call concurrently from multiple tasks.
    pub async fn get_or_create_pg_pool(&self, connection_url: &str) -> Result<Pool, AppError> {
        {
            let pools = self.pg_pools.read().await;
            if let Some(pool) = pools.get(connection_url) {
                tracing::debug!("Using existing PostgreSQL pool for: {}", mask_credentials(connection_url));
                return Ok(pool.clone());
            }
        }

        let mut pools = self.pg_pools.write().await;

        // Another task may have created the pool while we waited for the write lock
        if let Some(pool) = pools.get(connection_url) {
            return Ok(pool.clone());
        }

        tracing::info!(
            "Creating PostgreSQL pool for: {} (max_size: {})",
            mask_credentials(connection_url),
            self.max_pool_size
        );

        let mut cfg = PoolConfig::new();
        cfg.url = Some(connection_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .map_err(|e| {
                tracing::error!("Failed to create PostgreSQL pool: {}", e);
                AppError::Connection(format!("Failed to create connection pool: {}", e))
            })?;
        pool.resize(self.max_pool_size);

        pools.insert(connection_url.to_string(), pool.clone());
        Ok(pool)
    }

    /// Get or create a MySQL pool; `mysql2://` URLs are accepted as `mysql://`
    pub async fn get_or_create_mysql_pool(&self, connection_url: &str) -> Result<mysql_async::Pool, AppError> {
        {
            let pools = self.mysql_pools.read().await;
            if let Some(pool) = pools.get(connection_url) {
                tracing::debug!("Using existing MySQL pool for: {}", mask_credentials(connection_url));
                return Ok(pool.clone());
            }
        }

        let mut pools = self.mysql_pools.write().await;
        if let Some(pool) = pools.get(connection_url) {
            return Ok(pool.clone());
        }

        tracing::info!(
            "Creating MySQL pool for: {} (max_size: {})",
            mask_credentials(connection_url),
            MYSQL_MAX_CONNECTIONS
        );

        let normalized = normalize_mysql_url(connection_url);
        let opts = Opts::from_url(&normalized)
            .map_err(|e| AppError::Connection(format!("Invalid MySQL URL: {}", e)))?;
        let constraints = PoolConstraints::new(0, MYSQL_MAX_CONNECTIONS)
            .ok_or_else(|| AppError::Internal("Invalid MySQL pool constraints".to_string()))?;
        let opts = OptsBuilder::from_opts(opts).pool_opts(PoolOpts::default().with_constraints(constraints));
        let pool = mysql_async::Pool::new(opts);

        pools.insert(connection_url.to_string(), pool.clone());
        Ok(pool)
    }

    /// Drop the pools for a connection string once a pod stops using it
    pub async fn remove_pool(&self, connection_url: &str) -> bool {
        let removed_pg = self.pg_pools.write().await.remove(connection_url).is_some();
        let removed_mysql = match self.mysql_pools.write().await.remove(connection_url) {
            Some(pool) => {
                if let Err(e) = pool.disconnect().await {
                    tracing::warn!("Error while disconnecting MySQL pool: {}", e);
                }
                true
            }
            None => false,
        };

        let removed = removed_pg || removed_mysql;
        if removed {
            tracing::info!("Removed connection pool for: {}", mask_credentials(connection_url));
        }
        removed
    }

    #[cfg(test)]
    pub(crate) async fn pool_count(&self) -> usize {
        self.pg_pools.read().await.len() + self.mysql_pools.read().await.len()
    }
}

impl Default for ConnectionPoolManager {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn normalize_mysql_url(connection_url: &str) -> String {
    match connection_url.strip_prefix("mysql2://") {
        Some(rest) => format!("mysql://{}", rest),
        None => connection_url.to_string(),
    }
}

/// Mask the password in a connection URL for logging
pub fn mask_credentials(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let mut masked = parsed.clone();
            if parsed.password().is_some() {
                let _ = masked.set_password(Some("***"));
            }
            masked.to_string()
        }
        Err(_) => "[invalid-url]".to_string(),
    }
}
