pub mod chat_service;
pub mod connection_pool;
pub mod connectors; // Postgres, MySQL and Firestore adapters
pub mod dashboard_service;
pub mod llm_provider;
pub mod llm_service;
pub mod query_service;
pub mod sql_builder; // Metric query -> SQL compiler
pub mod usage_service;

pub use chat_service::*;
pub use connection_pool::*;
pub use dashboard_service::*;
pub use llm_service::*;
pub use query_service::*;
pub use usage_service::*;
