use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub query: QueryConfig,
    pub firestore: FirestoreConfig,
    pub billing: BillingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub timeout_secs: u64,
    pub max_rows: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreConfig {
    pub base_url: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub free_token_limit: u64,
    pub individual_token_limit: u64,
    pub business_token_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file before reading the environment
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./pods.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8787)?
            .set_default("llm.openai_model", "gpt-5")?
            .set_default("llm.openai_base_url", "https://api.openai.com/v1")?
            .set_default("llm.gemini_model", "gemini-2.5-flash")?
            .set_default("llm.gemini_base_url", "https://generativelanguage.googleapis.com/v1beta")?
            .set_default("llm.request_timeout_secs", 60)?
            .set_default("query.timeout_secs", 30)?
            .set_default("query.max_rows", 1000)?
            .set_default("firestore.base_url", "https://firestore.googleapis.com/v1")?
            .set_default("billing.free_token_limit", 20_000)?
            .set_default("billing.individual_token_limit", 200_000)?
            .set_default("billing.business_token_limit", 1_000_000)?
            .set_default("logging.level", "info")?;

        let overrides = [
            ("DATABASE_URL", "database.url"),
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("OPENAI_API_KEY", "llm.openai_api_key"),
            ("OPENAI_MODEL", "llm.openai_model"),
            ("OPENAI_BASE_URL", "llm.openai_base_url"),
            ("GEMINI_API_KEY", "llm.gemini_api_key"),
            ("GEMINI_MODEL", "llm.gemini_model"),
            ("GEMINI_BASE_URL", "llm.gemini_base_url"),
            ("LLM_TIMEOUT_SECS", "llm.request_timeout_secs"),
            ("QUERY_TIMEOUT_SECS", "query.timeout_secs"),
            ("QUERY_MAX_ROWS", "query.max_rows"),
            ("FIRESTORE_BASE_URL", "firestore.base_url"),
            ("FIRESTORE_ACCESS_TOKEN", "firestore.access_token"),
            ("FREE_TOKEN_LIMIT", "billing.free_token_limit"),
            ("INDIVIDUAL_TOKEN_LIMIT", "billing.individual_token_limit"),
            ("BUSINESS_TOKEN_LIMIT", "billing.business_token_limit"),
            ("RUST_LOG", "logging.level"),
        ];

        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                if !value.trim().is_empty() {
                    builder = builder.set_override(key, value)?;
                }
            }
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
impl Config {
    /// Configuration with no provider keys and an unreachable Firestore endpoint
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: database_url.to_string(),
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            llm: LlmConfig {
                openai_api_key: None,
                openai_model: "gpt-5".to_string(),
                openai_base_url: "http://127.0.0.1:9".to_string(),
                gemini_api_key: None,
                gemini_model: "gemini-2.5-flash".to_string(),
                gemini_base_url: "http://127.0.0.1:9".to_string(),
                request_timeout_secs: 5,
            },
            query: QueryConfig {
                timeout_secs: 5,
                max_rows: 1000,
            },
            firestore: FirestoreConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                access_token: None,
            },
            billing: BillingConfig {
                free_token_limit: 20_000,
                individual_token_limit: 200_000,
                business_token_limit: 1_000_000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert!(config.query.max_rows > 0);
        assert!(!config.llm.openai_model.is_empty());
        assert!(config.firestore.base_url.starts_with("http"));
    }

    #[test]
    fn test_server_address() {
        let mut config = Config::for_tests("./unused.db");
        config.server.host = "0.0.0.0".to_string();
        config.server.port = 8787;
        assert_eq!(config.server_address(), "0.0.0.0:8787");
    }
}
