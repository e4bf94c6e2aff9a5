// MySQL connector using pooled connections
use crate::api::middleware::AppError;
use crate::models::QueryResult;
use crate::services::connectors::adapter::ConnectorAdapter;
use crate::services::sql_builder::SqlDialect;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Pool, Row, Value as MySqlValue};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use url::Url;

pub struct MySqlAdapter {
    pool: Pool,
}

impl MySqlAdapter {
    pub fn new(pool: Pool, connection_url: &str) -> Result<Self, AppError> {
        let url = Url::parse(connection_url)
            .map_err(|e| AppError::Validation(format!("Invalid MySQL URL: {}", e)))?;

        if url.scheme() != "mysql" && url.scheme() != "mysql2" {
            return Err(AppError::Validation("URL must use mysql:// or mysql2:// scheme".to_string()));
        }

        Ok(Self { pool })
    }

    async fn get_conn(&self) -> Result<Conn, AppError> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get MySQL connection from pool: {}", e)))
    }
}

#[async_trait::async_trait]
impl ConnectorAdapter for MySqlAdapter {
    async fn execute_query(&self, sql: &str, timeout_secs: u64) -> Result<QueryResult, AppError> {
        let mut conn = self.get_conn().await?;
        let start_time = Instant::now();

        let run = async {
            let mut result = conn.query_iter(sql).await?;
            let columns: Vec<(String, ColumnType)> = result
                .columns()
                .map(|cols| {
                    cols.iter()
                        .map(|c| (c.name_str().into_owned(), c.column_type()))
                        .collect()
                })
                .unwrap_or_default();
            let rows: Vec<Row> = result.collect().await?;
            Ok::<_, mysql_async::Error>((columns, rows))
        };

        let (columns, rows) = tokio::time::timeout(Duration::from_secs(timeout_secs), run)
            .await
            .map_err(|_| AppError::Database(format!("Query timeout after {} seconds", timeout_secs)))?
            .map_err(|e| AppError::Database(format!("Query execution failed: {}", e)))?;

        let json_rows = rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                for (idx, (name, column_type)) in columns.iter().enumerate() {
                    let value = row
                        .as_ref(idx)
                        .map(|v| mysql_value_to_json(v, *column_type))
                        .unwrap_or(Value::Null);
                    obj.insert(name.clone(), value);
                }
                obj
            })
            .collect();

        let names = columns.into_iter().map(|(name, _)| name).collect();
        Ok(QueryResult::new(names, json_rows, start_time.elapsed().as_millis() as u64))
    }

    fn kind(&self) -> &str {
        "mysql"
    }

    fn dialect(&self) -> Option<SqlDialect> {
        Some(SqlDialect::MySql)
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        let mut conn = self.get_conn().await?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| AppError::Connection(format!("Connection test failed: {}", e)))
    }
}

fn is_integer_type(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR
    )
}

fn is_decimal_type(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_FLOAT
            | ColumnType::MYSQL_TYPE_DOUBLE
            | ColumnType::MYSQL_TYPE_DECIMAL
            | ColumnType::MYSQL_TYPE_NEWDECIMAL
    )
}

/// The text protocol sends numbers as bytes, so the column type decides how
/// they are read back
fn mysql_value_to_json(value: &MySqlValue, column_type: ColumnType) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if is_integer_type(column_type) {
                if let Ok(i) = text.parse::<i64>() {
                    return json!(i);
                }
                if let Ok(u) = text.parse::<u64>() {
                    return json!(u);
                }
            }
            if is_decimal_type(column_type) {
                if let Ok(f) = text.parse::<f64>() {
                    if f.is_finite() {
                        return json!(f);
                    }
                }
            }
            if column_type == ColumnType::MYSQL_TYPE_JSON {
                if let Ok(v) = serde_json::from_str::<Value>(&text) {
                    return v;
                }
            }
            json!(text)
        }
        MySqlValue::Int(i) => json!(i),
        MySqlValue::UInt(u) => json!(u),
        MySqlValue::Float(f) => json!(f),
        MySqlValue::Double(d) => json!(d),
        MySqlValue::Date(y, m, d, h, min, s, _) => {
            json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
        }
        MySqlValue::Time(is_neg, d, h, m, s, _) => {
            let sign = if *is_neg { "-" } else { "" };
            let total_hours = d * 24 + *h as u32;
            json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
        }
    }
}
