// PostgreSQL connector using pooled connections
use crate::api::middleware::AppError;
use crate::models::QueryResult;
use crate::services::connectors::adapter::ConnectorAdapter;
use crate::services::sql_builder::SqlDialect;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::Pool;
use serde_json::{json, Map, Value};
use std::error::Error;
use std::time::{Duration, Instant};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row;
use url::Url;

pub struct PostgresAdapter {
    pool: Pool,
}

impl PostgresAdapter {
    pub fn new(pool: Pool, connection_url: &str) -> Result<Self, AppError> {
        let url = Url::parse(connection_url)
            .map_err(|e| AppError::Validation(format!("Invalid PostgreSQL URL: {}", e)))?;

        if url.scheme() != "postgresql" && url.scheme() != "postgres" {
            return Err(AppError::Validation("URL must use postgresql:// or postgres:// scheme".to_string()));
        }

        Ok(Self { pool })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, AppError> {
        self.pool
            .get()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get connection from pool: {}", e)))
    }
}

fn describe_pg_error(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db_error) => format!("Code: {}, Message: {}", db_error.code().code(), db_error.message()),
        None => e.to_string(),
    }
}

#[async_trait::async_trait]
impl ConnectorAdapter for PostgresAdapter {
    async fn execute_query(&self, sql: &str, timeout_secs: u64) -> Result<QueryResult, AppError> {
        let client = self.client().await?;
        let start_time = Instant::now();

        let run = async {
            // Preparing first gives us column names even when no rows come back
            let statement = client.prepare(sql).await?;
            let rows = client.query(&statement, &[]).await?;
            Ok::<_, tokio_postgres::Error>((statement, rows))
        };

        let (statement, rows) = tokio::time::timeout(Duration::from_secs(timeout_secs), run)
            .await
            .map_err(|_| AppError::Database(format!("Query timeout after {} seconds", timeout_secs)))?
            .map_err(|e| AppError::Database(format!("Query execution failed: {}", describe_pg_error(&e))))?;

        let columns: Vec<String> = statement.columns().iter().map(|c| c.name().to_string()).collect();
        let json_rows = rows.iter().map(row_to_json).collect();

        Ok(QueryResult::new(columns, json_rows, start_time.elapsed().as_millis() as u64))
    }

    fn kind(&self) -> &str {
        "postgres"
    }

    fn dialect(&self) -> Option<SqlDialect> {
        Some(SqlDialect::Postgres)
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| AppError::Connection(format!("Connection test failed: {}", describe_pg_error(&e))))?;
        Ok(())
    }
}

fn row_to_json(row: &Row) -> Map<String, Value> {
    let mut obj = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        obj.insert(column.name().to_string(), column_to_json(row, idx, column.type_()));
    }
    obj
}

fn get_json<'a, T, F>(row: &'a Row, idx: usize, convert: F) -> Option<Value>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => Some(convert(v)),
        Ok(None) => Some(Value::Null),
        Err(_) => None,
    }
}

fn column_to_json(row: &Row, idx: usize, ty: &Type) -> Value {
    let converted = match *ty {
        Type::INT2 => get_json::<i16, _>(row, idx, |v| json!(v)),
        Type::INT4 => get_json::<i32, _>(row, idx, |v| json!(v)),
        Type::INT8 => get_json::<i64, _>(row, idx, |v| json!(v)),
        Type::FLOAT4 => get_json::<f32, _>(row, idx, |v| json!(v)),
        Type::FLOAT8 => get_json::<f64, _>(row, idx, |v| json!(v)),
        Type::BOOL => get_json::<bool, _>(row, idx, Value::Bool),
        Type::NUMERIC => get_json::<PgNumeric, _>(row, idx, |v| v.into_json()),
        Type::DATE => get_json::<NaiveDate, _>(row, idx, |v| json!(v.to_string())),
        Type::TIME => get_json::<NaiveTime, _>(row, idx, |v| json!(v.to_string())),
        Type::TIMESTAMP => get_json::<NaiveDateTime, _>(row, idx, |v| json!(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get_json::<DateTime<Utc>, _>(row, idx, |v| json!(v.to_rfc3339())),
        Type::JSON | Type::JSONB => get_json::<Value, _>(row, idx, |v| v),
        Type::UUID => get_json::<uuid::Uuid, _>(row, idx, |v| json!(v.to_string())),
        _ => get_json::<String, _>(row, idx, Value::String),
    };

    converted.unwrap_or_else(|| json!(format!("<{}>", ty.name())))
}

/// Decimal text decoded from the binary NUMERIC wire format
#[derive(Debug, PartialEq)]
struct PgNumeric(String);

impl PgNumeric {
    /// Charts want numbers; fall back to the exact text when f64 cannot hold it
    fn into_json(self) -> Value {
        match self.0.parse::<f64>() {
            Ok(v) if v.is_finite() => json!(v),
            _ => Value::String(self.0),
        }
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    if raw.len() < 8 {
        return Err("invalid NUMERIC header".into());
    }
    let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);

    let ndigits = word(0) as usize;
    let weight = word(2) as i16 as i32;
    let sign = word(4);
    let dscale = word(6) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("truncated NUMERIC value".into());
    }

    // Base-10000 digit groups; group k carries exponent (weight - k)
    let digits: Vec<u16> = (0..ndigits).map(|k| word(8 + k * 2)).collect();
    let group = |k: i32| -> u16 {
        if k < 0 {
            0
        } else {
            digits.get(k as usize).copied().unwrap_or(0)
        }
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group(0).to_string());
        for k in 1..=weight {
            text.push_str(&format!("{:04}", group(k)));
        }
    }

    if dscale > 0 {
        let mut frac = String::new();
        let mut k = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", group(k)));
            k += 1;
        }
        frac.truncate(dscale);
        text.push('.');
        text.push_str(&frac);
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_numeric_values() {
        assert_eq!(decode_numeric(&numeric_bytes(0, 0, 2, &[123, 4500])).unwrap(), "123.45");
        assert_eq!(decode_numeric(&numeric_bytes(1, 0, 0, &[1, 2345])).unwrap(), "12345");
        assert_eq!(decode_numeric(&numeric_bytes(-1, NUMERIC_NEG, 4, &[5])).unwrap(), "-0.0005");
        assert_eq!(decode_numeric(&numeric_bytes(-2, 0, 8, &[1])).unwrap(), "0.00000001");
        assert_eq!(decode_numeric(&numeric_bytes(1, 0, 0, &[2])).unwrap(), "20000");
        assert_eq!(decode_numeric(&numeric_bytes(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(decode_numeric(&numeric_bytes(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
    }

    #[test]
    fn test_decode_numeric_rejects_truncated_input() {
        assert!(decode_numeric(&[0, 1]).is_err());
        let mut raw = numeric_bytes(0, 0, 0, &[7]);
        raw.truncate(9);
        assert!(decode_numeric(&raw).is_err());
    }

    #[test]
    fn test_numeric_json_prefers_numbers() {
        assert_eq!(PgNumeric("12.5".to_string()).into_json(), json!(12.5));
        assert_eq!(PgNumeric("NaN".to_string()).into_json(), json!("NaN"));
    }

    #[tokio::test]
    async fn test_rejects_non_postgres_scheme() {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some("postgres://u:p@127.0.0.1:1/db".to_string());
        let pool = cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
            .unwrap();

        assert!(PostgresAdapter::new(pool.clone(), "mysql://u:p@127.0.0.1/db").is_err());
        let adapter = PostgresAdapter::new(pool, "postgresql://u:p@127.0.0.1:1/db").unwrap();
        assert_eq!(adapter.kind(), "postgres");
        assert_eq!(adapter.dialect(), Some(SqlDialect::Postgres));
    }
}
