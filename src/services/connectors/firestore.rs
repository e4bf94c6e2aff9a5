// Firestore connector: a small SQL subset translated to a REST structuredQuery
use crate::api::middleware::AppError;
use crate::models::QueryResult;
use crate::services::connectors::adapter::ConnectorAdapter;
use crate::services::sql_builder::SqlDialect;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};

const UNSUPPORTED_QUERY: &str = "Only basic SELECT queries are supported for Firebase.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    fn as_firestore(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        }
    }
}

/// Equality filter; Firestore SQL only supports `field = value`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FirestoreQuery {
    pub collection: String,
    /// `None` selects whole documents
    pub fields: Option<Vec<String>>,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<u64>,
}

/// Regex translator for `SELECT … FROM <collection> [WHERE … ] [ORDER BY …] [LIMIT n]`
pub struct FirestoreSqlParser {
    select: Regex,
    where_clause: Regex,
    condition: Regex,
    and_split: Regex,
    order_by: Regex,
    limit: Regex,
}

impl FirestoreSqlParser {
    pub fn new() -> Result<Self, AppError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AppError::Internal(format!("Invalid Firestore pattern: {}", e)))
        };
        Ok(Self {
            select: compile(r"(?i)select\s+(.+?)\s+from\s+([a-zA-Z0-9_\-]+)")?,
            where_clause: compile(r"(?i)where\s+(.+?)(order\s+by|limit|$)")?,
            condition: compile(r"([a-zA-Z0-9_.\-]+)\s*=\s*([^\n\r]+)")?,
            and_split: compile(r"(?i)\s+and\s+")?,
            order_by: compile(r"(?i)order\s+by\s+([a-zA-Z0-9_.\-]+)(\s+desc|\s+asc)?")?,
            limit: compile(r"(?i)limit\s+(\d+)")?,
        })
    }

    pub fn parse(&self, sql: &str) -> Result<FirestoreQuery, AppError> {
        let sql = sql.trim().trim_end_matches(';');

        let select = self
            .select
            .captures(sql)
            .ok_or_else(|| AppError::InvalidSql(UNSUPPORTED_QUERY.to_string()))?;

        let fields_raw = select[1].trim();
        let collection = select[2].trim().to_string();
        let fields = if fields_raw == "*" {
            None
        } else {
            Some(fields_raw.split(',').map(|f| f.trim().to_string()).collect())
        };

        let mut filters = Vec::new();
        if let Some(where_match) = self.where_clause.captures(sql) {
            for condition in self.and_split.split(&where_match[1]) {
                if let Some(m) = self.condition.captures(condition) {
                    filters.push(FieldFilter {
                        field: m[1].trim().to_string(),
                        value: parse_value(&m[2]),
                    });
                }
            }
        }

        let order_by = self.order_by.captures(sql).map(|m| {
            let direction = match m.get(2).map(|d| d.as_str().trim().to_lowercase()) {
                Some(d) if d == "desc" => Direction::Descending,
                _ => Direction::Ascending,
            };
            (m[1].trim().to_string(), direction)
        });

        let limit = self.limit.captures(sql).and_then(|m| m[1].parse::<u64>().ok());

        Ok(FirestoreQuery {
            collection,
            fields,
            filters,
            order_by,
            limit,
        })
    }
}

/// Quoted string, boolean, number, or the bare text
fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        return json!(&trimmed[1..trimmed.len() - 1]);
    }
    match trimmed {
        "true" => return json!(true),
        "false" => return json!(false),
        _ => {}
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return json!(f);
        }
    }
    json!(trimmed)
}

fn field_ref(path: &str) -> Value {
    json!({ "fieldPath": path })
}

/// Encode a JSON scalar as a Firestore typed value
fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        other => json!({ "stringValue": other.to_string() }),
    }
}

impl FirestoreQuery {
    /// Body for the `documents:runQuery` endpoint
    pub fn to_structured_query(&self) -> Value {
        let mut query = Map::new();
        query.insert("from".to_string(), json!([{ "collectionId": self.collection }]));

        if let Some(fields) = &self.fields {
            let projection: Vec<Value> = fields.iter().map(|f| field_ref(f)).collect();
            query.insert("select".to_string(), json!({ "fields": projection }));
        }

        let mut filters: Vec<Value> = self
            .filters
            .iter()
            .map(|f| {
                json!({
                    "fieldFilter": {
                        "field": field_ref(&f.field),
                        "op": "EQUAL",
                        "value": encode_value(&f.value),
                    }
                })
            })
            .collect();
        if filters.len() == 1 {
            query.insert("where".to_string(), filters.remove(0));
        } else if filters.len() > 1 {
            query.insert(
                "where".to_string(),
                json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
            );
        }

        if let Some((field, direction)) = &self.order_by {
            query.insert(
                "orderBy".to_string(),
                json!([{ "field": field_ref(field), "direction": direction.as_firestore() }]),
            );
        }

        // LIMIT 0 means no limit
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            query.insert("limit".to_string(), json!(limit));
        }

        json!({ "structuredQuery": Value::Object(query) })
    }
}

/// Decode a Firestore typed value into plain JSON
pub fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };

    if let Some(v) = obj.get("stringValue") {
        return v.clone();
    }
    if let Some(v) = obj.get("booleanValue") {
        return v.clone();
    }
    if let Some(v) = obj.get("integerValue") {
        // Integers arrive as decimal strings
        return match v.as_str().and_then(|s| s.parse::<i64>().ok()) {
            Some(i) => json!(i),
            None => v.clone(),
        };
    }
    if let Some(v) = obj.get("doubleValue") {
        return v.clone();
    }
    if let Some(v) = obj
        .get("timestampValue")
        .or_else(|| obj.get("referenceValue"))
        .or_else(|| obj.get("bytesValue"))
    {
        return v.clone();
    }
    if let Some(v) = obj.get("geoPointValue") {
        return json!({
            "latitude": v.get("latitude").cloned().unwrap_or(Value::Null),
            "longitude": v.get("longitude").cloned().unwrap_or(Value::Null),
        });
    }
    if let Some(v) = obj.get("arrayValue") {
        let values = v
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    if let Some(v) = obj.get("mapValue") {
        return Value::Object(decode_fields(v.get("fields")));
    }
    Value::Null
}

fn decode_fields(fields: Option<&Value>) -> Map<String, Value> {
    fields
        .and_then(Value::as_object)
        .map(|f| f.iter().map(|(k, v)| (k.clone(), decode_value(v))).collect())
        .unwrap_or_default()
}

/// Shape runQuery response entries into result rows and columns
pub fn rows_from_response(query: &FirestoreQuery, entries: &[Value]) -> (Vec<String>, Vec<Map<String, Value>>) {
    let documents = entries.iter().filter_map(|entry| entry.get("document"));

    let rows: Vec<Map<String, Value>> = documents
        .map(|doc| {
            let data = decode_fields(doc.get("fields"));
            match &query.fields {
                Some(fields) => fields
                    .iter()
                    .map(|f| (f.clone(), data.get(f).cloned().unwrap_or(Value::Null)))
                    .collect(),
                None => {
                    let id = doc
                        .get("name")
                        .and_then(Value::as_str)
                        .and_then(|name| name.rsplit('/').next())
                        .unwrap_or_default();
                    let mut row = Map::new();
                    row.insert("id".to_string(), json!(id));
                    row.extend(data);
                    row
                }
            }
        })
        .collect();

    let columns = match &query.fields {
        Some(fields) => fields.clone(),
        None => match rows.first() {
            Some(row) => std::iter::once("id".to_string())
                .chain(row.keys().filter(|k| k.as_str() != "id").cloned())
                .collect(),
            None => Vec::new(),
        },
    };

    (columns, rows)
}

pub struct FirestoreAdapter {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    access_token: String,
    parser: FirestoreSqlParser,
}

impl FirestoreAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        project_id: &str,
        access_token: &str,
    ) -> Result<Self, AppError> {
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            access_token: access_token.to_string(),
            parser: FirestoreSqlParser::new()?,
        })
    }

    fn documents_url(&self, action: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents:{}",
            self.base_url, self.project_id, action
        )
    }

    async fn post(&self, action: &str, body: &Value, timeout_secs: u64) -> Result<Value, AppError> {
        let response = self
            .client
            .post(self.documents_url(action))
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(timeout_secs))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Database(format!("Query timeout after {} seconds", timeout_secs))
                } else {
                    AppError::Connection(format!("Firestore request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            let message = error_message(status, body.as_deref());
            tracing::warn!("Firestore {} failed: {}", action, message);
            return Err(AppError::Database(message));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::Database(format!("Invalid Firestore response: {}", e)))
    }
}

/// The REST error message when the body carries one, else the status text
fn error_message(status: reqwest::StatusCode, body: Option<&str>) -> String {
    let body = body.map(str::trim).filter(|b| !b.is_empty());
    let detail = body
        .and_then(|b| serde_json::from_str::<Value>(b).ok())
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .or_else(|| body.map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    format!("Firestore error ({}): {}", status.as_u16(), detail)
}

#[async_trait::async_trait]
impl ConnectorAdapter for FirestoreAdapter {
    async fn execute_query(&self, sql: &str, timeout_secs: u64) -> Result<QueryResult, AppError> {
        let query = self.parser.parse(sql)?;
        tracing::debug!("Firestore query on collection '{}'", query.collection);

        let start_time = Instant::now();
        let response = self.post("runQuery", &query.to_structured_query(), timeout_secs).await?;
        let entries = response.as_array().map(Vec::as_slice).unwrap_or_default();
        let (columns, rows) = rows_from_response(&query, entries);

        Ok(QueryResult::new(columns, rows, start_time.elapsed().as_millis() as u64))
    }

    fn kind(&self) -> &str {
        "firestore"
    }

    fn dialect(&self) -> Option<SqlDialect> {
        None
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        self.post("listCollectionIds", &json!({}), 15).await.map(|_| ())
    }
}
