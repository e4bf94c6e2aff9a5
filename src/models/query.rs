use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Query output normalized across connectors: ordered column names plus one
/// JSON object per row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Map<String, Value>>, execution_time_ms: u64) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows: rows.into_iter().map(Value::Object).collect(),
            row_count,
            execution_time_ms,
        }
    }
}

/// Widget result returned by the chat trends endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetTrend {
    pub widget_id: String,
    pub title: String,
    pub chart_type: super::metric::ChartType,
    pub data: QueryResult,
}
