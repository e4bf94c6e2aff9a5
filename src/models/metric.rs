use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Aggregation::Count => "COUNT",
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "between")]
    Between,
}

impl FilterOp {
    /// SQL operator for the plain comparison variants
    pub fn comparison(&self) -> Option<&'static str> {
        match self {
            FilterOp::Eq => Some("="),
            FilterOp::NotEq => Some("!="),
            FilterOp::Gt => Some(">"),
            FilterOp::Lt => Some("<"),
            FilterOp::GtEq => Some(">="),
            FilterOp::LtEq => Some("<="),
            FilterOp::Contains | FilterOp::In | FilterOp::Between => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricFilter {
    pub column: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricJoin {
    pub table: String,
    pub on_left: String,
    pub on_right: String,
    #[serde(default, rename = "type")]
    pub join_type: JoinType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

/// Declarative description of a chart/widget metric
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricQuery {
    pub table: String,
    #[serde(default)]
    pub metric_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_column2: Option<String>,
    pub aggregation: Aggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation2: Option<Aggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_grain: Option<TimeGrain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_direction: Option<OrderDirection>,
    #[serde(default)]
    pub joins: Vec<MetricJoin>,
    #[serde(default)]
    pub filters: Vec<MetricFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl MetricQuery {
    /// A bare `AGG(column) FROM table` metric with no grouping, joins or filters
    pub fn new(table: impl Into<String>, aggregation: Aggregation, metric_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            metric_column: metric_column.into(),
            metric_column2: None,
            aggregation,
            aggregation2: None,
            group_by: None,
            time_grain: None,
            order_by: None,
            order_direction: None,
            joins: Vec::new(),
            filters: Vec::new(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    #[default]
    Bar,
    Pie,
}

impl ChartType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "line" => Some(ChartType::Line),
            "bar" => Some(ChartType::Bar),
            "pie" => Some(ChartType::Pie),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardWidget {
    #[serde(default = "new_id")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub chart_type: ChartType,
    pub query: MetricQuery,
    #[serde(default)]
    pub show_in_chat: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub id: String,
    pub pod_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub widgets: Vec<DashboardWidget>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dashboard {
    pub fn new(pod_id: String, name: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            pod_id,
            name,
            description,
            widgets: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateDashboardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDashboardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub widgets: Option<Vec<DashboardWidget>>,
}

#[derive(Debug, Deserialize)]
pub struct RunWidgetRequest {
    pub widget: DashboardWidget,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_query_deserializes_client_shape() {
        let json = serde_json::json!({
            "table": "orders",
            "metricColumn": "total",
            "aggregation": "sum",
            "groupBy": "created_at",
            "timeGrain": "month",
            "orderDirection": "asc",
            "joins": [{ "table": "customers", "onLeft": "orders.customer_id", "onRight": "customers.id", "type": "left" }],
            "filters": [{ "column": "status", "op": "!=", "value": "void" }],
            "limit": 12
        });

        let query: MetricQuery = serde_json::from_value(json).unwrap();
        assert_eq!(query.aggregation, Aggregation::Sum);
        assert_eq!(query.time_grain, Some(TimeGrain::Month));
        assert_eq!(query.order_direction, Some(OrderDirection::Asc));
        assert_eq!(query.joins[0].join_type, JoinType::Left);
        assert_eq!(query.filters[0].op, FilterOp::NotEq);
        assert_eq!(query.limit, Some(12));
    }

    #[test]
    fn test_join_type_defaults_to_inner() {
        let join: MetricJoin = serde_json::from_value(serde_json::json!({
            "table": "t", "onLeft": "a.id", "onRight": "t.id"
        }))
        .unwrap();
        assert_eq!(join.join_type, JoinType::Inner);
    }

    #[test]
    fn test_chart_type_parse() {
        assert_eq!(ChartType::parse("Line"), Some(ChartType::Line));
        assert_eq!(ChartType::parse(" pie "), Some(ChartType::Pie));
        assert_eq!(ChartType::parse("scatter"), None);
    }
}
