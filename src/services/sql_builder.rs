// Metric query compiler: turns a dashboard widget description into SQL for the
// active data source's dialect.
use crate::api::middleware::AppError;
use crate::models::{
    Aggregation, DataSourceKind, DataSources, FilterOp, MetricFilter, MetricJoin, MetricQuery,
    OrderDirection, TimeGrain,
};

/// Row cap applied when a metric does not ask for one
pub const DEFAULT_METRIC_LIMIT: i64 = 100;

/// Order keys produced by the builder itself; these bypass sanitization
const RESERVED_ORDER_KEYS: [&str; 3] = ["bucket", "value", "value2"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Generic,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::MySql => "mysql",
            SqlDialect::Generic => "generic",
        }
    }

    /// Dialect implied by a connection string scheme
    pub fn from_connection_string(connection_string: &str) -> Self {
        let cs = connection_string.trim();
        if cs.starts_with("mysql://") || cs.starts_with("mysql2://") {
            SqlDialect::MySql
        } else if cs.starts_with("postgres://") || cs.starts_with("postgresql://") {
            SqlDialect::Postgres
        } else {
            SqlDialect::Generic
        }
    }
}

/// Strip everything but ASCII alphanumerics, `_` and `.`
pub fn sanitize_identifier(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect()
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn detect_dialect(kind: DataSourceKind, sources: &DataSources) -> SqlDialect {
    match kind {
        DataSourceKind::Postgres => SqlDialect::Postgres,
        DataSourceKind::MySql => SqlDialect::MySql,
        DataSourceKind::LocalSql => SqlDialect::from_connection_string(&sources.local_sql.connection_string),
        DataSourceKind::Firebase => SqlDialect::Generic,
    }
}

fn build_filter(filter: &MetricFilter, dialect: SqlDialect) -> String {
    let column = sanitize_identifier(&filter.column);
    let value = filter.value.replace('\'', "''");

    match filter.op {
        FilterOp::Contains => {
            let comparator = if dialect == SqlDialect::Postgres { "ILIKE" } else { "LIKE" };
            format!("{} {} '%{}%'", column, comparator, value)
        }
        FilterOp::In => {
            let items: Vec<String> = match &filter.values {
                Some(values) => values.clone(),
                None => filter
                    .value
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect(),
            };
            if items.is_empty() {
                return "1=1".to_string();
            }
            let quoted: Vec<String> = items.iter().map(|item| quote_literal(item)).collect();
            format!("{} IN ({})", column, quoted.join(", "))
        }
        FilterOp::Between => {
            let to = filter.value_to.as_deref().unwrap_or_default();
            if value.is_empty() || to.is_empty() {
                return "1=1".to_string();
            }
            format!("{} BETWEEN '{}' AND {}", column, value, quote_literal(to))
        }
        op => {
            // comparison() is Some for every remaining variant
            let operator = op.comparison().unwrap_or("=");
            format!("{} {} '{}'", column, operator, value)
        }
    }
}

fn build_where(filters: &[MetricFilter], dialect: SqlDialect) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    let clauses: Vec<String> = filters.iter().map(|f| build_filter(f, dialect)).collect();
    Some(format!("WHERE {}", clauses.join(" AND ")))
}

fn build_joins(joins: &[MetricJoin]) -> Option<String> {
    if joins.is_empty() {
        return None;
    }
    let clauses: Vec<String> = joins
        .iter()
        .map(|join| {
            format!(
                "{} {} ON {} = {}",
                join.join_type.as_sql(),
                sanitize_identifier(&join.table),
                sanitize_identifier(&join.on_left),
                sanitize_identifier(&join.on_right),
            )
        })
        .collect();
    Some(clauses.join(" "))
}

fn build_date_bucket(column: &str, grain: Option<TimeGrain>, dialect: SqlDialect) -> String {
    let Some(grain) = grain else {
        return column.to_string();
    };
    match dialect {
        SqlDialect::MySql => match grain {
            TimeGrain::Day => format!("DATE({})", column),
            TimeGrain::Week => format!("YEARWEEK({}, 1)", column),
            TimeGrain::Month => format!("DATE_FORMAT({}, '%Y-%m-01')", column),
            TimeGrain::Quarter => format!("CONCAT(YEAR({c}), '-Q', QUARTER({c}))", c = column),
            TimeGrain::Year => format!("YEAR({})", column),
        },
        SqlDialect::Postgres | SqlDialect::Generic => {
            format!("date_trunc('{}', {})", grain.as_str(), column)
        }
    }
}

fn resolve_order_by(order_by: Option<&str>, fallback: &str) -> String {
    match order_by {
        None => fallback.to_string(),
        Some(key) if RESERVED_ORDER_KEYS.contains(&key) => key.to_string(),
        Some(key) => {
            let sanitized = sanitize_identifier(key);
            if sanitized.is_empty() {
                fallback.to_string()
            } else {
                sanitized
            }
        }
    }
}

fn aggregate_expression(aggregation: Aggregation, column: &str) -> Result<String, AppError> {
    match aggregation {
        Aggregation::Count if column.is_empty() => Ok("COUNT(*)".to_string()),
        _ if column.is_empty() => Err(AppError::Validation(format!(
            "A metric column is required for {} aggregation",
            aggregation.as_sql()
        ))),
        _ => Ok(format!("{}({})", aggregation.as_sql(), column)),
    }
}

/// Compile a metric description into a single SELECT statement.
///
/// Grouped metrics select `bucket` plus `value` (and `value2`); ungrouped ones
/// select only the values. Every identifier goes through
/// [`sanitize_identifier`] and every literal is single-quoted with embedded
/// quotes doubled.
pub fn build_sql_from_metric(query: &MetricQuery, dialect: SqlDialect) -> Result<String, AppError> {
    let table = sanitize_identifier(&query.table);
    if table.is_empty() {
        return Err(AppError::Validation("Metric table name is required".to_string()));
    }

    let value_expr = aggregate_expression(query.aggregation, &sanitize_identifier(&query.metric_column))?;
    let mut select_metrics = format!("{} AS value", value_expr);

    let column2 = query.metric_column2.as_deref().map(sanitize_identifier).unwrap_or_default();
    if let (false, Some(aggregation2)) = (column2.is_empty(), query.aggregation2) {
        let value2_expr = aggregate_expression(aggregation2, &column2)?;
        select_metrics.push_str(&format!(", {} AS value2", value2_expr));
    }

    let direction = match query.order_direction {
        Some(OrderDirection::Asc) => "ASC",
        _ => "DESC",
    };
    let limit = match query.limit {
        Some(n) if n != 0 => n.max(1),
        _ => DEFAULT_METRIC_LIMIT,
    };

    let group_by = query.group_by.as_deref().map(sanitize_identifier).filter(|g| !g.is_empty());

    let mut parts: Vec<String> = Vec::new();
    let bucket = group_by.map(|column| build_date_bucket(&column, query.time_grain, dialect));
    match &bucket {
        Some(bucket) => parts.push(format!("SELECT {} AS bucket, {}", bucket, select_metrics)),
        None => parts.push(format!("SELECT {}", select_metrics)),
    }
    parts.push(format!("FROM {}", table));
    parts.extend(build_joins(&query.joins));
    parts.extend(build_where(&query.filters, dialect));

    let order_key = match &bucket {
        Some(bucket) => {
            parts.push(format!("GROUP BY {}", bucket));
            resolve_order_by(query.order_by.as_deref(), "bucket")
        }
        None => resolve_order_by(query.order_by.as_deref(), "value"),
    };
    parts.push(format!("ORDER BY {} {}", order_key, direction));
    parts.push(format!("LIMIT {}", limit));

    Ok(format!("{};", parts.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JoinType, MetricFilter};

    fn filter(column: &str, op: FilterOp, value: &str) -> MetricFilter {
        MetricFilter {
            column: column.to_string(),
            op,
            value: value.to_string(),
            value_to: None,
            values: None,
        }
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("orders.total"), "orders.total");
        assert_eq!(sanitize_identifier("users; DROP TABLE x--"), "usersDROPTABLEx");
        assert_eq!(sanitize_identifier("\"weird name\""), "weirdname");
        assert_eq!(sanitize_identifier("*"), "");
    }

    #[test]
    fn test_ungrouped_count_defaults() {
        let query = MetricQuery::new("orders", Aggregation::Count, "");
        let sql = build_sql_from_metric(&query, SqlDialect::Postgres).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) AS value FROM orders ORDER BY value DESC LIMIT 100;");

        let query = MetricQuery::new("orders", Aggregation::Count, "*");
        let sql = build_sql_from_metric(&query, SqlDialect::MySql).unwrap();
        assert!(sql.starts_with("SELECT COUNT(*) AS value"));
    }

    #[test]
    fn test_grouped_month_bucket_per_dialect() {
        let mut query = MetricQuery::new("orders", Aggregation::Sum, "total");
        query.group_by = Some("created_at".to_string());
        query.time_grain = Some(TimeGrain::Month);
        query.order_direction = Some(OrderDirection::Asc);
        query.limit = Some(12);

        let pg = build_sql_from_metric(&query, SqlDialect::Postgres).unwrap();
        assert_eq!(
            pg,
            "SELECT date_trunc('month', created_at) AS bucket, SUM(total) AS value FROM orders \
             GROUP BY date_trunc('month', created_at) ORDER BY bucket ASC LIMIT 12;"
        );

        let my = build_sql_from_metric(&query, SqlDialect::MySql).unwrap();
        assert_eq!(
            my,
            "SELECT DATE_FORMAT(created_at, '%Y-%m-01') AS bucket, SUM(total) AS value FROM orders \
             GROUP BY DATE_FORMAT(created_at, '%Y-%m-01') ORDER BY bucket ASC LIMIT 12;"
        );

        let generic = build_sql_from_metric(&query, SqlDialect::Generic).unwrap();
        assert!(generic.contains("date_trunc('month', created_at) AS bucket"));
    }

    #[test]
    fn test_mysql_time_grains() {
        assert_eq!(build_date_bucket("d", Some(TimeGrain::Day), SqlDialect::MySql), "DATE(d)");
        assert_eq!(build_date_bucket("d", Some(TimeGrain::Week), SqlDialect::MySql), "YEARWEEK(d, 1)");
        assert_eq!(
            build_date_bucket("d", Some(TimeGrain::Quarter), SqlDialect::MySql),
            "CONCAT(YEAR(d), '-Q', QUARTER(d))"
        );
        assert_eq!(build_date_bucket("d", Some(TimeGrain::Year), SqlDialect::MySql), "YEAR(d)");
        assert_eq!(build_date_bucket("d", None, SqlDialect::MySql), "d");
        assert_eq!(
            build_date_bucket("d", Some(TimeGrain::Week), SqlDialect::Postgres),
            "date_trunc('week', d)"
        );
    }

    #[test]
    fn test_group_by_without_grain_uses_raw_column() {
        let mut query = MetricQuery::new("orders", Aggregation::Avg, "total");
        query.group_by = Some("region".to_string());
        let sql = build_sql_from_metric(&query, SqlDialect::Postgres).unwrap();
        assert_eq!(
            sql,
            "SELECT region AS bucket, AVG(total) AS value FROM orders GROUP BY region ORDER BY bucket DESC LIMIT 100;"
        );
    }

    #[test]
    fn test_second_metric_requires_both_fields() {
        let mut query = MetricQuery::new("orders", Aggregation::Sum, "total");
        query.metric_column2 = Some("id".to_string());
        let sql = build_sql_from_metric(&query, SqlDialect::Postgres).unwrap();
        assert!(!sql.contains("value2"));

        query.aggregation2 = Some(Aggregation::Count);
        let sql = build_sql_from_metric(&query, SqlDialect::Postgres).unwrap();
        assert!(sql.starts_with("SELECT SUM(total) AS value, COUNT(id) AS value2 FROM orders"));
    }

    #[test]
    fn test_filters_and_quoting() {
        let mut query = MetricQuery::new("customers", Aggregation::Count, "id");
        query.filters = vec![
            filter("name", FilterOp::Contains, "O'Brien"),
            filter("status", FilterOp::NotEq, "void"),
            filter("score", FilterOp::GtEq, "10"),
        ];

        let pg = build_sql_from_metric(&query, SqlDialect::Postgres).unwrap();
        assert!(pg.contains("WHERE name ILIKE '%O''Brien%' AND status != 'void' AND score >= '10'"));

        let my = build_sql_from_metric(&query, SqlDialect::MySql).unwrap();
        assert!(my.contains("name LIKE '%O''Brien%'"));
    }

    #[test]
    fn test_in_filter_sources() {
        let mut f = filter("region", FilterOp::In, " eu, us ,, apac ");
        assert_eq!(build_filter(&f, SqlDialect::Postgres), "region IN ('eu', 'us', 'apac')");

        f.values = Some(vec!["a'b".to_string()]);
        assert_eq!(build_filter(&f, SqlDialect::Postgres), "region IN ('a''b')");

        f.values = Some(Vec::new());
        assert_eq!(build_filter(&f, SqlDialect::Postgres), "1=1");

        let empty = filter("region", FilterOp::In, " , ");
        assert_eq!(build_filter(&empty, SqlDialect::Postgres), "1=1");
    }

    #[test]
    fn test_between_filter_requires_both_bounds() {
        let mut f = filter("created_at", FilterOp::Between, "2024-01-01");
        assert_eq!(build_filter(&f, SqlDialect::Postgres), "1=1");

        f.value_to = Some("2024-12-31".to_string());
        assert_eq!(
            build_filter(&f, SqlDialect::Postgres),
            "created_at BETWEEN '2024-01-01' AND '2024-12-31'"
        );
    }

    #[test]
    fn test_joins_are_sanitized() {
        let mut query = MetricQuery::new("orders", Aggregation::Sum, "orders.total");
        query.joins = vec![
            MetricJoin {
                table: "customers".to_string(),
                on_left: "orders.customer_id".to_string(),
                on_right: "customers.id".to_string(),
                join_type: JoinType::Left,
            },
            MetricJoin {
                table: "regions; --".to_string(),
                on_left: "customers.region_id".to_string(),
                on_right: "regions.id".to_string(),
                join_type: JoinType::Inner,
            },
        ];
        let sql = build_sql_from_metric(&query, SqlDialect::Postgres).unwrap();
        assert!(sql.contains(
            "FROM orders LEFT JOIN customers ON orders.customer_id = customers.id \
             JOIN regions ON customers.region_id = regions.id ORDER BY"
        ));
    }

    #[test]
    fn test_order_by_resolution() {
        assert_eq!(resolve_order_by(None, "bucket"), "bucket");
        assert_eq!(resolve_order_by(Some("value2"), "bucket"), "value2");
        assert_eq!(resolve_order_by(Some("total; --"), "value"), "total");
        assert_eq!(resolve_order_by(Some("!!"), "value"), "value");
    }

    #[test]
    fn test_limit_clamping() {
        let mut query = MetricQuery::new("t", Aggregation::Count, "");
        query.limit = Some(0);
        assert!(build_sql_from_metric(&query, SqlDialect::Generic).unwrap().ends_with("LIMIT 100;"));

        query.limit = Some(-5);
        assert!(build_sql_from_metric(&query, SqlDialect::Generic).unwrap().ends_with("LIMIT 1;"));

        query.limit = Some(500);
        assert!(build_sql_from_metric(&query, SqlDialect::Generic).unwrap().ends_with("LIMIT 500;"));
    }

    #[test]
    fn test_invalid_metrics_are_rejected() {
        let query = MetricQuery::new("!!!", Aggregation::Count, "");
        assert!(matches!(build_sql_from_metric(&query, SqlDialect::Postgres), Err(AppError::Validation(_))));

        let query = MetricQuery::new("orders", Aggregation::Sum, "");
        assert!(matches!(build_sql_from_metric(&query, SqlDialect::Postgres), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_detect_dialect() {
        let mut sources = DataSources::default();
        assert_eq!(detect_dialect(DataSourceKind::Postgres, &sources), SqlDialect::Postgres);
        assert_eq!(detect_dialect(DataSourceKind::MySql, &sources), SqlDialect::MySql);
        assert_eq!(detect_dialect(DataSourceKind::LocalSql, &sources), SqlDialect::Generic);

        sources.local_sql.connection_string = "mysql2://u:p@host/db".to_string();
        assert_eq!(detect_dialect(DataSourceKind::LocalSql, &sources), SqlDialect::MySql);

        sources.local_sql.connection_string = "postgresql://u:p@host/db".to_string();
        assert_eq!(detect_dialect(DataSourceKind::LocalSql, &sources), SqlDialect::Postgres);
    }
}
