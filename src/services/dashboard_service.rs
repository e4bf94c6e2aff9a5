use crate::api::middleware::AppError;
use crate::models::{Dashboard, DashboardWidget, DataSourceKind, Pod, QueryResult, WidgetTrend};
use crate::services::query_service::{QueryContext, QueryService};
use crate::services::sql_builder::{build_sql_from_metric, detect_dialect};
use futures::future::try_join_all;
use std::sync::Arc;

/// Widgets surfaced next to chat
const MAX_CHAT_TRENDS: usize = 3;

pub struct DashboardService {
    query_service: Arc<QueryService>,
}

impl DashboardService {
    pub fn new(query_service: Arc<QueryService>) -> Self {
        Self { query_service }
    }

    /// Compile a widget's metric for the pod's active source and run it
    pub async fn run_widget(&self, widget: &DashboardWidget, pod: &Pod) -> Result<QueryResult, AppError> {
        let data_source = pod.settings.active_data_source;
        if data_source == DataSourceKind::Firebase {
            return Err(AppError::Validation(
                "Dashboards require SQL data sources. Switch to Local SQL in Profile.".to_string(),
            ));
        }

        let dialect = detect_dialect(data_source, &pod.data_sources);
        let sql = build_sql_from_metric(&widget.query, dialect)?;
        tracing::debug!("Widget '{}' compiled to {} SQL: {}", widget.title, dialect.as_str(), sql);

        let ctx = QueryContext {
            data_source,
            data_sources: &pod.data_sources,
        };
        self.query_service.run_query(&sql, ctx).await
    }

    /// Run every chat trend widget concurrently, keeping dashboard order
    pub async fn chat_trends(&self, pod: &Pod, dashboards: &[Dashboard]) -> Result<Vec<WidgetTrend>, AppError> {
        let widgets = collect_chat_trends(dashboards);
        let runs = widgets.iter().map(|widget| async move {
            let data = self.run_widget(widget, pod).await?;
            Ok::<_, AppError>(WidgetTrend {
                widget_id: widget.id.clone(),
                title: widget.title.clone(),
                chart_type: widget.chart_type,
                data,
            })
        });
        try_join_all(runs).await
    }
}

/// The first widgets flagged `showInChat`, across dashboards in order
pub fn collect_chat_trends(dashboards: &[Dashboard]) -> Vec<&DashboardWidget> {
    dashboards
        .iter()
        .flat_map(|d| d.widgets.iter())
        .filter(|w| w.show_in_chat)
        .take(MAX_CHAT_TRENDS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{Aggregation, ChartType, MetricQuery};
    use crate::services::ConnectionPoolManager;

    fn widget(title: &str, show_in_chat: bool) -> DashboardWidget {
        DashboardWidget {
            id: title.to_string(),
            title: title.to_string(),
            description: None,
            chart_type: ChartType::Line,
            query: MetricQuery::new("orders", Aggregation::Count, ""),
            show_in_chat,
        }
    }

    fn service() -> DashboardService {
        let config = Config::for_tests(":memory:");
        let query = QueryService::new(&config, Arc::new(ConnectionPoolManager::new()), reqwest::Client::new());
        DashboardService::new(Arc::new(query))
    }

    #[test]
    fn test_collect_chat_trends_takes_first_three_flagged() {
        let mut first = Dashboard::new("pod".into(), "Sales".into(), None);
        first.widgets = vec![widget("a", true), widget("b", false), widget("c", true)];
        let mut second = Dashboard::new("pod".into(), "Ops".into(), None);
        second.widgets = vec![widget("d", true), widget("e", true)];

        let dashboards = [first, second];
        let titles: Vec<&str> = collect_chat_trends(&dashboards)
            .iter()
            .map(|w| w.title.as_str())
            .collect();
        assert_eq!(titles, vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_firebase_pods_cannot_run_widgets() {
        let mut pod = Pod::new("org".into(), "Pod".into());
        pod.settings.active_data_source = DataSourceKind::Firebase;

        let err = service().run_widget(&widget("a", true), &pod).await.unwrap_err();
        assert!(err.to_string().contains("Dashboards require SQL data sources"));
    }

    #[tokio::test]
    async fn test_run_widget_surfaces_missing_connection() {
        let pod = Pod::new("org".into(), "Pod".into());
        let err = service().run_widget(&widget("a", true), &pod).await.unwrap_err();
        assert!(err.to_string().contains("Local SQL connection string not configured."));
    }

    #[tokio::test]
    async fn test_chat_trends_empty_without_flagged_widgets() {
        let pod = Pod::new("org".into(), "Pod".into());
        let mut dashboard = Dashboard::new(pod.id.clone(), "Sales".into(), None);
        dashboard.widgets = vec![widget("a", false)];

        let trends = service().chat_trends(&pod, &[dashboard]).await.unwrap();
        assert!(trends.is_empty());
    }
}
