use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat is gated for BUSINESS orgs until the knowledge base scores at least this
pub const QUALITY_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableDictionaryItem {
    pub table_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnDictionaryItem {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub description: String,
    pub filterable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Parameters {
    pub date_handling_rules: String,
    pub best_query_practices: String,
    pub business_context: String,
    pub sample_queries: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricDefinition {
    pub name: String,
    pub definition: String,
    pub sample_query: String,
    pub default_filters: String,
}

/// User-authored schema documentation fed into LLM prompts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeBase {
    pub table_dictionary: Vec<TableDictionaryItem>,
    pub column_dictionary: Vec<ColumnDictionaryItem>,
    pub parameters: Parameters,
    pub metrics: Vec<MetricDefinition>,
}

impl KnowledgeBase {
    /// Starter knowledge base with one blank row per section for the editor
    pub fn starter() -> Self {
        Self {
            table_dictionary: vec![TableDictionaryItem::default()],
            column_dictionary: vec![ColumnDictionaryItem::default()],
            parameters: Parameters::default(),
            metrics: vec![MetricDefinition::default()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QualityEvaluator {
    System,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeQuality {
    pub score: u8,
    pub notes: String,
    pub updated_at: DateTime<Utc>,
    pub evaluated_by: QualityEvaluator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBankEntry {
    pub id: String,
    pub pod_id: String,
    pub title: String,
    pub date: String,
    pub highlights: String,
    pub lowlights: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeBankEntry {
    pub fn new(
        pod_id: String,
        title: String,
        date: String,
        highlights: String,
        lowlights: String,
        doc_text: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pod_id,
            title,
            date,
            highlights,
            lowlights,
            doc_text,
            created_at: Utc::now(),
        }
    }

    /// One-line rendering used as prompt context
    pub fn context_line(&self) -> String {
        format!("({}) {}: {} | {}", self.date, self.title, self.highlights, self.lowlights)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKnowledgeBankEntryRequest {
    pub title: Option<String>,
    pub date: Option<String>,
    pub highlights: Option<String>,
    pub lowlights: Option<String>,
    pub doc_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatOverrideRequest {
    #[serde(default)]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_knowledge_base_fills_defaults() {
        let kb: KnowledgeBase = serde_json::from_value(serde_json::json!({
            "tableDictionary": [{ "tableName": "orders" }],
            "parameters": { "businessContext": "B2B retail" }
        }))
        .unwrap();

        assert_eq!(kb.table_dictionary[0].table_name, "orders");
        assert!(kb.table_dictionary[0].description.is_empty());
        assert_eq!(kb.parameters.business_context, "B2B retail");
        assert!(kb.metrics.is_empty());
    }

    #[test]
    fn test_bank_entry_context_line() {
        let entry = KnowledgeBankEntry::new(
            "pod".to_string(),
            "Q3 review".to_string(),
            "2024-10-01".to_string(),
            "revenue up".to_string(),
            "churn up".to_string(),
            None,
        );
        assert_eq!(entry.context_line(), "(2024-10-01) Q3 review: revenue up | churn up");
    }
}
