use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::data_source::{DataSourceKind, DataSources};
use super::knowledge::{KnowledgeBase, KnowledgeQuality, QUALITY_THRESHOLD};
use super::organization::Organization;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LlmProvider {
    #[default]
    #[serde(rename = "OPENAI")]
    OpenAi,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI",
            LlmProvider::Gemini => "GEMINI",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPENAI" => Some(LlmProvider::OpenAi),
            "GEMINI" => Some(LlmProvider::Gemini),
            _ => None,
        }
    }
}

/// Which LLM and data source a pod's chat and dashboards use
#[derive(Debug, Clone, Default)]
pub struct PodSettings {
    pub llm_provider: LlmProvider,
    pub api_key: String,
    pub active_data_source: DataSourceKind,
}

/// Settings as returned to clients, without the key itself
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSettingsView {
    pub llm_provider: LlmProvider,
    pub has_api_key: bool,
    pub active_data_source: DataSourceKind,
}

impl From<&PodSettings> for PodSettingsView {
    fn from(settings: &PodSettings) -> Self {
        Self {
            llm_provider: settings.llm_provider,
            has_api_key: !settings.api_key.is_empty(),
            active_data_source: settings.active_data_source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pod {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub knowledge: KnowledgeBase,
    pub data_sources: DataSources,
    pub settings: PodSettings,
    pub knowledge_quality: Option<KnowledgeQuality>,
    pub chat_enabled: bool,
    pub chat_override: bool,
    pub created_at: DateTime<Utc>,
}

impl Pod {
    pub fn new(org_id: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            name,
            knowledge: KnowledgeBase::starter(),
            data_sources: DataSources::default(),
            settings: PodSettings::default(),
            knowledge_quality: None,
            chat_enabled: true,
            chat_override: false,
            created_at: Utc::now(),
        }
    }

    /// Whether chat may run for this pod under the owning org's plan
    pub fn chat_allowed(&self, org: &Organization) -> bool {
        if !org.is_business() || self.chat_override {
            return true;
        }
        match &self.knowledge_quality {
            None => true,
            Some(quality) => quality.score >= QUALITY_THRESHOLD,
        }
    }
}

/// Pod summary returned by listing endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodView {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub settings: PodSettingsView,
    pub knowledge_quality: Option<KnowledgeQuality>,
    pub chat_enabled: bool,
    pub chat_override: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Pod> for PodView {
    fn from(pod: &Pod) -> Self {
        Self {
            id: pod.id.clone(),
            org_id: pod.org_id.clone(),
            name: pod.name.clone(),
            settings: PodSettingsView::from(&pod.settings),
            knowledge_quality: pod.knowledge_quality.clone(),
            chat_enabled: pod.chat_enabled,
            chat_override: pod.chat_override,
            created_at: pod.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePodRequest {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePodSettingsRequest {
    pub llm_provider: Option<LlmProvider>,
    pub api_key: Option<String>,
    pub active_data_source: Option<DataSourceKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::knowledge::QualityEvaluator;
    use crate::models::organization::{AccountType, LicenseTier};

    fn quality(score: u8) -> KnowledgeQuality {
        KnowledgeQuality {
            score,
            notes: String::new(),
            updated_at: Utc::now(),
            evaluated_by: QualityEvaluator::Admin,
        }
    }

    #[test]
    fn test_chat_gate_for_business_orgs() {
        let org = Organization::new("Acme".into(), AccountType::Business, LicenseTier::Business, 1000);
        let mut pod = Pod::new(org.id.clone(), "Sales".into());

        assert!(pod.chat_allowed(&org), "unscored pods are open");

        pod.knowledge_quality = Some(quality(79));
        assert!(!pod.chat_allowed(&org));

        pod.knowledge_quality = Some(quality(80));
        assert!(pod.chat_allowed(&org));

        pod.knowledge_quality = Some(quality(10));
        pod.chat_override = true;
        assert!(pod.chat_allowed(&org));
    }

    #[test]
    fn test_chat_gate_ignored_for_individual_orgs() {
        let org = Organization::new("Solo".into(), AccountType::Individual, LicenseTier::Free, 1000);
        let mut pod = Pod::new(org.id.clone(), "Mine".into());
        pod.knowledge_quality = Some(quality(5));
        assert!(pod.chat_allowed(&org));
    }

    #[test]
    fn test_settings_view_masks_key() {
        let settings = PodSettings {
            llm_provider: LlmProvider::Gemini,
            api_key: "secret".to_string(),
            active_data_source: DataSourceKind::Postgres,
        };
        let json = serde_json::to_value(PodSettingsView::from(&settings)).unwrap();
        assert_eq!(json["hasApiKey"], true);
        assert_eq!(json["llmProvider"], "GEMINI");
        assert!(json.get("apiKey").is_none());
    }
}
