use crate::api::middleware::AppError;
use crate::config::LlmConfig;
use crate::models::{
    AccountType, ChartType, ChatRole, Dashboard, DataSourceKind, FeedbackItem, KnowledgeBankEntry, KnowledgeBase,
    LicenseTier, LlmProvider, SupportTurn,
};
use crate::services::llm_provider::{CompletionProvider, GeminiProvider, OpenAiProvider, ProviderEndpoint};
use crate::services::usage_service::estimate_tokens;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::sync::Arc;

/// Query used whenever the model gives us nothing usable
pub const FALLBACK_SQL: &str = "SELECT
  date_trunc('month', created_at) AS month,
  SUM(total) AS revenue
FROM orders
GROUP BY 1
ORDER BY 1
LIMIT 12;";

pub const NO_KEY_ANALYSIS: &str =
    "No API key configured. Add your OpenAI or Gemini key in Profile to enable live analysis.";

pub const NO_KEY_SUPPORT_REPLY: &str =
    "Concierge needs an OpenAI or Gemini API key. Add one in Profile to enable support answers.";

/// Earlier support exchanges included in the prompt
const SUPPORT_HISTORY_TURNS: usize = 6;

/// Pod context shared by the SQL and analysis prompts
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub provider: LlmProvider,
    pub api_key: &'a str,
    pub knowledge: &'a KnowledgeBase,
    pub data_source: DataSourceKind,
    pub feedback: &'a [FeedbackItem],
    pub knowledge_bank: &'a str,
    pub dashboards: &'a [Dashboard],
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlResponse {
    pub sql: String,
    pub chart_hint: ChartType,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResponse {
    pub analysis: String,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupportReply {
    pub reply: String,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeQualityResponse {
    pub score: u8,
    pub notes: String,
    pub tokens_used: u64,
}

/// Model output and the estimated token cost of producing it
struct Completion {
    text: String,
    tokens: u64,
}

/// Builds prompts, calls the configured provider and interprets its replies
pub struct LlmService {
    config: LlmConfig,
    http_client: HttpClient,
    fixed_provider: Option<Arc<dyn CompletionProvider>>,
}

impl LlmService {
    pub fn new(config: &LlmConfig, http_client: HttpClient) -> Self {
        Self {
            config: config.clone(),
            http_client,
            fixed_provider: None,
        }
    }

    /// Route every call through `provider` regardless of keys
    pub fn with_provider(config: &LlmConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            config: config.clone(),
            http_client: HttpClient::new(),
            fixed_provider: Some(provider),
        }
    }

    /// The pod's key, falling back to the server key for that provider
    pub fn resolve_api_key(&self, provider: LlmProvider, api_key: &str) -> Option<String> {
        if !api_key.trim().is_empty() {
            return Some(api_key.trim().to_string());
        }
        let configured = match provider {
            LlmProvider::OpenAi => self.config.openai_api_key.as_deref(),
            LlmProvider::Gemini => self.config.gemini_api_key.as_deref(),
        };
        configured.map(str::trim).filter(|k| !k.is_empty()).map(str::to_string)
    }

    pub fn has_key(&self, provider: LlmProvider, api_key: &str) -> bool {
        self.fixed_provider.is_some() || self.resolve_api_key(provider, api_key).is_some()
    }

    /// Provider for quality evaluation when the caller names none
    fn app_provider(&self) -> LlmProvider {
        let present = |k: &Option<String>| k.as_deref().is_some_and(|k| !k.trim().is_empty());
        if present(&self.config.openai_api_key) {
            LlmProvider::OpenAi
        } else if present(&self.config.gemini_api_key) {
            LlmProvider::Gemini
        } else {
            LlmProvider::OpenAi
        }
    }

    fn provider_for(&self, provider: LlmProvider, api_key: &str) -> Option<Arc<dyn CompletionProvider>> {
        if let Some(fixed) = &self.fixed_provider {
            return Some(fixed.clone());
        }
        let key = self.resolve_api_key(provider, api_key)?;
        let timeout_secs = self.config.request_timeout_secs;
        let client = self.http_client.clone();

        let provider: Arc<dyn CompletionProvider> = match provider {
            LlmProvider::OpenAi => Arc::new(OpenAiProvider::new(
                client,
                ProviderEndpoint {
                    base_url: self.config.openai_base_url.clone(),
                    model: self.config.openai_model.clone(),
                    api_key: key,
                    timeout_secs,
                },
            )),
            LlmProvider::Gemini => Arc::new(GeminiProvider::new(
                client,
                ProviderEndpoint {
                    base_url: self.config.gemini_base_url.clone(),
                    model: self.config.gemini_model.clone(),
                    api_key: key,
                    timeout_secs,
                },
            )),
        };
        Some(provider)
    }

    /// Without a key no call is made and the prompt alone is charged
    async fn run_provider(&self, provider: LlmProvider, api_key: &str, prompt: &str) -> Result<Completion, AppError> {
        let Some(client) = self.provider_for(provider, api_key) else {
            return Ok(Completion {
                text: String::new(),
                tokens: estimate_tokens(prompt),
            });
        };

        tracing::debug!("Calling {} with a {} character prompt", client.name(), prompt.len());
        let text = client.complete(prompt).await?;
        let tokens = estimate_tokens(&format!("{}{}", prompt, text));
        Ok(Completion { text, tokens })
    }

    pub async fn generate_sql(&self, message: &str, ctx: PromptContext<'_>) -> Result<SqlResponse, AppError> {
        let prompt = build_sql_prompt(message, &ctx);
        let raw = self.run_provider(ctx.provider, ctx.api_key, &prompt).await?;

        if raw.text.trim().is_empty() {
            return Ok(SqlResponse {
                sql: FALLBACK_SQL.to_string(),
                chart_hint: ChartType::Line,
                tokens_used: raw.tokens,
            });
        }

        let Some(parsed) = extract_json(&raw.text) else {
            tracing::warn!("Model reply had no JSON object; using fallback SQL");
            return Ok(SqlResponse {
                sql: FALLBACK_SQL.to_string(),
                chart_hint: ChartType::Bar,
                tokens_used: raw.tokens,
            });
        };

        let sql = parsed
            .get("sql")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(FALLBACK_SQL)
            .to_string();
        let chart_hint = parsed
            .get("chartHint")
            .and_then(Value::as_str)
            .and_then(ChartType::parse)
            .unwrap_or(ChartType::Bar);

        Ok(SqlResponse {
            sql,
            chart_hint,
            tokens_used: raw.tokens,
        })
    }

    pub async fn generate_analysis(
        &self,
        message: &str,
        sql: &str,
        columns: &[String],
        rows: &[Value],
        ctx: PromptContext<'_>,
    ) -> Result<AnalysisResponse, AppError> {
        let prompt = build_analysis_prompt(message, sql, columns, rows, &ctx);
        let raw = self.run_provider(ctx.provider, ctx.api_key, &prompt).await?;

        let analysis = if raw.text.trim().is_empty() {
            NO_KEY_ANALYSIS.to_string()
        } else {
            raw.text.trim().to_string()
        };
        Ok(AnalysisResponse {
            analysis,
            tokens_used: raw.tokens,
        })
    }

    /// Product help for the console; never writes SQL
    pub async fn generate_support_response(
        &self,
        message: &str,
        history: &[SupportTurn],
        provider: LlmProvider,
        api_key: &str,
        account: (AccountType, LicenseTier),
    ) -> Result<SupportReply, AppError> {
        let prompt = build_support_prompt(message, history, account);
        let raw = self.run_provider(provider, api_key, &prompt).await?;

        let reply = match raw.text.trim() {
            "" => NO_KEY_SUPPORT_REPLY.to_string(),
            text => text.to_string(),
        };
        Ok(SupportReply {
            reply,
            tokens_used: raw.tokens,
        })
    }

    /// Score the knowledge base 0-100. Never fails: a missing key, a provider
    /// error or an unreadable reply all fall back to the heuristic score.
    pub async fn evaluate_knowledge_quality(
        &self,
        knowledge: &KnowledgeBase,
        provider: Option<LlmProvider>,
        api_key: Option<&str>,
        knowledge_bank: &[KnowledgeBankEntry],
    ) -> KnowledgeQualityResponse {
        let provider = provider.unwrap_or_else(|| self.app_provider());
        let prompt = build_quality_prompt(knowledge, knowledge_bank);
        let (fallback_score, fallback_notes) = heuristic_quality(knowledge, knowledge_bank);

        let raw = match self.run_provider(provider, api_key.unwrap_or_default(), &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Knowledge quality evaluation failed: {}", e);
                return KnowledgeQualityResponse {
                    score: fallback_score,
                    notes: format!("{} (LLM evaluation unavailable; using heuristic).", fallback_notes),
                    tokens_used: estimate_tokens(&prompt),
                };
            }
        };

        let parsed = match extract_json(&raw.text) {
            Some(parsed) if !raw.text.trim().is_empty() => parsed,
            _ => {
                return KnowledgeQualityResponse {
                    score: fallback_score,
                    notes: fallback_notes,
                    tokens_used: raw.tokens,
                }
            }
        };

        let score = parsed
            .get("score")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite())
            .map(|s| s.round().clamp(0.0, 100.0) as u8)
            .unwrap_or(fallback_score);
        let notes = parsed
            .get("notes")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback_notes);

        KnowledgeQualityResponse {
            score,
            notes,
            tokens_used: raw.tokens,
        }
    }
}

/// Parse the span from the first `{` to the last `}`
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn feedback_snippet(feedback: &[FeedbackItem]) -> String {
    if feedback.is_empty() {
        return "None.".to_string();
    }
    feedback.iter().map(FeedbackItem::prompt_line).collect::<Vec<_>>().join("\n")
}

fn dashboards_snippet(dashboards: &[Dashboard]) -> String {
    if dashboards.is_empty() {
        return "None.".to_string();
    }
    dashboards
        .iter()
        .map(|d| {
            let titles: Vec<&str> = d.widgets.iter().map(|w| w.title.as_str()).collect();
            format!("{}: {}", d.name, titles.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_none(text: &str) -> &str {
    if text.is_empty() {
        "None."
    } else {
        text
    }
}

fn dialect_instruction(data_source: DataSourceKind) -> &'static str {
    match data_source {
        DataSourceKind::Firebase => {
            "- Use simple SQL that maps to Firestore: SELECT <fields> FROM <collection> WHERE field = 'value' ORDER BY field LIMIT N."
        }
        DataSourceKind::Postgres => "- Use PostgreSQL-compatible SQL (date_trunc, ILIKE, etc.).",
        DataSourceKind::MySql => "- Use MySQL-compatible SQL (DATE_FORMAT, backticks if needed).",
        DataSourceKind::LocalSql => "- Use PostgreSQL/MySQL compatible SQL.",
    }
}

fn build_sql_prompt(message: &str, ctx: &PromptContext<'_>) -> String {
    [
        "You are ARES, an AI SQL assistant.".to_string(),
        format!("User question: {}", message),
        format!("Active data source: {}", ctx.data_source.as_str()),
        "Table dictionary:".to_string(),
        to_json(&ctx.knowledge.table_dictionary),
        "Column dictionary:".to_string(),
        to_json(&ctx.knowledge.column_dictionary),
        "Parameters:".to_string(),
        to_json(&ctx.knowledge.parameters),
        "Metrics:".to_string(),
        to_json(&ctx.knowledge.metrics),
        "Knowledge bank context:".to_string(),
        or_none(ctx.knowledge_bank).to_string(),
        "Dashboards:".to_string(),
        dashboards_snippet(ctx.dashboards),
        "Recent user feedback:".to_string(),
        feedback_snippet(ctx.feedback),
        "\nInstructions:".to_string(),
        "- Return ONLY a JSON object with keys: sql, chartHint.".to_string(),
        "- chartHint must be one of: line, bar, pie.".to_string(),
        "- Always include a LIMIT unless the user asked for full output.".to_string(),
        dialect_instruction(ctx.data_source).to_string(),
    ]
    .join("\n")
}

fn build_analysis_prompt(
    message: &str,
    sql: &str,
    columns: &[String],
    rows: &[Value],
    ctx: &PromptContext<'_>,
) -> String {
    [
        "You are ARES, an AI data analyst.".to_string(),
        format!("User question: {}", message),
        format!("SQL: {}", sql),
        format!("Columns: {}", to_json(&columns)),
        format!("Rows: {}", to_json(&rows)),
        "Parameters:".to_string(),
        to_json(&ctx.knowledge.parameters),
        "Knowledge bank context:".to_string(),
        or_none(ctx.knowledge_bank).to_string(),
        "Dashboards:".to_string(),
        dashboards_snippet(ctx.dashboards),
        "Recent user feedback:".to_string(),
        feedback_snippet(ctx.feedback),
        "\nInstructions:".to_string(),
        "- Summarize key insights in 4-6 bullets.".to_string(),
        "- Mention anomalies or trends.".to_string(),
        "- Keep it concise and business-focused.".to_string(),
    ]
    .join("\n")
}

fn build_support_prompt(message: &str, history: &[SupportTurn], account: (AccountType, LicenseTier)) -> String {
    let recent = &history[history.len().saturating_sub(SUPPORT_HISTORY_TURNS)..];
    let conversation = if recent.is_empty() {
        "Recent conversation: None.".to_string()
    } else {
        let lines: Vec<String> = recent
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    ChatRole::User => "USER",
                    ChatRole::Assistant => "ASSISTANT",
                };
                format!("{}: {}", role, turn.content)
            })
            .collect();
        format!("Recent conversation:\n{}", lines.join("\n"))
    };

    [
        "You are ARES Concierge, a help & support assistant for the ARES Console.".to_string(),
        "You MUST only answer about product usage, onboarding, troubleshooting, and where to find features.".to_string(),
        "Do NOT generate SQL or analyze user data. If asked, redirect them to the Chat panel.".to_string(),
        format!("Account type: {}", account.0.as_str()),
        format!("License tier: {}", account.1.as_str()),
        "Key modules: Pods, Settings/API keys, Data Sources, Knowledge Base, Knowledge Bank, Dashboards, Chat, Usage/License.".to_string(),
        "Answer in <= 120 words. Use short steps if needed.".to_string(),
        conversation,
        format!("User: {}", message),
    ]
    .join("\n")
}

fn build_quality_prompt(knowledge: &KnowledgeBase, bank: &[KnowledgeBankEntry]) -> String {
    let bank_section = if bank.is_empty() {
        "Knowledge bank: None.".to_string()
    } else {
        let lines: Vec<String> = bank
            .iter()
            .map(|e| format!("- {}: {} | {}", e.title, e.highlights, e.lowlights))
            .collect();
        format!("Knowledge bank:\n{}", lines.join("\n"))
    };

    [
        "You are a data documentation reviewer.".to_string(),
        "Evaluate the quality of the knowledge base for analytics readiness.".to_string(),
        "Return ONLY JSON with keys: score (0-100 integer), notes (1-2 sentences).".to_string(),
        "Scoring guidance:".to_string(),
        "- 90-100: comprehensive tables/columns/metrics with clear business context.".to_string(),
        "- 80-89: mostly complete but missing minor details.".to_string(),
        "- 60-79: incomplete or unclear; missing key definitions.".to_string(),
        "- <60: insufficient for reliable analysis.".to_string(),
        "If knowledge bank entries exist, incorporate them in the assessment.".to_string(),
        "Knowledge base:".to_string(),
        to_json(knowledge),
        bank_section,
    ]
    .join("\n")
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Offline documentation score: tables 30, columns 20, parameters 4x5,
/// metrics 20, knowledge bank 10
pub fn heuristic_quality(knowledge: &KnowledgeBase, bank: &[KnowledgeBankEntry]) -> (u8, String) {
    let tables = &knowledge.table_dictionary;
    let columns = &knowledge.column_dictionary;
    let metrics = &knowledge.metrics;
    let params = &knowledge.parameters;

    let table_complete = tables
        .iter()
        .filter(|t| filled(&t.table_name) && filled(&t.description))
        .count();
    let column_complete = columns
        .iter()
        .filter(|c| filled(&c.table_name) && filled(&c.column_name) && filled(&c.data_type) && filled(&c.description))
        .count();

    let table_score = (table_complete as f64 / tables.len().max(1) as f64 * 30.0).min(30.0);
    let column_score = (column_complete as f64 / columns.len().max(1) as f64 * 20.0).min(20.0);

    let params_filled = [
        filled(&params.date_handling_rules),
        filled(&params.best_query_practices),
        filled(&params.business_context),
        !params.sample_queries.is_empty(),
    ]
    .iter()
    .filter(|f| **f)
    .count();
    let params_score = params_filled as f64 * 5.0;

    let metric_fields = metrics.len() * 4;
    let metric_filled: usize = metrics
        .iter()
        .map(|m| {
            [&m.name, &m.definition, &m.sample_query, &m.default_filters]
                .iter()
                .filter(|v| filled(v))
                .count()
        })
        .sum();
    let metric_score = if metric_fields > 0 {
        metric_filled as f64 / metric_fields as f64 * 20.0
    } else {
        0.0
    };

    let bank_score = if bank.is_empty() { 0.0 } else { 10.0 };
    let total = (table_score + column_score + params_score + metric_score + bank_score)
        .round()
        .clamp(0.0, 100.0) as u8;

    let mut missing = Vec::new();
    if table_complete == 0 {
        missing.push("tables");
    }
    if column_complete == 0 {
        missing.push("columns");
    }
    if !filled(&params.business_context) {
        missing.push("business context");
    }
    if metrics.is_empty() || metric_filled == 0 {
        missing.push("metrics");
    }

    let notes = if missing.is_empty() {
        "Knowledge base is sufficiently detailed for analytics.".to_string()
    } else {
        format!("Add {} to improve documentation quality.", missing.join(", "))
    };

    (total, notes)
}
