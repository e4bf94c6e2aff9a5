// Chat turn orchestration: gatekeeping, SQL generation, execution, analysis
use crate::api::middleware::AppError;
use crate::models::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, Conversation, FeedbackItem, FeedbackRequest, Organization, Pod,
    SupportRequest, SupportResponse,
};
use crate::services::llm_service::{LlmService, PromptContext};
use crate::services::query_service::{QueryContext, QueryService};
use crate::services::usage_service::{estimate_tokens, UsageService};
use crate::storage::SqliteStorage;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Knowledge bank entries and feedback items fed into prompts
const RECENT_CONTEXT_ITEMS: usize = 3;

pub struct ChatService {
    storage: Arc<SqliteStorage>,
    llm: Arc<LlmService>,
    query: Arc<QueryService>,
    usage: UsageService,
}

impl ChatService {
    pub fn new(
        storage: Arc<SqliteStorage>,
        llm: Arc<LlmService>,
        query: Arc<QueryService>,
        usage: UsageService,
    ) -> Self {
        Self {
            storage,
            llm,
            query,
            usage,
        }
    }

    async fn load_pod(&self, pod_id: &str) -> Result<(Pod, Organization), AppError> {
        self.storage
            .get_pod_with_org(pod_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Pod {} not found", pod_id)))
    }

    /// Answer one question against the pod's active data source
    pub async fn chat(&self, pod_id: &str, request: ChatRequest) -> Result<ChatResponse, AppError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AppError::Validation("Message is required.".to_string()));
        }

        let (pod, org) = self.load_pod(pod_id).await?;

        if !pod.chat_allowed(&org) {
            return Err(AppError::Forbidden(
                "Chat is disabled until knowledge quality reaches 80. An admin can enable it in Knowledge settings."
                    .to_string(),
            ));
        }

        let settings = &pod.settings;
        if !self.llm.has_key(settings.llm_provider, &settings.api_key) {
            return Err(AppError::Validation(
                "Add your OpenAI or Gemini API key in Profile to enable live SQL and analysis.".to_string(),
            ));
        }

        let bank = self.storage.recent_bank_entries(&pod.id, RECENT_CONTEXT_ITEMS).await?;
        let knowledge_bank = bank.iter().map(|e| e.context_line()).collect::<Vec<_>>().join("\n");

        let estimated = estimate_tokens(&format!(
            "{}{}{}",
            message,
            serde_json::to_string(&pod.knowledge)?,
            knowledge_bank
        ));
        if !self.usage.can_use_tokens(&org, estimated, Utc::now()) {
            return Err(AppError::QuotaExceeded(
                "Token limit reached. Upgrade your license to continue.".to_string(),
            ));
        }

        let feedback = self.storage.recent_feedback(&pod.id, RECENT_CONTEXT_ITEMS).await?;
        let dashboards = self.storage.list_dashboards(&pod.id).await?;

        let ctx = PromptContext {
            provider: settings.llm_provider,
            api_key: &settings.api_key,
            knowledge: &pod.knowledge,
            data_source: settings.active_data_source,
            feedback: &feedback,
            knowledge_bank: &knowledge_bank,
            dashboards: &dashboards,
        };

        let user_message = ChatMessage::new(ChatRole::User, message.to_string());

        let sql = self.llm.generate_sql(message, ctx).await?;
        tracing::info!("Pod {} generated SQL: {}", pod.id, sql.sql);

        let result = self
            .query
            .run_query(
                &sql.sql,
                QueryContext {
                    data_source: settings.active_data_source,
                    data_sources: &pod.data_sources,
                },
            )
            .await?;

        let analysis = self
            .llm
            .generate_analysis(message, &sql.sql, &result.columns, &result.rows, ctx)
            .await?;

        let tokens_used = sql.tokens_used + analysis.tokens_used;
        let usage = &self.usage;
        self.storage
            .modify_org(&org.id, |org| usage.consume_tokens(org, tokens_used, Utc::now()))
            .await?;

        let assistant_message = ChatMessage::new(ChatRole::Assistant, analysis.analysis.clone());
        let message_id = assistant_message.id.clone();
        let conversation = self
            .append_turn(&pod.id, request.conversation_id.as_deref(), user_message, assistant_message)
            .await?;

        Ok(ChatResponse {
            conversation_id: conversation.id,
            message_id,
            sql: sql.sql,
            analysis: analysis.analysis,
            chart_hint: sql.chart_hint,
            columns: result.columns,
            rows: result.rows,
        })
    }

    /// Product help from the support assistant, billed to the pod's org
    pub async fn support(&self, pod_id: &str, request: SupportRequest) -> Result<SupportResponse, AppError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AppError::Validation("Message is required.".to_string()));
        }

        let (pod, org) = self.load_pod(pod_id).await?;
        let settings = &pod.settings;
        if !self.llm.has_key(settings.llm_provider, &settings.api_key) {
            return Err(AppError::Validation(
                "Add your OpenAI or Gemini API key in Profile to enable concierge.".to_string(),
            ));
        }

        if !self.usage.can_use_tokens(&org, estimate_tokens(message), Utc::now()) {
            return Err(AppError::QuotaExceeded(
                "Token limit reached. Upgrade your license to continue.".to_string(),
            ));
        }

        let result = self
            .llm
            .generate_support_response(
                message,
                &request.history,
                settings.llm_provider,
                &settings.api_key,
                (org.account_type, org.tier),
            )
            .await
            .map_err(|e| match e {
                AppError::LlmService(msg) if msg.to_lowercase().contains("api key") => {
                    AppError::Validation("Invalid OpenAI/Gemini API key. Update it in Profile.".to_string())
                }
                other => other,
            })?;

        let usage = &self.usage;
        self.storage
            .modify_org(&org.id, |org| usage.consume_tokens(org, result.tokens_used, Utc::now()))
            .await?;

        Ok(SupportResponse { reply: result.reply })
    }

    /// Append a question and its answer to the pod's conversation, creating
    /// it on demand. An id held by another pod is never reused.
    async fn append_turn(
        &self,
        pod_id: &str,
        conversation_id: Option<&str>,
        user_message: ChatMessage,
        assistant_message: ChatMessage,
    ) -> Result<Conversation, AppError> {
        let existing = match conversation_id {
            Some(id) => self.storage.get_conversation(pod_id, id).await?,
            None => None,
        };
        let mut conversation = existing
            .unwrap_or_else(|| Conversation::new(pod_id.to_string(), conversation_id.map(str::to_string)));

        conversation.push(user_message);
        conversation.push(assistant_message);
        if !self.storage.save_conversation(&conversation).await? {
            tracing::warn!("Conversation id {} is taken; starting a new one for pod {}", conversation.id, pod_id);
            conversation.id = Uuid::new_v4().to_string();
            self.storage.save_conversation(&conversation).await?;
        }
        Ok(conversation)
    }

    /// Store a thumbs up/down on an assistant message
    pub async fn record_feedback(&self, pod_id: &str, request: FeedbackRequest) -> Result<FeedbackItem, AppError> {
        let conversation_id = request.conversation_id.filter(|s| !s.trim().is_empty());
        let message_id = request.message_id.filter(|s| !s.trim().is_empty());
        let (Some(conversation_id), Some(message_id), Some(rating)) = (conversation_id, message_id, request.rating)
        else {
            return Err(AppError::Validation(
                "conversationId, messageId, and rating are required.".to_string(),
            ));
        };

        let (pod, _) = self.load_pod(pod_id).await?;
        let item = FeedbackItem::new(pod.id, conversation_id, message_id, rating, request.comment);
        self.storage.add_feedback(&item).await?;
        tracing::debug!("Recorded {} feedback for message {}", item.rating.as_str(), item.message_id);
        Ok(item)
    }
}
