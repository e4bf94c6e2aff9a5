use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metric::ChartType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub pod_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Start a conversation, reusing a client-chosen id when one was sent
    pub fn new(pod_id: String, id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            pod_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.updated_at = message.created_at;
        self.messages.push(message);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackRating {
    Up,
    Down,
}

impl FeedbackRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackRating::Up => "up",
            FeedbackRating::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(FeedbackRating::Up),
            "down" => Some(FeedbackRating::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    pub id: String,
    pub pod_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub rating: FeedbackRating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackItem {
    pub fn new(
        pod_id: String,
        conversation_id: String,
        message_id: String,
        rating: FeedbackRating,
        comment: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pod_id,
            conversation_id,
            message_id,
            rating,
            comment,
            created_at: Utc::now(),
        }
    }

    /// Prompt rendering, e.g. `DOWN: wrong month`
    pub fn prompt_line(&self) -> String {
        format!(
            "{}: {}",
            self.rating.as_str().to_uppercase(),
            self.comment.as_deref().unwrap_or("(no comment)")
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub conversation_id: String,
    pub message_id: String,
    pub sql: String,
    pub analysis: String,
    pub chart_hint: ChartType,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub rating: Option<FeedbackRating>,
    pub comment: Option<String>,
}

/// One earlier exchange shown to the support assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<SupportTurn>,
}

#[derive(Debug, Serialize)]
pub struct SupportResponse {
    pub reply: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_push_updates_timestamp() {
        let mut conversation = Conversation::new("pod".into(), Some("c-1".into()));
        assert_eq!(conversation.id, "c-1");

        let message = ChatMessage::new(ChatRole::User, "hello".into());
        let sent_at = message.created_at;
        conversation.push(message);
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.updated_at, sent_at);
    }

    #[test]
    fn test_feedback_prompt_line() {
        let item = FeedbackItem::new("p".into(), "c".into(), "m".into(), FeedbackRating::Down, None);
        assert_eq!(item.prompt_line(), "DOWN: (no comment)");
    }

    #[test]
    fn test_support_request_defaults_history() {
        let request: SupportRequest = serde_json::from_str(r#"{"message": "where are dashboards?"}"#).unwrap();
        assert!(request.history.is_empty());

        let request: SupportRequest = serde_json::from_str(
            r#"{"message": "thanks", "history": [{"role": "assistant", "content": "Open Dashboards."}]}"#,
        )
        .unwrap();
        assert_eq!(request.history[0].role, ChatRole::Assistant);
    }
}
