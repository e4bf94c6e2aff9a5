use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{
    AccountType, Conversation, Dashboard, DataSourceKind, FeedbackItem, FeedbackRating, KnowledgeBankEntry,
    LicenseTier, LlmProvider, Organization, Pod, PodSettings,
};

const ORG_COLUMNS: &str = "id, name, account_type, tier, token_bucket_json, created_at, updated_at";
const POD_COLUMNS: &str = "id, org_id, name, knowledge_json, data_sources_json, llm_provider, api_key, \
     active_data_source, knowledge_quality_json, chat_enabled, chat_override, created_at";
const DASHBOARD_COLUMNS: &str = "id, pod_id, name, description, widgets_json, created_at, updated_at";
const BANK_COLUMNS: &str = "id, pod_id, title, date, highlights, lowlights, doc_text, created_at";
const FEEDBACK_COLUMNS: &str = "id, pod_id, conversation_id, message_id, rating, comment, created_at";

/// SQLite store for organizations, pods and everything a pod owns.
/// Nested documents (knowledge base, data sources, widgets, messages) are
/// kept as JSON text. Uses tokio::Mutex for async-friendly locking.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

fn conversion_error(idx: usize, e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn json_text<T: Serialize + ?Sized>(value: &T) -> SqliteResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> SqliteResult<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn time_column(row: &Row, idx: usize) -> SqliteResult<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn enum_column<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> SqliteResult<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| conversion_error(idx, format!("unknown value '{}'", text)))
}

fn org_from_row(row: &Row) -> SqliteResult<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        account_type: enum_column(row, 2, AccountType::parse)?,
        tier: enum_column(row, 3, LicenseTier::parse)?,
        token_bucket: json_column(row, 4)?,
        created_at: time_column(row, 5)?,
        updated_at: time_column(row, 6)?,
    })
}

fn pod_from_row(row: &Row) -> SqliteResult<Pod> {
    let quality: Option<String> = row.get(8)?;
    let knowledge_quality = quality
        .map(|text| serde_json::from_str(&text).map_err(|e| conversion_error(8, e)))
        .transpose()?;

    Ok(Pod {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        knowledge: json_column(row, 3)?,
        data_sources: json_column(row, 4)?,
        settings: PodSettings {
            llm_provider: enum_column(row, 5, LlmProvider::parse)?,
            api_key: row.get(6)?,
            active_data_source: enum_column(row, 7, DataSourceKind::parse)?,
        },
        knowledge_quality,
        chat_enabled: row.get(9)?,
        chat_override: row.get(10)?,
        created_at: time_column(row, 11)?,
    })
}

fn dashboard_from_row(row: &Row) -> SqliteResult<Dashboard> {
    Ok(Dashboard {
        id: row.get(0)?,
        pod_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        widgets: json_column(row, 4)?,
        created_at: time_column(row, 5)?,
        updated_at: time_column(row, 6)?,
    })
}

fn bank_entry_from_row(row: &Row) -> SqliteResult<KnowledgeBankEntry> {
    Ok(KnowledgeBankEntry {
        id: row.get(0)?,
        pod_id: row.get(1)?,
        title: row.get(2)?,
        date: row.get(3)?,
        highlights: row.get(4)?,
        lowlights: row.get(5)?,
        doc_text: row.get(6)?,
        created_at: time_column(row, 7)?,
    })
}

fn feedback_from_row(row: &Row) -> SqliteResult<FeedbackItem> {
    Ok(FeedbackItem {
        id: row.get(0)?,
        pod_id: row.get(1)?,
        conversation_id: row.get(2)?,
        message_id: row.get(3)?,
        rating: enum_column(row, 4, FeedbackRating::parse)?,
        comment: row.get(5)?,
        created_at: time_column(row, 6)?,
    })
}

fn load_org(conn: &Connection, id: &str) -> SqliteResult<Option<Organization>> {
    conn.query_row(
        &format!("SELECT {} FROM organizations WHERE id = ?1", ORG_COLUMNS),
        params![id],
        org_from_row,
    )
    .optional()
}

fn store_org(conn: &Connection, org: &Organization) -> SqliteResult<()> {
    conn.execute(
        r#"
        INSERT INTO organizations
        (id, name, account_type, tier, token_bucket_json, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            account_type = excluded.account_type,
            tier = excluded.tier,
            token_bucket_json = excluded.token_bucket_json,
            updated_at = excluded.updated_at
        "#,
        params![
            org.id,
            org.name,
            org.account_type.as_str(),
            org.tier.as_str(),
            json_text(&org.token_bucket)?,
            org.created_at.to_rfc3339(),
            org.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn store_pod(conn: &Connection, pod: &Pod) -> SqliteResult<()> {
    let quality = pod.knowledge_quality.as_ref().map(json_text).transpose()?;
    conn.execute(
        r#"
        INSERT INTO pods
        (id, org_id, name, knowledge_json, data_sources_json, llm_provider, api_key,
         active_data_source, knowledge_quality_json, chat_enabled, chat_override, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            knowledge_json = excluded.knowledge_json,
            data_sources_json = excluded.data_sources_json,
            llm_provider = excluded.llm_provider,
            api_key = excluded.api_key,
            active_data_source = excluded.active_data_source,
            knowledge_quality_json = excluded.knowledge_quality_json,
            chat_enabled = excluded.chat_enabled,
            chat_override = excluded.chat_override
        WHERE pods.org_id = excluded.org_id
        "#,
        params![
            pod.id,
            pod.org_id,
            pod.name,
            json_text(&pod.knowledge)?,
            json_text(&pod.data_sources)?,
            pod.settings.llm_provider.as_str(),
            pod.settings.api_key,
            pod.settings.active_data_source.as_str(),
            quality,
            pod.chat_enabled,
            pod.chat_override,
            pod.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Rows in insertion order, newest `limit` only
fn recent<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    pod_id: &str,
    limit: usize,
    map: fn(&Row) -> SqliteResult<T>,
) -> SqliteResult<Vec<T>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE pod_id = ?1 ORDER BY rowid DESC LIMIT ?2",
        columns, table
    ))?;
    let mut items = stmt
        .query_map(params![pod_id, limit as i64], map)?
        .collect::<SqliteResult<Vec<T>>>()?;
    items.reverse();
    Ok(items)
}

impl SqliteStorage {
    /// Open (or create) the store at `db_path`; accepts `sqlite:` URLs
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS organizations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                account_type TEXT NOT NULL,
                tier TEXT NOT NULL,
                token_bucket_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pods (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                knowledge_json TEXT NOT NULL,
                data_sources_json TEXT NOT NULL,
                llm_provider TEXT NOT NULL,
                api_key TEXT NOT NULL DEFAULT '',
                active_data_source TEXT NOT NULL,
                knowledge_quality_json TEXT,
                chat_enabled INTEGER NOT NULL DEFAULT 1,
                chat_override INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS dashboards (
                id TEXT PRIMARY KEY,
                pod_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                widgets_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (pod_id) REFERENCES pods(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS knowledge_bank (
                id TEXT PRIMARY KEY,
                pod_id TEXT NOT NULL,
                title TEXT NOT NULL,
                date TEXT NOT NULL,
                highlights TEXT NOT NULL,
                lowlights TEXT NOT NULL,
                doc_text TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (pod_id) REFERENCES pods(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                pod_id TEXT NOT NULL,
                messages_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (pod_id) REFERENCES pods(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                pod_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                rating TEXT NOT NULL,
                comment TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (pod_id) REFERENCES pods(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_pods_org ON pods(org_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_dashboards_pod ON dashboards(pod_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_knowledge_bank_pod ON knowledge_bank(pod_id);
            CREATE INDEX IF NOT EXISTS idx_conversations_pod ON conversations(pod_id, updated_at DESC);
            CREATE INDEX IF NOT EXISTS idx_feedback_pod ON feedback(pod_id);
            "#,
        )?;

        Ok(())
    }

    // ==================== Organizations ====================

    pub async fn create_org(&self, org: &Organization) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        store_org(&conn, org)
    }

    pub async fn get_org(&self, id: &str) -> SqliteResult<Option<Organization>> {
        let conn = self.conn.lock().await;
        load_org(&conn, id)
    }

    pub async fn list_orgs(&self) -> SqliteResult<Vec<Organization>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM organizations ORDER BY created_at DESC", ORG_COLUMNS))?;
        let orgs = stmt.query_map([], org_from_row)?.collect();
        orgs
    }

    /// Read-modify-write an organization under the store lock
    pub async fn modify_org<R>(
        &self,
        id: &str,
        update: impl FnOnce(&mut Organization) -> R,
    ) -> SqliteResult<Option<R>> {
        let conn = self.conn.lock().await;
        let Some(mut org) = load_org(&conn, id)? else {
            return Ok(None);
        };
        let result = update(&mut org);
        store_org(&conn, &org)?;
        Ok(Some(result))
    }

    // ==================== Pods ====================

    /// Insert a pod unless its org already holds `cap` pods; returns whether
    /// it was inserted
    pub async fn create_pod(&self, pod: &Pod, cap: Option<usize>) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        if let Some(cap) = cap {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pods WHERE org_id = ?1",
                params![pod.org_id],
                |row| row.get(0),
            )?;
            if count as usize >= cap {
                return Ok(false);
            }
        }
        store_pod(&conn, pod)?;
        Ok(true)
    }

    pub async fn get_pod(&self, id: &str) -> SqliteResult<Option<Pod>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {} FROM pods WHERE id = ?1", POD_COLUMNS),
            params![id],
            pod_from_row,
        )
        .optional()
    }

    /// A pod together with the organization that owns it
    pub async fn get_pod_with_org(&self, id: &str) -> SqliteResult<Option<(Pod, Organization)>> {
        let conn = self.conn.lock().await;
        let pod = conn
            .query_row(
                &format!("SELECT {} FROM pods WHERE id = ?1", POD_COLUMNS),
                params![id],
                pod_from_row,
            )
            .optional()?;
        let Some(pod) = pod else {
            return Ok(None);
        };
        Ok(load_org(&conn, &pod.org_id)?.map(|org| (pod, org)))
    }

    pub async fn list_pods(&self, org_id: &str) -> SqliteResult<Vec<Pod>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pods WHERE org_id = ?1 ORDER BY created_at, rowid",
            POD_COLUMNS
        ))?;
        let pods = stmt.query_map(params![org_id], pod_from_row)?.collect();
        pods
    }

    pub async fn update_pod(&self, pod: &Pod) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        store_pod(&conn, pod)
    }

    pub async fn delete_pod(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute("DELETE FROM pods WHERE id = ?1", params![id])?;
        Ok(rows_affected > 0)
    }

    // ==================== Dashboards ====================

    pub async fn save_dashboard(&self, dashboard: &Dashboard) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO dashboards
            (id, pod_id, name, description, widgets_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                widgets_json = excluded.widgets_json,
                updated_at = excluded.updated_at
            WHERE dashboards.pod_id = excluded.pod_id
            "#,
            params![
                dashboard.id,
                dashboard.pod_id,
                dashboard.name,
                dashboard.description,
                json_text(&dashboard.widgets)?,
                dashboard.created_at.to_rfc3339(),
                dashboard.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_dashboard(&self, pod_id: &str, id: &str) -> SqliteResult<Option<Dashboard>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {} FROM dashboards WHERE pod_id = ?1 AND id = ?2", DASHBOARD_COLUMNS),
            params![pod_id, id],
            dashboard_from_row,
        )
        .optional()
    }

    /// Dashboards of a pod in creation order
    pub async fn list_dashboards(&self, pod_id: &str) -> SqliteResult<Vec<Dashboard>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dashboards WHERE pod_id = ?1 ORDER BY rowid",
            DASHBOARD_COLUMNS
        ))?;
        let dashboards = stmt.query_map(params![pod_id], dashboard_from_row)?.collect();
        dashboards
    }

    pub async fn delete_dashboard(&self, pod_id: &str, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute(
            "DELETE FROM dashboards WHERE pod_id = ?1 AND id = ?2",
            params![pod_id, id],
        )?;
        Ok(rows_affected > 0)
    }

    // ==================== Knowledge bank ====================

    pub async fn add_bank_entry(&self, entry: &KnowledgeBankEntry) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("INSERT INTO knowledge_bank ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)", BANK_COLUMNS),
            params![
                entry.id,
                entry.pod_id,
                entry.title,
                entry.date,
                entry.highlights,
                entry.lowlights,
                entry.doc_text,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_bank_entries(&self, pod_id: &str) -> SqliteResult<Vec<KnowledgeBankEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM knowledge_bank WHERE pod_id = ?1 ORDER BY rowid",
            BANK_COLUMNS
        ))?;
        let entries = stmt.query_map(params![pod_id], bank_entry_from_row)?.collect();
        entries
    }

    /// The newest `limit` entries, oldest first
    pub async fn recent_bank_entries(&self, pod_id: &str, limit: usize) -> SqliteResult<Vec<KnowledgeBankEntry>> {
        let conn = self.conn.lock().await;
        recent(&conn, "knowledge_bank", BANK_COLUMNS, pod_id, limit, bank_entry_from_row)
    }

    // ==================== Conversations & feedback ====================

    pub async fn get_conversation(&self, pod_id: &str, id: &str) -> SqliteResult<Option<Conversation>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, pod_id, messages_json, created_at, updated_at FROM conversations WHERE pod_id = ?1 AND id = ?2",
            params![pod_id, id],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    pod_id: row.get(1)?,
                    messages: json_column(row, 2)?,
                    created_at: time_column(row, 3)?,
                    updated_at: time_column(row, 4)?,
                })
            },
        )
        .optional()
    }

    /// Insert or update a conversation. A conversation id owned by another
    /// pod is left untouched and `false` is returned.
    pub async fn save_conversation(&self, conversation: &Conversation) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute(
            r#"
            INSERT INTO conversations (id, pod_id, messages_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                messages_json = excluded.messages_json,
                updated_at = excluded.updated_at
            WHERE conversations.pod_id = excluded.pod_id
            "#,
            params![
                conversation.id,
                conversation.pod_id,
                json_text(&conversation.messages)?,
                conversation.created_at.to_rfc3339(),
                conversation.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(rows_affected > 0)
    }

    pub async fn add_feedback(&self, item: &FeedbackItem) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("INSERT INTO feedback ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", FEEDBACK_COLUMNS),
            params![
                item.id,
                item.pod_id,
                item.conversation_id,
                item.message_id,
                item.rating.as_str(),
                item.comment,
                item.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The newest `limit` feedback items, oldest first
    pub async fn recent_feedback(&self, pod_id: &str, limit: usize) -> SqliteResult<Vec<FeedbackItem>> {
        let conn = self.conn.lock().await;
        recent(&conn, "feedback", FEEDBACK_COLUMNS, pod_id, limit, feedback_from_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Aggregation, ChartType, ChatMessage, ChatRole, DashboardWidget, KnowledgeQuality, MetricQuery,
        QualityEvaluator,
    };
    use tempfile::tempdir;
    use tokio_test::block_on;

    fn open(dir: &tempfile::TempDir) -> SqliteStorage {
        block_on(SqliteStorage::new(dir.path().join("test.db"))).unwrap()
    }

    fn seed_org(storage: &SqliteStorage, account_type: AccountType) -> Organization {
        let org = Organization::new("Acme".to_string(), account_type, LicenseTier::default_for(account_type), 20_000);
        block_on(storage.create_org(&org)).unwrap();
        org
    }

    fn seed_pod(storage: &SqliteStorage, org: &Organization) -> Pod {
        let pod = Pod::new(org.id.clone(), "Sales".to_string());
        assert!(block_on(storage.create_pod(&pod, None)).unwrap());
        pod
    }

    #[test]
    fn test_schema_initialization() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);

        let conn = block_on(storage.conn.lock());
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt.query_map([], |row| row.get(0)).unwrap().map(|r| r.unwrap()).collect();

        for table in ["conversations", "dashboards", "feedback", "knowledge_bank", "organizations", "pods"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_sqlite_url_prefix_is_accepted() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("prefixed.db").display());
        assert!(block_on(SqliteStorage::new(url)).is_ok());
    }

    #[test]
    fn test_org_round_trip_and_modify() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let org = seed_org(&storage, AccountType::Business);

        let loaded = block_on(storage.get_org(&org.id)).unwrap().unwrap();
        assert_eq!(loaded.tier, LicenseTier::Business);
        assert_eq!(loaded.token_bucket, org.token_bucket);

        let used = block_on(storage.modify_org(&org.id, |o| {
            o.token_bucket.used += 42;
            o.token_bucket.used
        }))
        .unwrap();
        assert_eq!(used, Some(42));
        assert_eq!(block_on(storage.get_org(&org.id)).unwrap().unwrap().token_bucket.used, 42);

        assert_eq!(block_on(storage.modify_org("missing", |_| ())).unwrap(), None);
        assert_eq!(block_on(storage.list_orgs()).unwrap().len(), 1);
    }

    #[test]
    fn test_pod_round_trip() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let org = seed_org(&storage, AccountType::Business);
        let mut pod = seed_pod(&storage, &org);

        pod.settings.llm_provider = LlmProvider::Gemini;
        pod.settings.api_key = "key".to_string();
        pod.settings.active_data_source = DataSourceKind::MySql;
        pod.data_sources.mysql.connection_string = "mysql://u:p@h/db".to_string();
        pod.knowledge.parameters.business_context = "Retail".to_string();
        pod.knowledge_quality = Some(KnowledgeQuality {
            score: 72,
            notes: "Add metrics".to_string(),
            updated_at: Utc::now(),
            evaluated_by: QualityEvaluator::System,
        });
        pod.chat_enabled = false;
        block_on(storage.update_pod(&pod)).unwrap();

        let loaded = block_on(storage.get_pod(&pod.id)).unwrap().unwrap();
        assert_eq!(loaded.settings.llm_provider, LlmProvider::Gemini);
        assert_eq!(loaded.settings.api_key, "key");
        assert_eq!(loaded.settings.active_data_source, DataSourceKind::MySql);
        assert_eq!(loaded.data_sources.mysql.connection_string, "mysql://u:p@h/db");
        assert_eq!(loaded.knowledge.parameters.business_context, "Retail");
        assert_eq!(loaded.knowledge_quality.map(|q| q.score), Some(72));
        assert!(!loaded.chat_enabled);

        assert!(block_on(storage.get_pod("missing")).unwrap().is_none());

        let (_, owner) = block_on(storage.get_pod_with_org(&pod.id)).unwrap().unwrap();
        assert_eq!(owner.id, org.id);
    }

    #[test]
    fn test_pod_cap_is_enforced() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let org = seed_org(&storage, AccountType::Individual);

        for _ in 0..2 {
            let pod = Pod::new(org.id.clone(), "Pod".to_string());
            assert!(block_on(storage.create_pod(&pod, Some(2))).unwrap());
        }
        let third = Pod::new(org.id.clone(), "Pod".to_string());
        assert!(!block_on(storage.create_pod(&third, Some(2))).unwrap());
        assert_eq!(block_on(storage.list_pods(&org.id)).unwrap().len(), 2);
    }

    #[test]
    fn test_dashboard_crud_and_cascade() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let org = seed_org(&storage, AccountType::Business);
        let pod = seed_pod(&storage, &org);

        let mut dashboard = Dashboard::new(pod.id.clone(), "Revenue".to_string(), None);
        block_on(storage.save_dashboard(&dashboard)).unwrap();

        dashboard.widgets.push(DashboardWidget {
            id: "w1".to_string(),
            title: "Monthly revenue".to_string(),
            description: None,
            chart_type: ChartType::Line,
            query: MetricQuery::new("orders", Aggregation::Sum, "total"),
            show_in_chat: true,
        });
        dashboard.touch();
        block_on(storage.save_dashboard(&dashboard)).unwrap();

        let loaded = block_on(storage.get_dashboard(&pod.id, &dashboard.id)).unwrap().unwrap();
        assert_eq!(loaded.widgets.len(), 1);
        assert_eq!(loaded.widgets[0].query.table, "orders");
        assert!(block_on(storage.get_dashboard("other-pod", &dashboard.id)).unwrap().is_none());

        assert!(block_on(storage.delete_pod(&pod.id)).unwrap());
        assert!(block_on(storage.list_dashboards(&pod.id)).unwrap().is_empty());
    }

    #[test]
    fn test_recent_items_keep_insertion_order() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let org = seed_org(&storage, AccountType::Business);
        let pod = seed_pod(&storage, &org);

        for i in 0..5 {
            let entry = KnowledgeBankEntry::new(
                pod.id.clone(),
                format!("Week {}", i),
                "2024-01-01".to_string(),
                "up".to_string(),
                "down".to_string(),
                None,
            );
            block_on(storage.add_bank_entry(&entry)).unwrap();

            let rating = if i % 2 == 0 { FeedbackRating::Up } else { FeedbackRating::Down };
            let item = FeedbackItem::new(pod.id.clone(), "c".to_string(), format!("m{}", i), rating, None);
            block_on(storage.add_feedback(&item)).unwrap();
        }

        let titles: Vec<String> = block_on(storage.recent_bank_entries(&pod.id, 3))
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["Week 2", "Week 3", "Week 4"]);
        assert_eq!(block_on(storage.list_bank_entries(&pod.id)).unwrap().len(), 5);

        let feedback = block_on(storage.recent_feedback(&pod.id, 3)).unwrap();
        assert_eq!(feedback.len(), 3);
        assert_eq!(feedback[2].message_id, "m4");
        assert_eq!(feedback[2].rating, FeedbackRating::Up);
    }

    #[test]
    fn test_conversation_upsert() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let org = seed_org(&storage, AccountType::Individual);
        let pod = seed_pod(&storage, &org);

        let mut conversation = Conversation::new(pod.id.clone(), None);
        conversation.push(ChatMessage::new(ChatRole::User, "revenue?".to_string()));
        block_on(storage.save_conversation(&conversation)).unwrap();

        conversation.push(ChatMessage::new(ChatRole::Assistant, "- up 10%".to_string()));
        block_on(storage.save_conversation(&conversation)).unwrap();

        let loaded = block_on(storage.get_conversation(&pod.id, &conversation.id)).unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].role, ChatRole::Assistant);
    }

    #[test]
    fn test_child_rows_survive_org_and_pod_updates() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let org = seed_org(&storage, AccountType::Business);
        let mut pod = seed_pod(&storage, &org);

        let dashboard = Dashboard::new(pod.id.clone(), "Revenue".to_string(), None);
        block_on(storage.save_dashboard(&dashboard)).unwrap();
        let entry = KnowledgeBankEntry::new(
            pod.id.clone(),
            "Week 1".to_string(),
            "2024-01-01".to_string(),
            "up".to_string(),
            "down".to_string(),
            None,
        );
        block_on(storage.add_bank_entry(&entry)).unwrap();
        let mut conversation = Conversation::new(pod.id.clone(), None);
        conversation.push(ChatMessage::new(ChatRole::User, "revenue?".to_string()));
        block_on(storage.save_conversation(&conversation)).unwrap();
        let item = FeedbackItem::new(pod.id.clone(), conversation.id.clone(), "m1".to_string(), FeedbackRating::Up, None);
        block_on(storage.add_feedback(&item)).unwrap();

        block_on(storage.modify_org(&org.id, |o| o.token_bucket.used += 10)).unwrap();
        assert_eq!(block_on(storage.list_pods(&org.id)).unwrap().len(), 1);

        pod.settings.api_key = "rotated".to_string();
        block_on(storage.update_pod(&pod)).unwrap();
        assert_eq!(block_on(storage.get_pod(&pod.id)).unwrap().unwrap().settings.api_key, "rotated");

        assert_eq!(block_on(storage.list_dashboards(&pod.id)).unwrap().len(), 1);
        assert_eq!(block_on(storage.list_bank_entries(&pod.id)).unwrap().len(), 1);
        assert!(block_on(storage.get_conversation(&pod.id, &conversation.id)).unwrap().is_some());
        assert_eq!(block_on(storage.recent_feedback(&pod.id, 3)).unwrap().len(), 1);
    }

    #[test]
    fn test_conversation_of_another_pod_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let org = seed_org(&storage, AccountType::Business);
        let pod_a = seed_pod(&storage, &org);
        let pod_b = seed_pod(&storage, &org);

        let mut owned = Conversation::new(pod_a.id.clone(), None);
        owned.push(ChatMessage::new(ChatRole::User, "revenue?".to_string()));
        assert!(block_on(storage.save_conversation(&owned)).unwrap());

        let mut intruder = Conversation::new(pod_b.id.clone(), Some(owned.id.clone()));
        intruder.push(ChatMessage::new(ChatRole::User, "hello".to_string()));
        assert!(!block_on(storage.save_conversation(&intruder)).unwrap());

        let kept = block_on(storage.get_conversation(&pod_a.id, &owned.id)).unwrap().unwrap();
        assert_eq!(kept.messages[0].content, "revenue?");
        assert!(block_on(storage.get_conversation(&pod_b.id, &owned.id)).unwrap().is_none());
    }
}
