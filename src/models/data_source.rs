use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum DataSourceKind {
    #[default]
    #[serde(rename = "localSql")]
    LocalSql,
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "firebase")]
    Firebase,
}

impl DataSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceKind::LocalSql => "localSql",
            DataSourceKind::Postgres => "postgres",
            DataSourceKind::MySql => "mysql",
            DataSourceKind::Firebase => "firebase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "localSql" | "local-sql" | "local_sql" => Some(DataSourceKind::LocalSql),
            "postgres" | "postgresql" => Some(DataSourceKind::Postgres),
            "mysql" => Some(DataSourceKind::MySql),
            "firebase" | "firestore" => Some(DataSourceKind::Firebase),
            _ => None,
        }
    }

    /// Human label used in configuration errors
    pub fn label(&self) -> &'static str {
        match self {
            DataSourceKind::LocalSql => "Local SQL",
            DataSourceKind::Postgres => "PostgreSQL",
            DataSourceKind::MySql => "MySQL",
            DataSourceKind::Firebase => "Firebase",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlSource {
    #[serde(default)]
    pub connection_string: String,
    pub updated_at: DateTime<Utc>,
}

impl SqlSource {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            connection_string: String::new(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseSource {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub service_account_json: String,
    /// OAuth bearer token for the Firestore REST API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Connection settings for every data source a pod can switch between
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSources {
    pub local_sql: SqlSource,
    pub postgres: SqlSource,
    pub mysql: SqlSource,
    pub firebase: FirebaseSource,
}

impl Default for DataSources {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            local_sql: SqlSource::empty(now),
            postgres: SqlSource::empty(now),
            mysql: SqlSource::empty(now),
            firebase: FirebaseSource {
                project_id: String::new(),
                service_account_json: String::new(),
                access_token: None,
                updated_at: now,
            },
        }
    }
}

impl DataSources {
    pub fn connection_string(&self, kind: DataSourceKind) -> Option<&str> {
        match kind {
            DataSourceKind::LocalSql => Some(&self.local_sql.connection_string),
            DataSourceKind::Postgres => Some(&self.postgres.connection_string),
            DataSourceKind::MySql => Some(&self.mysql.connection_string),
            DataSourceKind::Firebase => None,
        }
    }

    /// SQL connection strings of `previous` that no source uses any more
    pub fn replaced_connection_strings(&self, previous: &DataSources) -> Vec<String> {
        let current = [
            &self.local_sql.connection_string,
            &self.postgres.connection_string,
            &self.mysql.connection_string,
        ];
        let mut replaced: Vec<String> = Vec::new();
        for old in [
            &previous.local_sql.connection_string,
            &previous.postgres.connection_string,
            &previous.mysql.connection_string,
        ] {
            if !old.is_empty() && !current.contains(&old) && !replaced.contains(old) {
                replaced.push(old.clone());
            }
        }
        replaced
    }

    /// Merge a partial update; omitted fields keep their current values
    pub fn apply(&mut self, update: UpdateDataSourcesRequest) {
        let now = Utc::now();
        let merge = |source: &mut SqlSource, patch: Option<SqlSourcePatch>| {
            if let Some(cs) = patch.and_then(|p| p.connection_string) {
                source.connection_string = cs;
            }
            source.updated_at = now;
        };
        merge(&mut self.local_sql, update.local_sql);
        merge(&mut self.postgres, update.postgres);
        merge(&mut self.mysql, update.mysql);

        if let Some(patch) = update.firebase {
            if let Some(project_id) = patch.project_id {
                self.firebase.project_id = project_id;
            }
            if let Some(json) = patch.service_account_json {
                self.firebase.service_account_json = json;
            }
            if let Some(token) = patch.access_token {
                self.firebase.access_token = Some(token).filter(|t| !t.is_empty());
            }
        }
        self.firebase.updated_at = now;
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlSourcePatch {
    pub connection_string: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseSourcePatch {
    pub project_id: Option<String>,
    pub service_account_json: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDataSourcesRequest {
    pub local_sql: Option<SqlSourcePatch>,
    pub postgres: Option<SqlSourcePatch>,
    pub mysql: Option<SqlSourcePatch>,
    pub firebase: Option<FirebaseSourcePatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSqlConnectionRequest {
    pub connection_string: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFirebaseConnectionRequest {
    pub project_id: Option<String>,
    pub service_account_json: Option<String>,
    pub access_token: Option<String>,
}
