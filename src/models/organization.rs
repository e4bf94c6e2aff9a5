use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of one token-bucket billing window
pub const TOKEN_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Individual,
    Business,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Individual => "INDIVIDUAL",
            AccountType::Business => "BUSINESS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INDIVIDUAL" => Some(AccountType::Individual),
            "BUSINESS" => Some(AccountType::Business),
            _ => None,
        }
    }

    /// Pods an org of this type may hold, `None` when unbounded
    pub fn pod_cap(&self) -> Option<usize> {
        match self {
            AccountType::Individual => Some(2),
            AccountType::Business => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LicenseTier {
    Free,
    Individual,
    Business,
}

impl LicenseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseTier::Free => "FREE",
            LicenseTier::Individual => "INDIVIDUAL",
            LicenseTier::Business => "BUSINESS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FREE" => Some(LicenseTier::Free),
            "INDIVIDUAL" => Some(LicenseTier::Individual),
            "BUSINESS" => Some(LicenseTier::Business),
            _ => None,
        }
    }

    pub fn default_for(account_type: AccountType) -> Self {
        match account_type {
            AccountType::Business => LicenseTier::Business,
            AccountType::Individual => LicenseTier::Free,
        }
    }
}

/// Monthly LLM token quota for an organization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenBucket {
    pub limit: u64,
    pub used: u64,
    pub reset_at: DateTime<Utc>,
}

impl TokenBucket {
    pub fn fresh(limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            used: 0,
            reset_at: now + Duration::days(TOKEN_WINDOW_DAYS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reset_at <= now
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub account_type: AccountType,
    pub tier: LicenseTier,
    pub token_bucket: TokenBucket,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: String, account_type: AccountType, tier: LicenseTier, token_limit: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            account_type,
            tier,
            token_bucket: TokenBucket::fresh(token_limit, now),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_business(&self) -> bool {
        self.account_type == AccountType::Business
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrganizationRequest {
    pub name: Option<String>,
    pub account_type: Option<AccountType>,
    pub tier: Option<LicenseTier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_bucket_window() {
        let now = Utc::now();
        let bucket = TokenBucket::fresh(100, now);
        assert_eq!(bucket.used, 0);
        assert!(!bucket.is_expired(now));
        assert!(bucket.is_expired(now + Duration::days(TOKEN_WINDOW_DAYS)));
    }

    #[test]
    fn test_default_tier_and_pod_cap() {
        assert_eq!(LicenseTier::default_for(AccountType::Business), LicenseTier::Business);
        assert_eq!(LicenseTier::default_for(AccountType::Individual), LicenseTier::Free);
        assert_eq!(AccountType::Individual.pod_cap(), Some(2));
        assert_eq!(AccountType::Business.pod_cap(), None);
    }
}
