// Per-organization LLM token accounting
use crate::config::BillingConfig;
use crate::models::{LicenseTier, Organization, TokenBucket};
use chrono::{DateTime, Utc};

/// Rough token count: one token per four UTF-16 code units, at least one
/// for non-empty text
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let units = text.encode_utf16().count() as u64;
    units.div_ceil(4).max(1)
}

#[derive(Debug, Clone)]
pub struct UsageService {
    billing: BillingConfig,
}

impl UsageService {
    pub fn new(billing: BillingConfig) -> Self {
        Self { billing }
    }

    pub fn token_limit(&self, tier: LicenseTier) -> u64 {
        match tier {
            LicenseTier::Free => self.billing.free_token_limit,
            LicenseTier::Individual => self.billing.individual_token_limit,
            LicenseTier::Business => self.billing.business_token_limit,
        }
    }

    pub fn fresh_bucket(&self, tier: LicenseTier, now: DateTime<Utc>) -> TokenBucket {
        TokenBucket::fresh(self.token_limit(tier), now)
    }

    /// Bucket as it stands at `now`, after any pending reset
    fn current_bucket(&self, org: &Organization, now: DateTime<Utc>) -> TokenBucket {
        if org.token_bucket.is_expired(now) {
            self.fresh_bucket(org.tier, now)
        } else {
            org.token_bucket.clone()
        }
    }

    /// Start a new window once `resetAt` has passed; returns whether it did
    pub fn reset_if_needed(&self, org: &mut Organization, now: DateTime<Utc>) -> bool {
        if !org.token_bucket.is_expired(now) {
            return false;
        }
        tracing::info!("Resetting token bucket for org {}", org.id);
        org.token_bucket = self.fresh_bucket(org.tier, now);
        true
    }

    pub fn can_use_tokens(&self, org: &Organization, tokens: u64, now: DateTime<Utc>) -> bool {
        let bucket = self.current_bucket(org, now);
        bucket.used.saturating_add(tokens) <= bucket.limit
    }

    pub fn consume_tokens(&self, org: &mut Organization, tokens: u64, now: DateTime<Utc>) {
        self.reset_if_needed(org, now);
        org.token_bucket.used = org.token_bucket.used.saturating_add(tokens);
        org.touch();
        tracing::debug!(
            "Org {} used {} tokens ({}/{})",
            org.id,
            tokens,
            org.token_bucket.used,
            org.token_bucket.limit
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountType;
    use chrono::Duration;

    fn usage() -> UsageService {
        UsageService::new(BillingConfig {
            free_token_limit: 100,
            individual_token_limit: 1_000,
            business_token_limit: 10_000,
        })
    }

    fn org(tier: LicenseTier) -> Organization {
        let service = usage();
        Organization::new("Acme".to_string(), AccountType::Individual, tier, service.token_limit(tier))
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
        // Astral-plane characters count as two code units
        assert_eq!(estimate_tokens("\u{1F4C8}\u{1F4C8}\u{1F4C8}"), 2);
        assert_eq!(estimate_tokens("\u{e9}\u{e9}\u{e9}\u{e9}"), 1);
    }

    #[test]
    fn test_limits_follow_tier() {
        let service = usage();
        assert_eq!(service.token_limit(LicenseTier::Free), 100);
        assert_eq!(service.token_limit(LicenseTier::Individual), 1_000);
        assert_eq!(service.token_limit(LicenseTier::Business), 10_000);
    }

    #[test]
    fn test_can_use_up_to_limit() {
        let service = usage();
        let mut org = org(LicenseTier::Free);
        let now = Utc::now();

        assert!(service.can_use_tokens(&org, 100, now));
        assert!(!service.can_use_tokens(&org, 101, now));

        service.consume_tokens(&mut org, 60, now);
        assert_eq!(org.token_bucket.used, 60);
        assert!(service.can_use_tokens(&org, 40, now));
        assert!(!service.can_use_tokens(&org, 41, now));
    }

    #[test]
    fn test_expired_bucket_resets_before_use() {
        let service = usage();
        let mut org = org(LicenseTier::Free);
        let now = Utc::now();
        org.token_bucket.used = 100;
        org.token_bucket.reset_at = now - Duration::seconds(1);

        assert!(service.can_use_tokens(&org, 50, now));
        // checking does not mutate
        assert_eq!(org.token_bucket.used, 100);

        service.consume_tokens(&mut org, 10, now);
        assert_eq!(org.token_bucket.used, 10);
        assert!(org.token_bucket.reset_at > now + Duration::days(29));
    }

    #[test]
    fn test_reset_if_needed_only_when_due() {
        let service = usage();
        let mut org = org(LicenseTier::Individual);
        let now = Utc::now();
        org.token_bucket.used = 5;

        assert!(!service.reset_if_needed(&mut org, now));
        assert_eq!(org.token_bucket.used, 5);

        org.token_bucket.reset_at = now;
        assert!(service.reset_if_needed(&mut org, now));
        assert_eq!(org.token_bucket.used, 0);
        assert_eq!(org.token_bucket.limit, 1_000);
    }
}
