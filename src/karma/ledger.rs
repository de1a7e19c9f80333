//! Grant ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::karma::KarmaError;

/// One karma grant. Unique per (submission, recipient, granter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KarmaGrant {
    /// Short submission id (without `t3_`)
    pub submission_id: String,
    pub recipient: String,
    pub granter: String,
    pub granted_at: DateTime<Utc>,
}

impl KarmaGrant {
    pub fn new(submission_id: &str, recipient: &str, granter: &str) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            recipient: recipient.to_string(),
            granter: granter.to_string(),
            granted_at: Utc::now(),
        }
    }

    pub(crate) fn already_awarded(&self) -> KarmaError {
        KarmaError::AlreadyAwarded {
            submission_id: self.submission_id.clone(),
            recipient: self.recipient.clone(),
            granter: self.granter.clone(),
        }
    }
}

#[async_trait]
pub trait GrantLedger: Send + Sync {
    /// Store a grant; a repeat of an existing triple is `AlreadyAwarded`.
    async fn record_grant(&self, grant: &KarmaGrant) -> Result<(), KarmaError>;

    /// Number of grants `recipient` has received
    async fn karma_for(&self, recipient: &str) -> Result<i64, KarmaError>;

    /// Release held resources
    async fn close(&self);
}

/// Process-local ledger used when PostgreSQL is disabled
#[derive(Debug, Default)]
pub struct MemoryGrantLedger {
    grants: RwLock<HashMap<(String, String, String), DateTime<Utc>>>,
}

impl MemoryGrantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.grants.read().await.len()
    }
}

#[async_trait]
impl GrantLedger for MemoryGrantLedger {
    async fn record_grant(&self, grant: &KarmaGrant) -> Result<(), KarmaError> {
        let key = (
            grant.submission_id.clone(),
            grant.recipient.clone(),
            grant.granter.clone(),
        );

        let mut grants = self.grants.write().await;
        if grants.contains_key(&key) {
            return Err(grant.already_awarded());
        }
        grants.insert(key, grant.granted_at);
        Ok(())
    }

    async fn karma_for(&self, recipient: &str) -> Result<i64, KarmaError> {
        let grants = self.grants.read().await;
        let count = grants
            .keys()
            .filter(|(_, name, _)| name == recipient)
            .count();
        Ok(count as i64)
    }

    async fn close(&self) {}
}
