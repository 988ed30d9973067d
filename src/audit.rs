//! Audit trail
//!
//! Every state-changing operation emits a record naming the actor, the
//! action and the resource. Delivery is best-effort by design: a failed
//! audit write is logged and swallowed, never surfaced as a failure of
//! the financial operation it documents.

use crate::models::{Actor, Role};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_role: Role,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        actor: Actor,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor.user_id,
            actor_role: actor.role,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Audit delivery seam; the transport is an external collaborator
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Filter for audit queries
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

/// In-memory audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Retrieve records matching a filter, newest first
    pub async fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let records = self.records.read().await;

        let mut matches: Vec<AuditRecord> = records
            .iter()
            .filter(|r| {
                filter.actor_id.map_or(true, |id| r.actor_id == id)
                    && filter.action.as_ref().map_or(true, |a| &r.action == a)
                    && filter
                        .resource_type
                        .as_ref()
                        .map_or(true, |t| &r.resource_type == t)
                    && filter
                        .resource_id
                        .as_ref()
                        .map_or(true, |id| &r.resource_id == id)
                    && filter.after.map_or(true, |t| r.created_at >= t)
                    && filter.before.map_or(true, |t| r.created_at <= t)
            })
            .cloned()
            .collect();

        matches.reverse();
        matches
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuditSink for AuditLog {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }
}
