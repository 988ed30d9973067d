//! Contributor onboarding and lookups
//!
//! A contributor is created once, bound 1:1 to a physical QR card by the
//! card payload's SHA-256 hash. Phone number and QR hash are identity
//! anchors and never change.

use crate::audit::AuditRecord;
use crate::error::CoreError;
use crate::ledger::EventFilter;
use crate::models::{Actor, Contributor, LedgerEvent, OnboardContributor, Role};
use crate::outbox::OutboxIntent;
use crate::store::CoreStore;
use crate::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Derive the stored QR hash from a physical card payload
pub fn qr_hash(card_payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(card_payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct ContributorService {
    store: Arc<CoreStore>,
}

impl ContributorService {
    pub fn new(store: Arc<CoreStore>) -> Self {
        Self { store }
    }

    /// Onboard a new contributor. Agent-only; phone number and QR card
    /// must both be unused.
    pub async fn onboard(&self, actor: Actor, input: OnboardContributor) -> Result<Contributor> {
        if actor.role != Role::Agent {
            return Err(CoreError::Unauthorized(
                "only agents can onboard contributors".to_string(),
            ));
        }
        if input.full_name.trim().is_empty() {
            return Err(CoreError::Validation("full name is required".to_string()));
        }
        if input.phone_number.trim().is_empty() {
            return Err(CoreError::Validation("phone number is required".to_string()));
        }

        let hash = qr_hash(&input.card_payload);

        let mut state = self.store.begin_write().await;

        if state
            .contributors
            .values()
            .any(|c| c.phone_number == input.phone_number)
        {
            return Err(CoreError::Validation(format!(
                "phone number already registered: {}",
                input.phone_number
            )));
        }
        if state.contributors.values().any(|c| c.qr_hash == hash) {
            return Err(CoreError::Validation(
                "QR card is already bound to another contributor".to_string(),
            ));
        }

        let contributor = Contributor {
            id: Uuid::new_v4(),
            full_name: input.full_name,
            phone_number: input.phone_number,
            qr_hash: hash,
            is_active: true,
            onboarded_by_agent_id: actor.user_id,
            created_at: Utc::now(),
        };

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "CONTRIBUTOR_ONBOARDED",
            "CONTRIBUTOR",
            contributor.id,
            serde_json::json!({
                "fullName": contributor.full_name,
                "phoneNumber": contributor.phone_number,
            }),
        )));
        state.contributors.insert(contributor.id, contributor.clone());

        info!(
            contributor_id = %contributor.id,
            agent_id = %actor.user_id,
            "contributor onboarded"
        );
        Ok(contributor)
    }

    pub async fn get(&self, contributor_id: Uuid) -> Result<Contributor> {
        let state = self.store.read().await;
        state
            .contributors
            .get(&contributor_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("contributor {}", contributor_id)))
    }

    /// Lookup by scanned QR hash
    pub async fn find_by_qr(&self, qr_hash: &str) -> Option<Contributor> {
        let state = self.store.read().await;
        state
            .contributors
            .values()
            .find(|c| c.qr_hash == qr_hash)
            .cloned()
    }

    /// Derived balance over the contributor's synced ledger events
    pub async fn balance(&self, contributor_id: Uuid) -> Result<i64> {
        let state = self.store.read().await;
        if !state.contributors.contains_key(&contributor_id) {
            return Err(CoreError::NotFound(format!("contributor {}", contributor_id)));
        }
        Ok(state.contributor_balance(contributor_id))
    }

    /// Full transaction history, newest first. Unsynced events appear
    /// here even though they are excluded from the balance.
    pub async fn statement(&self, contributor_id: Uuid) -> Result<Vec<LedgerEvent>> {
        let state = self.store.read().await;
        if !state.contributors.contains_key(&contributor_id) {
            return Err(CoreError::NotFound(format!("contributor {}", contributor_id)));
        }
        Ok(state.ledger.query(&EventFilter {
            contributor_id: Some(contributor_id),
            descending: true,
            ..Default::default()
        }))
    }
}
