//! Reconciliation protocol
//!
//! An agent presents cash against their system-computed liability; an
//! admin approves or rejects. Approval appends a RECONCILIATION event
//! whose sequence number becomes the new liability watermark. History is
//! never mutated; the fold just starts later.

use crate::audit::AuditRecord;
use crate::error::CoreError;
use crate::ledger::{self, NewEvent};
use crate::models::{Actor, AgentReconciliation, EventKind, ReconciliationStatus, Role};
use crate::outbox::OutboxIntent;
use crate::store::CoreStore;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<CoreStore>,
}

impl ReconciliationService {
    pub fn new(store: Arc<CoreStore>) -> Self {
        Self { store }
    }

    /// Liability an agent currently holds against the system
    pub async fn unreconciled_balance(&self, agent_id: Uuid) -> i64 {
        let state = self.store.read().await;
        state.agent_unreconciled_balance(agent_id)
    }

    /// Open a reconciliation request against the live unreconciled
    /// balance. A cash/balance discrepancy is recorded for the admin to
    /// judge; it never blocks creation.
    pub async fn create_reconciliation(
        &self,
        actor: Actor,
        cash_amount_presented: i64,
        notes: Option<String>,
    ) -> Result<AgentReconciliation> {
        if actor.role != Role::Agent {
            return Err(CoreError::Unauthorized(
                "only agents can request reconciliation".to_string(),
            ));
        }
        if cash_amount_presented < 0 {
            return Err(CoreError::Validation(
                "cash amount cannot be negative".to_string(),
            ));
        }

        let mut state = self.store.begin_write().await;

        let balance = state.agent_unreconciled_balance(actor.user_id);
        if balance <= 0 {
            return Err(CoreError::NothingToReconcile { balance });
        }

        let reconciliation = AgentReconciliation {
            id: Uuid::new_v4(),
            agent_id: actor.user_id,
            unreconciled_balance_before: balance,
            cash_amount_presented,
            // Liability is defined by the ledger, never by the cash an
            // agent claims to be holding.
            reconciled_amount: balance,
            discrepancy: cash_amount_presented - balance,
            status: ReconciliationStatus::Pending,
            notes,
            reconciled_by: None,
            reconciled_at: None,
            watermark_seq: None,
            created_at: Utc::now(),
        };

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "RECONCILIATION_REQUESTED",
            "RECONCILIATION",
            reconciliation.id,
            serde_json::json!({
                "unreconciledBalanceBefore": balance,
                "cashAmountPresented": cash_amount_presented,
                "discrepancy": reconciliation.discrepancy,
            }),
        )));
        state
            .reconciliations
            .insert(reconciliation.id, reconciliation.clone());

        info!(
            reconciliation_id = %reconciliation.id,
            agent_id = %actor.user_id,
            unreconciled_balance = balance,
            cash_amount_presented,
            discrepancy = reconciliation.discrepancy,
            "reconciliation requested"
        );
        Ok(reconciliation)
    }

    /// PENDING → APPROVED. Appends the RECONCILIATION ledger event and
    /// stamps its sequence as the agent's new watermark, atomically with
    /// the status change. The agent is unlocked for everything after it.
    pub async fn approve(
        &self,
        actor: Actor,
        reconciliation_id: Uuid,
    ) -> Result<AgentReconciliation> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized(
                "only admins can approve reconciliations".to_string(),
            ));
        }

        let mut state = self.store.begin_write().await;

        let current = state
            .reconciliations
            .get(&reconciliation_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!("reconciliation {}", reconciliation_id))
            })?;

        if current.status != ReconciliationStatus::Pending {
            return Err(CoreError::InvalidState {
                current: current.status.to_string(),
                attempted: ReconciliationStatus::Approved.to_string(),
            });
        }

        let event = state.ledger.append(NewEvent {
            kind: EventKind::Reconciliation,
            contributor_id: None,
            agent_id: Some(current.agent_id),
            amount: current.reconciled_amount,
            reference_id: ledger::reference_id("REC"),
            gps: None,
            device_id: None,
            synced: true,
            created_by: actor.user_id,
        })?;

        let reconciliation = state
            .reconciliations
            .get_mut(&reconciliation_id)
            .ok_or_else(|| {
                CoreError::NotFound(format!("reconciliation {}", reconciliation_id))
            })?;
        reconciliation.status = ReconciliationStatus::Approved;
        reconciliation.reconciled_by = Some(actor.user_id);
        reconciliation.reconciled_at = Some(Utc::now());
        reconciliation.watermark_seq = Some(event.seq);
        let updated = reconciliation.clone();

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "RECONCILIATION_APPROVED",
            "RECONCILIATION",
            reconciliation_id,
            serde_json::json!({
                "agentId": updated.agent_id,
                "reconciledAmount": updated.reconciled_amount,
                "discrepancy": updated.discrepancy,
                "referenceId": event.reference_id,
            }),
        )));

        info!(
            %reconciliation_id,
            admin_id = %actor.user_id,
            agent_id = %updated.agent_id,
            watermark_seq = event.seq,
            "reconciliation approved"
        );
        Ok(updated)
    }

    /// PENDING → REJECTED. The watermark is unchanged; a locked agent
    /// stays locked.
    pub async fn reject(
        &self,
        actor: Actor,
        reconciliation_id: Uuid,
        reason: &str,
    ) -> Result<AgentReconciliation> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized(
                "only admins can reject reconciliations".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(CoreError::Validation(
                "a rejection reason is required".to_string(),
            ));
        }

        let mut state = self.store.begin_write().await;

        let reconciliation = state
            .reconciliations
            .get_mut(&reconciliation_id)
            .ok_or_else(|| {
                CoreError::NotFound(format!("reconciliation {}", reconciliation_id))
            })?;

        if reconciliation.status != ReconciliationStatus::Pending {
            return Err(CoreError::InvalidState {
                current: reconciliation.status.to_string(),
                attempted: ReconciliationStatus::Rejected.to_string(),
            });
        }

        reconciliation.status = ReconciliationStatus::Rejected;
        reconciliation.reconciled_by = Some(actor.user_id);
        reconciliation.reconciled_at = Some(Utc::now());
        reconciliation.notes = Some(reason.to_string());
        let updated = reconciliation.clone();

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "RECONCILIATION_REJECTED",
            "RECONCILIATION",
            reconciliation_id,
            serde_json::json!({ "reason": reason }),
        )));

        info!(%reconciliation_id, admin_id = %actor.user_id, "reconciliation rejected");
        Ok(updated)
    }

    /// Reconciliations filtered by agent and/or status, newest first
    pub async fn list(
        &self,
        agent_id: Option<Uuid>,
        status: Option<ReconciliationStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<AgentReconciliation>, usize) {
        let state = self.store.read().await;
        let mut matches: Vec<AgentReconciliation> = state
            .reconciliations
            .values()
            .filter(|r| {
                agent_id.map_or(true, |id| r.agent_id == id)
                    && status.map_or(true, |s| r.status == s)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matches.len();
        (
            matches.into_iter().skip(offset).take(limit).collect(),
            total,
        )
    }
}
