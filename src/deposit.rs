//! Deposit intake and offline replay
//!
//! Deposits pass the scanner-gate rule (scanned QR must match the target
//! contributor), the GPS requirement, and the circuit breaker before they
//! reach the ledger. Offline captures land unsynced, exempt from the
//! breaker until replay, and are queued for the sync worker.

use crate::audit::AuditRecord;
use crate::balance;
use crate::config::SystemConfig;
use crate::error::CoreError;
use crate::ledger::{self, EventFilter, NewEvent};
use crate::models::{
    Actor, CreateDeposit, DepositReceipt, EventKind, LedgerEvent, Role, SyncEntry, SyncStatus,
};
use crate::outbox::OutboxIntent;
use crate::store::CoreStore;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct DepositService {
    store: Arc<CoreStore>,
    config: Arc<SystemConfig>,
}

impl DepositService {
    pub fn new(store: Arc<CoreStore>, config: Arc<SystemConfig>) -> Self {
        Self { store, config }
    }

    /// Record a cash deposit. Online deposits (`synced = true`) are gated
    /// by the circuit breaker and rejected outright when the agent is
    /// locked; offline captures are accepted unsynced and gated at replay.
    pub async fn create_deposit(
        &self,
        actor: Actor,
        input: CreateDeposit,
    ) -> Result<DepositReceipt> {
        if actor.role != Role::Agent {
            return Err(CoreError::Unauthorized(
                "only agents can create deposits".to_string(),
            ));
        }
        if input.amount <= 0 {
            return Err(CoreError::Validation(
                "deposit amount must be greater than zero".to_string(),
            ));
        }
        if self.config.gps_required && input.gps.is_none() {
            return Err(CoreError::Validation(
                "GPS location is required for deposits".to_string(),
            ));
        }

        let mut state = self.store.begin_write().await;

        let contributor = state
            .contributors
            .get(&input.contributor_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("contributor {}", input.contributor_id)))?;
        if !contributor.is_active {
            return Err(CoreError::Validation(
                "contributor account is inactive".to_string(),
            ));
        }

        // Scanner-gate rule
        if contributor.qr_hash != input.qr_hash {
            return Err(CoreError::Validation(
                "QR code does not match contributor. Scan the correct QR card.".to_string(),
            ));
        }

        // Circuit breaker applies only when recording as synced
        if input.synced {
            let balance = state.agent_unreconciled_balance(actor.user_id);
            if balance::is_locked(balance, self.config.circuit_breaker_limit) {
                return Err(CoreError::AgentLocked {
                    balance,
                    limit: self.config.circuit_breaker_limit,
                });
            }
        }

        let event = state.ledger.append(NewEvent {
            kind: EventKind::Deposit,
            contributor_id: Some(contributor.id),
            agent_id: Some(actor.user_id),
            amount: input.amount,
            reference_id: ledger::reference_id("DEP"),
            gps: input.gps,
            device_id: input.device_id.clone(),
            synced: input.synced,
            created_by: actor.user_id,
        })?;

        if !input.synced {
            let now = Utc::now();
            state.sync_queue.insert(
                event.id,
                SyncEntry {
                    id: Uuid::new_v4(),
                    ledger_event_id: event.id,
                    agent_id: actor.user_id,
                    device_id: input.device_id,
                    status: SyncStatus::Pending,
                    retry_count: 0,
                    max_retries: self.config.sync_max_retries,
                    last_retry_at: None,
                    error_message: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "DEPOSIT_CREATED",
            "LEDGER_EVENT",
            event.id,
            serde_json::json!({
                "contributorId": contributor.id,
                "amount": event.amount,
                "referenceId": event.reference_id,
                "synced": event.synced,
            }),
        )));

        if event.synced {
            let balance = state.contributor_balance(contributor.id);
            state
                .outbox
                .push_back(OutboxIntent::SmsDepositConfirmation {
                    phone: contributor.phone_number.clone(),
                    amount: event.amount,
                    balance,
                    reference_id: event.reference_id.clone(),
                });
        }

        info!(
            event_id = %event.id,
            contributor_id = %contributor.id,
            agent_id = %actor.user_id,
            amount = event.amount,
            synced = event.synced,
            reference_id = %event.reference_id,
            "deposit created"
        );

        Ok(DepositReceipt {
            event_id: event.id,
            contributor_id: contributor.id,
            amount: event.amount,
            reference_id: event.reference_id,
            gps: event.gps,
            synced: event.synced,
            synced_at: event.synced_at,
            created_at: event.created_at,
        })
    }

    /// Replay an offline deposit into the synced ledger. Idempotent
    /// against duplicate triggers; the circuit breaker is re-evaluated at
    /// replay time and a locked agent leaves the event unsynced.
    pub async fn sync_deposit(&self, ledger_event_id: Uuid) -> Result<()> {
        let mut state = self.store.begin_write().await;

        let event = state
            .ledger
            .get(ledger_event_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("ledger event {}", ledger_event_id)))?;

        if event.synced {
            // Duplicate trigger; repair a stale queue entry if one exists
            if let Some(entry) = state.sync_queue.get_mut(&ledger_event_id) {
                if entry.status != SyncStatus::Synced {
                    entry.status = SyncStatus::Synced;
                    entry.updated_at = Utc::now();
                }
            }
            debug!(%ledger_event_id, "deposit already synced");
            return Ok(());
        }

        // Breaker re-check at replay time
        if let Some(agent_id) = event.agent_id {
            let balance = state.agent_unreconciled_balance(agent_id);
            if balance::is_locked(balance, self.config.circuit_breaker_limit) {
                let limit = self.config.circuit_breaker_limit;
                if let Some(entry) = state.sync_queue.get_mut(&ledger_event_id) {
                    entry.retry_count += 1;
                    entry.last_retry_at = Some(Utc::now());
                    entry.updated_at = Utc::now();
                    entry.error_message =
                        Some(format!("agent locked: balance ₦{} at limit ₦{}", balance, limit));
                    if entry.retry_count >= entry.max_retries {
                        entry.status = SyncStatus::Failed;
                        warn!(
                            %ledger_event_id,
                            agent_id = %agent_id,
                            retries = entry.retry_count,
                            "sync retries exhausted, entry marked FAILED"
                        );
                    } else {
                        entry.status = SyncStatus::Pending;
                    }
                }
                return Err(CoreError::AgentLocked { balance, limit });
            }
        }

        let stale_hours = (Utc::now() - event.created_at).num_hours();
        if stale_hours > self.config.max_offline_hours {
            warn!(
                %ledger_event_id,
                stale_hours,
                max_offline_hours = self.config.max_offline_hours,
                "syncing a capture older than the offline window"
            );
        }

        let event = state.ledger.mark_synced(ledger_event_id)?;
        if let Some(entry) = state.sync_queue.get_mut(&ledger_event_id) {
            entry.status = SyncStatus::Synced;
            entry.updated_at = Utc::now();
            entry.error_message = None;
        }

        if let Some(agent_id) = event.agent_id {
            state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
                Actor::agent(agent_id),
                "DEPOSIT_SYNCED",
                "LEDGER_EVENT",
                event.id,
                serde_json::json!({ "referenceId": event.reference_id }),
            )));
        }
        if let Some(contributor_id) = event.contributor_id {
            let phone = state
                .contributors
                .get(&contributor_id)
                .map(|c| c.phone_number.clone());
            if let Some(phone) = phone {
                let balance = state.contributor_balance(contributor_id);
                state
                    .outbox
                    .push_back(OutboxIntent::SmsDepositConfirmation {
                        phone,
                        amount: event.amount,
                        balance,
                        reference_id: event.reference_id.clone(),
                    });
            }
        }

        info!(%ledger_event_id, "deposit synced");
        Ok(())
    }

    /// Deposits recorded by an agent, newest first
    pub async fn agent_deposits(
        &self,
        agent_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> (Vec<LedgerEvent>, usize) {
        let state = self.store.read().await;
        let all = state.ledger.query(&EventFilter {
            agent_id: Some(agent_id),
            kind: Some(EventKind::Deposit),
            descending: true,
            ..Default::default()
        });
        let total = all.len();
        (all.into_iter().skip(offset).take(limit).collect(), total)
    }
}
