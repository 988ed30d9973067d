//! Withdrawal state machine
//!
//! REQUESTED → OTP_VERIFIED → EXECUTED, with admin rejection as the only
//! other exit. Every transition is guarded by the current state and runs
//! inside one write scope, so a concurrent retry observes the
//! post-transition state and fails instead of double-executing.

use crate::audit::AuditRecord;
use crate::config::SystemConfig;
use crate::error::CoreError;
use crate::ledger::{self, NewEvent};
use crate::models::{
    Actor, CreateWithdrawal, EventKind, OtpPurpose, Role, Withdrawal, WithdrawalState,
};
use crate::otp;
use crate::outbox::OutboxIntent;
use crate::store::CoreStore;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct WithdrawalService {
    store: Arc<CoreStore>,
    config: Arc<SystemConfig>,
}

impl WithdrawalService {
    pub fn new(store: Arc<CoreStore>, config: Arc<SystemConfig>) -> Self {
        Self { store, config }
    }

    /// Open a withdrawal request. Requires the contributor's derived
    /// balance to cover the amount; issues an OTP to the contributor's
    /// phone as a side effect.
    pub async fn create_withdrawal(
        &self,
        actor: Actor,
        input: CreateWithdrawal,
    ) -> Result<Withdrawal> {
        if actor.role != Role::Agent {
            return Err(CoreError::Unauthorized(
                "only agents can request withdrawals".to_string(),
            ));
        }
        if input.amount <= 0 {
            return Err(CoreError::Validation(
                "withdrawal amount must be greater than zero".to_string(),
            ));
        }

        let mut state = self.store.begin_write().await;

        let contributor = state
            .contributors
            .get(&input.contributor_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("contributor {}", input.contributor_id)))?;

        let available = state.contributor_balance(contributor.id);
        if available < input.amount {
            return Err(CoreError::InsufficientBalance {
                available,
                requested: input.amount,
            });
        }

        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            contributor_id: contributor.id,
            agent_id: actor.user_id,
            amount: input.amount,
            state: WithdrawalState::Requested,
            requested_at: Utc::now(),
            otp_verified_at: None,
            approved_by: None,
            approved_at: None,
            executed_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            ledger_event_id: None,
            created_at: Utc::now(),
        };

        otp::issue(
            &mut state,
            &self.config,
            contributor.id,
            withdrawal.id,
            &contributor.phone_number,
            OtpPurpose::Withdrawal,
        );

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "WITHDRAWAL_REQUESTED",
            "WITHDRAWAL",
            withdrawal.id,
            serde_json::json!({
                "contributorId": contributor.id,
                "amount": withdrawal.amount,
            }),
        )));
        state.withdrawals.insert(withdrawal.id, withdrawal.clone());

        info!(
            withdrawal_id = %withdrawal.id,
            contributor_id = %contributor.id,
            agent_id = %actor.user_id,
            amount = withdrawal.amount,
            "withdrawal requested"
        );
        Ok(withdrawal)
    }

    /// REQUESTED → OTP_VERIFIED, guarded by the contributor's code.
    /// Only the requesting agent may verify.
    pub async fn verify_otp(
        &self,
        actor: Actor,
        withdrawal_id: Uuid,
        code: &str,
    ) -> Result<Withdrawal> {
        if actor.role != Role::Agent {
            return Err(CoreError::Unauthorized(
                "only agents can verify a withdrawal OTP".to_string(),
            ));
        }

        let mut state = self.store.begin_write().await;

        let current = state
            .withdrawals
            .get(&withdrawal_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", withdrawal_id)))?;

        if current.agent_id != actor.user_id {
            return Err(CoreError::Unauthorized(
                "this withdrawal belongs to another agent".to_string(),
            ));
        }
        if current.state != WithdrawalState::Requested {
            return Err(CoreError::InvalidState {
                current: current.state.to_string(),
                attempted: WithdrawalState::OtpVerified.to_string(),
            });
        }

        let ok = otp::verify(&mut state, current.contributor_id, withdrawal_id, code)?;
        if !ok {
            let left = otp::attempts_left(&state, current.contributor_id, withdrawal_id);
            return Err(CoreError::Validation(format!(
                "invalid OTP code, {} attempt(s) left",
                left
            )));
        }

        let withdrawal = state
            .withdrawals
            .get_mut(&withdrawal_id)
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", withdrawal_id)))?;
        withdrawal.state = WithdrawalState::OtpVerified;
        withdrawal.otp_verified_at = Some(Utc::now());
        let updated = withdrawal.clone();

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "WITHDRAWAL_OTP_VERIFIED",
            "WITHDRAWAL",
            withdrawal_id,
            serde_json::json!({ "otpVerified": true }),
        )));

        info!(%withdrawal_id, "withdrawal OTP verified");
        Ok(updated)
    }

    /// OTP_VERIFIED → EXECUTED. Admin-only. Re-validates the balance
    /// under the write lock (it may have drifted since the request), then
    /// appends the WITHDRAWAL ledger event and advances the state in the
    /// same scope; partial application is never observable.
    pub async fn approve(&self, actor: Actor, withdrawal_id: Uuid) -> Result<Withdrawal> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized(
                "only admins can approve withdrawals".to_string(),
            ));
        }

        let mut state = self.store.begin_write().await;

        let current = state
            .withdrawals
            .get(&withdrawal_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", withdrawal_id)))?;

        if current.state != WithdrawalState::OtpVerified {
            return Err(CoreError::InvalidState {
                current: current.state.to_string(),
                attempted: WithdrawalState::Executed.to_string(),
            });
        }

        let available = state.contributor_balance(current.contributor_id);
        if available < current.amount {
            return Err(CoreError::InsufficientBalance {
                available,
                requested: current.amount,
            });
        }

        let event = state.ledger.append(NewEvent {
            kind: EventKind::Withdrawal,
            contributor_id: Some(current.contributor_id),
            agent_id: Some(current.agent_id),
            amount: current.amount,
            reference_id: ledger::reference_id("WDL"),
            gps: None,
            device_id: None,
            synced: true,
            created_by: actor.user_id,
        })?;

        let now = Utc::now();
        let withdrawal = state
            .withdrawals
            .get_mut(&withdrawal_id)
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", withdrawal_id)))?;
        withdrawal.state = WithdrawalState::Executed;
        withdrawal.approved_by = Some(actor.user_id);
        withdrawal.approved_at = Some(now);
        withdrawal.executed_at = Some(now);
        withdrawal.ledger_event_id = Some(event.id);
        let updated = withdrawal.clone();

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "WITHDRAWAL_APPROVED",
            "WITHDRAWAL",
            withdrawal_id,
            serde_json::json!({
                "ledgerEventId": event.id,
                "referenceId": event.reference_id,
            }),
        )));

        let phone = state
            .contributors
            .get(&current.contributor_id)
            .map(|c| c.phone_number.clone());
        if let Some(phone) = phone {
            let balance = state.contributor_balance(current.contributor_id);
            state
                .outbox
                .push_back(OutboxIntent::SmsWithdrawalConfirmation {
                    phone,
                    amount: current.amount,
                    balance,
                    reference_id: event.reference_id.clone(),
                });
        }

        info!(
            %withdrawal_id,
            admin_id = %actor.user_id,
            ledger_event_id = %event.id,
            "withdrawal approved and executed"
        );
        Ok(updated)
    }

    /// Terminal rejection with a mandatory reason. No ledger event.
    pub async fn reject(
        &self,
        actor: Actor,
        withdrawal_id: Uuid,
        reason: &str,
    ) -> Result<Withdrawal> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized(
                "only admins can reject withdrawals".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(CoreError::Validation(
                "a rejection reason is required".to_string(),
            ));
        }

        let mut state = self.store.begin_write().await;

        let current = state
            .withdrawals
            .get(&withdrawal_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", withdrawal_id)))?;

        if current.state != WithdrawalState::OtpVerified
            && current.state != WithdrawalState::PendingAdmin
        {
            return Err(CoreError::InvalidState {
                current: current.state.to_string(),
                attempted: WithdrawalState::Rejected.to_string(),
            });
        }

        let withdrawal = state
            .withdrawals
            .get_mut(&withdrawal_id)
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", withdrawal_id)))?;
        withdrawal.state = WithdrawalState::Rejected;
        withdrawal.rejected_by = Some(actor.user_id);
        withdrawal.rejected_at = Some(Utc::now());
        withdrawal.rejection_reason = Some(reason.to_string());
        let updated = withdrawal.clone();

        state.outbox.push_back(OutboxIntent::Audit(AuditRecord::new(
            actor,
            "WITHDRAWAL_REJECTED",
            "WITHDRAWAL",
            withdrawal_id,
            serde_json::json!({ "reason": reason }),
        )));

        info!(%withdrawal_id, admin_id = %actor.user_id, "withdrawal rejected");
        Ok(updated)
    }

    pub async fn get(&self, withdrawal_id: Uuid) -> Result<Withdrawal> {
        let state = self.store.read().await;
        state
            .withdrawals
            .get(&withdrawal_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", withdrawal_id)))
    }

    /// Withdrawals filtered by agent and/or state, newest first
    pub async fn list(
        &self,
        agent_id: Option<Uuid>,
        state_filter: Option<WithdrawalState>,
        limit: usize,
        offset: usize,
    ) -> (Vec<Withdrawal>, usize) {
        let state = self.store.read().await;
        let mut matches: Vec<Withdrawal> = state
            .withdrawals
            .values()
            .filter(|w| {
                agent_id.map_or(true, |id| w.agent_id == id)
                    && state_filter.map_or(true, |s| w.state == s)
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
