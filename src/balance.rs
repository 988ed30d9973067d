//! Balance derivation
//!
//! No balance is ever stored. Everything here is a pure fold over the
//! ordered event stream, so an append invalidates nothing and there is
//! no second copy of the truth to drift.

use crate::ledger::Ledger;
use crate::models::{AgentReconciliation, EventKind, LedgerEvent, ReconciliationStatus};
use uuid::Uuid;

/// Signed contribution of one event to a balance fold.
/// Reconciliation events are liability watermarks, not money movement.
pub fn signed_amount(event: &LedgerEvent) -> i64 {
    match event.kind {
        EventKind::Deposit => event.amount,
        EventKind::Withdrawal | EventKind::Reversal => -event.amount,
        EventKind::Reconciliation => 0,
    }
}

/// A contributor's balance: synced deposits minus synced withdrawals and
/// reversals. Unsynced (offline, not yet replayed) deposits contribute
/// nothing until they are durably recorded as collected.
pub fn contributor_balance(ledger: &Ledger, contributor_id: Uuid) -> i64 {
    ledger
        .iter()
        .filter(|ev| ev.synced && ev.contributor_id == Some(contributor_id))
        .map(signed_amount)
        .sum()
}

/// Sequence-number watermark of the agent's most recent approved
/// reconciliation, or 0 if they have never reconciled. Ties are impossible:
/// the watermark is the seq of the RECONCILIATION event itself.
pub fn latest_watermark<'a, I>(reconciliations: I, agent_id: Uuid) -> u64
where
    I: IntoIterator<Item = &'a AgentReconciliation>,
{
    reconciliations
        .into_iter()
        .filter(|r| r.agent_id == agent_id && r.status == ReconciliationStatus::Approved)
        .filter_map(|r| r.watermark_seq)
        .max()
        .unwrap_or(0)
}

/// The agent's liability: cash collected but not yet handed to an admin.
/// Strictly events *beyond* the watermark count; the reconciliation event
/// itself (and everything before it) is settled history.
pub fn agent_unreconciled_balance(ledger: &Ledger, agent_id: Uuid, watermark: u64) -> i64 {
    ledger
        .iter()
        .filter(|ev| {
            ev.synced
                && ev.agent_id == Some(agent_id)
                && ev.kind != EventKind::Reconciliation
                && ev.seq > watermark
        })
        .map(signed_amount)
        .sum()
}

/// Circuit breaker predicate: deposits stop once liability hits the limit.
pub fn is_locked(unreconciled_balance: i64, limit: i64) -> bool {
    unreconciled_balance >= limit
}
