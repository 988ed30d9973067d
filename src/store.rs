//! Core state store and unit of work
//!
//! Every table lives behind one `RwLock`; a held write guard *is* the
//! transaction scope. Ledger-mutating operations validate everything
//! before their first mutation, so a guard-scoped operation either fully
//! applies or leaves nothing behind, and two concurrent approvals of the
//! same resource serialize on the lock; the second observes the
//! post-transition state and fails its guard check.
//!
//! In-memory for now; the guard seam is where a database transaction
//! would slot in.

use crate::balance;
use crate::ledger::Ledger;
use crate::models::{AgentReconciliation, Contributor, OtpRecord, SyncEntry, Withdrawal};
use crate::outbox::OutboxIntent;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// All core tables. Fields are crate-private; services reach them through
/// a guard obtained from [`CoreStore`].
#[derive(Debug, Default)]
pub struct State {
    pub(crate) ledger: Ledger,
    pub(crate) contributors: HashMap<Uuid, Contributor>,
    pub(crate) withdrawals: HashMap<Uuid, Withdrawal>,
    pub(crate) reconciliations: HashMap<Uuid, AgentReconciliation>,
    pub(crate) otps: Vec<OtpRecord>,
    /// Keyed by ledger event id, one queue entry per offline capture
    pub(crate) sync_queue: HashMap<Uuid, SyncEntry>,
    pub(crate) outbox: VecDeque<OutboxIntent>,
}

impl State {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contributor_balance(&self, contributor_id: Uuid) -> i64 {
        balance::contributor_balance(&self.ledger, contributor_id)
    }

    pub(crate) fn agent_unreconciled_balance(&self, agent_id: Uuid) -> i64 {
        let watermark = balance::latest_watermark(self.reconciliations.values(), agent_id);
        balance::agent_unreconciled_balance(&self.ledger, agent_id, watermark)
    }
}

/// Shared handle over the core tables
#[derive(Debug, Default)]
pub struct CoreStore {
    inner: RwLock<State>,
}

impl CoreStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(State::new()),
        })
    }

    /// Read-only view. Not isolated from concurrent writes across calls;
    /// a committed write is always visible to the next read.
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.read().await
    }

    /// Begin a ledger-mutating unit of work. The guard spans the balance
    /// re-check, the event append, and every auxiliary state update.
    pub(crate) async fn begin_write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.write().await
    }
}
