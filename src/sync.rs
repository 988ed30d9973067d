//! Offline sync queue worker
//!
//! Replays offline-captured deposits when connectivity returns, on a
//! fixed interval. Each replay re-checks the circuit breaker; retries are
//! bounded, and an entry that exhausts them is marked FAILED and left for
//! the agent to resolve by reconciling.

use crate::config::SystemConfig;
use crate::deposit::DepositService;
use crate::error::CoreError;
use crate::models::{SyncEntry, SyncStatus};
use crate::store::CoreStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one drain pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub locked: usize,
    pub failed: usize,
}

pub struct SyncWorker {
    store: Arc<CoreStore>,
    deposits: DepositService,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(store: Arc<CoreStore>, deposits: DepositService, config: &SystemConfig) -> Self {
        Self {
            store,
            deposits,
            interval: Duration::from_secs(config.sync_retry_interval_minutes * 60),
        }
    }

    /// Attempt every pending entry once. Entries whose agent is locked
    /// stay queued with their retry count charged; anything else that
    /// fails is marked FAILED outright.
    pub async fn run_once(&self) -> SyncReport {
        let candidates: Vec<Uuid> = {
            let state = self.store.read().await;
            state
                .sync_queue
                .values()
                .filter(|e| e.status == SyncStatus::Pending)
                .map(|e| e.ledger_event_id)
                .collect()
        };

        if candidates.is_empty() {
            return SyncReport::default();
        }
        debug!(count = candidates.len(), "sync pass starting");

        let mut report = SyncReport::default();
        for event_id in candidates {
            {
                let mut state = self.store.begin_write().await;
                if let Some(entry) = state.sync_queue.get_mut(&event_id) {
                    entry.status = SyncStatus::Syncing;
                    entry.updated_at = Utc::now();
                }
            }

            match self.deposits.sync_deposit(event_id).await {
                Ok(()) => report.synced += 1,
                Err(CoreError::AgentLocked { .. }) => {
                    // Retry bookkeeping happened inside the sync scope;
                    // the entry is Pending again or Failed at the ceiling.
                    let state = self.store.read().await;
                    match state.sync_queue.get(&event_id).map(|e| e.status) {
                        Some(SyncStatus::Failed) => report.failed += 1,
                        _ => report.locked += 1,
                    }
                }
                Err(e) => {
                    warn!(%event_id, error = %e, "sync failed");
                    let mut state = self.store.begin_write().await;
                    if let Some(entry) = state.sync_queue.get_mut(&event_id) {
                        entry.status = SyncStatus::Failed;
                        entry.error_message = Some(e.to_string());
                        entry.updated_at = Utc::now();
                    }
                    report.failed += 1;
                }
            }
        }

        info!(
            synced = report.synced,
            locked = report.locked,
            failed = report.failed,
            "sync pass complete"
        );
        report
    }

    /// Run the replay loop until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    /// Entries awaiting replay for an agent
    pub async fn pending_entries(&self, agent_id: Uuid) -> Vec<SyncEntry> {
        self.entries_with_status(agent_id, SyncStatus::Pending).await
    }

    /// Entries that exhausted their retries, surfaced for manual
    /// resolution
    pub async fn failed_entries(&self, agent_id: Uuid) -> Vec<SyncEntry> {
        self.entries_with_status(agent_id, SyncStatus::Failed).await
    }

    async fn entries_with_status(&self, agent_id: Uuid, status: SyncStatus) -> Vec<SyncEntry> {
        let state = self.store.read().await;
        state
            .sync_queue
            .values()
            .filter(|e| e.agent_id == agent_id && e.status == status)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contributor::ContributorService;
    use crate::models::{Actor, CreateDeposit, GpsFix, OnboardContributor};

    fn gps() -> Option<GpsFix> {
        Some(GpsFix {
            latitude: 6.5244,
            longitude: 3.3792,
            accuracy: Some(5.0),
        })
    }

    async fn setup(limit: i64, max_retries: u32) -> (SyncWorker, DepositService, Actor, Uuid) {
        let store = CoreStore::new();
        let config = Arc::new(SystemConfig {
            circuit_breaker_limit: limit,
            sync_max_retries: max_retries,
            ..SystemConfig::default()
        });
        let deposits = DepositService::new(store.clone(), config.clone());
        let contributors = ContributorService::new(store.clone());
        let worker = SyncWorker::new(store, deposits.clone(), &config);

        let agent = Actor::agent(Uuid::new_v4());
        let contributor = contributors
            .onboard(
                agent,
                OnboardContributor {
                    full_name: "Chika Obi".to_string(),
                    phone_number: format!("+234801{}", rand::random::<u32>() % 1_000_000),
                    card_payload: format!("CARD-{}", Uuid::new_v4()),
                },
            )
            .await
            .unwrap();

        (worker, deposits, agent, contributor.id)
    }

    fn offline_deposit(contributor_id: Uuid, amount: i64) -> CreateDeposit {
        CreateDeposit {
            contributor_id,
            qr_hash: String::new(), // filled by callers
            amount,
            gps: gps(),
            device_id: Some("device-1".to_string()),
            synced: false,
        }
    }

    #[tokio::test]
    async fn pending_entries_sync_on_a_pass() {
        let (worker, deposits, agent, contributor_id) = setup(100_000, 10).await;
        let hash = {
            let state = worker.store.read().await;
            state.contributors[&contributor_id].qr_hash.clone()
        };

        let mut input = offline_deposit(contributor_id, 2_000);
        input.qr_hash = hash;
        let receipt = deposits.create_deposit(agent, input).await.unwrap();
        assert!(!receipt.synced);

        let report = worker.run_once().await;
        assert_eq!(report, SyncReport { synced: 1, locked: 0, failed: 0 });

        let state = worker.store.read().await;
        assert!(state.ledger.get(receipt.event_id).unwrap().synced);
        assert_eq!(
            state.sync_queue[&receipt.event_id].status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn locked_agent_entries_retry_then_fail_at_the_ceiling() {
        let (worker, deposits, agent, contributor_id) = setup(5_000, 2).await;
        let hash = {
            let state = worker.store.read().await;
            state.contributors[&contributor_id].qr_hash.clone()
        };

        // Offline capture while under the limit
        let mut offline = offline_deposit(contributor_id, 1_000);
        offline.qr_hash = hash.clone();
        let receipt = deposits.create_deposit(agent, offline).await.unwrap();

        // Agent then reaches the limit through synced deposits
        let mut online = offline_deposit(contributor_id, 5_000);
        online.qr_hash = hash;
        online.synced = true;
        deposits.create_deposit(agent, online).await.unwrap();

        let first = worker.run_once().await;
        assert_eq!(first.locked, 1);
        {
            let state = worker.store.read().await;
            assert!(!state.ledger.get(receipt.event_id).unwrap().synced);
            assert_eq!(state.sync_queue[&receipt.event_id].retry_count, 1);
        }

        let second = worker.run_once().await;
        assert_eq!(second.failed, 1);
        assert_eq!(worker.failed_entries(agent.user_id).await.len(), 1);

        // A FAILED entry is no longer retried
        let third = worker.run_once().await;
        assert_eq!(third, SyncReport::default());
    }
}
