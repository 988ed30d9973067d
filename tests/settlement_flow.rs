//! End-to-end settlement flows: deposits, the withdrawal lifecycle,
//! circuit breaker lock and release, and offline replay.

use std::sync::Arc;
use thrift_settlement_core::{
    config::SystemConfig,
    contributor::ContributorService,
    deposit::DepositService,
    error::CoreError,
    models::{
        Actor, CreateDeposit, CreateWithdrawal, EventKind, GpsFix, OnboardContributor,
        ReconciliationStatus, WithdrawalState,
    },
    otp::OtpService,
    reconciliation::ReconciliationService,
    store::CoreStore,
    withdrawal::WithdrawalService,
};
use uuid::Uuid;

struct Harness {
    contributors: ContributorService,
    deposits: DepositService,
    withdrawals: WithdrawalService,
    reconciliations: ReconciliationService,
    otps: OtpService,
    agent: Actor,
    admin: Actor,
}

fn harness_with(config: SystemConfig) -> Harness {
    let store = CoreStore::new();
    let config = Arc::new(config);
    Harness {
        contributors: ContributorService::new(store.clone()),
        deposits: DepositService::new(store.clone(), config.clone()),
        withdrawals: WithdrawalService::new(store.clone(), config.clone()),
        reconciliations: ReconciliationService::new(store.clone()),
        otps: OtpService::new(store, config),
        agent: Actor::agent(Uuid::new_v4()),
        admin: Actor::admin(Uuid::new_v4()),
    }
}

fn harness() -> Harness {
    harness_with(SystemConfig::default())
}

impl Harness {
    async fn onboard(&self, name: &str, phone: &str) -> (Uuid, String) {
        let c = self
            .contributors
            .onboard(
                self.agent,
                OnboardContributor {
                    full_name: name.to_string(),
                    phone_number: phone.to_string(),
                    card_payload: format!("CARD-{}", Uuid::new_v4()),
                },
            )
            .await
            .unwrap();
        (c.id, c.qr_hash)
    }

    fn deposit_input(&self, contributor_id: Uuid, qr_hash: &str, amount: i64) -> CreateDeposit {
        CreateDeposit {
            contributor_id,
            qr_hash: qr_hash.to_string(),
            amount,
            gps: Some(GpsFix {
                latitude: 6.4550,
                longitude: 3.3841,
                accuracy: Some(10.0),
            }),
            device_id: Some("test-device".to_string()),
            synced: true,
        }
    }

    async fn deposit(&self, contributor_id: Uuid, qr_hash: &str, amount: i64) {
        self.deposits
            .create_deposit(self.agent, self.deposit_input(contributor_id, qr_hash, amount))
            .await
            .unwrap();
    }

    /// Full lifecycle: request, verify with the issued code, approve
    async fn withdraw(&self, contributor_id: Uuid, amount: i64) {
        let w = self
            .withdrawals
            .create_withdrawal(self.agent, CreateWithdrawal { contributor_id, amount })
            .await
            .unwrap();
        let code = self.otps.latest_code(contributor_id, w.id).await.unwrap();
        self.withdrawals
            .verify_otp(self.agent, w.id, &code)
            .await
            .unwrap();
        self.withdrawals.approve(self.admin, w.id).await.unwrap();
    }
}

#[tokio::test]
async fn withdrawal_lifecycle_debits_the_derived_balance() {
    let h = harness();
    let (id, qr) = h.onboard("Ngozi Eze", "+2348031111111").await;
    h.deposit(id, &qr, 5_000).await;

    // More than the balance is refused up front
    let err = h
        .withdrawals
        .create_withdrawal(h.agent, CreateWithdrawal { contributor_id: id, amount: 6_000 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::InsufficientBalance { available: 5_000, requested: 6_000 }
    ));

    h.withdraw(id, 3_000).await;
    assert_eq!(h.contributors.balance(id).await.unwrap(), 2_000);

    // The debit exists as a ledger event, not a mutated balance
    let statement = h.contributors.statement(id).await.unwrap();
    let withdrawals: Vec<_> = statement
        .iter()
        .filter(|ev| ev.kind == EventKind::Withdrawal)
        .collect();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].amount, 3_000);
}

#[tokio::test]
async fn otp_must_match_before_approval_is_possible() {
    let h = harness();
    let (id, qr) = h.onboard("Tunde Bakare", "+2348032222222").await;
    h.deposit(id, &qr, 4_000).await;

    let w = h
        .withdrawals
        .create_withdrawal(h.agent, CreateWithdrawal { contributor_id: id, amount: 1_000 })
        .await
        .unwrap();

    // Approval before verification is a state machine violation
    let err = h.withdrawals.approve(h.admin, w.id).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));

    // A wrong code charges an attempt and leaves the state REQUESTED
    let code = h.otps.latest_code(id, w.id).await.unwrap();
    let mut wrong = code.clone().into_bytes();
    wrong[0] = if wrong[0] == b'9' { b'0' } else { wrong[0] + 1 };
    let wrong = String::from_utf8(wrong).unwrap();
    assert!(h
        .withdrawals
        .verify_otp(h.agent, w.id, &wrong)
        .await
        .is_err());
    assert_eq!(
        h.withdrawals.get(w.id).await.unwrap().state,
        WithdrawalState::Requested
    );

    let verified = h.withdrawals.verify_otp(h.agent, w.id, &code).await.unwrap();
    assert_eq!(verified.state, WithdrawalState::OtpVerified);

    let executed = h.withdrawals.approve(h.admin, w.id).await.unwrap();
    assert_eq!(executed.state, WithdrawalState::Executed);
    assert!(executed.ledger_event_id.is_some());
}

#[tokio::test]
async fn a_second_approval_of_an_executed_withdrawal_fails() {
    let h = harness();
    let (id, qr) = h.onboard("Chinedu Okafor", "+2348037777777").await;
    h.deposit(id, &qr, 5_000).await;

    let w = h
        .withdrawals
        .create_withdrawal(h.agent, CreateWithdrawal { contributor_id: id, amount: 2_000 })
        .await
        .unwrap();
    let code = h.otps.latest_code(id, w.id).await.unwrap();
    h.withdrawals.verify_otp(h.agent, w.id, &code).await.unwrap();
    h.withdrawals.approve(h.admin, w.id).await.unwrap();

    // Retrying the approval observes the EXECUTED state and fails
    let err = h.withdrawals.approve(h.admin, w.id).await.unwrap_err();
    match err {
        CoreError::InvalidState { current, .. } => assert_eq!(current, "EXECUTED"),
        other => panic!("unexpected error: {other}"),
    }

    // The debit happened exactly once
    let statement = h.contributors.statement(id).await.unwrap();
    assert_eq!(
        statement
            .iter()
            .filter(|ev| ev.kind == EventKind::Withdrawal)
            .count(),
        1
    );
    assert_eq!(h.contributors.balance(id).await.unwrap(), 3_000);
}

#[tokio::test]
async fn withdrawal_rejection_is_terminal_and_writes_no_ledger_event() {
    let h = harness();
    let (id, qr) = h.onboard("Ifeoma Nnaji", "+2348038888888").await;
    h.deposit(id, &qr, 4_000).await;

    let w = h
        .withdrawals
        .create_withdrawal(h.agent, CreateWithdrawal { contributor_id: id, amount: 2_000 })
        .await
        .unwrap();
    let code = h.otps.latest_code(id, w.id).await.unwrap();
    h.withdrawals.verify_otp(h.agent, w.id, &code).await.unwrap();

    // A rejection reason is mandatory
    let err = h.withdrawals.reject(h.admin, w.id, "  ").await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let rejected = h
        .withdrawals
        .reject(h.admin, w.id, "contributor disputed the request")
        .await
        .unwrap();
    assert_eq!(rejected.state, WithdrawalState::Rejected);
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("contributor disputed the request")
    );
    assert!(rejected.ledger_event_id.is_none());

    // No debit: funds stay with the contributor, no WITHDRAWAL event
    assert_eq!(h.contributors.balance(id).await.unwrap(), 4_000);
    let statement = h.contributors.statement(id).await.unwrap();
    assert!(statement.iter().all(|ev| ev.kind != EventKind::Withdrawal));

    // REJECTED is terminal: neither approval nor a second rejection moves it
    assert!(matches!(
        h.withdrawals.approve(h.admin, w.id).await.unwrap_err(),
        CoreError::InvalidState { .. }
    ));
    assert!(matches!(
        h.withdrawals
            .reject(h.admin, w.id, "again")
            .await
            .unwrap_err(),
        CoreError::InvalidState { .. }
    ));
}

#[tokio::test]
async fn rejected_reconciliation_keeps_the_agent_locked() {
    let h = harness_with(SystemConfig {
        circuit_breaker_limit: 5_000,
        ..SystemConfig::default()
    });
    let (id, qr) = h.onboard("Yakubu Musa", "+2348039999999").await;
    h.deposit(id, &qr, 5_000).await;

    let recon = h
        .reconciliations
        .create_reconciliation(h.agent, 4_500, None)
        .await
        .unwrap();

    let err = h
        .reconciliations
        .reject(h.admin, recon.id, "")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let rejected = h
        .reconciliations
        .reject(h.admin, recon.id, "cash short by ₦500")
        .await
        .unwrap();
    assert_eq!(rejected.status, ReconciliationStatus::Rejected);
    assert!(rejected.watermark_seq.is_none());

    // Liability is unchanged and the breaker still refuses deposits
    assert_eq!(
        h.reconciliations.unreconciled_balance(h.agent.user_id).await,
        5_000
    );
    let err = h
        .deposits
        .create_deposit(h.agent, h.deposit_input(id, &qr, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AgentLocked { .. }));
}

#[tokio::test]
async fn circuit_breaker_locks_until_reconciliation_is_approved() {
    let h = harness_with(SystemConfig {
        circuit_breaker_limit: 10_000,
        ..SystemConfig::default()
    });
    let (id, qr) = h.onboard("Funke Ade", "+2348033333333").await;
    h.deposit(id, &qr, 6_000).await;
    h.deposit(id, &qr, 4_000).await;

    // Liability sits exactly at the limit; further deposits are refused
    let err = h
        .deposits
        .create_deposit(h.agent, h.deposit_input(id, &qr, 500))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::AgentLocked { balance: 10_000, limit: 10_000 }
    ));

    // Cash handover, then admin approval, resets the watermark
    let recon = h
        .reconciliations
        .create_reconciliation(h.agent, 10_000, None)
        .await
        .unwrap();
    let approved = h.reconciliations.approve(h.admin, recon.id).await.unwrap();
    assert_eq!(approved.reconciled_amount, 10_000);
    assert_eq!(approved.discrepancy, 0);

    assert_eq!(
        h.reconciliations.unreconciled_balance(h.agent.user_id).await,
        0
    );
    h.deposit(id, &qr, 500).await;

    // Contributor funds are untouched by the agent's settlement
    assert_eq!(h.contributors.balance(id).await.unwrap(), 10_500);
}

#[tokio::test]
async fn offline_capture_stays_unsynced_while_the_agent_is_locked() {
    let h = harness_with(SystemConfig {
        circuit_breaker_limit: 5_000,
        ..SystemConfig::default()
    });
    let (id, qr) = h.onboard("Emeka Obi", "+2348034444444").await;

    // Offline capture bypasses the breaker at capture time
    let mut offline = h.deposit_input(id, &qr, 1_000);
    offline.synced = false;
    let receipt = h
        .deposits
        .create_deposit(h.agent, offline)
        .await
        .unwrap();
    assert!(!receipt.synced);
    assert_eq!(h.contributors.balance(id).await.unwrap(), 0);

    h.deposit(id, &qr, 5_000).await;

    // Replay is refused while liability is at the limit
    let err = h.deposits.sync_deposit(receipt.event_id).await.unwrap_err();
    assert!(matches!(err, CoreError::AgentLocked { .. }));
    let statement = h.contributors.statement(id).await.unwrap();
    let captured = statement
        .iter()
        .find(|ev| ev.id == receipt.event_id)
        .unwrap();
    assert!(!captured.synced);

    // Settling the agent frees the replay
    let recon = h
        .reconciliations
        .create_reconciliation(h.agent, 5_000, None)
        .await
        .unwrap();
    h.reconciliations.approve(h.admin, recon.id).await.unwrap();
    h.deposits.sync_deposit(receipt.event_id).await.unwrap();
    assert_eq!(h.contributors.balance(id).await.unwrap(), 6_000);
}

#[tokio::test]
async fn wrong_card_hash_is_refused_at_capture() {
    let h = harness();
    let (id, _qr) = h.onboard("Bisi Alabi", "+2348035555555").await;
    let (_other, other_qr) = h.onboard("Sade Kuti", "+2348036666666").await;

    let err = h
        .deposits
        .create_deposit(h.agent, h.deposit_input(id, &other_qr, 1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(h.contributors.balance(id).await.unwrap(), 0);
}
