//! Core data models for the settlement ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// The four kinds of money movement the ledger records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Deposit,
    Withdrawal,
    Reversal,
    Reconciliation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalState {
    Requested,
    OtpVerified,
    PendingAdmin,
    Approved,
    Executed,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReconciliationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Contributor,
    Agent,
    OperationsAdmin,
    SuperAdmin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpPurpose {
    Withdrawal,
    BalanceCheck,
}

//
// ================= Actor =================
//

/// Verified identity supplied by the authentication layer.
/// The core trusts this input; it only checks role-appropriateness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn agent(user_id: Uuid) -> Self {
        Self { user_id, role: Role::Agent }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self { user_id, role: Role::OperationsAdmin }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::OperationsAdmin | Role::SuperAdmin)
    }
}

//
// ================= Ledger Event =================
//

/// GPS fix captured at deposit time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

/// A single immutable financial event.
///
/// `seq` is a monotonic sequence number assigned at append; all
/// watermark-relative balance math keys on it rather than wall-clock
/// time, so same-millisecond approvals cannot collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: Uuid,
    pub seq: u64,
    pub kind: EventKind,
    /// Absent for RECONCILIATION events
    pub contributor_id: Option<Uuid>,
    /// Absent for self-service events
    pub agent_id: Option<Uuid>,
    pub amount: i64,
    pub reference_id: String,
    /// Deposits only
    pub gps: Option<GpsFix>,
    pub device_id: Option<String>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
}

//
// ================= Contributor =================
//

/// End saver whose cash an agent collects; identified by a unique QR card.
/// `qr_hash` and `phone_number` are immutable identity anchors. Balance is
/// never stored here; it is derived from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    pub id: Uuid,
    pub full_name: String,
    pub phone_number: String,
    pub qr_hash: String,
    pub is_active: bool,
    pub onboarded_by_agent_id: Uuid,
    pub created_at: DateTime<Utc>,
}

//
// ================= Withdrawal =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub contributor_id: Uuid,
    pub agent_id: Uuid,
    pub amount: i64,
    pub state: WithdrawalState,
    pub requested_at: DateTime<Utc>,
    pub otp_verified_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub ledger_event_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

//
// ================= Reconciliation =================
//

/// Agent-initiated cash handover record.
///
/// `reconciled_amount` is always the system-computed balance, never the
/// cash presented. The system's liability is defined by its own ledger.
/// A discrepancy is recorded for the admin, not silently resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReconciliation {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub unreconciled_balance_before: i64,
    pub cash_amount_presented: i64,
    pub reconciled_amount: i64,
    pub discrepancy: i64,
    pub status: ReconciliationStatus,
    pub notes: Option<String>,
    pub reconciled_by: Option<Uuid>,
    pub reconciled_at: Option<DateTime<Utc>>,
    /// Ledger sequence of the RECONCILIATION event appended on approval.
    /// Liability after approval considers only events with seq beyond this.
    pub watermark_seq: Option<u64>,
    pub created_at: DateTime<Utc>,
}

//
// ================= OTP =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRecord {
    pub id: Uuid,
    pub contributor_id: Uuid,
    pub withdrawal_id: Uuid,
    pub code: String,
    pub purpose: OtpPurpose,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

//
// ================= Sync Queue =================
//

/// Durable record of a deposit captured while disconnected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEntry {
    pub id: Uuid,
    pub ledger_event_id: Uuid,
    pub agent_id: Uuid,
    pub device_id: Option<String>,
    pub status: SyncStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//
// ================= Operation Inputs =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeposit {
    pub contributor_id: Uuid,
    /// Must match the contributor's bound QR hash (scanner-gate rule)
    pub qr_hash: String,
    pub amount: i64,
    pub gps: Option<GpsFix>,
    pub device_id: Option<String>,
    /// False for offline captures awaiting replay
    pub synced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWithdrawal {
    pub contributor_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardContributor {
    pub full_name: String,
    pub phone_number: String,
    /// Raw payload of the physical QR card; hashed before storage
    pub card_payload: String,
}

//
// ================= Operation Results =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub event_id: Uuid,
    pub contributor_id: Uuid,
    pub amount: i64,
    pub reference_id: String,
    pub gps: Option<GpsFix>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

//
// ================= Display =================
//

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Deposit => "DEPOSIT",
            EventKind::Withdrawal => "WITHDRAWAL",
            EventKind::Reversal => "REVERSAL",
            EventKind::Reconciliation => "RECONCILIATION",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for WithdrawalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WithdrawalState::Requested => "REQUESTED",
            WithdrawalState::OtpVerified => "OTP_VERIFIED",
            WithdrawalState::PendingAdmin => "PENDING_ADMIN",
            WithdrawalState::Approved => "APPROVED",
            WithdrawalState::Executed => "EXECUTED",
            WithdrawalState::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconciliationStatus::Pending => "PENDING",
            ReconciliationStatus::Approved => "APPROVED",
            ReconciliationStatus::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Contributor => "contributor",
            Role::Agent => "agent",
            Role::OperationsAdmin => "operations_admin",
            Role::SuperAdmin => "super_admin",
        };
        write!(f, "{}", s)
    }
}
