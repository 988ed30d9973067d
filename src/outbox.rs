//! Side-effect outbox
//!
//! Operations enqueue intent records inside their own write scope; a
//! separate worker drains the queue and dispatches to the SMS and audit
//! seams. A crash between "ledger committed" and "SMS sent" leaves the
//! intent behind, observable instead of silently lost.

use crate::audit::{AuditRecord, AuditSink};
use crate::models::OtpPurpose;
use crate::sms::{self, SmsSender};
use crate::store::CoreStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One deferred side effect, recorded atomically with the operation
/// that requested it
#[derive(Debug, Clone)]
pub enum OutboxIntent {
    SmsOtp {
        phone: String,
        code: String,
        purpose: OtpPurpose,
    },
    SmsDepositConfirmation {
        phone: String,
        amount: i64,
        balance: i64,
        reference_id: String,
    },
    SmsWithdrawalConfirmation {
        phone: String,
        amount: i64,
        balance: i64,
        reference_id: String,
    },
    Audit(AuditRecord),
}

/// Drains the outbox on a fixed interval
pub struct OutboxWorker {
    store: Arc<CoreStore>,
    sms: Arc<dyn SmsSender>,
    audit: Arc<dyn AuditSink>,
    interval: Duration,
}

impl OutboxWorker {
    pub fn new(
        store: Arc<CoreStore>,
        sms: Arc<dyn SmsSender>,
        audit: Arc<dyn AuditSink>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            sms,
            audit,
            interval,
        }
    }

    /// Drain everything currently queued and dispatch it. Failures are
    /// logged and dropped; the primary operation already committed.
    pub async fn run_once(&self) -> usize {
        let drained: Vec<OutboxIntent> = {
            let mut state = self.store.begin_write().await;
            state.outbox.drain(..).collect()
        };

        let count = drained.len();
        for intent in drained {
            self.dispatch(intent).await;
        }

        if count > 0 {
            debug!(count, "outbox drained");
        }
        count
    }

    async fn dispatch(&self, intent: OutboxIntent) {
        match intent {
            OutboxIntent::SmsOtp {
                phone,
                code,
                purpose,
            } => {
                let message = sms::otp_message(&code, purpose);
                if let Err(e) = self.sms.send(&phone, &message).await {
                    warn!(error = %e, %phone, "failed to send OTP SMS");
                }
            }
            OutboxIntent::SmsDepositConfirmation {
                phone,
                amount,
                balance,
                reference_id,
            } => {
                let message = sms::deposit_confirmation(amount, balance, &reference_id);
                if let Err(e) = self.sms.send(&phone, &message).await {
                    warn!(error = %e, %phone, %reference_id, "failed to send deposit confirmation SMS");
                }
            }
            OutboxIntent::SmsWithdrawalConfirmation {
                phone,
                amount,
                balance,
                reference_id,
            } => {
                let message = sms::withdrawal_confirmation(amount, balance, &reference_id);
                if let Err(e) = self.sms.send(&phone, &message).await {
                    warn!(error = %e, %phone, %reference_id, "failed to send withdrawal confirmation SMS");
                }
            }
            OutboxIntent::Audit(record) => {
                if let Err(e) = self.audit.record(record).await {
                    warn!(error = %e, "failed to write audit record");
                }
            }
        }
    }

    /// Run the drain loop until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
