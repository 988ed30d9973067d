//! One-time codes for withdrawal authorization
//!
//! Codes are short-lived, bound to a (contributor, withdrawal) pair, and
//! consumed at most once. A resend supersedes the previous record; only
//! the latest record for a pair is live.

use crate::config::SystemConfig;
use crate::error::CoreError;
use crate::models::{OtpPurpose, OtpRecord};
use crate::outbox::OutboxIntent;
use crate::store::{CoreStore, State};
use crate::Result;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Generate an N-digit code from the OS entropy source
pub fn generate_code(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Create a fresh OTP record and queue the SMS, inside the caller's
/// write scope. Returns the record for the caller's bookkeeping.
pub(crate) fn issue(
    state: &mut State,
    config: &SystemConfig,
    contributor_id: Uuid,
    withdrawal_id: Uuid,
    phone_number: &str,
    purpose: OtpPurpose,
) -> OtpRecord {
    let record = OtpRecord {
        id: Uuid::new_v4(),
        contributor_id,
        withdrawal_id,
        code: generate_code(config.otp_length),
        purpose,
        expires_at: Utc::now() + Duration::minutes(config.otp_expiry_minutes),
        verified: false,
        verified_at: None,
        attempts: 0,
        max_attempts: 3,
        created_at: Utc::now(),
    };

    state.outbox.push_back(OutboxIntent::SmsOtp {
        phone: phone_number.to_string(),
        code: record.code.clone(),
        purpose,
    });
    state.otps.push(record.clone());

    info!(%contributor_id, %withdrawal_id, "OTP issued");
    record
}

/// Verify a code against the latest record for the pair.
///
/// Returns `Ok(false)` on a mismatch (after charging an attempt to the
/// latest record) so the caller can report attempts remaining. A record
/// that is already verified is an idempotent success: a client retry
/// after a network blip must not re-fail.
pub(crate) fn verify(
    state: &mut State,
    contributor_id: Uuid,
    withdrawal_id: Uuid,
    code: &str,
) -> Result<bool> {
    // Latest record matching pair AND code
    let matched = state.otps.iter().rposition(|r| {
        r.contributor_id == contributor_id && r.withdrawal_id == withdrawal_id && r.code == code
    });

    let Some(idx) = matched else {
        // Wrong or unknown code: charge an attempt to the latest live record
        if let Some(latest) = state
            .otps
            .iter_mut()
            .rev()
            .find(|r| r.contributor_id == contributor_id && r.withdrawal_id == withdrawal_id)
        {
            latest.attempts += 1;
        }
        return Ok(false);
    };

    let record = &mut state.otps[idx];

    if record.verified {
        return Ok(true);
    }
    if record.expires_at < Utc::now() {
        return Err(CoreError::OtpExpired);
    }
    if record.attempts >= record.max_attempts {
        return Err(CoreError::OtpExhausted);
    }

    record.verified = true;
    record.verified_at = Some(Utc::now());
    Ok(true)
}

/// Attempts remaining on the latest record for a pair, for UI messaging
pub(crate) fn attempts_left(state: &State, contributor_id: Uuid, withdrawal_id: Uuid) -> u32 {
    state
        .otps
        .iter()
        .rev()
        .find(|r| r.contributor_id == contributor_id && r.withdrawal_id == withdrawal_id)
        .map(|r| r.max_attempts.saturating_sub(r.attempts))
        .unwrap_or(0)
}

/// Public handle over OTP creation and verification
#[derive(Clone)]
pub struct OtpService {
    store: Arc<CoreStore>,
    config: Arc<SystemConfig>,
}

impl OtpService {
    pub fn new(store: Arc<CoreStore>, config: Arc<SystemConfig>) -> Self {
        Self { store, config }
    }

    /// Issue a fresh code for a withdrawal (supersedes earlier records)
    pub async fn create(
        &self,
        contributor_id: Uuid,
        withdrawal_id: Uuid,
        phone_number: &str,
    ) -> OtpRecord {
        let mut state = self.store.begin_write().await;
        issue(
            &mut state,
            &self.config,
            contributor_id,
            withdrawal_id,
            phone_number,
            OtpPurpose::Withdrawal,
        )
    }

    pub async fn verify(
        &self,
        contributor_id: Uuid,
        withdrawal_id: Uuid,
        code: &str,
    ) -> Result<bool> {
        let mut state = self.store.begin_write().await;
        verify(&mut state, contributor_id, withdrawal_id, code)
    }

    /// Operational lookup of the latest live code for a pair. For support
    /// tooling and tests; production callers receive codes over SMS only.
    pub async fn latest_code(&self, contributor_id: Uuid, withdrawal_id: Uuid) -> Option<String> {
        let state = self.store.read().await;
        state
            .otps
            .iter()
            .rev()
            .find(|r| r.contributor_id == contributor_id && r.withdrawal_id == withdrawal_id)
            .map(|r| r.code.clone())
    }
}
