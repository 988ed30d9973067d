//! SMS delivery seam
//!
//! Best-effort, fire-and-forget from the core's point of view: a delivery
//! failure is logged by the outbox worker and never propagated into the
//! financial operation that requested it.

use crate::models::OtpPurpose;
use crate::Result;
use tracing::{info, warn};

#[async_trait::async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, message: &str) -> Result<()>;
}

/// Development sender that only logs
pub struct LogSms;

#[async_trait::async_trait]
impl SmsSender for LogSms {
    async fn send(&self, to: &str, message: &str) -> Result<()> {
        info!(%to, %message, "SMS (log only)");
        Ok(())
    }
}

/// HTTP provider adapter. Posts `From`/`To`/`Body` form fields with basic
/// auth, the shape most gateway APIs accept.
pub struct HttpSmsSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_secret: String,
    from_number: String,
}

impl HttpSmsSender {
    pub fn new(
        endpoint: String,
        api_key: String,
        api_secret: String,
        from_number: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            api_secret,
            from_number,
        }
    }
}

#[async_trait::async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, to: &str, message: &str) -> Result<()> {
        if self.api_key.is_empty() || self.from_number.is_empty() {
            warn!("SMS credentials not configured, skipping send");
            return Ok(());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .form(&[
                ("From", self.from_number.as_str()),
                ("To", to),
                ("Body", message),
            ])
            .send()
            .await?
            .error_for_status()?;

        info!(%to, status = %response.status(), "SMS sent");
        Ok(())
    }
}

//
// ================= Message Templates =================
//

pub fn otp_message(code: &str, purpose: OtpPurpose) -> String {
    let action = match purpose {
        OtpPurpose::Withdrawal => "withdrawal",
        OtpPurpose::BalanceCheck => "balance check",
    };
    format!(
        "Your {} code is {}. It expires shortly. Do not share it with anyone.",
        action, code
    )
}

pub fn deposit_confirmation(amount: i64, balance: i64, reference_id: &str) -> String {
    format!(
        "Deposit of ₦{} received. New balance: ₦{}. Ref: {}",
        amount, balance, reference_id
    )
}

pub fn withdrawal_confirmation(amount: i64, balance: i64, reference_id: &str) -> String {
    format!(
        "Withdrawal of ₦{} completed. New balance: ₦{}. Ref: {}",
        amount, balance, reference_id
    )
}
