use thrift_settlement_core::{
    audit::AuditLog,
    config::SystemConfig,
    contributor::ContributorService,
    deposit::DepositService,
    models::{Actor, CreateDeposit, CreateWithdrawal, GpsFix, OnboardContributor},
    otp::OtpService,
    outbox::OutboxWorker,
    reconciliation::ReconciliationService,
    sms::LogSms,
    store::CoreStore,
    sync::SyncWorker,
    withdrawal::WithdrawalService,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Thrift settlement core starting");

    // Create components
    let store = CoreStore::new();
    let config = Arc::new(SystemConfig::from_env());
    let audit_log = Arc::new(AuditLog::new());
    let sms = Arc::new(LogSms);

    let contributors = ContributorService::new(store.clone());
    let deposits = DepositService::new(store.clone(), config.clone());
    let withdrawals = WithdrawalService::new(store.clone(), config.clone());
    let reconciliations = ReconciliationService::new(store.clone());
    let otps = OtpService::new(store.clone(), config.clone());

    let outbox = OutboxWorker::new(
        store.clone(),
        sms,
        audit_log.clone(),
        Duration::from_secs(1),
    );
    let sync_worker = SyncWorker::new(store.clone(), deposits.clone(), &config);

    let agent = Actor::agent(Uuid::new_v4());
    let admin = Actor::admin(Uuid::new_v4());
    let gps = GpsFix {
        latitude: 6.5244,
        longitude: 3.3792,
        accuracy: Some(8.0),
    };

    // 1. Onboard a contributor with an NFC card binding
    let card_payload = format!("CARD-{}", Uuid::new_v4());
    let contributor = contributors
        .onboard(
            agent,
            OnboardContributor {
                full_name: "Adaeze Nwosu".to_string(),
                phone_number: "+2348012345678".to_string(),
                card_payload: card_payload.clone(),
            },
        )
        .await?;
    info!(contributor_id = %contributor.id, "Contributor onboarded");

    // 2. Capture a synced deposit against the contributor's card
    let receipt = deposits
        .create_deposit(
            agent,
            CreateDeposit {
                contributor_id: contributor.id,
                qr_hash: contributor.qr_hash.clone(),
                amount: 5_000,
                gps: Some(gps),
                device_id: Some("demo-device".to_string()),
                synced: true,
            },
        )
        .await?;
    info!(reference_id = %receipt.reference_id, amount = receipt.amount, "Deposit recorded");

    // 3. Capture one offline, then replay it through the sync queue
    deposits
        .create_deposit(
            agent,
            CreateDeposit {
                contributor_id: contributor.id,
                qr_hash: contributor.qr_hash.clone(),
                amount: 2_000,
                gps: Some(gps),
                device_id: Some("demo-device".to_string()),
                synced: false,
            },
        )
        .await?;
    let report = sync_worker.run_once().await;
    info!(synced = report.synced, "Offline replay pass complete");

    // 4. Withdrawal: request, verify OTP, admin approval
    let withdrawal = withdrawals
        .create_withdrawal(
            agent,
            CreateWithdrawal {
                contributor_id: contributor.id,
                amount: 3_000,
            },
        )
        .await?;
    // The demo peeks at the issued code; real devices receive it by SMS
    let code = otps
        .latest_code(contributor.id, withdrawal.id)
        .await
        .ok_or("no OTP issued")?;
    withdrawals.verify_otp(agent, withdrawal.id, &code).await?;
    let executed = withdrawals.approve(admin, withdrawal.id).await?;
    info!(state = %executed.state, amount = executed.amount, "Withdrawal settled");

    // 5. Agent hands cash over; admin approves the reconciliation
    let recon = reconciliations
        .create_reconciliation(agent, 4_000, Some("end of day".to_string()))
        .await?;
    let approved = reconciliations.approve(admin, recon.id).await?;

    // 6. Flush queued SMS/audit side effects
    let dispatched = outbox.run_once().await;

    println!("\n=== SETTLEMENT SUMMARY ===");
    println!("Contributor balance: ₦{}", contributors.balance(contributor.id).await?);
    println!(
        "Reconciled: ₦{} (discrepancy ₦{})",
        approved.reconciled_amount, approved.discrepancy
    );
    println!("Watermark seq: {:?}", approved.watermark_seq);
    println!("Side effects dispatched: {}", dispatched);
    println!("Audit records: {}", audit_log.len().await);

    Ok(())
}
