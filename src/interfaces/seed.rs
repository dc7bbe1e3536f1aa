use crate::application::ledger::{NewBooking, NewBundle, SettlementLedger};
use crate::domain::booking::{PaymentStatus, ProviderId};
use crate::domain::bundle::SessionId;
use crate::error::{Result, SettlementError};
use crate::infrastructure::in_memory::InMemoryPayoutRegistry;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct SeedBooking {
    #[serde(flatten)]
    pub booking: NewBooking,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub charge_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedSession {
    pub id: SessionId,
    pub duration_minutes: i64,
    #[serde(default)]
    pub booking_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SeedBundle {
    #[serde(flatten)]
    pub bundle: NewBundle,
    #[serde(default)]
    pub sessions: Vec<SeedSession>,
}

/// Initial ledger state for a CLI run, read from JSON.
///
/// Records go through `SettlementLedger` like checkout would create them, so
/// fees are always computed, never taken from the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LedgerSeed {
    pub payout_accounts: BTreeMap<ProviderId, String>,
    pub bookings: Vec<SeedBooking>,
    pub bundles: Vec<SeedBundle>,
}

impl LedgerSeed {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn apply(
        self,
        ledger: &SettlementLedger,
        accounts: &InMemoryPayoutRegistry,
    ) -> Result<()> {
        for (provider_id, account_id) in self.payout_accounts {
            accounts.register(provider_id, account_id).await;
        }

        for seed in self.bookings {
            let id = seed.booking.id;
            ledger.create_booking(seed.booking).await?;
            match seed.payment_status {
                None | Some(PaymentStatus::Pending) => {}
                Some(PaymentStatus::Failed) => {
                    ledger.mark_payment_failed(id).await?;
                }
                Some(status @ (PaymentStatus::Paid | PaymentStatus::Refunded)) => {
                    let charge = seed.charge_reference.as_deref().ok_or_else(|| {
                        SettlementError::ValidationError(format!(
                            "seeded booking {} is {:?} but has no charge_reference",
                            id, status
                        ))
                    })?;
                    ledger.confirm_payment(id, charge).await?;
                    if status == PaymentStatus::Refunded {
                        ledger.mark_refunded(id).await?;
                    }
                }
            }
        }

        for seed in self.bundles {
            let bundle_id = seed.bundle.id;
            ledger.create_bundle(seed.bundle).await?;
            for session in seed.sessions {
                ledger
                    .schedule_session(
                        bundle_id,
                        session.id,
                        session.duration_minutes,
                        session.booking_id,
                    )
                    .await?;
            }
        }
        debug!("Ledger seed applied");
        Ok(())
    }
}
