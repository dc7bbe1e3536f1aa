use super::fees::FeeBreakdown;
use super::money::Minor;
use super::transfer::IneligibleReason;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type BookingId = u64;
pub type ProviderId = u64;
pub type PayerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Where the provider's share sits. `Pending` is the escrow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferStatus {
    Pending,
    /// A caller owns the transfer and has not confirmed it yet.
    Claimed,
    Transferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    Confirmed,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CompensationState {
    #[default]
    None,
    Claimed {
        amount_minor: Minor,
    },
    Paid {
        transfer_id: String,
        amount_minor: Minor,
    },
}

/// A single-session purchase.
///
/// Pricing fields are fixed at creation; only the status and transfer fields
/// change afterwards, and only through the methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub provider_id: ProviderId,
    pub payer_id: PayerId,
    pub base_price_minor: Minor,
    pub service_fee_minor: Minor,
    pub processing_fee_estimate_minor: Minor,
    pub platform_margin_minor: Minor,
    pub total_charged_minor: Minor,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub transfer_status: TransferStatus,
    pub delivery_end: DateTime<Utc>,
    pub charge_reference: Option<String>,
    pub transfer_reference: Option<String>,
    pub transferred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub compensation: CompensationState,
}

impl Booking {
    pub fn new(
        id: BookingId,
        provider_id: ProviderId,
        payer_id: PayerId,
        fees: &FeeBreakdown,
        delivery_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            provider_id,
            payer_id,
            base_price_minor: fees.provider_net_minor,
            service_fee_minor: fees.service_fee_minor,
            processing_fee_estimate_minor: fees.processing_fee_estimate_minor,
            platform_margin_minor: fees.platform_margin_minor,
            total_charged_minor: fees.total_charged_minor,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Pending,
            transfer_status: TransferStatus::Pending,
            delivery_end,
            charge_reference: None,
            transfer_reference: None,
            transferred_at: None,
            compensation: CompensationState::None,
        }
    }

    /// The provider's share, which is what gets transferred.
    pub fn provider_net_minor(&self) -> Minor {
        self.base_price_minor
    }

    /// First failing ledger-side condition for a completion transfer, if any.
    pub fn transfer_blocker(&self, now: DateTime<Utc>) -> Option<IneligibleReason> {
        match self.payment_status {
            PaymentStatus::Paid => {}
            PaymentStatus::Refunded => return Some(IneligibleReason::PaymentRefunded),
            PaymentStatus::Pending | PaymentStatus::Failed => {
                return Some(IneligibleReason::PaymentNotConfirmed);
            }
        }
        match self.transfer_status {
            TransferStatus::Pending => {}
            TransferStatus::Claimed => return Some(IneligibleReason::TransferInProgress),
            TransferStatus::Transferred => return Some(IneligibleReason::AlreadyTransferred),
        }
        if now < self.delivery_end {
            return Some(IneligibleReason::DeliveryNotReached);
        }
        None
    }

    pub fn confirm_payment(&mut self, charge_reference: &str) -> Result<()> {
        match self.payment_status {
            PaymentStatus::Pending | PaymentStatus::Failed => {
                if charge_reference.trim().is_empty() {
                    return Err(SettlementError::ValidationError(
                        "Charge reference must not be empty".to_string(),
                    ));
                }
                self.payment_status = PaymentStatus::Paid;
                self.charge_reference = Some(charge_reference.trim().to_string());
                Ok(())
            }
            PaymentStatus::Paid | PaymentStatus::Refunded => Err(
                SettlementError::ConsistencyError(format!(
                    "booking {} payment already {:?}",
                    self.id, self.payment_status
                )),
            ),
        }
    }

    pub fn mark_payment_failed(&mut self) -> Result<()> {
        if self.payment_status != PaymentStatus::Pending {
            return Err(SettlementError::ConsistencyError(format!(
                "booking {} payment already {:?}",
                self.id, self.payment_status
            )));
        }
        self.payment_status = PaymentStatus::Failed;
        Ok(())
    }

    /// Refunding freezes the escrow permanently: no transfer is ever issued afterwards.
    pub fn mark_refunded(&mut self) -> Result<()> {
        match (self.payment_status, self.transfer_status) {
            (PaymentStatus::Paid, TransferStatus::Pending) => {
                self.payment_status = PaymentStatus::Refunded;
                self.status = BookingStatus::Cancelled;
                Ok(())
            }
            (PaymentStatus::Paid, _) => Err(SettlementError::ConsistencyError(format!(
                "booking {} provider share already released",
                self.id
            ))),
            (PaymentStatus::Refunded, _) => Err(SettlementError::ConsistencyError(format!(
                "booking {} already refunded",
                self.id
            ))),
            _ => Err(SettlementError::ValidationError(format!(
                "booking {} has no captured payment to refund",
                self.id
            ))),
        }
    }

    /// Moves `Pending` to `Claimed` after re-checking the gate.
    pub fn claim_transfer(&mut self, now: DateTime<Utc>) -> Result<()> {
        if let Some(reason) = self.transfer_blocker(now) {
            return Err(reason.into());
        }
        self.transfer_status = TransferStatus::Claimed;
        Ok(())
    }

    pub fn confirm_transfer(&mut self, transfer_id: &str, at: DateTime<Utc>) -> Result<()> {
        if self.transfer_status != TransferStatus::Claimed {
            return Err(SettlementError::ConsistencyError(format!(
                "booking {} is {:?}, expected a claimed transfer",
                self.id, self.transfer_status
            )));
        }
        self.transfer_status = TransferStatus::Transferred;
        self.status = BookingStatus::Completed;
        self.transfer_reference = Some(transfer_id.to_string());
        self.transferred_at = Some(at);
        Ok(())
    }

    pub fn release_claim(&mut self) -> Result<()> {
        if self.transfer_status != TransferStatus::Claimed {
            return Err(SettlementError::ConsistencyError(format!(
                "booking {} is {:?}, nothing to release",
                self.id, self.transfer_status
            )));
        }
        self.transfer_status = TransferStatus::Pending;
        Ok(())
    }

    pub fn claim_compensation(&mut self, amount_minor: Minor) -> Result<()> {
        match self.compensation {
            CompensationState::None => {
                self.compensation = CompensationState::Claimed { amount_minor };
                Ok(())
            }
            CompensationState::Claimed { .. } => Err(SettlementError::ConsistencyError(format!(
                "booking {} compensation in progress",
                self.id
            ))),
            CompensationState::Paid { .. } => Err(SettlementError::ConsistencyError(format!(
                "booking {} compensation already paid",
                self.id
            ))),
        }
    }

    /// Records the paid compensation and returns its amount.
    pub fn confirm_compensation(&mut self, transfer_id: &str) -> Result<Minor> {
        let CompensationState::Claimed { amount_minor } = self.compensation else {
            return Err(SettlementError::ConsistencyError(format!(
                "booking {} has no claimed compensation",
                self.id
            )));
        };
        self.compensation = CompensationState::Paid {
            transfer_id: transfer_id.to_string(),
            amount_minor,
        };
        Ok(amount_minor)
    }

    pub fn release_compensation(&mut self) -> Result<()> {
        if !matches!(self.compensation, CompensationState::Claimed { .. }) {
            return Err(SettlementError::ConsistencyError(format!(
                "booking {} has no claimed compensation",
                self.id
            )));
        }
        self.compensation = CompensationState::None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fees::FeeCalculator;
    use chrono::Duration;

    fn booking(delivery_end: DateTime<Utc>) -> Booking {
        let fees = FeeCalculator::default().compute_for_single(10_000).unwrap();
        Booking::new(1, 7, 9, &fees, delivery_end)
    }

    #[test]
    fn test_new_booking_persists_breakdown() {
        let b = booking(Utc::now());
        assert_eq!(b.base_price_minor, 10_000);
        assert_eq!(b.total_charged_minor, 10_500);
        assert_eq!(b.platform_margin_minor, 317);
        assert_eq!(b.payment_status, PaymentStatus::Pending);
        assert_eq!(b.transfer_status, TransferStatus::Pending);
    }

    #[test]
    fn test_blocker_order() {
        let now = Utc::now();
        let mut b = booking(now + Duration::hours(1));
        assert_eq!(
            b.transfer_blocker(now),
            Some(IneligibleReason::PaymentNotConfirmed)
        );
        b.confirm_payment("ch_1").unwrap();
        assert_eq!(
            b.transfer_blocker(now),
            Some(IneligibleReason::DeliveryNotReached)
        );
        assert_eq!(b.transfer_blocker(now + Duration::hours(1)), None);
    }

    #[test]
    fn test_claim_confirm_cycle() {
        let now = Utc::now();
        let mut b = booking(now);
        b.confirm_payment("ch_1").unwrap();
        b.claim_transfer(now).unwrap();
        assert!(matches!(
            b.claim_transfer(now),
            Err(SettlementError::ConsistencyError(_))
        ));
        b.confirm_transfer("tr_1", now).unwrap();
        assert_eq!(b.transfer_status, TransferStatus::Transferred);
        assert_eq!(b.status, BookingStatus::Completed);
        assert_eq!(b.transfer_reference.as_deref(), Some("tr_1"));
    }

    #[test]
    fn test_release_returns_to_escrow() {
        let now = Utc::now();
        let mut b = booking(now);
        b.confirm_payment("ch_1").unwrap();
        b.claim_transfer(now).unwrap();
        b.release_claim().unwrap();
        assert_eq!(b.transfer_status, TransferStatus::Pending);
        assert!(b.release_claim().is_err());
    }

    #[test]
    fn test_refund_freezes_transfer() {
        let now = Utc::now();
        let mut b = booking(now);
        b.confirm_payment("ch_1").unwrap();
        b.mark_refunded().unwrap();
        assert_eq!(b.transfer_blocker(now), Some(IneligibleReason::PaymentRefunded));
        assert!(b.confirm_payment("ch_2").is_err());
        assert_eq!(b.transfer_status, TransferStatus::Pending);
    }

    #[test]
    fn test_refund_rejected_after_transfer_claim() {
        let now = Utc::now();
        let mut b = booking(now);
        b.confirm_payment("ch_1").unwrap();
        b.claim_transfer(now).unwrap();
        assert!(matches!(
            b.mark_refunded(),
            Err(SettlementError::ConsistencyError(_))
        ));
    }

    #[test]
    fn test_single_compensation() {
        let mut b = booking(Utc::now());
        b.claim_compensation(2_500).unwrap();
        assert!(b.claim_compensation(2_500).is_err());
        assert_eq!(b.confirm_compensation("tr_9").unwrap(), 2_500);
        assert!(b.claim_compensation(1_000).is_err());
        assert!(b.release_compensation().is_err());
    }
}
