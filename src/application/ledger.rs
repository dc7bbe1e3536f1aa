use crate::domain::booking::{Booking, BookingId, PayerId, ProviderId};
use crate::domain::bundle::{Bundle, BundleId, BundleSession, SessionId};
use crate::domain::fees::FeeCalculator;
use crate::domain::money::Minor;
use crate::domain::ports::LedgerStoreRef;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub id: BookingId,
    pub provider_id: ProviderId,
    pub payer_id: PayerId,
    pub base_price_minor: Minor,
    pub delivery_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBundle {
    pub id: BundleId,
    pub provider_id: ProviderId,
    pub payer_id: PayerId,
    pub base_price_minor: Minor,
    pub total_minutes: i64,
    pub sessions_count: u32,
    pub charge_reference: String,
}

/// Entry points for the checkout and webhook layer.
///
/// Creates ledger records with their fee breakdown and records payment
/// outcomes. Nothing here can move `transfer_status`; that belongs to the
/// orchestrator.
pub struct SettlementLedger {
    store: LedgerStoreRef,
    calculator: FeeCalculator,
}

impl SettlementLedger {
    pub fn new(store: LedgerStoreRef, calculator: FeeCalculator) -> Self {
        Self { store, calculator }
    }

    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking> {
        if self.store.get_booking(new.id).await?.is_some() {
            return Err(SettlementError::ValidationError(format!(
                "booking {} already exists",
                new.id
            )));
        }
        let fees = self.calculator.compute_for_single(new.base_price_minor)?;
        let booking = Booking::new(
            new.id,
            new.provider_id,
            new.payer_id,
            &fees,
            new.delivery_end,
        );
        self.store.insert_booking(booking.clone()).await?;
        info!(
            booking_id = booking.id,
            total_charged_minor = booking.total_charged_minor,
            "Booking created"
        );
        Ok(booking)
    }

    pub async fn confirm_payment(&self, id: BookingId, charge_reference: &str) -> Result<Booking> {
        let booking = self
            .store
            .update_booking(id, &|b: &mut Booking| b.confirm_payment(charge_reference))
            .await?;
        info!(booking_id = id, "Payment confirmed");
        Ok(booking)
    }

    pub async fn mark_payment_failed(&self, id: BookingId) -> Result<Booking> {
        self.store
            .update_booking(id, &|b: &mut Booking| b.mark_payment_failed())
            .await
    }

    pub async fn mark_refunded(&self, id: BookingId) -> Result<Booking> {
        let booking = self
            .store
            .update_booking(id, &|b: &mut Booking| b.mark_refunded())
            .await?;
        info!(booking_id = id, "Payment refunded, escrow frozen");
        Ok(booking)
    }

    pub async fn create_bundle(&self, new: NewBundle) -> Result<Bundle> {
        if self.store.get_bundle(new.id).await?.is_some() {
            return Err(SettlementError::ValidationError(format!(
                "bundle {} already exists",
                new.id
            )));
        }
        let breakdown = self
            .calculator
            .compute_for_bundle(new.base_price_minor, new.sessions_count)?;
        let charge = new.charge_reference.trim();
        let bundle = Bundle::new(
            new.id,
            new.provider_id,
            new.payer_id,
            &breakdown,
            new.total_minutes,
            (!charge.is_empty()).then(|| charge.to_string()),
        )?;
        self.store.insert_bundle(bundle.clone()).await?;
        info!(
            bundle_id = bundle.id,
            provider_net_minor = bundle.provider_net_minor,
            sessions = bundle.sessions_total_count,
            "Bundle created"
        );
        Ok(bundle)
    }

    pub async fn schedule_session(
        &self,
        bundle_id: BundleId,
        session_id: SessionId,
        duration_minutes: i64,
        booking_id: Option<BookingId>,
    ) -> Result<BundleSession> {
        let bundle = self.store.get_bundle(bundle_id).await?.ok_or_else(|| {
            SettlementError::ValidationError(format!("bundle {} not found", bundle_id))
        })?;
        if self.store.get_session(session_id).await?.is_some() {
            return Err(SettlementError::ValidationError(format!(
                "session {} already exists",
                session_id
            )));
        }
        if duration_minutes > bundle.total_minutes {
            return Err(SettlementError::ValidationError(format!(
                "session of {} minutes is longer than bundle {}",
                duration_minutes, bundle_id
            )));
        }
        let mut session = BundleSession::new(session_id, bundle_id, duration_minutes)?;
        session.booking_id = booking_id;
        self.store.insert_session(session.clone()).await?;
        Ok(session)
    }

    pub async fn cancel_session(
        &self,
        bundle_id: BundleId,
        session_id: SessionId,
    ) -> Result<BundleSession> {
        let (_, session) = self
            .store
            .update_bundle_session(
                bundle_id,
                session_id,
                &|b: &mut Bundle, s: &mut BundleSession| b.cancel_session(s),
            )
            .await?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::{PaymentStatus, TransferStatus};
    use crate::domain::bundle::SessionStatus;
    use crate::infrastructure::in_memory::InMemoryLedger;
    use std::sync::Arc;

    fn ledger() -> SettlementLedger {
        SettlementLedger::new(Arc::new(InMemoryLedger::new()), FeeCalculator::default())
    }

    fn new_booking(id: BookingId) -> NewBooking {
        NewBooking {
            id,
            provider_id: 7,
            payer_id: 9,
            base_price_minor: 10_000,
            delivery_end: Utc::now(),
        }
    }

    fn new_bundle(id: BundleId) -> NewBundle {
        NewBundle {
            id,
            provider_id: 7,
            payer_id: 9,
            base_price_minor: 85_000,
            total_minutes: 600,
            sessions_count: 10,
            charge_reference: "pi_3Nk".into(),
        }
    }

    #[tokio::test]
    async fn test_create_booking_persists_fees() {
        let ledger = ledger();
        let booking = ledger.create_booking(new_booking(1)).await.unwrap();
        assert_eq!(booking.service_fee_minor, 500);
        assert_eq!(booking.processing_fee_estimate_minor, 183);
        assert!(matches!(
            ledger.create_booking(new_booking(1)).await,
            Err(SettlementError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_payment_lifecycle() {
        let ledger = ledger();
        ledger.create_booking(new_booking(1)).await.unwrap();
        let paid = ledger.confirm_payment(1, "ch_1").await.unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.transfer_status, TransferStatus::Pending);
        assert_eq!(paid.charge_reference.as_deref(), Some("ch_1"));

        let refunded = ledger.mark_refunded(1).await.unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert!(ledger.confirm_payment(1, "ch_2").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_price_rejected() {
        let ledger = ledger();
        let mut booking = new_booking(1);
        booking.base_price_minor = 0;
        assert!(matches!(
            ledger.create_booking(booking).await,
            Err(SettlementError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_bundle_and_sessions() {
        let ledger = ledger();
        let bundle = ledger.create_bundle(new_bundle(1)).await.unwrap();
        assert_eq!(bundle.per_session_payout_minor, 8_500);
        assert_eq!(bundle.charge_reference.as_deref(), Some("pi_3Nk"));

        ledger.schedule_session(1, 10, 90, Some(100)).await.unwrap();
        assert!(ledger.schedule_session(1, 10, 60, None).await.is_err());
        assert!(ledger.schedule_session(2, 11, 60, None).await.is_err());
        assert!(ledger.schedule_session(1, 12, 601, None).await.is_err());

        let cancelled = ledger.cancel_session(1, 10).await.unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert!(ledger.cancel_session(1, 10).await.is_err());
    }
}
