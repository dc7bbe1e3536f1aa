use super::booking::{Booking, BookingId, ProviderId};
use super::bundle::{Bundle, BundleId, BundleSession, SessionId};
use super::transfer::{
    AttemptStatus, NewTransferAttempt, ProcessorTransfer, TransferAttempt, TransferRequest,
    TransferTarget,
};
use crate::error::{ProcessorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Read-modify-write applied to one booking inside the store's critical section.
/// If it returns an error nothing is written.
pub type BookingMutation<'a> = &'a (dyn Fn(&mut Booking) -> Result<()> + Send + Sync);
pub type BundleMutation<'a> = &'a (dyn Fn(&mut Bundle) -> Result<()> + Send + Sync);
/// Atomic update spanning a bundle and one of its sessions.
pub type BundleSessionMutation<'a> =
    &'a (dyn Fn(&mut Bundle, &mut BundleSession) -> Result<()> + Send + Sync);

/// Persistence for bookings, bundles and their sessions.
///
/// Every `update_*` call is a single atomic unit: concurrent callers racing
/// on the same record observe each other's writes, never a torn state.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_booking(&self, booking: Booking) -> Result<()>;
    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>>;
    async fn update_booking(&self, id: BookingId, mutate: BookingMutation<'_>) -> Result<Booking>;
    async fn all_bookings(&self) -> Result<Vec<Booking>>;

    async fn insert_bundle(&self, bundle: Bundle) -> Result<()>;
    async fn get_bundle(&self, id: BundleId) -> Result<Option<Bundle>>;
    async fn update_bundle(&self, id: BundleId, mutate: BundleMutation<'_>) -> Result<Bundle>;

    async fn insert_session(&self, session: BundleSession) -> Result<()>;
    async fn get_session(&self, id: SessionId) -> Result<Option<BundleSession>>;
    async fn update_bundle_session(
        &self,
        bundle_id: BundleId,
        session_id: SessionId,
        mutate: BundleSessionMutation<'_>,
    ) -> Result<(Bundle, BundleSession)>;
    async fn sessions_for_bundle(&self, bundle_id: BundleId) -> Result<Vec<BundleSession>>;
}

/// Append-only transfer attempt log.
#[async_trait]
pub trait TransferLog: Send + Sync {
    async fn append(&self, attempt: NewTransferAttempt) -> Result<TransferAttempt>;
    /// Applies a processor status callback. Returns `None` for unknown transfer ids.
    async fn update_status(
        &self,
        processor_transfer_id: &str,
        status: AttemptStatus,
    ) -> Result<Option<TransferAttempt>>;
    async fn attempts_for(&self, target: TransferTarget) -> Result<Vec<TransferAttempt>>;
    async fn all_attempts(&self) -> Result<Vec<TransferAttempt>>;
}

/// The external payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Resolves the charge behind a payment-intent style reference.
    async fn charge_for_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> std::result::Result<String, ProcessorError>;

    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> std::result::Result<ProcessorTransfer, ProcessorError>;
}

/// Lookup of a provider's connected payout account.
#[async_trait]
pub trait PayoutAccountRegistry: Send + Sync {
    async fn payout_account(&self, provider_id: ProviderId) -> Result<Option<String>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type TransferLogRef = Arc<dyn TransferLog>;
pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
pub type PayoutAccountRegistryRef = Arc<dyn PayoutAccountRegistry>;
pub type ClockRef = Arc<dyn Clock>;
