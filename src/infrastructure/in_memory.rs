use crate::domain::booking::{Booking, BookingId, ProviderId};
use crate::domain::bundle::{Bundle, BundleId, BundleSession, SessionId};
use crate::domain::ports::{
    BookingMutation, BundleMutation, BundleSessionMutation, LedgerStore, PayoutAccountRegistry,
    TransferLog,
};
use crate::domain::transfer::{AttemptStatus, NewTransferAttempt, TransferAttempt, TransferTarget};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerTables {
    bookings: BTreeMap<BookingId, Booking>,
    bundles: BTreeMap<BundleId, Bundle>,
    sessions: BTreeMap<SessionId, BundleSession>,
}

/// A thread-safe in-memory ledger.
///
/// All tables sit behind one `RwLock`, so every `update_*` call is a single
/// critical section and multi-record updates are atomic.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    tables: Arc<RwLock<LedgerTables>>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(what: &str, id: u64) -> SettlementError {
    SettlementError::ValidationError(format!("{} {} not found", what, id))
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_booking(&self, booking: Booking) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables.bookings.get(&id).cloned())
    }

    async fn update_booking(&self, id: BookingId, mutate: BookingMutation<'_>) -> Result<Booking> {
        let mut tables = self.tables.write().await;
        let mut booking = tables
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("booking", id))?;
        mutate(&mut booking)?;
        tables.bookings.insert(id, booking.clone());
        Ok(booking)
    }

    async fn all_bookings(&self) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables.bookings.values().cloned().collect())
    }

    async fn insert_bundle(&self, bundle: Bundle) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.bundles.insert(bundle.id, bundle);
        Ok(())
    }

    async fn get_bundle(&self, id: BundleId) -> Result<Option<Bundle>> {
        let tables = self.tables.read().await;
        Ok(tables.bundles.get(&id).cloned())
    }

    async fn update_bundle(&self, id: BundleId, mutate: BundleMutation<'_>) -> Result<Bundle> {
        let mut tables = self.tables.write().await;
        let mut bundle = tables
            .bundles
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("bundle", id))?;
        mutate(&mut bundle)?;
        tables.bundles.insert(id, bundle.clone());
        Ok(bundle)
    }

    async fn insert_session(&self, session: BundleSession) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<BundleSession>> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.get(&id).cloned())
    }

    async fn update_bundle_session(
        &self,
        bundle_id: BundleId,
        session_id: SessionId,
        mutate: BundleSessionMutation<'_>,
    ) -> Result<(Bundle, BundleSession)> {
        let mut tables = self.tables.write().await;
        let mut bundle = tables
            .bundles
            .get(&bundle_id)
            .cloned()
            .ok_or_else(|| not_found("bundle", bundle_id))?;
        let mut session = tables
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| not_found("session", session_id))?;
        mutate(&mut bundle, &mut session)?;
        tables.bundles.insert(bundle_id, bundle.clone());
        tables.sessions.insert(session_id, session.clone());
        Ok((bundle, session))
    }

    async fn sessions_for_bundle(&self, bundle_id: BundleId) -> Result<Vec<BundleSession>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.bundle_id == bundle_id)
            .cloned()
            .collect())
    }
}

/// In-memory append-only transfer attempt log.
#[derive(Default, Clone)]
pub struct InMemoryTransferLog {
    attempts: Arc<RwLock<Vec<TransferAttempt>>>,
}

impl InMemoryTransferLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferLog for InMemoryTransferLog {
    async fn append(&self, attempt: NewTransferAttempt) -> Result<TransferAttempt> {
        let mut attempts = self.attempts.write().await;
        let stored = TransferAttempt::from_new(attempts.len() as u64 + 1, attempt);
        attempts.push(stored.clone());
        Ok(stored)
    }

    async fn update_status(
        &self,
        processor_transfer_id: &str,
        status: AttemptStatus,
    ) -> Result<Option<TransferAttempt>> {
        let mut attempts = self.attempts.write().await;
        Ok(attempts
            .iter_mut()
            .find(|a| a.processor_transfer_id == processor_transfer_id)
            .map(|a| {
                a.status = status;
                a.clone()
            }))
    }

    async fn attempts_for(&self, target: TransferTarget) -> Result<Vec<TransferAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .iter()
            .filter(|a| a.target == target)
            .cloned()
            .collect())
    }

    async fn all_attempts(&self) -> Result<Vec<TransferAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts.clone())
    }
}

/// Payout accounts keyed by provider.
#[derive(Default, Clone)]
pub struct InMemoryPayoutRegistry {
    accounts: Arc<RwLock<HashMap<ProviderId, String>>>,
}

impl InMemoryPayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, provider_id: ProviderId, account_id: impl Into<String>) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(provider_id, account_id.into());
    }
}

#[async_trait]
impl PayoutAccountRegistry for InMemoryPayoutRegistry {
    async fn payout_account(&self, provider_id: ProviderId) -> Result<Option<String>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&provider_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::TransferStatus;
    use crate::domain::fees::FeeCalculator;
    use crate::domain::transfer::TransferKind;
    use chrono::Utc;

    fn booking(id: BookingId) -> Booking {
        let fees = FeeCalculator::default().compute_for_single(10_000).unwrap();
        Booking::new(id, 7, 9, &fees, Utc::now())
    }

    #[tokio::test]
    async fn test_in_memory_booking_roundtrip() {
        let store = InMemoryLedger::new();
        let original = booking(1);
        store.insert_booking(original.clone()).await.unwrap();

        let retrieved = store.get_booking(1).await.unwrap().unwrap();
        assert_eq!(retrieved, original);
        assert!(store.get_booking(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_mutation_writes_nothing() {
        let store = InMemoryLedger::new();
        store.insert_booking(booking(1)).await.unwrap();

        let result = store
            .update_booking(1, &|b: &mut Booking| {
                b.transfer_status = TransferStatus::Claimed;
                Err(SettlementError::ConsistencyError("abort".into()))
            })
            .await;
        assert!(result.is_err());
        let stored = store.get_booking(1).await.unwrap().unwrap();
        assert_eq!(stored.transfer_status, TransferStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_missing_booking() {
        let store = InMemoryLedger::new();
        let result = store.update_booking(42, &|_b: &mut Booking| Ok(())).await;
        assert!(matches!(result, Err(SettlementError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_transfer_log_assigns_ids_and_updates_status() {
        let log = InMemoryTransferLog::new();
        let new = NewTransferAttempt {
            target: TransferTarget::Booking(1),
            amount_minor: 10_000,
            processor_transfer_id: "tr_1".into(),
            status: AttemptStatus::Pending,
            kind: TransferKind::SessionCompletion,
            idempotency_key: "booking-1-completion".into(),
            created_at: Utc::now(),
        };
        let first = log.append(new.clone()).await.unwrap();
        let second = log.append(new).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let updated = log.update_status("tr_1", AttemptStatus::Paid).await.unwrap();
        assert_eq!(updated.unwrap().status, AttemptStatus::Paid);
        assert!(log
            .update_status("tr_unknown", AttemptStatus::Paid)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            log.attempts_for(TransferTarget::Booking(1)).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_payout_registry() {
        let registry = InMemoryPayoutRegistry::new();
        registry.register(7, "acct_1Nv").await;
        assert_eq!(
            registry.payout_account(7).await.unwrap().as_deref(),
            Some("acct_1Nv")
        );
        assert!(registry.payout_account(8).await.unwrap().is_none());
    }
}
