use crate::domain::booking::{Booking, BookingId};
use crate::domain::bundle::{Bundle, BundleId, BundleSession, SessionId};
use crate::domain::ports::{
    BookingMutation, BundleMutation, BundleSessionMutation, LedgerStore, TransferLog,
};
use crate::domain::transfer::{AttemptStatus, NewTransferAttempt, TransferAttempt, TransferTarget};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub const CF_BOOKINGS: &str = "bookings";
pub const CF_BUNDLES: &str = "bundles";
pub const CF_SESSIONS: &str = "sessions";
/// Transfer attempts keyed by their sequential id.
pub const CF_ATTEMPTS: &str = "attempts";

/// A persistent ledger and transfer log backed by RocksDB.
///
/// Each entity kind lives in its own column family, keyed by big-endian id.
/// Read-modify-write cycles are serialized through `write_lock`, and updates
/// spanning a bundle and a session are committed in one `WriteBatch`.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
    next_attempt_id: Arc<AtomicU64>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_BOOKINGS, CF_BUNDLES, CF_SESSIONS, CF_ATTEMPTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let store = Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
            next_attempt_id: Arc::new(AtomicU64::new(1)),
        };
        let last_id = store.last_attempt_id()?;
        store.next_attempt_id.store(last_id + 1, Ordering::SeqCst);
        Ok(store)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            SettlementError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, id: u64) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, id: u64, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(&cf, id.to_be_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn last_attempt_id(&self) -> Result<u64> {
        let cf = self.cf(CF_ATTEMPTS)?;
        match self.db.iterator_cf(&cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _value) = item?;
                let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                    SettlementError::InternalError(Box::new(std::io::Error::other(
                        "Malformed attempt key",
                    )))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn missing(what: &str, id: u64) -> SettlementError {
        SettlementError::ValidationError(format!("{} {} not found", what, id))
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn insert_booking(&self, booking: Booking) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.put_json(CF_BOOKINGS, booking.id, &booking)
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>> {
        self.get_json(CF_BOOKINGS, id)
    }

    async fn update_booking(&self, id: BookingId, mutate: BookingMutation<'_>) -> Result<Booking> {
        let _guard = self.write_lock.lock().await;
        let mut booking: Booking = self
            .get_json(CF_BOOKINGS, id)?
            .ok_or_else(|| Self::missing("booking", id))?;
        mutate(&mut booking)?;
        self.put_json(CF_BOOKINGS, id, &booking)?;
        Ok(booking)
    }

    async fn all_bookings(&self) -> Result<Vec<Booking>> {
        self.scan(CF_BOOKINGS)
    }

    async fn insert_bundle(&self, bundle: Bundle) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.put_json(CF_BUNDLES, bundle.id, &bundle)
    }

    async fn get_bundle(&self, id: BundleId) -> Result<Option<Bundle>> {
        self.get_json(CF_BUNDLES, id)
    }

    async fn update_bundle(&self, id: BundleId, mutate: BundleMutation<'_>) -> Result<Bundle> {
        let _guard = self.write_lock.lock().await;
        let mut bundle: Bundle = self
            .get_json(CF_BUNDLES, id)?
            .ok_or_else(|| Self::missing("bundle", id))?;
        mutate(&mut bundle)?;
        self.put_json(CF_BUNDLES, id, &bundle)?;
        Ok(bundle)
    }

    async fn insert_session(&self, session: BundleSession) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.put_json(CF_SESSIONS, session.id, &session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<BundleSession>> {
        self.get_json(CF_SESSIONS, id)
    }

    async fn update_bundle_session(
        &self,
        bundle_id: BundleId,
        session_id: SessionId,
        mutate: BundleSessionMutation<'_>,
    ) -> Result<(Bundle, BundleSession)> {
        let _guard = self.write_lock.lock().await;
        let mut bundle: Bundle = self
            .get_json(CF_BUNDLES, bundle_id)?
            .ok_or_else(|| Self::missing("bundle", bundle_id))?;
        let mut session: BundleSession = self
            .get_json(CF_SESSIONS, session_id)?
            .ok_or_else(|| Self::missing("session", session_id))?;
        mutate(&mut bundle, &mut session)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf(CF_BUNDLES)?,
            bundle_id.to_be_bytes(),
            serde_json::to_vec(&bundle)?,
        );
        batch.put_cf(
            &self.cf(CF_SESSIONS)?,
            session_id.to_be_bytes(),
            serde_json::to_vec(&session)?,
        );
        self.db.write(batch)?;
        Ok((bundle, session))
    }

    async fn sessions_for_bundle(&self, bundle_id: BundleId) -> Result<Vec<BundleSession>> {
        let sessions: Vec<BundleSession> = self.scan(CF_SESSIONS)?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.bundle_id == bundle_id)
            .collect())
    }
}

#[async_trait]
impl TransferLog for RocksDBStore {
    async fn append(&self, attempt: NewTransferAttempt) -> Result<TransferAttempt> {
        let _guard = self.write_lock.lock().await;
        let id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst);
        let stored = TransferAttempt::from_new(id, attempt);
        self.put_json(CF_ATTEMPTS, id, &stored)?;
        Ok(stored)
    }

    async fn update_status(
        &self,
        processor_transfer_id: &str,
        status: AttemptStatus,
    ) -> Result<Option<TransferAttempt>> {
        let _guard = self.write_lock.lock().await;
        let attempts: Vec<TransferAttempt> = self.scan(CF_ATTEMPTS)?;
        match attempts
            .into_iter()
            .find(|a| a.processor_transfer_id == processor_transfer_id)
        {
            Some(mut attempt) => {
                attempt.status = status;
                self.put_json(CF_ATTEMPTS, attempt.id, &attempt)?;
                Ok(Some(attempt))
            }
            None => Ok(None),
        }
    }

    async fn attempts_for(&self, target: TransferTarget) -> Result<Vec<TransferAttempt>> {
        let attempts: Vec<TransferAttempt> = self.scan(CF_ATTEMPTS)?;
        Ok(attempts.into_iter().filter(|a| a.target == target).collect())
    }

    async fn all_attempts(&self) -> Result<Vec<TransferAttempt>> {
        self.scan(CF_ATTEMPTS)
    }
}
