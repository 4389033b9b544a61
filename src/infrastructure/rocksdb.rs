//! Persistent storage backed by RocksDB.
//!
//! One store implements all four ports, with a separate column family per
//! artifact class. Values are JSON. RocksDB has no native compare-and-swap,
//! so every read-modify-write path holds the store's write mutex for the
//! duration of the check and the put; reads go straight to the database.
//!
//! This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).

use crate::domain::audit::AuditEvent;
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{
    AttemptCounter, AuditSink, ConfirmationToken, CounterStore, PaymentStore, TokenStore,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Column family for payments, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column family for confirmation tokens, keyed by token string.
pub const CF_TOKENS: &str = "tokens";
/// Column family for attempt counters, keyed by session id.
pub const CF_COUNTERS: &str = "counters";
/// Column family for the append-only audit trail.
pub const CF_AUDIT: &str = "audit";

#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the given path, ensuring all
    /// required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_PAYMENTS, CF_TOKENS, CF_COUNTERS, CF_AUDIT]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)
            .map_err(|e| PaymentError::Storage(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::Storage(format!("column family {name} not found")))
    }

    fn read<T: serde::de::DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf)?;
        let raw = self
            .db
            .get_cf(cf, key)
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: serde::Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf)?;
        let bytes = serde_json::to_vec(value)?;
        self.db
            .put_cf(cf, key, bytes)
            .map_err(|e| PaymentError::Storage(e.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PaymentStore for RocksDbStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _guard = self.lock();
        let key = payment.id.to_string();
        if self
            .read::<Payment>(CF_PAYMENTS, key.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::Storage(format!(
                "payment {} already exists",
                payment.id
            )));
        }
        self.write(CF_PAYMENTS, key.as_bytes(), &payment)
    }

    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, id.to_string().as_bytes())
    }

    async fn update(&self, payment: Payment, expected_version: u64) -> Result<bool> {
        let _guard = self.lock();
        let key = payment.id.to_string();
        match self.read::<Payment>(CF_PAYMENTS, key.as_bytes())? {
            Some(stored) if stored.version == expected_version => {
                self.write(CF_PAYMENTS, key.as_bytes(), &payment)?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PaymentError::Storage(format!(
                "payment {} vanished during update",
                payment.id
            ))),
        }
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut payments = Vec::new();
        for entry in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_, value) = entry.map_err(|e| PaymentError::Storage(e.to_string()))?;
            payments.push(serde_json::from_slice(&value)?);
        }
        Ok(payments)
    }
}

#[async_trait]
impl TokenStore for RocksDbStore {
    async fn put(&self, token: ConfirmationToken) -> Result<()> {
        let key = token.token.clone();
        self.write(CF_TOKENS, key.as_bytes(), &token)
    }

    async fn get(&self, token: &str) -> Result<Option<ConfirmationToken>> {
        self.read(CF_TOKENS, token.as_bytes())
    }

    async fn consume(&self, token: &str) -> Result<bool> {
        let _guard = self.lock();
        match self.read::<ConfirmationToken>(CF_TOKENS, token.as_bytes())? {
            Some(mut record) if !record.consumed => {
                record.consumed = true;
                self.write(CF_TOKENS, token.as_bytes(), &record)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl CounterStore for RocksDbStore {
    async fn get(&self, session_id: &str) -> Result<Option<AttemptCounter>> {
        self.read(CF_COUNTERS, session_id.as_bytes())
    }

    async fn compare_and_swap(
        &self,
        session_id: &str,
        expected: Option<&AttemptCounter>,
        new: AttemptCounter,
    ) -> Result<bool> {
        let _guard = self.lock();
        let current = self.read::<AttemptCounter>(CF_COUNTERS, session_id.as_bytes())?;
        if current.as_ref() == expected {
            self.write(CF_COUNTERS, session_id.as_bytes(), &new)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let cf = self.cf(CF_COUNTERS)?;
        self.db
            .delete_cf(cf, session_id.as_bytes())
            .map_err(|e| PaymentError::Storage(e.to_string()))
    }
}

#[async_trait]
impl AuditSink for RocksDbStore {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        // Timestamp-prefixed keys keep the trail in delivery order; the
        // event id breaks ties within one nanosecond.
        let key = format!(
            "{:020}:{}",
            event.timestamp.timestamp_nanos_opt().unwrap_or_default(),
            event.id
        );
        self.write(CF_AUDIT, key.as_bytes(), &event)
    }
}
