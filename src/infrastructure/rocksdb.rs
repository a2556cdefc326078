use crate::domain::audit::{SettlementStatus, TransferKind, TransferRecord};
use crate::domain::phone::Msisdn;
use crate::domain::pin::PinRecord;
use crate::domain::ports::{AuditLog, PinRecordStore, SessionStore};
use crate::domain::session::Session;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Column Family for in-flight dialogs, keyed by canonical phone number.
pub const CF_SESSIONS: &str = "sessions";
/// Column Family for transfer audit records, keyed by session reference.
pub const CF_AUDIT: &str = "audit";
/// Column Family for PIN credentials, keyed by canonical phone number.
pub const CF_PINS: &str = "pins";

/// A persistent store implementation using RocksDB.
///
/// Sessions, audit records and PIN credentials live in separate Column
/// Families of one database. Values are JSON.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_SESSIONS, CF_AUDIT, CF_PINS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            GatewayError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            GatewayError::InternalError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Serialization error: {e}"),
            )))
        })?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                GatewayError::InternalError(Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Deserialization error: {e}"),
                )))
            }),
            None => Ok(None),
        }
    }

    fn audit_records(&self) -> Result<Vec<TransferRecord>> {
        let mut records = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_AUDIT)?, IteratorMode::Start) {
            let (_key, value) = item?;
            let record = serde_json::from_slice(&value).map_err(|e| {
                GatewayError::InternalError(Box::new(std::io::Error::other(format!(
                    "Failed to deserialize audit record: {e}"
                ))))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl SessionStore for RocksDBStore {
    async fn load(&self, phone: &Msisdn) -> Result<Option<Session>> {
        match self.db.get_cf(self.cf(CF_SESSIONS)?, phone.as_str())? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                GatewayError::CorruptSession {
                    phone: phone.to_string(),
                    reason: e.to_string(),
                }
            }),
            None => Ok(None),
        }
    }

    async fn save(&self, session: Session) -> Result<()> {
        self.put(CF_SESSIONS, session.phone.as_str().as_bytes(), &session)
    }

    async fn delete(&self, phone: &Msisdn) -> Result<()> {
        self.db.delete_cf(self.cf(CF_SESSIONS)?, phone.as_str())?;
        Ok(())
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cf = self.cf(CF_SESSIONS)?;
        let mut stale = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let idle = serde_json::from_slice::<Session>(&value)
                .map(|session| session.is_idle_since(cutoff))
                .unwrap_or(true);
            if idle {
                stale.push(key);
            }
        }
        for key in &stale {
            self.db.delete_cf(cf, key)?;
        }
        Ok(stale.len())
    }
}

#[async_trait]
impl AuditLog for RocksDBStore {
    async fn record(&self, record: TransferRecord) -> Result<()> {
        let key = record.reference.clone();
        let merged = match self.get::<TransferRecord>(CF_AUDIT, key.as_bytes())? {
            Some(mut existing) => {
                existing.merge_from(record);
                existing
            }
            None => record,
        };
        self.put(CF_AUDIT, key.as_bytes(), &merged)
    }

    async fn find(&self, reference: &str) -> Result<Option<TransferRecord>> {
        self.get(CF_AUDIT, reference.as_bytes())
    }

    async fn daily_total(
        &self,
        customer_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal> {
        Ok(self
            .audit_records()?
            .into_iter()
            .filter(|r| {
                r.customer_id == customer_id
                    && r.kind == TransferKind::BankTransfer
                    && r.status.counts_toward_limit()
                    && r.created_at >= from
                    && r.created_at < to
            })
            .map(|r| r.amount)
            .sum())
    }

    async fn mark_settlement(
        &self,
        reference: &str,
        status: SettlementStatus,
        transaction_reference: Option<String>,
    ) -> Result<bool> {
        let Some(mut record) = self.get::<TransferRecord>(CF_AUDIT, reference.as_bytes())? else {
            return Ok(false);
        };
        record.settle(status, transaction_reference, Utc::now());
        self.put(CF_AUDIT, reference.as_bytes(), &record)?;
        Ok(true)
    }
}

#[async_trait]
impl PinRecordStore for RocksDBStore {
    async fn load(&self, phone: &Msisdn) -> Result<Option<PinRecord>> {
        self.get(CF_PINS, phone.as_str().as_bytes())
    }

    async fn save(&self, phone: &Msisdn, record: PinRecord) -> Result<()> {
        self.put(CF_PINS, phone.as_str().as_bytes(), &record)
    }
}
