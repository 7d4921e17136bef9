use crate::domain::audit::{ApprovalHistoryEntry, VerificationRecord};
use crate::domain::payment::{Payment, PaymentId, ValidatedPayment, VoucherNumber};
use crate::domain::ports::{AuditStore, CodeSequence, PaymentStore};
use crate::error::{Result, WorkflowError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Payments keyed by big-endian id.
pub const CF_PAYMENTS: &str = "payments";
/// Token to payment id index.
pub const CF_TOKENS: &str = "tokens";
/// Approval history keyed by `payment id ++ entry id`.
pub const CF_HISTORY: &str = "history";
/// Verification records keyed by verification code.
pub const CF_VERIFICATIONS: &str = "verifications";
/// `payment id ++ code` index over verification records.
pub const CF_PAYMENT_VERIFICATIONS: &str = "payment_verifications";
/// Counters.
pub const CF_META: &str = "meta";

const LAST_PAYMENT_ID: &str = "last_payment_id";
const LAST_HISTORY_ID: &str = "last_history_id";
const LAST_VERIFICATION_SEQ: &str = "last_verification_seq";

/// A persistent store implementation using RocksDB.
///
/// Implements [`PaymentStore`], [`AuditStore`] and [`CodeSequence`] over one
/// database. Reads go straight to RocksDB; every write takes `write_lock` so
/// the version compare and the batch write happen as one step. A transition
/// and its history row land in the same `WriteBatch`.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at `path`, creating any missing
    /// column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [
            CF_PAYMENTS,
            CF_TOKENS,
            CF_HISTORY,
            CF_VERIFICATIONS,
            CF_PAYMENT_VERIFICATIONS,
            CF_META,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn handle(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| WorkflowError::Storage(format!("column family '{name}' not found")))
    }

    fn read<T: DeserializeOwned>(&self, family: &'static str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.handle(family)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        family: &'static str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.handle(family)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Values of every key in `family` that starts with `prefix`, in key order.
    fn scan_prefix<T: DeserializeOwned>(&self, family: &'static str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.handle(family)?, IteratorMode::From(prefix, Direction::Forward));
        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn counter(&self, name: &str) -> Result<u64> {
        match self.db.get_cf(self.handle(CF_META)?, name)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| WorkflowError::Storage(format!("corrupt counter '{name}'")))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Bumps a counter inside `batch`. Callers hold `write_lock`.
    fn next_counter(&self, batch: &mut WriteBatch, name: &str) -> Result<u64> {
        let next = self.counter(name)? + 1;
        batch.put_cf(self.handle(CF_META)?, name, next.to_be_bytes());
        Ok(next)
    }

    fn load_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, &id.0.to_be_bytes())
    }

    /// Version compare plus token uniqueness; returns the stored row.
    fn check_write(&self, payment: &Payment) -> Result<Payment> {
        let stored = self
            .load_payment(payment.id)?
            .ok_or_else(|| WorkflowError::not_found("payment", payment.id))?;
        if stored.version != payment.version {
            return Err(WorkflowError::PersistenceConflict {
                payment_id: payment.id,
            });
        }
        if stored.voucher_number != payment.voucher_number {
            return Err(WorkflowError::Validation(
                "Voucher number cannot be changed".to_string(),
            ));
        }
        if let Some(token) = &payment.verification_token
            && let Some(owner) = self.read::<PaymentId>(CF_TOKENS, token.as_bytes())?
            && owner != payment.id
        {
            return Err(WorkflowError::DuplicateToken);
        }
        Ok(stored)
    }

    fn stage_payment(&self, batch: &mut WriteBatch, stored: &Payment, mut payment: Payment) -> Result<Payment> {
        payment.access_count = stored.access_count;
        if let Some(old) = &stored.verification_token
            && payment.verification_token.as_ref() != Some(old)
        {
            batch.delete_cf(self.handle(CF_TOKENS)?, old.as_bytes());
        }
        if let Some(token) = &payment.verification_token {
            self.put(batch, CF_TOKENS, token.as_bytes(), &payment.id)?;
        }
        payment.version += 1;
        self.put(batch, CF_PAYMENTS, &payment.id.0.to_be_bytes(), &payment)?;
        Ok(payment)
    }
}

fn history_key(payment_id: PaymentId, entry_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&payment_id.0.to_be_bytes());
    key[8..].copy_from_slice(&entry_id.to_be_bytes());
    key
}

fn verification_index_key(payment_id: PaymentId, code: &str) -> Vec<u8> {
    let mut key = payment_id.0.to_be_bytes().to_vec();
    key.extend_from_slice(code.as_bytes());
    key
}

#[async_trait]
impl PaymentStore for RocksDbStore {
    async fn insert(&self, payment: ValidatedPayment, created_at: DateTime<Utc>) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let sequence = self.next_counter(&mut batch, LAST_PAYMENT_ID)?;
        let payment = Payment::from_new(
            PaymentId(sequence),
            VoucherNumber::from_sequence(sequence),
            payment,
            created_at,
        );
        self.put(&mut batch, CF_PAYMENTS, &payment.id.0.to_be_bytes(), &payment)?;
        self.db.write(batch)?;
        Ok(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.load_payment(id)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>> {
        match self.read::<PaymentId>(CF_TOKENS, token.as_bytes())? {
            Some(id) => self.load_payment(id),
            None => Ok(None),
        }
    }

    async fn save(&self, payment: Payment) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        let stored = self.check_write(&payment)?;
        let mut batch = WriteBatch::default();
        let payment = self.stage_payment(&mut batch, &stored, payment)?;
        self.db.write(batch)?;
        Ok(payment)
    }

    async fn commit_transition(
        &self,
        payment: Payment,
        mut entry: ApprovalHistoryEntry,
    ) -> Result<(Payment, ApprovalHistoryEntry)> {
        let _guard = self.write_lock.lock().await;
        let stored = self.check_write(&payment)?;
        let mut batch = WriteBatch::default();
        entry.id = self.next_counter(&mut batch, LAST_HISTORY_ID)?;
        let payment = self.stage_payment(&mut batch, &stored, payment)?;
        self.put(&mut batch, CF_HISTORY, &history_key(payment.id, entry.id), &entry)?;
        self.db.write(batch)?;
        Ok((payment, entry))
    }

    async fn increment_access(&self, id: PaymentId) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut payment = self
            .load_payment(id)?
            .ok_or_else(|| WorkflowError::not_found("payment", id))?;
        payment.access_count += 1;
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_PAYMENTS, &id.0.to_be_bytes(), &payment)?;
        self.db.write(batch)?;
        Ok(payment.access_count)
    }

    async fn last_history_entry(&self, id: PaymentId) -> Result<Option<ApprovalHistoryEntry>> {
        let entries: Vec<ApprovalHistoryEntry> = self.scan_prefix(CF_HISTORY, &id.0.to_be_bytes())?;
        Ok(entries
            .into_iter()
            .max_by_key(|entry| (entry.timestamp, entry.id)))
    }

    async fn history(&self, id: PaymentId) -> Result<Vec<ApprovalHistoryEntry>> {
        let mut entries: Vec<ApprovalHistoryEntry> = self.scan_prefix(CF_HISTORY, &id.0.to_be_bytes())?;
        entries.sort_by_key(|entry| (entry.timestamp, entry.id));
        Ok(entries)
    }

    async fn replace_history_entry(&self, entry: ApprovalHistoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = history_key(entry.payment_id, entry.id);
        if self.read::<ApprovalHistoryEntry>(CF_HISTORY, &key)?.is_none() {
            return Err(WorkflowError::not_found("approval history entry", entry.id));
        }
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_HISTORY, &key, &entry)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn delete_history_entry(&self, payment_id: PaymentId, entry_id: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = history_key(payment_id, entry_id);
        if self.read::<ApprovalHistoryEntry>(CF_HISTORY, &key)?.is_none() {
            return Err(WorkflowError::not_found("approval history entry", entry_id));
        }
        self.db.delete_cf(self.handle(CF_HISTORY)?, key)?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for RocksDbStore {
    async fn append(&self, record: VerificationRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let code = record.verification_code.as_bytes();
        if self.db.get_pinned_cf(self.handle(CF_VERIFICATIONS)?, code)?.is_some() {
            return Err(WorkflowError::DuplicateCode(record.verification_code));
        }
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_VERIFICATIONS, code, &record)?;
        if let Some(payment_id) = record.payment_id {
            batch.put_cf(
                self.handle(CF_PAYMENT_VERIFICATIONS)?,
                verification_index_key(payment_id, &record.verification_code),
                code,
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<VerificationRecord>> {
        self.read(CF_VERIFICATIONS, code.as_bytes())
    }

    async fn for_payment(&self, id: PaymentId) -> Result<Vec<VerificationRecord>> {
        let prefix = id.0.to_be_bytes();
        let iter = self.db.iterator_cf(
            self.handle(CF_PAYMENT_VERIFICATIONS)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );
        let mut records = Vec::new();
        for item in iter {
            let (key, code) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(record) = self.read::<VerificationRecord>(CF_VERIFICATIONS, &code)? {
                records.push(record);
            }
        }
        records.sort_by_key(|record: &VerificationRecord| record.timestamp);
        Ok(records)
    }

    async fn count(&self) -> Result<usize> {
        let iter = self
            .db
            .iterator_cf(self.handle(CF_VERIFICATIONS)?, IteratorMode::Start);
        let mut count = 0;
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }

    async fn replace(&self, record: VerificationRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let code = record.verification_code.clone();
        let existing: VerificationRecord = self
            .read(CF_VERIFICATIONS, code.as_bytes())?
            .ok_or_else(|| WorkflowError::not_found("verification record", &code))?;
        let index = self.handle(CF_PAYMENT_VERIFICATIONS)?;
        let mut batch = WriteBatch::default();
        if let Some(old) = existing.payment_id {
            batch.delete_cf(index, verification_index_key(old, &code));
        }
        if let Some(new) = record.payment_id {
            batch.put_cf(index, verification_index_key(new, &code), code.as_bytes());
        }
        self.put(&mut batch, CF_VERIFICATIONS, code.as_bytes(), &record)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn delete(&self, code: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let existing: VerificationRecord = self
            .read(CF_VERIFICATIONS, code.as_bytes())?
            .ok_or_else(|| WorkflowError::not_found("verification record", code))?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.handle(CF_VERIFICATIONS)?, code.as_bytes());
        if let Some(payment_id) = existing.payment_id {
            batch.delete_cf(
                self.handle(CF_PAYMENT_VERIFICATIONS)?,
                verification_index_key(payment_id, code),
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let records = self.handle(CF_VERIFICATIONS)?;
        let index = self.handle(CF_PAYMENT_VERIFICATIONS)?;
        let mut batch = WriteBatch::default();
        let mut purged = 0;
        for item in self.db.iterator_cf(records, IteratorMode::Start) {
            let (key, value) = item?;
            let record: VerificationRecord = serde_json::from_slice(&value)?;
            if record.timestamp < cutoff {
                batch.delete_cf(records, &key);
                if let Some(payment_id) = record.payment_id {
                    batch.delete_cf(index, verification_index_key(payment_id, &record.verification_code));
                }
                purged += 1;
            }
        }
        self.db.write(batch)?;
        Ok(purged)
    }
}

#[async_trait]
impl CodeSequence for RocksDbStore {
    async fn next_code(&self) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let value = self.next_counter(&mut batch, LAST_VERIFICATION_SEQ)?;
        self.db.write(batch)?;
        Ok(format!("VER/{value:06}"))
    }
}
