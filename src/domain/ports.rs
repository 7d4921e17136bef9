//! Collaborator traits the application layer depends on.

use super::actor::Actor;
use super::audit::{ApprovalHistoryEntry, VerificationRecord};
use super::payment::{Payment, PaymentId, ValidatedPayment};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persistence for payments and their approval history.
///
/// History lives next to the payment so a state change and its history row
/// commit together.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persists a new draft, assigning its id and voucher number.
    async fn insert(&self, payment: ValidatedPayment, created_at: DateTime<Utc>) -> Result<Payment>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>>;

    /// Writes `payment` if the persisted version still equals `payment.version`.
    ///
    /// Fails with `PersistenceConflict` on a version mismatch and with
    /// `DuplicateToken` when the token belongs to another payment. The
    /// persisted access counter is always kept.
    async fn save(&self, payment: Payment) -> Result<Payment>;

    /// Same compare-and-write as [`PaymentStore::save`], appending `entry` in
    /// the same atomic step. Returns the entry with its assigned id.
    async fn commit_transition(
        &self,
        payment: Payment,
        entry: ApprovalHistoryEntry,
    ) -> Result<(Payment, ApprovalHistoryEntry)>;

    /// Atomically bumps `access_count`, returning the new value.
    async fn increment_access(&self, id: PaymentId) -> Result<u64>;

    /// Most recent history row by timestamp.
    async fn last_history_entry(&self, id: PaymentId) -> Result<Option<ApprovalHistoryEntry>>;

    /// All history rows for a payment, oldest first.
    async fn history(&self, id: PaymentId) -> Result<Vec<ApprovalHistoryEntry>>;

    async fn replace_history_entry(&self, entry: ApprovalHistoryEntry) -> Result<()>;

    async fn delete_history_entry(&self, payment_id: PaymentId, entry_id: u64) -> Result<()>;
}

/// Append-only storage for verification records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Fails with `DuplicateCode` if the code is already taken.
    async fn append(&self, record: VerificationRecord) -> Result<()>;

    async fn get(&self, code: &str) -> Result<Option<VerificationRecord>>;

    /// Records for one payment, oldest first.
    async fn for_payment(&self, id: PaymentId) -> Result<Vec<VerificationRecord>>;

    async fn count(&self) -> Result<usize>;

    async fn replace(&self, record: VerificationRecord) -> Result<()>;

    async fn delete(&self, code: &str) -> Result<()>;

    /// Removes records older than `cutoff`, returning how many were dropped.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Source of sequence-assigned verification codes.
#[async_trait]
pub trait CodeSequence: Send + Sync {
    async fn next_code(&self) -> Result<String>;
}

/// The general ledger. Posting an approved payment goes through here.
///
/// Implementations must be idempotent on `idempotency_key`: a second call
/// with a key that was already booked books nothing and returns the original
/// reference. The workflow passes the voucher number, so concurrent or
/// retried posts of one payment produce a single ledger entry.
#[async_trait]
pub trait LedgerPoster: Send + Sync {
    /// Returns the ledger's reference for the booked entry.
    async fn post(&self, payment: &Payment, idempotency_key: &str) -> Result<String>;
}

#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn resolve(&self, actor_id: &str) -> Result<Option<Actor>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type AuditStoreRef = Arc<dyn AuditStore>;
pub type CodeSequenceRef = Arc<dyn CodeSequence>;
pub type LedgerPosterRef = Arc<dyn LedgerPoster>;
pub type ActorDirectoryRef = Arc<dyn ActorDirectory>;
pub type ClockRef = Arc<dyn Clock>;
