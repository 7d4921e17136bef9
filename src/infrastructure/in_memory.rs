use crate::domain::actor::Actor;
use crate::domain::audit::{ApprovalHistoryEntry, VerificationRecord};
use crate::domain::payment::{Payment, PaymentId, ValidatedPayment, VoucherNumber};
use crate::domain::ports::{ActorDirectory, AuditStore, CodeSequence, LedgerPoster, PaymentStore};
use crate::error::{Result, WorkflowError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct PaymentTables {
    payments: HashMap<PaymentId, Payment>,
    tokens: HashMap<String, PaymentId>,
    history: HashMap<PaymentId, Vec<ApprovalHistoryEntry>>,
    last_payment_id: u64,
    last_history_id: u64,
}

impl PaymentTables {
    /// The compare half of compare-and-write, plus the token uniqueness check.
    fn check_write(&self, payment: &Payment) -> Result<()> {
        let stored = self
            .payments
            .get(&payment.id)
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
            && let Some(owner) = self.tokens.get(token)
            && *owner != payment.id
        {
            return Err(WorkflowError::DuplicateToken);
        }
        Ok(())
    }

    fn write(&mut self, mut payment: Payment) -> Payment {
        if let Some(previous) = self.payments.get(&payment.id) {
            payment.access_count = previous.access_count;
            if let Some(old) = &previous.verification_token
                && payment.verification_token.as_ref() != Some(old)
            {
                self.tokens.remove(old);
            }
        }
        if let Some(token) = &payment.verification_token {
            self.tokens.insert(token.clone(), payment.id);
        }
        payment.version += 1;
        self.payments.insert(payment.id, payment.clone());
        payment
    }
}

/// A thread-safe in-memory payment store.
///
/// Payments, the token index and approval history share one lock so that a
/// transition and its history row are written together.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    tables: Arc<RwLock<PaymentTables>>,
    faults: Arc<StoreFaults>,
}

/// Injected storage faults, all off by default.
#[derive(Default)]
struct StoreFaults {
    token_lookups: AtomicBool,
    access_counter: AtomicBool,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `find_by_token` fail with a storage error.
    pub fn fail_token_lookups(&self, failing: bool) {
        self.faults.token_lookups.store(failing, Ordering::SeqCst);
    }

    /// Makes `increment_access` fail with a storage error.
    pub fn fail_access_counter(&self, failing: bool) {
        self.faults.access_counter.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: ValidatedPayment, created_at: DateTime<Utc>) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        tables.last_payment_id += 1;
        let sequence = tables.last_payment_id;
        let payment = Payment::from_new(
            PaymentId(sequence),
            VoucherNumber::from_sequence(sequence),
            payment,
            created_at,
        );
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>> {
        if self.faults.token_lookups.load(Ordering::SeqCst) {
            return Err(WorkflowError::Storage("token index unavailable".to_string()));
        }
        let tables = self.tables.read().await;
        Ok(tables
            .tokens
            .get(token)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn save(&self, payment: Payment) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        tables.check_write(&payment)?;
        Ok(tables.write(payment))
    }

    async fn commit_transition(
        &self,
        payment: Payment,
        mut entry: ApprovalHistoryEntry,
    ) -> Result<(Payment, ApprovalHistoryEntry)> {
        let mut tables = self.tables.write().await;
        tables.check_write(&payment)?;
        tables.last_history_id += 1;
        entry.id = tables.last_history_id;
        let payment = tables.write(payment);
        tables
            .history
            .entry(payment.id)
            .or_default()
            .push(entry.clone());
        Ok((payment, entry))
    }

    async fn increment_access(&self, id: PaymentId) -> Result<u64> {
        if self.faults.access_counter.load(Ordering::SeqCst) {
            return Err(WorkflowError::Storage("access counter unavailable".to_string()));
        }
        let mut tables = self.tables.write().await;
        let payment = tables
            .payments
            .get_mut(&id)
            .ok_or_else(|| WorkflowError::not_found("payment", id))?;
        payment.access_count += 1;
        Ok(payment.access_count)
    }

    async fn last_history_entry(&self, id: PaymentId) -> Result<Option<ApprovalHistoryEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.history.get(&id).and_then(|entries| {
            entries
                .iter()
                .max_by_key(|entry| (entry.timestamp, entry.id))
                .cloned()
        }))
    }

    async fn history(&self, id: PaymentId) -> Result<Vec<ApprovalHistoryEntry>> {
        let tables = self.tables.read().await;
        let mut entries = tables.history.get(&id).cloned().unwrap_or_default();
        entries.sort_by_key(|entry| (entry.timestamp, entry.id));
        Ok(entries)
    }

    async fn replace_history_entry(&self, entry: ApprovalHistoryEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .history
            .get_mut(&entry.payment_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.id == entry.id))
            .ok_or_else(|| WorkflowError::not_found("approval history entry", entry.id))?;
        *slot = entry;
        Ok(())
    }

    async fn delete_history_entry(&self, payment_id: PaymentId, entry_id: u64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let entries = tables
            .history
            .get_mut(&payment_id)
            .ok_or_else(|| WorkflowError::not_found("approval history entry", entry_id))?;
        let before = entries.len();
        entries.retain(|entry| entry.id != entry_id);
        if entries.len() == before {
            return Err(WorkflowError::not_found("approval history entry", entry_id));
        }
        Ok(())
    }
}

/// A thread-safe in-memory verification log keyed by verification code.
#[derive(Default, Clone)]
pub struct InMemoryAuditStore {
    records: Arc<RwLock<HashMap<String, VerificationRecord>>>,
}

impl InMemoryAuditStore {
    /// Creates a new, empty in-memory audit store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: VerificationRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.verification_code) {
            return Err(WorkflowError::DuplicateCode(record.verification_code));
        }
        records.insert(record.verification_code.clone(), record);
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<VerificationRecord>> {
        let records = self.records.read().await;
        Ok(records.get(code).cloned())
    }

    async fn for_payment(&self, id: PaymentId) -> Result<Vec<VerificationRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|record| record.payment_id == Some(id))
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.timestamp);
        Ok(matching)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    async fn replace(&self, record: VerificationRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.verification_code) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(WorkflowError::not_found(
                "verification record",
                record.verification_code,
            )),
        }
    }

    async fn delete(&self, code: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .remove(code)
            .map(|_| ())
            .ok_or_else(|| WorkflowError::not_found("verification record", code))
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.timestamp >= cutoff);
        Ok(before - records.len())
    }
}

/// Sequence of `VER/000001`-style codes.
///
/// An unavailable sequence always errors, which pushes callers onto the
/// synthesized code path.
#[derive(Default)]
pub struct InMemoryCodeSequence {
    next: AtomicU64,
    unavailable: bool,
}

impl InMemoryCodeSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            next: AtomicU64::new(0),
            unavailable: true,
        }
    }
}

#[async_trait]
impl CodeSequence for InMemoryCodeSequence {
    async fn next_code(&self) -> Result<String> {
        if self.unavailable {
            return Err(WorkflowError::Storage(
                "verification sequence unavailable".to_string(),
            ));
        }
        let value = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("VER/{value:06}"))
    }
}

#[derive(Default)]
struct LedgerBook {
    posted: Vec<PaymentId>,
    references: HashMap<String, String>,
}

/// Ledger stand-in that remembers what it booked, once per idempotency key.
#[derive(Default)]
pub struct RecordingLedger {
    book: Mutex<LedgerBook>,
    failing: AtomicBool,
    latency_ms: AtomicU64,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay applied before every booking, to widen race windows in tests.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn posted(&self) -> Vec<PaymentId> {
        self.book.lock().await.posted.clone()
    }
}

#[async_trait]
impl LedgerPoster for RecordingLedger {
    async fn post(&self, payment: &Payment, idempotency_key: &str) -> Result<String> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkflowError::Posting(format!(
                "ledger rejected {}",
                payment.voucher_number
            )));
        }
        let mut book = self.book.lock().await;
        if let Some(reference) = book.references.get(idempotency_key) {
            return Ok(reference.clone());
        }
        book.posted.push(payment.id);
        let reference = format!("JE/{:05}", book.posted.len());
        book.references
            .insert(idempotency_key.to_string(), reference.clone());
        Ok(reference)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryActorDirectory {
    actors: Arc<RwLock<HashMap<String, Actor>>>,
}

impl InMemoryActorDirectory {
    pub fn new(actors: impl IntoIterator<Item = Actor>) -> Self {
        let actors = actors
            .into_iter()
            .map(|actor| (actor.id.clone(), actor))
            .collect();
        Self {
            actors: Arc::new(RwLock::new(actors)),
        }
    }

    pub async fn upsert(&self, actor: Actor) {
        self.actors.write().await.insert(actor.id.clone(), actor);
    }
}

#[async_trait]
impl ActorDirectory for InMemoryActorDirectory {
    async fn resolve(&self, actor_id: &str) -> Result<Option<Actor>> {
        Ok(self.actors.read().await.get(actor_id).cloned())
    }
}
