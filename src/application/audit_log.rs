use super::codes::VerificationCodes;
use super::permission::PermissionGate;
use crate::domain::actor::{Actor, Capability, Scope};
use crate::domain::audit::{
    ActionType, ApprovalHistoryEntry, AuditTrailEntry, VerificationDraft, VerificationRecord,
    VerificationStats,
};
use crate::domain::payment::{ApprovalState, Payment, PaymentId};
use crate::domain::ports::{AuditStoreRef, PaymentStoreRef};
use crate::error::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

/// Bounds for the retry-until-unique code loop.
#[derive(Debug, Clone, Copy)]
pub struct CodeRetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for CodeRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            backoff: Duration::from_millis(2),
        }
    }
}

/// The immutable audit trail: verification records and approval history.
///
/// Normal workflow code can only append. Amending or deleting rows requires
/// the `manage_audit` capability.
pub struct AuditLog {
    payments: PaymentStoreRef,
    records: AuditStoreRef,
    codes: VerificationCodes,
    gate: PermissionGate,
    retry: CodeRetryPolicy,
}

impl AuditLog {
    pub fn new(
        payments: PaymentStoreRef,
        records: AuditStoreRef,
        codes: VerificationCodes,
        gate: PermissionGate,
        retry: CodeRetryPolicy,
    ) -> Self {
        Self {
            payments,
            records,
            codes,
            gate,
            retry,
        }
    }

    /// Appends a verification record under a freshly generated unique code.
    ///
    /// Collisions are retried internally and never surface. The only error
    /// returned is a storage failure.
    pub async fn record_verification(&self, draft: VerificationDraft) -> Result<VerificationRecord> {
        if let Some(code) = self.codes.from_sequence().await
            && let Some(record) = self.try_append(&draft, code).await?
        {
            return Ok(record);
        }

        for attempt in 1..=self.retry.max_attempts {
            let code = self.codes.synthesize(&draft.request.actor_id);
            if let Some(record) = self.try_append(&draft, code).await? {
                return Ok(record);
            }
            tokio::time::sleep(self.retry.backoff * attempt).await;
        }

        warn!(
            attempts = self.retry.max_attempts,
            actor = %draft.request.actor_id,
            "verification code attempts exhausted, falling back to uuid code"
        );
        loop {
            if let Some(record) = self.try_append(&draft, self.codes.fallback()).await? {
                return Ok(record);
            }
        }
    }

    /// `Ok(None)` means the code was taken and another candidate is needed.
    async fn try_append(
        &self,
        draft: &VerificationDraft,
        code: String,
    ) -> Result<Option<VerificationRecord>> {
        let record = draft.clone().into_record(code);
        match self.records.append(record.clone()).await {
            Ok(()) => Ok(Some(record)),
            Err(WorkflowError::DuplicateCode(code)) => {
                tracing::debug!(%code, "verification code collision");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Builds the history row for a transition out of `payment`'s current state.
    ///
    /// The previous row is found through the store, ordered by time, so the
    /// duration stays correct with concurrent writers.
    pub async fn history_entry(
        &self,
        payment: &Payment,
        stage_to: ApprovalState,
        action_type: ActionType,
        actor: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalHistoryEntry> {
        let since = match self.payments.last_history_entry(payment.id).await? {
            Some(previous) => previous.timestamp,
            None => payment.created_at,
        };
        Ok(ApprovalHistoryEntry {
            id: 0,
            payment_id: payment.id,
            stage_from: payment.approval_state,
            stage_to,
            action_type,
            actor: actor.to_string(),
            timestamp: now,
            comment,
            duration_in_previous_stage: (now - since).num_seconds().max(0),
        })
    }

    pub async fn get_audit_trail(&self, payment_id: PaymentId) -> Result<Vec<AuditTrailEntry>> {
        self.require_payment(payment_id).await?;
        let history = self.payments.history(payment_id).await?;
        Ok(history.iter().map(AuditTrailEntry::from).collect())
    }

    pub async fn history(&self, payment_id: PaymentId) -> Result<Vec<ApprovalHistoryEntry>> {
        self.require_payment(payment_id).await?;
        self.payments.history(payment_id).await
    }

    pub async fn verification_records(&self, payment_id: PaymentId) -> Result<Vec<VerificationRecord>> {
        self.records.for_payment(payment_id).await
    }

    pub async fn verification_record(&self, code: &str) -> Result<VerificationRecord> {
        self.records
            .get(code)
            .await?
            .ok_or_else(|| WorkflowError::not_found("verification record", code))
    }

    pub async fn verification_stats(&self, payment_id: PaymentId) -> Result<VerificationStats> {
        let records = self.records.for_payment(payment_id).await?;
        Ok(VerificationStats::from_records(&records))
    }

    pub async fn amend_verification(&self, actor: &Actor, record: VerificationRecord) -> Result<()> {
        self.require_maintenance(actor)?;
        info!(actor = %actor.id, code = %record.verification_code, "amending verification record");
        self.records.replace(record).await
    }

    pub async fn delete_verification(&self, actor: &Actor, code: &str) -> Result<()> {
        self.require_maintenance(actor)?;
        info!(actor = %actor.id, %code, "deleting verification record");
        self.records.delete(code).await
    }

    pub async fn amend_history(&self, actor: &Actor, entry: ApprovalHistoryEntry) -> Result<()> {
        self.require_maintenance(actor)?;
        info!(actor = %actor.id, entry = entry.id, "amending approval history");
        self.payments.replace_history_entry(entry).await
    }

    pub async fn delete_history(&self, actor: &Actor, payment_id: PaymentId, entry_id: u64) -> Result<()> {
        self.require_maintenance(actor)?;
        info!(actor = %actor.id, %payment_id, entry = entry_id, "deleting approval history");
        self.payments.delete_history_entry(payment_id, entry_id).await
    }

    /// Retention purge of verification records older than `cutoff`.
    pub async fn purge_verifications_before(&self, actor: &Actor, cutoff: DateTime<Utc>) -> Result<usize> {
        self.require_maintenance(actor)?;
        let purged = self.records.purge_before(cutoff).await?;
        info!(actor = %actor.id, purged, %cutoff, "purged verification records");
        Ok(purged)
    }

    fn require_maintenance(&self, actor: &Actor) -> Result<()> {
        self.gate.require(actor, Capability::ManageAudit, &Scope::All)
    }

    async fn require_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.payments
            .get(payment_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("payment", payment_id))
    }
}
