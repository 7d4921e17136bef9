use super::audit_log::AuditLog;
use super::token::TokenService;
use crate::domain::audit::{RequestContext, VerificationDraft, VerificationOutcome};
use crate::domain::payment::{ApprovalState, Payment, PaymentId, PaymentSnapshot};
use crate::domain::ports::{ClockRef, PaymentStoreRef};
use crate::error::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a public verification call returns. Never an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub success: bool,
    pub message: String,
    /// Code of the audit row written for this call.
    pub code: Option<String>,
    pub outcome: VerificationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<PaymentSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrState {
    Invalid,
    Pending,
    Validated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QrStatus {
    pub status: QrState,
    pub scan_count: u64,
    pub payment_state: Option<ApprovalState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_date: Option<DateTime<Utc>>,
}

impl QrStatus {
    fn invalid() -> Self {
        Self {
            status: QrState::Invalid,
            scan_count: 0,
            payment_state: None,
            validated_date: None,
        }
    }
}

/// Public token lookup. Every `verify` call appends exactly one verification
/// record, whatever the outcome.
pub struct VerificationEndpoint {
    tokens: Arc<TokenService>,
    payments: PaymentStoreRef,
    audit: Arc<AuditLog>,
    clock: ClockRef,
}

impl VerificationEndpoint {
    pub fn new(
        tokens: Arc<TokenService>,
        payments: PaymentStoreRef,
        audit: Arc<AuditLog>,
        clock: ClockRef,
    ) -> Self {
        Self {
            tokens,
            payments,
            audit,
            clock,
        }
    }

    pub async fn verify(&self, token: &str, request: RequestContext) -> VerificationResult {
        match self.tokens.validate(token).await {
            Ok(payment) => self.accept(payment, request).await,
            Err(err) => self.refuse(err, request).await,
        }
    }

    async fn accept(&self, payment: Payment, request: RequestContext) -> VerificationResult {
        let draft = VerificationDraft {
            payment_id: Some(payment.id),
            timestamp: self.clock.now(),
            request,
            outcome: VerificationOutcome::Success,
            context: json!({
                "previous_access_count": payment.access_count,
                "approval_state": payment.approval_state,
            }),
        };
        // The audit row comes first: a counted scan always has a record.
        let record = match self.audit.record_verification(draft).await {
            Ok(record) => record,
            Err(err) => {
                error!(payment = %payment.id, error = %err, "verification succeeded but audit record was not written");
                return failure(VerificationOutcome::Failed, None, Some(err.code()));
            }
        };

        let access_count = match self.payments.increment_access(payment.id).await {
            Ok(count) => count,
            Err(err) => {
                error!(
                    payment = %payment.id,
                    code = %record.verification_code,
                    error = %err,
                    "scan recorded but access counter not updated"
                );
                payment.access_count
            }
        };
        info!(
            payment = %payment.id,
            code = %record.verification_code,
            access_count,
            "payment verified"
        );
        VerificationResult {
            success: true,
            message: format!("Payment {} is authentic", payment.voucher_number),
            code: Some(record.verification_code),
            outcome: VerificationOutcome::Success,
            error: None,
            payment_data: Some(payment.snapshot()),
        }
    }

    async fn refuse(&self, err: WorkflowError, request: RequestContext) -> VerificationResult {
        let (outcome, payment_id) = classify(&err);
        if outcome == VerificationOutcome::Failed {
            error!(error = %err, "verification failed on an internal fault");
        } else {
            warn!(%outcome, actor = %request.actor_id, "verification refused");
        }

        let draft = VerificationDraft {
            payment_id,
            timestamp: self.clock.now(),
            request,
            outcome,
            context: json!({ "reason": err.code() }),
        };
        match self.audit.record_verification(draft).await {
            Ok(record) => failure(outcome, Some(record.verification_code), Some(err.code())),
            Err(audit_err) => {
                error!(error = %audit_err, "cannot write verification record");
                failure(outcome, None, Some(err.code()))
            }
        }
    }

    /// Read-only status check; writes no record and does not count as a scan.
    pub async fn status(&self, token: &str) -> Result<QrStatus> {
        let payment = match self.tokens.validate(token).await {
            Ok(payment) => payment,
            Err(
                WorkflowError::NotFound { .. }
                | WorkflowError::MalformedToken
                | WorkflowError::ExpiredToken { .. },
            ) => return Ok(QrStatus::invalid()),
            Err(err) => return Err(err),
        };

        let stats = self.audit.verification_stats(payment.id).await?;
        Ok(QrStatus {
            status: if stats.success > 0 {
                QrState::Validated
            } else {
                QrState::Pending
            },
            scan_count: payment.access_count,
            payment_state: Some(payment.approval_state),
            validated_date: stats.first_success,
        })
    }
}

fn classify(err: &WorkflowError) -> (VerificationOutcome, Option<PaymentId>) {
    match err {
        WorkflowError::ExpiredToken { payment_id } => (VerificationOutcome::Expired, Some(*payment_id)),
        WorkflowError::NotFound { .. } | WorkflowError::MalformedToken => (VerificationOutcome::Invalid, None),
        _ => (VerificationOutcome::Failed, None),
    }
}

fn failure(outcome: VerificationOutcome, code: Option<String>, error: Option<&'static str>) -> VerificationResult {
    let message = match outcome {
        VerificationOutcome::Expired => "This verification link has expired. Ask the issuer for a new one.",
        VerificationOutcome::Invalid => "This verification link is not valid.",
        _ => "Verification could not be completed. Please try again later.",
    };
    VerificationResult {
        success: false,
        message: message.to_string(),
        code,
        outcome,
        error,
        payment_data: None,
    }
}
