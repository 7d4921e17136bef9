use super::actor::PUBLIC_ACTOR;
use super::payment::{ApprovalState, PaymentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    #[default]
    QrScan,
    ManualEntry,
    ApiCall,
    BulkVerify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Success,
    Failed,
    Expired,
    Invalid,
}

impl VerificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationOutcome::Success => "success",
            VerificationOutcome::Failed => "failed",
            VerificationOutcome::Expired => "expired",
            VerificationOutcome::Invalid => "invalid",
        }
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit per-call context for verification requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub method: VerificationMethod,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::public(VerificationMethod::QrScan)
    }
}

impl RequestContext {
    pub fn public(method: VerificationMethod) -> Self {
        Self {
            actor_id: PUBLIC_ACTOR.to_string(),
            ip: None,
            user_agent: None,
            method,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// One row of the verification audit log. Never updated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub verification_code: String,
    /// `None` when the token did not resolve to any payment.
    pub payment_id: Option<PaymentId>,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub method: VerificationMethod,
    pub outcome: VerificationOutcome,
    pub context: serde_json::Value,
}

/// A verification record before a unique code has been attached.
#[derive(Debug, Clone)]
pub struct VerificationDraft {
    pub payment_id: Option<PaymentId>,
    pub timestamp: DateTime<Utc>,
    pub request: RequestContext,
    pub outcome: VerificationOutcome,
    pub context: serde_json::Value,
}

impl VerificationDraft {
    pub fn into_record(self, verification_code: String) -> VerificationRecord {
        VerificationRecord {
            verification_code,
            payment_id: self.payment_id,
            timestamp: self.timestamp,
            actor: self.request.actor_id,
            source_ip: self.request.ip,
            user_agent: self.request.user_agent,
            method: self.request.method,
            outcome: self.outcome,
            context: self.context,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Submit,
    AutoApprove,
    Review,
    Approve,
    Authorize,
    Post,
    Reject,
    Cancel,
    Resubmit,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Submit => "submit",
            ActionType::AutoApprove => "auto_approve",
            ActionType::Review => "review",
            ActionType::Approve => "approve",
            ActionType::Authorize => "authorize",
            ActionType::Post => "post",
            ActionType::Reject => "reject",
            ActionType::Cancel => "cancel",
            ActionType::Resubmit => "resubmit",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed workflow transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalHistoryEntry {
    /// Assigned by the store on append.
    pub id: u64,
    pub payment_id: PaymentId,
    pub stage_from: ApprovalState,
    pub stage_to: ApprovalState,
    pub action_type: ActionType,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub comment: Option<String>,
    /// Seconds since the previous entry, or since payment creation.
    pub duration_in_previous_stage: i64,
}

/// Flattened row handed to other modules by `get_audit_trail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrailEntry {
    pub date: DateTime<Utc>,
    pub actor: String,
    pub action: ActionType,
    pub from_stage: ApprovalState,
    pub to_stage: ApprovalState,
    pub comment: Option<String>,
    pub duration: i64,
}

impl From<&ApprovalHistoryEntry> for AuditTrailEntry {
    fn from(entry: &ApprovalHistoryEntry) -> Self {
        Self {
            date: entry.timestamp,
            actor: entry.actor.clone(),
            action: entry.action_type,
            from_stage: entry.stage_from,
            to_stage: entry.stage_to,
            comment: entry.comment.clone(),
            duration: entry.duration_in_previous_stage,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub expired: u64,
    pub invalid: u64,
    pub first_success: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

impl VerificationStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a VerificationRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            match record.outcome {
                VerificationOutcome::Success => {
                    stats.success += 1;
                    stats.first_success = Some(
                        stats
                            .first_success
                            .map_or(record.timestamp, |ts| ts.min(record.timestamp)),
                    );
                    stats.last_success = Some(
                        stats
                            .last_success
                            .map_or(record.timestamp, |ts| ts.max(record.timestamp)),
                    );
                }
                VerificationOutcome::Failed => stats.failed += 1,
                VerificationOutcome::Expired => stats.expired += 1,
                VerificationOutcome::Invalid => stats.invalid += 1,
            }
        }
        stats
    }
}
