use crate::domain::actor::Capability;
use crate::domain::payment::{ApprovalState, PaymentId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Every failure the approval core can report.
///
/// All variants are recoverable values; nothing in the core panics on an
/// expected failure mode.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("verification token expired; ask an authorized user to issue a new one")]
    ExpiredToken { payment_id: PaymentId },

    #[error("malformed verification token")]
    MalformedToken,

    #[error("action '{action}' is not allowed from state '{from}'")]
    InvalidTransition {
        from: ApprovalState,
        action: &'static str,
    },

    #[error("actor '{actor}' lacks {requirement}")]
    Permission { actor: String, requirement: String },

    /// Internal only: a verification code collided with an existing row.
    #[error("verification code already exists: {0}")]
    DuplicateCode(String),

    /// Internal only: token issuance retries with fresh entropy.
    #[error("verification token already assigned to another payment")]
    DuplicateToken,

    #[error("payment {payment_id} was modified concurrently, please retry")]
    PersistenceConflict { payment_id: PaymentId },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("ledger posting failed: {0}")]
    Posting(String),

    #[error("feature '{0}' is disabled for this payment")]
    FeatureDisabled(&'static str),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn missing_capability(actor: &str, capability: Capability) -> Self {
        Self::Permission {
            actor: actor.to_string(),
            requirement: format!("the '{capability}' capability"),
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PersistenceConflict { .. } | Self::DuplicateCode(_) | Self::DuplicateToken
        )
    }

    /// Stable machine-readable code used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ExpiredToken { .. } => "expired_token",
            Self::MalformedToken => "malformed_token",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Permission { .. } => "permission_denied",
            Self::DuplicateCode(_) => "duplicate_code",
            Self::DuplicateToken => "duplicate_token",
            Self::PersistenceConflict { .. } => "persistence_conflict",
            Self::Validation(_) => "validation_error",
            Self::Posting(_) => "posting_failed",
            Self::FeatureDisabled(_) => "feature_disabled",
            Self::Storage(_) => "storage_error",
            Self::Config(_) => "config_error",
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization error: {err}"))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for WorkflowError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_and_duplicates_are_retryable() {
        assert!(WorkflowError::PersistenceConflict { payment_id: PaymentId(1) }.is_retryable());
        assert!(WorkflowError::DuplicateToken.is_retryable());
        assert!(!WorkflowError::MalformedToken.is_retryable());
        assert!(
            !WorkflowError::InvalidTransition {
                from: ApprovalState::Posted,
                action: "cancel"
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_permission_message_names_capability() {
        let err = WorkflowError::missing_capability("alice", Capability::Reviewer);
        assert_eq!(err.to_string(), "actor 'alice' lacks the 'reviewer' capability");
        assert_eq!(err.code(), "permission_denied");
    }
}
