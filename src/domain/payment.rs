use crate::error::WorkflowError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the persisted [`Payment`] layout.
pub const PAYMENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub u64);

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable voucher number, `PV/<sequence>`.
///
/// Assigned by the store on first persistence and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoucherNumber(String);

impl VoucherNumber {
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("PV/{sequence:05}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoucherNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A strictly positive monetary amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, WorkflowError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(WorkflowError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = WorkflowError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// ISO-4217 style three letter currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, WorkflowError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code))
        } else {
            Err(WorkflowError::Validation(format!(
                "Invalid currency code '{code}'"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub reference: String,
    pub name: String,
}

/// Position of a payment in the approval lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Draft,
    UnderReview,
    ForApproval,
    ForAuthorization,
    Approved,
    Posted,
    Cancelled,
    Rejected,
}

impl ApprovalState {
    pub const ALL: [ApprovalState; 8] = [
        ApprovalState::Draft,
        ApprovalState::UnderReview,
        ApprovalState::ForApproval,
        ApprovalState::ForAuthorization,
        ApprovalState::Approved,
        ApprovalState::Posted,
        ApprovalState::Cancelled,
        ApprovalState::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Draft => "draft",
            ApprovalState::UnderReview => "under_review",
            ApprovalState::ForApproval => "for_approval",
            ApprovalState::ForAuthorization => "for_authorization",
            ApprovalState::Approved => "approved",
            ApprovalState::Posted => "posted",
            ApprovalState::Cancelled => "cancelled",
            ApprovalState::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ApprovalState::Posted | ApprovalState::Cancelled)
    }

    /// States that sit between submission and a final decision.
    pub fn is_pending_decision(&self) -> bool {
        matches!(
            self,
            ApprovalState::UnderReview | ApprovalState::ForApproval | ApprovalState::ForAuthorization
        )
    }

    /// The allowed-transition table. Nothing outside it may ever be realized.
    pub fn allowed_targets(&self) -> &'static [ApprovalState] {
        use ApprovalState::*;
        match self {
            Draft => &[UnderReview, Approved, Cancelled],
            UnderReview => &[ForApproval, Rejected, Cancelled],
            ForApproval => &[ForAuthorization, Approved, Rejected, Cancelled],
            ForAuthorization => &[Approved, Rejected, Cancelled],
            Approved => &[Posted, Cancelled],
            Rejected => &[Draft, Cancelled],
            Posted | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: ApprovalState) -> bool {
        self.allowed_targets().contains(&next)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalState {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApprovalState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| WorkflowError::Validation(format!("Unknown approval state '{s}'")))
    }
}

/// Optional capabilities a payment declares up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFeatures {
    pub qr_verification: bool,
}

impl Default for PaymentFeatures {
    fn default() -> Self {
        Self {
            qr_verification: true,
        }
    }
}

/// The subject of the approval workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub voucher_number: VoucherNumber,
    pub schema_version: u32,
    pub company: String,
    pub amount: Amount,
    pub currency: Currency,
    pub counterparty: Counterparty,
    pub direction: Direction,
    pub approval_state: ApprovalState,
    pub verification_token: Option<String>,
    #[serde(rename = "verification_token_expiry")]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(rename = "verification_access_count")]
    pub access_count: u64,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub authorized_by: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub features: PaymentFeatures,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store on every successful write.
    pub version: u64,
}

impl Payment {
    /// Builds a draft payment from validated input. Only stores call this.
    pub fn from_new(
        id: PaymentId,
        voucher_number: VoucherNumber,
        new: ValidatedPayment,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            voucher_number,
            schema_version: PAYMENT_SCHEMA_VERSION,
            company: new.company,
            amount: new.amount,
            currency: new.currency,
            counterparty: new.counterparty,
            direction: new.direction,
            approval_state: ApprovalState::Draft,
            verification_token: None,
            token_expiry: None,
            access_count: 0,
            reviewed_by: None,
            reviewed_at: None,
            approved_by: None,
            approved_at: None,
            authorized_by: None,
            authorized_at: None,
            posted_at: None,
            rejection_reason: None,
            features: new.features,
            created_at,
            version: 0,
        }
    }

    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry.is_some_and(|expiry| expiry <= now)
    }

    /// Clears the decision fields, as rejection requires.
    pub fn clear_decisions(&mut self) {
        self.reviewed_by = None;
        self.reviewed_at = None;
        self.approved_by = None;
        self.approved_at = None;
        self.authorized_by = None;
        self.authorized_at = None;
    }

    pub fn snapshot(&self) -> PaymentSnapshot {
        PaymentSnapshot {
            voucher_number: self.voucher_number.to_string(),
            amount: self.amount.value(),
            currency: self.currency.as_str().to_string(),
            counterparty_name: self.counterparty.name.clone(),
            approval_state: self.approval_state,
            company: self.company.clone(),
        }
    }
}

/// Caller input for registering a payment.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub company: String,
    pub amount: Decimal,
    pub currency: String,
    pub counterparty_reference: String,
    pub counterparty_name: String,
    pub direction: Direction,
    #[serde(default)]
    pub features: PaymentFeatures,
}

/// [`NewPayment`] after its invariants were checked.
#[derive(Debug, Clone)]
pub struct ValidatedPayment {
    pub company: String,
    pub amount: Amount,
    pub currency: Currency,
    pub counterparty: Counterparty,
    pub direction: Direction,
    pub features: PaymentFeatures,
}

impl NewPayment {
    pub fn validate(self) -> Result<ValidatedPayment, WorkflowError> {
        if self.company.trim().is_empty() {
            return Err(WorkflowError::Validation("Company is required".to_string()));
        }
        Ok(ValidatedPayment {
            amount: Amount::new(self.amount)?,
            currency: Currency::new(&self.currency)?,
            company: self.company,
            counterparty: Counterparty {
                reference: self.counterparty_reference,
                name: self.counterparty_name,
            },
            direction: self.direction,
            features: self.features,
        })
    }
}

/// Read-only view returned to verification callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub voucher_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub counterparty_name: String,
    pub approval_state: ApprovalState,
    pub company: String,
}
