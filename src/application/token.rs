use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{ClockRef, PaymentStoreRef};
use crate::error::{Result, WorkflowError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use qrcode::QrCode;
use qrcode::render::svg;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Length of every issued token, in URL-safe base64 characters.
pub const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Issues, renders and resolves payment verification tokens.
pub struct TokenService {
    payments: PaymentStoreRef,
    clock: ClockRef,
    ttl: Duration,
    base_url: String,
    issue_attempts: u32,
}

impl TokenService {
    pub fn new(
        payments: PaymentStoreRef,
        clock: ClockRef,
        ttl: Duration,
        base_url: impl Into<String>,
        issue_attempts: u32,
    ) -> Self {
        Self {
            payments,
            clock,
            ttl,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            issue_attempts: issue_attempts.max(1),
        }
    }

    /// Returns the payment's token, generating and persisting one if it has
    /// none or the current one expired. Idempotent while the token is live.
    pub async fn issue_token(&self, payment_id: PaymentId) -> Result<IssuedToken> {
        let payment = self
            .payments
            .get(payment_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("payment", payment_id))?;

        if !payment.features.qr_verification {
            return Err(WorkflowError::FeatureDisabled("qr_verification"));
        }

        let now = self.clock.now();
        if let Some(token) = &payment.verification_token
            && !payment.token_expired(now)
        {
            return Ok(self.issued(token.clone(), payment.token_expiry));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut secret = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut secret);

            let mut candidate = payment.clone();
            let token = compute_token(&payment, now, &secret);
            candidate.verification_token = Some(token.clone());
            candidate.token_expiry = Some(now + self.ttl);

            match self.payments.save(candidate).await {
                Ok(saved) => {
                    info!(payment = %saved.id, voucher = %saved.voucher_number, "issued verification token");
                    return Ok(self.issued(token, saved.token_expiry));
                }
                Err(WorkflowError::DuplicateToken) if attempt < self.issue_attempts => {
                    debug!(payment = %payment.id, attempt, "token collision, retrying with fresh entropy");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn verification_url(&self, token: &str) -> String {
        format!("{}/payment/verify/{}", self.base_url, token)
    }

    /// Renders `url` as an SVG QR code. Same URL, same bytes.
    pub fn render_code(url: &str) -> Result<Vec<u8>> {
        let code = QrCode::new(url.as_bytes())
            .map_err(|err| WorkflowError::Validation(format!("cannot encode QR code: {err}")))?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .build();
        Ok(image.into_bytes())
    }

    /// Resolves a token to its payment.
    pub async fn validate(&self, token: &str) -> Result<Payment> {
        if !is_well_formed(token) {
            return Err(WorkflowError::MalformedToken);
        }
        let payment = self
            .payments
            .find_by_token(token)
            .await?
            .ok_or_else(|| WorkflowError::not_found("verification token", "<redacted>"))?;
        if payment.token_expired(self.clock.now()) {
            return Err(WorkflowError::ExpiredToken {
                payment_id: payment.id,
            });
        }
        Ok(payment)
    }

    fn issued(&self, token: String, expires_at: Option<DateTime<Utc>>) -> IssuedToken {
        IssuedToken {
            url: self.verification_url(&token),
            token,
            expires_at,
        }
    }
}

/// SHA-256 over the payment identity, issue time and a 128-bit secret.
pub fn compute_token(payment: &Payment, issued_at: DateTime<Utc>, secret: &[u8; 16]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payment.id.0.to_be_bytes());
    hasher.update(payment.voucher_number.as_str().as_bytes());
    hasher.update(payment.amount.value().to_string().as_bytes());
    hasher.update(
        issued_at
            .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    hasher.update(secret);
    let mut token = URL_SAFE_NO_PAD.encode(hasher.finalize());
    token.truncate(TOKEN_LENGTH);
    token
}

pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LENGTH
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
