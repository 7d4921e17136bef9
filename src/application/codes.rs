use crate::domain::ports::{ClockRef, CodeSequenceRef};
use rand::RngCore;
use tracing::debug;
use uuid::Uuid;

/// Produces candidate verification codes.
///
/// Candidates come from three independent sources: the sequence, a
/// timestamp/entropy/actor composite, and finally a UUID. Uniqueness is
/// enforced by the audit store when the record is appended.
#[derive(Clone)]
pub struct VerificationCodes {
    sequence: Option<CodeSequenceRef>,
    clock: ClockRef,
}

impl VerificationCodes {
    pub fn new(sequence: Option<CodeSequenceRef>, clock: ClockRef) -> Self {
        Self { sequence, clock }
    }

    /// The next sequence-assigned code, if the sequence is available.
    pub async fn from_sequence(&self) -> Option<String> {
        let sequence = self.sequence.as_ref()?;
        match sequence.next_code().await {
            Ok(code) => Some(code),
            Err(err) => {
                debug!(error = %err, "verification sequence unavailable");
                None
            }
        }
    }

    /// `VER-{unix_micros}-{8 hex}-{actor}`.
    pub fn synthesize(&self, actor_id: &str) -> String {
        let mut entropy = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut entropy);
        format!(
            "VER-{}-{}-{}",
            self.clock.now().timestamp_micros(),
            hex::encode(entropy),
            sanitize_actor(actor_id)
        )
    }

    pub fn fallback(&self) -> String {
        format!("VER-UUID-{}", Uuid::new_v4())
    }
}

fn sanitize_actor(actor_id: &str) -> String {
    let cleaned: String = actor_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(32)
        .collect();
    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryCodeSequence;
    use chrono::Utc;
    use std::sync::Arc;

    fn codes(sequence: Option<CodeSequenceRef>) -> VerificationCodes {
        VerificationCodes::new(sequence, Arc::new(ManualClock::new(Utc::now())))
    }

    #[tokio::test]
    async fn test_sequence_preferred_when_available() {
        let codes = codes(Some(Arc::new(InMemoryCodeSequence::new())));
        assert_eq!(codes.from_sequence().await.as_deref(), Some("VER/000001"));
    }

    #[tokio::test]
    async fn test_unavailable_sequence_yields_none() {
        assert!(codes(Some(Arc::new(InMemoryCodeSequence::unavailable())))
            .from_sequence()
            .await
            .is_none());
        assert!(codes(None).from_sequence().await.is_none());
    }

    #[test]
    fn test_synthesized_format() {
        let codes = codes(None);
        let code = codes.synthesize("user 42");
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "VER");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[3], "user_42");
    }

    #[test]
    fn test_synthesized_codes_differ_at_same_instant() {
        let codes = codes(None);
        let a = codes.synthesize("public");
        let b = codes.synthesize("public");
        // Same frozen clock, so only the entropy separates them.
        assert_ne!(a, b);
    }

    #[test]
    fn test_fallback_is_uuid_based() {
        let code = codes(None).fallback();
        assert!(code.starts_with("VER-UUID-"));
        assert!(Uuid::parse_str(&code["VER-UUID-".len()..]).is_ok());
    }
}
