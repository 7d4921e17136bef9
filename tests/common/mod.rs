#![allow(dead_code)]

use chrono::Utc;
use payguard::application::{Backends, Services};
use payguard::config::WorkflowConfig;
use payguard::domain::actor::{Actor, Capability, Scope};
use payguard::domain::payment::{Direction, NewPayment, Payment, PaymentFeatures};
use payguard::infrastructure::clock::ManualClock;
use payguard::infrastructure::in_memory::{InMemoryAuditStore, InMemoryPaymentStore, RecordingLedger};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct Harness {
    pub services: Services,
    pub clock: ManualClock,
    pub payments: Arc<InMemoryPaymentStore>,
    pub records: Arc<InMemoryAuditStore>,
    pub ledger: Arc<RecordingLedger>,
}

pub fn clerk() -> Actor {
    Actor::new("clerk")
}

pub fn reviewer() -> Actor {
    Actor::new("rita").with_group("reviewers", &[Capability::Reviewer], Scope::company("ACME"))
}

pub fn approver() -> Actor {
    Actor::new("alan").with_group("approvers", &[Capability::Approver], Scope::All)
}

pub fn authorizer() -> Actor {
    Actor::new("ava").with_group("authorizers", &[Capability::Authorizer], Scope::All)
}

pub fn poster() -> Actor {
    Actor::new("pat").with_group("accounting", &[Capability::Poster], Scope::All)
}

pub fn auditor() -> Actor {
    Actor::new("audra").with_group("audit", &[Capability::ManageAudit], Scope::All)
}

pub fn directory() -> Vec<Actor> {
    vec![clerk(), reviewer(), approver(), authorizer(), poster(), auditor()]
}

pub fn default_config() -> WorkflowConfig {
    WorkflowConfig {
        actors: directory(),
        code_backoff_ms: 0,
        ..WorkflowConfig::default()
    }
}

/// In-memory services on a manual clock, keeping handles to the concrete
/// stores for assertions.
pub fn harness(config: WorkflowConfig) -> Harness {
    let clock = ManualClock::new(Utc::now());
    let payments = Arc::new(InMemoryPaymentStore::new());
    let records = Arc::new(InMemoryAuditStore::new());
    let ledger = Arc::new(RecordingLedger::new());
    let backends = Backends {
        payments: payments.clone(),
        records: records.clone(),
        ledger: ledger.clone(),
        clock: Arc::new(clock.clone()),
        ..Backends::in_memory(&config)
    };
    let services = Services::assemble(&config, backends).unwrap();
    Harness {
        services,
        clock,
        payments,
        records,
        ledger,
    }
}

pub fn new_payment(amount: Decimal) -> NewPayment {
    NewPayment {
        company: "ACME".into(),
        amount,
        currency: "USD".into(),
        counterparty_reference: "V-100".into(),
        counterparty_name: "Globex Supplies".into(),
        direction: Direction::Outbound,
        features: PaymentFeatures::default(),
    }
}

pub async fn create(harness: &Harness, amount: Decimal) -> Payment {
    harness
        .services
        .workflow
        .create_payment(new_payment(amount))
        .await
        .unwrap()
}
