//! Application layer: the services that orchestrate the approval core.
//!
//! [`Services`] wires them to a set of storage and collaborator backends so
//! the binary, the HTTP layer and the tests all build the same graph.

pub mod audit_log;
pub mod codes;
pub mod permission;
pub mod routing;
pub mod token;
pub mod verification;
pub mod workflow;

use crate::config::WorkflowConfig;
use crate::domain::ports::{
    ActorDirectoryRef, AuditStoreRef, ClockRef, CodeSequenceRef, LedgerPosterRef, PaymentStoreRef,
};
use crate::error::Result;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::in_memory::{
    InMemoryActorDirectory, InMemoryAuditStore, InMemoryCodeSequence, InMemoryPaymentStore,
    RecordingLedger,
};
use audit_log::AuditLog;
use codes::VerificationCodes;
use permission::PermissionGate;
use std::sync::Arc;
use token::TokenService;
use verification::VerificationEndpoint;
use workflow::ApprovalWorkflow;

/// The ports every service graph needs.
#[derive(Clone)]
pub struct Backends {
    pub payments: PaymentStoreRef,
    pub records: AuditStoreRef,
    pub sequence: Option<CodeSequenceRef>,
    pub ledger: LedgerPosterRef,
    pub actors: ActorDirectoryRef,
    pub clock: ClockRef,
}

impl Backends {
    /// In-memory stores, the recording ledger and the system clock, with the
    /// actor directory seeded from `config`.
    pub fn in_memory(config: &WorkflowConfig) -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentStore::new()),
            records: Arc::new(InMemoryAuditStore::new()),
            sequence: Some(Arc::new(InMemoryCodeSequence::new())),
            ledger: Arc::new(RecordingLedger::new()),
            actors: Arc::new(InMemoryActorDirectory::new(config.actors.clone())),
            clock: Arc::new(SystemClock),
        }
    }

    /// RocksDB for payments, history, verification records and the code
    /// sequence; everything else as in [`Backends::in_memory`].
    #[cfg(feature = "storage-rocksdb")]
    pub fn rocksdb<P: AsRef<std::path::Path>>(config: &WorkflowConfig, path: P) -> Result<Self> {
        let store = crate::infrastructure::rocksdb::RocksDbStore::open(path)?;
        Ok(Self {
            payments: Arc::new(store.clone()),
            records: Arc::new(store.clone()),
            sequence: Some(Arc::new(store)),
            ..Self::in_memory(config)
        })
    }
}

/// The assembled service graph. Cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub workflow: Arc<ApprovalWorkflow>,
    pub tokens: Arc<TokenService>,
    pub audit: Arc<AuditLog>,
    pub verification: Arc<VerificationEndpoint>,
    pub actors: ActorDirectoryRef,
}

impl Services {
    pub fn assemble(config: &WorkflowConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        let gate = PermissionGate::new();

        let audit = Arc::new(AuditLog::new(
            backends.payments.clone(),
            backends.records.clone(),
            VerificationCodes::new(backends.sequence.clone(), backends.clock.clone()),
            gate,
            config.code_retry(),
        ));
        let tokens = Arc::new(TokenService::new(
            backends.payments.clone(),
            backends.clock.clone(),
            config.token_ttl(),
            config.verification_base_url.clone(),
            config.token_issue_attempts,
        ));
        let workflow = Arc::new(ApprovalWorkflow::new(
            backends.payments.clone(),
            audit.clone(),
            gate,
            backends.actors.clone(),
            backends.ledger.clone(),
            backends.clock.clone(),
            config.routing_policy(),
            config.stage_plan()?,
        ));
        let verification = Arc::new(VerificationEndpoint::new(
            tokens.clone(),
            backends.payments.clone(),
            audit.clone(),
            backends.clock.clone(),
        ));

        Ok(Self {
            workflow,
            tokens,
            audit,
            verification,
            actors: backends.actors,
        })
    }

    pub fn in_memory(config: &WorkflowConfig) -> Result<Self> {
        Self::assemble(config, Backends::in_memory(config))
    }
}
