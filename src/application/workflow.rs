use super::audit_log::AuditLog;
use super::permission::PermissionGate;
use super::routing::RoutingPolicy;
use crate::domain::actor::{Actor, Capability, Scope};
use crate::domain::audit::{ActionType, ApprovalHistoryEntry};
use crate::domain::payment::{ApprovalState, NewPayment, Payment, PaymentId};
use crate::domain::ports::{ActorDirectoryRef, ClockRef, LedgerPosterRef, PaymentStoreRef};
use crate::domain::stage::StagePlan;
use crate::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A transition a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Submit,
    Review,
    Approve,
    Post,
    Reject,
    Cancel,
    Resubmit,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Submit => "submit",
            WorkflowAction::Review => "review",
            WorkflowAction::Approve => "approve",
            WorkflowAction::Post => "post",
            WorkflowAction::Reject => "reject",
            WorkflowAction::Cancel => "cancel",
            WorkflowAction::Resubmit => "resubmit",
        }
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub payment_id: PaymentId,
    pub previous_state: ApprovalState,
    pub new_state: ApprovalState,
    pub history_entry_id: u64,
}

/// A validated, authorized transition that has not been written yet.
#[derive(Debug, Clone, Copy)]
struct Step {
    from: ApprovalState,
    to: ApprovalState,
    action: ActionType,
}

/// The payment approval state machine.
///
/// Each operation checks the persisted state, then the permission gate, then
/// writes the new state and exactly one history row in a single
/// compare-and-write. A rejected operation writes nothing.
pub struct ApprovalWorkflow {
    payments: PaymentStoreRef,
    audit: Arc<AuditLog>,
    gate: PermissionGate,
    actors: ActorDirectoryRef,
    ledger: LedgerPosterRef,
    clock: ClockRef,
    policy: RoutingPolicy,
    stages: StagePlan,
}

impl ApprovalWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: PaymentStoreRef,
        audit: Arc<AuditLog>,
        gate: PermissionGate,
        actors: ActorDirectoryRef,
        ledger: LedgerPosterRef,
        clock: ClockRef,
        policy: RoutingPolicy,
        stages: StagePlan,
    ) -> Self {
        Self {
            payments,
            audit,
            gate,
            actors,
            ledger,
            clock,
            policy,
            stages,
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Registers a draft payment; the store assigns id and voucher number.
    pub async fn create_payment(&self, new: NewPayment) -> Result<Payment> {
        let validated = new.validate()?;
        let payment = self.payments.insert(validated, self.clock.now()).await?;
        info!(payment = %payment.id, voucher = %payment.voucher_number, "payment registered");
        Ok(payment)
    }

    pub async fn get_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.payments
            .get(payment_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("payment", payment_id))
    }

    /// The states this payment will pass through under the current policy.
    pub async fn route_for(&self, payment_id: PaymentId, submitter: &Actor) -> Result<Vec<ApprovalState>> {
        let payment = self.get_payment(payment_id).await?;
        Ok(self.policy.route(payment.amount, submitter))
    }

    pub async fn submit_for_review(
        &self,
        payment_id: PaymentId,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<Payment> {
        self.apply(payment_id, WorkflowAction::Submit, actor, comment)
            .await
            .map(|(payment, _)| payment)
    }

    pub async fn review(&self, payment_id: PaymentId, actor: &Actor, comment: Option<String>) -> Result<Payment> {
        self.apply(payment_id, WorkflowAction::Review, actor, comment)
            .await
            .map(|(payment, _)| payment)
    }

    pub async fn approve(&self, payment_id: PaymentId, actor: &Actor, comment: Option<String>) -> Result<Payment> {
        self.apply(payment_id, WorkflowAction::Approve, actor, comment)
            .await
            .map(|(payment, _)| payment)
    }

    /// Books the payment in the ledger and marks it posted.
    ///
    /// A ledger failure leaves the payment `approved` and is returned as
    /// `Posting`; nothing is retried here. The ledger is called with the
    /// voucher number as idempotency key, so a concurrent or repeated post
    /// never books a second entry.
    pub async fn post(&self, payment_id: PaymentId, actor: &Actor, comment: Option<String>) -> Result<Payment> {
        self.apply(payment_id, WorkflowAction::Post, actor, comment)
            .await
            .map(|(payment, _)| payment)
    }

    pub async fn reject(&self, payment_id: PaymentId, actor: &Actor, reason: &str) -> Result<Payment> {
        self.apply(payment_id, WorkflowAction::Reject, actor, Some(reason.to_string()))
            .await
            .map(|(payment, _)| payment)
    }

    pub async fn cancel(&self, payment_id: PaymentId, actor: &Actor, comment: Option<String>) -> Result<Payment> {
        self.apply(payment_id, WorkflowAction::Cancel, actor, comment)
            .await
            .map(|(payment, _)| payment)
    }

    pub async fn resubmit(&self, payment_id: PaymentId, actor: &Actor, comment: Option<String>) -> Result<Payment> {
        self.apply(payment_id, WorkflowAction::Resubmit, actor, comment)
            .await
            .map(|(payment, _)| payment)
    }

    /// Entry point for other modules: resolves the actor by id and applies `action`.
    pub async fn transition(
        &self,
        payment_id: PaymentId,
        action: WorkflowAction,
        actor_id: &str,
        comment: Option<String>,
    ) -> Result<TransitionOutcome> {
        let actor = self
            .actors
            .resolve(actor_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("actor", actor_id))?;
        let (payment, entry) = self.apply(payment_id, action, &actor, comment).await?;
        Ok(TransitionOutcome {
            payment_id,
            previous_state: entry.stage_from,
            new_state: payment.approval_state,
            history_entry_id: entry.id,
        })
    }

    async fn apply(
        &self,
        payment_id: PaymentId,
        action: WorkflowAction,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<(Payment, ApprovalHistoryEntry)> {
        let payment = self.get_payment(payment_id).await?;
        let step = match self.plan(&payment, action, actor, comment.as_deref()) {
            Ok(step) => step,
            Err(err) => {
                warn!(payment = %payment.id, %action, actor = %actor.id, error = %err, "transition rejected");
                return Err(err);
            }
        };

        // Keyed on the voucher number so racing or retried posts book once.
        let ledger_ref = if step.action == ActionType::Post {
            let key = payment.voucher_number.to_string();
            Some(self.ledger.post(&payment, &key).await.map_err(|err| {
                warn!(payment = %payment.id, error = %err, "ledger posting failed, payment stays approved");
                match err {
                    WorkflowError::Posting(_) => err,
                    other => WorkflowError::Posting(other.to_string()),
                }
            })?)
        } else {
            None
        };

        let result = self.commit(payment, step, actor, comment).await;
        match (&ledger_ref, &result) {
            (Some(reference), Err(WorkflowError::InvalidTransition { .. })) => {
                debug!(payment = %payment_id, ledger = %reference, "payment already posted by a concurrent call");
            }
            (Some(reference), Err(err)) => {
                error!(payment = %payment_id, ledger = %reference, error = %err, "ledger entry booked but state change failed");
            }
            _ => {}
        }
        result
    }

    /// State check first, then permission. Pure apart from reading `self`.
    fn plan(
        &self,
        payment: &Payment,
        action: WorkflowAction,
        actor: &Actor,
        comment: Option<&str>,
    ) -> Result<Step> {
        use ApprovalState::*;

        let from = payment.approval_state;
        let invalid = || WorkflowError::InvalidTransition {
            from,
            action: action.as_str(),
        };
        let scope = Scope::company(&payment.company);

        let (to, action_type) = match (action, from) {
            (WorkflowAction::Submit, Draft) => {
                self.gate.require_not_denied(actor)?;
                if self.policy.auto_approves(payment.amount, actor) {
                    (Approved, ActionType::AutoApprove)
                } else {
                    (UnderReview, ActionType::Submit)
                }
            }
            (WorkflowAction::Review, UnderReview) => {
                self.gate.require(actor, Capability::Reviewer, &scope)?;
                (ForApproval, ActionType::Review)
            }
            (WorkflowAction::Approve, ForApproval) => {
                self.gate.require(actor, Capability::Approver, &scope)?;
                if self.policy.requires_authorization(payment.amount) {
                    (ForAuthorization, ActionType::Approve)
                } else {
                    (Approved, ActionType::Approve)
                }
            }
            (WorkflowAction::Approve, ForAuthorization) => {
                self.gate.require(actor, Capability::Authorizer, &scope)?;
                (Approved, ActionType::Authorize)
            }
            (WorkflowAction::Post, Approved) => {
                if !self.policy.auto_posts(payment.amount) {
                    self.gate.require(actor, Capability::Poster, &scope)?;
                } else {
                    self.gate.require_not_denied(actor)?;
                }
                (Posted, ActionType::Post)
            }
            (WorkflowAction::Reject, UnderReview | ForApproval | ForAuthorization) => {
                let capability = match from {
                    UnderReview => Capability::Reviewer,
                    ForApproval => Capability::Approver,
                    _ => Capability::Authorizer,
                };
                self.gate.require(actor, capability, &scope)?;
                if comment.is_none_or(|reason| reason.trim().is_empty()) {
                    return Err(WorkflowError::Validation(
                        "A rejection reason is required".to_string(),
                    ));
                }
                (Rejected, ActionType::Reject)
            }
            (WorkflowAction::Cancel, state) if !state.is_terminal() => {
                self.gate.require_any(
                    actor,
                    &[
                        Capability::Reviewer,
                        Capability::Approver,
                        Capability::Authorizer,
                        Capability::Poster,
                    ],
                    &scope,
                )?;
                (Cancelled, ActionType::Cancel)
            }
            (WorkflowAction::Resubmit, Rejected) => {
                self.gate.require_not_denied(actor)?;
                (Draft, ActionType::Resubmit)
            }
            _ => return Err(invalid()),
        };

        if !from.can_transition_to(to) {
            return Err(invalid());
        }

        if !self.gate.can(actor, Capability::BypassApproval, &scope)
            && !self.stages.admits(actor, to, &payment.company)
        {
            return Err(WorkflowError::Permission {
                actor: actor.id.clone(),
                requirement: format!("membership in a group allowed to move payments to '{to}'"),
            });
        }

        Ok(Step {
            from,
            to,
            action: action_type,
        })
    }

    async fn commit(
        &self,
        payment: Payment,
        step: Step,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<(Payment, ApprovalHistoryEntry)> {
        let now = self.clock.now();
        let entry = self
            .audit
            .history_entry(&payment, step.to, step.action, &actor.id, comment.clone(), now)
            .await?;

        let mut next = payment;
        next.approval_state = step.to;
        match step.action {
            ActionType::Review => {
                next.reviewed_by = Some(actor.id.clone());
                next.reviewed_at = Some(now);
            }
            ActionType::Approve | ActionType::AutoApprove => {
                next.approved_by = Some(actor.id.clone());
                next.approved_at = Some(now);
            }
            ActionType::Authorize => {
                next.authorized_by = Some(actor.id.clone());
                next.authorized_at = Some(now);
            }
            ActionType::Post => next.posted_at = Some(now),
            ActionType::Reject => {
                next.clear_decisions();
                next.rejection_reason = comment;
            }
            ActionType::Resubmit => next.rejection_reason = None,
            ActionType::Submit | ActionType::Cancel => {}
        }

        let payment_id = next.id;
        match self.payments.commit_transition(next, entry).await {
            Ok((saved, entry)) => {
                info!(
                    payment = %saved.id,
                    from = %step.from,
                    to = %step.to,
                    action = %step.action,
                    actor = %actor.id,
                    history = entry.id,
                    "payment transitioned"
                );
                Ok((saved, entry))
            }
            Err(WorkflowError::PersistenceConflict { .. }) => {
                let current = self.get_payment(payment_id).await?;
                if current.approval_state != step.from {
                    warn!(payment = %payment_id, current = %current.approval_state, "lost transition race");
                    Err(WorkflowError::InvalidTransition {
                        from: current.approval_state,
                        action: action_name(step.action),
                    })
                } else {
                    Err(WorkflowError::PersistenceConflict { payment_id })
                }
            }
            Err(err) => Err(err),
        }
    }
}

fn action_name(action: ActionType) -> &'static str {
    match action {
        ActionType::Submit | ActionType::AutoApprove => WorkflowAction::Submit.as_str(),
        ActionType::Review => WorkflowAction::Review.as_str(),
        ActionType::Approve | ActionType::Authorize => WorkflowAction::Approve.as_str(),
        ActionType::Post => WorkflowAction::Post.as_str(),
        ActionType::Reject => WorkflowAction::Reject.as_str(),
        ActionType::Cancel => WorkflowAction::Cancel.as_str(),
        ActionType::Resubmit => WorkflowAction::Resubmit.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::audit_log::CodeRetryPolicy;
    use crate::application::codes::VerificationCodes;
    use crate::domain::actor::RiskLevel;
    use crate::domain::payment::{Direction, PaymentFeatures};
    use crate::domain::stage::WorkflowStage;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::{
        InMemoryActorDirectory, InMemoryAuditStore, InMemoryPaymentStore, RecordingLedger,
    };
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        workflow: ApprovalWorkflow,
        audit: Arc<AuditLog>,
        ledger: Arc<RecordingLedger>,
        clock: ManualClock,
    }

    fn fixture(policy: RoutingPolicy, stages: StagePlan) -> Fixture {
        let payments = Arc::new(InMemoryPaymentStore::new());
        let clock = ManualClock::new(Utc::now());
        let audit = Arc::new(AuditLog::new(
            payments.clone(),
            Arc::new(InMemoryAuditStore::new()),
            VerificationCodes::new(None, Arc::new(clock.clone())),
            PermissionGate::new(),
            CodeRetryPolicy::default(),
        ));
        let ledger = Arc::new(RecordingLedger::new());
        let workflow = ApprovalWorkflow::new(
            payments,
            audit.clone(),
            PermissionGate::new(),
            Arc::new(InMemoryActorDirectory::new([reviewer(), approver()])),
            ledger.clone(),
            Arc::new(clock.clone()),
            policy,
            stages,
        );
        Fixture {
            workflow,
            audit,
            ledger,
            clock,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(RoutingPolicy::default(), StagePlan::standard())
    }

    fn new_payment(amount: Decimal) -> NewPayment {
        NewPayment {
            company: "ACME".into(),
            amount,
            currency: "USD".into(),
            counterparty_reference: "V-1".into(),
            counterparty_name: "Vendor".into(),
            direction: Direction::Outbound,
            features: PaymentFeatures::default(),
        }
    }

    fn clerk() -> Actor {
        Actor::new("clerk")
    }

    fn reviewer() -> Actor {
        Actor::new("rita").with_group("reviewers", &[Capability::Reviewer], Scope::All)
    }

    fn approver() -> Actor {
        Actor::new("alan").with_group("approvers", &[Capability::Approver], Scope::All)
    }

    fn authorizer() -> Actor {
        Actor::new("ava").with_group("authorizers", &[Capability::Authorizer], Scope::All)
    }

    fn poster() -> Actor {
        Actor::new("pat").with_group("accounting", &[Capability::Poster], Scope::All)
    }

    #[tokio::test]
    async fn test_review_requires_capability() {
        let f = default_fixture();
        let payment = f.workflow.create_payment(new_payment(dec!(1000))).await.unwrap();

        let submitted = f.workflow.submit_for_review(payment.id, &clerk(), None).await.unwrap();
        assert_eq!(submitted.approval_state, ApprovalState::UnderReview);

        let denied = f.workflow.review(payment.id, &clerk(), None).await;
        assert!(matches!(denied, Err(WorkflowError::Permission { .. })));
        assert_eq!(
            f.workflow.get_payment(payment.id).await.unwrap().approval_state,
            ApprovalState::UnderReview
        );
        assert_eq!(f.audit.history(payment.id).await.unwrap().len(), 1);

        let reviewed = f.workflow.review(payment.id, &reviewer(), None).await.unwrap();
        assert_eq!(reviewed.approval_state, ApprovalState::ForApproval);
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("rita"));

        let history = f.audit.history(payment.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].stage_from, ApprovalState::UnderReview);
        assert_eq!(history[1].stage_to, ApprovalState::ForApproval);
    }

    #[tokio::test]
    async fn test_full_three_stage_path() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(50000))).await.unwrap().id;

        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();
        f.workflow.review(id, &reviewer(), None).await.unwrap();
        let approved = f.workflow.approve(id, &approver(), None).await.unwrap();
        assert_eq!(approved.approval_state, ApprovalState::Approved);

        let posted = f.workflow.post(id, &poster(), None).await.unwrap();
        assert_eq!(posted.approval_state, ApprovalState::Posted);
        assert!(posted.posted_at.is_some());
        assert_eq!(f.ledger.posted().await, vec![id]);
    }

    #[tokio::test]
    async fn test_four_stage_routes_through_authorization() {
        let f = fixture(
            RoutingPolicy {
                four_stage: true,
                authorization_threshold: dec!(10000),
                ..RoutingPolicy::default()
            },
            StagePlan::standard(),
        );
        let id = f.workflow.create_payment(new_payment(dec!(20000))).await.unwrap().id;
        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();
        f.workflow.review(id, &reviewer(), None).await.unwrap();

        let approved = f.workflow.approve(id, &approver(), None).await.unwrap();
        assert_eq!(approved.approval_state, ApprovalState::ForAuthorization);

        // An approver cannot also authorize.
        assert!(matches!(
            f.workflow.approve(id, &approver(), None).await,
            Err(WorkflowError::Permission { .. })
        ));

        let authorized = f.workflow.approve(id, &authorizer(), None).await.unwrap();
        assert_eq!(authorized.approval_state, ApprovalState::Approved);
        assert_eq!(authorized.authorized_by.as_deref(), Some("ava"));
    }

    #[tokio::test]
    async fn test_auto_approve_shortcut() {
        let f = fixture(
            RoutingPolicy {
                auto_approve_limit: Some(dec!(100)),
                ..RoutingPolicy::default()
            },
            StagePlan::standard(),
        );
        let small = f.workflow.create_payment(new_payment(dec!(99))).await.unwrap().id;
        let approved = f.workflow.submit_for_review(small, &clerk(), None).await.unwrap();
        assert_eq!(approved.approval_state, ApprovalState::Approved);
        let history = f.audit.history(small).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action_type, ActionType::AutoApprove);

        let restricted = clerk().with_risk_level(RiskLevel::Restricted);
        let other = f.workflow.create_payment(new_payment(dec!(99))).await.unwrap().id;
        let submitted = f.workflow.submit_for_review(other, &restricted, None).await.unwrap();
        assert_eq!(submitted.approval_state, ApprovalState::UnderReview);
    }

    #[tokio::test]
    async fn test_auto_post_threshold_allows_non_poster() {
        let f = fixture(
            RoutingPolicy {
                auto_approve_limit: Some(dec!(100)),
                auto_post_threshold: Some(dec!(100)),
                ..RoutingPolicy::default()
            },
            StagePlan::standard(),
        );
        let id = f.workflow.create_payment(new_payment(dec!(10))).await.unwrap().id;
        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();
        let posted = f.workflow.post(id, &clerk(), None).await.unwrap();
        assert_eq!(posted.approval_state, ApprovalState::Posted);
    }

    #[tokio::test]
    async fn test_post_failure_keeps_approved() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();
        f.workflow.review(id, &reviewer(), None).await.unwrap();
        f.workflow.approve(id, &approver(), None).await.unwrap();

        f.ledger.set_failing(true);
        let result = f.workflow.post(id, &poster(), None).await;
        assert!(matches!(result, Err(WorkflowError::Posting(_))));
        assert_eq!(
            f.workflow.get_payment(id).await.unwrap().approval_state,
            ApprovalState::Approved
        );
        assert_eq!(f.audit.history(id).await.unwrap().len(), 3);

        f.ledger.set_failing(false);
        f.workflow.post(id, &poster(), None).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_posts_book_the_ledger_once() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();
        f.workflow.review(id, &reviewer(), None).await.unwrap();
        f.workflow.approve(id, &approver(), None).await.unwrap();

        // Both callers read `approved` and reach the ledger before either commits.
        f.ledger.set_latency(std::time::Duration::from_millis(20));
        let workflow = Arc::new(f.workflow);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let workflow = Arc::clone(&workflow);
                tokio::spawn(async move { workflow.post(id, &poster(), None).await })
            })
            .collect();

        let mut posted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(payment) => {
                    assert_eq!(payment.approval_state, ApprovalState::Posted);
                    posted += 1;
                }
                Err(WorkflowError::InvalidTransition { .. } | WorkflowError::PersistenceConflict { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(posted, 1);
        assert_eq!(f.ledger.posted().await, vec![id]);
        assert_eq!(
            workflow.get_payment(id).await.unwrap().approval_state,
            ApprovalState::Posted
        );
        assert_eq!(f.audit.history(id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_reject_clears_decisions_and_allows_resubmit() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();
        f.workflow.review(id, &reviewer(), None).await.unwrap();

        assert!(matches!(
            f.workflow.reject(id, &approver(), "  ").await,
            Err(WorkflowError::Validation(_))
        ));

        let rejected = f.workflow.reject(id, &approver(), "wrong vendor").await.unwrap();
        assert_eq!(rejected.approval_state, ApprovalState::Rejected);
        assert!(rejected.reviewed_by.is_none());
        assert_eq!(rejected.rejection_reason.as_deref(), Some("wrong vendor"));

        let draft = f.workflow.resubmit(id, &clerk(), None).await.unwrap();
        assert_eq!(draft.approval_state, ApprovalState::Draft);
        assert!(draft.rejection_reason.is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        assert!(matches!(
            f.workflow.cancel(id, &clerk(), None).await,
            Err(WorkflowError::Permission { .. })
        ));
        f.workflow.cancel(id, &approver(), None).await.unwrap();

        for action in [
            WorkflowAction::Submit,
            WorkflowAction::Cancel,
            WorkflowAction::Resubmit,
        ] {
            let result = f.workflow.transition(id, action, "alan", None).await;
            assert!(matches!(
                result,
                Err(WorkflowError::InvalidTransition {
                    from: ApprovalState::Cancelled,
                    ..
                })
            ));
        }
    }

    #[tokio::test]
    async fn test_invalid_transition_checked_before_permission() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        assert!(matches!(
            f.workflow.approve(id, &clerk(), None).await,
            Err(WorkflowError::InvalidTransition {
                from: ApprovalState::Draft,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_blocked_actor_cannot_submit() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        let blocked = clerk().with_risk_level(RiskLevel::Blocked);
        assert!(matches!(
            f.workflow.submit_for_review(id, &blocked, None).await,
            Err(WorkflowError::Permission { .. })
        ));
    }

    #[tokio::test]
    async fn test_bypass_capability_goes_through_gate() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        let admin = Actor::new("root").with_group("admins", &[Capability::BypassApproval], Scope::All);
        f.workflow.submit_for_review(id, &admin, None).await.unwrap();
        f.workflow.review(id, &admin, None).await.unwrap();
        f.workflow.approve(id, &admin, None).await.unwrap();
        f.workflow.post(id, &admin, None).await.unwrap();

        let trail = f.audit.get_audit_trail(id).await.unwrap();
        assert_eq!(trail.len(), 4);
        assert!(trail.iter().all(|entry| entry.actor == "root"));
    }

    #[tokio::test]
    async fn test_stage_groups_restrict_entry() {
        let stages = StagePlan::standard()
            .stages()
            .iter()
            .cloned()
            .map(|mut stage: WorkflowStage| {
                if stage.state == ApprovalState::ForApproval {
                    stage.required_groups = vec!["senior-reviewers".into()];
                }
                stage
            })
            .collect();
        let f = fixture(RoutingPolicy::default(), StagePlan::new(stages).unwrap());
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();

        assert!(matches!(
            f.workflow.review(id, &reviewer(), None).await,
            Err(WorkflowError::Permission { .. })
        ));
        let senior = Actor::new("sam").with_group("senior-reviewers", &[Capability::Reviewer], Scope::All);
        f.workflow.review(id, &senior, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_duration_in_previous_stage() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        f.clock.advance(Duration::seconds(30));
        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        f.workflow.review(id, &reviewer(), Some("looks fine".into())).await.unwrap();

        let trail = f.audit.get_audit_trail(id).await.unwrap();
        assert_eq!(trail[0].duration, 30);
        assert_eq!(trail[1].duration, 300);
        assert_eq!(trail[1].comment.as_deref(), Some("looks fine"));
    }

    #[tokio::test]
    async fn test_transition_resolves_actor() {
        let f = default_fixture();
        let id = f.workflow.create_payment(new_payment(dec!(500))).await.unwrap().id;
        f.workflow.submit_for_review(id, &clerk(), None).await.unwrap();

        let outcome = f
            .workflow
            .transition(id, WorkflowAction::Review, "rita", None)
            .await
            .unwrap();
        assert_eq!(outcome.previous_state, ApprovalState::UnderReview);
        assert_eq!(outcome.new_state, ApprovalState::ForApproval);
        assert!(outcome.history_entry_id > 0);

        assert!(matches!(
            f.workflow.transition(id, WorkflowAction::Approve, "ghost", None).await,
            Err(WorkflowError::NotFound { entity: "actor", .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_payment() {
        let f = default_fixture();
        assert!(matches!(
            f.workflow.submit_for_review(PaymentId(404), &clerk(), None).await,
            Err(WorkflowError::NotFound { .. })
        ));
    }
}
