use crate::domain::actor::{Actor, Capability, RiskLevel, Scope};
use crate::error::{Result, WorkflowError};
use tracing::warn;

/// Decides whether an actor may exercise a capability within a scope.
///
/// Resolution order: an explicit deny (blocked risk level) wins, then a
/// `bypass_approval` grant passes everything, then the actor's scoped group
/// memberships are searched, and anything else is denied. The gate holds no
/// state and has no side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionGate;

impl PermissionGate {
    pub fn new() -> Self {
        Self
    }

    pub fn can(&self, actor: &Actor, capability: Capability, scope: &Scope) -> bool {
        if self.is_denied(actor) {
            return false;
        }
        let mut memberships = actor
            .groups
            .iter()
            .filter(|membership| membership.scope.covers(scope));
        memberships.any(|membership| {
            membership.capabilities.contains(&Capability::BypassApproval)
                || membership.capabilities.contains(&capability)
        })
    }

    pub fn is_denied(&self, actor: &Actor) -> bool {
        actor.risk_level == RiskLevel::Blocked
    }

    pub fn require(&self, actor: &Actor, capability: Capability, scope: &Scope) -> Result<()> {
        if self.can(actor, capability, scope) {
            return Ok(());
        }
        warn!(actor = %actor.id, %capability, "permission denied");
        Err(WorkflowError::missing_capability(&actor.id, capability))
    }

    /// Passes if any of `capabilities` is held; returns the first one that is.
    pub fn require_any(
        &self,
        actor: &Actor,
        capabilities: &[Capability],
        scope: &Scope,
    ) -> Result<Capability> {
        if let Some(granted) = capabilities
            .iter()
            .copied()
            .find(|capability| self.can(actor, *capability, scope))
        {
            return Ok(granted);
        }
        let names: Vec<&str> = capabilities.iter().map(Capability::as_str).collect();
        warn!(actor = %actor.id, required = ?names, "permission denied");
        Err(WorkflowError::Permission {
            actor: actor.id.clone(),
            requirement: format!("one of the capabilities {names:?}"),
        })
    }

    /// Fails only for explicitly denied actors; used for actions open to everyone else.
    pub fn require_not_denied(&self, actor: &Actor) -> Result<()> {
        if self.is_denied(actor) {
            warn!(actor = %actor.id, "blocked actor attempted a workflow action");
            return Err(WorkflowError::Permission {
                actor: actor.id.clone(),
                requirement: "an unblocked account".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> Scope {
        Scope::company("ACME")
    }

    #[test]
    fn test_default_deny() {
        let gate = PermissionGate::new();
        assert!(!gate.can(&Actor::new("nobody"), Capability::Reviewer, &acme()));
    }

    #[test]
    fn test_scoped_membership() {
        let gate = PermissionGate::new();
        let actor = Actor::new("r").with_group("reviewers", &[Capability::Reviewer], acme());
        assert!(gate.can(&actor, Capability::Reviewer, &acme()));
        assert!(!gate.can(&actor, Capability::Reviewer, &Scope::company("Globex")));
        assert!(!gate.can(&actor, Capability::Approver, &acme()));
    }

    #[test]
    fn test_bypass_grants_everything_in_scope() {
        let gate = PermissionGate::new();
        let admin = Actor::new("root").with_group("admins", &[Capability::BypassApproval], Scope::All);
        for capability in [
            Capability::Reviewer,
            Capability::Approver,
            Capability::Authorizer,
            Capability::Poster,
            Capability::ManageAudit,
        ] {
            assert!(gate.can(&admin, capability, &acme()));
        }
    }

    #[test]
    fn test_blocked_overrides_bypass() {
        let gate = PermissionGate::new();
        let admin = Actor::new("root")
            .with_group("admins", &[Capability::BypassApproval], Scope::All)
            .with_risk_level(RiskLevel::Blocked);
        assert!(!gate.can(&admin, Capability::Reviewer, &acme()));
        assert!(matches!(
            gate.require_not_denied(&admin),
            Err(WorkflowError::Permission { .. })
        ));
    }

    #[test]
    fn test_repeated_checks_are_stable() {
        let gate = PermissionGate::new();
        let actor = Actor::new("a").with_group("approvers", &[Capability::Approver], Scope::All);
        let first = gate.can(&actor, Capability::Approver, &acme());
        for _ in 0..100 {
            assert_eq!(gate.can(&actor, Capability::Approver, &acme()), first);
        }
    }

    #[test]
    fn test_require_any_reports_granted_capability() {
        let gate = PermissionGate::new();
        let actor = Actor::new("p").with_group("posters", &[Capability::Poster], Scope::All);
        let granted = gate
            .require_any(&actor, &[Capability::Reviewer, Capability::Poster], &acme())
            .unwrap();
        assert_eq!(granted, Capability::Poster);
        assert!(gate
            .require_any(&actor, &[Capability::Reviewer], &acme())
            .is_err());
    }
}
