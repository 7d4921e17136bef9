use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity recorded for unauthenticated verification calls.
pub const PUBLIC_ACTOR: &str = "public";

/// Named permissions granted through group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Reviewer,
    Approver,
    Authorizer,
    Poster,
    BypassApproval,
    ManageAudit,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Reviewer => "reviewer",
            Capability::Approver => "approver",
            Capability::Authorizer => "authorizer",
            Capability::Poster => "poster",
            Capability::BypassApproval => "bypass_approval",
            Capability::ManageAudit => "manage_audit",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Normal,
    /// May act, but never through the auto-approve shortcut.
    Restricted,
    /// Denied everything.
    Blocked,
}

/// The company a check applies to. Membership scoped to `All` matches any company.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    All,
    Company(String),
}

impl Scope {
    pub fn company(name: impl Into<String>) -> Self {
        Scope::Company(name.into())
    }

    pub fn covers(&self, target: &Scope) -> bool {
        match (self, target) {
            (Scope::All, _) => true,
            (Scope::Company(_), Scope::All) => false,
            (Scope::Company(mine), Scope::Company(theirs)) => mine == theirs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group: String,
    pub capabilities: Vec<Capability>,
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub groups: Vec<GroupMembership>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            groups: Vec::new(),
            risk_level: RiskLevel::Normal,
        }
    }

    /// The anonymous identity used by the public verification endpoint.
    pub fn public() -> Self {
        Self::new(PUBLIC_ACTOR)
    }

    pub fn with_group(
        mut self,
        group: impl Into<String>,
        capabilities: &[Capability],
        scope: Scope,
    ) -> Self {
        self.groups.push(GroupMembership {
            group: group.into(),
            capabilities: capabilities.to_vec(),
            scope,
        });
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|membership| membership.group == group)
    }
}
