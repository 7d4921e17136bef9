use super::actor::{Actor, Scope};
use super::payment::ApprovalState;
use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

fn default_scope() -> Scope {
    Scope::All
}

/// Configuration entity describing one stage of the approval graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub state: ApprovalState,
    pub name: String,
    pub sequence: u32,
    /// Groups an actor must belong to (any of) to move a payment into this stage.
    #[serde(default)]
    pub required_groups: Vec<String>,
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default = "default_scope")]
    pub scope: Scope,
}

impl WorkflowStage {
    fn standard(state: ApprovalState, sequence: u32) -> Self {
        Self {
            state,
            name: state.as_str().replace('_', " "),
            sequence,
            required_groups: Vec::new(),
            initial: state == ApprovalState::Draft,
            terminal: state.is_terminal(),
            scope: Scope::All,
        }
    }
}

/// Validated set of stages, possibly overridden per company.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    stages: Vec<WorkflowStage>,
}

impl Default for StagePlan {
    fn default() -> Self {
        Self::standard()
    }
}

impl StagePlan {
    /// The built-in graph: every state, global scope, no group requirements.
    pub fn standard() -> Self {
        let stages = ApprovalState::ALL
            .into_iter()
            .zip(1..)
            .map(|(state, sequence)| WorkflowStage::standard(state, sequence * 10))
            .collect();
        Self { stages }
    }

    pub fn new(stages: Vec<WorkflowStage>) -> Result<Self, WorkflowError> {
        if stages.is_empty() {
            return Ok(Self::standard());
        }

        let mut initial_per_scope: HashMap<&Scope, usize> = HashMap::new();
        let mut seen: HashSet<(&Scope, ApprovalState)> = HashSet::new();

        for stage in &stages {
            if !seen.insert((&stage.scope, stage.state)) {
                return Err(WorkflowError::Config(format!(
                    "Stage '{}' declared twice for the same scope",
                    stage.state
                )));
            }
            if stage.terminal != stage.state.is_terminal() {
                return Err(WorkflowError::Config(format!(
                    "Stage '{}' has an inconsistent terminal flag",
                    stage.state
                )));
            }
            if stage.initial && stage.state != ApprovalState::Draft {
                return Err(WorkflowError::Config(format!(
                    "Stage '{}' cannot be initial; payments start in draft",
                    stage.state
                )));
            }
            let count = initial_per_scope.entry(&stage.scope).or_insert(0);
            if stage.initial {
                *count += 1;
            }
        }

        // A company scope without its own draft starts from the global one.
        let global_initial = initial_per_scope.get(&Scope::All).copied() == Some(1);
        for (scope, count) in &initial_per_scope {
            let valid = match scope {
                Scope::All => *count == 1,
                Scope::Company(_) => *count == 1 || (*count == 0 && global_initial),
            };
            if !valid {
                return Err(WorkflowError::Config(format!(
                    "Scope {scope:?} must have exactly one initial stage, found {count}"
                )));
            }
        }

        Ok(Self { stages })
    }

    /// The stage definition that applies to `state` for `company`.
    ///
    /// Company-scoped stages take precedence over global ones.
    pub fn stage_for(&self, state: ApprovalState, company: &str) -> Option<&WorkflowStage> {
        let target = Scope::company(company);
        self.stages
            .iter()
            .filter(|stage| stage.state == state && stage.scope.covers(&target))
            .max_by_key(|stage| matches!(stage.scope, Scope::Company(_)))
    }

    /// Whether `actor` satisfies the group requirement for entering `state`.
    pub fn admits(&self, actor: &Actor, state: ApprovalState, company: &str) -> bool {
        match self.stage_for(state, company) {
            Some(stage) if !stage.required_groups.is_empty() => stage
                .required_groups
                .iter()
                .any(|group| actor.in_group(group)),
            _ => true,
        }
    }

    pub fn stages(&self) -> &[WorkflowStage] {
        &self.stages
    }
}
