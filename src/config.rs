//! Workflow configuration.
//!
//! Loaded from a JSON file; every field has a default so an empty object is a
//! valid configuration.

use crate::application::audit_log::CodeRetryPolicy;
use crate::application::routing::RoutingPolicy;
use crate::domain::actor::Actor;
use crate::domain::stage::{StagePlan, WorkflowStage};
use crate::error::{Result, WorkflowError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Route large payments through `for_authorization`.
    pub four_stage: bool,
    pub authorization_threshold: Decimal,
    pub auto_approve_limit: Option<Decimal>,
    pub auto_post_threshold: Option<Decimal>,
    pub token_ttl_days: i64,
    pub verification_base_url: String,
    pub code_max_attempts: u32,
    pub code_backoff_ms: u64,
    pub token_issue_attempts: u32,
    pub stages: Vec<WorkflowStage>,
    /// Seed for the actor directory.
    pub actors: Vec<Actor>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let routing = RoutingPolicy::default();
        let retry = CodeRetryPolicy::default();
        Self {
            four_stage: routing.four_stage,
            authorization_threshold: routing.authorization_threshold,
            auto_approve_limit: routing.auto_approve_limit,
            auto_post_threshold: routing.auto_post_threshold,
            token_ttl_days: 365,
            verification_base_url: "http://localhost:8080".to_string(),
            code_max_attempts: retry.max_attempts,
            code_backoff_ms: retry.backoff.as_millis() as u64,
            token_issue_attempts: 5,
            stages: Vec::new(),
            actors: Vec::new(),
        }
    }
}

impl WorkflowConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            WorkflowError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            Some(self.authorization_threshold),
            self.auto_approve_limit,
            self.auto_post_threshold,
        ];
        if thresholds
            .into_iter()
            .flatten()
            .any(|value| value < Decimal::ZERO)
        {
            return Err(WorkflowError::Config(
                "thresholds must not be negative".to_string(),
            ));
        }
        if self.token_ttl_days <= 0 {
            return Err(WorkflowError::Config(
                "token_ttl_days must be positive".to_string(),
            ));
        }
        if self.code_max_attempts == 0 || self.token_issue_attempts == 0 {
            return Err(WorkflowError::Config(
                "retry attempt limits must be at least 1".to_string(),
            ));
        }
        if !self.verification_base_url.starts_with("http://")
            && !self.verification_base_url.starts_with("https://")
        {
            return Err(WorkflowError::Config(
                "verification_base_url must be an http(s) URL".to_string(),
            ));
        }
        self.stage_plan().map(|_| ())
    }

    pub fn routing_policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            four_stage: self.four_stage,
            authorization_threshold: self.authorization_threshold,
            auto_approve_limit: self.auto_approve_limit,
            auto_post_threshold: self.auto_post_threshold,
        }
    }

    pub fn stage_plan(&self) -> Result<StagePlan> {
        StagePlan::new(self.stages.clone())
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.token_ttl_days)
    }

    pub fn code_retry(&self) -> CodeRetryPolicy {
        CodeRetryPolicy {
            max_attempts: self.code_max_attempts,
            backoff: Duration::from_millis(self.code_backoff_ms),
        }
    }
}
