// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job definitions: the validated input to the orchestrator.
//!
//! Parsing of definition files is out of scope here; the engine consumes
//! these structs already validated by the configuration surface.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque nested configuration map, insertion-ordered.
pub type ConfigMap = IndexMap<String, serde_json::Value>;

/// Step-level policy controlling whether leaf failures fail the step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTolerance {
    /// Any leaf failure fails the step (and, through it, the manager).
    #[default]
    FailFast,
    /// The step completes unless failures exceed `max_failures`.
    Tolerate { max_failures: u64 },
}

impl ErrorTolerance {
    /// Whether a step with `failures` failed leaves still counts as completed.
    pub fn allows(&self, failures: u64) -> bool {
        match self {
            ErrorTolerance::FailFast => failures == 0,
            ErrorTolerance::Tolerate { max_failures } => failures <= *max_failures,
        }
    }
}

/// One ordered stage of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    /// Worker type key; must resolve to a registered step planner.
    pub worker_type: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub tolerance: ErrorTolerance,
    /// Soft wall-clock timeout applied to each leaf of this step.
    #[serde(
        default,
        with = "crate::duration::serde_opt_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

/// A named, ordered list of steps. The unit a user submits for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepDefinition>,
}

impl JobDefinition {
    /// Structural validation: at least one step, unique non-empty step
    /// names, non-empty worker types.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("definition id is empty".to_string());
        }
        if self.steps.is_empty() {
            return Err(format!("definition {} has no steps", self.id));
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.name.is_empty() {
                return Err(format!("definition {} has an unnamed step", self.id));
            }
            if step.worker_type.is_empty() {
                return Err(format!("step {} has no worker type", step.name));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(format!("duplicate step name: {}", step.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;
