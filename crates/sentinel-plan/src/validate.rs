//! Static validation of a `StackSpec`, run once at admission time before
//! any `Dag` is built.

use crate::spec::StackSpec;
use sentinel_core::{AgentId, CoreError, CoreResult};
use std::collections::HashSet;

/// Validates a `StackSpec` against the invariants every admitted stack
/// must satisfy. Pure and side-effect free: it never mutates the spec and
/// never touches the executor or scheduler.
#[derive(Debug, Default)]
pub struct Validator;

impl Validator {
    /// Build a validator with the default rule set.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Check `spec` against every static invariant, returning the first
    /// violation found.
    ///
    /// Checks run in this order: non-empty `name`, non-empty `version`,
    /// non-empty agent list, pairwise-unique non-empty agent ids, every
    /// `input_from`/`depends` reference resolves to a declared agent, no
    /// agent references itself.
    pub fn validate(&self, spec: &StackSpec) -> CoreResult<()> {
        if spec.name.trim().is_empty() {
            return Err(CoreError::validation("name", "must not be empty"));
        }
        if spec.version.trim().is_empty() {
            return Err(CoreError::validation("version", "must not be empty"));
        }
        if spec.agents.is_empty() {
            return Err(CoreError::validation("agents", "stack must declare at least one agent"));
        }

        let mut seen: HashSet<&AgentId> = HashSet::new();
        for agent in &spec.agents {
            if agent.id.is_empty() {
                return Err(CoreError::validation("agents[].id", "agent id must not be empty"));
            }
            if !seen.insert(&agent.id) {
                return Err(CoreError::validation(
                    agent.id.as_str(),
                    "duplicate agent id",
                ));
            }
        }

        let known: HashSet<&AgentId> = spec.agents.iter().map(|a| &a.id).collect();
        for agent in &spec.agents {
            for reference in agent.input_from.iter().chain(agent.depends.iter()) {
                if reference == &agent.id {
                    return Err(CoreError::validation(
                        agent.id.as_str(),
                        "agent cannot depend on itself",
                    ));
                }
                if !known.contains(reference) {
                    return Err(CoreError::validation(
                        agent.id.as_str(),
                        format!("references unknown agent '{reference}'"),
                    ));
                }
            }
        }

        Ok(())
    }
}
