//! The error taxonomy of the Stack Execution Engine.
//!
//! Validation/build errors are returned synchronously and prevent a run
//! from starting. Per-node errors are classified into this same taxonomy
//! but captured on the node's result rather than propagated to the caller;
//! see `sentinel-runtime::executor::classify`.

use crate::ids::AgentId;
use thiserror::Error;

/// Result alias for fallible core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// The error taxonomy described in spec §7.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A `StackSpec` violated a static invariant (§4.1).
    #[error("validation failed for {field}: {reason}")]
    Validation {
        /// Name of the offending field or entity.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// DAG construction failed: missing reference, duplicate id, cycle, or
    /// no source node.
    #[error("graph error: {reason}")]
    Graph {
        /// Human-readable reason.
        reason: String,
        /// The cycle, if this error was caused by one, in traversal order.
        cycle: Option<Vec<AgentId>>,
    },

    /// An agent's `uses` could not be resolved by the executor.
    #[error("could not resolve agent {agent_id} (uses={uses:?})")]
    Resolution {
        /// The agent whose implementation could not be resolved.
        agent_id: AgentId,
        /// The unresolved `uses` string.
        uses: String,
    },

    /// The executor rejected the composed inputs for an agent as malformed.
    #[error("invalid input for agent {agent_id}: {reason}")]
    Input {
        /// The agent whose inputs were rejected.
        agent_id: AgentId,
        /// Human-readable reason.
        reason: String,
    },

    /// The executor failed with an unclassified or provider-specific error.
    #[error("execution failed for agent {agent_id}: {reason}")]
    Execution {
        /// The agent that failed.
        agent_id: AgentId,
        /// Human-readable reason.
        reason: String,
    },

    /// Cancellation was observed before the node (or run) completed.
    #[error("cancelled")]
    Cancelled,

    /// The run's deadline elapsed.
    #[error("timed out")]
    TimedOut,

    /// A run was requested on an engine instance that already has one in
    /// flight.
    #[error("a run is already in progress on this engine instance")]
    AlreadyRunning,
}

impl CoreError {
    /// Build a `Validation` error naming the first offending entity.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build a `Graph` error carrying the concrete cycle that was found.
    #[must_use]
    pub fn cycle(cycle: Vec<AgentId>) -> Self {
        let rendered = cycle
            .iter()
            .map(AgentId::as_str)
            .collect::<Vec<_>>()
            .join(" -> ");
        Self::Graph {
            reason: format!("cycle detected: {rendered}"),
            cycle: Some(cycle),
        }
    }

    /// Build a `Graph` error for a DAG with no source nodes.
    #[must_use]
    pub fn no_source() -> Self {
        Self::Graph {
            reason: "stack has no source node (every agent has a dependency)".to_string(),
            cycle: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_field() {
        let err = CoreError::validation("name", "must not be empty");
        assert_eq!(format!("{err}"), "validation failed for name: must not be empty");
    }

    #[test]
    fn cycle_error_renders_path() {
        let err = CoreError::cycle(vec![AgentId::new("a"), AgentId::new("b"), AgentId::new("a")]);
        let CoreError::Graph { reason, cycle } = &err else {
            panic!("expected graph error");
        };
        assert!(reason.contains("a -> b -> a"));
        assert_eq!(cycle.as_ref().unwrap().len(), 3);
    }
}
