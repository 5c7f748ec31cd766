//! The agent-executor capability and input composition.

use async_trait::async_trait;
use sentinel_core::{AgentId, Mapping, Value};
use sentinel_plan::{AgentSpec, Node};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors an `AgentExecutor` implementation may report.
///
/// These are distinct from `sentinel_core::CoreError`: they describe what
/// went wrong *inside* a single agent invocation; the driver classifies
/// them into a `CoreError`/`NodeFailure` via [`classify`].
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// `AgentSpec::uses` did not name a known implementation.
    #[error("unresolved executor '{uses}'")]
    Unresolved {
        /// The unresolved `uses` string.
        uses: String,
    },
    /// The composed inputs were rejected as malformed.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Human-readable reason.
        reason: String,
    },
    /// Anything else the executor implementation wants to report.
    #[error("{0}")]
    Other(String),
}

/// Context passed to every `AgentExecutor::execute` call.
#[derive(Debug, Clone)]
pub struct ExecCtx {
    /// The run-scoped cancellation token; executors may poll or select on
    /// this but are not required to.
    pub cancellation: CancellationToken,
    /// The absolute deadline for the enclosing run, if any.
    pub deadline: Option<Instant>,
}

impl ExecCtx {
    /// Time remaining until the run's deadline, or `None` if the run has
    /// no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// The capability every agent body is invoked through. The engine never
/// implements this itself; concrete executors (in-process closures,
/// subprocess shims, remote calls) live outside the core crates.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run `spec` with the already-composed `inputs`, honoring `ctx`'s
    /// cancellation and deadline on a best-effort basis.
    async fn execute(&self, spec: &AgentSpec, inputs: Value, ctx: &ExecCtx) -> Result<Value, AgentError>;
}

/// Compose the input value for `node` per the merge precedence: global
/// inputs, then each `input_from` dependency's output in declaration
/// order (later overwrites earlier on key conflict), then a synthetic
/// `_config` key holding the agent's `with` block verbatim.
///
/// `depends`-only edges never contribute; their presence in `dependencies`
/// only gates readiness (handled by the scheduler), not input content.
pub fn compose_inputs(
    node: &Node,
    spec: &AgentSpec,
    global_inputs: &Value,
    outputs: &indexmap::IndexMap<AgentId, Value>,
) -> Value {
    let mut composed = Mapping::new();

    if let Some(global_map) = global_inputs.as_map() {
        composed.extend(global_map.clone());
    }

    for upstream in &node.input_from {
        if let Some(output) = outputs.get(upstream) {
            if let Some(map) = output.as_map() {
                composed.extend(map.clone());
            } else {
                composed.insert(upstream.to_string(), output.clone());
            }
        }
    }

    composed.insert("_config".to_string(), Value::Map(spec.with_or_empty()));

    Value::Map(composed)
}
