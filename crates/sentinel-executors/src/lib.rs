//! Reference `AgentExecutor` implementations: simple in-process closures
//! standing in for the shim/subprocess/remote runtimes a real deployment
//! would register, plus a deterministic mock used across the test suite.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use sentinel_core::{AgentId, Mapping, Value};
use sentinel_runtime::{AgentError, AgentExecutor, ExecCtx};
use sentinel_plan::AgentSpec;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Returns its composed input unchanged.
#[derive(Debug, Default)]
pub struct EchoExecutor;

#[async_trait]
impl AgentExecutor for EchoExecutor {
    async fn execute(&self, _spec: &AgentSpec, inputs: Value, _ctx: &ExecCtx) -> Result<Value, AgentError> {
        Ok(inputs)
    }
}

/// Upper-cases every string value found in the composed input's top-level
/// map; non-string values pass through unchanged.
#[derive(Debug, Default)]
pub struct UpperExecutor;

#[async_trait]
impl AgentExecutor for UpperExecutor {
    async fn execute(&self, _spec: &AgentSpec, inputs: Value, _ctx: &ExecCtx) -> Result<Value, AgentError> {
        let Some(map) = inputs.as_map() else {
            return Ok(inputs);
        };
        let upper: Mapping = map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => Value::String(s.to_uppercase()),
                    other => other.clone(),
                };
                (k.clone(), value)
            })
            .collect();
        Ok(Value::Map(upper))
    }
}

/// Merges every list-valued entry of its composed input into one flat
/// list under `"merged"`; useful for fan-in nodes in tests.
#[derive(Debug, Default)]
pub struct MergeExecutor;

#[async_trait]
impl AgentExecutor for MergeExecutor {
    async fn execute(&self, _spec: &AgentSpec, inputs: Value, _ctx: &ExecCtx) -> Result<Value, AgentError> {
        let mut merged = Vec::new();
        if let Some(map) = inputs.as_map() {
            for (key, value) in map {
                if key == "_config" {
                    continue;
                }
                match value {
                    Value::List(items) => merged.extend(items.clone()),
                    other => merged.push(other.clone()),
                }
            }
        }
        let mut out = Mapping::new();
        out.insert("merged".to_string(), Value::List(merged));
        Ok(Value::Map(out))
    }
}

/// Always fails with the reason given at construction time.
#[derive(Debug, Clone)]
pub struct FailExecutor {
    reason: String,
}

impl FailExecutor {
    /// Build a new executor that always fails with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl AgentExecutor for FailExecutor {
    async fn execute(&self, _spec: &AgentSpec, _inputs: Value, _ctx: &ExecCtx) -> Result<Value, AgentError> {
        Err(AgentError::Other(self.reason.clone()))
    }
}

/// Sleeps for a fixed duration before returning its input unchanged; used
/// to exercise cancellation and timeout handling.
#[derive(Debug, Clone, Copy)]
pub struct SleepExecutor {
    delay: Duration,
}

impl SleepExecutor {
    /// Build an executor that sleeps for `delay` before completing.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl AgentExecutor for SleepExecutor {
    async fn execute(&self, _spec: &AgentSpec, inputs: Value, ctx: &ExecCtx) -> Result<Value, AgentError> {
        tokio::select! {
            () = tokio::time::sleep(self.delay) => Ok(inputs),
            () = ctx.cancellation.cancelled() => Err(AgentError::Other("cancelled during sleep".to_string())),
        }
    }
}

/// A scripted executor that returns a pre-programmed sequence of results
/// per agent id, for deterministic assertions in the test suite (P5).
#[derive(Default)]
pub struct MockExecutor {
    scripted: Mutex<std::collections::HashMap<AgentId, VecDeque<Result<Value, String>>>>,
}

impl MockExecutor {
    /// Build an empty mock; use [`Self::script`] to queue results.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `result` as the next outcome for `agent_id`. Multiple calls
    /// queue a FIFO sequence, letting a test script retries or repeated
    /// runs of the same stack.
    pub fn script(&self, agent_id: AgentId, result: Result<Value, String>) {
        self.scripted
            .lock()
            .expect("mock executor mutex poisoned")
            .entry(agent_id)
            .or_default()
            .push_back(result);
    }
}

#[async_trait]
impl AgentExecutor for MockExecutor {
    async fn execute(&self, spec: &AgentSpec, inputs: Value, _ctx: &ExecCtx) -> Result<Value, AgentError> {
        let next = self
            .scripted
            .lock()
            .expect("mock executor mutex poisoned")
            .get_mut(&spec.id)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(reason)) => Err(AgentError::Other(reason)),
            None => Ok(inputs),
        }
    }
}
