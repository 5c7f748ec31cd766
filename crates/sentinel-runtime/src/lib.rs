//! Scheduler, executor capability, run driver, history store, and
//! cancellation for the Stack Execution Engine.
//!
//! This crate is the async half of the engine; `sentinel-plan` stays
//! synchronous and knows nothing about `tokio`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod driver;
pub mod executor;
pub mod history;
pub mod scheduler;

pub use cancel::RunCancellation;
pub use driver::{
    CompiledStack, Engine, ExecutionRecord, FailureMode, NodeRecord, NodeState, RunOptions,
    RunResult, RunStatus, RunTimeout, RuntimeKind, Transition,
};
pub use executor::{AgentError, AgentExecutor, ExecCtx};
pub use history::{HistoryStore, InMemoryHistoryStore};
pub use scheduler::{static_order, NodeOutcome, Scheduler};
