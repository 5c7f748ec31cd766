//! The run driver: ties the scheduler, executor registry, history store,
//! and cancellation together behind the engine's public operations.

use crate::cancel::RunCancellation;
use crate::executor::{compose_inputs, AgentError, AgentExecutor, ExecCtx};
use crate::history::HistoryStore;
use crate::scheduler::{NodeOutcome as SchedulerOutcome, Scheduler};
use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use indexmap::IndexMap;
use sentinel_core::{AgentId, CoreError, CoreResult, EngineConfig, RunId, StackId, Value};
use sentinel_plan::{Dag, StackSpec, StackSpecDto};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The lifecycle state of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Not yet ready; waiting on at least one dependency.
    Pending,
    /// All dependencies satisfied, waiting for a dispatch slot.
    Ready,
    /// Dispatched to the executor, awaiting its result.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// A dependency terminated without succeeding; this node never ran.
    Blocked,
    /// Cancellation was observed before this node could start or finish.
    Cancelled,
}

impl NodeState {
    /// True if this is one of the terminal states a node cannot leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Completed | NodeState::Failed | NodeState::Blocked | NodeState::Cancelled
        )
    }
}

/// A single state transition recorded for a node during a run.
#[derive(Debug, Clone)]
pub struct Transition {
    /// The agent that transitioned.
    pub agent_id: AgentId,
    /// The state it transitioned into.
    pub state: NodeState,
    /// When the transition was recorded.
    pub at: DateTime<Utc>,
}

/// The run-level aggregate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every node completed successfully.
    Succeeded,
    /// At least one node failed (and `FailureMode::ContinueOnError` was
    /// in effect, or fail-fast stopped the run after the first failure).
    Failed,
    /// The run was cancelled, including nodes that completed after
    /// cancellation was requested (their output is kept, but the run is
    /// still reported `Cancelled` overall).
    Cancelled,
    /// The run's deadline elapsed before every node reached a terminal
    /// state.
    TimedOut,
}

/// What the driver does when a node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Cancel the run on the first node failure; nodes already in flight
    /// are allowed to finish, no new nodes are dispatched.
    FailFast,
    /// Keep running everything not downstream of the failure; only the
    /// failed node's dependents are blocked.
    ContinueOnError,
}

/// Which loop shape the driver uses to walk the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Dispatch exactly one node at a time, in declaration order.
    Sequential,
    /// Dispatch up to `RunOptions::parallelism` nodes concurrently from
    /// the dynamic ready-set.
    Parallel,
}

/// A run's wall-clock budget, distinguishing "no deadline at all" from
/// "fall back to the engine's configured default" — collapsing the two
/// would make it impossible for a caller to ever run without a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTimeout {
    /// Use `EngineConfig::default_timeout`.
    UseEngineDefault,
    /// No deadline; the run can take as long as it takes.
    None,
    /// An explicit deadline for this run only.
    After(Duration),
}

impl RunTimeout {
    fn resolve(self, config: &EngineConfig) -> Option<Duration> {
        match self {
            RunTimeout::UseEngineDefault => Some(config.default_timeout),
            RunTimeout::None => None,
            RunTimeout::After(d) => Some(d),
        }
    }
}

/// Options controlling a single `execute_stack` call.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Wall-clock budget for the whole run.
    pub timeout: RunTimeout,
    /// Sequential or parallel dispatch.
    pub runtime_kind: RuntimeKind,
    /// Maximum concurrent dispatches in `RuntimeKind::Parallel`. Ignored
    /// (treated as 1) in `RuntimeKind::Sequential`.
    pub parallelism: usize,
    /// Behavior on node failure.
    pub failure_mode: FailureMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: RunTimeout::UseEngineDefault,
            runtime_kind: RuntimeKind::Sequential,
            parallelism: 1,
            failure_mode: FailureMode::ContinueOnError,
        }
    }
}

/// Per-node outcome retained in an `ExecutionRecord`.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// The node's terminal state.
    pub state: NodeState,
    /// The node's output, if it completed successfully.
    pub output: Option<Value>,
    /// The classified error, if it did not.
    pub error: Option<CoreError>,
}

/// The durable record of one run, as returned by `get_stack_execution_history`.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// The run this record describes.
    pub run_id: RunId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub ended_at: DateTime<Utc>,
    /// The run's aggregate outcome.
    pub status: RunStatus,
    /// Every state transition recorded during the run, in order.
    pub transitions: Vec<Transition>,
    /// Per-node terminal outcome.
    pub node_outputs: IndexMap<AgentId, NodeRecord>,
}

/// The full result of `execute_stack`, before it is (optionally) handed
/// off to the history store.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The run's id.
    pub run_id: RunId,
    /// The run's aggregate outcome.
    pub status: RunStatus,
    /// Current state of every node.
    pub node_states: IndexMap<AgentId, NodeState>,
    /// Outputs produced by every node that completed.
    pub outputs: IndexMap<AgentId, Value>,
    /// The full durable record, also handed to the history store.
    pub record: ExecutionRecord,
}

/// A validated spec plus its built `Dag`, shared read-only across every
/// run of the same stack.
#[derive(Debug)]
pub struct CompiledStack {
    /// This stack's id, assigned at `create_stack` time.
    pub id: StackId,
    /// The admitted spec.
    pub spec: Arc<StackSpec>,
    /// The graph built from it.
    pub dag: Arc<Dag>,
}

struct StackEntry {
    compiled: Arc<CompiledStack>,
    node_states: Mutex<IndexMap<AgentId, NodeState>>,
    active_cancellation: Mutex<Option<RunCancellation>>,
}

/// What a single dispatched node's invocation failed with, classified
/// before the executor was even called in the deadline/cancellation
/// cases.
enum DispatchFailure {
    Agent(AgentError),
    TimedOut,
    Cancelled,
}

fn classify(agent_id: &AgentId, failure: &DispatchFailure) -> CoreError {
    match failure {
        DispatchFailure::Cancelled => CoreError::Cancelled,
        DispatchFailure::TimedOut => CoreError::TimedOut,
        DispatchFailure::Agent(AgentError::Unresolved { uses }) => CoreError::Resolution {
            agent_id: agent_id.clone(),
            uses: uses.clone(),
        },
        DispatchFailure::Agent(AgentError::InvalidInput { reason }) => CoreError::Input {
            agent_id: agent_id.clone(),
            reason: reason.clone(),
        },
        DispatchFailure::Agent(AgentError::Other(reason)) => CoreError::Execution {
            agent_id: agent_id.clone(),
            reason: reason.clone(),
        },
    }
}

/// The execution engine: admits stacks, runs them, and reports their
/// state and history.
///
/// No global state — every `Engine` instance enforces `AlreadyRunning`
/// independently via its own in-flight flag; independent instances never
/// coordinate.
pub struct Engine {
    executors: IndexMap<String, Arc<dyn AgentExecutor>>,
    history: Arc<dyn HistoryStore>,
    config: EngineConfig,
    stacks: Mutex<IndexMap<StackId, Arc<StackEntry>>>,
    in_flight: AtomicBool,
}

impl Engine {
    /// Build an engine with the given executor registry (keyed by
    /// `AgentSpec::uses`), history store, and ambient config.
    #[must_use]
    pub fn new(
        executors: IndexMap<String, Arc<dyn AgentExecutor>>,
        history: Arc<dyn HistoryStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executors,
            history,
            config,
            stacks: Mutex::new(IndexMap::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Admit a stack spec: validate it, build its `Dag`, and assign it a
    /// `StackId`.
    pub fn create_stack(&self, dto: StackSpecDto) -> CoreResult<StackId> {
        let spec = StackSpec::try_from(dto)?;
        let dag = Dag::build(&spec)?;
        let id = StackId::new();

        let node_states = dag
            .nodes()
            .map(|n| (n.id.clone(), NodeState::Pending))
            .collect();

        let entry = Arc::new(StackEntry {
            compiled: Arc::new(CompiledStack {
                id,
                spec: Arc::new(spec),
                dag: Arc::new(dag),
            }),
            node_states: Mutex::new(node_states),
            active_cancellation: Mutex::new(None),
        });

        self.stacks.lock().expect("stacks mutex poisoned").insert(id, entry);
        info!(stack_id = %id, "stack admitted");
        Ok(id)
    }

    /// Current per-node state for `stack_id`, reflecting the most recent
    /// run (or `Pending` for every node if it has never executed).
    pub fn get_stack_state(&self, stack_id: StackId) -> CoreResult<IndexMap<AgentId, NodeState>> {
        let entry = self.lookup(stack_id)?;
        Ok(entry.node_states.lock().expect("node state mutex poisoned").clone())
    }

    /// Every retained `ExecutionRecord` for `stack_id`, newest first.
    pub fn get_stack_execution_history(&self, stack_id: StackId) -> CoreResult<Vec<ExecutionRecord>> {
        self.lookup(stack_id)?;
        Ok(self.history.history(stack_id))
    }

    /// Request cancellation of the run currently in flight for
    /// `stack_id`, if any. A no-op if no run is active.
    pub fn stop_stack(&self, stack_id: StackId) -> CoreResult<()> {
        let entry = self.lookup(stack_id)?;
        if let Some(cancellation) = entry.active_cancellation.lock().expect("cancellation mutex poisoned").as_ref() {
            cancellation.cancel();
        }
        Ok(())
    }

    fn lookup(&self, stack_id: StackId) -> CoreResult<Arc<StackEntry>> {
        self.stacks
            .lock()
            .expect("stacks mutex poisoned")
            .get(&stack_id)
            .cloned()
            .ok_or_else(|| CoreError::validation("stack_id", "unknown stack"))
    }

    /// Execute `stack_id` with `inputs`, honoring `options`. At most one
    /// run is in flight on this `Engine` instance at a time; a concurrent
    /// call returns `CoreError::AlreadyRunning`.
    pub async fn execute_stack(
        &self,
        stack_id: StackId,
        inputs: Value,
        options: RunOptions,
    ) -> CoreResult<RunResult> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::AlreadyRunning);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let entry = self.lookup(stack_id)?;
        let compiled = Arc::clone(&entry.compiled);

        let timeout = options.timeout.resolve(&self.config);
        let cancellation = RunCancellation::new(timeout);
        cancellation.spawn_deadline_watcher();
        *entry.active_cancellation.lock().expect("cancellation mutex poisoned") = Some(cancellation.clone());

        let run_id = RunId::new();
        let started_at = Utc::now();
        let parallelism = match options.runtime_kind {
            RuntimeKind::Sequential => 1,
            RuntimeKind::Parallel => options.parallelism.max(1),
        };

        info!(%run_id, %stack_id, parallelism, "run starting");
        let outcome = self
            .run_loop(&compiled, &inputs, parallelism, options.failure_mode, &cancellation)
            .await;
        let ended_at = Utc::now();

        *entry.active_cancellation.lock().expect("cancellation mutex poisoned") = None;
        *entry.node_states.lock().expect("node state mutex poisoned") = outcome.node_states.clone();

        let status = outcome.status;
        info!(%run_id, ?status, "run finished");

        let record = ExecutionRecord {
            run_id,
            started_at,
            ended_at,
            status,
            transitions: outcome.transitions,
            node_outputs: outcome.node_records,
        };
        self.history.record(stack_id, record.clone());

        Ok(RunResult {
            run_id,
            status,
            node_states: outcome.node_states,
            outputs: outcome.outputs,
            record,
        })
    }

    async fn run_loop(
        &self,
        compiled: &CompiledStack,
        global_inputs: &Value,
        parallelism: usize,
        failure_mode: FailureMode,
        cancellation: &RunCancellation,
    ) -> RunOutcome {
        let dag = &*compiled.dag;
        let spec = &*compiled.spec;

        let mut scheduler = Scheduler::new(dag);
        let mut node_states: IndexMap<AgentId, NodeState> =
            dag.nodes().map(|n| (n.id.clone(), NodeState::Pending)).collect();
        let mut outputs: IndexMap<AgentId, Value> = IndexMap::new();
        let mut transitions: Vec<Transition> = Vec::new();
        let mut node_records: IndexMap<AgentId, NodeRecord> = IndexMap::new();
        let mut any_failure = false;
        let mut logged_abort = false;

        let specs_by_id: IndexMap<AgentId, &sentinel_plan::AgentSpec> =
            spec.agents.iter().map(|a| (a.id.clone(), a)).collect();

        let transition = |node_states: &mut IndexMap<AgentId, NodeState>, transitions: &mut Vec<Transition>, id: AgentId, state: NodeState| {
            node_states.insert(id.clone(), state);
            transitions.push(Transition { agent_id: id, state, at: Utc::now() });
        };

        type Dispatched = std::pin::Pin<Box<dyn std::future::Future<Output = (AgentId, Result<Value, DispatchFailure>)> + Send>>;
        let mut in_flight: FuturesUnordered<Dispatched> = FuturesUnordered::new();

        loop {
            if cancellation.is_cancelled() && !logged_abort {
                logged_abort = true;
                debug!("run cancelled, draining in-flight nodes");
            }

            while !cancellation.is_cancelled() && in_flight.len() < parallelism {
                let Some(id) = scheduler.pop_ready() else { break };
                let node = dag.node(&id).expect("ready id must be a known node");
                let node_spec: &sentinel_plan::AgentSpec =
                    specs_by_id.get(&id).copied().expect("ready id must have a declared spec");
                let Some(executor) = self.executors.get(&node_spec.uses).cloned() else {
                    transition(&mut node_states, &mut transitions, id.clone(), NodeState::Running);
                    let failure = DispatchFailure::Agent(AgentError::Unresolved { uses: node_spec.uses.clone() });
                    transition(&mut node_states, &mut transitions, id.clone(), NodeState::Failed);
                    node_records.insert(id.clone(), NodeRecord { state: NodeState::Failed, output: None, error: Some(classify(&id, &failure)) });
                    scheduler.mark_done(&id, SchedulerOutcome::Terminated);
                    any_failure = true;
                    if failure_mode == FailureMode::FailFast {
                        cancellation.cancel_for_failure();
                    }
                    continue;
                };

                let composed = compose_inputs(node, node_spec, global_inputs, &outputs);
                let node_spec_owned = node_spec.clone();
                let ctx = ExecCtx { cancellation: cancellation.token(), deadline: cancellation.deadline() };
                transition(&mut node_states, &mut transitions, id.clone(), NodeState::Ready);
                transition(&mut node_states, &mut transitions, id.clone(), NodeState::Running);

                let fut: Dispatched = Box::pin(async move {
                    if ctx.is_cancelled() {
                        return (id, Err(DispatchFailure::Cancelled));
                    }
                    if matches!(ctx.remaining(), Some(d) if d.is_zero()) {
                        return (id, Err(DispatchFailure::TimedOut));
                    }
                    // Race the executor against cancellation rather than trusting
                    // every executor to poll `ctx` itself.
                    tokio::select! {
                        biased;
                        () = ctx.cancellation.cancelled() => (id, Err(DispatchFailure::Cancelled)),
                        result = executor.execute(&node_spec_owned, composed, &ctx) => {
                            (id, result.map_err(DispatchFailure::Agent))
                        }
                    }
                });
                in_flight.push(fut);
            }

            if in_flight.is_empty() {
                break;
            }

            let Some((id, result)) = in_flight.next().await else { break };
            match result {
                Ok(output) => {
                    transition(&mut node_states, &mut transitions, id.clone(), NodeState::Completed);
                    node_records.insert(id.clone(), NodeRecord { state: NodeState::Completed, output: Some(output.clone()), error: None });
                    outputs.insert(id.clone(), output);
                    scheduler.mark_done(&id, SchedulerOutcome::Completed);
                }
                Err(failure) => {
                    let core_error = classify(&id, &failure);
                    let state = match core_error {
                        CoreError::Cancelled => NodeState::Cancelled,
                        _ => NodeState::Failed,
                    };
                    warn!(agent_id = %id, error = %core_error, "node did not complete");
                    transition(&mut node_states, &mut transitions, id.clone(), state);
                    node_records.insert(id.clone(), NodeRecord { state, output: None, error: Some(core_error) });
                    scheduler.mark_done(&id, SchedulerOutcome::Terminated);
                    any_failure = true;
                    if failure_mode == FailureMode::FailFast {
                        cancellation.cancel_for_failure();
                    }
                }
            }

            if cancellation.is_cancelled() && in_flight.is_empty() {
                break;
            }
        }

        for node in dag.nodes() {
            let state = node_states.get(&node.id).copied().unwrap_or(NodeState::Pending);
            if !state.is_terminal() {
                // A node left non-terminal either sat behind a failed
                // dependency under `ContinueOnError` (no cancellation was
                // ever triggered, so it is genuinely `Blocked`) or never got
                // a dispatch slot because the run was aborted, whether by
                // an external stop/deadline or by fail-fast — either cause
                // means it was cancelled, not blocked by a specific parent.
                let final_state = if cancellation.is_cancelled() {
                    NodeState::Cancelled
                } else {
                    NodeState::Blocked
                };
                transition(&mut node_states, &mut transitions, node.id.clone(), final_state);
                node_records.insert(
                    node.id.clone(),
                    NodeRecord {
                        state: final_state,
                        output: None,
                        error: Some(if final_state == NodeState::Cancelled {
                            CoreError::Cancelled
                        } else {
                            CoreError::Graph { reason: format!("{} blocked: an upstream dependency did not complete", node.id), cycle: None }
                        }),
                    },
                );
            }
        }

        let status = if cancellation.was_externally_cancelled() {
            if matches!(cancellation.deadline(), Some(deadline) if deadline <= Instant::now()) {
                RunStatus::TimedOut
            } else {
                RunStatus::Cancelled
            }
        } else if any_failure {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        RunOutcome { status, node_states, outputs, transitions, node_records }
    }
}

struct RunOutcome {
    status: RunStatus,
    node_states: IndexMap<AgentId, NodeState>,
    outputs: IndexMap<AgentId, Value>,
    transitions: Vec<Transition>,
    node_records: IndexMap<AgentId, NodeRecord>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
