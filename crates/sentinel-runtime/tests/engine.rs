//! End-to-end tests of the engine: admission, sequential and parallel
//! execution, failure propagation, cancellation, and timeouts.

use indexmap::IndexMap;
use sentinel_core::{AgentId, CoreError, EngineConfig, Mapping, Value};
use sentinel_executors::{EchoExecutor, FailExecutor, MergeExecutor, MockExecutor, SleepExecutor, UpperExecutor};
use sentinel_plan::{AgentSpec, StackSpec};
use sentinel_runtime::{Engine, FailureMode, InMemoryHistoryStore, RunOptions, RunStatus, RunTimeout, RuntimeKind};
use std::sync::Arc;
use std::time::Duration;

fn agent(id: &str, uses: &str, input_from: &[&str], depends: &[&str]) -> AgentSpec {
    AgentSpec {
        id: AgentId::new(id),
        uses: uses.to_string(),
        with: None,
        input_from: input_from.iter().map(|s| AgentId::new(*s)).collect(),
        depends: depends.iter().map(|s| AgentId::new(*s)).collect(),
    }
}

fn spec(name: &str, agents: Vec<AgentSpec>) -> StackSpec {
    StackSpec {
        name: name.to_string(),
        description: String::new(),
        version: "1".to_string(),
        stack_type: "dag".to_string(),
        agents,
    }
}

fn engine_with(executors: Vec<(&str, Arc<dyn sentinel_runtime::AgentExecutor>)>) -> Engine {
    let mut registry = IndexMap::new();
    for (uses, executor) in executors {
        registry.insert(uses.to_string(), executor);
    }
    Engine::new(registry, Arc::new(InMemoryHistoryStore::default()), EngineConfig::default())
}

#[tokio::test]
async fn linear_chain_completes_in_order_sequentially() {
    let engine = engine_with(vec![
        ("echo", Arc::new(EchoExecutor) as Arc<dyn sentinel_runtime::AgentExecutor>),
        ("upper", Arc::new(UpperExecutor)),
    ]);

    let stack_id = engine
        .create_stack(spec(
            "chain",
            vec![agent("a", "echo", &[], &[]), agent("b", "upper", &["a"], &[])],
        ))
        .unwrap();

    let input = Value::Map(Mapping::from_iter([("text".to_string(), Value::String("hi".to_string()))]));
    let result = engine
        .execute_stack(stack_id, input, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    let b_out = result.outputs.get(&AgentId::new("b")).unwrap().as_map().unwrap();
    assert_eq!(b_out.get("text"), Some(&Value::String("HI".to_string())));
}

#[tokio::test]
async fn fan_in_merges_upstream_outputs_in_declaration_order() {
    let engine = engine_with(vec![
        ("echo", Arc::new(EchoExecutor) as Arc<dyn sentinel_runtime::AgentExecutor>),
        ("merge", Arc::new(MergeExecutor)),
    ]);

    let stack_id = engine
        .create_stack(spec(
            "fanin",
            vec![
                agent("a", "echo", &[], &[]),
                agent("b", "echo", &[], &[]),
                agent("c", "merge", &["a", "b"], &[]),
            ],
        ))
        .unwrap();

    let mut global = Mapping::new();
    global.insert("a".to_string(), Value::List(vec![Value::Int(1)]));
    global.insert("b".to_string(), Value::List(vec![Value::Int(2)]));

    let result = engine
        .execute_stack(stack_id, Value::Map(global), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    let merged = result.outputs.get(&AgentId::new("c")).unwrap().as_map().unwrap();
    let Value::List(items) = merged.get("merged").unwrap() else {
        panic!("expected list");
    };
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn depends_only_edge_orders_without_contributing_input() {
    let engine = engine_with(vec![("echo", Arc::new(EchoExecutor) as Arc<dyn sentinel_runtime::AgentExecutor>)]);

    let stack_id = engine
        .create_stack(spec("ordered", vec![agent("a", "echo", &[], &[]), agent("b", "echo", &[], &["a"])]))
        .unwrap();

    let result = engine
        .execute_stack(stack_id, Value::empty_map(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    let b_out = result.outputs.get(&AgentId::new("b")).unwrap();
    assert_eq!(b_out.as_map().unwrap().get("a"), None);
}

#[tokio::test]
async fn failed_node_blocks_its_dependents_under_continue_on_error() {
    let engine = engine_with(vec![
        ("echo", Arc::new(EchoExecutor) as Arc<dyn sentinel_runtime::AgentExecutor>),
        ("fail", Arc::new(FailExecutor::new("boom"))),
    ]);

    let stack_id = engine
        .create_stack(spec(
            "branching",
            vec![
                agent("a", "fail", &[], &[]),
                agent("b", "echo", &["a"], &[]),
                agent("c", "echo", &[], &[]),
            ],
        ))
        .unwrap();

    let options = RunOptions { failure_mode: FailureMode::ContinueOnError, ..RunOptions::default() };
    let result = engine.execute_stack(stack_id, Value::empty_map(), options).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.node_states[&AgentId::new("a")], sentinel_runtime::NodeState::Failed);
    assert_eq!(result.node_states[&AgentId::new("b")], sentinel_runtime::NodeState::Blocked);
    assert_eq!(result.node_states[&AgentId::new("c")], sentinel_runtime::NodeState::Completed);
}

#[tokio::test]
async fn fail_fast_cancels_independent_siblings() {
    let engine = engine_with(vec![
        ("sleep", Arc::new(SleepExecutor::new(Duration::from_millis(200))) as Arc<dyn sentinel_runtime::AgentExecutor>,),
        ("fail", Arc::new(FailExecutor::new("boom"))),
    ]);

    let stack_id = engine
        .create_stack(spec("sibling", vec![agent("a", "fail", &[], &[]), agent("b", "sleep", &[], &[])]))
        .unwrap();

    let options = RunOptions {
        runtime_kind: RuntimeKind::Parallel,
        parallelism: 2,
        failure_mode: FailureMode::FailFast,
        ..RunOptions::default()
    };
    let result = engine.execute_stack(stack_id, Value::empty_map(), options).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.node_states[&AgentId::new("a")], sentinel_runtime::NodeState::Failed);
}

#[tokio::test]
async fn run_times_out_when_deadline_elapses() {
    let engine = engine_with(vec![(
        "sleep",
        Arc::new(SleepExecutor::new(Duration::from_secs(10))) as Arc<dyn sentinel_runtime::AgentExecutor>,
    )]);

    let stack_id = engine.create_stack(spec("slow", vec![agent("a", "sleep", &[], &[])])).unwrap();

    let options = RunOptions { timeout: RunTimeout::After(Duration::from_millis(50)), ..RunOptions::default() };
    let result = engine.execute_stack(stack_id, Value::empty_map(), options).await.unwrap();

    assert!(matches!(result.status, RunStatus::TimedOut | RunStatus::Cancelled));
}

#[tokio::test]
async fn no_timeout_requested_runs_to_completion_past_the_engine_default() {
    let mut config = EngineConfig::default();
    config.default_timeout = Duration::from_millis(10);
    let engine = Engine::new(
        IndexMap::from([(
            "sleep".to_string(),
            Arc::new(SleepExecutor::new(Duration::from_millis(50))) as Arc<dyn sentinel_runtime::AgentExecutor>,
        )]),
        Arc::new(InMemoryHistoryStore::default()),
        config,
    );

    let stack_id = engine.create_stack(spec("patient", vec![agent("a", "sleep", &[], &[])])).unwrap();
    let options = RunOptions { timeout: RunTimeout::None, ..RunOptions::default() };
    let result = engine.execute_stack(stack_id, Value::empty_map(), options).await.unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn fail_fast_sequential_cancels_an_undispatched_sibling() {
    let engine = engine_with(vec![("fail", Arc::new(FailExecutor::new("boom")) as Arc<dyn sentinel_runtime::AgentExecutor>)]);

    let stack_id = engine
        .create_stack(spec("sibling-seq", vec![agent("a", "fail", &[], &[]), agent("b", "fail", &[], &[])]))
        .unwrap();

    let options = RunOptions { failure_mode: FailureMode::FailFast, ..RunOptions::default() };
    let result = engine.execute_stack(stack_id, Value::empty_map(), options).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.node_states[&AgentId::new("b")], sentinel_runtime::NodeState::Cancelled);
}

#[tokio::test]
async fn stop_stack_cancels_an_in_flight_run() {
    let engine = Arc::new(engine_with(vec![(
        "sleep",
        Arc::new(SleepExecutor::new(Duration::from_secs(5))) as Arc<dyn sentinel_runtime::AgentExecutor>,
    )]));

    let stack_id = engine.create_stack(spec("stoppable", vec![agent("a", "sleep", &[], &[])])).unwrap();

    let run_engine = Arc::clone(&engine);
    let handle = tokio::spawn(async move {
        run_engine.execute_stack(stack_id, Value::empty_map(), RunOptions::default()).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.stop_stack(stack_id).unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn concurrent_runs_on_one_engine_are_rejected() {
    let engine = Arc::new(engine_with(vec![(
        "sleep",
        Arc::new(SleepExecutor::new(Duration::from_millis(200))) as Arc<dyn sentinel_runtime::AgentExecutor>,
    )]));

    let stack_id = engine.create_stack(spec("busy", vec![agent("a", "sleep", &[], &[])])).unwrap();

    let first_engine = Arc::clone(&engine);
    let first = tokio::spawn(async move {
        first_engine.execute_stack(stack_id, Value::empty_map(), RunOptions::default()).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = engine.execute_stack(stack_id, Value::empty_map(), RunOptions::default()).await;
    assert!(matches!(second, Err(CoreError::AlreadyRunning)));

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn determinism_same_spec_and_inputs_yield_identical_transitions() {
    let mock = Arc::new(MockExecutor::new());
    mock.script(AgentId::new("a"), Ok(Value::Int(1)));
    mock.script(AgentId::new("a"), Ok(Value::Int(1)));

    let engine = engine_with(vec![("mock", mock.clone() as Arc<dyn sentinel_runtime::AgentExecutor>)]);
    let stack_id = engine.create_stack(spec("det", vec![agent("a", "mock", &[], &[])])).unwrap();

    let first = engine.execute_stack(stack_id, Value::empty_map(), RunOptions::default()).await.unwrap();
    let second = engine.execute_stack(stack_id, Value::empty_map(), RunOptions::default()).await.unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.outputs, second.outputs);

    let history = engine.get_stack_execution_history(stack_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].run_id, second.run_id);
}

#[tokio::test]
async fn unresolved_uses_fails_the_node_without_panicking() {
    let engine = engine_with(vec![]);
    let stack_id = engine.create_stack(spec("unknown", vec![agent("a", "nonexistent", &[], &[])])).unwrap();

    let result = engine.execute_stack(stack_id, Value::empty_map(), RunOptions::default()).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    let record = result.record.node_outputs.get(&AgentId::new("a")).unwrap();
    assert!(matches!(record.error, Some(CoreError::Resolution { .. })));
}
