//! Command-line demo front-end for the Stack Execution Engine.
//!
//! Loads a stack spec from YAML, wires up the bundled reference executors,
//! and drives a single `Engine` run. Not a registry or a service front-end:
//! a real deployment wires its own executors and embeds `sentinel-runtime`
//! directly.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use indexmap::IndexMap;
use sentinel_core::{EngineConfig, Value};
use sentinel_executors::{EchoExecutor, MergeExecutor, UpperExecutor};
use sentinel_plan::StackSpecDto;
use sentinel_runtime::{AgentExecutor, Engine, FailureMode, InMemoryHistoryStore, RunOptions, RunTimeout, RuntimeKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "SentinelStacks - declarative multi-agent stack execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a stack spec without executing it.
    Validate {
        /// Path to the stack spec (YAML).
        file: PathBuf,
    },
    /// Run a stack spec to completion and print its outcome.
    Run {
        /// Path to the stack spec (YAML).
        file: PathBuf,
        /// Global input, as a JSON object. Defaults to an empty mapping.
        #[arg(long)]
        input: Option<String>,
        /// Path to an `EngineConfig` TOML file. Defaults to built-in defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Wall-clock budget for the run, in seconds. 0 means no deadline.
        /// Omit to use the engine config's default.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Dispatch ready nodes concurrently instead of one at a time.
        #[arg(long)]
        parallel: bool,
        /// Maximum concurrent dispatches when `--parallel` is set.
        #[arg(long, default_value_t = 4)]
        parallelism: usize,
        /// Cancel remaining nodes after the first failure instead of
        /// continuing everything not downstream of it.
        #[arg(long)]
        fail_fast: bool,
        /// Print the full per-node output map as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_spec(path: &PathBuf) -> Result<StackSpecDto> {
    let text = fs::read_to_string(path).with_context(|| format!("reading stack spec {}", path.display()))?;
    let dto: StackSpecDto = serde_yaml::from_str(&text).with_context(|| format!("parsing stack spec {}", path.display()))?;
    Ok(dto)
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading engine config {}", path.display()))?;
    EngineConfig::from_toml(&text).with_context(|| format!("parsing engine config {}", path.display()))
}

fn parse_input(input: Option<String>) -> Result<Value> {
    match input {
        None => Ok(Value::empty_map()),
        Some(raw) => {
            let json: serde_json::Value = serde_json::from_str(&raw).context("parsing --input as JSON")?;
            Ok(Value::from(json))
        }
    }
}

/// The reference executors bundled for the demo CLI: enough to run the
/// example stacks in `demos/`, not a general-purpose registry.
fn default_registry() -> IndexMap<String, Arc<dyn AgentExecutor>> {
    let mut registry: IndexMap<String, Arc<dyn AgentExecutor>> = IndexMap::new();
    registry.insert("echo".to_string(), Arc::new(EchoExecutor));
    registry.insert("upper".to_string(), Arc::new(UpperExecutor));
    registry.insert("merge".to_string(), Arc::new(MergeExecutor));
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let dto = load_spec(&file)?;
            let engine = Engine::new(default_registry(), Arc::new(InMemoryHistoryStore::default()), EngineConfig::default());
            engine.create_stack(dto).map_err(|e| color_eyre::eyre::eyre!(e))?;
            println!("stack is valid");
            Ok(())
        }
        Commands::Run { file, input, config, timeout_secs, parallel, parallelism, fail_fast, json } => {
            let dto = load_spec(&file)?;
            let global_input = parse_input(input)?;
            let config = load_config(config.as_ref())?;

            let engine = Engine::new(default_registry(), Arc::new(InMemoryHistoryStore::default()), config);
            let stack_id = engine.create_stack(dto).map_err(|e| color_eyre::eyre::eyre!(e))?;

            let timeout = match timeout_secs {
                None => RunTimeout::UseEngineDefault,
                Some(0) => RunTimeout::None,
                Some(secs) => RunTimeout::After(Duration::from_secs(secs)),
            };
            let options = RunOptions {
                timeout,
                runtime_kind: if parallel { RuntimeKind::Parallel } else { RuntimeKind::Sequential },
                parallelism,
                failure_mode: if fail_fast { FailureMode::FailFast } else { FailureMode::ContinueOnError },
            };

            let result = engine
                .execute_stack(stack_id, global_input, options)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e))?;

            println!("run {} finished: {:?}", result.run_id, result.status);
            for (agent_id, state) in &result.node_states {
                println!("  {agent_id}: {state:?}");
            }

            if json {
                let outputs: IndexMap<String, serde_json::Value> = result
                    .outputs
                    .into_iter()
                    .map(|(id, value)| (id.to_string(), serde_json::Value::from(value)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&outputs)?);
            }

            if !matches!(result.status, sentinel_runtime::RunStatus::Succeeded) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_spec_parses_a_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name: demo\nversion: \"1\"\ntype: dag\nagents:\n  - id: a\n    uses: echo\n  - id: b\n    uses: upper\n    inputFrom: [a]\n"
        )
        .unwrap();

        let dto = load_spec(&file.path().to_path_buf()).unwrap();
        assert_eq!(dto.name, "demo");
        assert_eq!(dto.stack_type, "dag");
        assert_eq!(dto.agents.len(), 2);
        assert_eq!(dto.agents[1].input_from, vec![sentinel_core::AgentId::new("a")]);
    }

    #[test]
    fn load_spec_reports_missing_file() {
        let missing = PathBuf::from("/nonexistent/does-not-exist.yaml");
        assert!(load_spec(&missing).is_err());
    }

    #[test]
    fn parse_input_defaults_to_empty_map_when_absent() {
        let value = parse_input(None).unwrap();
        assert_eq!(value, Value::empty_map());
    }

    #[test]
    fn parse_input_converts_json_object() {
        let value = parse_input(Some("{\"x\": 1}".to_string())).unwrap();
        assert_eq!(value.as_map().unwrap().get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn load_config_falls_back_to_defaults_when_absent() {
        let config = load_config(None).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
