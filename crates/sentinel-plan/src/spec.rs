//! The stack specification model: `StackSpec`/`AgentSpec` and the
//! serde-facing DTO used to admit a spec from YAML/JSON.

use indexmap::IndexMap;
use sentinel_core::{AgentId, CoreError, CoreResult, Value};
use serde::{Deserialize, Serialize};

/// A declarative multi-agent stack, admitted after passing validation.
///
/// Immutable once built: nothing downstream mutates a `StackSpec`, only
/// reads it to build a `Dag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    /// Human-readable stack name. Must be non-empty.
    pub name: String,
    /// Free-form description, may be empty.
    #[serde(default)]
    pub description: String,
    /// Stack format version. Must be non-empty.
    pub version: String,
    /// Declared stack kind (e.g. `"sequential"`, `"dag"`); informational,
    /// the engine treats every stack the same way via its DAG. Serialized
    /// as plain `type`.
    #[serde(rename = "type", default = "default_stack_type")]
    pub stack_type: String,
    /// The agents that make up this stack, in declaration order. Order is
    /// significant: it is the scheduler's tie-break for otherwise-equal
    /// ready nodes.
    pub agents: Vec<AgentSpec>,
}

fn default_stack_type() -> String {
    "dag".to_string()
}

/// A single agent node within a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// Caller-supplied id, unique within the stack. Must be non-empty.
    pub id: AgentId,
    /// Identifies which `AgentExecutor` implementation runs this node
    /// (e.g. `"echo"`, `"llm:gpt-4"`); opaque to the engine.
    pub uses: String,
    /// Static configuration passed to the executor as `_config`, verbatim.
    #[serde(default)]
    pub with: Option<IndexMap<String, Value>>,
    /// Upstream agents whose output feeds this agent's input, in the order
    /// their outputs should be merged. Serialized as `inputFrom`.
    #[serde(default)]
    pub input_from: Vec<AgentId>,
    /// Upstream agents that must complete before this one runs, but whose
    /// output is not merged into this agent's input.
    #[serde(default)]
    pub depends: Vec<AgentId>,
}

impl AgentSpec {
    /// The `with` block, or an empty mapping if none was declared.
    #[must_use]
    pub fn with_or_empty(&self) -> IndexMap<String, Value> {
        self.with.clone().unwrap_or_default()
    }
}

/// Wire-format mirror of `StackSpec`, accepted as-is from YAML/JSON and
/// admitted via [`TryFrom`] after running the validator.
///
/// A genuinely distinct type from `StackSpec` (not a type alias onto it),
/// so the admission boundary is a single, auditable conversion point
/// rather than the identity function, matching how the teacher's compiler
/// keeps its AST distinct from the `Dag` it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSpecDto {
    /// See [`StackSpec::name`].
    pub name: String,
    /// See [`StackSpec::description`].
    #[serde(default)]
    pub description: String,
    /// See [`StackSpec::version`].
    pub version: String,
    /// See [`StackSpec::stack_type`].
    #[serde(rename = "type", default = "default_stack_type")]
    pub stack_type: String,
    /// See [`StackSpec::agents`].
    pub agents: Vec<AgentSpec>,
}

impl TryFrom<StackSpecDto> for StackSpec {
    type Error = CoreError;

    fn try_from(dto: StackSpecDto) -> CoreResult<Self> {
        let spec = StackSpec {
            name: dto.name,
            description: dto.description,
            version: dto.version,
            stack_type: dto.stack_type,
            agents: dto.agents,
        };
        crate::validate::Validator::new().validate(&spec)?;
        Ok(spec)
    }
}
