//! The dependency graph built from a validated `StackSpec`.

use crate::spec::StackSpec;
use indexmap::{IndexMap, IndexSet};
use sentinel_core::{AgentId, CoreError, CoreResult};

/// Whether an edge carries data (an `input_from` reference) or is
/// ordering-only (a `depends` reference with no matching `input_from`).
///
/// If an id appears in both `input_from` and `depends` for the same agent,
/// the edge is deduplicated to a single `DataBearing` edge (I5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// The upstream agent's output is merged into the downstream agent's
    /// input.
    DataBearing,
    /// The upstream agent must complete before the downstream agent runs,
    /// but its output is not merged.
    OrderOnly,
}

/// A directed edge from `from` to `to` in declaration order of `to`'s
/// dependency list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The upstream agent.
    pub from: AgentId,
    /// The downstream agent.
    pub to: AgentId,
    /// Whether this edge is data-bearing.
    pub kind: EdgeKind,
}

/// A single agent within the built graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// The agent this node represents.
    pub id: AgentId,
    /// Index of this agent within the original `StackSpec::agents`,
    /// used as the scheduler's deterministic tie-break.
    pub declaration_index: usize,
    /// Upstream agents that feed this node's input, in merge order.
    pub input_from: Vec<AgentId>,
    /// All upstream agents (data-bearing and order-only) that must
    /// complete before this node is ready.
    pub dependencies: IndexSet<AgentId>,
}

/// The dependency graph for a stack, built once and shared read-only
/// across every run of that stack.
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: IndexMap<AgentId, Node>,
    edges: Vec<Edge>,
    dependents: IndexMap<AgentId, IndexSet<AgentId>>,
    source_nodes: IndexSet<AgentId>,
}

impl Dag {
    /// Build a `Dag` from an already-validated `StackSpec`.
    ///
    /// Allocates one `Node` per agent, unions `input_from`/`depends` per
    /// node (deduplicating by id, `DataBearing` taking precedence), checks
    /// for cycles via three-color DFS in declaration order, and computes
    /// the source-node set (agents with no dependencies).
    pub fn build(spec: &StackSpec) -> CoreResult<Self> {
        let mut nodes = IndexMap::new();
        let mut edges = Vec::new();
        let mut dependents: IndexMap<AgentId, IndexSet<AgentId>> = IndexMap::new();

        for agent in &spec.agents {
            dependents.entry(agent.id.clone()).or_default();
        }

        for (index, agent) in spec.agents.iter().enumerate() {
            let mut dependencies = IndexSet::new();
            let data_bearing: IndexSet<&AgentId> = agent.input_from.iter().collect();

            for upstream in agent.input_from.iter().chain(agent.depends.iter()) {
                if dependencies.insert(upstream.clone()) {
                    let kind = if data_bearing.contains(upstream) {
                        EdgeKind::DataBearing
                    } else {
                        EdgeKind::OrderOnly
                    };
                    edges.push(Edge {
                        from: upstream.clone(),
                        to: agent.id.clone(),
                        kind,
                    });
                    dependents
                        .entry(upstream.clone())
                        .or_default()
                        .insert(agent.id.clone());
                }
            }

            nodes.insert(
                agent.id.clone(),
                Node {
                    id: agent.id.clone(),
                    declaration_index: index,
                    input_from: agent.input_from.clone(),
                    dependencies,
                },
            );
        }

        let source_nodes: IndexSet<AgentId> = nodes
            .values()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.id.clone())
            .collect();

        if source_nodes.is_empty() {
            return Err(CoreError::no_source());
        }

        let dag = Self {
            nodes,
            edges,
            dependents,
            source_nodes,
        };
        dag.check_acyclic(spec)?;
        Ok(dag)
    }

    /// Three-color DFS cycle check, walking agents in declaration order so
    /// the reported cycle is deterministic.
    fn check_acyclic(&self, spec: &StackSpec) -> CoreResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: IndexMap<AgentId, Color> =
            self.nodes.keys().map(|id| (id.clone(), Color::White)).collect();
        let mut stack: Vec<AgentId> = Vec::new();

        fn visit(
            id: &AgentId,
            dag: &Dag,
            color: &mut IndexMap<AgentId, Color>,
            stack: &mut Vec<AgentId>,
        ) -> Option<Vec<AgentId>> {
            color.insert(id.clone(), Color::Gray);
            stack.push(id.clone());

            if let Some(node) = dag.nodes.get(id) {
                for dep in &node.dependencies {
                    match color.get(dep).copied() {
                        Some(Color::White) => {
                            if let Some(cycle) = visit(dep, dag, color, stack) {
                                return Some(cycle);
                            }
                        }
                        Some(Color::Gray) => {
                            let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                            let mut cycle: Vec<AgentId> = stack[start..].to_vec();
                            cycle.push(dep.clone());
                            return Some(cycle);
                        }
                        _ => {}
                    }
                }
            }

            stack.pop();
            color.insert(id.clone(), Color::Black);
            None
        }

        for agent in &spec.agents {
            if color.get(&agent.id).copied() == Some(Color::White) {
                if let Some(cycle) = visit(&agent.id, self, &mut color, &mut stack) {
                    return Err(CoreError::cycle(cycle));
                }
            }
        }

        Ok(())
    }

    /// Iterate nodes in insertion (declaration) order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &AgentId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph has no nodes (never the case for a built `Dag`,
    /// since validation requires a non-empty agent list).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All edges in the graph.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Agents with no dependencies; the initial ready-set.
    #[must_use]
    pub fn source_nodes(&self) -> &IndexSet<AgentId> {
        &self.source_nodes
    }

    /// Agents that depend on `id`, in the order they were first
    /// registered.
    #[must_use]
    pub fn dependents_of(&self, id: &AgentId) -> Option<&IndexSet<AgentId>> {
        self.dependents.get(id)
    }
}
