//! Topological scheduling: the static declaration-order total order used
//! by sequential runs, and the dynamic ready-set used by parallel runs.

use indexmap::{IndexMap, IndexSet};
use sentinel_core::AgentId;
use sentinel_plan::Dag;
use std::collections::BTreeMap;

/// Terminal outcome fed back into the scheduler for a dispatched node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// The node completed successfully.
    Completed,
    /// The node failed, was cancelled, or was blocked itself; any node
    /// depending on it must be blocked rather than readied.
    Terminated,
}

/// Computes the static total order for sequential execution via Kahn's
/// algorithm, breaking ties on declaration index for determinism.
#[must_use]
pub fn static_order(dag: &Dag) -> Vec<AgentId> {
    let mut in_degree: IndexMap<AgentId, usize> = dag
        .nodes()
        .map(|n| (n.id.clone(), n.dependencies.len()))
        .collect();

    let mut frontier: BTreeMap<usize, AgentId> = BTreeMap::new();
    for node in dag.nodes() {
        if node.dependencies.is_empty() {
            frontier.insert(node.declaration_index, node.id.clone());
        }
    }

    let declaration_index: IndexMap<AgentId, usize> = dag
        .nodes()
        .map(|n| (n.id.clone(), n.declaration_index))
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some((_, id)) = frontier.pop_first() {
        order.push(id.clone());
        if let Some(dependents) = dag.dependents_of(&id) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        let index = declaration_index[dependent];
                        frontier.insert(index, dependent.clone());
                    }
                }
            }
        }
    }

    order
}

/// Dynamic scheduling state for a single run, driving parallel (and
/// sequential) dispatch via a ready-set rather than a precomputed order.
#[derive(Debug)]
pub struct Scheduler<'a> {
    dag: &'a Dag,
    remaining_dependencies: IndexMap<AgentId, IndexSet<AgentId>>,
    ready: BTreeMap<usize, AgentId>,
    done: IndexSet<AgentId>,
    blocked: IndexSet<AgentId>,
}

impl<'a> Scheduler<'a> {
    /// Build a scheduler over `dag`, seeding the ready-set with the
    /// source nodes.
    #[must_use]
    pub fn new(dag: &'a Dag) -> Self {
        let remaining_dependencies: IndexMap<AgentId, IndexSet<AgentId>> = dag
            .nodes()
            .map(|n| (n.id.clone(), n.dependencies.clone()))
            .collect();

        let mut ready = BTreeMap::new();
        for node in dag.nodes() {
            if node.dependencies.is_empty() {
                ready.insert(node.declaration_index, node.id.clone());
            }
        }

        Self {
            dag,
            remaining_dependencies,
            ready,
            done: IndexSet::new(),
            blocked: IndexSet::new(),
        }
    }

    /// True once every node has either completed, been terminated, or
    /// been blocked — nothing left to dispatch and nothing in flight.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ready.is_empty() && self.done.len() + self.blocked.len() == self.remaining_dependencies.len()
    }

    /// Remove and return the next ready node in declaration order, if
    /// any. The scheduler immediately forgets this node is pending so it
    /// cannot be dispatched twice.
    pub fn pop_ready(&mut self) -> Option<AgentId> {
        self.ready.pop_first().map(|(_, id)| id)
    }

    /// Every node currently ready to dispatch, in declaration order.
    pub fn ready_ids(&self) -> impl Iterator<Item = &AgentId> {
        self.ready.values()
    }

    /// Record that `id` finished with `outcome`, readying or blocking its
    /// dependents accordingly.
    pub fn mark_done(&mut self, id: &AgentId, outcome: NodeOutcome) {
        match outcome {
            NodeOutcome::Completed => {
                self.done.insert(id.clone());
            }
            NodeOutcome::Terminated => {
                self.block(id);
                return;
            }
        }

        let Some(dependents) = self.dag.dependents_of(id).cloned() else {
            return;
        };
        for dependent in dependents {
            if let Some(deps) = self.remaining_dependencies.get_mut(&dependent) {
                deps.shift_remove(id);
                if deps.is_empty() && !self.blocked.contains(&dependent) {
                    if let Some(node) = self.dag.node(&dependent) {
                        self.ready.insert(node.declaration_index, dependent.clone());
                    }
                }
            }
        }
    }

    /// Mark `id` and everything transitively depending on it as blocked,
    /// removing them from the ready-set if present.
    pub fn block(&mut self, id: &AgentId) {
        if self.blocked.contains(id) {
            return;
        }
        self.blocked.insert(id.clone());
        self.ready.retain(|_, queued| queued != id);
        if let Some(dependents) = self.dag.dependents_of(id).cloned() {
            for dependent in dependents {
                self.block(&dependent);
            }
        }
    }

    /// Ids blocked so far, in the order they were blocked.
    #[must_use]
    pub fn blocked_ids(&self) -> &IndexSet<AgentId> {
        &self.blocked
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use sentinel_plan::{AgentSpec, StackSpec};

    fn linear_chain(n: usize) -> Dag {
        let agents = (0..n)
            .map(|i| AgentSpec {
                id: AgentId::new(format!("n{i}")),
                uses: "echo".to_string(),
                with: None,
                input_from: if i == 0 { vec![] } else { vec![AgentId::new(format!("n{}", i - 1))] },
                depends: vec![],
            })
            .collect();
        let spec = StackSpec {
            name: "chain".to_string(),
            description: String::new(),
            version: "1".to_string(),
            stack_type: "dag".to_string(),
            agents,
        };
        Dag::build(&spec).unwrap()
    }

    proptest! {
        // P3: terminating the source of a linear chain blocks every one of
        // its transitive dependents, regardless of chain length.
        #[test]
        fn terminating_the_source_blocks_the_whole_chain(len in 2usize..16) {
            let dag = linear_chain(len);
            let mut sched = Scheduler::new(&dag);
            let source = sched.pop_ready().unwrap();
            sched.mark_done(&source, NodeOutcome::Terminated);

            for i in 1..len {
                prop_assert!(sched.blocked_ids().contains(&AgentId::new(format!("n{i}"))));
            }
            prop_assert!(sched.pop_ready().is_none());
        }
    }
}
