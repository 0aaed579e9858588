//! Block planning: partition the workflow graph into sequential retry units.
//!
//! A block is a maximal run of phases, taken in topological order, whose
//! dependencies are all satisfied by strictly earlier blocks. Phases inside a
//! block are mutually independent and may run concurrently; a dependency edge
//! inside the candidate block forces a cut instead of an error. Blocks are
//! computed once per run from the immutable graph and never change.

use std::collections::HashSet;

use crate::graph::{PhaseIndex, WorkflowGraph};

/// One retry unit: an ordered list of mutually-independent phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the block sequence, used as the block id in errors/events
    pub index: usize,
    /// Member phases in topological order
    pub phases: Vec<PhaseIndex>,
}

impl Block {
    pub fn contains(&self, phase: PhaseIndex) -> bool {
        self.phases.contains(&phase)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// The full, immutable block sequence for one run.
#[derive(Debug, Clone, Default)]
pub struct BlockPlan {
    blocks: Vec<Block>,
}

impl BlockPlan {
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Human-readable plan, one line per block, for verbose output.
    pub fn describe(&self, graph: &WorkflowGraph) -> Vec<String> {
        self.blocks
            .iter()
            .map(|block| {
                let ids: Vec<&str> = block.phases.iter().map(|&i| graph.id_of(i)).collect();
                format!("block {}: [{}]", block.index, ids.join(", "))
            })
            .collect()
    }
}

/// Computes the block plan from a validated graph.
pub struct BlockPlanner;

impl BlockPlanner {
    /// Walk the topological order, growing the current block until the next
    /// phase depends on something inside it, then cut.
    pub fn plan(graph: &WorkflowGraph) -> BlockPlan {
        let mut blocks = Vec::new();
        let mut current: Vec<PhaseIndex> = Vec::new();
        let mut current_set: HashSet<PhaseIndex> = HashSet::new();

        for &phase in graph.topological_order() {
            let depends_on_current = graph
                .dependencies_of(phase)
                .iter()
                .any(|dep| current_set.contains(dep));

            if depends_on_current {
                blocks.push(Block {
                    index: blocks.len(),
                    phases: std::mem::take(&mut current),
                });
                current_set.clear();
            }

            current.push(phase);
            current_set.insert(phase);
        }

        if !current.is_empty() {
            blocks.push(Block {
                index: blocks.len(),
                phases: current,
            });
        }

        BlockPlan { blocks }
    }
}
