//! Workflow graph construction and validation.
//!
//! The builder takes the phase specifications of one template and constructs
//! an immutable directed acyclic graph. All validation happens here, before
//! any phase executes: duplicate ids, unknown dependencies, cycles, artifact
//! producer coverage.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::errors::ValidationError;
use crate::template::PhaseSpec;

/// Index into the phase list.
pub type PhaseIndex = usize;

/// An immutable dependency graph over the phases of one workflow.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// Phase specifications in declaration order
    specs: Vec<PhaseSpec>,
    /// Map from phase id to index
    index_map: HashMap<String, PhaseIndex>,
    /// Forward edges: index -> phases that depend on it
    forward_edges: Vec<Vec<PhaseIndex>>,
    /// Reverse edges: index -> phases it depends on
    reverse_edges: Vec<Vec<PhaseIndex>>,
    /// Cached topological order, declaration order as tie-break
    topo_order: Vec<PhaseIndex>,
    /// Artifact name -> index of the single phase that produces it
    producers: HashMap<String, PhaseIndex>,
}

impl WorkflowGraph {
    /// Build and validate a graph from phase specifications.
    pub fn build(specs: Vec<PhaseSpec>) -> Result<Self, ValidationError> {
        GraphBuilder::new(specs).build()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn spec(&self, index: PhaseIndex) -> &PhaseSpec {
        &self.specs[index]
    }

    pub fn specs(&self) -> &[PhaseSpec] {
        &self.specs
    }

    pub fn index_of(&self, id: &str) -> Option<PhaseIndex> {
        self.index_map.get(id).copied()
    }

    pub fn id_of(&self, index: PhaseIndex) -> &str {
        &self.specs[index].id
    }

    /// Phases that depend on the given phase.
    pub fn dependents_of(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Phases the given phase depends on.
    pub fn dependencies_of(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// A linearization consistent with the dependency partial order.
    ///
    /// Deterministic: among simultaneously-ready phases, declaration order in
    /// the template wins.
    pub fn topological_order(&self) -> &[PhaseIndex] {
        &self.topo_order
    }

    /// The phase that declares the given artifact as an output.
    pub fn producer_of(&self, artifact: &str) -> Option<PhaseIndex> {
        self.producers.get(artifact).copied()
    }

    /// Check if all dependencies of a phase are in the given completed set.
    pub fn dependencies_satisfied(
        &self,
        index: PhaseIndex,
        completed: &HashSet<PhaseIndex>,
    ) -> bool {
        self.dependencies_of(index)
            .iter()
            .all(|dep| completed.contains(dep))
    }

    /// All ancestors of a phase, transitively via dependency edges.
    fn ancestors_of(&self, index: PhaseIndex) -> HashSet<PhaseIndex> {
        let mut seen = HashSet::new();
        let mut stack: Vec<PhaseIndex> = self.dependencies_of(index).to_vec();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend_from_slice(self.dependencies_of(node));
            }
        }
        seen
    }
}

/// Builder running the validation pipeline.
pub struct GraphBuilder {
    specs: Vec<PhaseSpec>,
}

impl GraphBuilder {
    pub fn new(specs: Vec<PhaseSpec>) -> Self {
        Self { specs }
    }

    /// Validation order: duplicate ids, unknown dependencies, cycles,
    /// artifact producers.
    pub fn build(self) -> Result<WorkflowGraph, ValidationError> {
        let mut index_map = HashMap::new();
        for (i, spec) in self.specs.iter().enumerate() {
            if index_map.insert(spec.id.clone(), i).is_some() {
                return Err(ValidationError::DuplicatePhase {
                    phase: spec.id.clone(),
                });
            }
        }

        let mut forward_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.specs.len()];
        let mut reverse_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.specs.len()];

        for (to_idx, spec) in self.specs.iter().enumerate() {
            for dep in &spec.dependencies {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| ValidationError::UnknownDependency {
                            phase: spec.id.clone(),
                            dependency: dep.clone(),
                        })?;
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let topo_order =
            Self::topological_sort(&self.specs, &forward_edges, &reverse_edges)?;

        let mut producers: HashMap<String, PhaseIndex> = HashMap::new();
        for (idx, spec) in self.specs.iter().enumerate() {
            for output in &spec.outputs {
                if let Some(&first) = producers.get(output) {
                    return Err(ValidationError::DuplicateArtifact {
                        artifact: output.clone(),
                        first: self.specs[first].id.clone(),
                        second: spec.id.clone(),
                    });
                }
                producers.insert(output.clone(), idx);
            }
        }

        let graph = WorkflowGraph {
            specs: self.specs,
            index_map,
            forward_edges,
            reverse_edges,
            topo_order,
            producers,
        };

        // Every required input must be produced by a transitive ancestor.
        for index in 0..graph.len() {
            let ancestors = graph.ancestors_of(index);
            for required in &graph.specs[index].requires {
                match graph.producer_of(required) {
                    Some(producer) if ancestors.contains(&producer) => {}
                    _ => {
                        return Err(ValidationError::MissingProducer {
                            phase: graph.specs[index].id.clone(),
                            artifact: required.clone(),
                        });
                    }
                }
            }
        }

        Ok(graph)
    }

    /// Kahn's algorithm with a min-heap keyed on declaration index, so the
    /// order is stable across runs. Leftover nodes mean a cycle.
    fn topological_sort(
        specs: &[PhaseSpec],
        forward_edges: &[Vec<PhaseIndex>],
        reverse_edges: &[Vec<PhaseIndex>],
    ) -> Result<Vec<PhaseIndex>, ValidationError> {
        let mut in_degree: Vec<usize> = reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut ready: BinaryHeap<Reverse<PhaseIndex>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(specs.len());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &forward_edges[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != specs.len() {
            let cycle_phases: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| specs[i].id.clone())
                .collect();
            return Err(ValidationError::CycleDetected {
                phases: cycle_phases,
            });
        }

        Ok(order)
    }
}
