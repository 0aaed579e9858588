//! Workflow dependency graph.
//!
//! This module turns the declarative phase list of a template into a
//! validated directed acyclic graph. The graph is built once per run and is
//! read-only afterwards; everything downstream (block planning, scheduling,
//! artifact resolution) consumes it through indices.

mod builder;

pub use builder::{GraphBuilder, PhaseIndex, WorkflowGraph};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::PhaseSpec;

    fn chain() -> Vec<PhaseSpec> {
        vec![
            PhaseSpec::new("plan", "planner", vec![]).with_outputs(vec!["plan.md".into()]),
            PhaseSpec::new("design", "designer", vec!["plan".into()])
                .with_requires(vec!["plan.md".into()])
                .with_outputs(vec!["design.md".into()]),
            PhaseSpec::new("build", "builder", vec!["design".into()])
                .with_requires(vec!["design.md".into()])
                .with_outputs(vec!["app.py".into()]),
        ]
    }

    #[test]
    fn linear_chain_builds_and_orders() {
        let graph = WorkflowGraph::build(chain()).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.topological_order(), &[0, 1, 2]);
        assert_eq!(graph.producer_of("design.md"), Some(1));
    }

    #[test]
    fn dependents_walk_forward() {
        let graph = WorkflowGraph::build(chain()).unwrap();
        assert_eq!(graph.dependents_of(0), &[1]);
        assert_eq!(graph.dependents_of(2), &[] as &[usize]);
    }
}
