//! Artifact store: named outputs produced by phases, consumed downstream.
//!
//! Values are opaque JSON payloads; the store never interprets them. One
//! producer per artifact name is enforced at graph validation time, so the
//! store only has to guard against double-recording within a run and against
//! lookups of artifacts a failed dependency never produced.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::errors::ArtifactError;
use crate::graph::WorkflowGraph;

/// A recorded (producer phase, artifact name) pair.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub phase: String,
    pub name: String,
}

/// Tracks which phase produced which named output during one run.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    /// phase id -> artifact name -> value
    records: HashMap<String, BTreeMap<String, Value>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an artifact. Recording the same `(phase, name)` twice is an
    /// error; each phase succeeds at most once per attempt.
    pub fn record(&mut self, phase: &str, name: &str, value: Value) -> Result<(), ArtifactError> {
        let phase_records = self.records.entry(phase.to_string()).or_default();
        if phase_records.contains_key(name) {
            return Err(ArtifactError::DuplicateRecord {
                phase: phase.to_string(),
                artifact: name.to_string(),
            });
        }
        phase_records.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, phase: &str, name: &str) -> Option<&Value> {
        self.records.get(phase).and_then(|r| r.get(name))
    }

    /// Drop everything a phase recorded. Used when a block is reset for
    /// retry, so re-execution can record fresh outputs.
    pub fn clear_phase(&mut self, phase: &str) {
        self.records.remove(phase);
    }

    /// Assemble the input mapping for a phase: each required artifact name
    /// resolved to the value its producer recorded.
    ///
    /// Producers are known from validation, but the lookup is re-checked here
    /// since a producer may have failed and recorded nothing. The scheduler
    /// never marks such a consumer ready, so a miss indicates a logic error
    /// upstream and is surfaced, not swallowed.
    pub fn resolve_inputs(
        &self,
        graph: &WorkflowGraph,
        phase_index: usize,
    ) -> Result<BTreeMap<String, Value>, ArtifactError> {
        let spec = graph.spec(phase_index);
        let mut inputs = BTreeMap::new();
        for required in &spec.requires {
            // Producer existence is guaranteed by graph validation.
            let producer = graph
                .producer_of(required)
                .map(|idx| graph.id_of(idx).to_string())
                .ok_or_else(|| ArtifactError::Missing {
                    phase: spec.id.clone(),
                    artifact: required.clone(),
                })?;
            let value = self
                .get(&producer, required)
                .cloned()
                .ok_or(ArtifactError::Missing {
                    phase: producer.clone(),
                    artifact: required.clone(),
                })?;
            inputs.insert(required.clone(), value);
        }
        Ok(inputs)
    }

    /// Every recorded artifact reference, sorted for stable output.
    pub fn all_refs(&self) -> Vec<ArtifactRef> {
        let mut refs: Vec<ArtifactRef> = self
            .records
            .iter()
            .flat_map(|(phase, artifacts)| {
                artifacts.keys().map(|name| ArtifactRef {
                    phase: phase.clone(),
                    name: name.clone(),
                })
            })
            .collect();
        refs.sort_by(|a, b| (&a.phase, &a.name).cmp(&(&b.phase, &b.name)));
        refs
    }

    pub fn count(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }
}
