//! Workflow template definitions and YAML loading.
//!
//! A template declares the phases of a workflow: which agent runs each phase,
//! which phases it depends on, which named artifacts it produces and which it
//! requires as input. Templates are plain YAML files discovered in a
//! templates directory.

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Specification of a single phase as declared in a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseSpec {
    /// Phase identifier, unique within one workflow (e.g. "plan", "build")
    pub id: String,
    /// Identifier of the agent assigned to this phase
    pub agent: String,
    /// Ids of phases that must succeed before this one may start
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Artifact names this phase declares it will produce
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Artifact names this phase requires as input
    #[serde(default)]
    pub requires: Vec<String>,
    /// Free-form instruction payload forwarded to the executor, never
    /// interpreted by the core
    #[serde(default)]
    pub instruction: String,
}

impl PhaseSpec {
    pub fn new(id: &str, agent: &str, dependencies: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            agent: agent.to_string(),
            dependencies,
            outputs: Vec::new(),
            requires: Vec::new(),
            instruction: String::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_requires(mut self, requires: Vec<String>) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = instruction.to_string();
        self
    }
}

/// The `workflow:` section of a template file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowSection {
    pub phases: Vec<PhaseSpec>,
}

/// A full workflow template as loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Agent ids this template expects definitions for
    #[serde(default)]
    pub agents: Vec<String>,
    pub workflow: WorkflowSection,
}

impl WorkflowTemplate {
    /// Load a template from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template file {}", path.display()))?;
        let template: WorkflowTemplate = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse template file {}", path.display()))?;
        Ok(template)
    }

    /// Agent ids referenced by any phase, deduplicated in first-use order.
    pub fn referenced_agents(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for phase in &self.workflow.phases {
            if !seen.contains(&phase.agent.as_str()) {
                seen.push(phase.agent.as_str());
            }
        }
        seen
    }
}

/// Discovers and loads workflow templates from a directory.
pub struct TemplateLoader {
    templates_dir: PathBuf,
}

impl TemplateLoader {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
        }
    }

    /// List template names (file stems of `*.yaml` / `*.yml`), sorted.
    pub fn discover(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for pattern in ["*.yaml", "*.yml"] {
            let full = self
                .templates_dir
                .join(pattern)
                .to_string_lossy()
                .to_string();
            for entry in glob(&full).context("Failed to read template glob pattern")? {
                let path = entry?;
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Load a template by name.
    pub fn load(&self, name: &str) -> Result<WorkflowTemplate> {
        for ext in ["yaml", "yml"] {
            let path = self.templates_dir.join(format!("{name}.{ext}"));
            if path.exists() {
                return WorkflowTemplate::load(&path);
            }
        }
        anyhow::bail!(
            "Template '{}' not found in {}",
            name,
            self.templates_dir.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
name: sample
description: three step chain
agents: [planner, builder]
workflow:
  phases:
    - id: plan
      agent: planner
      outputs: [plan.md]
      instruction: "Write the plan"
    - id: build
      agent: builder
      dependencies: [plan]
      requires: [plan.md]
      outputs: [app.py]
"#;

    #[test]
    fn parses_template_yaml() {
        let template: WorkflowTemplate = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(template.name, "sample");
        let ids: Vec<&str> = template.workflow.phases.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["plan", "build"]);
        assert_eq!(template.workflow.phases[1].dependencies, vec!["plan"]);
        assert_eq!(template.workflow.phases[1].requires, vec!["plan.md"]);
    }

    #[test]
    fn referenced_agents_deduplicates() {
        let template: WorkflowTemplate = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(template.referenced_agents(), vec!["planner", "builder"]);
    }

    #[test]
    fn missing_phase_id_is_a_parse_error() {
        let bad = "name: x\nworkflow:\n  phases:\n    - agent: a\n";
        assert!(serde_yaml::from_str::<WorkflowTemplate>(bad).is_err());
    }

    #[test]
    fn discover_and_load_from_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sample.yaml"), SAMPLE).unwrap();
        fs::write(dir.path().join("other.yml"), SAMPLE).unwrap();

        let loader = TemplateLoader::new(dir.path());
        let names = loader.discover().unwrap();
        assert_eq!(names, vec!["other", "sample"]);

        let template = loader.load("sample").unwrap();
        assert_eq!(template.workflow.phases.len(), 2);
    }

    #[test]
    fn load_unknown_template_errors() {
        let dir = tempdir().unwrap();
        let loader = TemplateLoader::new(dir.path());
        let err = loader.load("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
