//! Agent definition loading.
//!
//! Each agent a workflow can assign work to is described by a YAML file in an
//! agents directory: its role id, display name, expertise and the standing
//! instructions prepended to every prompt it receives. The orchestration core
//! only keys executors by role id; definitions are prompt material.

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::template::WorkflowTemplate;

/// A single agent persona definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    /// Role id, matched against `PhaseSpec::agent`
    pub role: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expertise: Vec<String>,
    /// Standing instructions for this agent
    #[serde(default)]
    pub instructions: String,
}

impl AgentDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read agent file {}", path.display()))?;
        let def: AgentDefinition = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse agent file {}", path.display()))?;
        Ok(def)
    }

    /// Short expertise line for listings.
    pub fn expertise_summary(&self) -> String {
        let head: Vec<&str> = self.expertise.iter().take(3).map(String::as_str).collect();
        let suffix = if self.expertise.len() > 3 { "..." } else { "" };
        format!("{}{}", head.join(", "), suffix)
    }
}

/// All agent definitions discovered in one directory.
#[derive(Debug, Default)]
pub struct AgentLibrary {
    definitions: HashMap<String, AgentDefinition>,
}

impl AgentLibrary {
    /// Load every `*.yaml` / `*.yml` file in the agents directory.
    ///
    /// A missing directory yields an empty library; individual unparseable
    /// files are hard errors so a typo never silently drops an agent.
    pub fn load_dir(agents_dir: impl Into<PathBuf>) -> Result<Self> {
        let agents_dir: PathBuf = agents_dir.into();
        let mut definitions = HashMap::new();

        if !agents_dir.exists() {
            return Ok(Self { definitions });
        }

        for pattern in ["*.yaml", "*.yml"] {
            let full = agents_dir.join(pattern).to_string_lossy().to_string();
            for entry in glob(&full).context("Failed to read agent glob pattern")? {
                let path = entry?;
                let def = AgentDefinition::load(&path)?;
                definitions.insert(def.role.clone(), def);
            }
        }

        Ok(Self { definitions })
    }

    pub fn get(&self, role: &str) -> Option<&AgentDefinition> {
        self.definitions.get(role)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Roles in sorted order, for listings.
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        roles.sort();
        roles
    }

    /// Agent ids a template references that this library has no definition for.
    pub fn missing_for(&self, template: &WorkflowTemplate) -> Vec<String> {
        template
            .referenced_agents()
            .into_iter()
            .filter(|role| !self.definitions.contains_key(*role))
            .map(String::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_agent(dir: &Path, role: &str) {
        let yaml = format!(
            "role: {role}\ndisplay_name: {role} agent\nexpertise: [a, b, c, d]\ninstructions: do the work\n"
        );
        fs::write(dir.join(format!("{role}.yaml")), yaml).unwrap();
    }

    #[test]
    fn loads_all_definitions_in_directory() {
        let dir = tempdir().unwrap();
        write_agent(dir.path(), "planner");
        write_agent(dir.path(), "builder");

        let library = AgentLibrary::load_dir(dir.path()).unwrap();
        assert_eq!(library.len(), 2);
        assert_eq!(library.roles(), vec!["builder", "planner"]);
        assert_eq!(
            library.get("planner").unwrap().instructions,
            "do the work"
        );
    }

    #[test]
    fn missing_directory_yields_empty_library() {
        let dir = tempdir().unwrap();
        let library = AgentLibrary::load_dir(dir.path().join("nope")).unwrap();
        assert!(library.is_empty());
    }

    #[test]
    fn expertise_summary_truncates() {
        let def = AgentDefinition {
            role: "x".into(),
            display_name: String::new(),
            description: String::new(),
            expertise: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            instructions: String::new(),
        };
        assert_eq!(def.expertise_summary(), "a, b, c...");
    }

    #[test]
    fn missing_for_reports_undefined_agents() {
        let dir = tempdir().unwrap();
        write_agent(dir.path(), "planner");
        let library = AgentLibrary::load_dir(dir.path()).unwrap();

        let template: WorkflowTemplate = serde_yaml::from_str(
            "name: t\nworkflow:\n  phases:\n    - id: p\n      agent: planner\n    - id: q\n      agent: reviewer\n      dependencies: [p]\n",
        )
        .unwrap();

        assert_eq!(library.missing_for(&template), vec!["reviewer".to_string()]);
    }
}
