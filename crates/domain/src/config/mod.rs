mod backends;
mod loops;
mod profiles;
mod project;
mod roles;
mod rules;
mod spawns;

pub use backends::*;
pub use loops::*;
pub use profiles::*;
pub use project::*;
pub use roles::*;
pub use rules::*;
pub use spawns::*;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    /// Agent CLI backends (key = backend id, e.g. "claude").
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
    /// Named agent profiles (key = profile name).
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
    /// Role definitions (key = role name).
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
    /// Loop definitions (key = loop name).
    #[serde(default)]
    pub loops: HashMap<String, LoopConfig>,
    #[serde(default)]
    pub spawns: SpawnsConfig,
    /// Prompt rules catalog, appended to generated `# Rules` sections.
    #[serde(default)]
    pub prompt_rules: Vec<PromptRule>,
}

impl Config {
    /// Look up a backend, falling back to the built-in `claude`/`codex`
    /// definitions when the config does not override them.
    pub fn backend(&self, name: &str) -> Option<BackendConfig> {
        self.backends
            .get(name)
            .cloned()
            .or_else(|| BackendConfig::builtin(name))
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.get(name)
    }

    /// Look up a role by name.
    pub fn role(&self, name: &str) -> Option<&RoleConfig> {
        self.roles.get(name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate cross-references between sections. Errors are fatal for
    /// `adaf loop run`; warnings are logged and ignored.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let err = |field: &str, message: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            field: field.to_string(),
            message,
        };
        let warn = |field: &str, message: String| ConfigIssue {
            severity: ConfigSeverity::Warning,
            field: field.to_string(),
            message,
        };

        for (name, profile) in &self.profiles {
            if self.backend(&profile.backend).is_none() {
                issues.push(err(
                    &format!("profiles.{name}.backend"),
                    format!("unknown backend '{}'", profile.backend),
                ));
            }
        }

        for (loop_name, loop_cfg) in &self.loops {
            if loop_cfg.steps.is_empty() {
                issues.push(warn(
                    &format!("loops.{loop_name}"),
                    "loop has no steps".into(),
                ));
            }
            for (idx, step) in loop_cfg.steps.iter().enumerate() {
                let field = format!("loops.{loop_name}.steps[{idx}]");
                if !self.profiles.contains_key(&step.profile) {
                    issues.push(err(
                        &field,
                        format!("unknown profile '{}'", step.profile),
                    ));
                }
                if let Some(role) = &step.role {
                    if !self.roles.contains_key(role) {
                        issues.push(err(&field, format!("unknown role '{role}'")));
                    }
                }
                for dp in &step.delegation.profiles {
                    if !self.profiles.contains_key(&dp.profile) {
                        issues.push(err(
                            &format!("{field}.delegation"),
                            format!("unknown spawn profile '{}'", dp.profile),
                        ));
                    }
                    if let Some(role) = &dp.role {
                        if !self.roles.contains_key(role) {
                            issues.push(err(
                                &format!("{field}.delegation"),
                                format!("unknown spawn role '{role}'"),
                            ));
                        }
                    }
                }
            }
        }

        issues
    }
}
