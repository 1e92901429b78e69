use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named agent configuration: which backend to run, with which model
/// and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "d_backend")]
    pub backend: String,
    /// Model passed through the backend's `model_args` template.
    #[serde(default)]
    pub model: Option<String>,
    /// Extra CLI arguments appended after the backend's templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overlay for agent processes using this profile.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Default turn cap when a step does not set one. 0 = unbounded.
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Skills merged into every prompt built for this profile.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Short human description, shown in `# Delegation` sections.
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            backend: d_backend(),
            model: None,
            args: Vec::new(),
            env: HashMap::new(),
            max_turns: None,
            skills: Vec::new(),
            description: None,
        }
    }
}

fn d_backend() -> String {
    "claude".into()
}
