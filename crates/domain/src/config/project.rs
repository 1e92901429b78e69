use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ResourcePriority;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The project a loop operates on: identity, working directory, and
/// where adaf keeps its state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "d_name")]
    pub name: String,
    /// Opaque plan identifier, surfaced to agents via `ADAF_PLAN_ID`.
    #[serde(default)]
    pub plan_id: String,
    /// The project working copy the agents operate in.
    #[serde(default = "d_dir")]
    pub dir: PathBuf,
    /// Root for the store, per-turn records, and spawn worktrees.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub resource_priority: ResourcePriority,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: d_name(),
            plan_id: String::new(),
            dir: d_dir(),
            state_path: d_state_path(),
            resource_priority: ResourcePriority::default(),
        }
    }
}

fn d_name() -> String {
    "project".into()
}

fn d_dir() -> PathBuf {
    PathBuf::from(".")
}

fn d_state_path() -> PathBuf {
    PathBuf::from(".adaf")
}
