use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability classification of an agent at a step (developer, scout,
/// reviewer, …). Capabilities drive the generated `# Rules` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoleConfig {
    #[serde(default)]
    pub can_write_code: bool,
    /// Read-only scouts must not modify the working copy.
    #[serde(default)]
    pub read_only: bool,
    /// Skills merged into prompts for this role.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Extra rule lines appended to the generated `# Rules` section.
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}
