use serde::{Deserialize, Serialize};

use crate::types::Position;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt rules catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A catalog rule appended to generated `# Rules` sections for matching
/// steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRule {
    pub text: String,
    /// Positions this rule applies to. Empty = all positions.
    #[serde(default)]
    pub positions: Vec<Position>,
    /// Roles this rule applies to. Empty = all roles.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl PromptRule {
    pub fn applies_to(&self, position: Position, role: Option<&str>) -> bool {
        if !self.positions.is_empty() && !self.positions.contains(&position) {
            return false;
        }
        if !self.roles.is_empty() {
            match role {
                Some(r) => self.roles.iter().any(|x| x == r),
                None => false,
            }
        } else {
            true
        }
    }
}
