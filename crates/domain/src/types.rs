//! Small shared enums: the structural position of a step in a loop and
//! the resource priority that steers spawn-profile routing.

use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Position
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structural role of an agent within a loop step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Manager,
    Lead,
    Supervisor,
    #[default]
    Worker,
}

impl Position {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Lead => "lead",
            Self::Supervisor => "supervisor",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resource priority
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Routing guidance injected into prompts: which spawn profiles a step
/// should prefer when delegating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePriority {
    #[default]
    Balanced,
    Cost,
    Speed,
    Quality,
}

impl ResourcePriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Cost => "cost",
            Self::Speed => "speed",
            Self::Quality => "quality",
        }
    }
}

impl fmt::Display for ResourcePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_serde_snake_case() {
        assert_eq!(serde_json::to_string(&Position::Manager).unwrap(), "\"manager\"");
        let p: Position = serde_json::from_str("\"supervisor\"").unwrap();
        assert_eq!(p, Position::Supervisor);
    }

    #[test]
    fn position_default_is_worker() {
        assert_eq!(Position::default(), Position::Worker);
    }

    #[test]
    fn priority_display() {
        assert_eq!(ResourcePriority::Cost.to_string(), "cost");
        assert_eq!(ResourcePriority::default(), ResourcePriority::Balanced);
    }
}
