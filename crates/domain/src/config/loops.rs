use serde::{Deserialize, Serialize};

use crate::types::Position;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An ordered list of steps walked for up to `max_cycles` cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Number of full passes over the steps. 0 = unbounded (until a
    /// stop or wind-down signal).
    #[serde(default = "d_max_cycles")]
    pub max_cycles: u32,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl LoopConfig {
    /// Whether any step runs in the supervisor position. Managers only
    /// learn `adaf loop call-supervisor` when this holds.
    pub fn has_supervisor(&self) -> bool {
        self.steps.iter().any(|s| s.position == Position::Supervisor)
    }
}

fn d_max_cycles() -> u32 {
    1
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Steps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry in a loop definition, bound to a profile and position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub profile: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub role: Option<String>,
    /// Turn cap for this step. 0 = unbounded.
    #[serde(default = "d_turns")]
    pub turns: u32,
    #[serde(default)]
    pub skills: Vec<String>,
    /// When set and the merged skill list is empty, the `# Skills`
    /// section is omitted instead of defaulted.
    #[serde(default)]
    pub skills_explicit: bool,
    #[serde(default)]
    pub instructions: String,
    /// Verbatim prompt override; suppresses all generated sections.
    #[serde(default)]
    pub manual_prompt: Option<String>,
    /// Run against the loop run's chat-instance session instead of the
    /// per-role resume chain.
    #[serde(default)]
    pub standalone_chat: bool,
    /// Whether the step may post supervisor notes.
    #[serde(default = "d_true")]
    pub can_message: bool,
    #[serde(default)]
    pub delegation: DelegationConfig,
}

fn d_turns() -> u32 {
    1
}

fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delegation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Child profiles a step may spawn, plus per-delegation defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DelegationConfig {
    #[serde(default)]
    pub profiles: Vec<DelegationProfile>,
    /// Default per-spawn timeout when a profile entry sets none.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

impl DelegationConfig {
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Find the delegation entry for a profile, if listed.
    pub fn entry(&self, profile: &str) -> Option<&DelegationProfile> {
        self.profiles.iter().find(|p| p.profile == profile)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationProfile {
    pub profile: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    /// Handoff spawns run in the background and are never waited on
    /// synchronously.
    #[serde(default)]
    pub handoff: bool,
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}
