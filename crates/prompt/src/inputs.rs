//! View types consumed by the prompt builders. The orchestrator maps
//! config and store records into these; the builders never touch the
//! store.

use chrono::{DateTime, Utc};

use adaf_domain::config::PromptRule;
use adaf_domain::{Position, ResourcePriority};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Facts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ProjectFacts {
    pub name: String,
    pub plan_id: String,
}

#[derive(Debug, Clone)]
pub struct LoopFacts {
    pub name: String,
    pub cycle: u32,
    /// Zero-based step index.
    pub step_index: usize,
    pub total_steps: usize,
    pub resource_priority: ResourcePriority,
}

#[derive(Debug, Clone, Default)]
pub struct StepFacts {
    pub position: Position,
    pub role: Option<String>,
    pub can_write_code: bool,
    pub read_only: bool,
    /// Extra rule lines from the role definition.
    pub role_rules: Vec<String>,
    pub step_skills: Vec<String>,
    pub role_skills: Vec<String>,
    pub profile_skills: Vec<String>,
    pub skills_explicit: bool,
    pub instructions: String,
    /// Verbatim override; suppresses all generated sections.
    pub manual_prompt: Option<String>,
    pub can_message: bool,
    pub standalone_chat: bool,
}

/// One child profile available for delegation.
#[derive(Debug, Clone)]
pub struct DelegationChild {
    pub profile: String,
    pub role: Option<String>,
    pub description: Option<String>,
    pub read_only: bool,
    pub handoff: bool,
}

/// A supervisor message newly visible above the step watermark.
#[derive(Debug, Clone)]
pub struct MessageFacts {
    pub at: DateTime<Utc>,
    pub author: String,
    pub content: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step prompt input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct StepPromptInput<'a> {
    pub project: &'a ProjectFacts,
    /// Present for steps running under a loop; absent for standalone
    /// child spawns.
    pub loop_info: Option<&'a LoopFacts>,
    pub step: &'a StepFacts,
    /// The active prompt-rules catalog; the builder filters it by the
    /// step's position and role.
    pub catalog: &'a [PromptRule],
    pub delegation: &'a [DelegationChild],
    /// Managers only learn `adaf loop call-supervisor` when true.
    pub loop_has_supervisor: bool,
    /// 0 for a top-level loop step; positive for sub-agent prompts.
    pub parent_turn_id: i64,
    pub messages: &'a [MessageFacts],
    /// Sub-agents only: the task text.
    pub task: Option<&'a str>,
    /// Sub-agents only: read-only scout note.
    pub read_only: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resume prompt input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Health numbers for a review checkpoint on a still-running spawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewStats {
    pub elapsed_secs: u64,
    pub compactions: u32,
    pub reads: u32,
    pub writes: u32,
    pub commits: u32,
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub output_tokens: u64,
}

/// One spawn's entry in a wait-result (or review checkpoint) prompt.
#[derive(Debug, Clone, Default)]
pub struct SpawnReport {
    pub id: i64,
    pub profile: String,
    /// Wire status string (`completed`, `failed`, `running`, …).
    pub status: String,
    pub exit_code: Option<i32>,
    pub read_only: bool,
    pub branch: String,
    pub summary: String,
    pub result: String,
    /// Set for review checkpoints; such entries do not consume the
    /// spawn from the unseen set.
    pub review: Option<ReviewStats>,
}

#[derive(Debug, Clone, Default)]
pub struct ResumePromptInput<'a> {
    /// Omitted when already on a wait-resume of the same turn.
    pub include_continue_lead: bool,
    pub interrupt: Option<&'a str>,
    pub wait_results: &'a [SpawnReport],
    pub more_pending: bool,
    /// Supervisor messages gathered while the turn was waiting.
    pub messages: &'a [MessageFacts],
}
