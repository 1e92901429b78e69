//! Deterministic prompt builders.
//!
//! Pure functions: identical inputs produce byte-identical output. No
//! clock reads, no I/O, no global state — the orchestrator gathers all
//! facts up front and the builders only assemble text.

mod inputs;
mod resume;
mod step;

pub use inputs::{
    DelegationChild, LoopFacts, MessageFacts, ProjectFacts, ResumePromptInput, ReviewStats,
    SpawnReport, StepFacts, StepPromptInput,
};
pub use resume::build_resume_prompt;
pub use step::build_step_prompt;

/// The opening line of every resume continuation.
pub const CONTINUE_LEAD: &str = "Continue from where you left off.";
