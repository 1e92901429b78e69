//! Core runtime — the turn loop controller, wait-signal watcher, spawn
//! coordinator, and loop runner, plus the helpers they share.

pub mod loop_runner;
pub mod spawns;
pub mod turn_loop;
pub mod watcher;
pub mod worktree;

pub use loop_runner::LoopRunner;
pub use spawns::{CreateSpawnRequest, SpawnCoordinator};
pub use turn_loop::{TurnLoop, TurnLoopConfig};

use std::collections::HashSet;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use adaf_domain::Result;
use adaf_prompt::ReviewStats;
use adaf_store::{LoopMessage, SpawnStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wait results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One spawn's entry in a wait outcome.
#[derive(Debug, Clone)]
pub struct SpawnWaitResult {
    pub spawn_id: i64,
    pub profile: String,
    pub status: SpawnStatus,
    pub exit_code: Option<i32>,
    pub result: String,
    pub summary: String,
    pub read_only: bool,
    pub branch: String,
    /// Review checkpoints mark running-spawn health; they are not
    /// moved into the seen set.
    pub review: Option<ReviewStats>,
}

impl SpawnWaitResult {
    pub fn is_review(&self) -> bool {
        self.review.is_some()
    }
}

/// What a wait callback hands back to the turn loop.
#[derive(Debug, Clone, Default)]
pub struct WaitOutcome {
    pub results: Vec<SpawnWaitResult>,
    /// Whether non-terminal non-handoff spawns remain.
    pub more_pending: bool,
    /// Supervisor messages gathered while waiting (loop steps only).
    pub messages: Vec<LoopMessage>,
}

/// Callback invoked when a turn observes the wait signal. The spawn
/// coordinator implements it directly; the loop runner wraps it to also
/// gather supervisor messages and adopted handoffs.
#[async_trait]
pub trait WaitHandler: Send + Sync {
    async fn wait(
        &self,
        cancel: &CancellationToken,
        turn_id: i64,
        already_seen: &HashSet<i64>,
    ) -> Result<WaitOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Objective text length cap on turn records.
const OBJECTIVE_MAX_CHARS: usize = 320;

/// Summarize a prompt into a turn objective: the first non-empty of the
/// `# Objective` / `# Rules` / `# Context` sections (whole prompt as a
/// fallback), whitespace-collapsed and truncated.
pub(crate) fn summarize_objective(prompt: &str) -> String {
    for header in ["# Objective", "# Rules", "# Context"] {
        if let Some(body) = section_body(prompt, header) {
            let collapsed = collapse_whitespace(&body);
            if !collapsed.is_empty() {
                return truncate_chars(&collapsed, OBJECTIVE_MAX_CHARS);
            }
        }
    }
    truncate_chars(&collapse_whitespace(prompt), OBJECTIVE_MAX_CHARS)
}

/// Extract the body of a Markdown section: the lines after the header
/// line up to the next `# ` heading.
fn section_body(text: &str, header: &str) -> Option<String> {
    let mut lines = text.lines();
    lines.find(|l| l.trim_end() == header)?;
    let body: Vec<&str> = lines.take_while(|l| !l.starts_with("# ")).collect();
    Some(body.join("\n"))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters, appending `...` when cut.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objective_prefers_objective_section() {
        let prompt = "intro\n\n# Objective\n\nBuild   the\nparser.\n\n# Rules\n\n- r1\n";
        assert_eq!(summarize_objective(prompt), "Build the parser.");
    }

    #[test]
    fn objective_falls_back_to_rules_then_context() {
        let prompt = "# Rules\n\n- be careful\n\n# Context\n\n- Project: x\n";
        assert_eq!(summarize_objective(prompt), "- be careful");

        let prompt = "# Context\n\n- Project: x\n";
        assert_eq!(summarize_objective(prompt), "- Project: x");
    }

    #[test]
    fn objective_falls_back_to_whole_prompt() {
        assert_eq!(summarize_objective("just  a\nplain prompt"), "just a plain prompt");
    }

    #[test]
    fn objective_truncated_to_320_chars() {
        let long = format!("# Objective\n\n{}\n", "word ".repeat(200));
        let obj = summarize_objective(&long);
        assert!(obj.chars().count() <= 323); // 320 + "..."
        assert!(obj.ends_with("..."));
    }

    #[test]
    fn truncate_chars_multibyte_safe() {
        let s = "héllo wörld";
        assert_eq!(truncate_chars(s, 100), s);
        assert_eq!(truncate_chars(s, 4), "héll...");
    }
}
