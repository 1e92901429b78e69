//! The adapter contract between the turn loop and an agent backend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::recorder::Recorder;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation / result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one agent invocation needs.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub workdir: PathBuf,
    pub prompt: String,
    /// Environment overlay, applied on top of the backend's own env.
    pub env: HashMap<String, String>,
    /// When set, the backend resumes this session instead of starting
    /// fresh. Opaque; never parsed.
    pub resume_session_id: Option<String>,
    pub model: Option<String>,
    /// Extra CLI arguments from the profile.
    pub extra_args: Vec<String>,
}

/// What the adapter reports back after the process exits.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub exit_code: i32,
    pub duration: Duration,
    /// Final assistant output (or a tail of raw output when the backend
    /// emits no structured result event).
    pub output: String,
    /// Fresh session id, when the backend produced one.
    pub agent_session_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Adapter failures. `Canceled` is the only non-fatal kind: the turn
/// loop drains interrupts on it, everything else ends the loop.
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("canceled")]
    Canceled,

    #[error("failed to spawn agent: {0}")]
    Spawn(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A coding-agent backend. Cancelling `cancel` must terminate the run
/// promptly and return [`AgentError::Canceled`].
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        cancel: &CancellationToken,
        inv: &Invocation,
        recorder: &Recorder,
    ) -> Result<AgentResult, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_classification() {
        assert!(AgentError::Canceled.is_canceled());
        assert!(!AgentError::Spawn("no such file".into()).is_canceled());
    }
}
