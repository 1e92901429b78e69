/// Shared error type used across all adaf crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("store: {0}")]
    Store(String),

    #[error("agent failed on turn {turn_id}: {message}")]
    Agent { turn_id: i64, message: String },

    /// The outer context was cancelled. Terminal for the current loop.
    #[error("canceled")]
    Canceled,

    /// Sentinel raised when an interrupt carries the reserved control
    /// payload. The loop runner ends the step cleanly on this.
    #[error("step handed control to the supervisor")]
    CallSupervisor,

    #[error("worktree: {0}")]
    Worktree(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is plain outer-context cancellation.
    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_classification() {
        assert!(Error::Canceled.is_cancel());
        assert!(!Error::CallSupervisor.is_cancel());
        assert!(!Error::Other("x".into()).is_cancel());
    }

    #[test]
    fn agent_error_carries_turn_context() {
        let e = Error::Agent {
            turn_id: 42,
            message: "exit status 1".into(),
        };
        assert!(e.to_string().contains("turn 42"));
        assert!(e.to_string().contains("exit status 1"));
    }
}
