use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent CLI backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How to invoke one agent CLI. Argument templates may contain the
/// placeholders `{prompt}`, `{session}` (resume only) and `{model}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Executable name or path.
    pub command: String,
    /// Arguments for a fresh turn.
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments for a resume turn. Empty means the backend cannot
    /// resume and every turn is fresh.
    #[serde(default)]
    pub resume_args: Vec<String>,
    /// Arguments inserted when the profile sets a model.
    #[serde(default)]
    pub model_args: Vec<String>,
    /// Extra environment for the agent process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl BackendConfig {
    /// Built-in definitions for the stock `claude` and `codex` CLIs.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "claude" => Some(Self {
                command: "claude".into(),
                args: vec![
                    "-p".into(),
                    "{prompt}".into(),
                    "--output-format".into(),
                    "stream-json".into(),
                    "--verbose".into(),
                ],
                resume_args: vec![
                    "-p".into(),
                    "{prompt}".into(),
                    "--resume".into(),
                    "{session}".into(),
                    "--output-format".into(),
                    "stream-json".into(),
                    "--verbose".into(),
                ],
                model_args: vec!["--model".into(), "{model}".into()],
                env: HashMap::new(),
            }),
            "codex" => Some(Self {
                command: "codex".into(),
                args: vec!["exec".into(), "--json".into(), "{prompt}".into()],
                resume_args: vec![
                    "exec".into(),
                    "resume".into(),
                    "{session}".into(),
                    "--json".into(),
                    "{prompt}".into(),
                ],
                model_args: vec!["--model".into(), "{model}".into()],
                env: HashMap::new(),
            }),
            _ => None,
        }
    }

    /// Whether this backend supports session resume.
    pub fn supports_resume(&self) -> bool {
        !self.resume_args.is_empty()
    }
}
