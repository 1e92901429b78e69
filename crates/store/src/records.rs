//! Record types persisted by the [`Store`](crate::Store): turns, spawns,
//! loop runs, loop messages, and interrupts.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use adaf_domain::Position;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Build state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome tag of a turn. Serialized as the wire strings `pending`,
/// `success`, `exit_code_<n>`, `waiting_for_spawns`, `cancelled`,
/// `error`. Authoritative only after the controller's final update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildState {
    #[default]
    Pending,
    Success,
    ExitCode(i32),
    WaitingForSpawns,
    Cancelled,
    Error,
}

impl BuildState {
    pub fn as_string(&self) -> String {
        match self {
            Self::Pending => "pending".into(),
            Self::Success => "success".into(),
            Self::ExitCode(n) => format!("exit_code_{n}"),
            Self::WaitingForSpawns => "waiting_for_spawns".into(),
            Self::Cancelled => "cancelled".into(),
            Self::Error => "error".into(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "waiting_for_spawns" => Some(Self::WaitingForSpawns),
            "cancelled" => Some(Self::Cancelled),
            "error" => Some(Self::Error),
            _ => s
                .strip_prefix("exit_code_")
                .and_then(|n| n.parse().ok())
                .map(Self::ExitCode),
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl Serialize for BuildState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for BuildState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| D::Error::custom(format!("unknown build state '{s}'")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One agent invocation. A wait-resume continues an existing turn
/// record instead of creating a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: i64,
    pub hex_id: String,
    pub profile: String,
    pub agent: String,
    /// Owning loop run hex id; empty for standalone turn loops.
    #[serde(default)]
    pub loop_run_hex: String,
    #[serde(default)]
    pub step_hex: String,
    /// Summarized from the prompt at creation time.
    #[serde(default)]
    pub objective: String,
    /// Cumulative across wait-resumes of the same turn.
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub build_state: BuildState,
    /// Opaque session id returned by the agent; never parsed.
    #[serde(default)]
    pub resume_session_id: String,
    pub created_at: DateTime<Utc>,
    /// Set once the turn completes without a pending wait.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

/// Creation parameters for a turn; ids are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewTurn {
    pub profile: String,
    pub agent: String,
    pub loop_run_hex: String,
    pub step_hex: String,
    pub objective: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spawn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl SpawnStatus {
    /// Terminal statuses are monotonic: once set, never changed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for SpawnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a child-agent request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spawn {
    pub id: i64,
    pub parent_turn_id: i64,
    /// Set for grandchildren (a spawn requested by another spawn).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_spawn_id: Option<i64>,
    /// Backfilled once the child's first turn is created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_turn_id: Option<i64>,
    #[serde(default)]
    pub parent_profile: String,
    #[serde(default)]
    pub parent_role: Option<String>,
    #[serde(default)]
    pub parent_position: Position,
    pub profile: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub position: Position,
    pub task: String,
    pub status: SpawnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Child's final assistant output.
    #[serde(default)]
    pub summary: String,
    /// Diff stat for writable spawns, output tail or error otherwise.
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub read_only: bool,
    /// Worktree branch name; empty when read-only.
    #[serde(default)]
    pub branch: String,
    /// Commit the worktree branch was cut from; empty when read-only.
    #[serde(default)]
    pub base_commit: String,
    /// Handoffs run in the background and never block the parent wait.
    #[serde(default)]
    pub handoff: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
    #[serde(default)]
    pub issues: Vec<u64>,
}

impl Spawn {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Creation parameters for a spawn; id, status, branch, and timestamps
/// are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewSpawn {
    pub parent_turn_id: i64,
    pub parent_spawn_id: Option<i64>,
    pub parent_profile: String,
    pub parent_role: Option<String>,
    pub parent_position: Position,
    pub profile: String,
    pub role: Option<String>,
    pub position: Position,
    pub task: String,
    pub read_only: bool,
    pub base_commit: String,
    pub handoff: bool,
    pub timeout_minutes: Option<u64>,
    pub issues: Vec<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopRunStatus {
    Running,
    Stopped,
}

/// One execution of a loop definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopRun {
    pub id: i64,
    pub hex_id: String,
    pub loop_name: String,
    #[serde(default)]
    pub cycle: u32,
    /// Per-step highest message id consumed (step index → message id).
    #[serde(default)]
    pub watermarks: HashMap<usize, i64>,
    pub status: LoopRunStatus,
    /// Identifies the owning OS process.
    #[serde(default)]
    pub daemon_session: String,
    /// Session id shared by all standalone_chat steps of this run.
    #[serde(default)]
    pub chat_session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inter-step message posted by a supervisor step or injected
/// externally. Consumers dedupe via the per-step watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopMessage {
    pub id: i64,
    pub run_id: i64,
    /// When set, the message targets a child spawn rather than the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_id: Option<i64>,
    /// Originating step index; -1 for externally injected notes.
    #[serde(default)]
    pub step_index: i64,
    #[serde(default)]
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interrupt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An out-of-band interrupt payload, targeted at a turn or a spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_id: Option<i64>,
    pub payload: String,
    #[serde(default)]
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_state_wire_strings() {
        assert_eq!(BuildState::Success.as_string(), "success");
        assert_eq!(BuildState::ExitCode(3).as_string(), "exit_code_3");
        assert_eq!(
            BuildState::WaitingForSpawns.as_string(),
            "waiting_for_spawns"
        );
        assert_eq!(BuildState::Cancelled.as_string(), "cancelled");
    }

    #[test]
    fn build_state_parse_roundtrip() {
        for state in [
            BuildState::Pending,
            BuildState::Success,
            BuildState::ExitCode(0),
            BuildState::ExitCode(-1),
            BuildState::ExitCode(137),
            BuildState::WaitingForSpawns,
            BuildState::Cancelled,
            BuildState::Error,
        ] {
            assert_eq!(BuildState::parse(&state.as_string()), Some(state));
        }
        assert_eq!(BuildState::parse("exit_code_x"), None);
        assert_eq!(BuildState::parse("nope"), None);
    }

    #[test]
    fn build_state_serde() {
        let json = serde_json::to_string(&BuildState::ExitCode(2)).unwrap();
        assert_eq!(json, "\"exit_code_2\"");
        let back: BuildState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BuildState::ExitCode(2));
    }

    #[test]
    fn spawn_status_terminal_partition() {
        assert!(!SpawnStatus::Pending.is_terminal());
        assert!(!SpawnStatus::Running.is_terminal());
        assert!(SpawnStatus::Completed.is_terminal());
        assert!(SpawnStatus::Failed.is_terminal());
        assert!(SpawnStatus::Cancelled.is_terminal());
        assert!(SpawnStatus::Timeout.is_terminal());
    }

    #[test]
    fn spawn_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&SpawnStatus::Timeout).unwrap(),
            "\"timeout\""
        );
        let s: SpawnStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(s, SpawnStatus::Completed);
    }

    #[test]
    fn loop_run_watermark_serde_roundtrip() {
        let mut run = LoopRun {
            id: 1,
            hex_id: "abcd1234".into(),
            loop_name: "main".into(),
            cycle: 2,
            watermarks: HashMap::new(),
            status: LoopRunStatus::Running,
            daemon_session: "12345".into(),
            chat_session_id: String::new(),
            started_at: Utc::now(),
            stopped_at: None,
        };
        run.watermarks.insert(0, 7);
        run.watermarks.insert(2, 11);

        let json = serde_json::to_string(&run).unwrap();
        let back: LoopRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back.watermarks.get(&0), Some(&7));
        assert_eq!(back.watermarks.get(&2), Some(&11));
        assert_eq!(back.status, LoopRunStatus::Running);
    }
}
