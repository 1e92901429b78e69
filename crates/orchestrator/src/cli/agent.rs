//! Agent-facing CLI handlers. These run inside the agent's environment
//! (`ADAF_AGENT=1`): they resolve the store from `ADAF_PROJECT_DIR`,
//! write the request, and exit — the orchestrator daemon observes the
//! store and reacts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use adaf_domain::config::DelegationConfig;
use adaf_domain::{Position, CONTROL_CALL_SUPERVISOR};
use adaf_store::SpawnStatus;

use crate::runtime::{worktree, CreateSpawnRequest, SpawnCoordinator};
use crate::state::OrchState;

use super::SpawnArgs;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent environment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the orchestrator exposed to the agent process.
pub struct AgentContext {
    pub turn_id: i64,
    pub project_dir: PathBuf,
    pub profile: String,
    pub role: Option<String>,
    pub position: Position,
    pub loop_run_id: Option<i64>,
    pub delegation: DelegationConfig,
}

impl AgentContext {
    /// Read the `ADAF_*` environment this process was launched with.
    pub fn from_env() -> anyhow::Result<Self> {
        let turn_id = std::env::var("ADAF_TURN_ID")
            .context("ADAF_TURN_ID is not set; this command is for adaf-launched agents")?
            .parse()
            .context("ADAF_TURN_ID is not an integer")?;
        let project_dir = PathBuf::from(
            std::env::var("ADAF_PROJECT_DIR").context("ADAF_PROJECT_DIR is not set")?,
        );
        let profile = std::env::var("ADAF_PROFILE").unwrap_or_default();
        let role = std::env::var("ADAF_ROLE").ok().filter(|r| !r.is_empty());
        let position = std::env::var("ADAF_POSITION")
            .ok()
            .and_then(|p| serde_json::from_value(serde_json::Value::String(p)).ok())
            .unwrap_or_default();
        let loop_run_id = std::env::var("ADAF_LOOP_RUN_ID").ok().and_then(|v| v.parse().ok());
        let delegation = std::env::var("ADAF_DELEGATION_JSON")
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default();

        Ok(Self {
            turn_id,
            project_dir,
            profile,
            role,
            position,
            loop_run_id,
            delegation,
        })
    }
}

/// Open the orchestrator state rooted at the agent's project dir.
fn open_state(ctx: &AgentContext) -> anyhow::Result<Arc<OrchState>> {
    let mut config = super::load_config_at(&ctx.project_dir.join("adaf.toml"))?;
    config.project.dir = ctx.project_dir.clone();
    Ok(Arc::new(OrchState::new(config)?))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `adaf spawn` — persist a pending spawn request.
pub async fn spawn(args: SpawnArgs) -> anyhow::Result<()> {
    let ctx = AgentContext::from_env()?;
    let state = open_state(&ctx)?;
    let coordinator = SpawnCoordinator::new(state.clone());

    // Delegation entry supplies defaults the flags can override.
    let entry = ctx.delegation.entry(&args.profile);
    let read_only = args.read_only || entry.map(|e| e.read_only).unwrap_or(false);
    let handoff = args.handoff || entry.map(|e| e.handoff).unwrap_or(false);
    let role = args.role.or_else(|| entry.and_then(|e| e.role.clone()));
    let timeout_minutes = args
        .timeout_minutes
        .or_else(|| entry.and_then(|e| e.timeout_minutes))
        .or(ctx.delegation.timeout_minutes);

    // When the caller is itself a spawn, record the grandchild link.
    let parent_spawn_id = state
        .store
        .all_spawns()
        .into_iter()
        .find(|s| s.child_turn_id == Some(ctx.turn_id))
        .map(|s| s.id);

    let spawn = coordinator
        .create_spawn(CreateSpawnRequest {
            parent_turn_id: ctx.turn_id,
            parent_spawn_id,
            parent_profile: ctx.profile.clone(),
            parent_role: ctx.role.clone(),
            parent_position: ctx.position,
            profile: args.profile,
            role,
            position: None,
            task: args.task,
            task_file: args.task_file,
            read_only,
            handoff,
            timeout_minutes,
            issues: args.issues,
        })
        .await?;

    println!(
        "spawn {} created (profile={}, status=pending{})",
        spawn.id,
        spawn.profile,
        if spawn.read_only { ", read-only" } else { "" }
    );
    Ok(())
}

/// `adaf wait-for-spawns` — raise the wait flag for the current turn.
pub fn wait_for_spawns() -> anyhow::Result<()> {
    let ctx = AgentContext::from_env()?;
    let state = open_state(&ctx)?;
    state.store.signal_wait(ctx.turn_id)?;
    println!(
        "wait signalled for turn {}; finish this reply — you will be resumed when a spawn reports",
        ctx.turn_id
    );
    Ok(())
}

/// `adaf spawn-status` — list children of the current turn.
pub fn spawn_status(spawn_id: Option<i64>) -> anyhow::Result<()> {
    let ctx = AgentContext::from_env()?;
    let state = open_state(&ctx)?;
    state.store.refresh()?;

    let spawns = match spawn_id {
        Some(id) => state.store.get_spawn(id).into_iter().collect(),
        None => state.store.spawns_for_turn(ctx.turn_id),
    };
    if spawns.is_empty() {
        println!("no spawns");
        return Ok(());
    }
    for s in spawns {
        let mut line = format!("#{} profile={} status={}", s.id, s.profile, s.status);
        if let Some(code) = s.exit_code {
            line.push_str(&format!(" exit_code={code}"));
        }
        if s.read_only {
            line.push_str(" read-only");
        } else if !s.branch.is_empty() {
            line.push_str(&format!(" branch={}", s.branch));
        }
        if s.handoff {
            line.push_str(" handoff");
        }
        println!("{line}");
    }
    Ok(())
}

/// `adaf spawn-message` — post a message or an interrupt to a child.
pub fn spawn_message(spawn_id: i64, interrupt: bool, message: &str) -> anyhow::Result<()> {
    let ctx = AgentContext::from_env()?;
    let state = open_state(&ctx)?;
    anyhow::ensure!(
        state.store.get_spawn(spawn_id).is_some(),
        "spawn {spawn_id} not found"
    );

    if interrupt {
        state.store.post_interrupt(None, Some(spawn_id), message)?;
        println!("interrupt posted to spawn {spawn_id}");
    } else {
        let author = if ctx.profile.is_empty() {
            ctx.position.to_string()
        } else {
            ctx.profile.clone()
        };
        state
            .store
            .post_message(ctx.loop_run_id.unwrap_or(0), Some(spawn_id), -1, &author, message)?;
        println!("message posted to spawn {spawn_id}");
    }
    Ok(())
}

/// `adaf spawn-merge` — merge a finished writable spawn's branch.
pub async fn spawn_merge(spawn_id: i64, squash: bool) -> anyhow::Result<()> {
    let ctx = AgentContext::from_env()?;
    let state = open_state(&ctx)?;
    state.store.refresh()?;

    let spawn = state
        .store
        .get_spawn(spawn_id)
        .with_context(|| format!("spawn {spawn_id} not found"))?;
    anyhow::ensure!(!spawn.read_only, "spawn {spawn_id} is read-only, nothing to merge");
    anyhow::ensure!(
        spawn.status == SpawnStatus::Completed,
        "spawn {spawn_id} is {}, not completed",
        spawn.status
    );

    let worktree_dir = SpawnCoordinator::worktree_dir(&state, spawn_id);
    worktree::merge_spawn(&state.project_dir, &worktree_dir, &spawn.branch, squash).await?;
    println!(
        "spawn {spawn_id} merged{} (branch {})",
        if squash { " (squash)" } else { "" },
        spawn.branch
    );
    Ok(())
}

/// `adaf spawn-reject` — discard a spawn's worktree and branch.
pub async fn spawn_reject(spawn_id: i64) -> anyhow::Result<()> {
    let ctx = AgentContext::from_env()?;
    let state = open_state(&ctx)?;
    state.store.refresh()?;

    let spawn = state
        .store
        .get_spawn(spawn_id)
        .with_context(|| format!("spawn {spawn_id} not found"))?;
    anyhow::ensure!(!spawn.read_only, "spawn {spawn_id} is read-only, nothing to reject");

    if !spawn.status.is_terminal() {
        state.store.update_spawn(spawn_id, |s| {
            s.status = SpawnStatus::Cancelled;
            s.completed_at = Some(chrono::Utc::now());
        })?;
    }
    let worktree_dir = SpawnCoordinator::worktree_dir(&state, spawn_id);
    worktree::remove_worktree(&state.project_dir, &worktree_dir, &spawn.branch).await?;
    println!("spawn {spawn_id} rejected (branch {} removed)", spawn.branch);
    Ok(())
}

/// `adaf note add` — inject a supervisor note into a run's stream.
pub fn note_add(session: i64, note: &str) -> anyhow::Result<()> {
    let ctx = AgentContext::from_env()?;
    let state = open_state(&ctx)?;
    state.store.post_message(session, None, -1, "note", note)?;
    println!("note recorded for run {session}");
    Ok(())
}

/// `adaf loop call-supervisor` — interrupt the current turn with the
/// reserved control payload.
pub fn call_supervisor() -> anyhow::Result<()> {
    let ctx = AgentContext::from_env()?;
    let state = open_state(&ctx)?;
    state
        .store
        .post_interrupt(Some(ctx.turn_id), None, CONTROL_CALL_SUPERVISOR)?;
    println!("supervisor call requested; the current step will end shortly");
    Ok(())
}
