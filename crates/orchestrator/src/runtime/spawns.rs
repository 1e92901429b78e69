//! Spawn coordinator — accepts child-agent requests from the store,
//! supervises their execution (isolated worktrees for writable spawns),
//! and implements the wait-for-any-unseen primitive the turn loop
//! consumes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use adaf_domain::{Error, Position, Result};
use adaf_prompt::{build_step_prompt, ProjectFacts, ReviewStats, StepFacts, StepPromptInput};
use adaf_store::{NewSpawn, Spawn, SpawnStatus};

use crate::state::OrchState;

use super::turn_loop::{TurnLoop, TurnLoopConfig};
use super::watcher::POLL_INTERVAL;
use super::worktree;
use super::{truncate_chars, SpawnWaitResult, WaitHandler, WaitOutcome};

/// How long a wait may block before a review checkpoint is surfaced for
/// the still-running spawns.
const REVIEW_INTERVAL: Duration = Duration::from_secs(300);

/// Longest output tail kept as a read-only spawn's result text.
const RESULT_TAIL_CHARS: usize = 2000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct CreateSpawnRequest {
    pub parent_turn_id: i64,
    pub parent_spawn_id: Option<i64>,
    pub parent_profile: String,
    pub parent_role: Option<String>,
    pub parent_position: Position,
    pub profile: String,
    pub role: Option<String>,
    pub position: Option<Position>,
    pub task: Option<String>,
    pub task_file: Option<PathBuf>,
    pub read_only: bool,
    pub handoff: bool,
    pub timeout_minutes: Option<u64>,
    pub issues: Vec<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SpawnCoordinator {
    state: Arc<OrchState>,
    sem: Arc<Semaphore>,
    /// In-process launch dedupe: `run_spawn` is idempotent, this just
    /// avoids spawning duplicate supervisor tasks.
    launched: Mutex<HashSet<i64>>,
}

impl SpawnCoordinator {
    pub fn new(state: Arc<OrchState>) -> Arc<Self> {
        let max_parallel = state.config.spawns.clamped().max_parallel;
        Arc::new(Self {
            state,
            sem: Arc::new(Semaphore::new(max_parallel)),
            launched: Mutex::new(HashSet::new()),
        })
    }

    /// Where a spawn's worktree lives.
    pub fn worktree_dir(state: &OrchState, spawn_id: i64) -> PathBuf {
        state.worktrees_dir().join(format!("spawn-{spawn_id}"))
    }

    /// Validate and persist a spawn request with status `pending`.
    pub async fn create_spawn(&self, req: CreateSpawnRequest) -> Result<Spawn> {
        if self.state.config.profile(&req.profile).is_none() {
            return Err(Error::ProfileNotFound(req.profile));
        }

        let task = match (&req.task, &req.task_file) {
            (Some(text), _) if !text.is_empty() => text.clone(),
            (_, Some(path)) => std::fs::read_to_string(path)?,
            _ => {
                return Err(Error::Config("spawn requires --task or --task-file".into()));
            }
        };

        // Writable spawns branch from the parent turn's commit.
        let base_commit = if req.read_only {
            String::new()
        } else {
            worktree::rev_parse_head(&self.state.project_dir).await?
        };

        let timeout_minutes = req
            .timeout_minutes
            .or(self.state.config.spawns.default_timeout_minutes);

        let spawn = self.state.store.create_spawn(NewSpawn {
            parent_turn_id: req.parent_turn_id,
            parent_spawn_id: req.parent_spawn_id,
            parent_profile: req.parent_profile,
            parent_role: req.parent_role,
            parent_position: req.parent_position,
            profile: req.profile,
            role: req.role,
            position: req.position.unwrap_or_default(),
            task,
            read_only: req.read_only,
            base_commit,
            handoff: req.handoff,
            timeout_minutes,
            issues: req.issues,
        })?;

        tracing::info!(
            spawn_id = spawn.id,
            parent_turn_id = spawn.parent_turn_id,
            profile = %spawn.profile,
            read_only = spawn.read_only,
            handoff = spawn.handoff,
            "spawn created"
        );
        Ok(spawn)
    }

    /// Launch every pending spawn that is not already supervised.
    pub fn launch_pending(self: &Arc<Self>, outer: &CancellationToken) {
        if let Err(e) = self.state.store.refresh() {
            tracing::warn!(error = %e, "store refresh failed before launching spawns");
        }
        let pending: Vec<i64> = {
            let launched = self.launched.lock();
            self.state
                .store
                .all_spawns()
                .into_iter()
                .filter(|s| s.status == SpawnStatus::Pending && !launched.contains(&s.id))
                .map(|s| s.id)
                .collect()
        };
        for spawn_id in pending {
            self.launch(spawn_id, outer.child_token());
        }
    }

    /// Idempotent launch of one spawn on its own task.
    pub fn launch(self: &Arc<Self>, spawn_id: i64, cancel: CancellationToken) -> JoinHandle<()> {
        self.launched.lock().insert(spawn_id);
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.run_spawn(spawn_id, cancel).await {
                tracing::warn!(spawn_id, error = %e, "spawn execution errored");
                let _ = coordinator.state.store.update_spawn(spawn_id, |s| {
                    if !s.status.is_terminal() {
                        s.status = SpawnStatus::Failed;
                        s.completed_at = Some(Utc::now());
                        s.result = format!("spawn runner error: {e}");
                    }
                });
            }
        })
    }

    /// Background pump: picks up pending spawns written by the agent's
    /// `adaf spawn` CLI invocations.
    pub fn pump(self: &Arc<Self>, outer: CancellationToken) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = outer.cancelled() => break,
                    _ = tick.tick() => coordinator.launch_pending(&outer),
                }
            }
        })
    }

    /// Execute one spawn to a terminal status.
    pub async fn run_spawn(self: &Arc<Self>, spawn_id: i64, cancel: CancellationToken) -> Result<()> {
        let _permit = self
            .sem
            .acquire()
            .await
            .map_err(|_| Error::Other("spawn semaphore closed".into()))?;

        self.state.store.refresh()?;
        let Some(spawn) = self.state.store.get_spawn(spawn_id) else {
            return Err(Error::Store(format!("spawn {spawn_id} not found")));
        };
        if spawn.status != SpawnStatus::Pending {
            return Ok(()); // already supervised or finished
        }

        let spawn = self.state.store.update_spawn(spawn_id, |s| {
            s.status = SpawnStatus::Running;
            s.started_at = Some(Utc::now());
        })?;

        // ── Working copy ─────────────────────────────────────────────
        let workdir = if spawn.read_only {
            self.state.project_dir.clone()
        } else {
            let dir = Self::worktree_dir(&self.state, spawn_id);
            worktree::add_worktree(&self.state.project_dir, &spawn.branch, &dir, &spawn.base_commit)
                .await?;
            dir
        };

        // ── Child turn loop ──────────────────────────────────────────
        let profile = self
            .state
            .config
            .profile(&spawn.profile)
            .cloned()
            .ok_or_else(|| Error::ProfileNotFound(spawn.profile.clone()))?;

        let prompt = self.sub_agent_prompt(&spawn);

        let mut config = TurnLoopConfig::new(&spawn.profile, &profile.backend, workdir.clone());
        config.env = profile.env.clone();
        config.model = profile.model.clone();
        config.extra_args = profile.args.clone();
        config.max_turns = profile
            .max_turns
            .unwrap_or(self.state.config.spawns.child_max_turns);
        config.constant_prompt = prompt;
        config.position = Some(spawn.position);
        config.role = spawn.role.clone();

        let mut turn_loop = TurnLoop::new(self.state.clone(), config);
        turn_loop.wait_handler = Some(Arc::new(ChildWaitHandler {
            coordinator: self.clone(),
            spawn_id,
            message_watermark: Mutex::new(0),
        }) as Arc<dyn WaitHandler>);

        // Backfill child_turn_id once the first turn exists.
        let store = self.state.store.clone();
        turn_loop.on_turn_created = Some(Box::new(move |turn_id| {
            let _ = store.update_spawn(spawn_id, |s| {
                if s.child_turn_id.is_none() {
                    s.child_turn_id = Some(turn_id);
                }
            });
        }));

        // Forward store-posted interrupts (`adaf spawn-message
        // --interrupt`) into the child loop.
        let (interrupt_tx, interrupt_rx) = mpsc::channel(8);
        turn_loop.interrupt_rx = Some(interrupt_rx);
        let child_token = cancel.child_token();
        let pump_token = child_token.clone();
        let pump_store = self.state.store.clone();
        let interrupt_pump = tokio::spawn(async move {
            let mut tick = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = pump_token.cancelled() => break,
                    _ = tick.tick() => {
                        let _ = pump_store.refresh();
                        if let Ok(payloads) = pump_store.take_interrupts_for_spawn(spawn_id) {
                            for payload in payloads {
                                if interrupt_tx.send(payload).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });

        tracing::info!(spawn_id, profile = %spawn.profile, workdir = %workdir.display(), "spawn running");

        let run_result = match spawn.timeout_minutes {
            Some(minutes) if minutes > 0 => {
                let limit = Duration::from_secs(minutes * 60);
                match tokio::time::timeout(limit, turn_loop.run(&child_token)).await {
                    Ok(result) => result,
                    Err(_) => {
                        child_token.cancel();
                        interrupt_pump.abort();
                        self.state.store.update_spawn(spawn_id, |s| {
                            s.status = SpawnStatus::Timeout;
                            s.completed_at = Some(Utc::now());
                            s.result = format!("timed out after {minutes} minutes");
                        })?;
                        tracing::warn!(spawn_id, minutes, "spawn timed out");
                        return Ok(());
                    }
                }
            }
            _ => turn_loop.run(&child_token).await,
        };
        child_token.cancel();
        interrupt_pump.abort();

        // ── Outcome ──────────────────────────────────────────────────
        let summary = turn_loop.last_output().to_string();
        let exit_code = turn_loop.last_exit_code();
        let result_text = if spawn.read_only {
            truncate_chars(&summary, RESULT_TAIL_CHARS)
        } else {
            match worktree::diff_stat(&workdir, &spawn.base_commit).await {
                Ok(stat) if !stat.is_empty() => stat,
                Ok(_) => "no changes".into(),
                Err(e) => format!("diff unavailable: {e}"),
            }
        };

        let status = match &run_result {
            Ok(()) => match exit_code {
                Some(0) | None => SpawnStatus::Completed,
                Some(_) => SpawnStatus::Failed,
            },
            Err(Error::Canceled) => SpawnStatus::Cancelled,
            Err(_) => SpawnStatus::Failed,
        };

        self.state.store.update_spawn(spawn_id, |s| {
            s.status = status;
            s.exit_code = exit_code;
            s.completed_at = Some(Utc::now());
            s.summary = summary.clone();
            s.result = match &run_result {
                Err(e) if !matches!(e, Error::Canceled) => format!("{e}"),
                _ => result_text.clone(),
            };
        })?;

        tracing::info!(spawn_id, status = %status, "spawn finished");
        Ok(())
    }

    /// Assemble the sub-agent prompt for a spawn.
    fn sub_agent_prompt(&self, spawn: &Spawn) -> String {
        let role_cfg = spawn
            .role
            .as_deref()
            .and_then(|r| self.state.config.role(r));
        let profile_cfg = self.state.config.profile(&spawn.profile);

        let project = ProjectFacts {
            name: self.state.config.project.name.clone(),
            plan_id: self.state.config.project.plan_id.clone(),
        };
        let step = StepFacts {
            position: spawn.position,
            role: spawn.role.clone(),
            can_write_code: role_cfg
                .map(|r| r.can_write_code)
                .unwrap_or(!spawn.read_only),
            read_only: spawn.read_only || role_cfg.map(|r| r.read_only).unwrap_or(false),
            role_rules: role_cfg.map(|r| r.rules.clone()).unwrap_or_default(),
            role_skills: role_cfg.map(|r| r.skills.clone()).unwrap_or_default(),
            profile_skills: profile_cfg.map(|p| p.skills.clone()).unwrap_or_default(),
            ..Default::default()
        };

        build_step_prompt(&StepPromptInput {
            project: &project,
            loop_info: None,
            step: &step,
            catalog: &self.state.config.prompt_rules,
            delegation: &[],
            loop_has_supervisor: false,
            parent_turn_id: spawn.parent_turn_id,
            messages: &[],
            task: Some(&spawn.task),
            read_only: spawn.read_only,
        })
    }

    /// Core wait primitive: return unseen terminal spawns parented at
    /// `turn_id`, or block until one appears. Review checkpoints are
    /// surfaced when the wait outlasts [`REVIEW_INTERVAL`].
    pub async fn wait_for_any_unseen(
        &self,
        cancel: &CancellationToken,
        turn_id: i64,
        already_seen: &HashSet<i64>,
    ) -> Result<WaitOutcome> {
        let mut events = self.state.store.subscribe_spawn_events();
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        let review_deadline = tokio::time::sleep(REVIEW_INTERVAL);
        tokio::pin!(review_deadline);

        loop {
            self.state.store.refresh()?;
            let spawns = self.state.store.spawns_for_turn(turn_id);

            let unseen_terminal: Vec<&Spawn> = spawns
                .iter()
                .filter(|s| s.is_terminal() && !already_seen.contains(&s.id))
                .collect();
            let pending = spawns
                .iter()
                .filter(|s| !s.is_terminal() && !s.handoff)
                .count();

            if !unseen_terminal.is_empty() {
                let results = unseen_terminal.into_iter().map(terminal_result).collect();
                return Ok(WaitOutcome {
                    results,
                    more_pending: pending > 0,
                    messages: Vec::new(),
                });
            }
            if pending == 0 {
                return Ok(WaitOutcome::default());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Canceled),
                _ = events.recv() => {}
                _ = tick.tick() => {}
                _ = &mut review_deadline => {
                    let results = self.review_checkpoints(&spawns).await;
                    if !results.is_empty() {
                        return Ok(WaitOutcome {
                            results,
                            more_pending: true,
                            messages: Vec::new(),
                        });
                    }
                    // Nothing running yet (children still queued). An
                    // elapsed sleep stays ready on every poll, so rearm
                    // it or this arm wins every select from here on.
                    review_deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + REVIEW_INTERVAL);
                }
            }
        }
    }

    /// Health entries for still-running non-handoff spawns.
    async fn review_checkpoints(&self, spawns: &[Spawn]) -> Vec<SpawnWaitResult> {
        let mut results = Vec::new();
        for spawn in spawns
            .iter()
            .filter(|s| s.status == SpawnStatus::Running && !s.handoff)
        {
            let elapsed_secs = spawn
                .started_at
                .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
                .unwrap_or(0);
            let commits = if spawn.read_only || spawn.base_commit.is_empty() {
                0
            } else {
                let dir = Self::worktree_dir(&self.state, spawn.id);
                worktree::commit_count(&dir, &spawn.base_commit)
                    .await
                    .unwrap_or(0)
            };
            results.push(SpawnWaitResult {
                spawn_id: spawn.id,
                profile: spawn.profile.clone(),
                status: spawn.status,
                exit_code: None,
                result: String::new(),
                summary: String::new(),
                read_only: spawn.read_only,
                branch: spawn.branch.clone(),
                review: Some(ReviewStats {
                    elapsed_secs,
                    commits,
                    ..Default::default()
                }),
            });
        }
        results
    }
}

pub(crate) fn terminal_result(spawn: &Spawn) -> SpawnWaitResult {
    SpawnWaitResult {
        spawn_id: spawn.id,
        profile: spawn.profile.clone(),
        status: spawn.status,
        exit_code: spawn.exit_code,
        result: spawn.result.clone(),
        summary: spawn.summary.clone(),
        read_only: spawn.read_only,
        branch: spawn.branch.clone(),
        review: None,
    }
}

#[async_trait::async_trait]
impl WaitHandler for SpawnCoordinator {
    async fn wait(
        &self,
        cancel: &CancellationToken,
        turn_id: i64,
        already_seen: &HashSet<i64>,
    ) -> Result<WaitOutcome> {
        self.wait_for_any_unseen(cancel, turn_id, already_seen).await
    }
}

/// Wait handler for child loops: the coordinator's primitive, plus any
/// `adaf spawn-message` content posted at this spawn since the last
/// wait.
struct ChildWaitHandler {
    coordinator: Arc<SpawnCoordinator>,
    spawn_id: i64,
    message_watermark: Mutex<i64>,
}

#[async_trait::async_trait]
impl WaitHandler for ChildWaitHandler {
    async fn wait(
        &self,
        cancel: &CancellationToken,
        turn_id: i64,
        already_seen: &HashSet<i64>,
    ) -> Result<WaitOutcome> {
        let mut outcome = self
            .coordinator
            .wait_for_any_unseen(cancel, turn_id, already_seen)
            .await?;

        let above = *self.message_watermark.lock();
        let messages = self
            .coordinator
            .state
            .store
            .messages_for_spawn(self.spawn_id, above);
        if let Some(max_id) = messages.iter().map(|m| m.id).max() {
            *self.message_watermark.lock() = max_id;
        }
        outcome.messages = messages;
        Ok(outcome)
    }
}
