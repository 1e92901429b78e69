//! Loop runner — walks a loop definition's steps over cycles, resumes
//! role-matched sessions across steps, forwards supervisor messages,
//! and adopts running handoff spawns.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use adaf_domain::config::{LoopConfig, StepConfig};
use adaf_domain::{Error, Position, Result};
use adaf_prompt::{
    build_step_prompt, DelegationChild, LoopFacts, MessageFacts, ProjectFacts, StepFacts,
    StepPromptInput,
};
use adaf_store::{LoopMessage, LoopRunStatus};

use crate::state::OrchState;

use super::spawns::{terminal_result, SpawnCoordinator};
use super::turn_loop::{PromptFn, TurnLoop, TurnLoopConfig};
use super::watcher::POLL_INTERVAL;
use super::{WaitHandler, WaitOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LoopRunner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LoopRunner {
    state: Arc<OrchState>,
    coordinator: Arc<SpawnCoordinator>,
    loop_name: String,
    loop_cfg: LoopConfig,
}

/// Session continuity key: the next step reuses the session iff these
/// all match.
struct ResumeKey {
    position: Position,
    role: Option<String>,
    agent: String,
    session: String,
}

impl LoopRunner {
    pub fn new(
        state: Arc<OrchState>,
        coordinator: Arc<SpawnCoordinator>,
        loop_name: &str,
    ) -> Result<Self> {
        let loop_cfg = state
            .config
            .loops
            .get(loop_name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown loop '{loop_name}'")))?;
        Ok(Self {
            state,
            coordinator,
            loop_name: loop_name.to_string(),
            loop_cfg,
        })
    }

    /// Execute the loop to completion (or stop/wind-down/cancel).
    /// Returns the loop run id.
    pub async fn run(&self, outer: &CancellationToken) -> Result<i64> {
        let run = self
            .state
            .store
            .create_loop_run(&self.loop_name, &std::process::id().to_string())?;
        let run_id = run.id;
        tracing::info!(run_id, name = %self.loop_name, "loop run started");

        // Pick up pending spawns written by agent CLI invocations.
        let pump_token = outer.child_token();
        let pump = self.coordinator.pump(pump_token.clone());

        let result = self.run_inner(outer, run_id).await;

        pump_token.cancel();
        let _ = pump.await;

        self.state.store.update_loop_run(run_id, |r| {
            r.status = LoopRunStatus::Stopped;
            r.stopped_at = Some(Utc::now());
        })?;
        self.state.store.cleanup_stop_chan(run_id);
        tracing::info!(run_id, "loop run stopped");

        result.map(|()| run_id)
    }

    async fn run_inner(&self, outer: &CancellationToken, run_id: i64) -> Result<()> {
        let mut previous: Option<ResumeKey> = None;
        let adopted: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let total_steps = self.loop_cfg.steps.len();
        let mut cycle: u32 = 0;

        loop {
            cycle += 1;
            if self.loop_cfg.max_cycles > 0 && cycle > self.loop_cfg.max_cycles {
                break;
            }
            if let Err(e) = self.state.store.refresh() {
                tracing::warn!(error = %e, "store refresh failed");
            }
            if self.state.store.is_wind_down(run_id) {
                tracing::info!(run_id, "wind-down observed, not starting another cycle");
                break;
            }
            self.state.store.update_loop_run(run_id, |r| r.cycle = cycle)?;

            for (step_index, step) in self.loop_cfg.steps.iter().enumerate() {
                if outer.is_cancelled() {
                    return Err(Error::Canceled);
                }
                let _ = self.state.store.refresh();
                if self.state.store.is_loop_stopped(run_id) {
                    tracing::info!(run_id, "stop observed between steps");
                    return Ok(());
                }

                match self
                    .run_step(outer, run_id, cycle, step_index, step, &mut previous, &adopted)
                    .await
                {
                    Ok(()) => {}
                    Err(Error::CallSupervisor) => {
                        tracing::info!(run_id, step_index, "step handed control to supervisor");
                    }
                    Err(Error::Canceled) => {
                        if outer.is_cancelled() {
                            return Err(Error::Canceled);
                        }
                        let _ = self.state.store.refresh();
                        if self.state.store.is_loop_stopped(run_id) {
                            tracing::info!(run_id, step_index, "step cancelled by stop signal");
                            return Ok(());
                        }
                        return Err(Error::Canceled);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        outer: &CancellationToken,
        run_id: i64,
        cycle: u32,
        step_index: usize,
        step: &StepConfig,
        previous: &mut Option<ResumeKey>,
        adopted: &Arc<Mutex<Vec<i64>>>,
    ) -> Result<()> {
        let profile = self
            .state
            .config
            .profile(&step.profile)
            .cloned()
            .ok_or_else(|| Error::ProfileNotFound(step.profile.clone()))?;
        let step_hex = adaf_store::short_hex_id();
        let run_hex = self
            .state
            .store
            .get_loop_run(run_id)
            .map(|r| r.hex_id)
            .unwrap_or_default();

        // ── Resume session ───────────────────────────────────────────
        let resume_session = if step.standalone_chat {
            self.state
                .store
                .get_loop_run(run_id)
                .map(|r| r.chat_session_id)
                .filter(|s| !s.is_empty())
        } else {
            previous
                .as_ref()
                .filter(|p| {
                    p.position == step.position
                        && p.role == step.role
                        && p.agent == profile.backend
                })
                .map(|p| p.session.clone())
                .filter(|s| !s.is_empty())
        };

        // ── Controller config ────────────────────────────────────────
        let mut config =
            TurnLoopConfig::new(&step.profile, &profile.backend, self.state.project_dir.clone());
        config.env = profile.env.clone();
        config.model = profile.model.clone();
        config.extra_args = profile.args.clone();
        config.max_turns = step.turns;
        config.loop_run_hex = run_hex;
        config.step_hex = step_hex;
        config.loop_run_id = Some(run_id);
        config.step_index = Some(step_index);
        config.position = Some(step.position);
        config.role = step.role.clone();
        config.resource_priority = Some(self.state.config.project.resource_priority);
        if !step.delegation.is_empty() {
            config.delegation_json = serde_json::to_string(&step.delegation).ok();
        }

        let mut turn_loop = TurnLoop::new(self.state.clone(), config);
        turn_loop.resume_session = resume_session;

        // Refreshed once per fresh turn: picks up supervisor messages
        // above the per-step watermark.
        let prompt_state = self.state.clone();
        let step_cfg = step.clone();
        let loop_name = self.loop_name.clone();
        let has_supervisor = self.loop_cfg.has_supervisor();
        let prompt_fn: PromptFn = Box::new(move |_turn_id| {
            build_loop_step_prompt(
                &prompt_state,
                &loop_name,
                run_id,
                cycle,
                step_index,
                step_cfg.clone(),
                has_supervisor,
            )
        });
        turn_loop.prompt_fn = Some(prompt_fn);

        turn_loop.wait_handler = Some(Arc::new(StepWaitHandler {
            state: self.state.clone(),
            coordinator: self.coordinator.clone(),
            run_id,
            step_index,
            adopted: adopted.clone(),
        }) as Arc<dyn WaitHandler>);

        // ── Stop watcher: cancels the step only ──────────────────────
        let step_token = outer.child_token();
        let stop_token = step_token.clone();
        let stop_store = self.state.store.clone();
        let stop_watch = tokio::spawn(async move {
            let mut chan = stop_store.loop_stop_chan(run_id);
            let mut tick = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = stop_token.cancelled() => break,
                    recv = chan.recv() => match recv {
                        Ok(()) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            stop_token.cancel();
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            chan = stop_store.loop_stop_chan(run_id);
                        }
                    },
                    _ = tick.tick() => {
                        let _ = stop_store.refresh();
                        if stop_store.is_loop_stopped(run_id) {
                            stop_token.cancel();
                        }
                    }
                }
            }
        });

        let span = tracing::info_span!(
            "loop_step",
            run_id,
            step_index,
            profile = %step.profile,
            position = %step.position,
        );
        let step_result = turn_loop.run(&step_token).instrument(span).await;
        step_token.cancel();
        let _ = stop_watch.await;

        // ── Step end bookkeeping (also on CallSupervisor) ────────────
        if step_result.is_ok() || matches!(step_result, Err(Error::CallSupervisor)) {
            if step.position == Position::Supervisor && !turn_loop.last_output().is_empty() {
                self.state.store.post_message(
                    run_id,
                    None,
                    step_index as i64,
                    "supervisor",
                    turn_loop.last_output(),
                )?;
            }

            if step.standalone_chat && !turn_loop.last_session().is_empty() {
                let session = turn_loop.last_session().to_string();
                self.state
                    .store
                    .update_loop_run(run_id, |r| r.chat_session_id = session.clone())?;
            }

            *previous = Some(ResumeKey {
                position: step.position,
                role: step.role.clone(),
                agent: profile.backend.clone(),
                session: turn_loop.last_session().to_string(),
            });

            // Adopt still-running handoffs for later steps.
            let _ = self.state.store.refresh();
            let mut newly = Vec::new();
            for turn_id in turn_loop.turn_ids() {
                for spawn in self.state.store.spawns_for_turn(*turn_id) {
                    if spawn.handoff && !spawn.is_terminal() {
                        newly.push(spawn.id);
                    }
                }
            }
            if !newly.is_empty() {
                tracing::info!(run_id, step_index, handoffs = newly.len(), "adopting handoffs");
                let mut list = adopted.lock();
                for id in newly {
                    if !list.contains(&id) {
                        list.push(id);
                    }
                }
            }
        }

        step_result
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message watermarking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Messages newly visible to a step: run-scoped, above the step's
/// watermark, and not originated by this step. Advances the watermark
/// past everything it scanned.
pub fn gather_unseen_messages(
    state: &OrchState,
    run_id: i64,
    step_index: usize,
) -> Result<Vec<LoopMessage>> {
    state.store.refresh()?;
    let run = state
        .store
        .get_loop_run(run_id)
        .ok_or_else(|| Error::Store(format!("loop run {run_id} not found")))?;
    let watermark = run.watermarks.get(&step_index).copied().unwrap_or(0);

    let all = state.store.messages_for_run(run_id, watermark);
    let visible: Vec<LoopMessage> = all
        .iter()
        .filter(|m| m.step_index != step_index as i64)
        .cloned()
        .collect();

    if let Some(max_id) = all.iter().map(|m| m.id).max() {
        state
            .store
            .update_loop_run(run_id, |r| {
                r.watermarks.insert(step_index, max_id);
            })?;
    }
    Ok(visible)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step wait handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The coordinator's primitive plus: adopted handoff results and
/// supervisor messages gathered at wait time.
struct StepWaitHandler {
    state: Arc<OrchState>,
    coordinator: Arc<SpawnCoordinator>,
    run_id: i64,
    step_index: usize,
    adopted: Arc<Mutex<Vec<i64>>>,
}

#[async_trait::async_trait]
impl WaitHandler for StepWaitHandler {
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

        // Terminal adopted handoffs are reported once, then dropped
        // from the adoption list.
        let candidates: Vec<i64> = self.adopted.lock().clone();
        for spawn_id in candidates {
            if already_seen.contains(&spawn_id) {
                continue;
            }
            if let Some(spawn) = self.state.store.get_spawn(spawn_id) {
                if spawn.is_terminal() {
                    outcome.results.push(terminal_result(&spawn));
                    self.adopted.lock().retain(|&id| id != spawn_id);
                }
            }
        }

        match gather_unseen_messages(&self.state, self.run_id, self.step_index) {
            Ok(messages) => outcome.messages.extend(messages),
            Err(e) => tracing::warn!(error = %e, "gathering supervisor messages failed"),
        }
        Ok(outcome)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step prompt assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_loop_step_prompt(
    state: &OrchState,
    loop_name: &str,
    run_id: i64,
    cycle: u32,
    step_index: usize,
    step: StepConfig,
    has_supervisor: bool,
) -> String {
    let messages = gather_unseen_messages(state, run_id, step_index).unwrap_or_default();

    let role_cfg = step.role.as_deref().and_then(|r| state.config.role(r));
    let profile_cfg = state.config.profile(&step.profile);

    let project = ProjectFacts {
        name: state.config.project.name.clone(),
        plan_id: state.config.project.plan_id.clone(),
    };
    let loop_facts = LoopFacts {
        name: loop_name.to_string(),
        cycle,
        step_index,
        total_steps: state
            .config
            .loops
            .get(loop_name)
            .map(|l| l.steps.len())
            .unwrap_or(0),
        resource_priority: state.config.project.resource_priority,
    };
    let facts = StepFacts {
        position: step.position,
        role: step.role.clone(),
        // Without a role, leads and workers write; managers and
        // supervisors delegate and observe.
        can_write_code: role_cfg.map(|r| r.can_write_code).unwrap_or(matches!(
            step.position,
            Position::Lead | Position::Worker
        )),
        read_only: role_cfg.map(|r| r.read_only).unwrap_or(false),
        role_rules: role_cfg.map(|r| r.rules.clone()).unwrap_or_default(),
        step_skills: step.skills.clone(),
        role_skills: role_cfg.map(|r| r.skills.clone()).unwrap_or_default(),
        profile_skills: profile_cfg.map(|p| p.skills.clone()).unwrap_or_default(),
        skills_explicit: step.skills_explicit,
        instructions: step.instructions.clone(),
        manual_prompt: step.manual_prompt.clone(),
        can_message: step.can_message,
        standalone_chat: step.standalone_chat,
    };
    let delegation: Vec<DelegationChild> = step
        .delegation
        .profiles
        .iter()
        .map(|p| DelegationChild {
            profile: p.profile.clone(),
            role: p.role.clone(),
            description: p
                .description
                .clone()
                .or_else(|| state.config.profile(&p.profile).and_then(|c| c.description.clone())),
            read_only: p.read_only,
            handoff: p.handoff,
        })
        .collect();
    let message_facts: Vec<MessageFacts> = messages
        .iter()
        .map(|m| MessageFacts {
            at: m.created_at,
            author: m.author.clone(),
            content: m.content.clone(),
        })
        .collect();

    build_step_prompt(&StepPromptInput {
        project: &project,
        loop_info: Some(&loop_facts),
        step: &facts,
        catalog: &state.config.prompt_rules,
        delegation: &delegation,
        loop_has_supervisor: has_supervisor,
        parent_turn_id: 0,
        messages: &message_facts,
        task: None,
        read_only: false,
    })
}
