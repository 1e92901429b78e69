//! Turn loop controller — drives one agent profile through up to
//! `max_turns` turns.
//!
//! A wait-resume continues the previous turn record without consuming a
//! turn slot; an interrupt re-entry starts a new turn, also without
//! consuming a slot. The reserved control payload ends the loop with
//! [`Error::CallSupervisor`] so the loop runner can move to the next
//! step.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use adaf_agents::{Invocation, Recorder};
use adaf_domain::{Error, Position, ResourcePriority, Result, CONTROL_CALL_SUPERVISOR};
use adaf_prompt::{build_resume_prompt, MessageFacts, ResumePromptInput, SpawnReport};
use adaf_store::{BuildState, LoopMessage, NewTurn};

use crate::state::OrchState;

use super::watcher::{spawn_watcher, WatcherOutcome};
use super::{summarize_objective, SpawnWaitResult, WaitHandler};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration and hooks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub type PromptFn = Box<dyn Fn(i64) -> String + Send + Sync>;
pub type TurnTokenHook = Box<dyn Fn(CancellationToken) + Send + Sync>;
pub type StopAfterFn = Box<dyn Fn(i64) -> bool + Send + Sync>;
pub type TurnCreatedHook = Box<dyn Fn(i64) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TurnLoopConfig {
    pub profile: String,
    /// Backend name resolved from the profile.
    pub agent: String,
    pub workdir: PathBuf,
    /// Environment overlay (profile env merged in by the caller).
    pub env: HashMap<String, String>,
    pub model: Option<String>,
    pub extra_args: Vec<String>,
    /// 0 = unbounded.
    pub max_turns: u32,
    /// Used when no prompt function is set.
    pub constant_prompt: String,
    pub loop_run_hex: String,
    pub step_hex: String,
    pub loop_run_id: Option<i64>,
    pub step_index: Option<usize>,
    /// Exposed as `ADAF_SESSION_ID` when non-zero.
    pub session_id: i64,
    pub position: Option<Position>,
    pub role: Option<String>,
    pub resource_priority: Option<ResourcePriority>,
    /// Exposed as `ADAF_DELEGATION_JSON` when set.
    pub delegation_json: Option<String>,
}

impl TurnLoopConfig {
    pub fn new(profile: &str, agent: &str, workdir: PathBuf) -> Self {
        Self {
            profile: profile.to_string(),
            agent: agent.to_string(),
            workdir,
            env: HashMap::new(),
            model: None,
            extra_args: Vec::new(),
            max_turns: 1,
            constant_prompt: String::new(),
            loop_run_hex: String::new(),
            step_hex: String::new(),
            loop_run_id: None,
            step_index: None,
            session_id: 0,
            position: None,
            role: None,
            resource_priority: None,
            delegation_json: None,
        }
    }
}

/// State carried from a waiting turn into its resume iteration.
struct PendingResume {
    turn_id: i64,
    turn_hex: String,
    seen: HashSet<i64>,
    reports: Vec<SpawnWaitResult>,
    messages: Vec<LoopMessage>,
    more_pending: bool,
    accumulated_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TurnLoop {
    state: Arc<OrchState>,
    config: TurnLoopConfig,
    /// Fresh-turn prompt; refreshed once per turn.
    pub prompt_fn: Option<PromptFn>,
    pub wait_handler: Option<Arc<dyn WaitHandler>>,
    /// In-process interrupt source. Store-posted interrupts are picked
    /// up by the watcher regardless.
    pub interrupt_rx: Option<mpsc::Receiver<String>>,
    /// Receives each turn's cancellation token for external
    /// turn-only cancellation.
    pub on_turn_token: Option<TurnTokenHook>,
    /// Graceful exit after a completed non-wait turn.
    pub stop_after_turn: Option<StopAfterFn>,
    pub on_turn_created: Option<TurnCreatedHook>,
    /// Forces the first turn into resume mode.
    pub resume_session: Option<String>,

    last_session: String,
    last_output: String,
    last_exit_code: Option<i32>,
    turn_ids: Vec<i64>,
}

impl TurnLoop {
    pub fn new(state: Arc<OrchState>, config: TurnLoopConfig) -> Self {
        Self {
            state,
            config,
            prompt_fn: None,
            wait_handler: None,
            interrupt_rx: None,
            on_turn_token: None,
            stop_after_turn: None,
            on_turn_created: None,
            resume_session: None,
            last_session: String::new(),
            last_output: String::new(),
            last_exit_code: None,
            turn_ids: Vec::new(),
        }
    }

    /// Session id of the last turn that produced one.
    pub fn last_session(&self) -> &str {
        &self.last_session
    }

    /// Final output of the last completed adapter call.
    pub fn last_output(&self) -> &str {
        &self.last_output
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// Ids of all turns created by this controller.
    pub fn turn_ids(&self) -> &[i64] {
        &self.turn_ids
    }

    pub async fn run(&mut self, outer: &CancellationToken) -> Result<()> {
        let mut turns_done: u32 = 0;
        let mut last_session = self.resume_session.take().unwrap_or_default();
        let mut pending_wait: Option<PendingResume> = None;
        let mut pending_interrupts: VecDeque<String> = VecDeque::new();

        loop {
            if outer.is_cancelled() {
                return Err(Error::Canceled);
            }
            if self.config.max_turns > 0 && turns_done >= self.config.max_turns {
                return Ok(());
            }

            // ── Turn identity ────────────────────────────────────────
            let resumed = pending_wait.take();
            let is_wait_resume = resumed.is_some();
            let (turn_id, turn_hex, mut seen, accumulated_ms, reports, messages, more_pending) =
                match resumed {
                    Some(p) => (
                        p.turn_id,
                        p.turn_hex,
                        p.seen,
                        p.accumulated_ms,
                        p.reports,
                        p.messages,
                        p.more_pending,
                    ),
                    None => {
                        let turn = self.state.store.create_turn(NewTurn {
                            profile: self.config.profile.clone(),
                            agent: self.config.agent.clone(),
                            loop_run_hex: self.config.loop_run_hex.clone(),
                            step_hex: self.config.step_hex.clone(),
                            objective: String::new(),
                        })?;
                        if let Some(hook) = &self.on_turn_created {
                            hook(turn.id);
                        }
                        self.turn_ids.push(turn.id);
                        (
                            turn.id,
                            turn.hex_id,
                            HashSet::new(),
                            0,
                            Vec::new(),
                            Vec::new(),
                            false,
                        )
                    }
                };

            // ── Prompt ───────────────────────────────────────────────
            let interrupt_text = pending_interrupts.pop_front();
            let resume_mode = !last_session.is_empty();

            let spawn_reports: Vec<SpawnReport> = reports.iter().map(to_report).collect();
            let message_facts: Vec<MessageFacts> = messages
                .iter()
                .map(|m| MessageFacts {
                    at: m.created_at,
                    author: m.author.clone(),
                    content: m.content.clone(),
                })
                .collect();
            let trailer = build_resume_prompt(&ResumePromptInput {
                include_continue_lead: resume_mode && !is_wait_resume,
                interrupt: interrupt_text.as_deref(),
                wait_results: &spawn_reports,
                more_pending,
                messages: &message_facts,
            });

            let prompt = if resume_mode {
                trailer
            } else {
                let mut p = match &self.prompt_fn {
                    Some(f) => f(turn_id),
                    None => self.config.constant_prompt.clone(),
                };
                if !trailer.is_empty() {
                    p.push_str("\n\n");
                    p.push_str(&trailer);
                }
                p
            };

            if !is_wait_resume {
                let objective = summarize_objective(&prompt);
                self.state.store.update_turn(turn_id, |t| {
                    t.objective = objective.clone();
                })?;
            }

            // ── Effective environment ────────────────────────────────
            let env = self.build_env(turn_id, &turn_hex);

            // ── Recorder + watcher ───────────────────────────────────
            let recorder = Recorder::new(&self.state.records_dir(), &turn_hex);
            recorder.record_meta(
                "turn_start",
                serde_json::json!({
                    "turn_id": turn_id,
                    "profile": self.config.profile,
                    "agent": self.config.agent,
                    "resume": resume_mode,
                    "wait_resume": is_wait_resume,
                }),
            );

            let turn_token = outer.child_token();
            if let Some(hook) = &self.on_turn_token {
                hook(turn_token.clone());
            }
            let watcher = spawn_watcher(
                self.state.store.clone(),
                turn_id,
                turn_token.clone(),
                self.interrupt_rx.take(),
            );

            // ── Adapter call ─────────────────────────────────────────
            let agent = self
                .state
                .agents
                .get(&self.config.agent)
                .ok_or_else(|| Error::Config(format!("unknown agent backend '{}'", self.config.agent)))?;

            let invocation = Invocation {
                workdir: self.config.workdir.clone(),
                prompt,
                env,
                resume_session_id: if resume_mode {
                    Some(last_session.clone())
                } else {
                    None
                },
                model: self.config.model.clone(),
                extra_args: self.config.extra_args.clone(),
            };

            let span = tracing::info_span!(
                "turn",
                turn_id,
                profile = %self.config.profile,
                resume = resume_mode,
            );
            eprintln!("DEBUG before agent.run turn_id={turn_id}");
            let run_result = agent
                .run(&turn_token, &invocation, &recorder)
                .instrument(span)
                .await;
            eprintln!("DEBUG after agent.run turn_id={turn_id} result={:?}", run_result.is_ok());

            // ── Teardown: cancel, join watcher, flush ────────────────
            turn_token.cancel();
            eprintln!("DEBUG before watcher.await turn_id={turn_id}");
            let (rx_back, watcher_outcome) = match watcher.await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "wait watcher panicked");
                    (None, WatcherOutcome::default())
                }
            };
            self.interrupt_rx = rx_back;
            pending_interrupts.extend(watcher_outcome.interrupts);

            match &run_result {
                Ok(r) => {
                    recorder.record_meta("exit_code", serde_json::json!(r.exit_code));
                    recorder
                        .record_meta("duration_ms", serde_json::json!(r.duration.as_millis() as u64));
                    if let Some(sid) = &r.agent_session_id {
                        recorder.record_meta("agent_session_id", serde_json::json!(sid));
                    }
                }
                Err(e) => recorder.record_meta("run_error", serde_json::json!(e.to_string())),
            }
            let flush_err = recorder.flush().err();

            // ── Waiting determination ────────────────────────────────
            if let Err(e) = self.state.store.refresh() {
                tracing::warn!(error = %e, "store refresh failed after turn");
            }
            let hard_error = matches!(&run_result, Err(e) if !e.is_canceled());
            let explicit_wait = self.state.store.is_waiting(turn_id);
            let inferred_wait = self
                .state
                .store
                .spawns_for_turn(turn_id)
                .iter()
                .any(|s| !s.is_terminal() && !s.handoff);
            let waiting =
                !hard_error && (explicit_wait || watcher_outcome.wait_triggered || inferred_wait);
            if waiting && !explicit_wait && !watcher_outcome.wait_triggered {
                tracing::debug!(turn_id, "waiting inferred from running child spawns");
            }

            // ── Session resume capture ───────────────────────────────
            if let Ok(r) = &run_result {
                if let Some(sid) = &r.agent_session_id {
                    if !sid.is_empty() {
                        last_session = sid.clone();
                    }
                }
                self.last_output = r.output.clone();
                self.last_exit_code = Some(r.exit_code);
            }
            self.last_session = last_session.clone();

            // ── Authoritative turn update ────────────────────────────
            let iter_ms = match &run_result {
                Ok(r) => r.duration.as_millis() as u64,
                Err(_) => 0,
            };
            let total_ms = accumulated_ms + iter_ms;
            let build_state = if waiting {
                BuildState::WaitingForSpawns
            } else {
                match &run_result {
                    Ok(r) if r.exit_code == 0 => BuildState::Success,
                    Ok(r) => BuildState::ExitCode(r.exit_code),
                    Err(e) if e.is_canceled() => BuildState::Cancelled,
                    Err(_) => BuildState::Error,
                }
            };
            let finalize = !waiting && run_result.is_ok();
            let session_for_record = last_session.clone();
            self.state.store.update_turn(turn_id, |t| {
                t.build_state = build_state;
                t.duration_ms = total_ms;
                if !session_for_record.is_empty() {
                    t.resume_session_id = session_for_record.clone();
                }
                if finalize {
                    t.finalized_at = Some(Utc::now());
                }
            })?;

            // ── Dispatch ─────────────────────────────────────────────
            if hard_error {
                self.state.store.cleanup_wait_chan(turn_id);
                let err = run_result.err().expect("hard error checked");
                let mut message = err.to_string();
                if let Some(fe) = flush_err {
                    message.push_str(&format!("; recorder flush failed: {fe}"));
                }
                return Err(Error::Agent { turn_id, message });
            }

            if waiting {
                self.state.store.clear_wait(turn_id)?;
                let Some(handler) = self.wait_handler.clone() else {
                    tracing::warn!(turn_id, "wait signalled but no wait handler; treating turn as complete");
                    turns_done += 1;
                    continue;
                };
                let outcome = handler.wait(outer, turn_id, &seen).await?;
                for result in &outcome.results {
                    if !result.is_review() {
                        seen.insert(result.spawn_id);
                    }
                }
                pending_wait = Some(PendingResume {
                    turn_id,
                    turn_hex,
                    seen,
                    reports: outcome.results,
                    messages: outcome.messages,
                    more_pending: outcome.more_pending,
                    accumulated_ms: total_ms,
                });
                continue; // no turn increment
            }

            if let Some(flush_e) = flush_err {
                // Non-fatal on the happy path.
                tracing::warn!(turn_id, error = %flush_e, "recorder flush failed");
            }

            if run_result.is_err() {
                // Cancellation without a wait signal.
                if let Some(payload) = pending_interrupts.front() {
                    if payload == CONTROL_CALL_SUPERVISOR {
                        pending_interrupts.pop_front();
                        self.state.store.cleanup_wait_chan(turn_id);
                        return Err(Error::CallSupervisor);
                    }
                    tracing::debug!(turn_id, "interrupt pending, re-entering without increment");
                    continue; // payload consumed on the next iteration
                }
                if outer.is_cancelled() {
                    self.state.store.cleanup_wait_chan(turn_id);
                    return Err(Error::Canceled);
                }
                if self.on_turn_token.is_some() {
                    tracing::debug!(turn_id, "turn-only cancellation, continuing");
                    continue; // no turn increment
                }
                self.state.store.cleanup_wait_chan(turn_id);
                return Err(Error::Canceled);
            }

            // Turn fully completed.
            self.state.store.cleanup_wait_chan(turn_id);
            if let Some(stop) = &self.stop_after_turn {
                if stop(turn_id) {
                    tracing::debug!(turn_id, "stop-after-turn requested, exiting loop");
                    return Ok(());
                }
            }
            turns_done += 1;
        }
    }

    fn build_env(&self, turn_id: i64, turn_hex: &str) -> HashMap<String, String> {
        let mut env = self.config.env.clone();
        env.insert("ADAF_AGENT".into(), "1".into());
        env.insert("ADAF_TURN_ID".into(), turn_id.to_string());
        env.insert("ADAF_TURN_HEX_ID".into(), turn_hex.to_string());
        env.insert(
            "ADAF_PROJECT_DIR".into(),
            self.state.project_dir.display().to_string(),
        );
        env.insert("ADAF_PROFILE".into(), self.config.profile.clone());

        let plan_id = &self.state.config.project.plan_id;
        if !plan_id.is_empty() {
            env.insert("ADAF_PLAN_ID".into(), plan_id.clone());
        }
        if !self.config.loop_run_hex.is_empty() {
            env.insert("ADAF_LOOP_RUN_HEX_ID".into(), self.config.loop_run_hex.clone());
        }
        if !self.config.step_hex.is_empty() {
            env.insert("ADAF_LOOP_STEP_HEX_ID".into(), self.config.step_hex.clone());
        }
        if let Some(run_id) = self.config.loop_run_id {
            env.insert("ADAF_LOOP_RUN_ID".into(), run_id.to_string());
        }
        if let Some(idx) = self.config.step_index {
            env.insert("ADAF_LOOP_STEP_INDEX".into(), idx.to_string());
        }
        if self.config.session_id != 0 {
            env.insert("ADAF_SESSION_ID".into(), self.config.session_id.to_string());
        }
        if let Some(position) = self.config.position {
            env.insert("ADAF_POSITION".into(), position.to_string());
        }
        if let Some(role) = &self.config.role {
            env.insert("ADAF_ROLE".into(), role.clone());
        }
        if let Some(priority) = self.config.resource_priority {
            env.insert("ADAF_RESOURCE_PRIORITY".into(), priority.to_string());
        }
        if let Some(delegation) = &self.config.delegation_json {
            env.insert("ADAF_DELEGATION_JSON".into(), delegation.clone());
        }
        env
    }
}

fn to_report(result: &SpawnWaitResult) -> SpawnReport {
    SpawnReport {
        id: result.spawn_id,
        profile: result.profile.clone(),
        status: result.status.as_str().to_string(),
        exit_code: result.exit_code,
        read_only: result.read_only,
        branch: result.branch.clone(),
        summary: result.summary.clone(),
        result: result.result.clone(),
        review: result.review.clone(),
    }
}
