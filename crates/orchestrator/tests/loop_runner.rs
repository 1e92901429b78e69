//! Loop runner behavior: session continuity across steps, supervisor
//! message watermarking, and stop / wind-down signals.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use adaf_orchestrator::runtime::loop_runner::gather_unseen_messages;
use adaf_orchestrator::runtime::{LoopRunner, SpawnCoordinator};
use adaf_store::LoopRunStatus;

use common::{harness, ScriptStep};

const LOOP_CONFIG: &str = r#"
[project]
name = "demo"
plan_id = "plan-1"

[profiles.dev]
backend = "stub"

[loops.main]
max_cycles = 1

[[loops.main.steps]]
profile = "dev"
position = "lead"
role = "developer"
instructions = "Implement the milestone."

[[loops.main.steps]]
profile = "dev"
position = "lead"
role = "developer"
instructions = "Review and refine."

[roles.developer]
can_write_code = true
"#;

// ── Session continuity across same-key steps ──────────────────────────

#[tokio::test]
async fn same_role_steps_resume_the_session() {
    let h = harness(
        LOOP_CONFIG,
        vec![ScriptStep::ok("sess-step1"), ScriptStep::ok("sess-step2")],
    );
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let runner = LoopRunner::new(h.state.clone(), coordinator, "main").unwrap();

    let run_id = runner.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(h.agent.call_count(), 2);
    let first = h.agent.call(0);
    assert!(first.resume_session_id.is_none());
    assert!(first.prompt.contains("Implement the milestone."));
    assert!(first.prompt.contains("There is no human in the loop."));

    // Same (position, role, agent): the second step resumes.
    let second = h.agent.call(1);
    assert_eq!(second.resume_session_id.as_deref(), Some("sess-step1"));
    assert!(second.prompt.starts_with("Continue from where you left off."));

    let run = h.state.store.get_loop_run(run_id).unwrap();
    assert_eq!(run.status, LoopRunStatus::Stopped);
    assert!(run.stopped_at.is_some());
    assert_eq!(run.cycle, 1);
}

#[tokio::test]
async fn different_position_starts_fresh() {
    let config = LOOP_CONFIG.replace(
        "position = \"lead\"\nrole = \"developer\"\ninstructions = \"Review and refine.\"",
        "position = \"manager\"\nrole = \"developer\"\ninstructions = \"Review and refine.\"",
    );
    let h = harness(&config, vec![ScriptStep::ok("sess-1"), ScriptStep::ok("sess-2")]);
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let runner = LoopRunner::new(h.state.clone(), coordinator, "main").unwrap();

    runner.run(&CancellationToken::new()).await.unwrap();

    let second = h.agent.call(1);
    assert!(second.resume_session_id.is_none());
}

// ── Loop env plumbing ─────────────────────────────────────────────────

#[tokio::test]
async fn loop_steps_expose_run_and_step_env() {
    let h = harness(LOOP_CONFIG, vec![ScriptStep::ok("s1"), ScriptStep::ok("s2")]);
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let runner = LoopRunner::new(h.state.clone(), coordinator, "main").unwrap();

    let run_id = runner.run(&CancellationToken::new()).await.unwrap();
    let run = h.state.store.get_loop_run(run_id).unwrap();

    let call = h.agent.call(0);
    assert_eq!(call.env.get("ADAF_AGENT").map(String::as_str), Some("1"));
    assert_eq!(
        call.env.get("ADAF_LOOP_RUN_ID").map(String::as_str),
        Some(run_id.to_string().as_str())
    );
    assert_eq!(
        call.env.get("ADAF_LOOP_RUN_HEX_ID").map(String::as_str),
        Some(run.hex_id.as_str())
    );
    assert_eq!(call.env.get("ADAF_LOOP_STEP_INDEX").map(String::as_str), Some("0"));
    assert_eq!(call.env.get("ADAF_POSITION").map(String::as_str), Some("lead"));
    assert_eq!(call.env.get("ADAF_PLAN_ID").map(String::as_str), Some("plan-1"));
    assert!(call.env.get("ADAF_TURN_ID").is_some());
    assert!(call.env.get("ADAF_SESSION_ID").is_none());
}

// ── S6: supervisor message watermarking ───────────────────────────────

#[tokio::test]
async fn gather_unseen_messages_watermarks_per_step() {
    let h = harness(LOOP_CONFIG, vec![]);
    let run = h.state.store.create_loop_run("main", "test").unwrap();

    let m1 = h
        .state
        .store
        .post_message(run.id, None, 1, "supervisor", "m1")
        .unwrap();
    let m2 = h
        .state
        .store
        .post_message(run.id, None, 1, "supervisor", "m2")
        .unwrap();

    // Step 0 sees both messages from step 1.
    let visible = gather_unseen_messages(&h.state, run.id, 0).unwrap();
    assert_eq!(
        visible.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![m1.id, m2.id]
    );

    // Watermarked: a new message from step 2 yields just that one.
    let m3 = h
        .state
        .store
        .post_message(run.id, None, 2, "supervisor", "m3")
        .unwrap();
    let visible = gather_unseen_messages(&h.state, run.id, 0).unwrap();
    assert_eq!(visible.iter().map(|m| m.id).collect::<Vec<_>>(), vec![m3.id]);
}

#[tokio::test]
async fn own_step_messages_are_filtered_out() {
    let h = harness(LOOP_CONFIG, vec![]);
    let run = h.state.store.create_loop_run("main", "test").unwrap();

    h.state
        .store
        .post_message(run.id, None, 1, "supervisor", "own")
        .unwrap();
    let visible = gather_unseen_messages(&h.state, run.id, 1).unwrap();
    assert!(visible.is_empty());
}

#[tokio::test]
async fn supervisor_output_reaches_later_prompts() {
    let config = r#"
[project]
name = "demo"

[profiles.dev]
backend = "stub"

[loops.main]
max_cycles = 2

[[loops.main.steps]]
profile = "dev"
position = "lead"
instructions = "Build."

[[loops.main.steps]]
profile = "dev"
position = "supervisor"
instructions = "Assess."
"#;
    let h = harness(
        config,
        vec![
            ScriptStep::ok("c1-lead"),
            ScriptStep::ok_with_output("c1-sup", "focus on the parser"),
            ScriptStep::ok("c2-lead"),
            ScriptStep::ok("c2-sup"),
        ],
    );
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let runner = LoopRunner::new(h.state.clone(), coordinator, "main").unwrap();

    runner.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(h.agent.call_count(), 4);

    // Cycle 2's lead step sees the supervisor's cycle-1 output.
    let cycle2_lead = h.agent.call(2);
    assert!(cycle2_lead.prompt.contains("# Supervisor Messages"));
    assert!(cycle2_lead.prompt.contains("focus on the parser"));
}

// ── Stop and wind-down signals ────────────────────────────────────────

#[tokio::test]
async fn pre_stopped_run_executes_no_steps() {
    let h = harness(LOOP_CONFIG, vec![ScriptStep::ok("s")]);
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let runner = LoopRunner::new(h.state.clone(), coordinator, "main").unwrap();

    // The first run id will be 1; stop it before it starts stepping.
    h.state.store.signal_loop_stop(1).unwrap();
    let run_id = runner.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(run_id, 1);
    assert_eq!(h.agent.call_count(), 0);
}

#[tokio::test]
async fn wind_down_prevents_further_cycles() {
    let config = LOOP_CONFIG.replace("max_cycles = 1", "max_cycles = 3");
    let h = harness(
        &config,
        vec![
            ScriptStep::ok("s1"),
            ScriptStep::ok("s2"),
            ScriptStep::ok("s3"),
            ScriptStep::ok("s4"),
        ],
    );
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let runner = LoopRunner::new(h.state.clone(), coordinator, "main").unwrap();

    // Wind-down is checked at cycle start: signalled up front, the run
    // ends before any step executes.
    h.state.store.signal_wind_down(1).unwrap();
    runner.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(h.agent.call_count(), 0);
}

#[tokio::test]
async fn stop_mid_step_cancels_and_stops_cleanly() {
    let h = harness(LOOP_CONFIG, vec![ScriptStep::Block, ScriptStep::ok("s2")]);
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let runner = LoopRunner::new(h.state.clone(), coordinator, "main").unwrap();

    let state = h.state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        state.store.signal_loop_stop(1).unwrap();
    });

    let run_id = tokio::time::timeout(
        Duration::from_secs(6),
        runner.run(&CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    // The blocked step was cancelled; the loop ended without an error
    // and without running the second step.
    assert_eq!(run_id, 1);
    assert_eq!(h.agent.call_count(), 1);
    let run = h.state.store.get_loop_run(run_id).unwrap();
    assert_eq!(run.status, LoopRunStatus::Stopped);
}
