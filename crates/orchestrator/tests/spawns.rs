//! Spawn coordinator behavior: wait-for-any-unseen semantics, handoff
//! exclusion, and child execution.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use adaf_domain::{Error, Position};
use adaf_orchestrator::runtime::{CreateSpawnRequest, SpawnCoordinator};
use adaf_store::{NewSpawn, SpawnStatus};

use common::{harness, Harness, ScriptStep, DEV_CONFIG};

fn seed_spawn(h: &Harness, parent_turn_id: i64, handoff: bool) -> i64 {
    h.state
        .store
        .create_spawn(NewSpawn {
            parent_turn_id,
            profile: "dev".into(),
            parent_profile: "dev".into(),
            task: "work".into(),
            read_only: true,
            handoff,
            ..Default::default()
        })
        .unwrap()
        .id
}

fn finish(h: &Harness, spawn_id: i64, status: SpawnStatus, summary: &str) {
    h.state
        .store
        .update_spawn(spawn_id, |s| {
            s.status = status;
            s.exit_code = Some(if status == SpawnStatus::Completed { 0 } else { 1 });
            s.summary = summary.to_string();
        })
        .unwrap();
}

// ── P1 / S5: wait-for-any incremental ─────────────────────────────────

#[tokio::test]
async fn wait_for_any_unseen_is_incremental_and_monotonic() {
    let h = harness(DEV_CONFIG, vec![]);
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let cancel = CancellationToken::new();

    let a = seed_spawn(&h, 7, false);
    let b = seed_spawn(&h, 7, false);
    let c = seed_spawn(&h, 7, false);
    finish(&h, a, SpawnStatus::Completed, "A done");
    finish(&h, b, SpawnStatus::Completed, "B done");
    h.state
        .store
        .update_spawn(c, |s| s.status = SpawnStatus::Running)
        .unwrap();

    // First call: the two finished spawns, C still pending.
    let seen = HashSet::new();
    let first = coordinator.wait_for_any_unseen(&cancel, 7, &seen).await.unwrap();
    let mut ids: Vec<i64> = first.results.iter().map(|r| r.spawn_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![a, b]);
    assert!(first.more_pending);

    // Second call blocks until C terminates.
    let seen: HashSet<i64> = [a, b].into();
    let state = h.state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        state
            .store
            .update_spawn(c, |s| {
                s.status = SpawnStatus::Completed;
                s.exit_code = Some(0);
                s.summary = "C done".into();
            })
            .unwrap();
    });
    let second = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.wait_for_any_unseen(&cancel, 7, &seen),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(second.results.len(), 1);
    assert_eq!(second.results[0].spawn_id, c);
    assert_eq!(second.results[0].summary, "C done");
    assert!(!second.more_pending);

    // Third call: nothing unseen, nothing pending.
    let seen: HashSet<i64> = [a, b, c].into();
    let third = coordinator.wait_for_any_unseen(&cancel, 7, &seen).await.unwrap();
    assert!(third.results.is_empty());
    assert!(!third.more_pending);
}

// ── P6: handoff exclusion ─────────────────────────────────────────────

#[tokio::test]
async fn handoffs_never_block_the_wait() {
    let h = harness(DEV_CONFIG, vec![]);
    let coordinator = SpawnCoordinator::new(h.state.clone());
    let cancel = CancellationToken::new();

    let done = seed_spawn(&h, 3, false);
    let handoff = seed_spawn(&h, 3, true);
    finish(&h, done, SpawnStatus::Completed, "done");
    h.state
        .store
        .update_spawn(handoff, |s| s.status = SpawnStatus::Running)
        .unwrap();

    let seen = HashSet::new();
    let outcome = coordinator.wait_for_any_unseen(&cancel, 3, &seen).await.unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].spawn_id, done);
    // Only the running handoff remains: morePending is false.
    assert!(!outcome.more_pending);

    // With everything seen, the call returns empty immediately even
    // though the handoff is still running.
    let seen: HashSet<i64> = [done].into();
    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        coordinator.wait_for_any_unseen(&cancel, 3, &seen),
    )
    .await
    .expect("must not block on handoffs")
    .unwrap();
    assert!(outcome.results.is_empty());
    assert!(!outcome.more_pending);
}

#[tokio::test]
async fn terminal_handoffs_are_reported() {
    let h = harness(DEV_CONFIG, vec![]);
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let handoff = seed_spawn(&h, 4, true);
    finish(&h, handoff, SpawnStatus::Completed, "background work");

    let outcome = coordinator
        .wait_for_any_unseen(&CancellationToken::new(), 4, &HashSet::new())
        .await
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].spawn_id, handoff);
    assert!(!outcome.more_pending);
}

// ── Cancellation ──────────────────────────────────────────────────────

#[tokio::test]
async fn wait_respects_cancellation() {
    let h = harness(DEV_CONFIG, vec![]);
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let running = seed_spawn(&h, 5, false);
    h.state
        .store
        .update_spawn(running, |s| s.status = SpawnStatus::Running)
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.wait_for_any_unseen(&cancel, 5, &HashSet::new()),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

// ── create_spawn validation ───────────────────────────────────────────

#[tokio::test]
async fn create_spawn_rejects_unknown_profile() {
    let h = harness(DEV_CONFIG, vec![]);
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let err = coordinator
        .create_spawn(CreateSpawnRequest {
            parent_turn_id: 1,
            profile: "ghost".into(),
            task: Some("x".into()),
            read_only: true,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProfileNotFound(p) if p == "ghost"));
}

#[tokio::test]
async fn create_spawn_requires_a_task() {
    let h = harness(DEV_CONFIG, vec![]);
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let err = coordinator
        .create_spawn(CreateSpawnRequest {
            parent_turn_id: 1,
            profile: "dev".into(),
            read_only: true,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn create_spawn_reads_task_file_and_defaults() {
    let h = harness(DEV_CONFIG, vec![]);
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let task_path = h.dir.path().join("task.md");
    std::fs::write(&task_path, "investigate flaky test").unwrap();

    let spawn = coordinator
        .create_spawn(CreateSpawnRequest {
            parent_turn_id: 2,
            parent_profile: "dev".into(),
            parent_position: Position::Lead,
            profile: "dev".into(),
            task_file: Some(task_path),
            read_only: true,
            issues: vec![42],
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(spawn.task, "investigate flaky test");
    assert_eq!(spawn.status, SpawnStatus::Pending);
    assert!(spawn.branch.is_empty());
    assert_eq!(spawn.issues, vec![42]);
    assert_eq!(spawn.parent_position, Position::Lead);
}

// ── Child execution (read-only, stub agent) ───────────────────────────

#[tokio::test]
async fn run_spawn_executes_child_and_records_outcome() {
    let h = harness(
        DEV_CONFIG,
        vec![ScriptStep::ok_with_output("child-sess", "scouting report")],
    );
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let spawn = coordinator
        .create_spawn(CreateSpawnRequest {
            parent_turn_id: 1,
            parent_profile: "dev".into(),
            profile: "dev".into(),
            role: None,
            task: Some("map the modules".into()),
            read_only: true,
            ..Default::default()
        })
        .await
        .unwrap();

    coordinator
        .run_spawn(spawn.id, CancellationToken::new())
        .await
        .unwrap();

    let finished = h.state.store.get_spawn(spawn.id).unwrap();
    assert_eq!(finished.status, SpawnStatus::Completed);
    assert_eq!(finished.exit_code, Some(0));
    assert_eq!(finished.summary, "scouting report");
    assert!(finished.started_at.is_some());
    assert!(finished.completed_at.is_some());
    assert!(finished.child_turn_id.is_some());

    // The child saw a sub-agent prompt with the task.
    let call = h.agent.call(0);
    assert!(call.prompt.starts_with("You are a sub-agent"));
    assert!(call.prompt.contains("# Task"));
    assert!(call.prompt.contains("map the modules"));
    assert!(call.prompt.contains("read-only"));
}

#[tokio::test]
async fn run_spawn_nonzero_exit_is_failed() {
    let h = harness(
        DEV_CONFIG,
        vec![ScriptStep::Complete {
            exit_code: 2,
            output: "could not finish".into(),
            session: None,
        }],
    );
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let spawn = coordinator
        .create_spawn(CreateSpawnRequest {
            parent_turn_id: 1,
            profile: "dev".into(),
            task: Some("try".into()),
            read_only: true,
            ..Default::default()
        })
        .await
        .unwrap();

    coordinator
        .run_spawn(spawn.id, CancellationToken::new())
        .await
        .unwrap();

    let finished = h.state.store.get_spawn(spawn.id).unwrap();
    assert_eq!(finished.status, SpawnStatus::Failed);
    assert_eq!(finished.exit_code, Some(2));
}

#[tokio::test]
async fn run_spawn_is_idempotent() {
    let h = harness(DEV_CONFIG, vec![ScriptStep::ok("s")]);
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let spawn = coordinator
        .create_spawn(CreateSpawnRequest {
            parent_turn_id: 1,
            profile: "dev".into(),
            task: Some("once".into()),
            read_only: true,
            ..Default::default()
        })
        .await
        .unwrap();

    coordinator
        .run_spawn(spawn.id, CancellationToken::new())
        .await
        .unwrap();
    // Second launch sees a terminal spawn and does nothing.
    coordinator
        .run_spawn(spawn.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.agent.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_spawn_times_out() {
    let h = harness(DEV_CONFIG, vec![ScriptStep::Block]);
    let coordinator = SpawnCoordinator::new(h.state.clone());

    let spawn = coordinator
        .create_spawn(CreateSpawnRequest {
            parent_turn_id: 1,
            profile: "dev".into(),
            task: Some("never finishes".into()),
            read_only: true,
            timeout_minutes: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

    coordinator
        .run_spawn(spawn.id, CancellationToken::new())
        .await
        .unwrap();

    let finished = h.state.store.get_spawn(spawn.id).unwrap();
    assert_eq!(finished.status, SpawnStatus::Timeout);
    assert!(finished.result.contains("timed out"));
}
