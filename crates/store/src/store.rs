//! The persistent store. Every record kind lives in one append-only
//! JSONL file; each update appends the full record and replay keeps the
//! last record per id. A `store.lock` file (exclusive flock) serializes
//! id allocation and appends across processes, and [`Store::refresh`]
//! tails the files so a long-lived process sees records appended by the
//! agent-invoked `adaf` CLI.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::Serialize;

use adaf_domain::{Error, Result};

use crate::records::{
    BuildState, Interrupt, LoopMessage, LoopRun, LoopRunStatus, NewSpawn, NewTurn, Spawn,
    SpawnStatus, Turn,
};
use crate::signals::{Signals, SpawnEvent};
use crate::short_hex_id;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Turns,
    Spawns,
    LoopRuns,
    Messages,
    Interrupts,
}

impl Kind {
    const ALL: [Kind; 5] = [
        Kind::Turns,
        Kind::Spawns,
        Kind::LoopRuns,
        Kind::Messages,
        Kind::Interrupts,
    ];

    fn file_name(self) -> &'static str {
        match self {
            Self::Turns => "turns.jsonl",
            Self::Spawns => "spawns.jsonl",
            Self::LoopRuns => "loop_runs.jsonl",
            Self::Messages => "loop_messages.jsonl",
            Self::Interrupts => "interrupts.jsonl",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Store {
    root: PathBuf,
    /// Held open for the process lifetime; locked per write transaction.
    lock_file: File,
    inner: RwLock<Inner>,
    signals: Signals,
}

struct Inner {
    turns: BTreeMap<i64, Turn>,
    spawns: BTreeMap<i64, Spawn>,
    loop_runs: BTreeMap<i64, LoopRun>,
    messages: BTreeMap<i64, LoopMessage>,
    interrupts: BTreeMap<i64, Interrupt>,
    /// Bytes consumed per record file; refresh reads from here.
    offsets: HashMap<&'static str, u64>,
}

impl Store {
    /// Open (or initialize) the store under `<state_path>/store`.
    pub fn open(state_path: &Path) -> Result<Self> {
        let root = state_path.join("store");
        std::fs::create_dir_all(&root)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(root.join("store.lock"))?;

        let signals = Signals::new(&root.join("signals"))?;

        let store = Self {
            root,
            lock_file,
            inner: RwLock::new(Inner {
                turns: BTreeMap::new(),
                spawns: BTreeMap::new(),
                loop_runs: BTreeMap::new(),
                messages: BTreeMap::new(),
                interrupts: BTreeMap::new(),
                offsets: HashMap::new(),
            }),
            signals,
        };
        store.refresh()?;
        Ok(store)
    }

    /// Read records appended by other processes since the last call.
    pub fn refresh(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.refresh_inner(&mut inner)
    }

    fn refresh_inner(&self, inner: &mut Inner) -> Result<()> {
        for kind in Kind::ALL {
            let path = self.root.join(kind.file_name());
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let offset = inner.offsets.get(kind.file_name()).copied().unwrap_or(0);
            let len = file.metadata()?.len();
            if len <= offset {
                continue;
            }

            let mut reader = BufReader::new(file);
            reader.seek(SeekFrom::Start(offset))?;
            let mut consumed = offset;
            let mut line = String::new();
            loop {
                line.clear();
                let n = reader.read_line(&mut line)?;
                if n == 0 {
                    break;
                }
                // A writer may be mid-append; only consume full lines.
                if !line.ends_with('\n') {
                    break;
                }
                consumed += n as u64;
                self.apply_line(inner, kind, line.trim_end());
            }
            inner.offsets.insert(kind.file_name(), consumed);
        }
        Ok(())
    }

    fn apply_line(&self, inner: &mut Inner, kind: Kind, line: &str) {
        if line.is_empty() {
            return;
        }
        match kind {
            Kind::Turns => match serde_json::from_str::<Turn>(line) {
                Ok(turn) => {
                    inner.turns.insert(turn.id, turn);
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed turn record"),
            },
            Kind::Spawns => match serde_json::from_str::<Spawn>(line) {
                Ok(spawn) => {
                    let old_status = inner.spawns.get(&spawn.id).map(|s| s.status);
                    if old_status != Some(spawn.status) {
                        self.signals.emit_spawn_event(SpawnEvent {
                            spawn_id: spawn.id,
                            parent_turn_id: spawn.parent_turn_id,
                            status: spawn.status,
                        });
                    }
                    inner.spawns.insert(spawn.id, spawn);
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed spawn record"),
            },
            Kind::LoopRuns => match serde_json::from_str::<LoopRun>(line) {
                Ok(run) => {
                    inner.loop_runs.insert(run.id, run);
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed loop run record"),
            },
            Kind::Messages => match serde_json::from_str::<LoopMessage>(line) {
                Ok(msg) => {
                    inner.messages.insert(msg.id, msg);
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed loop message"),
            },
            Kind::Interrupts => match serde_json::from_str::<Interrupt>(line) {
                Ok(intr) => {
                    inner.interrupts.insert(intr.id, intr);
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed interrupt"),
            },
        }
    }

    /// Run a write transaction: exclusive cross-process lock, refresh,
    /// then the mutation. All id allocation happens inside one of these.
    fn with_lock<R>(&self, f: impl FnOnce(&mut Inner) -> Result<R>) -> Result<R> {
        let mut inner = self.inner.write();
        self.lock_file
            .lock_exclusive()
            .map_err(|e| Error::Store(format!("acquiring store lock: {e}")))?;
        let result = self
            .refresh_inner(&mut inner)
            .and_then(|()| f(&mut inner));
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            tracing::warn!(error = %e, "failed to release store lock");
        }
        result
    }

    /// Append a record and mark its bytes as consumed. Only call while
    /// holding the write lock.
    fn persist<T: Serialize>(&self, inner: &mut Inner, kind: Kind, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let path = self.root.join(kind.file_name());
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{json}")?;
        file.flush()?;
        inner.offsets.insert(kind.file_name(), file.metadata()?.len());
        Ok(())
    }

    // ── Turns ──────────────────────────────────────────────────────

    /// Create a turn. The id is assigned here and never reused.
    pub fn create_turn(&self, new: NewTurn) -> Result<Turn> {
        self.with_lock(|inner| {
            let id = inner.turns.keys().next_back().copied().unwrap_or(0) + 1;
            let turn = Turn {
                id,
                hex_id: short_hex_id(),
                profile: new.profile,
                agent: new.agent,
                loop_run_hex: new.loop_run_hex,
                step_hex: new.step_hex,
                objective: new.objective,
                duration_ms: 0,
                build_state: BuildState::Pending,
                resume_session_id: String::new(),
                created_at: Utc::now(),
                finalized_at: None,
            };
            self.persist(inner, Kind::Turns, &turn)?;
            inner.turns.insert(id, turn.clone());
            Ok(turn)
        })
    }

    pub fn get_turn(&self, id: i64) -> Option<Turn> {
        self.inner.read().turns.get(&id).cloned()
    }

    pub fn update_turn(&self, id: i64, f: impl FnOnce(&mut Turn)) -> Result<Turn> {
        self.with_lock(|inner| {
            let mut turn = inner
                .turns
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::Store(format!("turn {id} not found")))?;
            f(&mut turn);
            turn.id = id;
            self.persist(inner, Kind::Turns, &turn)?;
            inner.turns.insert(id, turn.clone());
            Ok(turn)
        })
    }

    // ── Spawns ─────────────────────────────────────────────────────

    /// Create a spawn with status `pending`. Non-read-only spawns get
    /// the worktree branch name `adaf/spawn-<id>`.
    pub fn create_spawn(&self, new: NewSpawn) -> Result<Spawn> {
        self.with_lock(|inner| {
            let id = inner.spawns.keys().next_back().copied().unwrap_or(0) + 1;
            let branch = if new.read_only {
                String::new()
            } else {
                format!("adaf/spawn-{id}")
            };
            let spawn = Spawn {
                id,
                parent_turn_id: new.parent_turn_id,
                parent_spawn_id: new.parent_spawn_id,
                child_turn_id: None,
                parent_profile: new.parent_profile,
                parent_role: new.parent_role,
                parent_position: new.parent_position,
                profile: new.profile,
                role: new.role,
                position: new.position,
                task: new.task,
                status: SpawnStatus::Pending,
                exit_code: None,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                summary: String::new(),
                result: String::new(),
                read_only: new.read_only,
                branch,
                base_commit: new.base_commit,
                handoff: new.handoff,
                timeout_minutes: new.timeout_minutes,
                issues: new.issues,
            };
            self.persist(inner, Kind::Spawns, &spawn)?;
            inner.spawns.insert(id, spawn.clone());
            self.signals.emit_spawn_event(SpawnEvent {
                spawn_id: id,
                parent_turn_id: spawn.parent_turn_id,
                status: spawn.status,
            });
            Ok(spawn)
        })
    }

    pub fn get_spawn(&self, id: i64) -> Option<Spawn> {
        self.inner.read().spawns.get(&id).cloned()
    }

    /// Update a spawn. Terminal statuses are monotonic: an attempt to
    /// move off a terminal status is ignored (the rest of the update is
    /// kept).
    pub fn update_spawn(&self, id: i64, f: impl FnOnce(&mut Spawn)) -> Result<Spawn> {
        self.with_lock(|inner| {
            let mut spawn = inner
                .spawns
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::Store(format!("spawn {id} not found")))?;
            let old_status = spawn.status;
            f(&mut spawn);
            spawn.id = id;
            if old_status.is_terminal() && spawn.status != old_status {
                tracing::warn!(
                    spawn_id = id,
                    from = %old_status,
                    to = %spawn.status,
                    "ignoring status change on terminal spawn"
                );
                spawn.status = old_status;
            }
            self.persist(inner, Kind::Spawns, &spawn)?;
            inner.spawns.insert(id, spawn.clone());
            if spawn.status != old_status {
                self.signals.emit_spawn_event(SpawnEvent {
                    spawn_id: id,
                    parent_turn_id: spawn.parent_turn_id,
                    status: spawn.status,
                });
            }
            Ok(spawn)
        })
    }

    /// All spawns, ordered by id.
    pub fn all_spawns(&self) -> Vec<Spawn> {
        self.inner.read().spawns.values().cloned().collect()
    }

    /// All spawns parented at a turn, ordered by id.
    pub fn spawns_for_turn(&self, parent_turn_id: i64) -> Vec<Spawn> {
        self.inner
            .read()
            .spawns
            .values()
            .filter(|s| s.parent_turn_id == parent_turn_id)
            .cloned()
            .collect()
    }

    // ── Loop runs ──────────────────────────────────────────────────

    pub fn create_loop_run(&self, loop_name: &str, daemon_session: &str) -> Result<LoopRun> {
        self.with_lock(|inner| {
            let id = inner.loop_runs.keys().next_back().copied().unwrap_or(0) + 1;
            let run = LoopRun {
                id,
                hex_id: short_hex_id(),
                loop_name: loop_name.to_string(),
                cycle: 0,
                watermarks: HashMap::new(),
                status: LoopRunStatus::Running,
                daemon_session: daemon_session.to_string(),
                chat_session_id: String::new(),
                started_at: Utc::now(),
                stopped_at: None,
            };
            self.persist(inner, Kind::LoopRuns, &run)?;
            inner.loop_runs.insert(id, run.clone());
            Ok(run)
        })
    }

    pub fn get_loop_run(&self, id: i64) -> Option<LoopRun> {
        self.inner.read().loop_runs.get(&id).cloned()
    }

    pub fn update_loop_run(&self, id: i64, f: impl FnOnce(&mut LoopRun)) -> Result<LoopRun> {
        self.with_lock(|inner| {
            let mut run = inner
                .loop_runs
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::Store(format!("loop run {id} not found")))?;
            f(&mut run);
            run.id = id;
            self.persist(inner, Kind::LoopRuns, &run)?;
            inner.loop_runs.insert(id, run.clone());
            Ok(run)
        })
    }

    // ── Loop messages ──────────────────────────────────────────────

    pub fn post_message(
        &self,
        run_id: i64,
        spawn_id: Option<i64>,
        step_index: i64,
        author: &str,
        content: &str,
    ) -> Result<LoopMessage> {
        self.with_lock(|inner| {
            let id = inner.messages.keys().next_back().copied().unwrap_or(0) + 1;
            let msg = LoopMessage {
                id,
                run_id,
                spawn_id,
                step_index,
                author: author.to_string(),
                content: content.to_string(),
                created_at: Utc::now(),
            };
            self.persist(inner, Kind::Messages, &msg)?;
            inner.messages.insert(id, msg.clone());
            Ok(msg)
        })
    }

    /// Run-scoped messages with id above the watermark, ordered by id.
    pub fn messages_for_run(&self, run_id: i64, above: i64) -> Vec<LoopMessage> {
        self.inner
            .read()
            .messages
            .values()
            .filter(|m| m.run_id == run_id && m.spawn_id.is_none() && m.id > above)
            .cloned()
            .collect()
    }

    /// Spawn-targeted messages with id above the watermark.
    pub fn messages_for_spawn(&self, spawn_id: i64, above: i64) -> Vec<LoopMessage> {
        self.inner
            .read()
            .messages
            .values()
            .filter(|m| m.spawn_id == Some(spawn_id) && m.id > above)
            .cloned()
            .collect()
    }

    // ── Interrupts ─────────────────────────────────────────────────

    pub fn post_interrupt(
        &self,
        turn_id: Option<i64>,
        spawn_id: Option<i64>,
        payload: &str,
    ) -> Result<Interrupt> {
        self.with_lock(|inner| {
            let id = inner.interrupts.keys().next_back().copied().unwrap_or(0) + 1;
            let intr = Interrupt {
                id,
                turn_id,
                spawn_id,
                payload: payload.to_string(),
                consumed: false,
                created_at: Utc::now(),
            };
            self.persist(inner, Kind::Interrupts, &intr)?;
            inner.interrupts.insert(id, intr.clone());
            Ok(intr)
        })
    }

    /// Drain unconsumed interrupts for a turn, marking them consumed.
    pub fn take_interrupts_for_turn(&self, turn_id: i64) -> Result<Vec<String>> {
        self.take_interrupts(|i| i.turn_id == Some(turn_id))
    }

    /// Drain unconsumed interrupts for a spawn, marking them consumed.
    pub fn take_interrupts_for_spawn(&self, spawn_id: i64) -> Result<Vec<String>> {
        self.take_interrupts(|i| i.spawn_id == Some(spawn_id))
    }

    fn take_interrupts(&self, matches: impl Fn(&Interrupt) -> bool) -> Result<Vec<String>> {
        self.with_lock(|inner| {
            let ids: Vec<i64> = inner
                .interrupts
                .values()
                .filter(|i| !i.consumed && matches(i))
                .map(|i| i.id)
                .collect();

            let mut payloads = Vec::with_capacity(ids.len());
            for id in ids {
                let mut intr = inner.interrupts.get(&id).cloned().expect("id just listed");
                intr.consumed = true;
                payloads.push(intr.payload.clone());
                self.persist(inner, Kind::Interrupts, &intr)?;
                inner.interrupts.insert(id, intr);
            }
            Ok(payloads)
        })
    }

    // ── Signals ────────────────────────────────────────────────────

    pub fn signal_wait(&self, turn_id: i64) -> Result<()> {
        self.signals.signal_wait(turn_id)
    }

    pub fn is_waiting(&self, turn_id: i64) -> bool {
        self.signals.is_waiting(turn_id)
    }

    pub fn clear_wait(&self, turn_id: i64) -> Result<()> {
        self.signals.clear_wait(turn_id)
    }

    pub fn wait_signal_chan(&self, turn_id: i64) -> tokio::sync::broadcast::Receiver<()> {
        self.signals.wait_chan(turn_id)
    }

    pub fn cleanup_wait_chan(&self, turn_id: i64) {
        self.signals.cleanup_wait_chan(turn_id)
    }

    pub fn signal_loop_stop(&self, run_id: i64) -> Result<()> {
        self.signals.signal_loop_stop(run_id)
    }

    pub fn is_loop_stopped(&self, run_id: i64) -> bool {
        self.signals.is_loop_stopped(run_id)
    }

    pub fn loop_stop_chan(&self, run_id: i64) -> tokio::sync::broadcast::Receiver<()> {
        self.signals.loop_stop_chan(run_id)
    }

    pub fn cleanup_stop_chan(&self, run_id: i64) {
        self.signals.cleanup_stop_chan(run_id)
    }

    pub fn signal_wind_down(&self, run_id: i64) -> Result<()> {
        self.signals.signal_wind_down(run_id)
    }

    pub fn is_wind_down(&self, run_id: i64) -> bool {
        self.signals.is_wind_down(run_id)
    }

    pub fn subscribe_spawn_events(&self) -> tokio::sync::broadcast::Receiver<SpawnEvent> {
        self.signals.subscribe_spawn_events()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
