//! Persistent store for the adaf orchestrator: append-only JSONL records
//! for turns, spawns, loop runs, loop messages, and interrupts, plus
//! out-of-band signals (wait, stop, wind-down).
//!
//! The store is shared between the orchestrator daemon and the short-lived
//! `adaf` CLI processes agents invoke, so every record kind persists to
//! disk on every update and [`Store::refresh`] tails the files to pick up
//! writes from other processes.

mod records;
mod signals;
mod store;

pub use records::{
    BuildState, Interrupt, LoopMessage, LoopRun, LoopRunStatus, NewSpawn, NewTurn, Spawn,
    SpawnStatus, Turn,
};
pub use signals::SpawnEvent;
pub use store::Store;

/// Generate a short hex id (8 chars) for turns and loop runs.
pub fn short_hex_id() -> String {
    let id = uuid::Uuid::new_v4();
    id.simple().to_string()[..8].to_string()
}
