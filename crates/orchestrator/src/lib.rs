//! The adaf orchestrator: drives interactive coding agents through
//! multi-step loops, coordinates child-agent spawns in isolated
//! worktrees, and exposes the `adaf` CLI both to operators and to the
//! agents themselves.
//!
//! Entry points: [`runtime::LoopRunner`] walks a loop definition,
//! [`runtime::TurnLoop`] drives a single agent profile through turns,
//! and [`runtime::SpawnCoordinator`] supervises child executions.

pub mod cli;
pub mod runtime;
pub mod state;
