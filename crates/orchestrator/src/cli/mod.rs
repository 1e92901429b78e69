pub mod agent;
pub mod loop_cmd;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use adaf_domain::config::Config;

/// adaf — drives interactive coding agents through structured loops.
#[derive(Debug, Parser)]
#[command(name = "adaf", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Loop operations.
    #[command(subcommand)]
    Loop(LoopCommand),
    /// Request a child agent for the current turn (agent-facing).
    Spawn(SpawnArgs),
    /// Suspend the current turn until child spawns report (agent-facing).
    WaitForSpawns,
    /// Show child spawns of the current turn (agent-facing).
    SpawnStatus {
        /// Show one spawn instead of all children.
        #[arg(long)]
        spawn_id: Option<i64>,
    },
    /// Send a message (or an interrupt) to a child spawn (agent-facing).
    SpawnMessage {
        #[arg(long)]
        spawn_id: i64,
        /// Deliver as an interrupt: cancels the child's current turn.
        #[arg(long)]
        interrupt: bool,
        message: String,
    },
    /// Merge a writable spawn's branch into the project (agent-facing).
    SpawnMerge {
        #[arg(long)]
        spawn_id: i64,
        #[arg(long)]
        squash: bool,
    },
    /// Discard a spawn's worktree and branch (agent-facing).
    SpawnReject {
        #[arg(long)]
        spawn_id: i64,
    },
    /// Supervisor notes.
    #[command(subcommand)]
    Note(NoteCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum LoopCommand {
    /// Run a configured loop to completion.
    Run {
        /// Loop name from adaf.toml.
        name: String,
    },
    /// Signal a running loop to stop (cancels the current step).
    Stop { run_id: i64 },
    /// Let the current step finish, then stop the loop.
    WindDown { run_id: i64 },
    /// Interrupt the current turn and hand control to the supervisor
    /// step (agent-facing).
    CallSupervisor,
}

#[derive(Debug, clap::Args)]
pub struct SpawnArgs {
    /// Child profile to run.
    #[arg(long)]
    pub profile: String,
    /// Role for the child (defaults to the delegation entry's role).
    #[arg(long)]
    pub role: Option<String>,
    /// Task text for the child.
    #[arg(long)]
    pub task: Option<String>,
    /// Read the task text from a file.
    #[arg(long)]
    pub task_file: Option<PathBuf>,
    /// Run in a HEAD snapshot with no writable worktree.
    #[arg(long)]
    pub read_only: bool,
    /// Run in the background; never blocks `wait-for-spawns`.
    #[arg(long)]
    pub handoff: bool,
    #[arg(long)]
    pub timeout_minutes: Option<u64>,
    /// Related issue ids (repeatable).
    #[arg(long = "issue")]
    pub issues: Vec<u64>,
}

#[derive(Debug, Subcommand)]
pub enum NoteCommand {
    /// Write a supervisor note into the loop message stream.
    Add {
        /// Loop run id the note belongs to.
        #[arg(long)]
        session: i64,
        #[arg(long)]
        note: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any issues.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading ────────────────────────────────────────────────────

/// Load configuration from `ADAF_CONFIG` (default `adaf.toml`).
/// Missing file yields the default configuration.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("ADAF_CONFIG").unwrap_or_else(|_| "adaf.toml".into());
    let config = load_config_at(Path::new(&config_path))?;
    Ok((config, config_path))
}

/// Load a config file from an explicit path, defaulting when absent.
pub fn load_config_at(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_spawn_command() {
        let cli = Cli::parse_from([
            "adaf",
            "spawn",
            "--profile",
            "scout",
            "--task",
            "look around",
            "--read-only",
            "--issue",
            "12",
            "--issue",
            "14",
        ]);
        match cli.command {
            Command::Spawn(args) => {
                assert_eq!(args.profile, "scout");
                assert!(args.read_only);
                assert!(!args.handoff);
                assert_eq!(args.issues, vec![12, 14]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_loop_subcommands() {
        let cli = Cli::parse_from(["adaf", "loop", "run", "main"]);
        assert!(matches!(
            cli.command,
            Command::Loop(LoopCommand::Run { ref name }) if name == "main"
        ));

        let cli = Cli::parse_from(["adaf", "loop", "wind-down", "3"]);
        assert!(matches!(
            cli.command,
            Command::Loop(LoopCommand::WindDown { run_id: 3 })
        ));

        let cli = Cli::parse_from(["adaf", "loop", "call-supervisor"]);
        assert!(matches!(cli.command, Command::Loop(LoopCommand::CallSupervisor)));
    }

    #[test]
    fn parses_spawn_message_interrupt() {
        let cli = Cli::parse_from([
            "adaf",
            "spawn-message",
            "--spawn-id",
            "7",
            "--interrupt",
            "change course",
        ]);
        match cli.command {
            Command::SpawnMessage {
                spawn_id,
                interrupt,
                message,
            } => {
                assert_eq!(spawn_id, 7);
                assert!(interrupt);
                assert_eq!(message, "change course");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let cfg = load_config_at(Path::new("/definitely/not/here/adaf.toml")).unwrap();
        assert!(cfg.loops.is_empty());
    }
}
