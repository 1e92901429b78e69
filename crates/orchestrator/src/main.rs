use clap::Parser;
use tracing_subscriber::EnvFilter;

use adaf_orchestrator::cli::{self, Cli, Command, ConfigCommand, LoopCommand, NoteCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Loop(LoopCommand::Run { name }) => {
            init_tracing();
            cli::loop_cmd::run(&name).await
        }
        Command::Loop(LoopCommand::Stop { run_id }) => cli::loop_cmd::stop(run_id),
        Command::Loop(LoopCommand::WindDown { run_id }) => cli::loop_cmd::wind_down(run_id),
        Command::Loop(LoopCommand::CallSupervisor) => cli::agent::call_supervisor(),
        Command::Spawn(args) => cli::agent::spawn(args).await,
        Command::WaitForSpawns => cli::agent::wait_for_spawns(),
        Command::SpawnStatus { spawn_id } => cli::agent::spawn_status(spawn_id),
        Command::SpawnMessage {
            spawn_id,
            interrupt,
            message,
        } => cli::agent::spawn_message(spawn_id, interrupt, &message),
        Command::SpawnMerge { spawn_id, squash } => cli::agent::spawn_merge(spawn_id, squash).await,
        Command::SpawnReject { spawn_id } => cli::agent::spawn_reject(spawn_id).await,
        Command::Note(NoteCommand::Add { session, note }) => cli::agent::note_add(session, &note),
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config()?;
            let issues = config.validate();
            if issues.is_empty() {
                println!("{config_path}: ok");
                return Ok(());
            }
            for issue in &issues {
                println!("{issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == adaf_domain::config::ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _config_path) = cli::load_config()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Version => {
            println!("adaf {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured tracing for the long-running loop daemon.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,adaf_orchestrator=debug")),
        )
        .init();
}
