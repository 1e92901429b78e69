//! Shared orchestrator state: config, store, and agent registry.

use std::path::PathBuf;
use std::sync::Arc;

use adaf_agents::AgentRegistry;
use adaf_domain::config::Config;
use adaf_domain::Result;
use adaf_store::Store;

pub struct OrchState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub agents: Arc<AgentRegistry>,
    /// Absolute project working copy.
    pub project_dir: PathBuf,
    /// Absolute state root (store, records, worktrees).
    pub state_dir: PathBuf,
}

impl OrchState {
    pub fn new(config: Config) -> Result<Self> {
        let project_dir = config
            .project
            .dir
            .canonicalize()
            .unwrap_or_else(|_| config.project.dir.clone());
        let state_dir = if config.project.state_path.is_absolute() {
            config.project.state_path.clone()
        } else {
            project_dir.join(&config.project.state_path)
        };
        std::fs::create_dir_all(&state_dir)?;

        let store = Arc::new(Store::open(&state_dir)?);
        let agents = Arc::new(AgentRegistry::from_config(&config));

        Ok(Self {
            config: Arc::new(config),
            store,
            agents,
            project_dir,
            state_dir,
        })
    }

    /// Build state with pre-wired parts (used by tests to inject stub
    /// agents and a temp state dir).
    pub fn with_parts(
        config: Config,
        store: Arc<Store>,
        agents: Arc<AgentRegistry>,
        project_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            agents,
            project_dir,
            state_dir,
        }
    }

    /// Where per-turn recorders flush.
    pub fn records_dir(&self) -> PathBuf {
        self.state_dir.join("records")
    }

    /// Where spawn worktrees are created.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.state_dir.join("worktrees")
    }
}
