//! Shared test harness: a scripted agent adapter and state wiring.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use adaf_agents::{Agent, AgentError, AgentRegistry, AgentResult, Invocation, Recorder};
use adaf_domain::config::Config;
use adaf_orchestrator::state::OrchState;
use adaf_store::Store;

/// One scripted adapter behavior, consumed per invocation.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return a result immediately.
    Complete {
        exit_code: i32,
        output: String,
        session: Option<String>,
    },
    /// Signal the wait flag for the current turn, then block until the
    /// turn context is cancelled.
    SignalWaitAndBlock,
    /// Block until the turn context is cancelled.
    Block,
    /// Hard adapter failure.
    Fail(String),
}

impl ScriptStep {
    pub fn ok(session: &str) -> Self {
        Self::Complete {
            exit_code: 0,
            output: "done".into(),
            session: Some(session.to_string()),
        }
    }

    pub fn ok_with_output(session: &str, output: &str) -> Self {
        Self::Complete {
            exit_code: 0,
            output: output.to_string(),
            session: Some(session.to_string()),
        }
    }
}

/// Stub agent driven by a script; records every invocation it sees.
pub struct ScriptedAgent {
    store: Arc<Store>,
    script: Mutex<VecDeque<ScriptStep>>,
    pub calls: Mutex<Vec<Invocation>>,
}

impl ScriptedAgent {
    pub fn new(store: Arc<Store>, script: Vec<ScriptStep>) -> Arc<Self> {
        Arc::new(Self {
            store,
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call(&self, idx: usize) -> Invocation {
        self.calls.lock()[idx].clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "stub"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        inv: &Invocation,
        _recorder: &Recorder,
    ) -> Result<AgentResult, AgentError> {
        self.calls.lock().push(inv.clone());
        let step = self.script.lock().pop_front().unwrap_or(ScriptStep::Complete {
            exit_code: 0,
            output: "done".into(),
            session: None,
        });

        match step {
            ScriptStep::Complete {
                exit_code,
                output,
                session,
            } => Ok(AgentResult {
                exit_code,
                duration: std::time::Duration::from_millis(5),
                output,
                agent_session_id: session,
            }),
            ScriptStep::SignalWaitAndBlock => {
                let turn_id: i64 = inv
                    .env
                    .get("ADAF_TURN_ID")
                    .expect("ADAF_TURN_ID set")
                    .parse()
                    .expect("turn id parses");
                self.store.signal_wait(turn_id).expect("signal wait");
                cancel.cancelled().await;
                Err(AgentError::Canceled)
            }
            ScriptStep::Block => {
                cancel.cancelled().await;
                Err(AgentError::Canceled)
            }
            ScriptStep::Fail(message) => Err(AgentError::Spawn(message)),
        }
    }
}

/// A fresh state dir, store, and scripted agent wired into `OrchState`.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub state: Arc<OrchState>,
    pub agent: Arc<ScriptedAgent>,
}

/// Build a harness. `config_toml` is parsed as the adaf config; every
/// profile's backend should be `stub`.
pub fn harness(config_toml: &str, script: Vec<ScriptStep>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config: Config = toml::from_str(config_toml).expect("test config parses");
    config.project.dir = dir.path().to_path_buf();

    let state_dir = dir.path().join(".adaf");
    let store = Arc::new(Store::open(&state_dir).unwrap());
    let agent = ScriptedAgent::new(store.clone(), script);

    let mut agents: HashMap<String, Arc<dyn Agent>> = HashMap::new();
    agents.insert("stub".into(), agent.clone());
    let registry = Arc::new(AgentRegistry::with_agents(agents));

    let project_dir: PathBuf = dir.path().to_path_buf();
    let state = Arc::new(OrchState::with_parts(
        config,
        store,
        registry,
        project_dir,
        state_dir,
    ));

    Harness { dir, state, agent }
}

/// Minimal config: one `dev` profile on the stub backend.
pub const DEV_CONFIG: &str = r#"
[project]
name = "demo"
plan_id = "plan-1"

[profiles.dev]
backend = "stub"
"#;
