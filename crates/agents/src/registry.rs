//! Registry of agent adapters, one per configured backend.

use std::collections::HashMap;
use std::sync::Arc;

use adaf_domain::config::{BackendConfig, Config};

use crate::adapter::Agent;
use crate::cli::CliAgent;

pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// Build one adapter per backend referenced by the config's
    /// profiles, plus any explicitly configured backends.
    pub fn from_config(config: &Config) -> Self {
        let mut agents: HashMap<String, Arc<dyn Agent>> = HashMap::new();

        let mut add = |name: &str, backend: BackendConfig| {
            agents
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CliAgent::new(name, backend)) as Arc<dyn Agent>);
        };

        for (name, backend) in &config.backends {
            add(name, backend.clone());
        }
        for profile in config.profiles.values() {
            if let Some(backend) = config.backend(&profile.backend) {
                add(&profile.backend, backend);
            }
        }

        tracing::info!(backends = agents.len(), "agent registry ready");
        Self { agents }
    }

    /// Registry with explicit adapters (used by tests to inject stubs).
    pub fn with_agents(agents: HashMap<String, Arc<dyn Agent>>) -> Self {
        Self { agents }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// All registered backend names (sorted).
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
