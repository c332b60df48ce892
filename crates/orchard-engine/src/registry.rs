use crate::error::Result;
use orchard_core::errors::ConfigError;
use orchard_core::model::Agent;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Known agents. Only the health check writes to it after startup.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<String, Agent>>,
}

impl AgentRegistry {
    pub fn new(agents: BTreeMap<String, Agent>) -> Self {
        Self {
            agents: RwLock::new(agents),
        }
    }

    pub fn get(&self, name: &str) -> Result<Agent> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::AgentNotFound(name.to_string()).into())
    }

    pub fn all(&self) -> Vec<Agent> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.values().cloned().collect()
    }

    /// Returns the previous value, or `None` for an unknown agent.
    pub fn set_healthy(&self, name: &str, healthy: bool) -> Option<bool> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        agents
            .get_mut(name)
            .map(|agent| std::mem::replace(&mut agent.healthy, healthy))
    }
}
