use crate::context::EngineContext;
use crate::lock::SingleFlightLock;
use chrono::{DateTime, Utc};
use orchard_core::constants::{cache_keys, defaults};
use orchard_core::model::Agent;
use orchard_executor::{execute_read_only, ExecOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
    pub output: Vec<String>,
}

pub fn history_key(agent: &str) -> String {
    format!("{}/{}", cache_keys::HEALTHCHECKS, agent)
}

pub struct HealthMonitor {
    ctx: Arc<EngineContext>,
    lock: SingleFlightLock,
}

impl HealthMonitor {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let lock = SingleFlightLock::new(ctx.cache.clone());
        Self { ctx, lock }
    }

    pub async fn check_agent(&self, agent: &Agent) -> HealthRecord {
        let shell = self.ctx.shell(agent);
        let options = ExecOptions::new().in_dir(agent.workdir.to_string_lossy());
        let result = execute_read_only(shell.as_ref(), "pwd", &options, &self.ctx.retry).await;
        let (healthy, output) = match result {
            Ok(out) => (true, out.stdout),
            Err(e) => (false, vec![e.to_string()]),
        };
        HealthRecord {
            timestamp: self.ctx.now(),
            healthy,
            output,
        }
    }

    /// Checks every agent once. Returns `None` when another check is still running.
    pub async fn check_all(&self) -> Option<Vec<(String, bool)>> {
        let ttl = Duration::from_secs(defaults::LOCK_TTL_SECONDS);
        self.lock
            .run(cache_keys::HEALTHCHECKS, ttl, || async {
                let mut results = Vec::new();
                for agent in self.ctx.agents.all() {
                    let record = self.check_agent(&agent).await;
                    let previous = self.ctx.agents.set_healthy(&agent.name, record.healthy);
                    if previous != Some(record.healthy) {
                        if record.healthy {
                            tracing::info!("Agent '{}' is healthy", agent.name);
                        } else {
                            tracing::warn!(
                                "Agent '{}' is unhealthy: {}",
                                agent.name,
                                record.output.join(" ")
                            );
                        }
                    }
                    match serde_json::to_string(&record) {
                        Ok(json) => {
                            let key = history_key(&agent.name);
                            self.ctx.cache.push(&key, &json);
                            self.ctx.cache.trim(&key, defaults::HEALTHCHECK_HISTORY);
                        }
                        Err(e) => tracing::warn!("Could not record health check: {}", e),
                    }
                    results.push((agent.name.clone(), record.healthy));
                }
                results
            })
            .await
    }

    pub fn history(&self, agent: &str) -> Vec<HealthRecord> {
        self.ctx
            .cache
            .list(&history_key(agent))
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect()
    }
}
