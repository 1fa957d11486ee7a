//! Agent provisioning from declared requirements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::agent::{AgentConfig, AgentId};
use crate::core::task::AgentRequirement;
use crate::orchestration::events::{EventSink, OrchestrationEvent};
use crate::orchestration::pool::AgentPool;
use crate::orchestration::progress::StatsCounters;

/// A requirement that could not be fully provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionFailure {
    pub agent_type: String,
    /// Agents still missing when provisioning gave up on the requirement.
    pub missing: usize,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Spawns agents for requirements and remembers what failed.
pub struct Provisioner {
    pool: Arc<dyn AgentPool>,
    failures: RwLock<Vec<ProvisionFailure>>,
    stats: Arc<StatsCounters>,
    events: EventSink,
}

impl Provisioner {
    pub fn new(pool: Arc<dyn AgentPool>, stats: Arc<StatsCounters>, events: EventSink) -> Self {
        Self {
            pool,
            failures: RwLock::new(Vec::new()),
            stats,
            events,
        }
    }

    /// Spawn agents for each requirement in order and return their ids.
    ///
    /// The first spawn error for a requirement abandons the rest of that
    /// requirement. Later requirements are still processed.
    pub async fn spawn_agents(&self, requirements: &[AgentRequirement]) -> Vec<AgentId> {
        let mut spawned = Vec::new();

        for requirement in requirements {
            for made in 0..requirement.count {
                let config =
                    AgentConfig::with_capabilities(requirement.capabilities.iter().cloned());
                match self.pool.spawn(&requirement.agent_type, config).await {
                    Ok(handle) => {
                        self.stats.agent_spawned();
                        self.events.emit(OrchestrationEvent::AgentSpawned {
                            agent_id: handle.id(),
                            agent_type: requirement.agent_type.clone(),
                        });
                        spawned.push(handle.id());
                    }
                    Err(err) => {
                        warn!(
                            agent_type = %requirement.agent_type,
                            spawned = made,
                            requested = requirement.count,
                            "failed to spawn agent: {}",
                            err
                        );
                        self.stats.spawn_failed();
                        self.events.emit(OrchestrationEvent::SpawnFailed {
                            agent_type: requirement.agent_type.clone(),
                            error: err.to_string(),
                        });
                        self.failures.write().await.push(ProvisionFailure {
                            agent_type: requirement.agent_type.clone(),
                            missing: requirement.count - made,
                            error: err.to_string(),
                            failed_at: Utc::now(),
                        });
                        break;
                    }
                }
            }
        }

        info!(
            requirements = requirements.len(),
            spawned = spawned.len(),
            "provisioning finished"
        );
        spawned
    }

    pub async fn failures(&self) -> Vec<ProvisionFailure> {
        self.failures.read().await.clone()
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }
}
