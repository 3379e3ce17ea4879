// All the agents of one process, in one owned context.
//
// `Swarm` hands out comm_ids (1, 2, 3, ... in connection order unless the
// caller picks one), keeps the agents keyed by id, steps them together, and
// tears them down. Agents that have lost their connection can be pruned;
// dropping the swarm destroys whatever is left.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use radio_relay_protocol::{CommId, Position};
use tracing::{debug, info};

use crate::agent::Agent;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::interpreter::Interpreter;

pub struct Swarm<I: Interpreter + 'static> {
    config: AgentConfig,
    agents: BTreeMap<CommId, Agent<I>>,
    next_id: u32,
}

impl<I: Interpreter + 'static> Swarm<I> {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            agents: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Connect a new agent. With `comm_id: None` the next free id in
    /// connection order is used.
    pub fn spawn(
        &mut self,
        interpreter: Arc<Mutex<I>>,
        comm_id: Option<CommId>,
    ) -> Result<CommId, AgentError> {
        let config = self.config.clone();
        self.spawn_with(&config, interpreter, comm_id)
    }

    /// Like `spawn`, but announces `position` to the hub right after the
    /// handshake instead of the configured initial position.
    pub fn spawn_at(
        &mut self,
        interpreter: Arc<Mutex<I>>,
        comm_id: Option<CommId>,
        position: Position,
    ) -> Result<CommId, AgentError> {
        let config = AgentConfig {
            initial_position: Some(position),
            ..self.config.clone()
        };
        self.spawn_with(&config, interpreter, comm_id)
    }

    fn spawn_with(
        &mut self,
        config: &AgentConfig,
        interpreter: Arc<Mutex<I>>,
        comm_id: Option<CommId>,
    ) -> Result<CommId, AgentError> {
        let id = match comm_id {
            Some(id) if self.agents.contains_key(&id) => {
                return Err(AgentError::DuplicateCommId(id));
            }
            Some(id) => id,
            None => self.next_free_id(),
        };
        let agent = Agent::connect(config, id, interpreter)?;
        self.agents.insert(id, agent);
        info!(comm_id = %id, agents = self.agents.len(), "agent joined swarm");
        Ok(id)
    }

    fn next_free_id(&mut self) -> CommId {
        while self.agents.contains_key(&CommId(self.next_id)) {
            self.next_id += 1;
        }
        let id = CommId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn agent(&self, id: CommId) -> Option<&Agent<I>> {
        self.agents.get(&id)
    }

    pub fn ids(&self) -> Vec<CommId> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Request one step from every live agent whose script has not finished.
    /// Returns how many agents accepted the request.
    pub fn step_all(&self) -> usize {
        self.agents
            .values()
            .filter(|agent| agent.is_alive() && !agent.is_done())
            .filter(|agent| agent.request_step().is_ok())
            .count()
    }

    pub fn wait_idle(&self) {
        for agent in self.agents.values() {
            agent.wait_idle();
        }
    }

    /// Destroy and forget agents whose connection has ended. Returns their
    /// ids.
    pub fn prune_dead(&mut self) -> Vec<CommId> {
        let dead: Vec<CommId> = self
            .agents
            .iter()
            .filter(|(_, agent)| !agent.is_alive())
            .map(|(&id, _)| id)
            .collect();
        for id in &dead {
            if let Some(mut agent) = self.agents.remove(id) {
                agent.destroy();
                debug!(comm_id = %id, "pruned dead agent");
            }
        }
        dead
    }

    /// Remove one agent, closing its connection.
    pub fn remove(&mut self, id: CommId) -> bool {
        match self.agents.remove(&id) {
            Some(mut agent) => {
                agent.destroy();
                true
            }
            None => false,
        }
    }

    pub fn destroy_all(&mut self) {
        let count = self.agents.len();
        for (_, mut agent) in std::mem::take(&mut self.agents) {
            agent.destroy();
        }
        if count > 0 {
            info!(agents = count, "swarm destroyed");
        }
    }
}

impl<I: Interpreter + 'static> Drop for Swarm<I> {
    fn drop(&mut self) {
        self.destroy_all();
    }
}
