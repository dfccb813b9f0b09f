//! # Node
//!
//! A peer of the mesh. It hosts agents and serves the frames arriving on its
//! transport. Each request runs on its own task so a slow agent never holds
//! up the others.
//!
//! ## Invariants
//!
//! - Agent ids are minted randomly and never reused within a node.
//! - Listing order is creation order.
//! - Sleeping agents refuse calls and are left out of discovery.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::info;
use tracing::warn;

use agentsh_core::AgentId;
use agentsh_core::PeerId;
use agentsh_core::platform::AgentSummary;
use agentsh_core::platform::Location;

use crate::agent;
use crate::agent::Agent;
use crate::frame::Fault;
use crate::frame::Frame;
use crate::frame::Outcome;
use crate::query;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Agent(agent::Error),
    NoSuchAgent(AgentId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(e) => write!(f, "{}", e),
            Self::NoSuchAgent(id) => write!(f, "No such agent: {}", id),
        }
    }
}

impl std::error::Error for Error {}

impl From<agent::Error> for Error {
    fn from(e: agent::Error) -> Self {
        Self::Agent(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Mints a fresh random id, as hex.
pub(crate) fn random_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

pub struct Node {
    id: PeerId,
    name: String,
    location: Option<Location>,
    online: AtomicBool,
    agents: DashMap<AgentId, Arc<Agent>>,
    /// Creation order, for stable listings.
    order: Mutex<Vec<AgentId>>,
}

impl Node {
    pub fn new(name: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            id: PeerId::new(random_id()),
            name: name.into(),
            location,
            online: AtomicBool::new(false),
            agents: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(peer = %self.id, name = %self.name, online, "peer changed state");
        }
    }

    pub fn hosts(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    fn agent(&self, id: &AgentId) -> Result<Arc<Agent>> {
        self.agents
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NoSuchAgent(id.clone()))
    }

    fn insert(&self, agent: Agent) -> AgentId {
        let id = agent.id().clone();
        self.agents.insert(id.clone(), Arc::new(agent));
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.clone());
        id
    }

    fn fresh_id(&self) -> AgentId {
        loop {
            let id = AgentId::new(random_id());
            if !self.agents.contains_key(&id) {
                return id;
            }
        }
    }

    /// Creates an agent of a built-in class. It starts at the node's location
    /// unless one is given.
    pub fn create_agent(
        &self,
        class: &str,
        name: &str,
        category: Option<&str>,
        location: Option<Location>,
    ) -> Result<AgentId> {
        let behavior = agent::behavior_for(class)?;
        let agent = Agent::new(
            self.fresh_id(),
            name,
            category.map(str::to_string),
            location.or(self.location),
            behavior,
        );
        let id = self.insert(agent);
        debug!(peer = %self.id, %id, class, name, "agent created");
        Ok(id)
    }

    pub fn duplicate_agent(&self, id: &AgentId) -> Result<AgentId> {
        let copy = self.agent(id)?.duplicate(self.fresh_id());
        Ok(self.insert(copy))
    }

    pub fn set_sleeping(&self, id: &AgentId, sleeping: bool) -> Result<()> {
        self.agent(id)?.set_sleeping(sleeping);
        Ok(())
    }

    pub fn destroy_agent(&self, id: &AgentId) -> Result<()> {
        self.agents
            .remove(id)
            .ok_or_else(|| Error::NoSuchAgent(id.clone()))?;
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|known| known != id);
        Ok(())
    }

    /// Hosted agents in creation order, optionally only one category.
    pub fn list(&self, category: Option<&str>) -> Vec<AgentSummary> {
        let order = self.order.lock().unwrap_or_else(PoisonError::into_inner).clone();
        order
            .iter()
            .filter_map(|id| self.agents.get(id).map(|entry| entry.value().clone()))
            .filter(|agent| category.is_none_or(|cat| agent.category() == Some(cat)))
            .map(|agent| AgentSummary {
                id: agent.id().clone(),
                name: agent.name().to_string(),
                sleeping: agent.is_sleeping(),
            })
            .collect()
    }

    pub async fn invoke(&self, id: &AgentId, method: &str, args: &[String]) -> Outcome {
        let agent = self
            .agent(id)
            .map_err(|_| Fault::NoSuchAgent(id.to_string()))?;
        agent.invoke(method, args).await
    }

    /// Awake agents matching `query`.
    pub fn matching(&self, query: &query::Query) -> Vec<Arc<Agent>> {
        let order = self.order.lock().unwrap_or_else(PoisonError::into_inner).clone();
        order
            .iter()
            .filter_map(|id| self.agents.get(id).map(|entry| entry.value().clone()))
            .filter(|agent| !agent.is_sleeping() && query.matches(&**agent))
            .collect()
    }

    /// Serves frames from `transport` until it closes.
    pub async fn serve(self: Arc<Self>, transport: Arc<dyn Transport>) {
        loop {
            let msg = match transport.recv().await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %self.id, error = %e, "node transport failed");
                    break;
                }
            };

            let frame = match Frame::decode(&msg) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(peer = %self.id, error = %e, "dropping undecodable frame");
                    continue;
                }
            };

            let node = self.clone();
            let transport = transport.clone();
            tokio::spawn(async move { node.handle(frame, &*transport).await });
        }
        debug!(peer = %self.id, "node stopped serving");
    }

    async fn handle(&self, frame: Frame, transport: &dyn Transport) {
        match frame {
            Frame::Call { seq, agent, method, args, oneway } => {
                let outcome = self.invoke(&AgentId::new(agent), &method, &args).await;
                match outcome {
                    Err(fault) if oneway => debug!(peer = %self.id, %fault, "one-way call failed"),
                    _ if oneway => {}
                    outcome => {
                        send(transport, Frame::Reply { seq, outcome }).await;
                    }
                }
            }
            Frame::Discover { seq, query, method, args, oneway } => {
                let mut tasks = self.spawn_discovery(&query, &method, &args);
                while let Some(joined) = tasks.join_next().await {
                    let (agent, outcome) = match joined {
                        Ok(item) => item,
                        Err(e) => {
                            warn!(peer = %self.id, error = %e, "discovery task failed");
                            continue;
                        }
                    };
                    if oneway {
                        continue;
                    }
                    let item = Frame::Item { seq, agent: agent.to_string(), outcome };
                    if !send(transport, item).await {
                        return;
                    }
                }
                if !oneway {
                    send(transport, Frame::Done { seq }).await;
                }
            }
            other => warn!(peer = %self.id, seq = other.seq(), "node received a reply frame"),
        }
    }

    /// Starts `method` on every matching agent at once. Results come out of
    /// the set in completion order.
    fn spawn_discovery(&self, query: &str, method: &str, args: &[String]) -> JoinSet<(AgentId, Outcome)> {
        let mut tasks = JoinSet::new();
        let query = match query::parse(query) {
            Ok(query) => query,
            Err(e) => {
                warn!(peer = %self.id, error = %e, "ignoring malformed discovery query");
                return tasks;
            }
        };

        for agent in self.matching(&query) {
            let method = method.to_string();
            let args = args.to_vec();
            tasks.spawn(async move {
                let id = agent.id().clone();
                (id, agent.invoke(&method, &args).await)
            });
        }
        tasks
    }
}

/// Sends one frame back to the caller. Returns `false` once the caller is gone.
async fn send(transport: &dyn Transport, frame: Frame) -> bool {
    let payload = match frame.encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "cannot encode reply");
            return true;
        }
    };
    match transport.send(&payload).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "caller went away before the reply");
            false
        }
    }
}
