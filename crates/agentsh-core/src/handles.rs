//! Type-safe handles for agents and peers.
//!
//! Both identifiers are opaque strings minted by the agent platform. Wrapping
//! them keeps an `AgentId` from being passed where a `PeerId` is expected.

use std::fmt;

/// Globally unique identifier of a remotely hosted agent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a network node hosting agents.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A fully resolved call destination.
///
/// When `peer` is `None` the platform routes to whichever peer hosts `agent`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    /// The specific peer to address, if the operator pinned one.
    pub peer: Option<PeerId>,
    /// The agent to invoke.
    pub agent: AgentId,
}

impl Target {
    pub fn agent(agent: AgentId) -> Self {
        Self { peer: None, agent }
    }

    pub fn pinned(peer: PeerId, agent: AgentId) -> Self {
        Self { peer: Some(peer), agent }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.peer {
            Some(peer) => write!(f, "pid:{} aid:{}", peer, self.agent),
            None => write!(f, "aid:{}", self.agent),
        }
    }
}
