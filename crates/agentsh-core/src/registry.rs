//! # Agent Registry
//!
//! The operator-visible snapshot that maps small indices to agent IDs.
//! It is replaced wholesale by every listing, never merged, so an index is
//! only meaningful relative to the most recent `agents` output.

use crate::address::AddressSpec;
use crate::handles::AgentId;
use crate::handles::Target;
use crate::platform;
use crate::platform::AgentSummary;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The index is outside the current snapshot.
    InvalidIndex { index: usize, len: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIndex { index, len } => {
                write!(f, "Invalid agent number {} (registry holds {})", index, len)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<AgentId>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot. Indices follow the order given.
    pub fn replace(&mut self, agents: impl IntoIterator<Item = AgentId>) {
        self.agents = agents.into_iter().collect();
    }

    /// Queries the platform for its current agents and replaces the snapshot.
    ///
    /// On failure the previous snapshot is left untouched.
    pub async fn refresh(
        &mut self,
        platform: &dyn Platform,
        category: Option<&str>,
    ) -> platform::Result<Vec<AgentSummary>> {
        let listing = platform.list_agents(category).await?;
        self.replace(listing.iter().map(|summary| summary.id.clone()));
        Ok(listing)
    }

    pub fn resolve_local(&self, index: usize) -> Result<&AgentId> {
        self.agents.get(index).ok_or(Error::InvalidIndex {
            index,
            len: self.agents.len(),
        })
    }

    /// Turns an address into a call target, looking local indices up here.
    pub fn target(&self, address: &AddressSpec) -> Result<Target> {
        match address {
            AddressSpec::LocalIndex(index) => Ok(Target::agent(self.resolve_local(*index)?.clone())),
            AddressSpec::ByAgent(agent) => Ok(Target::agent(agent.clone())),
            AddressSpec::ByPeerAndAgent(peer, agent) => Ok(Target::pinned(peer.clone(), agent.clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &AgentId)> {
        self.agents.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::PeerId;

    fn ids(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::new(*n)).collect()
    }

    #[test]
    fn test_indices_follow_given_order() {
        let mut registry = AgentRegistry::new();
        registry.replace(ids(&["b", "a", "c"]));

        assert_eq!(registry.resolve_local(0), Ok(&AgentId::new("b")));
        assert_eq!(registry.resolve_local(2), Ok(&AgentId::new("c")));
        assert_eq!(registry.resolve_local(3), Err(Error::InvalidIndex { index: 3, len: 3 }));
    }

    #[test]
    fn test_replace_discards_stale_entries() {
        let mut registry = AgentRegistry::new();
        registry.replace(ids(&["a", "b", "c"]));
        registry.replace(ids(&["z"]));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve_local(0), Ok(&AgentId::new("z")));
        assert!(registry.resolve_local(1).is_err());
    }

    #[test]
    fn test_empty_registry_rejects_zero() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.resolve_local(0), Err(Error::InvalidIndex { index: 0, len: 0 }));
    }

    #[test]
    fn test_target_for_each_address_form() {
        let mut registry = AgentRegistry::new();
        registry.replace(ids(&["x"]));

        assert_eq!(
            registry.target(&AddressSpec::LocalIndex(0)),
            Ok(Target::agent(AgentId::new("x"))),
        );
        assert_eq!(
            registry.target(&AddressSpec::ByAgent(AgentId::new("y"))),
            Ok(Target::agent(AgentId::new("y"))),
        );
        assert_eq!(
            registry.target(&AddressSpec::ByPeerAndAgent(PeerId::new("p"), AgentId::new("y"))),
            Ok(Target::pinned(PeerId::new("p"), AgentId::new("y"))),
        );
        assert!(registry.target(&AddressSpec::LocalIndex(1)).is_err());
    }
}
