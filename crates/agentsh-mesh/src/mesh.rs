//! # Mesh Registry
//!
//! The set of nodes reachable in-process, each paired with the [`Link`] used
//! to talk to it. A [`MeshPlatform`] is one node's view of the mesh and is
//! what the shell drives.
//!
//! Uses DashMap so nodes can be added and looked up from any task without a
//! global lock. Every node gets a slot number on admission; listings and
//! routing walk nodes in slot order.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::debug;
use tracing::info;

use agentsh_core::AgentId;
use agentsh_core::PeerId;
use agentsh_core::Target;
use agentsh_core::platform;
use agentsh_core::platform::AgentSummary;
use agentsh_core::platform::Location;
use agentsh_core::platform::PeerInfo;
use agentsh_core::platform::Platform;
use agentsh_core::stream::PendingFuture;
use agentsh_core::stream::ResultStream;

use crate::link::Link;
use crate::node;
use crate::node::Node;
use crate::query;
use crate::transport::ChannelTransport;

struct Member {
    slot: u64,
    node: Arc<Node>,
    link: Arc<Link>,
}

pub struct Mesh {
    members: DashMap<PeerId, Member>,
    next_slot: AtomicU64,
}

impl Mesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: DashMap::new(),
            next_slot: AtomicU64::new(0),
        })
    }

    /// Admits a new node and starts serving it. The node starts offline.
    pub fn add_node(&self, name: impl Into<String>, location: Option<Location>) -> Arc<Node> {
        let node = Arc::new(Node::new(name, location));
        let (client, server) = ChannelTransport::pair();
        tokio::spawn(node.clone().serve(Arc::new(server)));
        let link = Arc::new(Link::new(node.id().clone(), Box::new(client)));

        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.members.insert(
            node.id().clone(),
            Member {
                slot,
                node: node.clone(),
                link,
            },
        );
        debug!(peer = %node.id(), name = node.name(), slot, "node added to mesh");
        node
    }

    pub fn node(&self, id: &PeerId) -> Option<Arc<Node>> {
        self.members.get(id).map(|m| m.node.clone())
    }

    fn link(&self, id: &PeerId) -> Option<Arc<Link>> {
        self.members.get(id).map(|m| m.link.clone())
    }

    /// Every node with its link, in slot order.
    fn members(&self) -> Vec<(Arc<Node>, Arc<Link>)> {
        let mut members: Vec<_> = self
            .members
            .iter()
            .map(|m| (m.slot, m.node.clone(), m.link.clone()))
            .collect();
        members.sort_by_key(|(slot, _, _)| *slot);
        members.into_iter().map(|(_, node, link)| (node, link)).collect()
    }

    pub fn online(&self) -> Vec<Arc<Node>> {
        self.members()
            .into_iter()
            .map(|(node, _)| node)
            .filter(|node| node.is_online())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// One node's view of the mesh, exposed as the shell's [`Platform`].
pub struct MeshPlatform {
    mesh: Arc<Mesh>,
    home: Arc<Node>,
    locator: String,
}

impl MeshPlatform {
    /// Adds a home node named `name` to `mesh` and returns its view.
    pub fn new(mesh: Arc<Mesh>, name: &str, location: Option<Location>, locator: impl Into<String>) -> Self {
        let home = mesh.add_node(name, location);
        Self {
            mesh,
            home,
            locator: locator.into(),
        }
    }

    pub fn home(&self) -> &Arc<Node> {
        &self.home
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    fn home_link(&self) -> platform::Result<Arc<Link>> {
        self.mesh
            .link(self.home.id())
            .ok_or_else(|| platform::Error::PeerNotFound(self.home.id().clone()))
    }

    /// Picks the link that reaches `target`.
    ///
    /// The home node is always reachable. Anything else needs the home node
    /// to be joined and the other node to be online.
    fn route(&self, target: &Target) -> platform::Result<Arc<Link>> {
        if let Some(peer) = &target.peer {
            if peer == self.home.id() {
                return self.home_link();
            }
            if !self.home.is_online() {
                return Err(platform::Error::NotJoined);
            }
            return match (self.mesh.node(peer), self.mesh.link(peer)) {
                (Some(node), Some(link)) if node.is_online() => Ok(link),
                _ => Err(platform::Error::PeerNotFound(peer.clone())),
            };
        }

        if self.home.hosts(&target.agent) {
            return self.home_link();
        }
        if !self.home.is_online() {
            return Err(platform::Error::NotJoined);
        }
        self.mesh
            .online()
            .into_iter()
            .find(|node| node.hosts(&target.agent))
            .and_then(|node| self.mesh.link(node.id()))
            .ok_or_else(|| platform::Error::AgentNotFound(target.agent.clone()))
    }

    /// Validates `query` and returns the links of every online node.
    fn broadcast(&self, query: &str) -> platform::Result<Vec<Arc<Link>>> {
        if !self.home.is_online() {
            return Err(platform::Error::NotJoined);
        }
        query::parse(query).map_err(|e| platform::Error::InvalidQuery(e.to_string()))?;

        Ok(self
            .mesh
            .members()
            .into_iter()
            .filter(|(node, _)| node.is_online())
            .map(|(_, link)| link)
            .collect())
    }

    fn routing_table(&self) -> String {
        let mut table = String::from("routing table:");
        for (node, _) in self.mesh.members() {
            if node.id() == self.home.id() {
                continue;
            }
            let state = if node.is_online() { "online" } else { "offline" };
            table.push_str(&format!(
                "\n  {} {} agents={} {}",
                node.id(),
                node.name(),
                node.agent_count(),
                state,
            ));
        }
        table
    }
}

fn lifecycle(e: node::Error) -> platform::Error {
    platform::Error::Lifecycle(e.to_string())
}

#[async_trait::async_trait]
impl Platform for MeshPlatform {
    async fn info(&self) -> platform::Result<PeerInfo> {
        Ok(PeerInfo {
            peer_name: self.home.name().to_string(),
            peer_id: self.home.id().clone(),
            locator: self.locator.clone(),
            location: self.home.location(),
            routing_table: self.routing_table(),
        })
    }

    async fn list_agents(&self, category: Option<&str>) -> platform::Result<Vec<AgentSummary>> {
        Ok(self.home.list(category))
    }

    async fn join(&self) -> platform::Result<()> {
        self.home.set_online(true);
        Ok(())
    }

    async fn leave(&self) -> platform::Result<()> {
        self.home.set_online(false);
        Ok(())
    }

    fn is_online(&self) -> bool {
        self.home.is_online()
    }

    async fn create_agent(&self, class: &str, name: &str, category: Option<&str>) -> platform::Result<AgentId> {
        let id = self.home.create_agent(class, name, category, None).map_err(lifecycle)?;
        info!(%id, class, name, "created agent");
        Ok(id)
    }

    async fn duplicate_agent(&self, id: &AgentId) -> platform::Result<AgentId> {
        self.home.duplicate_agent(id).map_err(lifecycle)
    }

    async fn sleep_agent(&self, id: &AgentId) -> platform::Result<()> {
        self.home.set_sleeping(id, true).map_err(lifecycle)
    }

    async fn wake_agent(&self, id: &AgentId) -> platform::Result<()> {
        self.home.set_sleeping(id, false).map_err(lifecycle)
    }

    async fn destroy_agent(&self, id: &AgentId) -> platform::Result<()> {
        self.home.destroy_agent(id).map_err(lifecycle)
    }

    async fn call(&self, target: &Target, method: &str, args: &[String]) -> platform::Result<String> {
        self.route(target)?.call(&target.agent, method, args).await
    }

    async fn call_async(&self, target: &Target, method: &str, args: &[String]) -> platform::Result<PendingFuture> {
        Ok(self.route(target)?.call_pending(&target.agent, method, args).await?)
    }

    async fn call_oneway(&self, target: &Target, method: &str, args: &[String]) -> platform::Result<()> {
        Ok(self.route(target)?.call_oneway(&target.agent, method, args).await?)
    }

    async fn discover(&self, query: &str, method: &str, args: &[String]) -> platform::Result<ResultStream> {
        let links = self.broadcast(query)?;
        let (sink, stream) = ResultStream::channel();
        for link in links {
            link.discover(query, method, args, sink.clone()).await?;
        }
        Ok(stream)
    }

    async fn discover_oneway(&self, query: &str, method: &str, args: &[String]) -> platform::Result<()> {
        for link in self.broadcast(query)? {
            link.discover_oneway(query, method, args).await?;
        }
        Ok(())
    }

    fn location_attribute(&self) -> &str {
        query::LOCATION_ATTRIBUTE
    }
}
