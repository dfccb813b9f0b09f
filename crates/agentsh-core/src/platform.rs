//! # Agent platform interface
//!
//! The shell never talks to a network directly. Everything it needs from the
//! agent platform (lifecycle, calls, discovery) goes through [`Platform`], an
//! object-safe async trait that an adapter implements for a concrete overlay.
//!
//! ## Invariants
//!
//! - Arguments and return values cross this boundary as opaque strings.
//! - `call_async` and `discover` hand back their pending result immediately;
//!   they never wait for a remote reply themselves.

use std::fmt;

use crate::handles::AgentId;
use crate::handles::PeerId;
use crate::handles::Target;
use crate::stream::PendingFuture;
use crate::stream::ResultStream;

/// Attribute name the platform indexes agent locations under, unless an
/// adapter reports otherwise.
pub const DEFAULT_LOCATION_ATTRIBUTE: &str = "$location";

/// Failures reported by the agent platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The local peer is not joined to the network.
    NotJoined,
    /// No reachable peer hosts the agent.
    AgentNotFound(AgentId),
    /// The named peer is unknown or unreachable.
    PeerNotFound(PeerId),
    /// The call reached the agent, but the method itself failed.
    Remote(String),
    /// The request could not be sent or its reply was lost.
    Dispatch(String),
    /// Creating, duplicating, suspending, resuming or destroying an agent failed.
    Lifecycle(String),
    /// The discovery query was rejected.
    InvalidQuery(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJoined => write!(f, "Not joined to the network"),
            Self::AgentNotFound(id) => write!(f, "Agent not found: {}", id),
            Self::PeerNotFound(id) => write!(f, "Peer not found: {}", id),
            Self::Remote(msg) => write!(f, "Remote failure: {}", msg),
            Self::Dispatch(msg) => write!(f, "Dispatch failure: {}", msg),
            Self::Lifecycle(msg) => write!(f, "Lifecycle failure: {}", msg),
            Self::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A point in the platform's location space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Location {
    pub lng: f64,
    pub lat: f64,
}

impl Location {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lng, self.lat)
    }
}

/// Summary of the local peer, shown by `info`.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerInfo {
    pub peer_name: String,
    pub peer_id: PeerId,
    pub locator: String,
    pub location: Option<Location>,
    /// Human-readable dump of the routing table.
    pub routing_table: String,
}

/// One entry of an agent listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub sleeping: bool,
}

/// The capability surface of the agent platform.
///
/// This trait is designed to be object-safe (`Arc<dyn Platform>`).
#[async_trait::async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Describes the local peer.
    async fn info(&self) -> Result<PeerInfo>;

    /// Lists agents hosted by the local peer, in platform order.
    async fn list_agents(&self, category: Option<&str>) -> Result<Vec<AgentSummary>>;

    async fn join(&self) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    fn is_online(&self) -> bool;

    /// Creates an agent of the given class on the local peer.
    async fn create_agent(&self, class: &str, name: &str, category: Option<&str>) -> Result<AgentId>;

    async fn duplicate_agent(&self, id: &AgentId) -> Result<AgentId>;

    async fn sleep_agent(&self, id: &AgentId) -> Result<()>;

    async fn wake_agent(&self, id: &AgentId) -> Result<()>;

    async fn destroy_agent(&self, id: &AgentId) -> Result<()>;

    /// Invokes a method and waits for its return value.
    async fn call(&self, target: &Target, method: &str, args: &[String]) -> Result<String>;

    /// Sends an invocation and returns a placeholder for its eventual result.
    async fn call_async(&self, target: &Target, method: &str, args: &[String]) -> Result<PendingFuture>;

    /// Sends an invocation without expecting any reply.
    async fn call_oneway(&self, target: &Target, method: &str, args: &[String]) -> Result<()>;

    /// Invokes a method on every agent matching `query` across all reachable
    /// peers. Replies arrive lazily on the returned stream.
    async fn discover(&self, query: &str, method: &str, args: &[String]) -> Result<ResultStream>;

    /// Like [`Platform::discover`], without collecting replies.
    async fn discover_oneway(&self, query: &str, method: &str, args: &[String]) -> Result<()>;

    /// Name of the attribute agents' locations are matched against.
    fn location_attribute(&self) -> &str {
        DEFAULT_LOCATION_ATTRIBUTE
    }
}
