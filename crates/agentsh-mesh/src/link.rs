//! # Link with Async Pump
//!
//! The caller's side of a connection to one [`Node`](crate::node::Node). A
//! background pump task reads frames off the transport and routes each one to
//! the request that is waiting for it, keyed by sequence number.
//!
//! A call waits on a one-shot [`Resolver`]; a discovery feeds a [`ReplySink`]
//! until the node sends `Done`. When the transport closes, every waiting call
//! fails with a dispatch error and every open discovery stream ends.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use tracing::warn;

use agentsh_core::AgentId;
use agentsh_core::PeerId;
use agentsh_core::platform;
use agentsh_core::stream::PendingFuture;
use agentsh_core::stream::Reply;
use agentsh_core::stream::ReplySink;
use agentsh_core::stream::Resolver;

use crate::frame;
use crate::frame::Fault;
use crate::frame::Frame;
use crate::transport;
use crate::transport::Transport;

/// How long a blocking call waits for its reply.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum Error {
    Transport(transport::Error),
    Frame(frame::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Frame(e) => write!(f, "Frame error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<frame::Error> for Error {
    fn from(e: frame::Error) -> Self {
        Self::Frame(e)
    }
}

impl From<Error> for platform::Error {
    fn from(e: Error) -> Self {
        platform::Error::Dispatch(e.to_string())
    }
}

/// Maps a remote fault onto the platform's failure taxonomy.
pub fn fault_to_platform(fault: Fault) -> platform::Error {
    match fault {
        Fault::NoSuchAgent(id) => platform::Error::AgentNotFound(AgentId::new(id)),
        other => platform::Error::Remote(other.to_string()),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A request waiting for frames.
enum Pending {
    Call(Resolver),
    Discovery(ReplySink),
}

pub struct Link {
    peer: PeerId,
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<u64, Pending>>,
    seq_gen: AtomicU64,
}

impl Link {
    /// Wraps `transport` and spawns the pump that routes its replies.
    pub fn new(peer: PeerId, transport: Box<dyn Transport>) -> Self {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending = Arc::new(DashMap::new());

        let pump_transport = transport.clone();
        let pump_pending = pending.clone();
        let pump_peer = peer.clone();

        tokio::spawn(async move {
            let error = loop {
                match pump_transport.recv().await {
                    Ok(Some(msg)) => {
                        if let Err(e) = Self::handle_message(&pump_peer, &msg, &pump_pending) {
                            warn!(peer = %pump_peer, error = %e, "dropping link after bad frame");
                            break e;
                        }
                    }
                    Ok(None) => {
                        break Error::Transport(transport::Error::ConnectionLost("Stream closed".into()));
                    }
                    Err(e) => break Error::Transport(e),
                }
            };

            debug!(peer = %pump_peer, error = %error, "link pump stopped");
            Self::notify_all_pending(&pump_pending, error);
        });

        Self {
            peer,
            transport,
            pending,
            seq_gen: AtomicU64::new(1),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Number of requests still waiting for frames.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn notify_all_pending(pending: &DashMap<u64, Pending>, error: Error) {
        let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, waiting)) = pending.remove(&key) {
                match waiting {
                    Pending::Call(resolver) => resolver.resolve(Err(error.clone().into())),
                    Pending::Discovery(sink) => drop(sink),
                }
            }
        }
    }

    fn handle_message(peer: &PeerId, msg: &[u8], pending: &DashMap<u64, Pending>) -> Result<()> {
        match Frame::decode(msg)? {
            Frame::Reply { seq, outcome } => {
                let Some((_, waiting)) = pending.remove(&seq) else {
                    return Ok(());
                };
                match waiting {
                    Pending::Call(resolver) => resolver.resolve(outcome.map_err(fault_to_platform)),
                    Pending::Discovery(_) => {
                        return Err(frame::Error::ProtocolViolation(format!(
                            "Reply for discovery request {}",
                            seq
                        ))
                        .into());
                    }
                }
            }
            Frame::Item { seq, agent, outcome } => {
                let delivered = match pending.get(&seq).as_deref() {
                    Some(Pending::Discovery(sink)) => sink.send(Reply {
                        peer: peer.clone(),
                        agent: AgentId::new(agent),
                        outcome: outcome.map_err(|fault| fault.to_string()),
                    }),
                    Some(Pending::Call(_)) => {
                        return Err(frame::Error::ProtocolViolation(format!(
                            "Item for call request {}",
                            seq
                        ))
                        .into());
                    }
                    None => return Ok(()),
                };
                // The consumer stopped listening; forget the request.
                if !delivered {
                    pending.remove(&seq);
                }
            }
            Frame::Done { seq } => {
                pending.remove(&seq);
            }
            other @ (Frame::Call { .. } | Frame::Discover { .. }) => {
                return Err(frame::Error::ProtocolViolation(format!(
                    "Request frame {} received by caller",
                    other.seq()
                ))
                .into());
            }
        }
        Ok(())
    }

    fn next_seq(&self) -> u64 {
        self.seq_gen.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, seq: u64, frame: &Frame) -> Result<()> {
        let payload = frame.encode()?;
        if let Err(e) = self.transport.send(&payload).await {
            self.pending.remove(&seq);
            return Err(e.into());
        }
        Ok(())
    }

    /// Forgets requests whose caller has stopped listening.
    fn prune(&self) {
        self.pending.retain(|_, waiting| match waiting {
            Pending::Call(resolver) => !resolver.is_closed(),
            Pending::Discovery(sink) => !sink.is_closed(),
        });
    }

    async fn start_call(&self, agent: &AgentId, method: &str, args: &[String]) -> Result<(u64, PendingFuture)> {
        self.prune();
        let seq = self.next_seq();
        let (resolver, future) = PendingFuture::channel();
        self.pending.insert(seq, Pending::Call(resolver));

        let frame = Frame::Call {
            seq,
            agent: agent.to_string(),
            method: method.to_string(),
            args: args.to_vec(),
            oneway: false,
        };
        self.send(seq, &frame).await?;
        Ok((seq, future))
    }

    /// Sends a call and returns a placeholder for its reply.
    pub async fn call_pending(&self, agent: &AgentId, method: &str, args: &[String]) -> Result<PendingFuture> {
        let (_, future) = self.start_call(agent, method, args).await?;
        Ok(future)
    }

    /// Sends a call and waits for its reply.
    pub async fn call(&self, agent: &AgentId, method: &str, args: &[String]) -> platform::Result<String> {
        self.call_within(agent, method, args, CALL_TIMEOUT).await
    }

    /// Sends a call and waits at most `timeout` for its reply. A call that
    /// times out is forgotten, so a late reply is dropped.
    pub async fn call_within(
        &self,
        agent: &AgentId,
        method: &str,
        args: &[String],
        timeout: Duration,
    ) -> platform::Result<String> {
        let (seq, future) = self.start_call(agent, method, args).await?;
        let result = future.wait(Some(timeout)).await;
        if result.is_err() {
            self.pending.remove(&seq);
        }
        result
    }

    pub async fn call_oneway(&self, agent: &AgentId, method: &str, args: &[String]) -> Result<()> {
        let seq = self.next_seq();
        let frame = Frame::Call {
            seq,
            agent: agent.to_string(),
            method: method.to_string(),
            args: args.to_vec(),
            oneway: true,
        };
        self.send(seq, &frame).await
    }

    /// Sends a discovery; every reply the node produces is pushed into `sink`.
    /// The link keeps its clone of `sink` until the node sends `Done`.
    pub async fn discover(&self, query: &str, method: &str, args: &[String], sink: ReplySink) -> Result<()> {
        self.prune();
        let seq = self.next_seq();
        self.pending.insert(seq, Pending::Discovery(sink));

        let frame = Frame::Discover {
            seq,
            query: query.to_string(),
            method: method.to_string(),
            args: args.to_vec(),
            oneway: false,
        };
        self.send(seq, &frame).await
    }

    pub async fn discover_oneway(&self, query: &str, method: &str, args: &[String]) -> Result<()> {
        let seq = self.next_seq();
        let frame = Frame::Discover {
            seq,
            query: query.to_string(),
            method: method.to_string(),
            args: args.to_vec(),
            oneway: true,
        };
        self.send(seq, &frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsh_core::stream::ResultStream;

    use crate::transport::ChannelTransport;

    /// Answers every call with `agent.method` and every discovery with two
    /// items, one of them failed.
    fn spawn_echo_server(server: ChannelTransport) {
        tokio::spawn(async move {
            while let Ok(Some(msg)) = server.recv().await {
                let replies = match Frame::decode(&msg).unwrap() {
                    Frame::Call { oneway: true, .. } => vec![],
                    Frame::Call { seq, agent, method, .. } => vec![Frame::Reply {
                        seq,
                        outcome: match agent.as_str() {
                            "ghost" => Err(Fault::NoSuchAgent(agent)),
                            _ => Ok(format!("{agent}.{method}")),
                        },
                    }],
                    Frame::Discover { seq, .. } => vec![
                        Frame::Item { seq, agent: "a1".into(), outcome: Ok("one".into()) },
                        Frame::Item { seq, agent: "a2".into(), outcome: Err(Fault::Raised("boom".into())) },
                        Frame::Done { seq },
                    ],
                    _ => vec![],
                };
                for reply in replies {
                    server.send(&reply.encode().unwrap()).await.unwrap();
                }
            }
        });
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (client, server) = ChannelTransport::pair();
        spawn_echo_server(server);
        let link = Link::new(PeerId::new("p1"), Box::new(client));

        let value = link.call(&AgentId::new("x"), "getName", &[]).await;
        assert_eq!(value, Ok("x.getName".into()));

        let missing = link.call(&AgentId::new("ghost"), "getName", &[]).await;
        assert_eq!(missing, Err(platform::Error::AgentNotFound(AgentId::new("ghost"))));
        assert_eq!(link.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_demultiplexed() {
        let (client, server) = ChannelTransport::pair();
        spawn_echo_server(server);
        let link = Arc::new(Link::new(PeerId::new("p1"), Box::new(client)));

        let mut tasks = Vec::new();
        for n in 0..16 {
            let link = link.clone();
            tasks.push(tokio::spawn(async move {
                let agent = AgentId::new(format!("a{n}"));
                (n, link.call(&agent, "m", &[]).await)
            }));
        }
        for task in tasks {
            let (n, value) = task.await.unwrap();
            assert_eq!(value, Ok(format!("a{n}.m")));
        }
    }

    #[tokio::test]
    async fn test_discovery_items_carry_the_peer() {
        let (client, server) = ChannelTransport::pair();
        spawn_echo_server(server);
        let link = Link::new(PeerId::new("p7"), Box::new(client));

        let (sink, mut stream) = ResultStream::channel();
        link.discover("true", "getName", &[], sink).await.unwrap();

        let first = stream.next(Some(Duration::from_secs(1))).await.unwrap();
        let second = stream.next(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(first, Reply::ok(PeerId::new("p7"), AgentId::new("a1"), "one"));
        assert_eq!(second, Reply::failed(PeerId::new("p7"), AgentId::new("a2"), "boom"));
        assert!(stream.next(Some(Duration::from_secs(1))).await.is_err());
        assert!(!stream.has_more());
    }

    #[tokio::test]
    async fn test_timed_out_call_is_forgotten() {
        let (client, _silent) = ChannelTransport::pair();
        let link = Link::new(PeerId::new("p1"), Box::new(client));

        let result = link.call_within(&AgentId::new("x"), "m", &[], Duration::from_millis(20)).await;
        assert!(matches!(result, Err(platform::Error::Dispatch(_))));
        assert_eq!(link.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_requests_are_pruned() {
        let (client, _silent) = ChannelTransport::pair();
        let link = Link::new(PeerId::new("p1"), Box::new(client));

        let abandoned = link.call_pending(&AgentId::new("x"), "m", &[]).await.unwrap();
        let (sink, stream) = ResultStream::channel();
        link.discover("true", "m", &[], sink).await.unwrap();
        assert_eq!(link.in_flight(), 2);
        drop(abandoned);
        drop(stream);

        let _kept = link.call_pending(&AgentId::new("y"), "m", &[]).await.unwrap();
        assert_eq!(link.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_closed_transport_fails_waiting_calls() {
        let (client, server) = ChannelTransport::pair();
        let link = Link::new(PeerId::new("p1"), Box::new(client));

        let future = link.call_pending(&AgentId::new("x"), "m", &[]).await.unwrap();
        let (sink, mut stream) = ResultStream::channel();
        link.discover("true", "m", &[], sink).await.unwrap();
        drop(server);

        assert!(matches!(future.wait(None).await, Err(platform::Error::Dispatch(_))));
        assert_eq!(
            stream.next(Some(Duration::from_secs(1))).await,
            Err(agentsh_core::stream::Error::Exhausted),
        );
    }
}
