//! # Pending results
//!
//! Two placeholders carry results that arrive after the invoking command
//! returns:
//!
//! - [`PendingFuture`] resolves exactly once, with a value or a failure.
//! - [`ResultStream`] yields an unknown number of per-agent replies from a
//!   discovery call. It is single-pass: once an element is taken it is gone,
//!   and the stream ends when every producer has dropped its [`ReplySink`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::handles::AgentId;
use crate::handles::PeerId;
use crate::platform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Every producer is gone and nothing is buffered.
    Exhausted,
    /// No element arrived within the allotted wait.
    Timeout,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "Result stream exhausted"),
            Self::Timeout => write!(f, "Timed out waiting for the next result"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One element of a discovery result stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The peer hosting the agent that produced this reply.
    pub peer: PeerId,
    pub agent: AgentId,
    /// The method's return value, or the failure it raised on that agent.
    pub outcome: std::result::Result<String, String>,
}

impl Reply {
    pub fn ok(peer: PeerId, agent: AgentId, value: impl Into<String>) -> Self {
        Self { peer, agent, outcome: Ok(value.into()) }
    }

    pub fn failed(peer: PeerId, agent: AgentId, reason: impl Into<String>) -> Self {
        Self { peer, agent, outcome: Err(reason.into()) }
    }
}

/// Producer half of a [`ResultStream`]. Clone one per replying peer.
#[derive(Clone, Debug)]
pub struct ReplySink {
    tx: mpsc::UnboundedSender<Reply>,
}

impl ReplySink {
    /// Pushes a reply. Returns `false` once the consumer has gone away.
    pub fn send(&self, reply: Reply) -> bool {
        self.tx.send(reply).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Lazy, single-pass sequence of discovery replies.
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::UnboundedReceiver<Reply>,
    peeked: Option<Reply>,
    finished: bool,
}

impl ResultStream {
    /// Creates a connected sink and stream.
    pub fn channel() -> (ReplySink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            rx,
            peeked: None,
            finished: false,
        };
        (ReplySink { tx }, stream)
    }

    /// A stream that yields exactly `replies` and then ends.
    pub fn from_replies(replies: impl IntoIterator<Item = Reply>) -> Self {
        let (sink, stream) = Self::channel();
        for reply in replies {
            sink.send(reply);
        }
        stream
    }

    /// Reports, without waiting, whether another element may still arrive.
    ///
    /// `false` is final: the producers are gone and the buffer is drained.
    pub fn has_more(&mut self) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        if self.finished {
            return false;
        }
        match self.rx.try_recv() {
            Ok(reply) => {
                self.peeked = Some(reply);
                true
            }
            Err(mpsc::error::TryRecvError::Empty) => true,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.finished = true;
                false
            }
        }
    }

    /// Waits for the next element, giving up after `timeout` if one is set.
    pub async fn next(&mut self, timeout: Option<Duration>) -> Result<Reply> {
        if let Some(reply) = self.peeked.take() {
            return Ok(reply);
        }
        if self.finished {
            return Err(Error::Exhausted);
        }

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx.recv())
                .await
                .map_err(|_| Error::Timeout)?,
            None => self.rx.recv().await,
        };

        match received {
            Some(reply) => Ok(reply),
            None => {
                self.finished = true;
                Err(Error::Exhausted)
            }
        }
    }
}

/// Producer half of a [`PendingFuture`].
#[derive(Debug)]
pub struct Resolver {
    tx: oneshot::Sender<platform::Result<String>>,
}

impl Resolver {
    /// Completes the future. Ignored if nobody is waiting any more.
    pub fn resolve(self, result: platform::Result<String>) {
        let _ = self.tx.send(result);
    }

    /// Whether the [`PendingFuture`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Placeholder for the single result of an asynchronous call.
#[derive(Debug)]
pub struct PendingFuture {
    rx: oneshot::Receiver<platform::Result<String>>,
}

impl PendingFuture {
    pub fn channel() -> (Resolver, Self) {
        let (tx, rx) = oneshot::channel();
        (Resolver { tx }, Self { rx })
    }

    /// A future that is already resolved.
    pub fn ready(result: platform::Result<String>) -> Self {
        let (resolver, future) = Self::channel();
        resolver.resolve(result);
        future
    }

    /// Waits for the result. A dropped resolver counts as a dispatch failure.
    pub async fn wait(self, timeout: Option<Duration>) -> platform::Result<String> {
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx)
                .await
                .map_err(|_| platform::Error::Dispatch("Timed out waiting for reply".into()))?,
            None => self.rx.await,
        };

        received.map_err(|_| platform::Error::Dispatch("Reply channel closed".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(n: u32) -> Reply {
        Reply::ok(PeerId::new("p"), AgentId::new(format!("a{n}")), n.to_string())
    }

    #[tokio::test]
    async fn test_stream_yields_in_order_then_exhausts() {
        let mut stream = ResultStream::from_replies([reply(1), reply(2)]);

        assert!(stream.has_more());
        assert_eq!(stream.next(None).await.unwrap(), reply(1));
        assert_eq!(stream.next(None).await.unwrap(), reply(2));
        assert_eq!(stream.next(None).await, Err(Error::Exhausted));
        assert!(!stream.has_more());
        assert_eq!(stream.next(None).await, Err(Error::Exhausted));
    }

    #[tokio::test]
    async fn test_has_more_does_not_lose_the_peeked_element() {
        let (sink, mut stream) = ResultStream::channel();
        sink.send(reply(7));
        drop(sink);

        assert!(stream.has_more());
        assert!(stream.has_more());
        assert_eq!(stream.next(None).await.unwrap(), reply(7));
        assert!(!stream.has_more());
    }

    #[tokio::test]
    async fn test_open_stream_times_out_and_stays_usable() {
        let (sink, mut stream) = ResultStream::channel();

        assert!(stream.has_more());
        let err = stream.next(Some(Duration::from_millis(20))).await.unwrap_err();
        assert_eq!(err, Error::Timeout);

        sink.send(reply(3));
        assert_eq!(stream.next(Some(Duration::from_millis(20))).await.unwrap(), reply(3));
    }

    #[tokio::test]
    async fn test_sink_notices_dropped_stream() {
        let (sink, stream) = ResultStream::channel();
        drop(stream);
        assert!(sink.is_closed());
        assert!(!sink.send(reply(1)));
    }

    #[tokio::test]
    async fn test_pending_future_resolves_once() {
        let (resolver, future) = PendingFuture::channel();
        tokio::spawn(async move {
            resolver.resolve(Ok("done".into()));
        });
        assert_eq!(future.wait(None).await, Ok("done".into()));
    }

    #[tokio::test]
    async fn test_pending_future_dropped_resolver_is_dispatch_failure() {
        let (resolver, future) = PendingFuture::channel();
        drop(resolver);
        assert!(matches!(future.wait(None).await, Err(platform::Error::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_resolver_notices_dropped_future() {
        let (resolver, future) = PendingFuture::channel();
        assert!(!resolver.is_closed());
        drop(future);
        assert!(resolver.is_closed());
    }

    #[tokio::test]
    async fn test_pending_future_timeout() {
        let (_resolver, future) = PendingFuture::channel();
        let result = future.wait(Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(platform::Error::Dispatch(_))));
    }
}
