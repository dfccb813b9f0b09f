//! # Discovery Dispatcher
//!
//! Broadcasts a method call to every agent matching a query across all
//! reachable peers. Replies come back as a [`ResultStream`] of unknown length.
//!
//! The blocking variant drains the stream on the console loop with a
//! per-element timeout. A timeout ends the drain quietly; replies already
//! printed stand. A failing element is printed with its origin and the drain
//! moves on to the next one.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::warn;

use crate::call::CallFailure;
use crate::command::CallKind;
use crate::console::Console;
use crate::console::elapsed_line;
use crate::platform;
use crate::platform::Platform;
use crate::pump::Job;
use crate::pump::Pump;
use crate::stream;
use crate::stream::Reply;
use crate::stream::ResultStream;

/// Per-element wait of a blocking drain.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_millis(3000);

/// Builds the canonical "location inside rectangle" predicate.
pub fn location_query(attribute: &str, lng: f64, lat: f64, width: f64, height: f64) -> String {
    format!("{attribute} inside rect({lng:.6}, {lat:.6}, {width:.6}, {height:.6})")
}

/// Counts of what one drain saw.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub replies: usize,
    pub failures: usize,
    pub timed_out: bool,
}

/// Prints every element of `stream` until it ends or an element takes longer
/// than `item_timeout`.
pub async fn drain(
    mut stream: ResultStream,
    item_timeout: Option<Duration>,
    console: &Console,
    started: Instant,
) -> DrainSummary {
    let mut summary = DrainSummary::default();

    while stream.has_more() {
        match stream.next(item_timeout).await {
            Ok(reply) => {
                summary.replies += 1;
                if reply.outcome.is_err() {
                    summary.failures += 1;
                }
                console.emit(render(&reply, started));
            }
            Err(stream::Error::Timeout) => {
                console.emit(" Timeout.");
                summary.timed_out = true;
                break;
            }
            Err(stream::Error::Exhausted) => break,
        }
    }

    debug!(?summary, "discovery drain finished");
    summary
}

fn render(reply: &Reply, started: Instant) -> String {
    let head = match &reply.outcome {
        Ok(value) => format!(" value: {}", value),
        Err(reason) => {
            warn!(peer = %reply.peer, agent = %reply.agent, reason, "discovery call failed on agent");
            let failure = CallFailure::RemoteInvocationFailed(reason.clone());
            format!("\t>> cannot call agent: {}.", failure)
        }
    };
    format!(
        "{}\n peerId: {}\n agentId: {}\n{}",
        head,
        reply.peer,
        reply.agent,
        elapsed_line(started),
    )
}

pub struct DiscoveryDispatcher {
    platform: Arc<dyn Platform>,
    pump: Pump,
    console: Console,
    item_timeout: Duration,
}

impl DiscoveryDispatcher {
    pub fn new(platform: Arc<dyn Platform>, pump: Pump, console: Console, item_timeout: Duration) -> Self {
        Self { platform, pump, console, item_timeout }
    }

    pub async fn discover(
        &self,
        query: &str,
        method: &str,
        args: &[String],
        kind: CallKind,
        started: Instant,
    ) {
        debug!(query, method, %kind, "dispatching discovery call");

        match kind {
            CallKind::OneWay => {
                if let Err(e) = self.platform.discover_oneway(query, method, args).await {
                    self.report(e);
                }
            }
            CallKind::Synchronous => {
                let stream = match self.platform.discover(query, method, args).await {
                    Ok(stream) => stream,
                    Err(e) => return self.report(e),
                };
                drain(stream, Some(self.item_timeout), &self.console, started).await;
            }
            CallKind::Asynchronous => match self.platform.discover(query, method, args).await {
                Ok(stream) => self.pump.submit(Job::Discovery { stream, started }),
                Err(e) => self.report(e),
            },
        }
    }

    /// Blocking discovery over agents inside the rectangle
    /// `(lng, lat)`..`(lng + width, lat + height)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn discover_location(
        &self,
        lng: f64,
        lat: f64,
        width: f64,
        height: f64,
        method: &str,
        args: &[String],
        started: Instant,
    ) {
        let query = location_query(self.platform.location_attribute(), lng, lat, width, height);
        self.discover(&query, method, args, CallKind::Synchronous, started).await;
    }

    fn report(&self, e: platform::Error) {
        match e {
            platform::Error::NotJoined => {
                warn!("discovery call attempted while not joined");
                self.console.emit("\t>> not joined.");
            }
            platform::Error::InvalidQuery(why) => {
                warn!(reason = %why, "discovery query rejected");
                self.console.emit(format!("\t>> invalid query: {}.", why));
            }
            other => {
                warn!(error = %other, "discovery call could not be dispatched");
                self.console.emit("\t>> could not dispatch discovery call.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::AgentId;
    use crate::handles::PeerId;

    #[test]
    fn test_location_query_format() {
        assert_eq!(
            location_query("$location", 135.5, 34.25, 1.0, 2.0),
            "$location inside rect(135.500000, 34.250000, 1.000000, 2.000000)",
        );
    }

    #[tokio::test]
    async fn test_drain_reports_failures_and_continues() {
        let (console, captured) = Console::capture();
        let stream = ResultStream::from_replies([
            Reply::ok(PeerId::new("p1"), AgentId::new("a1"), "one"),
            Reply::failed(PeerId::new("p1"), AgentId::new("a2"), "boom"),
            Reply::ok(PeerId::new("p2"), AgentId::new("a3"), "three"),
        ]);

        let summary = drain(stream, Some(DEFAULT_ITEM_TIMEOUT), &console, Instant::now()).await;

        assert_eq!(summary, DrainSummary { replies: 3, failures: 1, timed_out: false });
        let out = captured.contents();
        assert!(out.contains(" value: one\n peerId: p1\n agentId: a1\n"));
        assert!(out.contains("\t>> cannot call agent: remote invocation failed: boom.\n peerId: p1\n agentId: a2\n"));
        assert!(out.contains(" value: three\n peerId: p2\n agentId: a3\n"));
        assert!(!out.contains("Timeout"));
    }

    #[tokio::test]
    async fn test_drain_stops_on_silence() {
        let (console, captured) = Console::capture();
        let (sink, stream) = ResultStream::channel();
        sink.send(Reply::ok(PeerId::new("p1"), AgentId::new("a1"), "first"));

        let summary = drain(stream, Some(Duration::from_millis(30)), &console, Instant::now()).await;

        assert_eq!(summary, DrainSummary { replies: 1, failures: 0, timed_out: true });
        let lines = captured.lines();
        assert_eq!(lines.first().map(String::as_str), Some(" value: first"));
        assert_eq!(lines.last().map(String::as_str), Some(" Timeout."));
        drop(sink);
    }

    #[tokio::test]
    async fn test_drain_of_empty_stream_prints_nothing() {
        let (console, captured) = Console::capture();
        let summary = drain(ResultStream::from_replies([]), None, &console, Instant::now()).await;
        assert_eq!(summary, DrainSummary::default());
        assert_eq!(captured.contents(), "");
    }
}
