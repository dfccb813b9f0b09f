//! # Async Result Pump
//!
//! Background workers that drain pending results produced by `callasync` and
//! `discoverasync`. Each submitted [`Job`] gets its own tokio task, so one
//! slow remote never holds up another, and the console loop never waits on
//! any of them.
//!
//! Workers print through the shared [`Console`] and never touch the agent
//! registry.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Notify;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::warn;

use crate::call::CallFailure;
use crate::call::failure_line;
use crate::console::Console;
use crate::console::elapsed_line;
use crate::discover;
use crate::stream::PendingFuture;
use crate::stream::ResultStream;

/// One pending result handed to the pump.
#[derive(Debug)]
pub enum Job {
    Call { future: PendingFuture, started: Instant },
    Discovery { stream: ResultStream, started: Instant },
}

impl Job {
    fn label(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Discovery { .. } => "discovery",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PumpConfig {
    /// Per-element wait while draining. `None` waits until the result lands
    /// or the stream ends.
    pub item_timeout: Option<Duration>,
    /// Cap on concurrently running workers. `None` is unbounded.
    pub concurrency: Option<usize>,
}

struct PumpInner {
    console: Console,
    item_timeout: Option<Duration>,
    permits: Option<Arc<Semaphore>>,
    outstanding: AtomicUsize,
    idle: Notify,
}

#[derive(Clone)]
pub struct Pump {
    inner: Arc<PumpInner>,
}

impl Pump {
    pub fn new(console: Console, config: PumpConfig) -> Self {
        let permits = config
            .concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            inner: Arc::new(PumpInner {
                console,
                item_timeout: config.item_timeout,
                permits,
                outstanding: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Spawns a worker for `job` and returns at once.
    ///
    /// With a concurrency cap the worker queues for a permit inside its own
    /// task, so submission itself never waits.
    pub fn submit(&self, job: Job) {
        let inner = self.inner.clone();
        let outstanding = inner.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(kind = job.label(), outstanding, "pump job submitted");

        tokio::spawn(async move {
            let _done = Outstanding(inner.clone());
            let _permit = match &inner.permits {
                Some(permits) => match permits.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };
            inner.work(job).await;
        });
    }

    /// Number of submitted jobs that have not finished yet.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Resolves once every submitted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Pump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pump")
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl PumpInner {
    async fn work(&self, job: Job) {
        match job {
            Job::Call { future, started } => match future.wait(self.item_timeout).await {
                Ok(value) => {
                    self.console
                        .emit(format!(" return value: {}\n{}", value, elapsed_line(started)));
                }
                Err(e) => {
                    warn!(error = %e, "async call failed");
                    self.console.emit(failure_line(&CallFailure::from(e)));
                }
            },
            Job::Discovery { stream, started } => {
                discover::drain(stream, self.item_timeout, &self.console, started).await;
            }
        }
    }
}

/// Marks a job finished when its worker exits, however it exits.
struct Outstanding(Arc<PumpInner>);

impl Drop for Outstanding {
    fn drop(&mut self) {
        if self.0.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::AgentId;
    use crate::handles::PeerId;
    use crate::platform;
    use crate::stream::Reply;

    #[tokio::test]
    async fn test_call_job_prints_value_and_time() {
        let (console, captured) = Console::capture();
        let pump = Pump::new(console, PumpConfig::default());

        pump.submit(Job::Call {
            future: PendingFuture::ready(Ok("42".into())),
            started: Instant::now(),
        });
        pump.wait_idle().await;

        let lines = captured.lines();
        assert_eq!(lines[0], " return value: 42");
        assert!(lines[1].starts_with("\t## time (msec): "));
    }

    #[tokio::test]
    async fn test_call_job_failure() {
        let (console, captured) = Console::capture();
        let pump = Pump::new(console, PumpConfig::default());

        pump.submit(Job::Call {
            future: PendingFuture::ready(Err(platform::Error::Remote("boom".into()))),
            started: Instant::now(),
        });
        pump.wait_idle().await;

        assert_eq!(captured.contents(), "\t>> cannot call agent: remote invocation failed: boom.\n");
    }

    #[tokio::test]
    async fn test_submit_does_not_wait_for_result() {
        let (console, captured) = Console::capture();
        let pump = Pump::new(console, PumpConfig::default());
        let (resolver, future) = PendingFuture::channel();

        pump.submit(Job::Call { future, started: Instant::now() });
        assert_eq!(pump.outstanding(), 1);
        assert_eq!(captured.contents(), "");

        resolver.resolve(Ok("late".into()));
        pump.wait_idle().await;
        assert_eq!(pump.outstanding(), 0);
        assert!(captured.contents().starts_with(" return value: late\n"));
    }

    #[tokio::test]
    async fn test_bounded_pump_runs_every_job() {
        let (console, captured) = Console::capture();
        let pump = Pump::new(
            console,
            PumpConfig { item_timeout: None, concurrency: Some(1) },
        );

        for n in 0..5 {
            pump.submit(Job::Discovery {
                stream: ResultStream::from_replies([Reply::ok(
                    PeerId::new("p"),
                    AgentId::new(format!("a{n}")),
                    n.to_string(),
                )]),
                started: Instant::now(),
            });
        }
        pump.wait_idle().await;

        let out = captured.contents();
        for n in 0..5 {
            assert!(out.contains(&format!(" agentId: a{n}\n")));
        }
    }

    #[tokio::test]
    async fn test_wait_idle_on_fresh_pump() {
        let (console, _captured) = Console::capture();
        let pump = Pump::new(console, PumpConfig::default());
        pump.wait_idle().await;
    }
}
