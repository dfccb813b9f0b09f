//! # Call Dispatcher
//!
//! Sends one method invocation to a resolved target with one of three call
//! kinds and reports the outcome on the console:
//!
//! - **Synchronous**: waits for the reply and prints it, or prints a failure.
//! - **One-way**: fires the invocation; dispatch failures are only logged.
//! - **Asynchronous**: obtains a [`PendingFuture`](crate::stream::PendingFuture)
//!   and hands it to the [`Pump`], which prints the outcome whenever it lands.
//!
//! No failure here ever propagates to the console loop.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use tracing::warn;

use crate::command::CallKind;
use crate::console::Console;
use crate::handles::Target;
use crate::platform;
use crate::platform::Platform;
use crate::pump::Job;
use crate::pump::Pump;

/// Why a call produced no value, as reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// No reachable peer hosts the addressed agent.
    AddressNotFound(String),
    /// The call reached the agent but the method raised.
    RemoteInvocationFailed(String),
    /// The call could not be sent, or its reply never came back.
    DispatchFailed(String),
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddressNotFound(what) => write!(f, "address not found: {}", what),
            Self::RemoteInvocationFailed(why) => write!(f, "remote invocation failed: {}", why),
            Self::DispatchFailed(why) => write!(f, "dispatch failed: {}", why),
        }
    }
}

impl From<platform::Error> for CallFailure {
    fn from(e: platform::Error) -> Self {
        use platform::Error as E;
        match e {
            E::AgentNotFound(id) => Self::AddressNotFound(format!("agent {}", id)),
            E::PeerNotFound(id) => Self::AddressNotFound(format!("peer {}", id)),
            E::Remote(why) => Self::RemoteInvocationFailed(why),
            E::NotJoined => Self::DispatchFailed("not joined to the network".into()),
            E::Dispatch(why) | E::Lifecycle(why) | E::InvalidQuery(why) => Self::DispatchFailed(why),
        }
    }
}

/// The operator-facing line for a failed call.
pub fn failure_line(failure: &CallFailure) -> String {
    format!("\t>> cannot call agent: {}.", failure)
}

pub struct CallDispatcher {
    platform: Arc<dyn Platform>,
    pump: Pump,
    console: Console,
}

impl CallDispatcher {
    pub fn new(platform: Arc<dyn Platform>, pump: Pump, console: Console) -> Self {
        Self { platform, pump, console }
    }

    /// Invokes `method` on `target`. `started` is when the operator's command
    /// began; late results report their elapsed time against it.
    pub async fn invoke(
        &self,
        target: &Target,
        method: &str,
        args: &[String],
        kind: CallKind,
        started: Instant,
    ) {
        debug!(%target, method, %kind, "dispatching call");

        match kind {
            CallKind::Synchronous => match self.platform.call(target, method, args).await {
                Ok(value) => self.console.emit(format!(" return value: {}", value)),
                Err(e) => self.report(target, method, e),
            },
            CallKind::OneWay => {
                if let Err(e) = self.platform.call_oneway(target, method, args).await {
                    warn!(%target, method, error = %e, "one-way call could not be dispatched");
                }
            }
            CallKind::Asynchronous => match self.platform.call_async(target, method, args).await {
                Ok(future) => self.pump.submit(Job::Call { future, started }),
                Err(e) => self.report(target, method, e),
            },
        }
    }

    fn report(&self, target: &Target, method: &str, e: platform::Error) {
        warn!(%target, method, error = %e, "call failed");
        self.console.emit(failure_line(&CallFailure::from(e)));
    }
}
