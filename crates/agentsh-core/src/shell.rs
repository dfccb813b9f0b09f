//! # Console Loop
//!
//! Reads one line at a time, tokenizes it, checks it against the command
//! table and runs it to completion before reading the next line. Blocking
//! calls and blocking discovery drains run on this loop; asynchronous ones are
//! handed to the [`Pump`] and return at once.
//!
//! A bad line never ends the loop. Unknown commands, wrong argument counts and
//! unreadable addresses print the help text. A panic inside one command is
//! logged and the next prompt is shown.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::FutureExt;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::address;
use crate::agentfile;
use crate::agentfile::AgentSpec;
use crate::call::CallDispatcher;
use crate::command;
use crate::command::Command;
use crate::command::CommandKind;
use crate::command::HELP;
use crate::console::Console;
use crate::console::elapsed_line;
use crate::discover::DEFAULT_ITEM_TIMEOUT;
use crate::discover::DiscoveryDispatcher;
use crate::handles::AgentId;
use crate::platform::Platform;
use crate::pump::Pump;
use crate::pump::PumpConfig;
use crate::registry::AgentRegistry;
use crate::tokenize;

pub const DEFAULT_PROMPT: &str = "Input Command >";

#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Directory `mkagent <file>` resolves against.
    pub agent_dir: PathBuf,
    /// Per-element wait of the blocking discovery drain.
    pub discovery_timeout: Duration,
    /// Per-element wait of pump drains.
    pub async_item_timeout: Option<Duration>,
    pub pump_concurrency: Option<usize>,
    pub prompt: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            agent_dir: PathBuf::from("."),
            discovery_timeout: DEFAULT_ITEM_TIMEOUT,
            async_item_timeout: None,
            pump_concurrency: None,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

/// Whether the loop keeps reading after a line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Reasons a line is rejected before anything is dispatched.
#[derive(Debug)]
enum Error {
    Tokenize(tokenize::Error),
    Command(command::Error),
    Address(address::Error),
    NotANumber(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tokenize(e) => write!(f, "{}", e),
            Self::Command(e) => write!(f, "{}", e),
            Self::Address(e) => write!(f, "{}", e),
            Self::NotANumber(arg) => write!(f, "Not a number: {}", arg),
        }
    }
}

impl From<tokenize::Error> for Error {
    fn from(e: tokenize::Error) -> Self {
        Self::Tokenize(e)
    }
}

impl From<command::Error> for Error {
    fn from(e: command::Error) -> Self {
        Self::Command(e)
    }
}

impl From<address::Error> for Error {
    fn from(e: address::Error) -> Self {
        Self::Address(e)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// What to print once a command has run.
enum Outcome {
    /// Ran; report the elapsed time.
    Done,
    /// Ran; nothing more to print.
    Quiet,
    Exit,
}

#[derive(Copy, Clone, Debug)]
enum Lifecycle {
    Duplicate,
    Sleep,
    Wake,
    Destroy,
}

impl Lifecycle {
    fn verb(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Sleep => "sleep",
            Self::Wake => "wake",
            Self::Destroy => "destroy",
        }
    }
}

pub struct Shell {
    platform: Arc<dyn Platform>,
    registry: AgentRegistry,
    console: Console,
    pump: Pump,
    calls: CallDispatcher,
    discovery: DiscoveryDispatcher,
    agent_dir: PathBuf,
    prompt: String,
}

impl Shell {
    pub fn new(platform: Arc<dyn Platform>, console: Console, config: ShellConfig) -> Self {
        let pump = Pump::new(
            console.clone(),
            PumpConfig {
                item_timeout: config.async_item_timeout,
                concurrency: config.pump_concurrency,
            },
        );
        let calls = CallDispatcher::new(platform.clone(), pump.clone(), console.clone());
        let discovery = DiscoveryDispatcher::new(
            platform.clone(),
            pump.clone(),
            console.clone(),
            config.discovery_timeout,
        );

        Self {
            platform,
            registry: AgentRegistry::new(),
            console,
            pump,
            calls,
            discovery,
            agent_dir: config.agent_dir,
            prompt: config.prompt,
        }
    }

    pub fn pump(&self) -> &Pump {
        &self.pump
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Reads and runs lines from `input` until `bye` or end of input.
    pub async fn run<R>(&mut self, input: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            self.console.prompt(&self.prompt);
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if self.execute(&line).await == Flow::Exit {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    info!("end of input, shutting down");
                    self.console.emit("");
                    self.shutdown().await;
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "cannot read console input");
                    self.shutdown().await;
                    return Err(e);
                }
            }
        }
    }

    /// Runs one line of operator input.
    pub async fn execute(&mut self, line: &str) -> Flow {
        let line = line.trim();
        if line.is_empty() {
            return Flow::Continue;
        }

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.dispatch(line, started)).catch_unwind().await;

        match outcome {
            Ok(Ok(Outcome::Done)) => self.console.emit(elapsed_line(started)),
            Ok(Ok(Outcome::Quiet)) => {}
            Ok(Ok(Outcome::Exit)) => return Flow::Exit,
            Ok(Err(Error::NotANumber(arg))) => {
                debug!(arg, "numeric argument expected");
                self.console.emit("\t>> argument must be a number.");
            }
            Ok(Err(e)) => {
                debug!(error = %e, line, "rejected command");
                self.console.emit(HELP);
            }
            Err(_) => error!(line, "command panicked"),
        }
        Flow::Continue
    }

    /// Leaves the network if joined.
    pub async fn shutdown(&self) {
        if self.platform.is_online() {
            self.leave().await;
        }
    }

    async fn dispatch(&mut self, line: &str, started: Instant) -> Result<Outcome> {
        let command = Command::parse(tokenize::split(line)?)?;
        let args = command.args.as_slice();

        match command.kind {
            CommandKind::Info => self.info().await,
            CommandKind::Agents => self.agents(args.first().map(String::as_str)).await,
            CommandKind::Join => {
                if let Err(e) = self.platform.join().await {
                    warn!(error = %e, "join failed");
                    self.console.emit("\t>> join failed.");
                }
            }
            CommandKind::Leave => self.leave().await,
            CommandKind::MkAgent => self.mkagent(args).await,
            CommandKind::Dup => self.lifecycle(Lifecycle::Duplicate, &args[0]).await?,
            CommandKind::Sleep => self.lifecycle(Lifecycle::Sleep, &args[0]).await?,
            CommandKind::Wake => self.lifecycle(Lifecycle::Wake, &args[0]).await?,
            CommandKind::Fin => self.lifecycle(Lifecycle::Destroy, &args[0]).await?,
            CommandKind::Call(kind) => {
                let invocation = address::resolve(args)?;
                match self.registry.target(&invocation.address) {
                    Ok(target) => {
                        self.calls
                            .invoke(&target, &invocation.method, &invocation.args, kind, started)
                            .await
                    }
                    Err(e) => {
                        debug!(error = %e, "call to stale agent number");
                        self.console.emit("\t>> invalid agent number.");
                    }
                }
            }
            CommandKind::Discover(kind) => {
                self.discovery
                    .discover(&args[0], &args[1], &args[2..], kind, started)
                    .await
            }
            CommandKind::DiscoverLocation => {
                let lng = number(&args[0])?;
                let lat = number(&args[1])?;
                let width = number(&args[2])?;
                let height = number(&args[3])?;
                self.discovery
                    .discover_location(lng, lat, width, height, &args[4], &args[5..], started)
                    .await
            }
            CommandKind::Help => {
                self.console.emit(HELP);
                return Ok(Outcome::Quiet);
            }
            CommandKind::Bye => {
                self.shutdown().await;
                return Ok(Outcome::Exit);
            }
        }

        Ok(Outcome::Done)
    }

    async fn info(&self) {
        match self.platform.info().await {
            Ok(info) => {
                let location = info
                    .location
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "none".to_string());
                self.console.emit(format!(
                    " peerName: {}\n peerId: {}\n locator: {}\n location: {}\n{}",
                    info.peer_name, info.peer_id, info.locator, location, info.routing_table,
                ));
            }
            Err(e) => warn!(error = %e, "cannot describe local peer"),
        }
    }

    async fn agents(&mut self, category: Option<&str>) {
        match self.registry.refresh(self.platform.as_ref(), category).await {
            Ok(listing) => {
                let mut block = Vec::with_capacity(listing.len());
                for (i, agent) in listing.iter().enumerate() {
                    let sleeping = if agent.sleeping { " <sleep>" } else { "" };
                    block.push(format!(" {}. name: {}, ID: {}{}", i, agent.name, agent.id, sleeping));
                }
                if !block.is_empty() {
                    self.console.emit(block.join("\n"));
                }
            }
            Err(e) => warn!(error = %e, "cannot list agents"),
        }
    }

    async fn leave(&self) {
        if let Err(e) = self.platform.leave().await {
            warn!(error = %e, "leave failed");
            self.console.emit("\t>> leave failed.");
        }
    }

    async fn mkagent(&self, args: &[String]) {
        if let [file] = args {
            return self.mkagent_from_file(file).await;
        }

        let Some(spec) = AgentSpec::from_words(args) else {
            return;
        };
        match self
            .platform
            .create_agent(&spec.class, &spec.name, spec.category.as_deref())
            .await
        {
            Ok(id) => info!(class = %spec.class, name = %spec.name, %id, "created agent"),
            Err(e) => {
                warn!(class = %spec.class, error = %e, "cannot create agent");
                self.console.emit("\t>> cannot create new agent.");
            }
        }
    }

    async fn mkagent_from_file(&self, file: &str) {
        let path = self.agent_dir.join(file);
        if !is_file(&path).await {
            self.console.emit(format!(
                "\t>> {} is not found at {}",
                file,
                self.agent_dir.display(),
            ));
            return;
        }

        match agentfile::load_file(self.platform.as_ref(), &path).await {
            Ok(report) if report.failed == 0 => {}
            Ok(report) => {
                warn!(file, failed = report.failed, "some agents were not created");
                self.console.emit("\t>> cannot create new agent.");
            }
            Err(e) => {
                warn!(error = %e, "cannot read agent file");
                self.console.emit("\t>> cannot create new agent.");
            }
        }
    }

    async fn lifecycle(&self, op: Lifecycle, arg: &str) -> Result<()> {
        let index: i64 = arg.parse().map_err(|_| Error::NotANumber(arg.to_string()))?;
        let id: AgentId = match usize::try_from(index)
            .ok()
            .and_then(|i| self.registry.resolve_local(i).ok())
        {
            Some(id) => id.clone(),
            None => {
                self.console.emit("\t>> invalid agent number.");
                return Ok(());
            }
        };

        let result = match op {
            Lifecycle::Duplicate => self
                .platform
                .duplicate_agent(&id)
                .await
                .map(|copy| info!(original = %id, %copy, "duplicated agent")),
            Lifecycle::Sleep => self.platform.sleep_agent(&id).await,
            Lifecycle::Wake => self.platform.wake_agent(&id).await,
            Lifecycle::Destroy => self.platform.destroy_agent(&id).await,
        };

        if let Err(e) = result {
            warn!(agent = %id, op = op.verb(), error = %e, "agent lifecycle operation failed");
            self.console.emit(format!("\t>> cannot {} agent.", op.verb()));
        }
        Ok(())
    }
}

fn number(arg: &str) -> Result<f64> {
    arg.parse().map_err(|_| Error::NotANumber(arg.to_string()))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
