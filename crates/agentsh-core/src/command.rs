//! # Command table
//!
//! Maps a tokenized line onto a known command and validates its argument
//! count. Every command has a full name, an optional abbreviation, and an
//! inclusive argument range.

/// How a call or discovery waits for its result.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Blocks the console loop until the reply or error is available.
    Synchronous,
    /// Returns immediately; no reply is expected.
    OneWay,
    /// Returns immediately; the pending result is drained by the pump.
    Asynchronous,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synchronous => write!(f, "sync"),
            Self::OneWay => write!(f, "oneway"),
            Self::Asynchronous => write!(f, "async"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Info,
    Agents,
    Join,
    Leave,
    MkAgent,
    Dup,
    Sleep,
    Wake,
    Fin,
    Call(CallKind),
    Discover(CallKind),
    DiscoverLocation,
    Help,
    Bye,
}

/// One row of the command table.
#[derive(Debug)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub abbrev: Option<&'static str>,
    pub min_args: usize,
    /// `None` means unbounded.
    pub max_args: Option<usize>,
}

impl CommandSpec {
    const fn new(
        kind: CommandKind,
        name: &'static str,
        abbrev: Option<&'static str>,
        min_args: usize,
        max_args: Option<usize>,
    ) -> Self {
        Self { kind, name, abbrev, min_args, max_args }
    }

    fn matches(&self, word: &str) -> bool {
        self.name == word || self.abbrev == Some(word)
    }

    fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.is_none_or(|max| count <= max)
    }
}

use CallKind::*;
use CommandKind::*;

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new(Info, "info", Some("i"), 0, Some(0)),
    CommandSpec::new(Agents, "agents", Some("ag"), 0, Some(1)),
    CommandSpec::new(Join, "join", None, 0, Some(0)),
    CommandSpec::new(Leave, "leave", None, 0, Some(0)),
    CommandSpec::new(MkAgent, "mkagent", Some("mk"), 1, Some(3)),
    CommandSpec::new(Dup, "dup", None, 1, Some(1)),
    CommandSpec::new(Sleep, "sleep", Some("sl"), 1, Some(1)),
    CommandSpec::new(Wake, "wake", Some("wa"), 1, Some(1)),
    CommandSpec::new(Fin, "fin", None, 1, Some(1)),
    CommandSpec::new(Call(Synchronous), "call", Some("c"), 2, None),
    CommandSpec::new(Call(OneWay), "calloneway", Some("co"), 2, None),
    CommandSpec::new(Call(Asynchronous), "callasync", Some("ca"), 2, None),
    CommandSpec::new(Discover(Synchronous), "discover", Some("dc"), 2, None),
    CommandSpec::new(Discover(OneWay), "discoveroneway", Some("dco"), 2, None),
    CommandSpec::new(Discover(Asynchronous), "discoverasync", Some("dca"), 2, None),
    CommandSpec::new(DiscoverLocation, "discoverlocation", Some("dcl"), 5, None),
    CommandSpec::new(Help, "help", Some("?"), 0, Some(0)),
    CommandSpec::new(Bye, "bye", None, 0, Some(0)),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Unknown(String),
    Arity { command: &'static str, given: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "Unknown command: {}", name),
            Self::Arity { command, given } => {
                write!(f, "Command '{}' does not take {} argument(s)", command, given)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A validated command with its raw arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub args: Vec<String>,
}

impl Command {
    /// Builds a command from `[name, args...]` as produced by the tokenizer.
    pub fn parse(mut tokens: Vec<String>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(Error::Unknown(String::new()));
        }
        let name = tokens.remove(0);
        let spec = lookup(&name).ok_or(Error::Unknown(name))?;

        if !spec.accepts(tokens.len()) {
            return Err(Error::Arity { command: spec.name, given: tokens.len() });
        }

        Ok(Self { kind: spec.kind, args: tokens })
    }
}

/// Finds the table row for a full name or abbreviation.
pub fn lookup(word: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.matches(word))
}

pub const HELP: &str = "\
 *** agentsh help ***
  i)nfo           show local peer information

  ag)ents [cat]   list agents, optionally only those in category cat

  join            join the network
  leave           leave the network

  mk)agent class name [cat]
                  create a new agent of class with name and category
  mk)agent file
                  create agents listed in file (one 'class name [cat]' per line)
  dup agent_NO    duplicate the agent indicated by agent_NO
  sl)eep agent_NO suspend the agent indicated by agent_NO
  wa)ke agent_NO  resume the agent indicated by agent_NO
  fin agent_NO    destroy the agent indicated by agent_NO

  c)all agent_NO method arg ...
  c)all aid:agent_ID method arg ...
  c)all pid:peer_ID aid:agent_ID method arg ...
                  call a remote agent method and wait for the result
  co,calloneway agent_NO|aid:agent_ID|pid:peer_ID aid:agent_ID method arg ...
                  call a remote agent method without waiting
  ca,callasync agent_NO|aid:agent_ID|pid:peer_ID aid:agent_ID method arg ...
                  call a remote agent method, print the result when it arrives

  dc,discover query method arg ...
                  call method on every agent matching query
  dco,discoveroneway query method arg ...
                  same as discover without waiting for replies
  dca,discoverasync query method arg ...
                  same as discover, print replies as they arrive
  dcl,discoverlocation lng lat w h method arg ...
                  call method on every agent located in (lng, lat, w, h)

  ?,help          show this help message
  bye             leave the network and exit
";
