//! # Agents
//!
//! An agent is a named, long-lived object hosted by a node. What it does is
//! decided by its class, a [`Behavior`] looked up by name when the agent is
//! created. Every agent also answers a few methods of its own regardless of
//! class:
//!
//! | method | result |
//! |---|---|
//! | `getName` | the agent's name |
//! | `getId` | the agent's id |
//! | `getCategory` | its category, or an empty string |
//! | `getClass` | its class name |
//! | `getLocation` | `(lng, lat)`, or an empty string |
//! | `setLocation lng lat` | moves the agent, returns the new location |
//!
//! Built-in classes:
//!
//! - `echo`: `echo args...` joins its arguments, `delay ms [value]` answers
//!   after a pause, `fail [reason]` always raises.
//! - `counter`: `inc [n]`, `dec [n]`, `get`, `reset`.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use agentsh_core::AgentId;
use agentsh_core::platform::Location;

use crate::frame::Fault;
use crate::query::Attributes;
use crate::query::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnknownClass(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownClass(class) => write!(f, "Unknown agent class: {}", class),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Class-specific methods of an agent.
#[async_trait::async_trait]
pub trait Behavior: Send + Sync + 'static {
    fn class(&self) -> &'static str;

    async fn invoke(&self, method: &str, args: &[String]) -> std::result::Result<String, Fault>;

    /// A fresh behavior of the same class carrying a copy of this one's state.
    fn duplicate(&self) -> Box<dyn Behavior>;
}

/// Looks up a built-in class by name.
pub fn behavior_for(class: &str) -> Result<Box<dyn Behavior>> {
    match class {
        "echo" => Ok(Box::new(Echo)),
        "counter" => Ok(Box::new(Counter::default())),
        other => Err(Error::UnknownClass(other.to_string())),
    }
}

pub struct Echo;

#[async_trait::async_trait]
impl Behavior for Echo {
    fn class(&self) -> &'static str {
        "echo"
    }

    async fn invoke(&self, method: &str, args: &[String]) -> std::result::Result<String, Fault> {
        match method {
            "echo" => Ok(args.join(" ")),
            "delay" => {
                let ms: u64 = parse_arg(args, 0)?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(args.get(1).cloned().unwrap_or_else(|| "done".to_string()))
            }
            "fail" => Err(Fault::Raised(
                args.first().cloned().unwrap_or_else(|| "failed on request".to_string()),
            )),
            other => Err(Fault::NoSuchMethod(other.to_string())),
        }
    }

    fn duplicate(&self) -> Box<dyn Behavior> {
        Box::new(Echo)
    }
}

#[derive(Default)]
pub struct Counter {
    value: AtomicI64,
}

#[async_trait::async_trait]
impl Behavior for Counter {
    fn class(&self) -> &'static str {
        "counter"
    }

    async fn invoke(&self, method: &str, args: &[String]) -> std::result::Result<String, Fault> {
        let step = || -> std::result::Result<i64, Fault> {
            if args.is_empty() { Ok(1) } else { parse_arg(args, 0) }
        };
        let value = match method {
            "inc" => {
                let n = step()?;
                self.value.fetch_add(n, Ordering::SeqCst) + n
            }
            "dec" => {
                let n = step()?;
                self.value.fetch_sub(n, Ordering::SeqCst) - n
            }
            "get" => self.value.load(Ordering::SeqCst),
            "reset" => {
                self.value.store(0, Ordering::SeqCst);
                0
            }
            other => return Err(Fault::NoSuchMethod(other.to_string())),
        };
        Ok(value.to_string())
    }

    fn duplicate(&self) -> Box<dyn Behavior> {
        Box::new(Counter {
            value: AtomicI64::new(self.value.load(Ordering::SeqCst)),
        })
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize) -> std::result::Result<T, Fault> {
    let raw = args
        .get(index)
        .ok_or_else(|| Fault::Raised(format!("missing argument {}", index + 1)))?;
    raw.parse()
        .map_err(|_| Fault::Raised(format!("bad argument: {}", raw)))
}

pub struct Agent {
    id: AgentId,
    name: String,
    category: Option<String>,
    location: Mutex<Option<Location>>,
    sleeping: AtomicBool,
    behavior: Box<dyn Behavior>,
}

impl Agent {
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        category: Option<String>,
        location: Option<Location>,
        behavior: Box<dyn Behavior>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            location: Mutex::new(location),
            sleeping: AtomicBool::new(false),
            behavior,
        }
    }

    /// A copy with a new id, the same attributes and a duplicated behavior.
    /// The copy starts awake.
    pub fn duplicate(&self, id: AgentId) -> Self {
        Self::new(
            id,
            self.name.clone(),
            self.category.clone(),
            self.location(),
            self.behavior.duplicate(),
        )
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn class(&self) -> &'static str {
        self.behavior.class()
    }

    pub fn location(&self) -> Option<Location> {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::SeqCst)
    }

    pub fn set_sleeping(&self, sleeping: bool) {
        self.sleeping.store(sleeping, Ordering::SeqCst);
    }

    /// Runs a method. Sleeping agents refuse every call.
    pub async fn invoke(self: Arc<Self>, method: &str, args: &[String]) -> std::result::Result<String, Fault> {
        if self.is_sleeping() {
            return Err(Fault::Asleep(self.id.to_string()));
        }

        match method {
            "getName" => Ok(self.name.clone()),
            "getId" => Ok(self.id.to_string()),
            "getCategory" => Ok(self.category.clone().unwrap_or_default()),
            "getClass" => Ok(self.class().to_string()),
            "getLocation" => Ok(self.location().map(|l| l.to_string()).unwrap_or_default()),
            "setLocation" => {
                let location = Location::new(parse_arg(args, 0)?, parse_arg(args, 1)?);
                *self.location.lock().unwrap_or_else(PoisonError::into_inner) = Some(location);
                Ok(location.to_string())
            }
            _ => self.behavior.invoke(method, args).await,
        }
    }
}

impl Attributes for Agent {
    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::Text(self.name.clone())),
            "id" => Some(Value::Text(self.id.to_string())),
            "class" => Some(Value::Text(self.class().to_string())),
            "category" => self.category.clone().map(Value::Text),
            crate::query::LOCATION_ATTRIBUTE => self.location().map(Value::Point),
            _ => None,
        }
    }
}
