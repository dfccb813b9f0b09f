//! # Address Resolver
//!
//! Decides which agent a call-style command targets. The argument list after
//! the command name is tried against three forms, in this order:
//!
//! 1. `<n>`: a non-negative integer, an index into the agent registry.
//! 2. `aid:<agent>`: any peer hosting that agent.
//! 3. `pid:<peer> aid:<agent>`: that agent on one specific peer.
//!
//! Prefixes are matched case-insensitively. Whatever follows the consumed
//! address tokens is the method name and its arguments.

use crate::handles::AgentId;
use crate::handles::PeerId;

const AGENT_PREFIX: &str = "aid:";
const PEER_PREFIX: &str = "pid:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressSpec {
    LocalIndex(usize),
    ByAgent(AgentId),
    ByPeerAndAgent(PeerId, AgentId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The leading argument matches none of the address forms.
    Unrecognized(String),
    /// An address was found but no method name follows it.
    MissingMethod,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrecognized(arg) => write!(f, "Unrecognized agent address: {}", arg),
            Self::MissingMethod => write!(f, "No method name after the agent address"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A call-style command split into its address, method and arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub address: AddressSpec,
    pub method: String,
    pub args: Vec<String>,
}

/// Resolves the arguments of `call`, `calloneway` or `callasync`.
pub fn resolve(args: &[String]) -> Result<Invocation> {
    let first = args.first().ok_or(Error::MissingMethod)?;

    let (address, consumed) = if let Ok(index) = first.parse::<usize>() {
        (AddressSpec::LocalIndex(index), 1)
    } else if let Some(agent) = strip_prefix_ignore_case(first, AGENT_PREFIX) {
        (AddressSpec::ByAgent(AgentId::new(agent)), 1)
    } else if let (Some(peer), Some(agent)) = (
        strip_prefix_ignore_case(first, PEER_PREFIX),
        args.get(1).and_then(|second| strip_prefix_ignore_case(second, AGENT_PREFIX)),
    ) {
        (AddressSpec::ByPeerAndAgent(PeerId::new(peer), AgentId::new(agent)), 2)
    } else {
        return Err(Error::Unrecognized(first.clone()));
    };

    let mut rest = args[consumed..].iter().cloned();
    let method = rest.next().ok_or(Error::MissingMethod)?;

    Ok(Invocation {
        address,
        method,
        args: rest.collect(),
    })
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_integer_wins_over_everything() {
        let inv = resolve(&args(&["0", "method"])).unwrap();
        assert_eq!(inv.address, AddressSpec::LocalIndex(0));
        assert_eq!(inv.method, "method");
        assert!(inv.args.is_empty());
    }

    #[test]
    fn test_agent_prefix() {
        let inv = resolve(&args(&["aid:X", "method", "a", "b"])).unwrap();
        assert_eq!(inv.address, AddressSpec::ByAgent(AgentId::new("X")));
        assert_eq!(inv.method, "method");
        assert_eq!(inv.args, args(&["a", "b"]));
    }

    #[test]
    fn test_agent_prefix_is_case_insensitive() {
        let inv = resolve(&args(&["AID:X", "m"])).unwrap();
        assert_eq!(inv.address, AddressSpec::ByAgent(AgentId::new("X")));
    }

    #[test]
    fn test_peer_and_agent() {
        let inv = resolve(&args(&["pid:P", "aid:X", "method", "1"])).unwrap();
        assert_eq!(
            inv.address,
            AddressSpec::ByPeerAndAgent(PeerId::new("P"), AgentId::new("X")),
        );
        assert_eq!(inv.method, "method");
        assert_eq!(inv.args, args(&["1"]));
    }

    #[test]
    fn test_peer_without_agent_is_rejected() {
        assert_eq!(
            resolve(&args(&["pid:P", "method"])),
            Err(Error::Unrecognized("pid:P".into())),
        );
    }

    #[test]
    fn test_peer_and_agent_without_method() {
        assert_eq!(resolve(&args(&["pid:P", "aid:X"])), Err(Error::MissingMethod));
    }

    #[test]
    fn test_negative_number_is_not_an_index() {
        assert_eq!(resolve(&args(&["-1", "m"])), Err(Error::Unrecognized("-1".into())));
    }

    #[test]
    fn test_bare_word_is_rejected() {
        assert_eq!(resolve(&args(&["agent7", "m"])), Err(Error::Unrecognized("agent7".into())));
    }

    #[test]
    fn test_short_and_multibyte_prefix_candidates() {
        assert!(resolve(&args(&["ai", "m"])).is_err());
        assert!(resolve(&args(&["aï:x", "m"])).is_err());
    }

    #[test]
    fn test_empty_arguments() {
        assert_eq!(resolve(&[]), Err(Error::MissingMethod));
    }
}
