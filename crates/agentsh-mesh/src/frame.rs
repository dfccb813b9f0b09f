//! # Wire frames
//!
//! The envelope exchanged between a link and a node, serialized as JSON.
//!
//! - A `Call` is answered by exactly one `Reply` with the same `seq`, unless
//!   it is one-way.
//! - A `Discover` is answered by zero or more `Item`s and then one `Done`,
//!   all with the same `seq`, unless it is one-way.
//!
//! Decoding never panics; anything unreadable is an [`Error`].

use serde::Deserialize;
use serde::Serialize;

/// Why a remote agent produced no value.
///
/// These describe the remote side failing. Transport failures are reported
/// separately by the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fault", content = "detail", rename_all = "snake_case")]
pub enum Fault {
    /// The node hosts no agent with this id.
    NoSuchAgent(String),
    /// The agent is suspended.
    Asleep(String),
    /// The method does not exist on the agent.
    NoSuchMethod(String),
    /// The method ran and failed.
    Raised(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSuchAgent(id) => write!(f, "no such agent: {}", id),
            Self::Asleep(id) => write!(f, "agent {} is sleeping", id),
            Self::NoSuchMethod(method) => write!(f, "no such method: {}", method),
            Self::Raised(msg) => write!(f, "{}", msg),
        }
    }
}

pub type Outcome = std::result::Result<String, Fault>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Call {
        seq: u64,
        agent: String,
        method: String,
        args: Vec<String>,
        #[serde(default)]
        oneway: bool,
    },
    Discover {
        seq: u64,
        query: String,
        method: String,
        args: Vec<String>,
        #[serde(default)]
        oneway: bool,
    },
    Reply {
        seq: u64,
        outcome: Outcome,
    },
    Item {
        seq: u64,
        agent: String,
        outcome: Outcome,
    },
    Done {
        seq: u64,
    },
}

impl Frame {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Call { seq, .. }
            | Self::Discover { seq, .. }
            | Self::Reply { seq, .. }
            | Self::Item { seq, .. }
            | Self::Done { seq } => *seq,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Encode(String),
    Decode(String),
    /// A well-formed frame arrived where the protocol does not allow it.
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "Cannot encode frame: {}", msg),
            Self::Decode(msg) => write!(f, "Cannot decode frame: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oneway_defaults_to_false() {
        let bytes = br#"{"frame":"call","seq":3,"agent":"a","method":"m","args":["x"]}"#;
        let frame = Frame::decode(bytes).unwrap();
        assert_eq!(
            frame,
            Frame::Call {
                seq: 3,
                agent: "a".into(),
                method: "m".into(),
                args: vec!["x".into()],
                oneway: false,
            },
        );
    }

    #[test]
    fn test_fault_survives_the_wire() {
        let frame = Frame::Item {
            seq: 9,
            agent: "a1".into(),
            outcome: Err(Fault::Asleep("a1".into())),
        };
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.seq(), 9);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(Frame::decode(b"\x00not json"), Err(Error::Decode(_))));
        assert!(matches!(Frame::decode(br#"{"frame":"bogus","seq":1}"#), Err(Error::Decode(_))));
    }
}
