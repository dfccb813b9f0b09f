//! # Line Tokenizer
//!
//! Splits one operator line into a command name followed by its arguments.
//!
//! A command name starts with an ASCII letter and continues with word
//! characters or hyphens. Each argument is either a double-quoted run or a
//! whitespace-delimited bare token. Backslashes are stripped from every
//! argument, so `\"` inside a quoted run yields a literal quote. A quoted run
//! with no closing quote extends to the end of the line.

use std::sync::LazyLock;

use regex::Regex;

static COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*)(\s.+)?$").expect("command pattern is valid")
});

static ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+(?:"((?:\\"|[^"])*)"?|([^"]\S*))"#).expect("argument pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The line does not start with a well-formed command name.
    Malformed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(line) => write!(f, "Malformed command line: {:?}", line),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Tokenizes a line into `[command, arg0, arg1, ...]`.
///
/// Surrounding whitespace is ignored. Callers are expected to skip blank
/// lines before calling this; a blank line is reported as malformed.
pub fn split(line: &str) -> Result<Vec<String>> {
    let line = line.trim();
    let caps = COMMAND
        .captures(line)
        .ok_or_else(|| Error::Malformed(line.to_string()))?;

    let mut tokens = vec![caps[1].to_string()];

    let Some(rest) = caps.get(2) else {
        return Ok(tokens);
    };

    for arg in ARGUMENT.captures_iter(rest.as_str()) {
        let Some(m) = arg.get(1).or_else(|| arg.get(2)) else { continue };
        tokens.push(m.as_str().replace('\\', ""));
    }

    Ok(tokens)
}
