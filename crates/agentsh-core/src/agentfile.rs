//! # Agent description files
//!
//! One agent per line, `class name [category]`, tokenized like console input
//! so names may be quoted. Blank lines and lines starting with `#` are
//! skipped. A path may also name a directory, in which case every regular
//! file directly inside it is loaded in name order.

use std::path::Path;
use std::path::PathBuf;

use tracing::info;
use tracing::warn;

use crate::platform::Platform;
use crate::tokenize;

#[derive(Debug)]
pub enum Error {
    Io { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "Cannot read {}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub class: String,
    pub name: String,
    pub category: Option<String>,
}

impl AgentSpec {
    /// Reads `class name [category]` from already tokenized words.
    pub fn from_words(words: &[String]) -> Option<Self> {
        match words {
            [class, name] => Some(Self {
                class: class.clone(),
                name: name.clone(),
                category: None,
            }),
            [class, name, category] => Some(Self {
                class: class.clone(),
                name: name.clone(),
                category: Some(category.clone()),
            }),
            _ => None,
        }
    }
}

/// Parses the text of a description file, skipping lines it cannot use.
pub fn parse(text: &str) -> Vec<AgentSpec> {
    let mut specs = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let words = match tokenize::split(line) {
            Ok(words) => words,
            Err(e) => {
                warn!(line = n + 1, error = %e, "skipping malformed agent line");
                continue;
            }
        };
        match AgentSpec::from_words(&words) {
            Some(spec) => specs.push(spec),
            None => warn!(line = n + 1, words = words.len(), "agent line needs 'class name [category]'"),
        }
    }
    specs
}

/// What happened while creating agents from descriptions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub created: usize,
    pub failed: usize,
}

impl LoadReport {
    fn merge(&mut self, other: LoadReport) {
        self.created += other.created;
        self.failed += other.failed;
    }
}

/// Creates every described agent, carrying on past failures.
pub async fn create_all(platform: &dyn Platform, specs: &[AgentSpec]) -> LoadReport {
    let mut report = LoadReport::default();
    for spec in specs {
        match platform
            .create_agent(&spec.class, &spec.name, spec.category.as_deref())
            .await
        {
            Ok(id) => {
                info!(class = %spec.class, name = %spec.name, %id, "created agent");
                report.created += 1;
            }
            Err(e) => {
                warn!(class = %spec.class, name = %spec.name, error = %e, "cannot create agent");
                report.failed += 1;
            }
        }
    }
    report
}

/// Loads one description file.
pub async fn load_file(platform: &dyn Platform, path: &Path) -> Result<LoadReport> {
    let text = tokio::fs::read_to_string(path).await.map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(create_all(platform, &parse(&text)).await)
}

/// Loads a description file, or every file in a directory.
pub async fn load_path(platform: &dyn Platform, path: &Path) -> Result<LoadReport> {
    let io = |source| Error::Io { path: path.to_path_buf(), source };
    let meta = tokio::fs::metadata(path).await.map_err(io)?;
    if !meta.is_dir() {
        return load_file(platform, path).await;
    }

    let mut entries = tokio::fs::read_dir(path).await.map_err(io)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io)? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut report = LoadReport::default();
    for file in files {
        report.merge(load_file(platform, &file).await?);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_blank_and_bad_lines() {
        let text = "\
# demo agents
echo alice

counter \"bob the counter\" tally
lonely
echo carol cat extra
";
        let specs = parse(text);
        assert_eq!(
            specs,
            vec![
                AgentSpec {
                    class: "echo".into(),
                    name: "alice".into(),
                    category: None,
                },
                AgentSpec {
                    class: "counter".into(),
                    name: "bob the counter".into(),
                    category: Some("tally".into()),
                },
            ],
        );
    }

    #[test]
    fn test_from_words_arity() {
        let words = |w: &[&str]| w.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(AgentSpec::from_words(&words(&["echo"])).is_none());
        assert!(AgentSpec::from_words(&words(&["echo", "a"])).is_some());
        assert!(AgentSpec::from_words(&words(&["echo", "a", "c", "d"])).is_none());
    }
}
