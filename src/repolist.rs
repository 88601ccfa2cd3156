use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{CorpusError, Result};
use crate::jsonio::read_json;

/// Repository identifier -> metadata, in insertion order.
pub type RepoMap = Map<String, Value>;

/// One element of the retriever's input list. Extra fields are ignored.
#[derive(Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct RepoListEntry {
    pub repo_name: String,
}

pub fn load_repo_list(path: &Path) -> Result<Vec<RepoListEntry>> {
    read_json(path)
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RepoName {
    pub org: String,
    pub repo: String,
}

impl RepoName {
    /// Splits `org/repo` on its single `/`.
    pub fn parse(name: &str) -> Result<RepoName> {
        match name.split_once('/') {
            Some((org, repo)) if !org.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(RepoName {
                    org: org.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(CorpusError::InvalidRepoName(name.to_string())),
        }
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

#[derive(Deserialize, PartialEq, Eq, Debug, Clone)]
struct CloneSource {
    clone_url: String,
}

/// Reads identifier -> `{clone_url, ...}` and keeps file order. Entries
/// without a usable `clone_url` are logged and left out.
pub fn load_clone_urls(path: &Path) -> Result<Vec<(String, String)>> {
    let repos: RepoMap = read_json(path)?;
    Ok(clone_urls(repos))
}

pub fn clone_urls(repos: RepoMap) -> Vec<(String, String)> {
    repos
        .into_iter()
        .filter_map(
            |(name, metadata)| match serde_json::from_value::<CloneSource>(metadata) {
                Ok(source) => Some((name, source.clone_url)),
                Err(e) => {
                    warn!("skipping {name}: {e}");
                    None
                }
            },
        )
        .collect()
}

/// Line counts for one cloned repository.
#[derive(Serialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct Metrics {
    pub repo_name: String,
    pub total_loc: u64,
    pub language_loc: BTreeMap<String, u64>,
    pub test_loc: u64,
}

/// Records fetched for the half-open index range `[start, end)`.
#[derive(PartialEq, Debug, Clone)]
pub struct ResultBatch {
    pub start: usize,
    pub end: usize,
    pub records: RepoMap,
}

impl ResultBatch {
    /// `results_<start>_<end + 1>.json`, the name existing batch files use.
    pub fn file_name(&self) -> String {
        batch_file_name(self.start, self.end)
    }
}

pub fn batch_file_name(start: usize, end: usize) -> String {
    format!("results_{}_{}.json", start, end + 1)
}

/// Parses `results_<n>_<m>.json` back into `(n, m)`.
pub fn parse_batch_file_name(name: &str) -> Option<(usize, usize)> {
    let (start, end) = name
        .strip_prefix("results_")?
        .strip_suffix(".json")?
        .split_once('_')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
