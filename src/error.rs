use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid range [{start}, {end}) for {len} repositories")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("entry '{key}' has no numeric '{field}' field")]
    MissingSortKey { key: String, field: String },

    #[error("invalid repository name '{0}', expected org/repo")]
    InvalidRepoName(String),

    #[error("token file {} has no GITHUB_TOKEN entry", .0.display())]
    MissingToken(PathBuf),

    #[error("git error: {0}")]
    Git(String),
}

pub type Result<T> = std::result::Result<T, CorpusError>;
