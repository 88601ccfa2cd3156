use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::{CorpusError, Result};
use crate::progress::progress_bar;

pub trait GitClient {
    fn clone_repo(&self, url: &str, target: &Path) -> Result<()>;
}

/// Shells out to the `git` executable.
pub struct GitCli;

impl GitClient for GitCli {
    fn clone_repo(&self, url: &str, target: &Path) -> Result<()> {
        let output = Command::new("git")
            .arg("clone")
            .arg(url)
            .arg(target)
            .stdin(Stdio::null())
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(CorpusError::Git(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// `org/repo` -> `org_repo`.
pub fn safe_dir_name(identifier: &str) -> String {
    identifier.replace(['/', '\\'], "_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloneSummary {
    pub cloned: usize,
    pub failed: usize,
}

/// Clones each `(identifier, url)` into `destination/<safe_dir_name>`.
/// A failed clone is logged and the loop moves on.
pub fn clone_repos<G: GitClient>(
    git: &G,
    repos: &[(String, String)],
    destination: &Path,
    show_progress: bool,
) -> Result<CloneSummary> {
    fs::create_dir_all(destination)?;
    let bar = progress_bar(repos.len() as u64, show_progress);
    let mut summary = CloneSummary::default();
    for (identifier, url) in repos {
        bar.set_message(identifier.clone());
        let target = destination.join(safe_dir_name(identifier));
        let result = if target.exists() {
            Err(CorpusError::Git(format!(
                "destination {} already exists",
                target.display()
            )))
        } else {
            git.clone_repo(url, &target)
        };
        match result {
            Ok(()) => {
                debug!("cloned {url} into {}", target.display());
                summary.cloned += 1;
            }
            Err(e) => {
                warn!("error cloning {url}: {e}");
                summary.failed += 1;
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(summary)
}
