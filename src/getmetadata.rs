use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, Request};
use reqwest::{Method, header};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{GithubConfig, RateLimitPolicy};
use crate::error::{CorpusError, Result};
use crate::jsonio::write_json_atomic;
use crate::ratelimit::{RequestBudget, Sleeper};
use crate::repolist::{RepoListEntry, RepoMap, RepoName, ResultBatch};
use crate::sortjson::{STARGAZERS_COUNT, sort_by_stars};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Status and (possibly `Null`) JSON body of one metadata request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn message(&self) -> String {
        self.body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

pub trait MetadataClient {
    fn get_repo(&self, name: &RepoName) -> Result<ApiResponse>;
}

impl<C: MetadataClient + ?Sized> MetadataClient for &C {
    fn get_repo(&self, name: &RepoName) -> Result<ApiResponse> {
        (**self).get_repo(name)
    }
}

/// `GET /repos/{org}/{repo}` against the GitHub REST API.
pub struct GithubClient {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(api_base: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn repo_url(&self, name: &RepoName) -> String {
        format!("{}/repos/{}/{}", self.api_base, name.org, name.repo)
    }

    /// The GET for `name`, with `Authorization: token <value>` when a token
    /// is configured.
    pub fn build_request(&self, name: &RepoName) -> Result<Request> {
        let mut request = self
            .client
            .request(Method::GET, self.repo_url(name))
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("token {token}"));
        }
        Ok(request.build()?)
    }
}

impl MetadataClient for GithubClient {
    fn get_repo(&self, name: &RepoName) -> Result<ApiResponse> {
        let request = self.build_request(name)?;
        let resp = self.client.execute(request)?;
        let status = resp.status().as_u16();
        let text = resp.text()?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(ApiResponse { status, body })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    InvalidName,
    MissingStars,
    Transport(String),
    Status { status: u16, message: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::InvalidName => f.write_str("invalid repository name"),
            DropReason::MissingStars => write!(f, "response has no {STARGAZERS_COUNT}"),
            DropReason::Transport(e) => write!(f, "request failed: {e}"),
            DropReason::Status { status, message } => write!(f, "HTTP {status}: {message}"),
        }
    }
}

/// Where a repository ended up. Nothing goes back to pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Succeeded,
    Dropped(DropReason),
    /// Hit the rate limit and was skipped after waiting.
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchSummary {
    pub succeeded: usize,
    pub dropped: usize,
    pub rate_limited: usize,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub on_rate_limit: RateLimitPolicy,
    pub max_requeues: u32,
    pub rate_limit_wait: Duration,
    pub requests_per_hour: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions::from(&GithubConfig::default())
    }
}

impl From<&GithubConfig> for FetchOptions {
    fn from(config: &GithubConfig) -> Self {
        Self {
            on_rate_limit: config.on_rate_limit,
            max_requeues: config.max_requeues,
            rate_limit_wait: Duration::from_secs(config.rate_limit_wait_secs),
            requests_per_hour: config.requests_per_hour,
        }
    }
}

/// Accumulates successful responses for one `[start, end)` range.
pub struct BatchBuilder {
    start: usize,
    end: usize,
    records: RepoMap,
}

impl BatchBuilder {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            records: RepoMap::new(),
        }
    }

    pub fn add(&mut self, name: &RepoName, metadata: Value) -> FetchOutcome {
        let Some(stars) = metadata.get(STARGAZERS_COUNT).and_then(Value::as_u64) else {
            warn!("{name}: response has no {STARGAZERS_COUNT}");
            return FetchOutcome::Dropped(DropReason::MissingStars);
        };
        info!("{} {} {}", name.org, name.repo, stars);
        self.records.insert(name.to_string(), metadata);
        FetchOutcome::Succeeded
    }

    /// Every record was checked for a star count in `add`, so sorting
    /// cannot fail on a missing key here.
    pub fn finish(self) -> Result<ResultBatch> {
        Ok(ResultBatch {
            start: self.start,
            end: self.end,
            records: sort_by_stars(self.records)?,
        })
    }
}

#[derive(Debug)]
pub struct FetchReport {
    pub batch: ResultBatch,
    pub outcomes: Vec<(String, FetchOutcome)>,
}

impl FetchReport {
    pub fn summary(&self) -> FetchSummary {
        let mut summary = FetchSummary::default();
        for (_, outcome) in &self.outcomes {
            match outcome {
                FetchOutcome::Succeeded => summary.succeeded += 1,
                FetchOutcome::Dropped(_) => summary.dropped += 1,
                FetchOutcome::RateLimited => summary.rate_limited += 1,
            }
        }
        summary
    }
}

pub struct MetadataRetriever<C, S> {
    repos: Vec<RepoListEntry>,
    client: C,
    sleeper: S,
    options: FetchOptions,
    budget: RequestBudget,
    output_dir: PathBuf,
}

impl<C: MetadataClient, S: Sleeper> MetadataRetriever<C, S> {
    pub fn new(
        repos: Vec<RepoListEntry>,
        client: C,
        sleeper: S,
        options: FetchOptions,
        output_dir: &Path,
    ) -> Self {
        let budget = RequestBudget::per_hour(options.requests_per_hour);
        Self {
            repos,
            client,
            sleeper,
            options,
            budget,
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Fetches `[start, end)` and writes the sorted batch to
    /// `output_dir/results_<start>_<end + 1>.json`, returning the file path.
    ///
    /// Requires `start < end < len`. Anything else is rejected before a
    /// single request is made or file written.
    pub fn fetch_metadata(&mut self, start: usize, end: usize) -> Result<(PathBuf, FetchReport)> {
        let report = self.collect(start, end)?;
        let path = self.output_dir.join(report.batch.file_name());
        write_json_atomic(&path, &report.batch.records)?;
        for (name, outcome) in &report.outcomes {
            match outcome {
                FetchOutcome::Dropped(reason) => debug!("dropped {name}: {reason}"),
                FetchOutcome::RateLimited => debug!("skipped {name} after rate limit"),
                FetchOutcome::Succeeded => {}
            }
        }
        let summary = report.summary();
        info!(
            "wrote {} ({} succeeded, {} dropped, {} rate limited)",
            path.display(),
            summary.succeeded,
            summary.dropped,
            summary.rate_limited
        );
        Ok((path, report))
    }

    /// Runs the fetch loop without writing anything.
    pub fn collect(&mut self, start: usize, end: usize) -> Result<FetchReport> {
        let len = self.repos.len();
        if !(start < end && end < len) {
            warn!("invalid range [{start}, {end}) for {len} repositories, nothing fetched");
            return Err(CorpusError::InvalidRange { start, end, len });
        }

        let names: Vec<String> = self.repos[start..end]
            .iter()
            .map(|entry| entry.repo_name.clone())
            .collect();
        let mut builder = BatchBuilder::new(start, end);
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.fetch_one(&name, &mut builder);
            outcomes.push((name, outcome));
        }
        Ok(FetchReport {
            batch: builder.finish()?,
            outcomes,
        })
    }

    fn fetch_one(&mut self, repo_name: &str, builder: &mut BatchBuilder) -> FetchOutcome {
        let name = match RepoName::parse(repo_name) {
            Ok(name) => name,
            Err(e) => {
                warn!("{e}");
                return FetchOutcome::Dropped(DropReason::InvalidName);
            }
        };

        let mut requeues = 0;
        loop {
            self.budget.acquire(&self.sleeper);
            let response = match self.client.get_repo(&name) {
                Ok(response) => response,
                Err(e) => {
                    warn!("request for {name} failed: {e}");
                    return FetchOutcome::Dropped(DropReason::Transport(e.to_string()));
                }
            };
            match response.status {
                200 => return builder.add(&name, response.body),
                403 => {
                    warn!(
                        "rate limited on {name}: {}, waiting {}s",
                        response.message(),
                        self.options.rate_limit_wait.as_secs()
                    );
                    self.sleeper.sleep(self.options.rate_limit_wait);
                    self.budget.reset(self.sleeper.now());
                    if self.options.on_rate_limit == RateLimitPolicy::Requeue
                        && requeues < self.options.max_requeues
                    {
                        requeues += 1;
                        continue;
                    }
                    return FetchOutcome::RateLimited;
                }
                status => {
                    let message = response.message();
                    warn!("Error {status}: {message}");
                    return FetchOutcome::Dropped(DropReason::Status { status, message });
                }
            }
        }
    }
}
