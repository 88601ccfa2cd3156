use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use clonerepos::{GitCli, clone_repos};
use config::{Config, flag_override};
use getmetadata::{FetchOptions, GithubClient, MetadataRetriever};
use language::Language;
use ratelimit::ThreadSleeper;
use repolist::{load_clone_urls, load_repo_list};
use scanrepo::{GitLsFiles, RepoScanner, ScanOptions, format_table};

mod clonerepos;
mod config;
mod error;
mod getmetadata;
mod jsonio;
mod language;
mod mergejson;
mod progress;
mod ratelimit;
mod repolist;
mod scanrepo;
mod sortjson;

#[derive(Parser)]
#[command(name = "repo_corpus")]
#[command(author, version, about = "Tools for building a corpus of GitHub repositories", long_about = None)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true, default_value = "corpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone every repository of an identifier -> {clone_url} mapping.
    #[command(name = "clone")]
    CloneRepos {
        input: PathBuf,

        #[arg(short, long, default_value = "_github_repos_")]
        dest: PathBuf,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long, conflicts_with = "no_progress")]
        progress: bool,

        #[arg(long)]
        no_progress: bool,
    },

    /// Count total, language and test lines of cloned repositories.
    Scan {
        #[arg(default_value = "_github_repos_")]
        root: PathBuf,

        /// Scan only this directory under the root.
        #[arg(short, long)]
        repo: Option<String>,

        #[arg(short = 'L', long)]
        language: Option<String>,

        #[arg(long)]
        no_recurse: bool,

        #[arg(long, conflicts_with = "no_progress")]
        progress: bool,

        #[arg(long)]
        no_progress: bool,

        /// Also write the metrics as JSON.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge JSON mappings; later files win on duplicate keys.
    Merge {
        files: Vec<PathBuf>,

        /// Merge the results_<n>_<m>.json batches found here.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Sort a mapping by a numeric field, largest first.
    Sort {
        input: PathBuf,

        /// Defaults to overwriting the input.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, default_value = sortjson::STARGAZERS_COUNT)]
        field: String,
    },

    /// Fetch repository metadata for the index range [start, end).
    Fetch {
        input: PathBuf,

        #[arg(short, long)]
        start: usize,

        /// Defaults to start + the configured batch size.
        #[arg(short, long)]
        end: Option<usize>,

        #[arg(short, long, default_value = "_github_api_results_")]
        output_dir: PathBuf,
    },
}

/// `--verbose` forces debug output; otherwise `RUST_LOG` applies, falling
/// back to info.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Upper bound for `fetch` when `--end` is omitted. Saturates so an absurd
/// start still reaches the range check instead of overflowing.
fn default_end(start: usize, batch: usize) -> usize {
    start.saturating_add(batch)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("reading config {}", cli.config.display()))?;

    match cli.command {
        Commands::CloneRepos {
            input,
            dest,
            limit,
            progress,
            no_progress,
        } => {
            let mut repos = load_clone_urls(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            if let Some(limit) = limit.or(config.clone.limit) {
                repos.truncate(limit);
            }
            let summary = clone_repos(
                &GitCli,
                &repos,
                &dest,
                flag_override(progress, no_progress, config.clone.show_progress),
            )?;
            info!("cloned {}, failed {}", summary.cloned, summary.failed);
        }
        Commands::Scan {
            root,
            repo,
            language,
            no_recurse,
            progress,
            no_progress,
            output,
        } => {
            let language_name = language.unwrap_or(config.scan.target_language);
            let target_language = Language::from_name(&language_name);
            let options = ScanOptions {
                show_progress: flag_override(progress, no_progress, config.scan.show_progress),
                target_language,
                recurse_subdirectories: !no_recurse && config.scan.recurse_subdirectories,
            };
            let scanner = RepoScanner::new(&root, GitLsFiles, options);
            let metrics = match repo {
                Some(repo) => vec![scanner.scan(&repo)],
                None => scanner
                    .scan_all()
                    .with_context(|| format!("listing {}", root.display()))?,
            };
            print!("{}", format_table(&metrics, target_language));
            if let Some(output) = output {
                jsonio::write_json_atomic(&output, &metrics)?;
            }
        }
        Commands::Merge { files, dir, output } => {
            let mut inputs = match dir {
                Some(dir) => mergejson::find_batch_files(&dir)
                    .with_context(|| format!("listing {}", dir.display()))?,
                None => vec![],
            };
            inputs.extend(files);
            if inputs.is_empty() {
                bail!("nothing to merge, pass files or --dir");
            }
            mergejson::merge_to_file(&inputs, &output)?;
        }
        Commands::Sort {
            input,
            output,
            field,
        } => {
            sortjson::sort_file(&input, output.as_deref(), &field)?;
        }
        Commands::Fetch {
            input,
            start,
            end,
            output_dir,
        } => {
            let repos = load_repo_list(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let token = config.github.resolve_token()?;
            if token.is_none() {
                warn!("no GitHub token configured, requests are unauthenticated");
            }
            let total = repos.len();
            let client = GithubClient::new(&config.github.api_base, token)?;
            let mut retriever = MetadataRetriever::new(
                repos,
                client,
                ThreadSleeper,
                FetchOptions::from(&config.github),
                &output_dir,
            );
            let end = end.unwrap_or_else(|| default_end(start, config.github.batch));
            info!("fetching [{start}, {end}) of {total} repositories");
            retriever.fetch_metadata(start, end)?;
        }
    }
    Ok(())
}
