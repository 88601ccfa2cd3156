use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CorpusError, Result};
use crate::language::Language;
use crate::progress::progress_bar;
use crate::repolist::Metrics;

/// Lists the version-controlled files of a checkout, relative to its root.
pub trait FileLister {
    fn list_files(&self, repo_dir: &Path) -> Result<Vec<PathBuf>>;
}

pub struct GitLsFiles;

impl FileLister for GitLsFiles {
    fn list_files(&self, repo_dir: &Path) -> Result<Vec<PathBuf>> {
        let output = Command::new("git")
            .args(["ls-files", "-z"])
            .current_dir(repo_dir)
            .output()?;
        if !output.status.success() {
            return Err(CorpusError::Git(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .split('\0')
            .filter(|file| !file.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub show_progress: bool,
    /// `None` means the configured language is not supported yet.
    pub target_language: Option<Language>,
    pub recurse_subdirectories: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            show_progress: false,
            target_language: Some(Language::Java),
            recurse_subdirectories: true,
        }
    }
}

/// Counts lines the way universal-newline reading does: `\r\n`, `\n` and a
/// lone `\r` each end a line, and trailing text without a terminator is one
/// more line.
fn count_line_terminators(bytes: &[u8]) -> u64 {
    let mut lines = 0;
    let mut iter = bytes.iter().peekable();
    while let Some(&byte) = iter.next() {
        match byte {
            b'\n' => lines += 1,
            b'\r' => {
                lines += 1;
                if iter.peek() == Some(&&b'\n') {
                    iter.next();
                }
            }
            _ => {}
        }
    }
    if bytes.last().is_some_and(|last| *last != b'\n' && *last != b'\r') {
        lines += 1;
    }
    lines
}

/// Number of lines in a regular file. Symlinks, directories and unreadable
/// files count as zero. Bytes that are not valid UTF-8 don't matter.
pub fn count_lines(path: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.file_type().is_file() {
        debug!("skipping non-regular file {}", path.display());
        return 0;
    }
    match fs::read(path) {
        Ok(bytes) => count_line_terminators(&bytes),
        Err(e) => {
            warn!("error reading {}: {e}", path.display());
            0
        }
    }
}

fn is_test_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains("test"))
}

pub struct RepoScanner<L> {
    root: PathBuf,
    lister: L,
    options: ScanOptions,
}

impl<L: FileLister> RepoScanner<L> {
    pub fn new(root: &Path, lister: L, options: ScanOptions) -> Self {
        Self {
            root: root.to_path_buf(),
            lister,
            options,
        }
    }

    pub fn total_loc(&self, repo_dir: &Path) -> u64 {
        if !repo_dir.is_dir() {
            return 0;
        }
        let files = match self.lister.list_files(repo_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("could not list files in {}: {e}", repo_dir.display());
                return 0;
            }
        };
        files.iter().map(|file| count_lines(&repo_dir.join(file))).sum()
    }

    /// Regular files of `language` under `repo_dir`; symlinks are not followed.
    fn language_files(&self, repo_dir: &Path, language: Language) -> Vec<PathBuf> {
        let mut walk = WalkDir::new(repo_dir).follow_links(false);
        if !self.options.recurse_subdirectories {
            walk = walk.max_depth(1);
        }
        walk.into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| language.matches(path))
            .collect()
    }

    pub fn language_loc(&self, repo_dir: &Path) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        let Some(language) = self.options.target_language else {
            debug!("no supported target language, skipping language lines");
            return counts;
        };
        let loc = self
            .language_files(repo_dir, language)
            .iter()
            .map(|path| count_lines(path))
            .sum();
        counts.insert(language.to_string(), loc);
        counts
    }

    pub fn test_loc(&self, repo_dir: &Path) -> u64 {
        let Some(language) = self.options.target_language else {
            return 0;
        };
        self.language_files(repo_dir, language)
            .iter()
            .filter(|path| is_test_file(path))
            .map(|path| count_lines(path))
            .sum()
    }

    pub fn scan(&self, repo_name: &str) -> Metrics {
        let repo_dir = self.root.join(repo_name);
        Metrics {
            repo_name: repo_name.to_string(),
            total_loc: self.total_loc(&repo_dir),
            language_loc: self.language_loc(&repo_dir),
            test_loc: self.test_loc(&repo_dir),
        }
    }

    /// Every non-hidden directory directly under the root, by name.
    pub fn repo_names(&self) -> Result<Vec<String>> {
        let mut names = vec![];
        for entry in self.root.read_dir()?.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn scan_all(&self) -> Result<Vec<Metrics>> {
        let names = self.repo_names()?;
        let bar = progress_bar(names.len() as u64, self.options.show_progress);
        let mut metrics = Vec::with_capacity(names.len());
        for name in names {
            bar.set_message(name.clone());
            metrics.push(self.scan(&name));
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(metrics)
    }
}

/// `Repo | Total Loc | <Lang> Loc | Test Loc`, one row per repository.
pub fn format_table(metrics: &[Metrics], language: Option<Language>) -> String {
    let language = language.map(|l| l.to_string()).unwrap_or_else(|| "Language".to_string());
    let mut table = format!("Repo | Total Loc | {language} Loc | Test Loc\n");
    for m in metrics {
        let language_loc = m.language_loc.get(&language).copied().unwrap_or(0);
        let _ = writeln!(
            table,
            "{} | {} | {} | {}",
            m.repo_name, m.total_loc, language_loc, m.test_loc
        );
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticLister(Vec<&'static str>);

    impl FileLister for StaticLister {
        fn list_files(&self, _repo_dir: &Path) -> Result<Vec<PathBuf>> {
            Ok(self.0.iter().map(PathBuf::from).collect())
        }
    }

    struct FailingLister;

    impl FileLister for FailingLister {
        fn list_files(&self, _repo_dir: &Path) -> Result<Vec<PathBuf>> {
            Err(CorpusError::Git("not a git repository".to_string()))
        }
    }

    fn write_lines(path: &Path, count: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let text: String = (0..count).map(|i| format!("line {i}\n")).collect();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn total_loc_sums_listed_files_and_skips_directories() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("org_repo");
        write_lines(&repo.join("a.txt"), 10);
        write_lines(&repo.join("empty.txt"), 0);
        write_lines(&repo.join("sub").join("b.txt"), 5);

        let scanner = RepoScanner::new(
            root.path(),
            StaticLister(vec!["a.txt", "empty.txt", "sub/b.txt", "sub"]),
            ScanOptions::default(),
        );
        assert_eq!(scanner.total_loc(&repo), 15);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_counted() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("org_repo");
        write_lines(&repo.join("Real.java"), 4);
        std::os::unix::fs::symlink(repo.join("Real.java"), repo.join("Link.java")).unwrap();

        let scanner = RepoScanner::new(
            root.path(),
            StaticLister(vec!["Real.java", "Link.java"]),
            ScanOptions::default(),
        );
        let metrics = scanner.scan("org_repo");
        assert_eq!(metrics.total_loc, 4);
        assert_eq!(metrics.language_loc["Java"], 4);
    }

    #[test]
    fn invalid_utf8_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        fs::write(&path, b"caf\xe9\nna\xefve\nend").unwrap();
        assert_eq!(count_lines(&path), 3);
    }

    #[test]
    fn every_newline_convention_ends_a_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mac.java");
        fs::write(&path, b"a\rb\rc\r").unwrap();
        assert_eq!(count_lines(&path), 3);

        assert_eq!(count_line_terminators(b""), 0);
        assert_eq!(count_line_terminators(b"a\r\nb\r\n"), 2);
        assert_eq!(count_line_terminators(b"a\nb"), 2);
        assert_eq!(count_line_terminators(b"a\r\rb\n\n"), 4);
        assert_eq!(count_line_terminators(b"\n"), 1);
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    fn git(repo: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(repo)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[test]
    fn git_ls_files_counts_only_tracked_files() {
        if !git_available() {
            eprintln!("git not found, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("org_repo");
        fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "-q"]);
        write_lines(&repo.join("a.txt"), 3);
        write_lines(&repo.join("dir with space").join("b.txt"), 4);
        git(&repo, &["add", "a.txt", "dir with space/b.txt"]);
        write_lines(&repo.join("untracked.txt"), 2);

        let files = GitLsFiles.list_files(&repo).unwrap();
        assert_eq!(
            files,
            [PathBuf::from("a.txt"), PathBuf::from("dir with space/b.txt")]
        );

        let scanner = RepoScanner::new(root.path(), GitLsFiles, ScanOptions::default());
        assert_eq!(scanner.total_loc(&repo), 7);
    }

    #[test]
    fn missing_repo_counts_zero() {
        let root = tempfile::tempdir().unwrap();
        let scanner = RepoScanner::new(root.path(), FailingLister, ScanOptions::default());
        let metrics = scanner.scan("nope");
        assert_eq!(metrics.total_loc, 0);
        assert_eq!(metrics.language_loc["Java"], 0);
        assert_eq!(metrics.test_loc, 0);
    }

    #[test]
    fn lister_failure_counts_zero() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("org_repo");
        write_lines(&repo.join("a.txt"), 3);
        let scanner = RepoScanner::new(root.path(), FailingLister, ScanOptions::default());
        assert_eq!(scanner.total_loc(&repo), 0);
    }

    #[test]
    fn language_and_test_lines() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("org_repo");
        write_lines(&repo.join("Main.java"), 7);
        write_lines(&repo.join("src").join("Util.java"), 3);
        write_lines(&repo.join("src").join("util_test.java"), 2);
        write_lines(&repo.join("src").join("test_data.py"), 9);

        let scanner = RepoScanner::new(root.path(), StaticLister(vec![]), ScanOptions::default());
        let metrics = scanner.scan("org_repo");
        assert_eq!(metrics.language_loc["Java"], 12);
        assert_eq!(metrics.test_loc, 2);

        let shallow = RepoScanner::new(
            root.path(),
            StaticLister(vec![]),
            ScanOptions {
                recurse_subdirectories: false,
                ..ScanOptions::default()
            },
        );
        let metrics = shallow.scan("org_repo");
        assert_eq!(metrics.language_loc["Java"], 7);
        assert_eq!(metrics.test_loc, 0);
    }

    #[test]
    fn unsupported_language_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("org_repo");
        write_lines(&repo.join("Main.java"), 7);

        let scanner = RepoScanner::new(
            root.path(),
            StaticLister(vec!["Main.java"]),
            ScanOptions {
                target_language: None,
                ..ScanOptions::default()
            },
        );
        let metrics = scanner.scan("org_repo");
        assert_eq!(metrics.total_loc, 7);
        assert!(metrics.language_loc.is_empty());
        assert_eq!(metrics.test_loc, 0);
    }

    #[test]
    fn scan_all_skips_hidden_and_plain_files() {
        let root = tempfile::tempdir().unwrap();
        write_lines(&root.path().join("b_repo").join("B.java"), 2);
        write_lines(&root.path().join("a_repo").join("A.java"), 1);
        write_lines(&root.path().join(".cache").join("C.java"), 1);
        fs::write(root.path().join("notes.txt"), "x").unwrap();

        let scanner = RepoScanner::new(root.path(), StaticLister(vec![]), ScanOptions::default());
        let metrics = scanner.scan_all().unwrap();
        let names: Vec<_> = metrics.iter().map(|m| m.repo_name.as_str()).collect();
        assert_eq!(names, ["a_repo", "b_repo"]);

        let table = format_table(&metrics, Some(Language::Java));
        assert_eq!(
            table,
            "Repo | Total Loc | Java Loc | Test Loc\na_repo | 0 | 1 | 0\nb_repo | 0 | 2 | 0\n"
        );
    }
}
