use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;
use crate::jsonio::{read_json, write_json_atomic};
use crate::repolist::{RepoMap, parse_batch_file_name};

/// Loads one input mapping; unreadable or malformed files count as empty.
fn load_or_empty(path: &Path) -> RepoMap {
    match read_json::<RepoMap>(path) {
        Ok(repos) => repos,
        Err(e) => {
            warn!("error reading {}: {e}", path.display());
            RepoMap::new()
        }
    }
}

/// Folds the mappings in `files` into one. Later files win on duplicate keys.
pub fn merge_files<P: AsRef<Path>>(files: &[P]) -> RepoMap {
    let mut merged = RepoMap::new();
    for file in files {
        let repos = load_or_empty(file.as_ref());
        info!("{}: {} entries", file.as_ref().display(), repos.len());
        merged.extend(repos);
    }
    merged
}

/// Finds `results_<n>_<m>.json` batch files in `dir`, ordered by range.
pub fn find_batch_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut batches = vec![];
    for entry in dir.read_dir()?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(range) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_batch_file_name)
        else {
            continue;
        };
        batches.push((range, path));
    }
    batches.sort();
    Ok(batches.into_iter().map(|(_, path)| path).collect())
}

pub fn merge_to_file<P: AsRef<Path>>(files: &[P], output: &Path) -> Result<RepoMap> {
    let merged = merge_files(files);
    write_json_atomic(output, &merged)?;
    info!(
        "merged {} files into {} ({} entries)",
        files.len(),
        output.display(),
        merged.len()
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn later_files_win() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        write_json_atomic(&first, &json!({"a": 1, "b": 1})).unwrap();
        write_json_atomic(&second, &json!({"a": 2})).unwrap();

        let merged = merge_files(&[&first, &second]);
        assert_eq!(Value::Object(merged), json!({"a": 2, "b": 1}));
    }

    #[test]
    fn missing_and_malformed_inputs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let broken = dir.path().join("broken.json");
        write_json_atomic(&good, &json!({"a": 1})).unwrap();
        fs::write(&broken, "{\"a\": ").unwrap();

        let merged = merge_files(&[
            dir.path().join("missing.json"),
            broken,
            good,
        ]);
        assert_eq!(Value::Object(merged), json!({"a": 1}));
    }

    #[test]
    fn output_is_replaced_not_appended() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("results_0_10.json");
        let output = dir.path().join("results_merged.json");
        write_json_atomic(&input, &json!({"a": 1})).unwrap();
        fs::write(&output, "{\"stale\": true}").unwrap();

        merge_to_file(&[&input], &output).unwrap();
        let written: Value = read_json(&output).unwrap();
        assert_eq!(written, json!({"a": 1}));
    }

    #[test]
    fn batch_files_are_found_in_range_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "results_100_200.json",
            "results_0_100.json",
            "results_merged.json",
            "results_merged_and_sorted.json",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        let found = find_batch_files(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["results_0_100.json", "results_100_200.json"]);
    }
}
