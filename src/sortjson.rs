use std::cmp::Ordering;
use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::error::{CorpusError, Result};
use crate::jsonio::{read_json, write_json_atomic};
use crate::repolist::RepoMap;

pub const STARGAZERS_COUNT: &str = "stargazers_count";

fn sort_value(key: &str, metadata: &Value, field: &str) -> Result<f64> {
    metadata
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| CorpusError::MissingSortKey {
            key: key.to_string(),
            field: field.to_string(),
        })
}

/// Orders entries by `field`, largest first. Entries with equal values keep
/// their relative order. Any entry lacking a numeric `field` fails the whole
/// sort.
pub fn sort_by_field(repos: RepoMap, field: &str) -> Result<RepoMap> {
    let mut keyed = repos
        .into_iter()
        .map(|(key, metadata)| {
            let value = sort_value(&key, &metadata, field)?;
            Ok((value, key, metadata))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|(a, ..), (b, ..)| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    Ok(keyed
        .into_iter()
        .map(|(_, key, metadata)| (key, metadata))
        .collect())
}

pub fn sort_by_stars(repos: RepoMap) -> Result<RepoMap> {
    sort_by_field(repos, STARGAZERS_COUNT)
}

/// Sorts the mapping in `input` and writes it to `output`, or back over
/// `input` when no output is given.
pub fn sort_file(input: &Path, output: Option<&Path>, field: &str) -> Result<RepoMap> {
    let repos: RepoMap = read_json(input)?;
    let sorted = sort_by_field(repos, field)?;
    let output = output.unwrap_or(input);
    write_json_atomic(output, &sorted)?;
    info!("sorted {} entries by {field} into {}", sorted.len(), output.display());
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(value: Value) -> RepoMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn descending_and_stable_on_ties() {
        let repos = map(json!({
            "x": {"stargazers_count": 3},
            "y": {"stargazers_count": 9},
            "z": {"stargazers_count": 3}
        }));
        let sorted = sort_by_stars(repos).unwrap();
        let keys: Vec<&str> = sorted.keys().map(String::as_str).collect();
        assert_eq!(keys, ["y", "x", "z"]);
    }

    #[test]
    fn missing_field_fails_the_sort() {
        let repos = map(json!({
            "x": {"stargazers_count": 3},
            "y": {"language": "Java"}
        }));
        let err = sort_by_stars(repos).unwrap_err();
        assert!(matches!(
            err,
            CorpusError::MissingSortKey { ref key, .. } if key == "y"
        ));
    }

    #[test]
    fn sorts_file_in_place_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results_merged.json");
        write_json_atomic(
            &path,
            &json!({"a/a": {"stargazers_count": 1}, "b/b": {"stargazers_count": 2}}),
        )
        .unwrap();
        sort_file(&path, None, STARGAZERS_COUNT).unwrap();
        let sorted: RepoMap = read_json(&path).unwrap();
        let keys: Vec<&str> = sorted.keys().map(String::as_str).collect();
        assert_eq!(keys, ["b/b", "a/a"]);
    }

    #[test]
    fn failed_sort_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.json");
        write_json_atomic(&input, &json!({"a/a": {}})).unwrap();
        assert!(sort_file(&input, Some(&output), STARGAZERS_COUNT).is_err());
        assert!(!output.exists());
    }
}
