//! Discovery and aggregation of `.env*` files.
//!
//! A project may carry several private env files (`.env`, `.env.development`,
//! `.env.local`, ...). Discovery finds them in the project root, excluding
//! the generated `.env.example` and anything named by an exclude-file
//! directive, and aggregation merges their keys by priority so the reconciler
//! sees a single synthetic source file.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::debug;

use indexmap::IndexMap;

use crate::lexer::{KeyValueToken, ParsedFile, Quote, Token};

/// Name of the generated template file.
pub const EXAMPLE_FILENAME: &str = ".env.example";
/// Name of the machine-local override file.
pub const LOCAL_FILENAME: &str = ".env.local";

/// A key merged from one or more `.env*` files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedKey {
  pub key: String,
  /// Value from the highest-priority file defining the key.
  pub value: String,
  /// The file that supplied the value.
  pub source: String,
  /// Every file defining the key, highest priority first.
  pub all_sources: Vec<String>,
}

/// Merge priority of an env file. Higher wins.
///
/// `.env.local` beats mode files (`.env.development`, `.env.production`, ...)
/// which beat the base `.env`.
pub fn file_priority(filename: &str) -> u32 {
  if filename == LOCAL_FILENAME {
    100
  } else if filename == ".env" {
    0
  } else if filename.starts_with(".env.") {
    50
  } else {
    0
  }
}

/// Path of the generated template under `project_root`.
pub fn example_path(project_root: &Path) -> PathBuf {
  project_root.join(EXAMPLE_FILENAME)
}

/// Finds all `.env*` files directly under `project_root` (non-recursive),
/// skipping `.env.example` and any file named in `excluded`. Sorted by
/// priority, highest first, with the filename as a deterministic tie-break.
pub fn discover_env_files(
  project_root: &Path,
  excluded: &BTreeSet<String>,
) -> io::Result<Vec<PathBuf>> {
  let mut files = Vec::new();

  for entry in std::fs::read_dir(project_root)? {
    let entry = entry?;
    if !entry.file_type()?.is_file() {
      continue;
    }
    let name = entry.file_name();
    let Some(name) = name.to_str() else {
      continue;
    };
    if !name.starts_with(".env") || name == EXAMPLE_FILENAME || excluded.contains(name) {
      continue;
    }
    files.push(entry.path());
  }

  files.sort_by(|a, b| {
    let pa = a.file_name().and_then(|n| n.to_str()).map_or(0, file_priority);
    let pb = b.file_name().and_then(|n| n.to_str()).map_or(0, file_priority);
    pb.cmp(&pa).then_with(|| a.cmp(b))
  });

  #[cfg(feature = "tracing")]
  debug!(count = files.len(), "discovered env files");

  Ok(files)
}

/// Merges keys from `files` (ordered highest priority first). The first file
/// to define a key wins its value and becomes the primary source; later
/// files are only recorded in `all_sources`.
pub fn aggregate_env_files(
  files: &[PathBuf],
  project_root: &Path,
) -> io::Result<IndexMap<String, AggregatedKey>> {
  let mut aggregated: IndexMap<String, AggregatedKey> = IndexMap::new();

  for path in files {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
      Err(err) => return Err(err),
    };

    let display_name = path
      .strip_prefix(project_root)
      .ok()
      .and_then(|p| p.to_str())
      .or_else(|| path.file_name().and_then(|n| n.to_str()))
      .unwrap_or(".env")
      .to_string();

    let parsed = ParsedFile::parse(&content);
    for (key, token) in parsed.key_map() {
      match aggregated.get_mut(key) {
        Some(existing) => {
          if !existing.all_sources.contains(&display_name) {
            existing.all_sources.push(display_name.clone());
          }
        }
        None => {
          aggregated.insert(
            key.to_string(),
            AggregatedKey {
              key: key.to_string(),
              value: token.value.clone(),
              source: display_name.clone(),
              all_sources: vec![display_name.clone()],
            },
          );
        }
      }
    }
  }

  Ok(aggregated)
}

/// Renders the aggregation as a synthetic source file so the reconciler keeps
/// a single entry point over `ParsedFile`.
pub fn render_source(aggregated: &IndexMap<String, AggregatedKey>) -> ParsedFile {
  let tokens = aggregated
    .values()
    .map(|agg| {
      Token::KeyValue(KeyValueToken::new(
        agg.key.as_str(),
        agg.value.as_str(),
        false,
        Quote::None,
        None,
        "\n",
      ))
    })
    .collect();
  ParsedFile { tokens }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
      .iter()
      .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
      .collect()
  }

  #[test]
  fn test_file_priority_ordering() {
    assert_eq!(file_priority(".env.local"), 100);
    assert_eq!(file_priority(".env.development"), 50);
    assert_eq!(file_priority(".env.production"), 50);
    assert_eq!(file_priority(".env"), 0);
  }

  #[test]
  fn test_discover_skips_example_and_excluded() {
    let dir = TempDir::new().unwrap();
    for name in [".env", ".env.local", ".env.development", ".env.example", "README.md"] {
      std::fs::write(dir.path().join(name), "").unwrap();
    }

    let excluded = BTreeSet::from([".env.local".to_string()]);
    let files = discover_env_files(dir.path(), &excluded).unwrap();
    assert_eq!(names(&files), vec![".env.development", ".env"]);

    let files = discover_env_files(dir.path(), &BTreeSet::new()).unwrap();
    assert_eq!(names(&files), vec![".env.local", ".env.development", ".env"]);
  }

  #[test]
  fn test_aggregation_priority_and_sources() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "SHARED=base\nBASE_ONLY=x\n").unwrap();
    std::fs::write(dir.path().join(".env.local"), "SHARED=local\n").unwrap();

    let files = discover_env_files(dir.path(), &BTreeSet::new()).unwrap();
    let aggregated = aggregate_env_files(&files, dir.path()).unwrap();

    let shared = &aggregated["SHARED"];
    assert_eq!(shared.value, "local");
    assert_eq!(shared.source, ".env.local");
    assert_eq!(shared.all_sources, vec![".env.local", ".env"]);

    assert_eq!(aggregated["BASE_ONLY"].source, ".env");
  }

  #[test]
  fn test_render_source_roundtrips_through_reconciler_input() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "APP_ENV=development\nDEBUG=true\n").unwrap();

    let files = discover_env_files(dir.path(), &BTreeSet::new()).unwrap();
    let aggregated = aggregate_env_files(&files, dir.path()).unwrap();
    let source = render_source(&aggregated);

    assert_eq!(source.print(), "APP_ENV=development\nDEBUG=true\n");
    assert_eq!(source.key_map().len(), 2);
  }
}
