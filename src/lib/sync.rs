//! File-system orchestration around the core pipeline.
//!
//! This layer owns everything the core must not: reading and writing the
//! actual files, validating preconditions (merge-conflict markers, an
//! un-excluded `.env.local`), and the tombstone management commands. All file
//! I/O happens before or after the pure lexer → inference → reconciler
//! transformation, never in the middle of it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::{debug, info};

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;

use crate::discovery::{
  AggregatedKey, LOCAL_FILENAME, aggregate_env_files, discover_env_files, example_path,
  render_source,
};
use crate::infer::InferenceConfig;
use crate::lexer::ParsedFile;
use crate::metadata::MetadataStore;
use crate::reconcile::{add_tombstone, find_fuzzy_tombstone_matches, reconcile, remove_tombstone};

/// Errors surfaced by the orchestration layer. The core itself is total;
/// everything here is an I/O failure or a violated precondition, fatal for
/// the invocation.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("no .env files found in {0}")]
  NoEnvFiles(PathBuf),
  #[error("IO error for {0}: {1}")]
  Io(PathBuf, #[source] std::io::Error),
  #[error("refusing to proceed: {0} contains unresolved merge-conflict markers")]
  ConflictMarkers(PathBuf),
  #[error(
    "refusing to proceed: {0} exists and is not excluded; add '# [EXCLUDE_FILE] .env.local' to .env.example"
  )]
  UnexcludedLocalFile(PathBuf),
  #[error(".env.example not found at {0}; run 'coenv sync' first")]
  ExampleNotFound(PathBuf),
  #[error("key '{0}' is already deprecated")]
  AlreadyDeprecated(String),
  #[error("key '{0}' is not deprecated")]
  NotDeprecated(String),
  #[error("key '{0}' does not exist in .env.example or any .env file")]
  UnknownKey(String),
}

/// True when `text` still carries git merge-conflict markers.
pub fn contains_conflict_markers(text: &str) -> bool {
  text.lines().any(|line| {
    line.starts_with("<<<<<<< ")
      || line.starts_with(">>>>>>> ")
      || line.starts_with("||||||| ")
      || line == "======="
  })
}

/// Result of a sync run, for reporting and bookkeeping by the CLI.
#[derive(Debug)]
pub struct SyncOutcome {
  pub discovered_files: Vec<String>,
  /// Keys written to `.env.example`, with their aggregation info.
  pub synced: IndexMap<String, AggregatedKey>,
  /// Keys present locally but blocked by a tombstone.
  pub blocked_keys: Vec<String>,
  /// New keys resembling a tombstoned key, surfaced for review as probable
  /// renames of deprecated keys.
  pub tombstone_suspects: Vec<(String, String)>,
}

/// Result of a doctor run.
#[derive(Debug)]
pub struct DoctorOutcome {
  pub checked_files: Vec<String>,
  /// Keys appended to `.env`, with the placeholder value used.
  pub added: Vec<(String, String)>,
  /// Deprecated keys still present in local files, with their source.
  pub deprecated_in_local: Vec<(String, String)>,
}

/// Status of one key, for the table and the agent protocol.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
  pub key: String,
  pub source: String,
  pub all_sources: Vec<String>,
  pub repo_status: String,
  pub health: String,
  pub owner: String,
}

/// Full status view of the project environment.
#[derive(Debug, Serialize)]
pub struct StatusReport {
  pub discovered_files: Vec<String>,
  pub excluded_files: Vec<String>,
  pub total_keys: usize,
  pub synced_keys: usize,
  pub missing_keys: usize,
  pub deprecated: Vec<String>,
  pub keys: Vec<KeyStatus>,
}

/// Synchronization service for a project directory.
pub struct EnvSync;

impl EnvSync {
  /// Syncs every discovered `.env*` file into `.env.example`.
  ///
  /// `today` is injected so the graveyard bookkeeping stays deterministic
  /// and testable.
  pub fn sync_project(
    project_root: &Path,
    today: NaiveDate,
    inference: &InferenceConfig,
  ) -> Result<SyncOutcome, SyncError> {
    #[cfg(feature = "tracing")]
    info!(?project_root, "starting sync");

    let example = example_path(project_root);
    let previous = read_example(&example)?;

    if let Some(content) = &previous {
      if contains_conflict_markers(content) {
        return Err(SyncError::ConflictMarkers(example));
      }
    }

    let previous = previous.as_deref().map(ParsedFile::parse);
    let excluded = excluded_set(previous.as_ref());

    let local = project_root.join(LOCAL_FILENAME);
    if local.exists() && !excluded.contains(LOCAL_FILENAME) {
      return Err(SyncError::UnexcludedLocalFile(local));
    }

    let files = discover_env_files(project_root, &excluded)
      .map_err(|err| SyncError::Io(project_root.to_path_buf(), err))?;
    if files.is_empty() {
      return Err(SyncError::NoEnvFiles(project_root.to_path_buf()));
    }
    let discovered_files = file_names(&files);

    let aggregated = aggregate_env_files(&files, project_root)
      .map_err(|err| SyncError::Io(project_root.to_path_buf(), err))?;

    let tombstoned: BTreeSet<String> = previous
      .as_ref()
      .map(|p| p.tombstoned_keys().into_iter().map(str::to_string).collect())
      .unwrap_or_default();
    let previous_keys: BTreeSet<String> = previous
      .as_ref()
      .map(|p| p.key_map().keys().map(|k| k.to_string()).collect())
      .unwrap_or_default();

    let blocked_keys: Vec<String> = aggregated
      .keys()
      .filter(|key| tombstoned.contains(*key))
      .cloned()
      .collect();

    let new_keys: Vec<&str> = aggregated
      .keys()
      .filter(|key| !previous_keys.contains(*key) && !tombstoned.contains(*key))
      .map(String::as_str)
      .collect();
    let tombstoned_refs: Vec<&str> = tombstoned.iter().map(String::as_str).collect();
    let tombstone_suspects = find_fuzzy_tombstone_matches(new_keys, &tombstoned_refs)
      .into_iter()
      .map(|(new, old)| (new.to_string(), old.to_string()))
      .collect();

    let source = render_source(&aggregated);
    let output = reconcile(&source, previous.as_ref(), today, inference);

    std::fs::write(&example, output.print()).map_err(|err| SyncError::Io(example, err))?;

    let synced: IndexMap<String, AggregatedKey> = aggregated
      .into_iter()
      .filter(|(key, _)| !tombstoned.contains(key))
      .collect();

    #[cfg(feature = "tracing")]
    info!(keys = synced.len(), "sync completed");

    Ok(SyncOutcome {
      discovered_files,
      synced,
      blocked_keys,
      tombstone_suspects,
    })
  }

  /// Read-only status view across all discovered files.
  pub fn status_report(
    project_root: &Path,
    metadata: &MetadataStore,
  ) -> Result<StatusReport, SyncError> {
    let example = example_path(project_root);
    let previous = read_example(&example)?.as_deref().map(ParsedFile::parse);
    let excluded = excluded_set(previous.as_ref());

    let files = discover_env_files(project_root, &excluded)
      .map_err(|err| SyncError::Io(project_root.to_path_buf(), err))?;
    if files.is_empty() {
      return Err(SyncError::NoEnvFiles(project_root.to_path_buf()));
    }
    let discovered_files = file_names(&files);

    let aggregated = aggregate_env_files(&files, project_root)
      .map_err(|err| SyncError::Io(project_root.to_path_buf(), err))?;

    let example_keys: BTreeSet<String> = previous
      .as_ref()
      .map(|p| p.key_map().keys().map(|k| k.to_string()).collect())
      .unwrap_or_default();
    let tombstoned: BTreeSet<String> = previous
      .as_ref()
      .map(|p| p.tombstoned_keys().into_iter().map(str::to_string).collect())
      .unwrap_or_default();

    let mut sorted: Vec<&AggregatedKey> = aggregated.values().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    let mut keys: Vec<KeyStatus> = Vec::with_capacity(sorted.len());
    for agg in sorted {
      let repo_status = if tombstoned.contains(&agg.key) {
        "deprecated"
      } else if example_keys.contains(&agg.key) {
        "synced"
      } else {
        "missing"
      };
      let health = if agg.value.trim().is_empty() { "empty" } else { "set" };
      let owner = metadata
        .get(&agg.key)
        .map(|meta| meta.owner.clone())
        .unwrap_or_else(|| "unknown".to_string());

      keys.push(KeyStatus {
        key: agg.key.clone(),
        source: agg.source.clone(),
        all_sources: agg.all_sources.clone(),
        repo_status: repo_status.to_string(),
        health: health.to_string(),
        owner,
      });
    }

    let synced_keys = keys.iter().filter(|k| k.repo_status == "synced").count();
    let missing_keys = keys.iter().filter(|k| k.repo_status == "missing").count();

    Ok(StatusReport {
      discovered_files,
      excluded_files: excluded.into_iter().collect(),
      total_keys: keys.len(),
      synced_keys,
      missing_keys,
      deprecated: tombstoned.into_iter().collect(),
      keys,
    })
  }

  /// Appends keys present in `.env.example` but missing from every local
  /// file to the base `.env`.
  pub fn doctor(project_root: &Path) -> Result<DoctorOutcome, SyncError> {
    let example = example_path(project_root);
    let Some(content) = read_example(&example)? else {
      return Err(SyncError::ExampleNotFound(example));
    };
    let parsed = ParsedFile::parse(&content);
    let excluded = excluded_set(Some(&parsed));

    let files = discover_env_files(project_root, &excluded)
      .map_err(|err| SyncError::Io(project_root.to_path_buf(), err))?;
    let checked_files = file_names(&files);
    let aggregated = aggregate_env_files(&files, project_root)
      .map_err(|err| SyncError::Io(project_root.to_path_buf(), err))?;

    let tombstoned = parsed.tombstoned_keys();
    let deprecated_in_local: Vec<(String, String)> = aggregated
      .values()
      .filter(|agg| tombstoned.contains(agg.key.as_str()))
      .map(|agg| (agg.key.clone(), agg.source.clone()))
      .collect();

    let mut added: Vec<(String, String)> = parsed
      .key_map()
      .iter()
      .filter(|(key, _)| !aggregated.contains_key(**key))
      .map(|(key, token)| (key.to_string(), token.value.clone()))
      .collect();
    added.sort();

    if !added.is_empty() {
      let env_file = project_root.join(".env");
      let mut env_content = match std::fs::read_to_string(&env_file) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(SyncError::Io(env_file, err)),
      };

      if !env_content.is_empty() && !env_content.ends_with('\n') {
        env_content.push('\n');
      }
      env_content.push_str("\n# Added by coenv doctor\n");
      for (key, value) in &added {
        env_content.push_str(&format!("{key}={value}\n"));
      }
      std::fs::write(&env_file, env_content).map_err(|err| SyncError::Io(env_file, err))?;

      #[cfg(feature = "tracing")]
      debug!(added = added.len(), "doctor appended missing keys");
    }

    Ok(DoctorOutcome {
      checked_files,
      added,
      deprecated_in_local,
    })
  }

  /// Marks `key` as permanently deprecated.
  pub fn deprecate(project_root: &Path, key: &str, today: NaiveDate) -> Result<(), SyncError> {
    let example = example_path(project_root);
    let Some(content) = read_example(&example)? else {
      return Err(SyncError::ExampleNotFound(example));
    };
    let parsed = ParsedFile::parse(&content);

    if parsed.tombstoned_keys().contains(key) {
      return Err(SyncError::AlreadyDeprecated(key.to_string()));
    }

    let in_example = parsed.key_map().contains_key(key);
    let in_local = {
      let excluded = excluded_set(Some(&parsed));
      let files = discover_env_files(project_root, &excluded)
        .map_err(|err| SyncError::Io(project_root.to_path_buf(), err))?;
      aggregate_env_files(&files, project_root)
        .map_err(|err| SyncError::Io(project_root.to_path_buf(), err))?
        .contains_key(key)
    };
    if !in_example && !in_local {
      return Err(SyncError::UnknownKey(key.to_string()));
    }

    let updated = add_tombstone(&parsed, key, today);
    std::fs::write(&example, updated.print()).map_err(|err| SyncError::Io(example, err))
  }

  /// Removes the tombstone for `key`, allowing resurrection on later syncs.
  pub fn undeprecate(project_root: &Path, key: &str) -> Result<(), SyncError> {
    let example = example_path(project_root);
    let Some(content) = read_example(&example)? else {
      return Err(SyncError::ExampleNotFound(example));
    };
    let parsed = ParsedFile::parse(&content);

    if !parsed.tombstoned_keys().contains(key) {
      return Err(SyncError::NotDeprecated(key.to_string()));
    }

    let updated = remove_tombstone(&parsed, key);
    std::fs::write(&example, updated.print()).map_err(|err| SyncError::Io(example, err))
  }
}

fn read_example(example: &Path) -> Result<Option<String>, SyncError> {
  match std::fs::read_to_string(example) {
    Ok(content) => Ok(Some(content)),
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
    Err(err) => Err(SyncError::Io(example.to_path_buf(), err)),
  }
}

fn excluded_set(previous: Option<&ParsedFile>) -> BTreeSet<String> {
  previous
    .map(|p| p.excluded_files().into_iter().map(str::to_string).collect())
    .unwrap_or_default()
}

fn file_names(files: &[PathBuf]) -> Vec<String> {
  files
    .iter()
    .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
    .map(str::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;
  use tempfile::TempDir;

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
  }

  fn sync(dir: &TempDir) -> Result<SyncOutcome, SyncError> {
    EnvSync::sync_project(dir.path(), today(), &InferenceConfig::default())
  }

  #[test]
  fn test_sync_creates_example() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
      dir.path().join(".env"),
      "APP_ENV=development\nSTRIPE_SECRET_KEY=sk_test_51HqK2xJ3yF8gD9nP\nDEBUG=true\n",
    )
    .unwrap();

    let outcome = sync(&dir).unwrap();
    assert_eq!(outcome.discovered_files, vec![".env"]);
    assert_eq!(outcome.synced.len(), 3);

    let example = std::fs::read_to_string(dir.path().join(".env.example")).unwrap();
    assert_eq!(
      example,
      "APP_ENV=development\nSTRIPE_SECRET_KEY=<your_stripe_secret_key>\nDEBUG=true\n"
    );
  }

  #[test]
  fn test_sync_refuses_without_env_files() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(sync(&dir), Err(SyncError::NoEnvFiles(_))));
  }

  #[test]
  fn test_sync_refuses_conflict_markers() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "KEY=value\n").unwrap();
    std::fs::write(
      dir.path().join(".env.example"),
      "<<<<<<< HEAD\nKEY=a\n=======\nKEY=b\n>>>>>>> feature/x\n",
    )
    .unwrap();

    assert!(matches!(sync(&dir), Err(SyncError::ConflictMarkers(_))));
  }

  #[test]
  fn test_sync_refuses_unexcluded_local_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "KEY=value\n").unwrap();
    std::fs::write(dir.path().join(".env.local"), "SECRET=x\n").unwrap();

    assert!(matches!(sync(&dir), Err(SyncError::UnexcludedLocalFile(_))));

    // Excluding the file unblocks the sync and keeps its keys out.
    std::fs::write(
      dir.path().join(".env.example"),
      "# [EXCLUDE_FILE] .env.local\nKEY=value\n",
    )
    .unwrap();
    let outcome = sync(&dir).unwrap();
    assert_eq!(outcome.discovered_files, vec![".env"]);
    let example = std::fs::read_to_string(dir.path().join(".env.example")).unwrap();
    assert!(!example.contains("SECRET"));
    assert!(example.contains("# [EXCLUDE_FILE] .env.local"));
  }

  #[test]
  fn test_sync_blocks_tombstoned_keys() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "KEY=value\nDEAD=value\n").unwrap();
    std::fs::write(
      dir.path().join(".env.example"),
      "KEY=value\n\n# === DEPRECATED ===\n# [TOMBSTONE] DEAD - Deprecated on: 2026-01-01\n",
    )
    .unwrap();

    let outcome = sync(&dir).unwrap();
    assert_eq!(outcome.blocked_keys, vec!["DEAD"]);
    assert!(!outcome.synced.contains_key("DEAD"));

    let example = std::fs::read_to_string(dir.path().join(".env.example")).unwrap();
    assert!(!example.contains("DEAD=value"));
    assert!(example.contains("[TOMBSTONE] DEAD"));
  }

  #[test]
  fn test_sync_is_idempotent_on_disk() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "A=1\nB=sk_test_something\n").unwrap();

    sync(&dir).unwrap();
    let first = std::fs::read_to_string(dir.path().join(".env.example")).unwrap();
    sync(&dir).unwrap();
    let second = std::fs::read_to_string(dir.path().join(".env.example")).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_doctor_appends_missing_keys() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "PRESENT=x\n").unwrap();
    std::fs::write(
      dir.path().join(".env.example"),
      "PRESENT=x\nMISSING_ONE=<your_missing_one>\nMISSING_TWO=default\n",
    )
    .unwrap();

    let outcome = EnvSync::doctor(dir.path()).unwrap();
    assert_eq!(
      outcome.added,
      vec![
        ("MISSING_ONE".to_string(), "<your_missing_one>".to_string()),
        ("MISSING_TWO".to_string(), "default".to_string()),
      ]
    );

    let env = std::fs::read_to_string(dir.path().join(".env")).unwrap();
    assert!(env.contains("# Added by coenv doctor"));
    assert!(env.contains("MISSING_ONE=<your_missing_one>"));
    assert!(env.contains("MISSING_TWO=default"));
  }

  #[test]
  fn test_doctor_requires_example() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
      EnvSync::doctor(dir.path()),
      Err(SyncError::ExampleNotFound(_))
    ));
  }

  #[test]
  fn test_status_report_classifies_keys() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "SYNCED=x\nUNSYNCED=y\nEMPTY=\n").unwrap();
    std::fs::write(
      dir.path().join(".env.example"),
      "SYNCED=x\nEMPTY=\n\n# === DEPRECATED ===\n# [TOMBSTONE] UNSYNCED - Deprecated on: 2026-01-01\n",
    )
    .unwrap();

    let metadata = MetadataStore::open(dir.path()).unwrap();
    let report = EnvSync::status_report(dir.path(), &metadata).unwrap();

    assert_eq!(report.total_keys, 3);
    assert_eq!(report.synced_keys, 2);
    assert_eq!(report.missing_keys, 0);
    assert_eq!(report.deprecated, vec!["UNSYNCED"]);

    let unsynced = report.keys.iter().find(|k| k.key == "UNSYNCED").unwrap();
    assert_eq!(unsynced.repo_status, "deprecated");
    let empty = report.keys.iter().find(|k| k.key == "EMPTY").unwrap();
    assert_eq!(empty.health, "empty");
  }

  #[test]
  fn test_deprecate_and_undeprecate() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "KEY=value\n").unwrap();
    std::fs::write(dir.path().join(".env.example"), "KEY=value\n").unwrap();

    EnvSync::deprecate(dir.path(), "KEY", today()).unwrap();
    let example = std::fs::read_to_string(dir.path().join(".env.example")).unwrap();
    assert!(example.contains("# [TOMBSTONE] KEY - Deprecated on: 2026-08-01"));
    assert!(!example.contains("KEY=value"));

    assert!(matches!(
      EnvSync::deprecate(dir.path(), "KEY", today()),
      Err(SyncError::AlreadyDeprecated(_))
    ));
    assert!(matches!(
      EnvSync::deprecate(dir.path(), "NO_SUCH_KEY", today()),
      Err(SyncError::UnknownKey(_))
    ));

    EnvSync::undeprecate(dir.path(), "KEY").unwrap();
    let example = std::fs::read_to_string(dir.path().join(".env.example")).unwrap();
    assert!(!example.contains("[TOMBSTONE]"));

    assert!(matches!(
      EnvSync::undeprecate(dir.path(), "KEY"),
      Err(SyncError::NotDeprecated(_))
    ));
  }

  #[test]
  fn test_tombstone_suspects_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "DATABASE_PASSWORD=hunter2\n").unwrap();
    std::fs::write(
      dir.path().join(".env.example"),
      "# === DEPRECATED ===\n# [TOMBSTONE] DB_PASS - Deprecated on: 2026-01-01\n",
    )
    .unwrap();

    let outcome = sync(&dir).unwrap();
    assert_eq!(
      outcome.tombstone_suspects,
      vec![("DATABASE_PASSWORD".to_string(), "DB_PASS".to_string())]
    );
  }

  #[test]
  fn test_conflict_marker_detection() {
    assert!(contains_conflict_markers("<<<<<<< HEAD\n"));
    assert!(contains_conflict_markers("a\n=======\nb\n"));
    assert!(!contains_conflict_markers("KEY=value # ======= not a marker\n"));
  }
}
