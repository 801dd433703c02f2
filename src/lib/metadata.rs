//! Ownership and activity metadata, stored under `.coenv/`.
//!
//! Tracks who introduced each key (git `user.name`), when it was last synced,
//! and a small activity log that feeds the weekly summary shown on Fridays.
//! None of this affects reconciliation; it only feeds the status/reporting
//! layer.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::debug;

/// Directory holding all coenv bookkeeping files.
pub const COENV_DIR: &str = ".coenv";
const METADATA_FILE: &str = "metadata.json";
const ACTIVITY_FILE: &str = "activity.json";
const PULSE_MARKER: &str = ".last_pulse";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
  #[error("metadata IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("metadata serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}

/// Per-key bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
  pub key: String,
  pub owner: String,
  pub created_at: DateTime<Local>,
  pub last_modified: DateTime<Local>,
  pub last_modified_by: String,
  pub sync_count: u64,
  /// File the key was last seen in (e.g. `.env.development`).
  pub source: String,
}

/// One sync/doctor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
  pub timestamp: DateTime<Local>,
  pub action: String,
  pub user: String,
  pub keys_affected: usize,
}

/// Aggregated activity since the most recent Friday.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
  pub week_start: NaiveDate,
  pub syncs: usize,
  pub doctors: usize,
  pub total_keys_affected: usize,
  pub active_users: Vec<String>,
}

/// Metadata storage rooted at `<project>/.coenv/`.
pub struct MetadataStore {
  coenv_dir: PathBuf,
  keys: IndexMap<String, KeyMetadata>,
  activity: Vec<ActivityEntry>,
}

impl MetadataStore {
  /// Opens (and lazily creates) the store for `project_root`.
  pub fn open(project_root: &Path) -> Result<Self, MetadataError> {
    let coenv_dir = project_root.join(COENV_DIR);
    std::fs::create_dir_all(&coenv_dir)?;

    let keys = match std::fs::read_to_string(coenv_dir.join(METADATA_FILE)) {
      Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
      Err(_) => IndexMap::new(),
    };
    let activity = match std::fs::read_to_string(coenv_dir.join(ACTIVITY_FILE)) {
      Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
      Err(_) => Vec::new(),
    };

    Ok(Self {
      coenv_dir,
      keys,
      activity,
    })
  }

  /// Current git user, or `"unknown"` outside a configured repository.
  pub fn git_user(&self) -> String {
    let output = Command::new("git")
      .args(["config", "user.name"])
      .current_dir(self.coenv_dir.parent().unwrap_or(Path::new(".")))
      .output();

    match output {
      Ok(output) if output.status.success() => {
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if name.is_empty() { "unknown".to_string() } else { name }
      }
      _ => "unknown".to_string(),
    }
  }

  pub fn get(&self, key: &str) -> Option<&KeyMetadata> {
    self.keys.get(key)
  }

  /// Records a key as synced from `source`, creating or updating its entry.
  pub fn track_key(&mut self, key: &str, source: &str, user: &str) -> Result<(), MetadataError> {
    let now = Local::now();
    match self.keys.get_mut(key) {
      Some(meta) => {
        meta.last_modified = now;
        meta.last_modified_by = user.to_string();
        meta.sync_count += 1;
        meta.source = source.to_string();
      }
      None => {
        self.keys.insert(
          key.to_string(),
          KeyMetadata {
            key: key.to_string(),
            owner: user.to_string(),
            created_at: now,
            last_modified: now,
            last_modified_by: user.to_string(),
            sync_count: 1,
            source: source.to_string(),
          },
        );
      }
    }
    self.save_keys()
  }

  /// Appends an activity log entry.
  pub fn log_activity(
    &mut self,
    action: &str,
    keys_affected: usize,
    user: &str,
  ) -> Result<(), MetadataError> {
    self.activity.push(ActivityEntry {
      timestamp: Local::now(),
      action: action.to_string(),
      user: user.to_string(),
      keys_affected,
    });
    let json = serde_json::to_string_pretty(&self.activity)?;
    std::fs::write(self.coenv_dir.join(ACTIVITY_FILE), json)?;
    Ok(())
  }

  fn save_keys(&self) -> Result<(), MetadataError> {
    let json = serde_json::to_string_pretty(&self.keys)?;
    std::fs::write(self.coenv_dir.join(METADATA_FILE), json)?;

    #[cfg(feature = "tracing")]
    debug!(keys = self.keys.len(), "saved metadata");

    Ok(())
  }

  /// Activity totals since the most recent Friday (inclusive).
  pub fn weekly_summary(&self, today: NaiveDate) -> WeeklySummary {
    let week_start = most_recent_friday(today);
    let mut summary = WeeklySummary {
      week_start,
      syncs: 0,
      doctors: 0,
      total_keys_affected: 0,
      active_users: Vec::new(),
    };

    for entry in &self.activity {
      if entry.timestamp.date_naive() < week_start {
        continue;
      }
      summary.total_keys_affected += entry.keys_affected;
      match entry.action.as_str() {
        "sync" => summary.syncs += 1,
        "doctor" => summary.doctors += 1,
        _ => {}
      }
      if !summary.active_users.contains(&entry.user) {
        summary.active_users.push(entry.user.clone());
      }
    }

    summary
  }

  /// The Friday pulse is shown on Fridays and later, at most once per week.
  pub fn should_show_pulse(&self, today: NaiveDate) -> bool {
    if (today.weekday().num_days_from_monday() as i64) < 4 {
      return false;
    }

    let marker = self.coenv_dir.join(PULSE_MARKER);
    match std::fs::read_to_string(&marker) {
      Ok(content) => match content.trim().parse::<NaiveDate>() {
        Ok(last_shown) => last_shown < most_recent_friday(today),
        Err(_) => true,
      },
      Err(_) => true,
    }
  }

  pub fn mark_pulse_shown(&self, today: NaiveDate) -> Result<(), MetadataError> {
    std::fs::write(self.coenv_dir.join(PULSE_MARKER), today.to_string())?;
    Ok(())
  }
}

fn most_recent_friday(today: NaiveDate) -> NaiveDate {
  let days_since_friday = (today.weekday().num_days_from_monday() as i64 - 4).rem_euclid(7);
  today - Duration::days(days_since_friday)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_track_key_creates_and_updates() {
    let dir = TempDir::new().unwrap();
    let mut store = MetadataStore::open(dir.path()).unwrap();

    store.track_key("API_KEY", ".env", "alice").unwrap();
    let meta = store.get("API_KEY").unwrap();
    assert_eq!(meta.owner, "alice");
    assert_eq!(meta.sync_count, 1);

    store.track_key("API_KEY", ".env.local", "bob").unwrap();
    let meta = store.get("API_KEY").unwrap();
    assert_eq!(meta.owner, "alice");
    assert_eq!(meta.last_modified_by, "bob");
    assert_eq!(meta.sync_count, 2);
    assert_eq!(meta.source, ".env.local");
  }

  #[test]
  fn test_metadata_persists_across_opens() {
    let dir = TempDir::new().unwrap();
    {
      let mut store = MetadataStore::open(dir.path()).unwrap();
      store.track_key("DB_URL", ".env", "alice").unwrap();
    }
    let store = MetadataStore::open(dir.path()).unwrap();
    assert!(store.get("DB_URL").is_some());
  }

  #[test]
  fn test_weekly_summary_counts_since_friday() {
    let dir = TempDir::new().unwrap();
    let mut store = MetadataStore::open(dir.path()).unwrap();
    store.log_activity("sync", 3, "alice").unwrap();
    store.log_activity("doctor", 1, "bob").unwrap();

    let summary = store.weekly_summary(Local::now().date_naive());
    assert_eq!(summary.syncs, 1);
    assert_eq!(summary.doctors, 1);
    assert_eq!(summary.total_keys_affected, 4);
    assert_eq!(summary.active_users.len(), 2);
  }

  #[test]
  fn test_most_recent_friday() {
    // 2026-08-21 is a Friday.
    let friday = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();
    assert_eq!(most_recent_friday(friday), friday);
    let sunday = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
    assert_eq!(most_recent_friday(sunday), friday);
    let thursday = NaiveDate::from_ymd_opt(2026, 8, 20).unwrap();
    assert_eq!(
      most_recent_friday(thursday),
      NaiveDate::from_ymd_opt(2026, 8, 14).unwrap()
    );
  }

  #[test]
  fn test_pulse_shown_once_per_week() {
    let dir = TempDir::new().unwrap();
    let store = MetadataStore::open(dir.path()).unwrap();
    let friday = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();
    let thursday = NaiveDate::from_ymd_opt(2026, 8, 20).unwrap();

    assert!(!store.should_show_pulse(thursday));
    assert!(store.should_show_pulse(friday));
    store.mark_pulse_shown(friday).unwrap();
    assert!(!store.should_show_pulse(friday));
  }
}
