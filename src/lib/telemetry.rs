//! Anonymous usage telemetry, fire-and-forget.
//!
//! The CLI never blocks on telemetry: it re-spawns its own binary with a
//! hidden subcommand and moves on. The detached child appends the event to
//! the out-of-process spool at `.coenv/telemetry/events.jsonl`; every failure
//! along the way is swallowed.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::metadata::COENV_DIR;

/// Opt-out marker file, relative to the project root.
pub const OPT_OUT_FILE: &str = ".coenv/.no-telemetry";
/// Opt-out environment variable.
pub const OPT_OUT_ENV: &str = "COENV_NO_TELEMETRY";
/// Hidden subcommand name the detached child is invoked with.
pub const EMIT_SUBCOMMAND: &str = "__telemetry-emit";

const SPOOL_DIR: &str = "telemetry";
const SPOOL_FILE: &str = "events.jsonl";

/// A single telemetry event as spooled to disk.
#[derive(Debug, Serialize, Deserialize)]
pub struct TelemetryEvent {
  pub event: String,
  pub timestamp: DateTime<Local>,
  pub data: serde_json::Value,
  pub version: String,
}

/// Telemetry is on unless opted out via env var or marker file.
pub fn is_enabled(project_root: &Path) -> bool {
  if std::env::var_os(OPT_OUT_ENV).is_some() {
    return false;
  }
  !project_root.join(OPT_OUT_FILE).exists()
}

/// Creates the opt-out marker.
pub fn opt_out(project_root: &Path) -> std::io::Result<()> {
  let marker = project_root.join(OPT_OUT_FILE);
  if let Some(parent) = marker.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(marker, "")?;
  Ok(())
}

/// Emits an event without waiting for it to land. Returns immediately; the
/// spawned child does the writing.
pub fn track(project_root: &Path, event: &str, data: serde_json::Value) {
  if !is_enabled(project_root) {
    return;
  }

  let payload = TelemetryEvent {
    event: event.to_string(),
    timestamp: Local::now(),
    data,
    version: env!("CARGO_PKG_VERSION").to_string(),
  };
  let Ok(payload) = serde_json::to_string(&payload) else {
    return;
  };

  #[cfg(feature = "tracing")]
  trace!(event, "spawning telemetry emitter");

  let Ok(exe) = std::env::current_exe() else {
    return;
  };
  // Fire and forget: the child is never waited on.
  let _ = Command::new(exe)
    .arg(EMIT_SUBCOMMAND)
    .arg(project_root)
    .arg(payload)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn();
}

/// Appends `payload` to the spool. Runs inside the detached child.
pub fn emit(project_root: &Path, payload: &str) -> std::io::Result<()> {
  let spool_dir = project_root.join(COENV_DIR).join(SPOOL_DIR);
  std::fs::create_dir_all(&spool_dir)?;

  let mut file = std::fs::OpenOptions::new()
    .create(true)
    .append(true)
    .open(spool_dir.join(SPOOL_FILE))?;
  writeln!(file, "{payload}")?;
  Ok(())
}

/// Event payload for a sync run.
pub fn sync_event(key_count: usize) -> serde_json::Value {
  json!({ "key_count": key_count })
}

/// Event payload for a status check.
pub fn status_event(key_count: usize, missing_count: usize) -> serde_json::Value {
  json!({ "key_count": key_count, "missing_count": missing_count })
}

/// Event payload for a doctor run.
pub fn doctor_event(keys_added: usize) -> serde_json::Value {
  json!({ "keys_added": keys_added })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_opt_out_file_disables() {
    let dir = TempDir::new().unwrap();
    assert!(is_enabled(dir.path()));
    opt_out(dir.path()).unwrap();
    assert!(!is_enabled(dir.path()));
  }

  #[test]
  fn test_emit_appends_jsonl() {
    let dir = TempDir::new().unwrap();
    emit(dir.path(), "{\"event\":\"sync\"}").unwrap();
    emit(dir.path(), "{\"event\":\"status\"}").unwrap();

    let spooled =
      std::fs::read_to_string(dir.path().join(COENV_DIR).join(SPOOL_DIR).join(SPOOL_FILE)).unwrap();
    let lines: Vec<&str> = spooled.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["event"], "sync");
  }

  #[test]
  fn test_event_payloads() {
    assert_eq!(sync_event(7)["key_count"], 7);
    let status = status_event(10, 3);
    assert_eq!(status["missing_count"], 3);
  }
}
