use std::path::PathBuf;

use chrono::Local;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use coenv::agent;
use coenv::hooks;
use coenv::infer::InferenceConfig;
use coenv::metadata::MetadataStore;
use coenv::sync::{EnvSync, StatusReport};
use coenv::telemetry;

#[derive(Parser)]
#[command(
  name = "coenv",
  about = "Keep a shared .env.example in sync with your local env files",
  version,
  author
)]
struct Cli {
  /// Project directory to operate on
  #[arg(short, long, default_value = ".", global = true)]
  project_root: PathBuf,

  /// Verbose output (-v for verbose, -vv for very verbose)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Regenerate .env.example from the local .env* files
  Sync,
  /// Show every key, where it comes from, and whether it is synced
  Status {
    /// Emit the report as JSON instead of a table
    #[arg(long)]
    json: bool,
  },
  /// Pull keys present in .env.example but missing locally into .env
  Doctor,
  /// Permanently retire a key; future syncs will refuse to re-add it
  Deprecate { key: String },
  /// Lift a key's deprecation so it can come back
  Undeprecate { key: String },
  /// Install git hooks and ignore rules for this project
  Init,
  /// Serve project status to editor agents over stdio
  Agent,
  /// Disable anonymous usage telemetry for this project
  TelemetryOff,
  #[command(hide = true, name = "__telemetry-emit")]
  TelemetryEmit { spool_root: PathBuf, payload: String },
}

fn setup_tracing(verbose: u8) {
  use tracing_subscriber::fmt;
  use tracing_subscriber::prelude::*;

  let log_level = match verbose {
    1 => "debug",
    2 => "trace",
    _ => "warn",
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(tracing_subscriber::EnvFilter::new(
      std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
    ))
    .init();
}

#[derive(Tabled)]
struct StatusRow {
  #[tabled(rename = "Key")]
  key: String,
  #[tabled(rename = "Source")]
  source: String,
  #[tabled(rename = "Status")]
  status: String,
  #[tabled(rename = "Health")]
  health: String,
  #[tabled(rename = "Owner")]
  owner: String,
}

fn print_status_table(report: &StatusReport) {
  let rows: Vec<StatusRow> = report
    .keys
    .iter()
    .map(|k| StatusRow {
      key: k.key.clone(),
      source: k.source.clone(),
      status: match k.repo_status.as_str() {
        "synced" => k.repo_status.green().to_string(),
        "missing" => k.repo_status.yellow().to_string(),
        _ => k.repo_status.red().to_string(),
      },
      health: if k.health == "set" {
        k.health.green().to_string()
      } else {
        k.health.yellow().to_string()
      },
      owner: k.owner.clone(),
    })
    .collect();

  let mut table = Table::new(rows);
  table.with(Style::rounded());
  println!("{table}");
  println!(
    "{} keys across {}; {} synced, {} missing, {} deprecated",
    report.total_keys,
    report.discovered_files.join(", "),
    report.synced_keys,
    report.missing_keys,
    report.deprecated.len()
  );
}

fn show_friday_pulse(metadata: &MetadataStore, today: chrono::NaiveDate) {
  if !metadata.should_show_pulse(today) {
    return;
  }
  let summary = metadata.weekly_summary(today);
  println!();
  println!("{}", "Weekly pulse".bold());
  println!(
    "  since {}: {} syncs, {} doctor runs, {} keys touched by {}",
    summary.week_start,
    summary.syncs,
    summary.doctors,
    summary.total_keys_affected,
    if summary.active_users.is_empty() {
      "nobody yet".to_string()
    } else {
      summary.active_users.join(", ")
    }
  );
  let _ = metadata.mark_pulse_shown(today);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let cli = Cli::parse();
  setup_tracing(cli.verbose);

  let root = cli.project_root;
  let today = Local::now().date_naive();

  match cli.command {
    Command::Sync => {
      let outcome = EnvSync::sync_project(&root, today, &InferenceConfig::default())?;

      let mut metadata = MetadataStore::open(&root)?;
      let user = metadata.git_user();
      for (key, agg) in &outcome.synced {
        metadata.track_key(key, &agg.source, &user)?;
      }
      metadata.log_activity("sync", outcome.synced.len(), &user)?;

      println!(
        "{} {} keys from {} into .env.example",
        "Synced".green().bold(),
        outcome.synced.len(),
        outcome.discovered_files.join(", ")
      );
      for key in &outcome.blocked_keys {
        println!(
          "  {} {key} is deprecated and was not re-added",
          "blocked:".red()
        );
      }
      for (new, old) in &outcome.tombstone_suspects {
        println!(
          "  {} {new} looks like deprecated key {old}; if it is the same setting, deprecate it too",
          "warning:".yellow()
        );
      }

      telemetry::track(&root, "sync", telemetry::sync_event(outcome.synced.len()));
      show_friday_pulse(&metadata, today);
    }
    Command::Status { json } => {
      let metadata = MetadataStore::open(&root)?;
      let report = EnvSync::status_report(&root, &metadata)?;

      if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
      } else {
        print_status_table(&report);
      }

      telemetry::track(
        &root,
        "status",
        telemetry::status_event(report.total_keys, report.missing_keys),
      );
    }
    Command::Doctor => {
      let outcome = EnvSync::doctor(&root)?;

      let mut metadata = MetadataStore::open(&root)?;
      let user = metadata.git_user();
      metadata.log_activity("doctor", outcome.added.len(), &user)?;

      if outcome.added.is_empty() {
        println!("{} no keys missing from .env", "OK".green().bold());
      } else {
        println!(
          "{} {} missing keys to .env",
          "Added".green().bold(),
          outcome.added.len()
        );
        for (key, value) in &outcome.added {
          println!("  {key}={value}");
        }
      }
      for (key, source) in &outcome.deprecated_in_local {
        println!(
          "  {} {key} in {source} is deprecated; remove it",
          "warning:".yellow()
        );
      }

      telemetry::track(&root, "doctor", telemetry::doctor_event(outcome.added.len()));
    }
    Command::Deprecate { key } => {
      EnvSync::deprecate(&root, &key, today)?;
      println!(
        "{} {key}; syncs will no longer add it to .env.example",
        "Deprecated".green().bold()
      );
    }
    Command::Undeprecate { key } => {
      EnvSync::undeprecate(&root, &key)?;
      println!(
        "{} {key}; it will reappear on the next sync if still set locally",
        "Restored".green().bold()
      );
    }
    Command::Init => {
      let outcome = hooks::init(&root)?;
      if outcome.hooks_installed.is_empty() {
        println!("git hooks already present, nothing installed");
      } else {
        println!(
          "{} git hooks: {}",
          "Installed".green().bold(),
          outcome.hooks_installed.join(", ")
        );
      }
      if outcome.gitignore_updated {
        println!("added .env to .gitignore");
      }
    }
    Command::Agent => {
      let stdin = std::io::stdin();
      let stdout = std::io::stdout();
      agent::serve(stdin.lock(), stdout.lock(), &root)?;
    }
    Command::TelemetryOff => {
      telemetry::opt_out(&root)?;
      println!("telemetry disabled for this project");
    }
    Command::TelemetryEmit { spool_root, payload } => {
      // Detached child spawned by telemetry::track. Failures are silent.
      let _ = telemetry::emit(&spool_root, &payload);
    }
  }

  Ok(())
}
