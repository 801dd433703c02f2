//! Shared `.env.example` maintenance for teams.
//!
//! This library keeps a committed `.env.example` template in sync with the
//! private `.env*` files on each developer's machine: plain configuration is
//! copied through, secrets are replaced with placeholders, removed keys age
//! out through a dated graveyard, and deprecated keys are blocked for good by
//! tombstones.
//!
//! # Pipeline
//!
//! - [`lexer`]: lossless tokenization of env files; printing a parsed file
//!   reproduces its bytes exactly.
//! - [`infer`]: entropy and prefix heuristics deciding which values are
//!   secrets or encrypted blobs.
//! - [`reconcile`]: the pure three-way merge of aggregated local keys into
//!   the previous template, including fuzzy rename detection, the graveyard,
//!   and tombstones.
//! - [`discovery`] and [`sync`]: file discovery, aggregation, and the
//!   orchestration that reads and writes real files.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use chrono::Local;
//! use coenv::infer::InferenceConfig;
//! use coenv::sync::EnvSync;
//!
//! let today = Local::now().date_naive();
//! let outcome = EnvSync::sync_project(Path::new("."), today, &InferenceConfig::default())?;
//! println!("synced {} keys", outcome.synced.len());
//! # Ok::<(), coenv::sync::SyncError>(())
//! ```

pub mod agent;
pub mod discovery;
pub mod hooks;
pub mod infer;
pub mod lexer;
pub mod metadata;
pub mod reconcile;
pub mod sync;
pub mod telemetry;
