//! Project initialization: git hooks and ignore rules.
//!
//! `init` wires coenv into a repository so the template stays current without
//! anyone remembering to run it: a pre-commit hook re-syncs and stages
//! `.env.example`, and a post-merge hook runs `doctor` so fresh keys from
//! teammates land in the local `.env`.

use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::info;

use crate::metadata::COENV_DIR;

#[derive(Debug, thiserror::Error)]
pub enum HooksError {
  #[error("not a git repository: {0} has no .git directory")]
  NotARepository(PathBuf),
  #[error("hook IO error for {0}: {1}")]
  Io(PathBuf, #[source] std::io::Error),
}

/// What `init` did, for reporting.
#[derive(Debug, Default)]
pub struct InitOutcome {
  pub hooks_installed: Vec<String>,
  pub gitignore_updated: bool,
}

const PRE_COMMIT: &str = "\
#!/bin/sh
# Installed by coenv. Keeps .env.example in sync with local env files.
coenv sync || exit 1
git add .env.example
";

const POST_MERGE: &str = "\
#!/bin/sh
# Installed by coenv. Pulls newly merged keys into the local .env.
coenv doctor
";

/// Sets up `.coenv/`, installs the git hooks, and makes sure `.env` is
/// ignored. Existing hooks are left untouched.
pub fn init(project_root: &Path) -> Result<InitOutcome, HooksError> {
  let git_dir = project_root.join(".git");
  if !git_dir.is_dir() {
    return Err(HooksError::NotARepository(project_root.to_path_buf()));
  }

  let coenv_dir = project_root.join(COENV_DIR);
  std::fs::create_dir_all(&coenv_dir).map_err(|err| HooksError::Io(coenv_dir, err))?;

  let hooks_dir = git_dir.join("hooks");
  std::fs::create_dir_all(&hooks_dir).map_err(|err| HooksError::Io(hooks_dir.clone(), err))?;

  let mut outcome = InitOutcome::default();
  for (name, body) in [("pre-commit", PRE_COMMIT), ("post-merge", POST_MERGE)] {
    if install_hook(&hooks_dir, name, body)? {
      outcome.hooks_installed.push(name.to_string());
    }
  }

  outcome.gitignore_updated = ensure_gitignored(project_root)?;

  #[cfg(feature = "tracing")]
  info!(hooks = ?outcome.hooks_installed, "initialized project");

  Ok(outcome)
}

/// Writes the hook unless one already exists. Returns whether it was written.
fn install_hook(hooks_dir: &Path, name: &str, body: &str) -> Result<bool, HooksError> {
  let path = hooks_dir.join(name);
  if path.exists() {
    return Ok(false);
  }

  std::fs::write(&path, body).map_err(|err| HooksError::Io(path.clone(), err))?;
  make_executable(&path).map_err(|err| HooksError::Io(path, err))?;
  Ok(true)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
  Ok(())
}

/// Adds `.env` to `.gitignore` if it isn't listed yet. Returns whether the
/// file was modified.
fn ensure_gitignored(project_root: &Path) -> Result<bool, HooksError> {
  let gitignore = project_root.join(".gitignore");
  let content = match std::fs::read_to_string(&gitignore) {
    Ok(content) => content,
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
    Err(err) => return Err(HooksError::Io(gitignore, err)),
  };

  let already_listed = content
    .lines()
    .map(str::trim)
    .any(|line| line == ".env" || line == "/.env" || line == ".env*");
  if already_listed {
    return Ok(false);
  }

  let mut updated = content;
  if !updated.is_empty() && !updated.ends_with('\n') {
    updated.push('\n');
  }
  updated.push_str(".env\n");
  std::fs::write(&gitignore, updated).map_err(|err| HooksError::Io(gitignore, err))?;
  Ok(true)
}
