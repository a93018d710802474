//! Loading: iterative discovery of description files.
//!
//! The root description file registers plugins, environment keys, and
//! named base environments, and may seed initial packages. After that a
//! worklist drives package discovery: pop a package path, evaluate its
//! `BUILD.lua` with the installed plugins' verbs in scope, record the
//! emitted targets, and enqueue every package their dependencies
//! reference. Static cycles between packages are fine at this stage;
//! whether they are real cycles is decided during evaluation.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{PACKAGE_FILE, ROOT_FILE, VARS_FILE};
use crate::env::EnvError;
use crate::ident::{Ident, IdentError};
use crate::interp::InterpError;
use crate::lua::{globals, runtime};
use crate::plugins::PluginDef;
use crate::project::{Package, Project, ProjectError, fs_path};

/// Errors raised while loading a project.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("missing root description file {path}")]
  MissingRootFile { path: PathBuf },

  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {message}")]
  Vars { path: PathBuf, message: String },

  /// A failure inside user-authored description code, with the file that
  /// was being evaluated. The underlying diagnostic (including errors
  /// surfaced by registered functions) rides along.
  #[error("error evaluating {path}: {source}")]
  Description {
    path: PathBuf,
    #[source]
    source: mlua::Error,
  },

  #[error("unknown plugin {name:?}")]
  UnknownPlugin { name: String },

  #[error("{ident}: {message}")]
  BadConfig { ident: Ident, message: String },

  #[error(transparent)]
  Project(#[from] ProjectError),

  #[error(transparent)]
  Env(#[from] EnvError),

  #[error(transparent)]
  Ident(#[from] IdentError),

  #[error(transparent)]
  Interp(#[from] InterpError),

  #[error("lua: {0}")]
  Lua(#[from] mlua::Error),
}

/// Mutable state shared with the Lua-registered functions while loading
/// runs.
pub(crate) struct LoadState {
  pub project: Project,
  pub queue: VecDeque<String>,
  pub plugins: Vec<&'static PluginDef>,
}

impl LoadState {
  pub fn enqueue(&mut self, package: String) {
    self.queue.push_back(package);
  }
}

/// Load a project: evaluate the root description, then every package
/// reachable from `entries` or from `seed()` declarations.
pub fn load(root: &Path, build_dir: &Path, entries: &[Ident]) -> Result<Project, LoadError> {
  let vars = load_vars(root)?;

  let state = Rc::new(RefCell::new(LoadState {
    project: Project::new(root, build_dir),
    queue: VecDeque::new(),
    plugins: Vec::new(),
  }));

  // Root description file.
  let root_file = root.join(ROOT_FILE);
  if !root_file.is_file() {
    return Err(LoadError::MissingRootFile { path: root_file });
  }
  state.borrow_mut().project.record_description_file(&root_file);
  let source = read(&root_file)?;
  {
    let lua = runtime::create_lua()?;
    globals::register_root_globals(&lua, state.clone(), vars.as_ref())?;
    lua
      .load(&source)
      .set_name(root_file.display().to_string())
      .exec()
      .map_err(|e| LoadError::Description {
        path: root_file.clone(),
        source: e,
      })?;
  }

  for entry in entries {
    state.borrow_mut().enqueue(entry.package.clone());
  }

  // Package worklist. FIFO order keeps discovery deterministic.
  loop {
    let next = state.borrow_mut().queue.pop_front();
    let Some(package) = next else { break };
    if state.borrow().project.has_package(&package) {
      continue;
    }

    let file = fs_path(root, &package).join(PACKAGE_FILE);
    if !file.is_file() {
      // Leave the miss to evaluation, which reports an unknown target
      // with the dependency chain that wanted it.
      debug!(package = %package, "no description file; skipping");
      continue;
    }

    {
      let mut s = state.borrow_mut();
      s.project.add_package(Package::new(&package))?;
      s.project.record_description_file(&file);
    }

    let source = read(&file)?;
    let lua = runtime::create_lua()?;
    globals::register_package_globals(&lua, state.clone(), &package, vars.as_ref())?;
    lua
      .load(&source)
      .set_name(file.display().to_string())
      .exec()
      .map_err(|e| LoadError::Description {
        path: file.clone(),
        source: e,
      })?;
  }

  let state = Rc::try_unwrap(state)
    .ok()
    .expect("loading left no live references to the loader state")
    .into_inner();
  info!(
    packages = state.project.description_files().len().saturating_sub(1),
    "project loaded"
  );
  Ok(state.project)
}

fn load_vars(root: &Path) -> Result<Option<toml::Value>, LoadError> {
  let path = root.join(VARS_FILE);
  if !path.is_file() {
    return Ok(None);
  }
  let text = read(&path)?;
  let value = toml::from_str(&text).map_err(|e| LoadError::Vars {
    path,
    message: e.to_string(),
  })?;
  Ok(Some(value))
}

fn read(path: &Path) -> Result<String, LoadError> {
  fs::read_to_string(path).map_err(|source| LoadError::Io {
    path: path.to_path_buf(),
    source,
  })
}
