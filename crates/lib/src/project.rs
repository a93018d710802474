//! Projects and packages: the loaded, indexed description tree.
//!
//! The project is built up by the loader and frozen afterwards: during
//! evaluation everything here is read-only. Packages are created lazily
//! as the loader encounters references to them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::env::{Env, KeyRegistry, TransformRegistry};
use crate::ident::Ident;
use crate::target::Target;

#[derive(Debug, Error)]
pub enum ProjectError {
  #[error("duplicate package {path:?}")]
  DuplicatePackage { path: String },

  #[error("duplicate target {ident} in package {package:?}")]
  DuplicateTarget { ident: Ident, package: String },

  #[error("no such target: {ident}")]
  UnknownTarget { ident: Ident },

  #[error("no such base environment {name:?}")]
  UnknownEnvironment { name: String },

  #[error("environment {name:?} declared more than once")]
  DuplicateEnvironment { name: String },

  #[error("rule {name:?} from {second:?} conflicts with the definition from {first:?}")]
  RuleConflict {
    name: String,
    first: String,
    second: String,
  },
}

/// Body of a ninja rule contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleDef {
  pub command: String,
  pub description: Option<String>,
  pub depfile: Option<String>,
  pub restat: bool,
}

impl RuleDef {
  pub fn new(command: impl Into<String>) -> Self {
    RuleDef {
      command: command.into(),
      description: None,
      depfile: None,
      restat: false,
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_depfile(mut self, depfile: impl Into<String>) -> Self {
    self.depfile = Some(depfile.into());
    self
  }

  pub fn with_restat(mut self) -> Self {
    self.restat = true;
    self
  }
}

/// A directory with a description file, holding the targets it defines.
#[derive(Debug)]
pub struct Package {
  /// Project-relative, slash-delimited path.
  pub path: String,
  targets: BTreeMap<String, Target>,
}

impl Package {
  pub fn new(path: impl Into<String>) -> Self {
    Package {
      path: path.into(),
      targets: BTreeMap::new(),
    }
  }

  pub fn add_target(&mut self, target: Target) -> Result<(), ProjectError> {
    let name = target.ident.name.clone();
    if self.targets.contains_key(&name) {
      return Err(ProjectError::DuplicateTarget {
        ident: target.ident.clone(),
        package: self.path.clone(),
      });
    }
    self.targets.insert(name, target);
    Ok(())
  }

  pub fn target(&self, name: &str) -> Option<&Target> {
    self.targets.get(name)
  }

  pub fn targets(&self) -> impl Iterator<Item = &Target> {
    self.targets.values()
  }
}

/// The root of a loaded description tree.
pub struct Project {
  /// Filesystem root of the project.
  pub root: PathBuf,
  /// Directory the manifest (and all product outputs) live under.
  pub build_dir: PathBuf,
  pub registry: KeyRegistry,
  pub transforms: TransformRegistry,
  named_envs: BTreeMap<String, Env>,
  packages: BTreeMap<String, Package>,
  /// Ninja rules by name, with the plugin that registered each.
  rules: BTreeMap<String, (String, RuleDef)>,
  /// Every description file read during loading, for the manifest
  /// regeneration rule.
  description_files: Vec<PathBuf>,
}

impl Project {
  pub fn new(root: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
    Project {
      root: root.into(),
      build_dir: build_dir.into(),
      registry: KeyRegistry::new(),
      transforms: TransformRegistry::new(),
      named_envs: BTreeMap::new(),
      packages: BTreeMap::new(),
      rules: BTreeMap::new(),
      description_files: Vec::new(),
    }
  }

  // Packages and targets

  pub fn add_package(&mut self, package: Package) -> Result<(), ProjectError> {
    if self.packages.contains_key(&package.path) {
      return Err(ProjectError::DuplicatePackage { path: package.path });
    }
    self.packages.insert(package.path.clone(), package);
    Ok(())
  }

  pub fn package(&self, path: &str) -> Option<&Package> {
    self.packages.get(path)
  }

  pub fn package_mut(&mut self, path: &str) -> Option<&mut Package> {
    self.packages.get_mut(path)
  }

  pub fn has_package(&self, path: &str) -> bool {
    self.packages.contains_key(path)
  }

  pub fn find_target(&self, ident: &Ident) -> Result<&Target, ProjectError> {
    self
      .packages
      .get(&ident.package)
      .and_then(|p| p.target(&ident.name))
      .ok_or_else(|| ProjectError::UnknownTarget { ident: ident.clone() })
  }

  /// All targets, in package/name order.
  pub fn targets(&self) -> impl Iterator<Item = &Target> {
    self.packages.values().flat_map(|p| p.targets())
  }

  /// Targets usable as entry points, in stable order.
  pub fn entry_targets(&self) -> impl Iterator<Item = &Target> {
    self.targets().filter(|t| t.concrete)
  }

  // Named environments

  pub fn define_environment(&mut self, name: impl Into<String>, env: Env) -> Result<(), ProjectError> {
    let name = name.into();
    if self.named_envs.contains_key(&name) {
      return Err(ProjectError::DuplicateEnvironment { name });
    }
    self.named_envs.insert(name, env);
    Ok(())
  }

  pub fn environment(&self, name: &str) -> Result<&Env, ProjectError> {
    self.named_envs.get(name).ok_or_else(|| ProjectError::UnknownEnvironment {
      name: name.to_string(),
    })
  }

  pub fn has_environment(&self, name: &str) -> bool {
    self.named_envs.contains_key(name)
  }

  // Ninja rules

  /// Register a plugin's rules. A rule may be registered by several
  /// plugins as long as the bodies agree.
  pub fn add_rules<I>(&mut self, owner: &str, rules: I) -> Result<(), ProjectError>
  where
    I: IntoIterator<Item = (String, RuleDef)>,
  {
    for (name, def) in rules {
      match self.rules.get(&name) {
        Some((first, existing)) if *existing != def => {
          return Err(ProjectError::RuleConflict {
            name,
            first: first.clone(),
            second: owner.to_string(),
          });
        }
        Some(_) => {}
        None => {
          self.rules.insert(name, (owner.to_string(), def));
        }
      }
    }
    Ok(())
  }

  pub fn rules(&self) -> impl Iterator<Item = (&str, &RuleDef)> {
    self.rules.iter().map(|(name, (_, def))| (name.as_str(), def))
  }

  // Paths

  /// Resolve a source path written in `package` to a project-relative
  /// path. `//`-prefixed paths are root-relative.
  pub fn inpath(&self, package: &str, path: &str) -> String {
    if let Some(rooted) = path.strip_prefix("//") {
      rooted.to_string()
    } else if package.is_empty() {
      path.to_string()
    } else {
      format!("{}/{}", package, path)
    }
  }

  /// Build-relative output path for a product evaluated in an environment
  /// with the given fingerprint. Products of the empty environment live
  /// directly under their package; parameterized products are spelled
  /// apart under `env/<fingerprint>/`.
  pub fn outpath(fingerprint: Option<&str>, parts: &[&str]) -> String {
    let tail = parts.join("/");
    match fingerprint {
      Some(fp) => format!("env/{}/{}", fp, tail),
      None => tail,
    }
  }

  // Description files

  pub fn record_description_file(&mut self, path: impl Into<PathBuf>) {
    self.description_files.push(path.into());
  }

  pub fn description_files(&self) -> &[PathBuf] {
    &self.description_files
  }

  /// Absolute (or cwd-relative) path of a file under the project root.
  pub fn root_path(&self, rel: &str) -> PathBuf {
    self.root.join(rel)
  }

  pub fn manifest_path(&self) -> PathBuf {
    self.build_dir.join(crate::consts::MANIFEST_FILE)
  }
}

impl std::fmt::Debug for Project {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Project")
      .field("root", &self.root)
      .field("build_dir", &self.build_dir)
      .field("packages", &self.packages.keys().collect::<Vec<_>>())
      .field("environments", &self.named_envs.keys().collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

/// Join path segments with the platform separator, for filesystem access.
pub fn fs_path(root: &Path, rel: &str) -> PathBuf {
  let mut out = root.to_path_buf();
  for part in rel.split('/') {
    out.push(part);
  }
  out
}
