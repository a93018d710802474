//! Built-in target-kind plugins.
//!
//! A plugin contributes three things when installed from the root
//! description file: environment-key schemas, ninja rules, and package
//! verbs. Verbs are the functions package files call to emit targets;
//! each receives a target name and a configuration table and builds a
//! [`Target`] with a product generator attached.

pub mod c;
pub mod copy;
pub mod shell;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::env::{Delta, Value};
use crate::ident::{DepRef, Ident};
use crate::loader::LoadError;
use crate::project::Project;
use crate::target::{Combine, ProductGen, SourceRef, Target};

/// A plugin, registered by name from the root description file.
pub struct PluginDef {
  pub name: &'static str,
  /// Register the plugin's environment keys, ninja rules, and
  /// transforms.
  pub install: fn(&mut Project) -> Result<(), LoadError>,
  pub verbs: &'static [VerbDef],
}

/// A package-file function that emits a target.
pub struct VerbDef {
  pub name: &'static str,
  pub build: fn(VerbCall<'_>) -> Result<Target, LoadError>,
}

/// Arguments handed to a verb: the package context, the target name, and
/// the parsed configuration table.
pub struct VerbCall<'a> {
  pub package: &'a str,
  pub name: String,
  pub config: TargetConfig,
}

impl VerbCall<'_> {
  pub fn ident(&self) -> Ident {
    Ident::new(self.package, self.name.clone())
  }

  /// A plugin-specific string option.
  pub fn opt_str(&self, key: &str) -> Result<Option<String>, LoadError> {
    match self.config.extra.get(key) {
      None => Ok(None),
      Some(Value::Str(s)) => Ok(Some(s.clone())),
      Some(other) => Err(self.bad_option(key, "a string", other)),
    }
  }

  pub fn require_str(&self, key: &str) -> Result<String, LoadError> {
    self.opt_str(key)?.ok_or_else(|| LoadError::BadConfig {
      ident: self.ident(),
      message: format!("missing required option {:?}", key),
    })
  }

  /// A plugin-specific boolean option.
  pub fn opt_bool(&self, key: &str) -> Result<Option<bool>, LoadError> {
    match self.config.extra.get(key) {
      None => Ok(None),
      Some(Value::Bool(b)) => Ok(Some(*b)),
      Some(other) => Err(self.bad_option(key, "a boolean", other)),
    }
  }

  /// A plugin-specific list-of-strings option.
  pub fn opt_list(&self, key: &str) -> Result<Option<Vec<String>>, LoadError> {
    match self.config.extra.get(key) {
      None => Ok(None),
      Some(Value::List(items)) => Ok(Some(items.clone())),
      Some(Value::Str(s)) => Ok(Some(vec![s.clone()])),
      Some(other) => Err(self.bad_option(key, "a list of strings", other)),
    }
  }

  fn bad_option(&self, key: &str, expected: &str, got: &Value) -> LoadError {
    LoadError::BadConfig {
      ident: self.ident(),
      message: format!("option {:?} must be {}, got {}", key, expected, got.type_name()),
    }
  }

  /// Assemble a target from the generic configuration, leaving the
  /// plugin to pick kind, defaults, and generator.
  pub fn into_target(
    self,
    kind: &'static str,
    concrete_default: bool,
    combine_default: Combine,
    r#gen: Arc<dyn ProductGen>,
  ) -> Target {
    let config = self.config;
    let mut target = Target {
      ident: Ident::new(self.package, self.name),
      kind,
      deps: Vec::new(),
      dep_products: Vec::new(),
      sources: Vec::new(),
      down: config.down,
      using: config.using,
      local: config.local,
      concrete: config.concrete.unwrap_or(concrete_default),
      base_env: config.env,
      uses: config.uses,
      combine: config.combine.unwrap_or(combine_default),
      r#gen,
    };
    target.add_deps(config.deps);
    target.add_sources(config.sources);
    target
  }
}

/// The generic configuration every verb understands. Options a verb does
/// not recognize end up in `extra` for the plugin to interpret.
#[derive(Debug, Default)]
pub struct TargetConfig {
  pub sources: Vec<SourceRef>,
  pub deps: Vec<DepRef>,
  /// Delta for the environment this target's products are produced in.
  pub local: Delta,
  /// Delta for the environment flowing to dependencies.
  pub down: Delta,
  /// Delta for the environment surfaced to dependents.
  pub using: Delta,
  /// Named base environment for entry evaluation.
  pub env: Option<String>,
  pub concrete: Option<bool>,
  /// Environment keys the target's products depend on; the generator
  /// narrows to these before fingerprinting.
  pub uses: Vec<String>,
  pub combine: Option<Combine>,
  pub extra: BTreeMap<String, Value>,
}

static BUILTINS: [PluginDef; 3] = [copy::PLUGIN, shell::PLUGIN, c::PLUGIN];

/// All built-in plugins, addressable from `install()`.
pub fn builtins() -> &'static [PluginDef] {
  &BUILTINS
}

pub fn find(name: &str) -> Option<&'static PluginDef> {
  builtins().iter().find(|p| p.name == name)
}

/// Basename of a slash-delimited path.
pub(crate) fn basename(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or(path)
}
