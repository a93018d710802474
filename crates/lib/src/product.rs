//! Products: concrete build steps, deduplicated globally.
//!
//! A product is the fully-resolved output of evaluating a target in some
//! environment. Identity is `(target identifier, environment fingerprint,
//! primary output path)`; two products with equal identity must be equal
//! in content, and no output path may be claimed by two products with
//! differing build commands.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::env::{Env, Fingerprint};
use crate::ident::Ident;

#[derive(Debug, Error)]
pub enum ProductError {
  #[error(
    "duplicate product for output {output:?}: {first} (env {first_env}) and {second} (env {second_env}) disagree"
  )]
  DuplicateProduct {
    output: String,
    first: Ident,
    first_env: String,
    second: Ident,
    second_env: String,
  },
}

/// A concrete build step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
  /// The target this product came from.
  pub target: Ident,
  /// Fingerprint of the environment the product was narrowed to.
  pub fingerprint: Fingerprint,
  /// The narrowed environment itself, kept for diagnostics and dumps.
  pub env: Env,
  /// Ninja rule name.
  pub rule: String,
  /// Input paths, relative to the project root (sources) or the build
  /// directory (outputs of other products).
  pub inputs: Vec<String>,
  /// Output paths, relative to the build directory. Never empty; the
  /// first entry is the primary output.
  pub outputs: Vec<String>,
  /// Implicit dependencies (order satisfied, not on the command line).
  pub implicit: Vec<String>,
  /// Order-only dependencies.
  pub order_only: Vec<String>,
  /// Per-build variable bindings for the rule.
  pub variables: BTreeMap<String, String>,
  pub depfile: Option<String>,
  pub restat: bool,
}

impl Product {
  pub fn primary_output(&self) -> &str {
    &self.outputs[0]
  }

  /// Whether two products claiming the same output would emit the same
  /// build statement. Every field that reaches the manifest is compared;
  /// only the originating identity (target, fingerprint, environment) is
  /// exempt, so products shared at package scope still collapse.
  fn same_emission(&self, other: &Product) -> bool {
    self.rule == other.rule
      && self.inputs == other.inputs
      && self.outputs == other.outputs
      && self.implicit == other.implicit
      && self.order_only == other.order_only
      && self.variables == other.variables
      && self.depfile == other.depfile
      && self.restat == other.restat
  }
}

/// The global, deduplicated product collection.
///
/// Keyed by primary output path. Inserting a product whose primary output
/// is already claimed verifies the two agree; an equal product is
/// discarded, a disagreeing one is an error.
#[derive(Debug, Default)]
pub struct ProductSet {
  by_output: BTreeMap<String, Product>,
}

impl ProductSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a product. Returns `true` when it was new, `false` when an
  /// identical product was already present.
  pub fn insert(&mut self, product: Product) -> Result<bool, ProductError> {
    let key = product.primary_output().to_string();
    match self.by_output.get(&key) {
      Some(existing) => {
        if existing.same_emission(&product) {
          Ok(false)
        } else {
          Err(ProductError::DuplicateProduct {
            output: key,
            first: existing.target.clone(),
            first_env: existing.fingerprint.short().to_string(),
            second: product.target.clone(),
            second_env: product.fingerprint.short().to_string(),
          })
        }
      }
      None => {
        self.by_output.insert(key, product);
        Ok(true)
      }
    }
  }

  pub fn len(&self) -> usize {
    self.by_output.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_output.is_empty()
  }

  /// Whether `path` is produced by some product in the set. Secondary
  /// outputs count.
  pub fn produces(&self, path: &str) -> bool {
    self.by_output.contains_key(path)
      || self
        .by_output
        .values()
        .any(|p| p.outputs.iter().any(|o| o == path))
  }

  /// Products in stable emission order: by target identifier, then
  /// environment fingerprint, then primary output path.
  pub fn in_emission_order(&self) -> Vec<&Product> {
    let mut products: Vec<&Product> = self.by_output.values().collect();
    products.sort_by(|a, b| {
      (a.target.to_string(), a.fingerprint.full(), a.primary_output()).cmp(&(
        b.target.to_string(),
        b.fingerprint.full(),
        b.primary_output(),
      ))
    });
    products
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::env::{KeyRegistry, KeySchema};

  fn product(target: &str, output: &str, rule: &str) -> Product {
    let reg = KeyRegistry::new();
    let env = Env::empty();
    Product {
      target: Ident::parse(target, None).unwrap(),
      fingerprint: env.fingerprint(&reg).unwrap(),
      env,
      rule: rule.to_string(),
      inputs: vec!["src/a.c".to_string()],
      outputs: vec![output.to_string()],
      implicit: Vec::new(),
      order_only: Vec::new(),
      variables: BTreeMap::new(),
      depfile: None,
      restat: false,
    }
  }

  #[test]
  fn identical_duplicate_is_discarded() {
    let mut set = ProductSet::new();
    assert!(set.insert(product("//a:x", "a/x/out", "copy")).unwrap());
    assert!(!set.insert(product("//a:x", "a/x/out", "copy")).unwrap());
    assert_eq!(set.len(), 1);
  }

  #[test]
  fn conflicting_duplicate_fails() {
    let mut set = ProductSet::new();
    set.insert(product("//a:x", "a/x/out", "copy")).unwrap();
    let err = set.insert(product("//b:y", "a/x/out", "link")).unwrap_err();
    assert!(matches!(err, ProductError::DuplicateProduct { .. }));
  }

  #[test]
  fn duplicate_with_different_implicit_inputs_fails() {
    let mut set = ProductSet::new();
    set.insert(product("//a:x", "a/x/out", "copy")).unwrap();

    let mut p = product("//a:x", "a/x/out", "copy");
    p.implicit.push("gen/tables.h".to_string());
    let err = set.insert(p).unwrap_err();
    assert!(matches!(err, ProductError::DuplicateProduct { .. }));
  }

  #[test]
  fn duplicate_with_different_metadata_fails() {
    let mut set = ProductSet::new();
    set.insert(product("//a:x", "a/x/out", "copy")).unwrap();

    let mut p = product("//a:x", "a/x/out", "copy");
    p.restat = true;
    assert!(set.insert(p).is_err());

    let mut p = product("//a:x", "a/x/out", "copy");
    p.depfile = Some("a/x/out.d".to_string());
    assert!(set.insert(p).is_err());
  }

  #[test]
  fn shared_package_products_from_sibling_targets_collapse() {
    // Same emitted statement from two different targets (the compiled-
    // object sharing case) is a dedup, not a conflict.
    let mut set = ProductSet::new();
    let mut a = product("//a:x", "a/obj.o", "compile");
    a.inputs = vec!["a/obj.c".to_string()];
    let mut b = product("//a:y", "a/obj.o", "compile");
    b.inputs = vec!["a/obj.c".to_string()];

    assert!(set.insert(a).unwrap());
    assert!(!set.insert(b).unwrap());
    assert_eq!(set.len(), 1);
  }

  #[test]
  fn emission_order_is_stable() {
    let mut set = ProductSet::new();
    set.insert(product("//b:y", "b/y/out", "copy")).unwrap();
    set.insert(product("//a:x", "a/x/out", "copy")).unwrap();
    set.insert(product("//a:x", "a/x/other", "copy")).unwrap();

    let order: Vec<&str> = set.in_emission_order().iter().map(|p| p.primary_output()).collect();
    assert_eq!(order, vec!["a/x/other", "a/x/out", "b/y/out"]);
  }

  #[test]
  fn produces_tracks_all_outputs() {
    let mut set = ProductSet::new();
    let mut p = product("//a:x", "a/x/out", "copy");
    p.outputs.push("a/x/side".to_string());
    set.insert(p).unwrap();
    assert!(set.produces("a/x/out"));
    assert!(set.produces("a/x/side"));
    assert!(!set.produces("a/x/missing"));
  }

  #[test]
  fn schema_registry_not_needed_after_fingerprinting() {
    // Products carry their fingerprint; the set never re-hashes.
    let mut reg = KeyRegistry::new();
    reg
      .register("k", KeySchema::new(crate::env::Domain::Str))
      .unwrap();
    let mut set = ProductSet::new();
    set.insert(product("//a:x", "a/x/out", "copy")).unwrap();
    assert_eq!(set.in_emission_order().len(), 1);
  }
}
