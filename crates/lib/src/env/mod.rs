//! Environments: immutable keyed maps with schema-checked values and
//! content fingerprints.
//!
//! An [`Env`] is never mutated. Applying a [`Delta`](delta::Delta)
//! produces a new environment; two environments with equal fingerprints
//! are interchangeable. Fingerprints are SHA-256 digests over the sorted
//! canonical form of the contents; the full digest decides equality while
//! a short prefix appears in paths and diagnostics.

pub mod delta;
pub mod schema;

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::consts::HASH_PREFIX_LEN;
use crate::interp::InterpError;

pub use delta::{Delta, DeltaOp, Op, Transform, TransformRegistry};
pub use schema::{Domain, KeySchema, Normalize, Value};

/// Errors raised by environment operations.
#[derive(Debug, Error)]
pub enum EnvError {
  #[error("unknown environment key {key:?}")]
  UnknownKey { key: String },

  #[error("environment key {key:?} already registered with a different schema")]
  DuplicateKey { key: String },

  #[error("type mismatch for key {key:?}: expected {expected}, got {got}")]
  TypeMismatch {
    key: String,
    expected: &'static str,
    got: String,
  },

  #[error("unknown transform {name:?} referenced by key {key:?}")]
  UnknownTransform { name: String, key: String },

  #[error("transform {name:?} failed on key {key:?}: {message}")]
  TransformFailed {
    name: String,
    key: String,
    message: String,
  },

  #[error("required key {key:?} has no value and no default")]
  MissingKey { key: String },

  #[error(transparent)]
  Interp(#[from] InterpError),
}

/// Registry of environment key schemas.
///
/// Keys must be registered before any delta references them. Registration
/// is append-only; re-registering a key with an identical schema is a
/// no-op, while a conflicting re-registration is an error.
#[derive(Debug, Default)]
pub struct KeyRegistry {
  keys: BTreeMap<String, KeySchema>,
}

impl KeyRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, name: impl Into<String>, schema: KeySchema) -> Result<(), EnvError> {
    let name = name.into();
    match self.keys.get(&name) {
      Some(existing) if *existing == schema => Ok(()),
      Some(_) => Err(EnvError::DuplicateKey { key: name }),
      None => {
        self.keys.insert(name, schema);
        Ok(())
      }
    }
  }

  pub fn get(&self, name: &str) -> Option<&KeySchema> {
    self.keys.get(name)
  }

  pub fn require(&self, name: &str) -> Result<&KeySchema, EnvError> {
    self.keys.get(name).ok_or_else(|| EnvError::UnknownKey {
      key: name.to_string(),
    })
  }

  pub fn len(&self) -> usize {
    self.keys.len()
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }
}

/// Stable digest of an environment's canonical contents.
///
/// Equality uses the full SHA-256 hex digest. Display and path
/// construction use the first [`HASH_PREFIX_LEN`] characters; a collision
/// within the prefix changes nothing semantically because all comparisons
/// go through the full digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
  hex: String,
}

impl Fingerprint {
  pub fn full(&self) -> &str {
    &self.hex
  }

  pub fn short(&self) -> &str {
    &self.hex[..HASH_PREFIX_LEN]
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.short())
  }
}

impl Serialize for Fingerprint {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.hex)
  }
}

/// An immutable mapping from registered key names to values.
#[derive(Debug, Clone, Default)]
pub struct Env {
  map: BTreeMap<String, Value>,
  // Computed on demand, then cached. Safe because environments are
  // fingerprinted only after the key registry is frozen.
  fp: OnceCell<Fingerprint>,
}

impl PartialEq for Env {
  fn eq(&self, other: &Self) -> bool {
    self.map == other.map
  }
}

impl Eq for Env {}

impl Env {
  /// The empty environment.
  pub fn empty() -> Self {
    Env::default()
  }

  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }

  pub fn len(&self) -> usize {
    self.map.len()
  }

  /// The stored value for `key`, ignoring schema defaults.
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.map.get(key)
  }

  /// The value for `key`, falling back to the schema default.
  /// `Ok(None)` means the key is registered but has neither a value here
  /// nor a default.
  pub fn lookup(&self, registry: &KeyRegistry, key: &str) -> Result<Option<Value>, EnvError> {
    let schema = registry.require(key)?;
    Ok(self.map.get(key).cloned().or_else(|| schema.default.clone()))
  }

  /// Like [`lookup`](Self::lookup), but a missing value is an error.
  /// This is the free-key check: a target that requires `key` cannot be
  /// produced from an environment that leaves it unset.
  pub fn require(&self, registry: &KeyRegistry, key: &str) -> Result<Value, EnvError> {
    self
      .lookup(registry, key)?
      .ok_or_else(|| EnvError::MissingKey { key: key.to_string() })
  }

  /// A new environment retaining only the named keys. Targets use this to
  /// shed state their products do not depend on, which is what collapses
  /// the concrete graph.
  pub fn subset<S: AsRef<str>>(&self, keys: &[S]) -> Env {
    let map = self
      .map
      .iter()
      .filter(|(k, _)| keys.iter().any(|want| want.as_ref() == k.as_str()))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    Env::from_map(map)
  }

  /// Iterate entries in key order.
  pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.map.iter().map(|(k, v)| (k.as_str(), v))
  }

  /// The content fingerprint. Computed once per environment and cached.
  pub fn fingerprint(&self, registry: &KeyRegistry) -> Result<Fingerprint, EnvError> {
    if let Some(fp) = self.fp.get() {
      return Ok(fp.clone());
    }
    let mut hasher = Sha256::new();
    for (key, value) in &self.map {
      let schema = registry.require(key)?;
      let canonical = schema.canonical(value);
      hasher.update(key.as_bytes());
      hasher.update([0x00]);
      // serde_json's output is deterministic for these shapes.
      hasher.update(serde_json::to_string(&canonical).expect("canonical value serializes").as_bytes());
      hasher.update([0x01]);
    }
    let fp = Fingerprint {
      hex: format!("{:x}", hasher.finalize()),
    };
    let _ = self.fp.set(fp.clone());
    Ok(fp)
  }

  /// JSON rendering of the contents, for diagnostics and dump output.
  pub fn to_json(&self) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = self
      .map
      .iter()
      .map(|(k, v)| (k.clone(), serde_json::to_value(v).expect("value serializes")))
      .collect();
    serde_json::Value::Object(map)
  }

  pub(crate) fn from_map(map: BTreeMap<String, Value>) -> Env {
    Env {
      map,
      fp: OnceCell::new(),
    }
  }

  pub(crate) fn map_clone(&self) -> BTreeMap<String, Value> {
    self.map.clone()
  }
}

impl Serialize for Env {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.map.serialize(serializer)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry() -> KeyRegistry {
    let mut reg = KeyRegistry::new();
    reg.register("c_flags", KeySchema::new(Domain::List)).unwrap();
    reg
      .register("features", KeySchema::new(Domain::Set))
      .unwrap();
    reg
      .register("cc", KeySchema::new(Domain::Str).with_default(Value::str("cc")))
      .unwrap();
    reg
  }

  mod registration {
    use super::*;

    #[test]
    fn identical_reregistration_is_noop() {
      let mut reg = registry();
      reg.register("c_flags", KeySchema::new(Domain::List)).unwrap();
      assert_eq!(reg.len(), 3);
    }

    #[test]
    fn conflicting_reregistration_fails() {
      let mut reg = registry();
      let err = reg.register("c_flags", KeySchema::new(Domain::Set)).unwrap_err();
      assert!(matches!(err, EnvError::DuplicateKey { .. }));
    }
  }

  mod lookup {
    use super::*;

    #[test]
    fn falls_back_to_default() {
      let reg = registry();
      let env = Env::empty();
      assert_eq!(env.lookup(&reg, "cc").unwrap(), Some(Value::str("cc")));
      assert_eq!(env.lookup(&reg, "c_flags").unwrap(), None);
    }

    #[test]
    fn unknown_key_is_an_error() {
      let reg = registry();
      let env = Env::empty();
      assert!(matches!(
        env.lookup(&reg, "nope"),
        Err(EnvError::UnknownKey { .. })
      ));
    }

    #[test]
    fn require_reports_missing() {
      let reg = registry();
      let env = Env::empty();
      assert!(matches!(
        env.require(&reg, "c_flags"),
        Err(EnvError::MissingKey { .. })
      ));
    }
  }

  mod fingerprints {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn empty_env_fingerprint_is_stable() {
      let reg = registry();
      let a = Env::empty().fingerprint(&reg).unwrap();
      let b = Env::empty().fingerprint(&reg).unwrap();
      assert_eq!(a, b);
      assert_eq!(a.short().len(), HASH_PREFIX_LEN);
      assert_eq!(a.full().len(), 64);
    }

    #[test]
    fn set_order_does_not_change_fingerprint() {
      let reg = registry();
      let mut m1 = BTreeMap::new();
      m1.insert("features".to_string(), Value::list(["b", "a"]));
      let mut m2 = BTreeMap::new();
      m2.insert("features".to_string(), Value::list(["a", "b"]));
      let fp1 = Env::from_map(m1).fingerprint(&reg).unwrap();
      let fp2 = Env::from_map(m2).fingerprint(&reg).unwrap();
      assert_eq!(fp1, fp2);
    }

    #[test]
    fn list_order_changes_fingerprint() {
      let reg = registry();
      let mut m1 = BTreeMap::new();
      m1.insert("c_flags".to_string(), Value::list(["-O2", "-g"]));
      let mut m2 = BTreeMap::new();
      m2.insert("c_flags".to_string(), Value::list(["-g", "-O2"]));
      let fp1 = Env::from_map(m1).fingerprint(&reg).unwrap();
      let fp2 = Env::from_map(m2).fingerprint(&reg).unwrap();
      assert_ne!(fp1, fp2);
    }

    #[test]
    fn subset_of_disjoint_keys_matches_direct_construction() {
      let reg = registry();
      let mut m = BTreeMap::new();
      m.insert("c_flags".to_string(), Value::list(["-O2"]));
      m.insert("features".to_string(), Value::list(["x"]));
      let env = Env::from_map(m);

      let narrowed = env.subset(&["c_flags"]);
      let mut direct = BTreeMap::new();
      direct.insert("c_flags".to_string(), Value::list(["-O2"]));
      assert_eq!(
        narrowed.fingerprint(&reg).unwrap(),
        Env::from_map(direct).fingerprint(&reg).unwrap()
      );
    }
  }
}
