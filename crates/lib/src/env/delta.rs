//! Deltas: environment transformations as data.
//!
//! A delta is a finite sequence of per-key operations rather than a
//! closure, so it can be serialized, dumped in diagnostics, and composed
//! without being evaluated. Deltas compose left to right:
//! `env.apply([d1, d2]) == env.apply(d1).apply(d2)`. Composition is
//! associative but not commutative.
//!
//! The `transform` operation is the escape hatch for computed changes: it
//! names a function in the project's transform registry, which receives
//! the current value and returns the new one. The result is re-validated
//! against the key's schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::schema::{Domain, Value, dedup_keep_first};
use super::{Env, EnvError, KeyRegistry};
use crate::interp;

/// A single operation applied to one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
  /// Replace the value. The payload must satisfy the key's schema.
  Set(Value),
  /// Extend a list or set at the back. For sets, an element already
  /// present keeps its earlier position.
  Append(Vec<String>),
  /// Extend a list or set at the front. For sets, an element already
  /// present is re-positioned to the front.
  Prepend(Vec<String>),
  /// Remove elements from a set; silently a no-op for absent elements.
  Remove(Vec<String>),
  /// Apply a named transform from the project registry.
  Transform(String),
}

/// An operation bound to the key it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaOp {
  pub key: String,
  pub op: Op,
}

/// An ordered sequence of operations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Delta {
  pub ops: Vec<DeltaOp>,
}

impl Delta {
  pub fn empty() -> Self {
    Delta::default()
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }

  pub fn push(&mut self, key: impl Into<String>, op: Op) {
    self.ops.push(DeltaOp { key: key.into(), op });
  }

  pub fn with(mut self, key: impl Into<String>, op: Op) -> Self {
    self.push(key, op);
    self
  }

  /// Concatenate two deltas without evaluating either.
  pub fn then(mut self, other: Delta) -> Delta {
    self.ops.extend(other.ops);
    self
  }
}

/// A named value transformation. Transforms are plain functions so the
/// delta itself stays serializable.
pub type Transform = fn(Value) -> Result<Value, String>;

/// Per-project registry of named transforms, populated by plugins.
#[derive(Default)]
pub struct TransformRegistry {
  map: BTreeMap<String, Transform>,
}

impl TransformRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, name: impl Into<String>, transform: Transform) {
    self.map.insert(name.into(), transform);
  }

  pub fn get(&self, name: &str) -> Option<&Transform> {
    self.map.get(name)
  }
}

impl Env {
  /// Apply a delta, producing a new environment.
  ///
  /// String payloads are interpolated against `self` (the environment
  /// being derived from) before validation, so a delta can splice current
  /// values into new ones.
  pub fn apply(
    &self,
    delta: &Delta,
    registry: &KeyRegistry,
    transforms: &TransformRegistry,
  ) -> Result<Env, EnvError> {
    if delta.is_empty() {
      return Ok(self.clone());
    }
    let mut map = self.map_clone();
    for DeltaOp { key, op } in &delta.ops {
      let schema = registry.require(key)?;
      match op {
        Op::Set(value) => {
          let value = self.interpolate_value(value, registry)?;
          map.insert(key.clone(), schema.coerce(key, value)?);
        }
        Op::Append(items) | Op::Prepend(items) => {
          if !schema.domain.is_sequence() {
            return Err(EnvError::TypeMismatch {
              key: key.clone(),
              expected: "list or set",
              got: schema.domain.name().to_string(),
            });
          }
          let items = self.interpolate_items(items, registry)?;
          let current = current_items(&map, key, schema)?;
          let merged = match (op, &schema.domain) {
            (Op::Append(_), Domain::Set) => {
              let mut out = current;
              for item in items {
                if !out.contains(&item) {
                  out.push(item);
                }
              }
              out
            }
            (Op::Prepend(_), Domain::Set) => {
              let mut out: Vec<String> = current;
              out.retain(|existing| !items.contains(existing));
              let mut front = dedup_keep_first(items);
              front.extend(out);
              front
            }
            (Op::Append(_), _) => {
              let mut out = current;
              out.extend(items);
              out
            }
            (Op::Prepend(_), _) => {
              let mut out = items;
              out.extend(current);
              out
            }
            _ => unreachable!(),
          };
          map.insert(key.clone(), Value::List(merged));
        }
        Op::Remove(items) => {
          if schema.domain != Domain::Set {
            return Err(EnvError::TypeMismatch {
              key: key.clone(),
              expected: "set",
              got: schema.domain.name().to_string(),
            });
          }
          let current = current_items(&map, key, schema)?;
          if !current.is_empty() {
            let remaining: Vec<String> = current.into_iter().filter(|i| !items.contains(i)).collect();
            map.insert(key.clone(), Value::List(remaining));
          }
        }
        Op::Transform(name) => {
          let transform = transforms.get(name).ok_or_else(|| EnvError::UnknownTransform {
            name: name.clone(),
            key: key.clone(),
          })?;
          let current = map
            .get(key.as_str())
            .cloned()
            .or_else(|| schema.default.clone())
            .ok_or_else(|| EnvError::MissingKey { key: key.clone() })?;
          let transformed = transform(current).map_err(|message| EnvError::TransformFailed {
            name: name.clone(),
            key: key.clone(),
            message,
          })?;
          map.insert(key.clone(), schema.coerce(key, transformed)?);
        }
      }
    }
    Ok(Env::from_map(map))
  }

  fn interpolate_value(&self, value: &Value, registry: &KeyRegistry) -> Result<Value, EnvError> {
    Ok(match value {
      Value::Str(s) => Value::Str(interp::expand(s, self, registry)?),
      Value::List(items) => Value::List(self.interpolate_items(items, registry)?),
      other => other.clone(),
    })
  }

  fn interpolate_items(&self, items: &[String], registry: &KeyRegistry) -> Result<Vec<String>, EnvError> {
    items
      .iter()
      .map(|item| Ok(interp::expand(item, self, registry)?))
      .collect()
  }
}

fn current_items(
  map: &BTreeMap<String, Value>,
  key: &str,
  schema: &super::KeySchema,
) -> Result<Vec<String>, EnvError> {
  let value = map.get(key).cloned().or_else(|| schema.default.clone());
  match value {
    None => Ok(Vec::new()),
    Some(Value::List(items)) => Ok(items),
    Some(other) => Err(EnvError::TypeMismatch {
      key: key.to_string(),
      expected: "list or set",
      got: other.type_name().to_string(),
    }),
  }
}
