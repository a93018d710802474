//! Environment values and key schemas.
//!
//! Every key that appears in an environment must be registered with a
//! [`KeySchema`] before any delta references it. The schema pins down the
//! value domain, the default read out when the key is absent, and the
//! canonical form used for fingerprinting.

use serde::{Deserialize, Serialize};

use super::EnvError;

/// A value stored under an environment key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Str(String),
  Bool(bool),
  Int(i64),
  /// Ordered list of strings, duplicates preserved.
  List(Vec<String>),
}

impl Value {
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Str(_) => "string",
      Value::Bool(_) => "bool",
      Value::Int(_) => "int",
      Value::List(_) => "list",
    }
  }

  /// String items, when this is a list-shaped value.
  pub fn items(&self) -> Option<&[String]> {
    match self {
      Value::List(items) => Some(items),
      _ => None,
    }
  }

  pub fn str(s: impl Into<String>) -> Value {
    Value::Str(s.into())
  }

  pub fn list<I, S>(items: I) -> Value
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Value::List(items.into_iter().map(Into::into).collect())
  }
}

/// The domain of values a key admits.
///
/// Sets share the `Value::List` representation; uniqueness and the
/// insertion-preserving order are enforced when values enter an
/// environment, and the canonical form sorts them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
  /// Ordered list of strings, duplicates preserved.
  List,
  /// Set of strings with unique, insertion-preserving order.
  Set,
  /// Single string drawn from a fixed choice set.
  Enum(Vec<String>),
  /// Single unrestricted string.
  Str,
  Bool,
  Int,
}

impl Domain {
  pub fn name(&self) -> &'static str {
    match self {
      Domain::List => "list",
      Domain::Set => "set",
      Domain::Enum(_) => "enum",
      Domain::Str => "string",
      Domain::Bool => "bool",
      Domain::Int => "int",
    }
  }

  /// Whether append/prepend/remove operations make sense for this domain.
  pub fn is_sequence(&self) -> bool {
    matches!(self, Domain::List | Domain::Set)
  }
}

/// Normalization applied to a value at hash time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalize {
  #[default]
  None,
  /// Collapse runs of equal adjacent entries in a list.
  DedupAdjacent,
}

/// Declaration of an environment key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySchema {
  pub domain: Domain,
  /// Value read out when the key is absent. A key without a default is a
  /// *required* key: reading it from an environment that lacks it is an
  /// error.
  pub default: Option<Value>,
  pub normalize: Normalize,
}

impl KeySchema {
  pub fn new(domain: Domain) -> Self {
    KeySchema {
      domain,
      default: None,
      normalize: Normalize::None,
    }
  }

  pub fn with_default(mut self, default: Value) -> Self {
    self.default = Some(default);
    self
  }

  pub fn with_normalize(mut self, normalize: Normalize) -> Self {
    self.normalize = normalize;
    self
  }

  /// Validate `value` against the domain and coerce it into the shape
  /// stored in environments. For `Set` this deduplicates while keeping
  /// the first occurrence of each element in place.
  pub fn coerce(&self, key: &str, value: Value) -> Result<Value, EnvError> {
    let mismatch = |got: &Value| EnvError::TypeMismatch {
      key: key.to_string(),
      expected: self.domain.name(),
      got: got.type_name().to_string(),
    };
    match (&self.domain, value) {
      (Domain::List, Value::List(items)) => Ok(Value::List(items)),
      (Domain::Set, Value::List(items)) => Ok(Value::List(dedup_keep_first(items))),
      (Domain::Str, Value::Str(s)) => Ok(Value::Str(s)),
      (Domain::Enum(choices), Value::Str(s)) => {
        if choices.iter().any(|c| c == &s) {
          Ok(Value::Str(s))
        } else {
          Err(EnvError::TypeMismatch {
            key: key.to_string(),
            expected: "enum choice",
            got: format!("{:?} (choices: {})", s, choices.join(", ")),
          })
        }
      }
      (Domain::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
      (Domain::Int, Value::Int(i)) => Ok(Value::Int(i)),
      (_, other) => Err(mismatch(&other)),
    }
  }

  /// The canonical form of a stored value, used for fingerprinting.
  /// Sets hash in sorted order; lists hash as given, after normalization.
  pub fn canonical(&self, value: &Value) -> serde_json::Value {
    match (&self.domain, value) {
      (Domain::Set, Value::List(items)) => {
        let mut sorted: Vec<&String> = items.iter().collect();
        sorted.sort();
        serde_json::Value::from(sorted.iter().map(|s| s.as_str()).collect::<Vec<_>>())
      }
      (Domain::List, Value::List(items)) => {
        let normalized: Vec<&str> = match self.normalize {
          Normalize::None => items.iter().map(|s| s.as_str()).collect(),
          Normalize::DedupAdjacent => {
            let mut out: Vec<&str> = Vec::with_capacity(items.len());
            for item in items {
              if out.last() != Some(&item.as_str()) {
                out.push(item);
              }
            }
            out
          }
        };
        serde_json::Value::from(normalized)
      }
      (_, Value::Str(s)) => serde_json::Value::from(s.as_str()),
      (_, Value::Bool(b)) => serde_json::Value::from(*b),
      (_, Value::Int(i)) => serde_json::Value::from(*i),
      // A stored value always matches its domain; anything else would
      // have been rejected by `coerce`.
      (_, Value::List(items)) => serde_json::Value::from(items.clone()),
    }
  }
}

pub(crate) fn dedup_keep_first(items: Vec<String>) -> Vec<String> {
  let mut out: Vec<String> = Vec::with_capacity(items.len());
  for item in items {
    if !out.contains(&item) {
      out.push(item);
    }
  }
  out
}
