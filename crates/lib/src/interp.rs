//! String interpolation against environments.
//!
//! Configuration strings may embed `${key}` or `${key|filter}`
//! expressions that resolve against the local environment at evaluation
//! time. A lone `$` passes through unchanged so shell fragments keep
//! working; `$$` produces a literal `$` for the rare case where a literal
//! `${` is wanted.
//!
//! Structural strings (target names, dependency identifiers, environment
//! key names) must not interpolate. [`reject_structural`] enforces this
//! with the offending position.

use thiserror::Error;

use crate::env::{Env, KeyRegistry, Value};

/// Errors raised while parsing or expanding interpolation expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpError {
  #[error("unclosed interpolation at byte {position} in {text:?}")]
  Unclosed { text: String, position: usize },

  #[error("empty interpolation at byte {position} in {text:?}")]
  Empty { text: String, position: usize },

  #[error("unknown filter {filter:?} in {text:?}")]
  UnknownFilter { text: String, filter: String },

  #[error("interpolation references unknown key {key:?}")]
  UnknownKey { key: String },

  #[error("interpolation references key {key:?} which has no value")]
  MissingKey { key: String },

  #[error("interpolation is not allowed in {what} (at byte {position} in {text:?})")]
  InStructural {
    what: &'static str,
    text: String,
    position: usize,
  },
}

/// How a list-shaped value is rendered into a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
  /// Join items with single spaces. The default for bare `${key}`.
  Space,
  Comma,
  Colon,
}

impl Filter {
  fn parse(name: &str, text: &str) -> Result<Filter, InterpError> {
    match name {
      "space" => Ok(Filter::Space),
      "comma" => Ok(Filter::Comma),
      "colon" => Ok(Filter::Colon),
      other => Err(InterpError::UnknownFilter {
        text: text.to_string(),
        filter: other.to_string(),
      }),
    }
  }

  fn separator(self) -> &'static str {
    match self {
      Filter::Space => " ",
      Filter::Comma => ",",
      Filter::Colon => ":",
    }
  }
}

/// A parsed fragment of an interpolable string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Expr {
    key: String,
    filter: Filter,
    /// Byte offset of the `${` opener, for diagnostics.
    position: usize,
  },
}

/// Parse a string into literal and expression segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, InterpError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    if bytes[i] == b'$' {
      match bytes.get(i + 1) {
        Some(b'$') => {
          literal.push('$');
          i += 2;
        }
        Some(b'{') => {
          let open = i;
          let close = input[i + 2..]
            .find('}')
            .map(|off| i + 2 + off)
            .ok_or(InterpError::Unclosed {
              text: input.to_string(),
              position: open,
            })?;
          let body = &input[i + 2..close];
          if body.is_empty() {
            return Err(InterpError::Empty {
              text: input.to_string(),
              position: open,
            });
          }
          let (key, filter) = match body.split_once('|') {
            Some((key, filter)) => (key, Filter::parse(filter, input)?),
            None => (body, Filter::Space),
          };
          if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
          }
          segments.push(Segment::Expr {
            key: key.to_string(),
            filter,
            position: open,
          });
          i = close + 1;
        }
        _ => {
          literal.push('$');
          i += 1;
        }
      }
    } else {
      // Advance one full character, not one byte.
      let ch = input[i..].chars().next().expect("index stays on a char boundary");
      literal.push(ch);
      i += ch.len_utf8();
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }
  Ok(segments)
}

/// Expand all interpolation expressions in `input` against `env`.
pub fn expand(input: &str, env: &Env, registry: &KeyRegistry) -> Result<String, InterpError> {
  let segments = parse(input)?;
  let mut out = String::with_capacity(input.len());
  for segment in segments {
    match segment {
      Segment::Literal(s) => out.push_str(&s),
      Segment::Expr { key, filter, .. } => {
        let value = env
          .lookup(registry, &key)
          .map_err(|_| InterpError::UnknownKey { key: key.clone() })?
          .ok_or(InterpError::MissingKey { key: key.clone() })?;
        out.push_str(&render(&value, filter));
      }
    }
  }
  Ok(out)
}

/// Fail if `input` contains any interpolation expression.
///
/// `what` names the structural position for the diagnostic, e.g.
/// `"a target name"`.
pub fn reject_structural(input: &str, what: &'static str) -> Result<(), InterpError> {
  for segment in parse(input)? {
    if let Segment::Expr { position, .. } = segment {
      return Err(InterpError::InStructural {
        what,
        text: input.to_string(),
        position,
      });
    }
  }
  Ok(())
}

fn render(value: &Value, filter: Filter) -> String {
  match value {
    Value::Str(s) => s.clone(),
    Value::Bool(b) => b.to_string(),
    Value::Int(i) => i.to_string(),
    Value::List(items) => items.join(filter.separator()),
  }
}
