//! Conversion between Lua values and the loader's data types.

use mlua::prelude::*;

use crate::env::{Delta, Op, Value};
use crate::ident::DepRef;
use crate::interp;
use crate::plugins::TargetConfig;
use crate::target::{Combine, SourceRef};

/// Convert a Lua value into an environment value. Only the shapes that
/// can live under a key schema are accepted: strings, booleans,
/// integers, and arrays of strings.
pub fn value_from_lua(value: LuaValue) -> LuaResult<Value> {
  match value {
    LuaValue::String(s) => Ok(Value::Str(s.to_str()?.to_string())),
    LuaValue::Boolean(b) => Ok(Value::Bool(b)),
    LuaValue::Integer(i) => Ok(Value::Int(i)),
    LuaValue::Table(t) => Ok(Value::List(string_array(&t, "list entries")?)),
    other => Err(LuaError::external(format!(
      "unsupported value type {} (expected string, bool, integer, or list of strings)",
      other.type_name()
    ))),
  }
}

/// Read a Lua table as an array of strings.
fn string_array(table: &LuaTable, what: &str) -> LuaResult<Vec<String>> {
  let mut items = Vec::with_capacity(table.raw_len());
  for i in 1..=table.raw_len() {
    match table.get::<LuaValue>(i as i64)? {
      LuaValue::String(s) => items.push(s.to_str()?.to_string()),
      other => {
        return Err(LuaError::external(format!(
          "{} must be strings, got {}",
          what,
          other.type_name()
        )));
      }
    }
  }
  Ok(items)
}

/// Accept either a single string or an array of strings.
fn string_or_array(value: LuaValue, what: &str) -> LuaResult<Vec<String>> {
  match value {
    LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
    LuaValue::Table(t) => string_array(&t, what),
    other => Err(LuaError::external(format!(
      "{} must be a string or a list of strings, got {}",
      what,
      other.type_name()
    ))),
  }
}

/// Parse a delta table: environment key names mapping to operation
/// tables (`{set=...}`, `{append={...}}`, `{prepend={...}}`,
/// `{remove={...}}`, `{transform="name"}`). A bare value is shorthand
/// for `set`.
///
/// Lua table iteration order is unspecified, so operations are sorted by
/// key name to keep loading deterministic.
pub fn delta_from_lua(table: &LuaTable) -> LuaResult<Delta> {
  let mut entries: Vec<(String, LuaValue)> = Vec::new();
  for pair in table.pairs::<String, LuaValue>() {
    let (key, value) = pair?;
    interp::reject_structural(&key, "an environment key name").map_err(LuaError::external)?;
    entries.push((key, value));
  }
  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut delta = Delta::empty();
  for (key, value) in entries {
    delta.push(key, op_from_lua(value)?);
  }
  Ok(delta)
}

fn op_from_lua(value: LuaValue) -> LuaResult<Op> {
  let table = match value {
    LuaValue::Table(t) => t,
    other => return Ok(Op::Set(value_from_lua(other)?)),
  };

  // An operation table carries exactly one marker key; anything else is
  // a plain value (a list, in practice).
  let markers = ["set", "append", "prepend", "remove", "transform"];
  let mut found: Option<(&str, LuaValue)> = None;
  for marker in markers {
    let v: LuaValue = table.get(marker)?;
    if v != LuaValue::Nil {
      if found.is_some() {
        return Err(LuaError::external(
          "delta operation tables take exactly one of set/append/prepend/remove/transform",
        ));
      }
      found = Some((marker, v));
    }
  }

  match found {
    None => Ok(Op::Set(value_from_lua(LuaValue::Table(table))?)),
    Some(("set", v)) => Ok(Op::Set(value_from_lua(v)?)),
    Some(("append", v)) => Ok(Op::Append(string_or_array(v, "append items")?)),
    Some(("prepend", v)) => Ok(Op::Prepend(string_or_array(v, "prepend items")?)),
    Some(("remove", v)) => Ok(Op::Remove(string_or_array(v, "remove items")?)),
    Some(("transform", v)) => match v {
      LuaValue::String(s) => Ok(Op::Transform(s.to_str()?.to_string())),
      other => Err(LuaError::external(format!(
        "transform names a registered function, got {}",
        other.type_name()
      ))),
    },
    Some(_) => unreachable!(),
  }
}

/// Parse a source entry. Reference-shaped strings with a `#` are product
/// references (structural, no interpolation); `@`-prefixed paths are the
/// retired generated-output prefix and are rejected; anything else is a
/// file path that may interpolate.
fn source_from_lua(text: String, package: &str) -> LuaResult<SourceRef> {
  if let Some(rest) = text.strip_prefix('@') {
    return Err(LuaError::external(format!(
      "the '@' generated-output prefix is no longer supported; reference the producing target instead, e.g. \"//pkg:gen#{}\"",
      rest
    )));
  }
  if text.contains('#') && (text.starts_with("//") || text.starts_with(':')) {
    interp::reject_structural(&text, "a product reference").map_err(LuaError::external)?;
    match DepRef::parse(&text, package).map_err(LuaError::external)? {
      DepRef::Product(reference) => Ok(SourceRef::Product(reference)),
      DepRef::Target(_) => unreachable!("'#' references always parse as products"),
    }
  } else {
    Ok(SourceRef::Path(text))
  }
}

/// Parse the configuration table of a target verb.
pub fn target_config_from_lua(table: &LuaTable, package: &str) -> LuaResult<TargetConfig> {
  let mut config = TargetConfig::default();
  let mut extra: Vec<(String, LuaValue)> = Vec::new();

  for pair in table.pairs::<String, LuaValue>() {
    let (key, value) = pair?;
    match key.as_str() {
      "sources" => {
        for text in string_or_array(value, "sources")? {
          config.sources.push(source_from_lua(text, package)?);
        }
      }
      "deps" => {
        for text in string_or_array(value, "deps")? {
          interp::reject_structural(&text, "a dependency identifier").map_err(LuaError::external)?;
          config.deps.push(DepRef::parse(&text, package).map_err(LuaError::external)?);
        }
      }
      "local" => config.local = delta_table(value, "local")?,
      "down" | "extra" => config.down = delta_table(value, "down")?,
      "using" => config.using = delta_table(value, "using")?,
      "env" => match value {
        LuaValue::String(s) => config.env = Some(s.to_str()?.to_string()),
        other => {
          return Err(LuaError::external(format!(
            "env names a base environment, got {}",
            other.type_name()
          )));
        }
      },
      "concrete" => match value {
        LuaValue::Boolean(b) => config.concrete = Some(b),
        other => {
          return Err(LuaError::external(format!(
            "concrete must be a boolean, got {}",
            other.type_name()
          )));
        }
      },
      "uses" => config.uses = string_or_array(value, "uses")?,
      "combine" => match value {
        LuaValue::String(s) => {
          let mode = s.to_str()?.to_string();
          config.combine = Some(match mode.as_str() {
            "last_writer" => Combine::LastWriter,
            "concat_lists" => Combine::ConcatLists,
            other => {
              return Err(LuaError::external(format!(
                "combine must be \"last_writer\" or \"concat_lists\", got {:?}",
                other
              )));
            }
          });
        }
        other => {
          return Err(LuaError::external(format!(
            "combine must be a string, got {}",
            other.type_name()
          )));
        }
      },
      _ => extra.push((key, value)),
    }
  }

  // Same determinism dance as deltas: Lua gives these in hash order.
  extra.sort_by(|a, b| a.0.cmp(&b.0));
  for (key, value) in extra {
    config.extra.insert(key, value_from_lua(value)?);
  }

  Ok(config)
}

fn delta_table(value: LuaValue, what: &str) -> LuaResult<Delta> {
  match value {
    LuaValue::Table(t) => delta_from_lua(&t),
    other => Err(LuaError::external(format!(
      "{} must be a table of environment-key operations, got {}",
      what,
      other.type_name()
    ))),
  }
}

/// Render a parsed TOML document as a read-only-ish Lua table for the
/// `vars` global.
pub fn toml_to_lua(lua: &Lua, value: &toml::Value) -> LuaResult<LuaValue> {
  Ok(match value {
    toml::Value::String(s) => LuaValue::String(lua.create_string(s)?),
    toml::Value::Integer(i) => LuaValue::Integer(*i),
    toml::Value::Float(f) => LuaValue::Number(*f),
    toml::Value::Boolean(b) => LuaValue::Boolean(*b),
    toml::Value::Datetime(dt) => LuaValue::String(lua.create_string(dt.to_string())?),
    toml::Value::Array(items) => {
      let table = lua.create_table()?;
      for (i, item) in items.iter().enumerate() {
        table.set(i + 1, toml_to_lua(lua, item)?)?;
      }
      LuaValue::Table(table)
    }
    toml::Value::Table(map) => {
      let table = lua.create_table()?;
      for (k, v) in map {
        table.set(k.as_str(), toml_to_lua(lua, v)?)?;
      }
      LuaValue::Table(table)
    }
  })
}
