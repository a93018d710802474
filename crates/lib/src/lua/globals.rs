//! Globals exposed to description files.
//!
//! The root file (`BUILD.conf.lua`) gets project-level registration
//! functions; package files (`BUILD.lua`) get the installed plugins'
//! target verbs. All of them write through a shared [`LoadState`]
//! captured by the closures, the way the loading pass threads its state.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::prelude::*;

use crate::env::{Domain, Env, KeySchema, Normalize};
use crate::interp;
use crate::loader::{LoadError, LoadState};
use crate::plugins::{self, VerbCall};

use super::conv;

/// Register the globals a root description file sees: `install`,
/// `define_key`, `environment`, `seed`, plus `root` and `vars`.
pub fn register_root_globals(
  lua: &Lua,
  state: Rc<RefCell<LoadState>>,
  vars: Option<&toml::Value>,
) -> LuaResult<()> {
  register_common(lua, &state, vars)?;
  let globals = lua.globals();

  {
    let state = state.clone();
    let install = lua.create_function(move |_, name: String| {
      let mut s = state.borrow_mut();
      if s.plugins.iter().any(|p| p.name == name) {
        return Ok(());
      }
      let def = plugins::find(&name).ok_or_else(|| LuaError::external(LoadError::UnknownPlugin { name }))?;
      (def.install)(&mut s.project).map_err(LuaError::external)?;
      s.plugins.push(def);
      Ok(())
    })?;
    globals.set("install", install)?;
  }

  {
    let state = state.clone();
    let define_key = lua.create_function(move |_, (name, spec): (String, LuaTable)| {
      interp::reject_structural(&name, "an environment key name").map_err(LuaError::external)?;
      let schema = schema_from_lua(&spec)?;
      state
        .borrow_mut()
        .project
        .registry
        .register(name, schema)
        .map_err(LuaError::external)
    })?;
    globals.set("define_key", define_key)?;
  }

  {
    let state = state.clone();
    let environment = lua.create_function(move |_, (name, opts): (String, Option<LuaTable>)| {
      let mut s = state.borrow_mut();
      let mut base = Env::empty();
      let mut delta = crate::env::Delta::empty();
      if let Some(opts) = opts {
        if let Some(base_name) = opts.get::<Option<String>>("base")? {
          base = s.project.environment(&base_name).map_err(LuaError::external)?.clone();
        }
        if let Some(values) = opts.get::<Option<LuaTable>>("values")? {
          delta = conv::delta_from_lua(&values)?;
        }
      }
      let env = base
        .apply(&delta, &s.project.registry, &s.project.transforms)
        .map_err(LuaError::external)?;
      s.project.define_environment(name, env).map_err(LuaError::external)
    })?;
    globals.set("environment", environment)?;
  }

  {
    let state = state.clone();
    let seed = lua.create_function(move |_, paths: LuaVariadic<String>| {
      let mut s = state.borrow_mut();
      for path in paths {
        let Some(package) = path.strip_prefix("//") else {
          return Err(LuaError::external(format!(
            "seed takes absolute package paths like \"//lib/codec\", got {:?}",
            path
          )));
        };
        let package = package.split(':').next().unwrap_or(package);
        s.enqueue(package.to_string());
      }
      Ok(())
    })?;
    globals.set("seed", seed)?;
  }

  Ok(())
}

/// Register the globals a package file sees: one function per installed
/// plugin verb, plus `pkg`, `root`, and `vars`.
pub fn register_package_globals(
  lua: &Lua,
  state: Rc<RefCell<LoadState>>,
  package: &str,
  vars: Option<&toml::Value>,
) -> LuaResult<()> {
  register_common(lua, &state, vars)?;
  let globals = lua.globals();
  globals.set("pkg", package)?;

  let plugins: Vec<&'static plugins::PluginDef> = state.borrow().plugins.clone();
  for plugin in plugins {
    for verb in plugin.verbs {
      let state = state.clone();
      let package = package.to_string();
      let build = verb.build;
      let f = lua.create_function(move |_, (name, config): (String, LuaTable)| {
        interp::reject_structural(&name, "a target name").map_err(LuaError::external)?;
        let config = conv::target_config_from_lua(&config, &package)?;
        let target = build(VerbCall {
          package: &package,
          name,
          config,
        })
        .map_err(LuaError::external)?;

        let mut s = state.borrow_mut();
        for dep in &target.deps {
          s.enqueue(dep.package.clone());
        }
        s.project
          .package_mut(&package)
          .expect("verb invoked for a loaded package")
          .add_target(target)
          .map_err(LuaError::external)?;
        Ok(())
      })?;
      globals.set(verb.name, f)?;
    }
  }

  Ok(())
}

fn register_common(lua: &Lua, state: &Rc<RefCell<LoadState>>, vars: Option<&toml::Value>) -> LuaResult<()> {
  let globals = lua.globals();
  globals.set("root", state.borrow().project.root.display().to_string())?;
  match vars {
    Some(value) => globals.set("vars", conv::toml_to_lua(lua, value)?)?,
    None => globals.set("vars", lua.create_table()?)?,
  }
  Ok(())
}

fn schema_from_lua(spec: &LuaTable) -> LuaResult<KeySchema> {
  let kind: String = spec
    .get::<Option<String>>("type")?
    .ok_or_else(|| LuaError::external("define_key spec needs a 'type' field"))?;

  let domain = match kind.as_str() {
    "list" => Domain::List,
    "set" => Domain::Set,
    "string" => Domain::Str,
    "bool" => Domain::Bool,
    "int" => Domain::Int,
    "enum" => {
      let choices: LuaTable = spec
        .get::<Option<LuaTable>>("choices")?
        .ok_or_else(|| LuaError::external("enum keys need a 'choices' list"))?;
      let mut names = Vec::with_capacity(choices.raw_len());
      for i in 1..=choices.raw_len() {
        names.push(choices.get::<String>(i as i64)?);
      }
      Domain::Enum(names)
    }
    other => {
      return Err(LuaError::external(format!(
        "unknown key type {:?} (expected list, set, enum, string, bool, or int)",
        other
      )));
    }
  };

  let mut schema = KeySchema::new(domain);
  if spec.get::<Option<bool>>("dedup_adjacent")?.unwrap_or(false) {
    schema = schema.with_normalize(Normalize::DedupAdjacent);
  }
  let default: LuaValue = spec.get("default")?;
  if default != LuaValue::Nil {
    let value = conv::value_from_lua(default)?;
    // Validate the default against the freshly-built schema so a bad
    // declaration fails at the definition site.
    let value = schema.coerce("default", value).map_err(LuaError::external)?;
    schema = schema.with_default(value);
  }
  Ok(schema)
}
