//! C compilation target kinds: `c_binary` and `c_library`.
//!
//! Environment keys:
//! - `cc`, `ar`: tool names (strings with defaults).
//! - `c_flags`: compile flags, ordered list.
//! - `link_flags`: link flags, ordered list.
//! - `link_srcs`: objects and archives fed to the linker, a set ordered
//!   most-derived-first. Libraries prepend their archive here via their
//!   using-environment; binaries fold dependencies with list
//!   concatenation so sibling libraries accumulate instead of replacing
//!   each other.
//!
//! Compiled objects are narrowed to `{cc, c_flags}` and live at package
//! scope, so any two targets compiling the same source with the same
//! effective flags share one object product. The compile rule writes
//! gcc-style depfiles, so header edits reach the downstream executor.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::env::{Delta, Domain, KeySchema, Op, Value};
use crate::eval::{EvalError, GenCx, Generated};
use crate::loader::LoadError;
use crate::project::{Project, RuleDef};
use crate::target::{Combine, ProductGen, Target};

use super::{PluginDef, VerbCall, VerbDef};

const COMPILE_KEYS: [&str; 2] = ["cc", "c_flags"];
const LINK_KEYS: [&str; 3] = ["cc", "link_flags", "link_srcs"];
const ARCHIVE_KEYS: [&str; 1] = ["ar"];

pub const PLUGIN: PluginDef = PluginDef {
  name: "c",
  install,
  verbs: &[
    VerbDef {
      name: "c_binary",
      build: build_binary,
    },
    VerbDef {
      name: "c_library",
      build: build_library,
    },
  ],
};

fn install(project: &mut Project) -> Result<(), LoadError> {
  let reg = &mut project.registry;
  reg.register("cc", KeySchema::new(Domain::Str).with_default(Value::str("cc")))?;
  reg.register("ar", KeySchema::new(Domain::Str).with_default(Value::str("ar")))?;
  reg.register("c_flags", KeySchema::new(Domain::List).with_default(Value::list::<_, String>([])))?;
  reg.register(
    "link_flags",
    KeySchema::new(Domain::List).with_default(Value::list::<_, String>([])),
  )?;
  reg.register(
    "link_srcs",
    KeySchema::new(Domain::Set).with_default(Value::list::<_, String>([])),
  )?;

  project.transforms.register("pic", pic);

  project.add_rules(
    "c",
    [
      (
        "compile_c_object".to_string(),
        RuleDef::new("$cc $c_flags -MD -MF $out.d -c -o $out $in")
          .with_description("cc $out")
          .with_depfile("$out.d"),
      ),
      (
        "link_c_program".to_string(),
        RuleDef::new("$cc $link_flags -o $out $in").with_description("link $out"),
      ),
      (
        // Archive contents are a pure function of the inputs; restat
        // stops rebuild ripples when ar rewrites an identical file.
        "archive_c_library".to_string(),
        RuleDef::new("$ar rcs $out $in").with_description("ar $out").with_restat(),
      ),
    ],
  )?;
  Ok(())
}

/// `transform = "pic"` on `c_flags` requests position-independent code.
fn pic(value: Value) -> Result<Value, String> {
  match value {
    Value::List(mut items) => {
      if !items.iter().any(|f| f == "-fPIC") {
        items.push("-fPIC".to_string());
      }
      Ok(Value::List(items))
    }
    other => Err(format!("expected a flag list, got {}", other.type_name())),
  }
}

fn build_binary(call: VerbCall<'_>) -> Result<Target, LoadError> {
  require_sources(&call)?;
  Ok(call.into_target("c_binary", true, Combine::ConcatLists, Arc::new(BinaryGen)))
}

fn build_library(call: VerbCall<'_>) -> Result<Target, LoadError> {
  require_sources(&call)?;
  // Libraries are abstract by default: they only make sense beneath a
  // binary that supplies the link context.
  Ok(call.into_target("c_library", false, Combine::ConcatLists, Arc::new(LibraryGen)))
}

fn require_sources(call: &VerbCall<'_>) -> Result<(), LoadError> {
  if call.config.sources.is_empty() {
    return Err(LoadError::BadConfig {
      ident: call.ident(),
      message: "needs at least one source".to_string(),
    });
  }
  Ok(())
}

fn compile_objects(cx: &GenCx<'_>) -> Result<(Vec<crate::product::Product>, Vec<String>), EvalError> {
  let env = cx.narrowed(&COMPILE_KEYS);
  let mut variables = BTreeMap::new();
  variables.insert("cc".to_string(), cx.var("cc")?);
  variables.insert("c_flags".to_string(), cx.var("c_flags")?);

  let mut products = Vec::with_capacity(cx.inputs.len());
  let mut objects = Vec::with_capacity(cx.inputs.len());
  for input in &cx.inputs {
    let object = cx.package_outpath(&env, &[&format!("{}.o", super::basename(input))])?;
    products.push(cx.product(
      env.clone(),
      "compile_c_object",
      vec![input.clone()],
      vec![object.clone()],
      variables.clone(),
    )?);
    objects.push(object);
  }
  Ok((products, objects))
}

struct BinaryGen;

impl ProductGen for BinaryGen {
  fn generate(&self, cx: &GenCx<'_>) -> Result<Generated, EvalError> {
    let (mut products, objects) = compile_objects(cx)?;

    // The linker wants this target's objects ahead of the dependency
    // archives already in link_srcs.
    let link_delta = Delta::empty().with("link_srcs", Op::Prepend(objects.clone()));
    let link_env = cx.apply(cx.env_local, &link_delta)?.subset(&LINK_KEYS);

    let mut inputs = objects;
    if let Some(Value::List(libs)) = cx.value("link_srcs")? {
      inputs.extend(libs);
    }

    let mut variables = BTreeMap::new();
    variables.insert("cc".to_string(), cx.var("cc")?);
    variables.insert("link_flags".to_string(), cx.var("link_flags")?);

    let output = cx.outpath(&link_env, &[])?;
    products.push(cx.product(link_env, "link_c_program", inputs, vec![output], variables)?);

    Ok(Generated {
      products,
      using_env: cx.using_base()?,
    })
  }
}

struct LibraryGen;

impl ProductGen for LibraryGen {
  fn generate(&self, cx: &GenCx<'_>) -> Result<Generated, EvalError> {
    let (mut products, objects) = compile_objects(cx)?;

    let archive_env = cx.narrowed(&ARCHIVE_KEYS);
    let mut variables = BTreeMap::new();
    variables.insert("ar".to_string(), cx.var("ar")?);

    let archive_name = format!("lib{}.a", cx.target.ident.name);
    // Archives are named at package scope; the compile environment of
    // the objects is what actually distinguishes variants, so key the
    // path on that rather than the nearly-empty archive environment.
    let compile_env = cx.narrowed(&COMPILE_KEYS);
    let archive = cx.package_outpath(&compile_env, &[&archive_name])?;

    products.push(cx.product(
      archive_env,
      "archive_c_library",
      objects,
      vec![archive.clone()],
      variables,
    )?);

    // Most-derived archives first: dependents link this library before
    // the libraries it depends on.
    let using_delta = Delta::empty().with("link_srcs", Op::Prepend(vec![archive]));
    let using_env = cx.apply(&cx.using_base()?, &using_delta)?;

    Ok(Generated {
      products,
      using_env,
    })
  }
}
