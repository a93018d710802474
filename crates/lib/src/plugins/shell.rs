//! The `shell` target kind: run an arbitrary command with interpolated
//! environment values.
//!
//! Options beyond the generic set:
//! - `cmd` (required): the command line; `${key}` interpolates against
//!   the local environment, `$in`/`$out` are expanded by ninja.
//! - `outputs`: output file names under the target's directory, default
//!   the target name itself.
//! - `depfile`: a path the command writes gcc-style dependencies to,
//!   handed to the executor per build statement.
//! - `restat`: mark the command's outputs content-stable.
//!
//! The generic `uses` option declares which environment keys the command
//! actually reads; products are narrowed to exactly those keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::eval::{EvalError, GenCx, Generated};
use crate::loader::LoadError;
use crate::project::{Project, RuleDef};
use crate::target::{Combine, ProductGen, Target};

use super::{PluginDef, VerbCall, VerbDef};

pub const PLUGIN: PluginDef = PluginDef {
  name: "shell",
  install,
  verbs: &[VerbDef {
    name: "shell",
    build: build_shell,
  }],
};

fn install(project: &mut Project) -> Result<(), LoadError> {
  project.add_rules(
    "shell",
    [("shell".to_string(), RuleDef::new("$cmd").with_description("$cmd"))],
  )?;
  Ok(())
}

fn build_shell(call: VerbCall<'_>) -> Result<Target, LoadError> {
  let cmd = call.require_str("cmd")?;
  let outputs = call.opt_list("outputs")?.unwrap_or_default();
  let depfile = call.opt_str("depfile")?;
  let restat = call.opt_bool("restat")?.unwrap_or(false);
  let r#gen = ShellGen {
    cmd,
    outputs,
    depfile,
    restat,
  };
  Ok(call.into_target("shell", true, Combine::LastWriter, Arc::new(r#gen)))
}

struct ShellGen {
  cmd: String,
  /// Output names under the target directory; empty means a single
  /// output file named after the target itself.
  outputs: Vec<String>,
  depfile: Option<String>,
  restat: bool,
}

impl ProductGen for ShellGen {
  fn generate(&self, cx: &GenCx<'_>) -> Result<Generated, EvalError> {
    let uses: Vec<&str> = cx.target.uses.iter().map(String::as_str).collect();
    let env = cx.narrowed(&uses);

    let cmd = cx.interp(&self.cmd)?;
    let mut outputs = Vec::new();
    if self.outputs.is_empty() {
      outputs.push(cx.outpath(&env, &[])?);
    } else {
      for name in &self.outputs {
        let expanded = cx.interp(name)?;
        outputs.push(cx.outpath(&env, &[&expanded])?);
      }
    }

    let mut variables = BTreeMap::new();
    variables.insert("cmd".to_string(), cmd);

    let mut product = cx.product(env, "shell", cx.inputs.clone(), outputs, variables)?;
    if let Some(depfile) = &self.depfile {
      product.depfile = Some(cx.interp(depfile)?);
    }
    product.restat = self.restat;

    Ok(Generated {
      products: vec![product],
      using_env: cx.using_base()?,
    })
  }
}
