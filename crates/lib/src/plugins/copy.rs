//! The `copy_file` target kind: copy sources into the target's output
//! directory, one product per file.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::eval::{EvalError, GenCx, Generated};
use crate::loader::LoadError;
use crate::project::{Project, RuleDef};
use crate::target::{Combine, ProductGen, Target};

use super::{PluginDef, VerbCall, VerbDef, basename};

pub const PLUGIN: PluginDef = PluginDef {
  name: "copy",
  install,
  verbs: &[VerbDef {
    name: "copy_file",
    build: build_copy_file,
  }],
};

fn install(project: &mut Project) -> Result<(), LoadError> {
  project.add_rules(
    "copy",
    [(
      "copy_file".to_string(),
      RuleDef::new("cp $in $out").with_description("copy $out"),
    )],
  )?;
  Ok(())
}

fn build_copy_file(call: VerbCall<'_>) -> Result<Target, LoadError> {
  if call.config.sources.is_empty() {
    return Err(LoadError::BadConfig {
      ident: call.ident(),
      message: "copy_file needs at least one source".to_string(),
    });
  }
  Ok(call.into_target("copy_file", true, Combine::LastWriter, Arc::new(CopyGen)))
}

/// Copies care about nothing in the environment, so every product is
/// narrowed to the empty environment and copies collapse maximally.
struct CopyGen;

impl ProductGen for CopyGen {
  fn generate(&self, cx: &GenCx<'_>) -> Result<Generated, EvalError> {
    let mut products = Vec::with_capacity(cx.inputs.len());
    for input in &cx.inputs {
      let env = cx.narrowed(&[]);
      let output = cx.outpath(&env, &[basename(input)])?;
      products.push(cx.product(
        env,
        "copy_file",
        vec![input.clone()],
        vec![output],
        BTreeMap::new(),
      )?);
    }
    Ok(Generated {
      products,
      using_env: cx.using_base()?,
    })
  }
}
