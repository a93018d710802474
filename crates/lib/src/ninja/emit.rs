//! Manifest emission.
//!
//! Collects the deduplicated product set and writes `build.ninja` plus a
//! regeneration depfile into the build directory. The manifest starts
//! with a regeneration rule (editing any description file makes the
//! downstream executor re-run the generator), followed by the plugins'
//! rules sorted by name and the build statements in stable product
//! order. The file is written to a temporary name and renamed into
//! place.

use std::fs;
use std::io::{self, Write as _};
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::consts::{MANIFEST_DEPS_FILE, MANIFEST_FILE};
use crate::ident::Ident;
use crate::product::ProductSet;
use crate::project::Project;

use super::syntax::Writer;

#[derive(Debug, Error)]
pub enum EmitError {
  /// A product consumes a path that nothing produces and that does not
  /// exist as a source file under the project root.
  #[error("{product}: input {input:?} is not produced by any product and is not a source file")]
  MissingInput { product: Ident, input: String },

  #[error("failed to write {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
  /// Command line that regenerates the manifest, recorded in the
  /// regeneration rule.
  pub regen_command: String,
  /// Dump each product's full environment contents as comments.
  pub dump_env: bool,
}

/// Write the build manifest. Returns the manifest path.
pub fn write_manifest(
  project: &Project,
  products: &ProductSet,
  options: &EmitOptions,
) -> Result<PathBuf, EmitError> {
  check_inputs(project, products)?;

  fs::create_dir_all(&project.build_dir).map_err(|source| EmitError::Io {
    path: project.build_dir.clone(),
    source,
  })?;

  write_deps_file(project)?;

  let tmp_path = project.build_dir.join(".build.ninja.tmp");
  let file = fs::File::create(&tmp_path).map_err(|source| EmitError::Io {
    path: tmp_path.clone(),
    source,
  })?;
  let mut w = Writer::new(io::BufWriter::new(file));

  render(project, products, options, &mut w).map_err(|source| EmitError::Io {
    path: tmp_path.clone(),
    source,
  })?;

  w.into_inner().flush().map_err(|source| EmitError::Io {
    path: tmp_path.clone(),
    source,
  })?;

  let manifest = project.manifest_path();
  fs::rename(&tmp_path, &manifest).map_err(|source| EmitError::Io {
    path: manifest.clone(),
    source,
  })?;

  info!(products = products.len(), path = %manifest.display(), "manifest written");
  Ok(manifest)
}

fn render(
  project: &Project,
  products: &ProductSet,
  options: &EmitOptions,
  w: &mut Writer<impl io::Write>,
) -> io::Result<()> {
  w.comment("Generated by tessera; edit the BUILD files instead.")?;
  w.newline()?;

  w.comment("Automatic regeneration")?;
  w.rule(
    "regenerate_manifest",
    &options.regen_command,
    Some("regenerating build manifest"),
    Some(MANIFEST_DEPS_FILE),
    false,
  )?;
  w.build(&[MANIFEST_FILE.to_string()], "regenerate_manifest", &[], &[], &[], [])?;
  w.newline()?;

  for (name, rule) in project.rules() {
    w.rule(
      name,
      &rule.command,
      rule.description.as_deref(),
      rule.depfile.as_deref(),
      rule.restat,
    )?;
    w.newline()?;
  }

  for product in products.in_emission_order() {
    if options.dump_env {
      w.comment(&format!("{} @ {}", product.target, product.fingerprint.short()))?;
      if product.env.is_empty() {
        w.comment("  (empty environment)")?;
      }
      for (key, value) in product.env.entries() {
        let rendered = serde_json::to_string(value).unwrap_or_else(|_| "<unprintable>".to_string());
        w.comment(&format!("  {} = {}", key, rendered))?;
      }
    }
    w.build(
      &product.outputs,
      &product.rule,
      &product.inputs,
      &product.implicit,
      &product.order_only,
      product.variables.iter().map(|(k, v)| (k.clone(), v.clone())),
    )?;
    // Per-product metadata overrides the rule's.
    if let Some(depfile) = &product.depfile {
      w.variable("depfile", depfile, 1)?;
    }
    if product.restat {
      w.variable("restat", "1", 1)?;
    }
    w.newline()?;
  }

  Ok(())
}

/// Every input must either be produced by some product in the set or
/// resolve to an existing file under the project root.
fn check_inputs(project: &Project, products: &ProductSet) -> Result<(), EmitError> {
  for product in products.in_emission_order() {
    for input in product.inputs.iter().chain(&product.implicit) {
      if products.produces(input) {
        continue;
      }
      if crate::project::fs_path(&project.root, input).is_file() {
        continue;
      }
      return Err(EmitError::MissingInput {
        product: product.target.clone(),
        input: input.clone(),
      });
    }
  }
  Ok(())
}

/// The regeneration dependencies in gcc/make format. Listing description
/// files through a depfile (rather than as explicit inputs) means a
/// deleted BUILD file does not wedge the build.
fn write_deps_file(project: &Project) -> Result<(), EmitError> {
  let path = project.build_dir.join(MANIFEST_DEPS_FILE);
  let io_err = |source: io::Error| EmitError::Io {
    path: path.clone(),
    source,
  };

  let tmp = project.build_dir.join(".build.ninja.deps.tmp");
  {
    let file = fs::File::create(&tmp).map_err(&io_err)?;
    let mut out = io::BufWriter::new(file);
    write!(out, "{}:", MANIFEST_FILE).map_err(&io_err)?;
    for file_path in project.description_files() {
      write!(out, " \\\n  {}", file_path.display()).map_err(&io_err)?;
    }
    writeln!(out).map_err(&io_err)?;
    out.flush().map_err(&io_err)?;
  }
  fs::rename(&tmp, &path).map_err(&io_err)?;
  Ok(())
}
