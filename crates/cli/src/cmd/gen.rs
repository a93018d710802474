//! Implementation of `tessera gen`.

use std::path::Path;
use std::time::Instant;

use anyhow::{Result, anyhow};

use tessera_lib::eval::evaluate_entries;
use tessera_lib::ident::Ident;
use tessera_lib::loader::load;
use tessera_lib::ninja::{EmitOptions, write_manifest};

use crate::output::{format_duration, print_stat, print_success};

pub fn cmd_gen(root: &Path, build_dir: &Path, targets: &[String], dump_env: bool) -> Result<()> {
  let start = Instant::now();

  let mut entries: Vec<Ident> = targets.iter().map(|t| super::parse_entry(t)).collect::<Result<_>>()?;

  let project = load(root, build_dir, &entries)
    .map_err(|e| anyhow!("failed to load project at {}: {e}", root.display()))?;

  if entries.is_empty() {
    entries = project.entry_targets().map(|t| t.ident.clone()).collect();
    entries.sort();
  }

  let products = evaluate_entries(&project, &entries)?;

  let options = EmitOptions {
    regen_command: regen_command(root, build_dir, targets, dump_env),
    dump_env,
  };
  let manifest = write_manifest(&project, &products, &options)?;

  print_success("manifest written");
  print_stat("Entries", &entries.len().to_string());
  print_stat("Products", &products.len().to_string());
  print_stat("Path", &manifest.display().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}

/// The command recorded in the manifest's regeneration rule.
fn regen_command(root: &Path, build_dir: &Path, targets: &[String], dump_env: bool) -> String {
  let mut parts = vec![
    "tessera".to_string(),
    "gen".to_string(),
    "--root".to_string(),
    root.display().to_string(),
    "--build-dir".to_string(),
    build_dir.display().to_string(),
  ];
  if dump_env {
    parts.push("--dump-env".to_string());
  }
  parts.extend(targets.iter().cloned());
  parts.join(" ")
}
