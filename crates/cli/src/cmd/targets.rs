//! Implementation of `tessera targets`.

use std::path::Path;

use anyhow::{Result, anyhow};
use owo_colors::{OwoColorize, Stream};

use tessera_lib::loader::load;

pub fn cmd_targets(root: &Path, build_dir: &Path) -> Result<()> {
  let project = load(root, build_dir, &[])
    .map_err(|e| anyhow!("failed to load project at {}: {e}", root.display()))?;

  let mut targets: Vec<_> = project.targets().collect();
  targets.sort_by_key(|t| t.ident.to_string());

  for target in targets {
    let marker = if target.concrete { "*" } else { " " };
    println!(
      "{} {} {}",
      marker,
      target.ident,
      format!("({})", target.kind).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
  Ok(())
}
