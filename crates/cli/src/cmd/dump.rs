//! Implementation of `tessera dump`: evaluate one entry and print the
//! result as JSON for inspection.

use std::path::Path;

use anyhow::{Result, anyhow};

use tessera_lib::eval::Evaluator;
use tessera_lib::loader::load;

pub fn cmd_dump(root: &Path, build_dir: &Path, target: &str) -> Result<()> {
  let ident = super::parse_entry(target)?;
  let entries = [ident.clone()];
  let project = load(root, build_dir, &entries)
    .map_err(|e| anyhow!("failed to load project at {}: {e}", root.display()))?;

  let mut evaluator = Evaluator::new(&project);
  let evaluation = evaluator.evaluate_entry(&ident)?;

  let rendered = serde_json::json!({
    "target": ident.to_string(),
    "products": evaluation.products,
    "using_env": evaluation.using_env,
  });
  println!("{}", serde_json::to_string_pretty(&rendered)?);
  Ok(())
}
