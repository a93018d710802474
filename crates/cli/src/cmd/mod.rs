mod dump;
mod r#gen;
mod targets;

pub use dump::cmd_dump;
pub use r#gen::cmd_gen;
pub use targets::cmd_targets;

use anyhow::{Context, Result};
use tessera_lib::ident::Ident;

/// Parse a command-line target reference. Only absolute forms make sense
/// here; there is no package context to resolve `:name` against.
pub(crate) fn parse_entry(text: &str) -> Result<Ident> {
  Ident::parse(text, None).with_context(|| format!("bad target {:?}", text))
}
