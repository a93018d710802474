//! Targets: the abstract nodes of the parameterized graph.

use std::fmt;
use std::sync::Arc;

use crate::env::Delta;
use crate::eval::{EvalError, GenCx, Generated};
use crate::ident::{DepRef, Ident, ProductRef};

/// How a target folds its dependencies' using-environments into its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combine {
  /// Per key, the last dependency (in declared order) that changed the
  /// key wins.
  #[default]
  LastWriter,
  /// List- and set-valued keys accumulate changes from every dependency
  /// instead of replacing each other.
  ConcatLists,
}

/// A source entry as written in a description file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
  /// A file path, resolved against the package (or the project root when
  /// `//`-prefixed). May contain interpolation.
  Path(String),
  /// A named output of another target, bound during evaluation.
  Product(ProductRef),
}

/// The product generator a plugin attaches to its targets.
///
/// Invoked once per `(target, environment)` evaluation with the local
/// environment and the resolved inputs. The generator narrows
/// environments to the keys its products actually depend on before
/// attaching them, and finalizes the using-environment after it knows its
/// own outputs.
pub trait ProductGen {
  fn generate(&self, cx: &GenCx<'_>) -> Result<Generated, EvalError>;
}

/// A node in the abstract graph. Created during loading, never mutated
/// afterwards.
pub struct Target {
  pub ident: Ident,
  /// Opaque kind tag, set by the plugin that built the target.
  pub kind: &'static str,
  /// Resolved static dependency edges, duplicates collapsed, in declared
  /// order. Product references contribute their target here too.
  pub deps: Vec<Ident>,
  /// Product references from the `deps` list; their resolved outputs are
  /// attached to this target's products as implicit inputs.
  pub dep_products: Vec<ProductRef>,
  pub sources: Vec<SourceRef>,
  /// Applied to the environment flowing to transitive dependencies.
  pub down: Delta,
  /// Applied to the environment flowing back to dependents.
  pub using: Delta,
  /// Applied to the environment this target's own products are produced
  /// in.
  pub local: Delta,
  /// Whether the target may be used as an entry point.
  pub concrete: bool,
  /// Named base environment for entry evaluation. `None` falls back to
  /// the project's `default` environment, or the empty environment.
  pub base_env: Option<String>,
  /// Keys this target's products are allowed to depend on, for kinds
  /// that narrow by declaration (see the shell plugin).
  pub uses: Vec<String>,
  pub combine: Combine,
  pub r#gen: Arc<dyn ProductGen>,
}

impl Target {
  /// Record the static edges for a parsed dependency list, collapsing
  /// duplicate targets while preserving first-occurrence order.
  pub fn add_deps<I: IntoIterator<Item = DepRef>>(&mut self, refs: I) {
    for dep in refs {
      if let DepRef::Product(ref product) = dep {
        if !self.dep_products.contains(product) {
          self.dep_products.push(product.clone());
        }
      }
      let target = dep.target().clone();
      if !self.deps.contains(&target) {
        self.deps.push(target);
      }
    }
  }

  /// Record the source list. Product-reference sources also contribute
  /// static dependency edges.
  pub fn add_sources<I: IntoIterator<Item = SourceRef>>(&mut self, sources: I) {
    for source in sources {
      if let SourceRef::Product(ref product) = source {
        let target = product.target.clone();
        if !self.deps.contains(&target) {
          self.deps.push(target);
        }
      }
      self.sources.push(source);
    }
  }
}

impl fmt::Debug for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Target")
      .field("ident", &self.ident)
      .field("kind", &self.kind)
      .field("deps", &self.deps)
      .field("concrete", &self.concrete)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct NullGen;

  impl ProductGen for NullGen {
    fn generate(&self, cx: &GenCx<'_>) -> Result<Generated, EvalError> {
      Ok(Generated {
        products: Vec::new(),
        using_env: cx.env_from_deps.clone(),
      })
    }
  }

  fn target(name: &str) -> Target {
    Target {
      ident: Ident::new("pkg", name),
      kind: "test",
      deps: Vec::new(),
      dep_products: Vec::new(),
      sources: Vec::new(),
      down: Delta::empty(),
      using: Delta::empty(),
      local: Delta::empty(),
      concrete: true,
      base_env: None,
      uses: Vec::new(),
      combine: Combine::LastWriter,
      r#gen: Arc::new(NullGen),
    }
  }

  #[test]
  fn duplicate_deps_collapse_keeping_first() {
    let mut t = target("x");
    t.add_deps([
      DepRef::parse("//a:a", "pkg").unwrap(),
      DepRef::parse("//b:b", "pkg").unwrap(),
      DepRef::parse("//a:a", "pkg").unwrap(),
    ]);
    assert_eq!(t.deps, vec![Ident::new("a", "a"), Ident::new("b", "b")]);
  }

  #[test]
  fn product_ref_sources_create_edges() {
    let mut t = target("x");
    t.add_sources([
      SourceRef::Path("main.c".to_string()),
      SourceRef::Product(ProductRef {
        target: Ident::new("gen", "codegen"),
        output: "tables.c".to_string(),
      }),
    ]);
    assert_eq!(t.deps, vec![Ident::new("gen", "codegen")]);
    assert_eq!(t.sources.len(), 2);
  }

  #[test]
  fn dep_product_refs_are_tracked() {
    let mut t = target("x");
    t.add_deps([DepRef::parse("//gen:codegen#tables.h", "pkg").unwrap()]);
    assert_eq!(t.deps, vec![Ident::new("gen", "codegen")]);
    assert_eq!(t.dep_products.len(), 1);
  }
}
