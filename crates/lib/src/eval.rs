//! The evaluation engine: drives abstract targets to concrete products.
//!
//! An evaluation task is a pair `(target, input environment)`, keyed by
//! the environment's fingerprint. The engine is a memoizing fixpoint:
//!
//! 1. look the task up in the memo; a hit handles diamonds outright;
//! 2. mark the task in-progress; re-entry is a dependency cycle;
//! 3. derive `env_down` with the target's `down` delta and recurse into
//!    dependencies with it;
//! 4. fold the dependencies' using-environments back in (last writer
//!    wins per key, unless the target opts into list concatenation);
//! 5. derive `env_local` with the `local` delta and hand it to the
//!    target's product generator;
//! 6. deduplicate the returned products globally and memoize.
//!
//! Errors unwinding out of evaluation are enriched once with the
//! dependency chain that reached the failure.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{DEFAULT_ENV, RECURSION_LIMIT};
use crate::env::{Delta, Env, EnvError, Fingerprint, KeyRegistry, Value};
use crate::ident::{Ident, ProductRef};
use crate::interp::{self, InterpError};
use crate::product::{Product, ProductError, ProductSet};
use crate::project::Project;
use crate::target::{Combine, SourceRef, Target};

/// Errors raised during evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
  #[error("no such target: {ident}")]
  UnknownTarget { ident: Ident },

  #[error("target {ident} is not concrete and cannot be used as an entry point")]
  NotConcrete { ident: Ident },

  #[error("entry {ident} names unknown base environment {name:?}")]
  UnknownEnvironment { ident: Ident, name: String },

  #[error("dependency cycle: {}", chain.join(" -> "))]
  DependencyCycle { chain: Vec<String> },

  #[error("evaluation depth exceeded {limit} at {ident}; a static cycle is being traversed with ever-changing environments")]
  RecursionLimit { ident: Ident, limit: usize },

  #[error("{target} evaluated in env {fingerprint} does not produce {output:?}")]
  UnknownProduct {
    target: Ident,
    fingerprint: String,
    output: String,
  },

  #[error(transparent)]
  Product(#[from] ProductError),

  #[error("{ident}: {source}")]
  Env {
    ident: Ident,
    #[source]
    source: EnvError,
  },

  #[error("{ident}: {source}")]
  Interp {
    ident: Ident,
    #[source]
    source: InterpError,
  },

  #[error("{source}\n{}", render_chain(chain))]
  Chain {
    chain: Vec<String>,
    #[source]
    source: Box<EvalError>,
  },
}

fn render_chain(chain: &[String]) -> String {
  let mut out = String::from("dependency chain:");
  for link in chain {
    out.push_str("\n  ");
    out.push_str(link);
  }
  out
}

impl EvalError {
  fn env(ident: &Ident, source: EnvError) -> Self {
    EvalError::Env {
      ident: ident.clone(),
      source,
    }
  }

  fn carries_chain(&self) -> bool {
    matches!(self, EvalError::Chain { .. } | EvalError::DependencyCycle { .. })
  }
}

/// Memo key: a target evaluated in an environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EvalKey {
  target: Ident,
  fp: Fingerprint,
}

impl EvalKey {
  fn render(&self) -> String {
    format!("{} @ {}", self.target, self.fp.short())
  }
}

/// The cached result of one evaluation task.
#[derive(Debug)]
pub struct Evaluation {
  pub products: Vec<Product>,
  /// The environment this target surfaces to its dependents.
  pub using_env: Env,
}

/// What a product generator returns.
pub struct Generated {
  pub products: Vec<Product>,
  pub using_env: Env,
}

/// Context handed to a target's product generator.
pub struct GenCx<'a> {
  pub target: &'a Target,
  /// The environment this target's products are produced in.
  pub env_local: &'a Env,
  /// The environment after folding in dependencies, before `local`.
  /// The `using` delta applies on top of this.
  pub env_from_deps: &'a Env,
  /// Resolved source inputs, in declared order. Product references are
  /// already bound to concrete output paths.
  pub inputs: Vec<String>,
  /// Resolved outputs of product references in the `deps` list; attached
  /// to generated products as implicit inputs.
  pub implicit: Vec<String>,
  project: &'a Project,
}

impl GenCx<'_> {
  pub fn registry(&self) -> &KeyRegistry {
    &self.project.registry
  }

  /// Interpolate a configuration string against `env_local`.
  pub fn interp(&self, text: &str) -> Result<String, EvalError> {
    interp::expand(text, self.env_local, &self.project.registry).map_err(|source| EvalError::Interp {
      ident: self.target.ident.clone(),
      source,
    })
  }

  /// Value of a key in `env_local`, with schema default.
  pub fn value(&self, key: &str) -> Result<Option<Value>, EvalError> {
    self
      .env_local
      .lookup(&self.project.registry, key)
      .map_err(|e| EvalError::env(&self.target.ident, e))
  }

  /// Like [`value`](Self::value), but a missing value is an error. This
  /// is where the free-key invariant for concrete evaluation bites.
  pub fn require(&self, key: &str) -> Result<Value, EvalError> {
    self
      .env_local
      .require(&self.project.registry, key)
      .map_err(|e| EvalError::env(&self.target.ident, e))
  }

  /// Render a key for use as a ninja variable (lists join on spaces).
  pub fn var(&self, key: &str) -> Result<String, EvalError> {
    Ok(match self.require(key)? {
      Value::Str(s) => s,
      Value::Bool(b) => b.to_string(),
      Value::Int(i) => i.to_string(),
      Value::List(items) => items.join(" "),
    })
  }

  /// `env_local` narrowed to the given keys.
  pub fn narrowed(&self, keys: &[&str]) -> Env {
    self.env_local.subset(keys)
  }

  pub fn fingerprint(&self, env: &Env) -> Result<Fingerprint, EvalError> {
    env
      .fingerprint(&self.project.registry)
      .map_err(|e| EvalError::env(&self.target.ident, e))
  }

  /// Build-relative output path under this target's output directory for
  /// a product narrowed to `env`.
  pub fn outpath(&self, env: &Env, parts: &[&str]) -> Result<String, EvalError> {
    let fp = self.fingerprint(env)?;
    let prefix = if env.is_empty() { None } else { Some(fp.short()) };
    let mut all: Vec<&str> = Vec::with_capacity(parts.len() + 2);
    if !self.target.ident.package.is_empty() {
      all.push(&self.target.ident.package);
    }
    all.push(&self.target.ident.name);
    all.extend_from_slice(parts);
    Ok(Project::outpath(prefix, &all))
  }

  /// Like [`outpath`](Self::outpath), but without the target-name
  /// directory. Products shared at package scope (compiled objects, for
  /// one) live here so sibling targets deduplicate them.
  pub fn package_outpath(&self, env: &Env, parts: &[&str]) -> Result<String, EvalError> {
    let fp = self.fingerprint(env)?;
    let prefix = if env.is_empty() { None } else { Some(fp.short()) };
    let mut all: Vec<&str> = Vec::with_capacity(parts.len() + 1);
    if !self.target.ident.package.is_empty() {
      all.push(&self.target.ident.package);
    }
    all.extend_from_slice(parts);
    Ok(Project::outpath(prefix, &all))
  }

  /// The using-environment before any output-dependent additions: the
  /// target's `using` delta applied to `env_from_deps`.
  pub fn using_base(&self) -> Result<Env, EvalError> {
    self.apply(self.env_from_deps, &self.target.using)
  }

  /// Apply a delta with this project's registries.
  pub fn apply(&self, env: &Env, delta: &Delta) -> Result<Env, EvalError> {
    env
      .apply(delta, &self.project.registry, &self.project.transforms)
      .map_err(|e| EvalError::env(&self.target.ident, e))
  }

  /// Assemble a product narrowed to `env`. The resolved implicit inputs
  /// from dependency product references are attached automatically.
  pub fn product(
    &self,
    env: Env,
    rule: impl Into<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    variables: std::collections::BTreeMap<String, String>,
  ) -> Result<Product, EvalError> {
    debug_assert!(!outputs.is_empty(), "a product needs at least one output");
    let fingerprint = self.fingerprint(&env)?;
    Ok(Product {
      target: self.target.ident.clone(),
      fingerprint,
      env,
      rule: rule.into(),
      inputs,
      outputs,
      implicit: self.implicit.clone(),
      order_only: Vec::new(),
      variables,
      depfile: None,
      restat: false,
    })
  }
}

/// The memoizing evaluator. One per invocation; single-threaded, the
/// memo and product set are its only state.
pub struct Evaluator<'p> {
  project: &'p Project,
  memo: HashMap<EvalKey, Rc<Evaluation>>,
  stack: Vec<EvalKey>,
  products: ProductSet,
}

impl<'p> Evaluator<'p> {
  pub fn new(project: &'p Project) -> Self {
    Evaluator {
      project,
      memo: HashMap::new(),
      stack: Vec::new(),
      products: ProductSet::new(),
    }
  }

  /// Evaluate a requested entry target in its base environment.
  pub fn evaluate_entry(&mut self, ident: &Ident) -> Result<Rc<Evaluation>, EvalError> {
    let project = self.project;
    let target = project
      .find_target(ident)
      .map_err(|_| EvalError::UnknownTarget { ident: ident.clone() })?;
    if !target.concrete {
      return Err(EvalError::NotConcrete { ident: ident.clone() });
    }
    let base = match &target.base_env {
      Some(name) => project
        .environment(name)
        .map_err(|_| EvalError::UnknownEnvironment {
          ident: ident.clone(),
          name: name.clone(),
        })?
        .clone(),
      None if project.has_environment(DEFAULT_ENV) => project.environment(DEFAULT_ENV).expect("just checked").clone(),
      None => Env::empty(),
    };
    self.evaluate(target, base)
  }

  /// The deduplicated products accumulated so far.
  pub fn products(&self) -> &ProductSet {
    &self.products
  }

  pub fn into_products(self) -> ProductSet {
    self.products
  }

  fn evaluate(&mut self, target: &Target, env_in: Env) -> Result<Rc<Evaluation>, EvalError> {
    let fp = env_in
      .fingerprint(&self.project.registry)
      .map_err(|e| EvalError::env(&target.ident, e))?;
    let key = EvalKey {
      target: target.ident.clone(),
      fp,
    };

    if let Some(hit) = self.memo.get(&key) {
      debug!(target = %key.target, env = %key.fp.short(), "memo hit");
      return Ok(hit.clone());
    }

    if let Some(pos) = self.stack.iter().position(|k| *k == key) {
      let mut chain: Vec<String> = self.stack[pos..].iter().map(EvalKey::render).collect();
      chain.push(key.render());
      return Err(EvalError::DependencyCycle { chain });
    }
    if self.stack.iter().any(|k| k.target == key.target) {
      // The static graph has a cycle, but narrowing kept the task keys
      // distinct. Defined behavior, worth a warning.
      warn!(
        target = %key.target,
        env = %key.fp.short(),
        "static cycle traversed with a narrowed environment"
      );
    }
    if self.stack.len() >= RECURSION_LIMIT {
      return Err(EvalError::RecursionLimit {
        ident: target.ident.clone(),
        limit: RECURSION_LIMIT,
      });
    }

    self.stack.push(key.clone());
    let result = self.evaluate_inner(target, &env_in).map_err(|e| self.enrich(e));
    self.stack.pop();

    let evaluation = result?;
    self.memo.insert(key, evaluation.clone());
    Ok(evaluation)
  }

  fn evaluate_inner(&mut self, target: &Target, env_in: &Env) -> Result<Rc<Evaluation>, EvalError> {
    let project = self.project;
    let ident = &target.ident;
    let registry = &project.registry;
    let transforms = &project.transforms;

    let env_down = env_in
      .apply(&target.down, registry, transforms)
      .map_err(|e| EvalError::env(ident, e))?;

    let mut dep_evals: Vec<(Ident, Rc<Evaluation>)> = Vec::with_capacity(target.deps.len());
    for dep_ident in &target.deps {
      let dep_target = project.find_target(dep_ident).map_err(|_| EvalError::UnknownTarget {
        ident: dep_ident.clone(),
      })?;
      let evaluation = self.evaluate(dep_target, env_down.clone())?;
      dep_evals.push((dep_ident.clone(), evaluation));
    }

    let env_from_deps = self.fold_deps(ident, env_in, &env_down, &dep_evals, target.combine)?;
    let env_local = env_from_deps
      .apply(&target.local, registry, transforms)
      .map_err(|e| EvalError::env(ident, e))?;

    let down_fp = env_down.fingerprint(registry).map_err(|e| EvalError::env(ident, e))?;

    let mut inputs = Vec::with_capacity(target.sources.len());
    for source in &target.sources {
      match source {
        SourceRef::Path(path) => {
          let expanded = interp::expand(path, &env_local, registry).map_err(|source| EvalError::Interp {
            ident: ident.clone(),
            source,
          })?;
          inputs.push(project.inpath(&ident.package, &expanded));
        }
        SourceRef::Product(reference) => {
          inputs.push(self.resolve_product_ref(reference, &down_fp)?);
        }
      }
    }

    let mut implicit = Vec::with_capacity(target.dep_products.len());
    for reference in &target.dep_products {
      implicit.push(self.resolve_product_ref(reference, &down_fp)?);
    }

    let cx = GenCx {
      target,
      env_local: &env_local,
      env_from_deps: &env_from_deps,
      inputs,
      implicit,
      project,
    };
    let generated = target.r#gen.generate(&cx)?;

    for product in &generated.products {
      self.products.insert(product.clone())?;
    }

    Ok(Rc::new(Evaluation {
      products: generated.products,
      using_env: generated.using_env,
    }))
  }

  /// Fold dependencies' using-environments back in, in declared order.
  ///
  /// A key counts as carried only when its value differs from the one in
  /// `env_down`; a dependency that merely inherited a key does not echo
  /// it back. The accumulator starts from `env_in`, not `env_down`: the
  /// target's own `down` delta flows to dependencies, never into its own
  /// local environment.
  fn fold_deps(
    &self,
    ident: &Ident,
    env_in: &Env,
    env_down: &Env,
    deps: &[(Ident, Rc<Evaluation>)],
    combine: Combine,
  ) -> Result<Env, EvalError> {
    if deps.is_empty() {
      return Ok(env_in.clone());
    }
    let mut map = env_in.map_clone();
    for (_, evaluation) in deps {
      for (key, value) in evaluation.using_env.entries() {
        if env_down.get(key) == Some(value) {
          continue;
        }
        match combine {
          Combine::LastWriter => {
            map.insert(key.to_string(), value.clone());
          }
          Combine::ConcatLists => {
            let schema = self.project.registry.require(key).map_err(|e| EvalError::env(ident, e))?;
            let Some(incoming) = value.items().filter(|_| schema.domain.is_sequence()) else {
              map.insert(key.to_string(), value.clone());
              continue;
            };
            // A dependency's list usually extends what flowed down to
            // it; accumulate only the extension, not the shared prefix.
            let base_len = match env_down.get(key).and_then(Value::items) {
              Some(base) if incoming.starts_with(base) => base.len(),
              _ => 0,
            };
            let mut current = match map.get(key).and_then(Value::items) {
              Some(items) => items.to_vec(),
              None => Vec::new(),
            };
            for item in &incoming[base_len..] {
              if schema.domain == crate::env::Domain::Set && current.contains(item) {
                continue;
              }
              current.push(item.clone());
            }
            map.insert(key.to_string(), Value::List(current));
          }
        }
      }
    }
    Ok(Env::from_map(map))
  }

  /// Phase-two binding of a product reference: the referenced target has
  /// already been evaluated in the current `env_down`, and the named file
  /// must appear among its outputs.
  fn resolve_product_ref(&self, reference: &ProductRef, down_fp: &Fingerprint) -> Result<String, EvalError> {
    let key = EvalKey {
      target: reference.target.clone(),
      fp: down_fp.clone(),
    };
    let missing = || EvalError::UnknownProduct {
      target: reference.target.clone(),
      fingerprint: down_fp.short().to_string(),
      output: reference.output.clone(),
    };
    let evaluation = self.memo.get(&key).ok_or_else(missing)?;
    let suffix = format!("/{}", reference.output);
    for product in &evaluation.products {
      for output in &product.outputs {
        if output == &reference.output || output.ends_with(&suffix) {
          return Ok(output.clone());
        }
      }
    }
    Err(missing())
  }

  fn enrich(&self, error: EvalError) -> EvalError {
    if error.carries_chain() {
      return error;
    }
    EvalError::Chain {
      chain: self.stack.iter().map(EvalKey::render).collect(),
      source: Box::new(error),
    }
  }
}

/// Evaluate a set of entries against a loaded project and return the
/// deduplicated product set.
pub fn evaluate_entries(project: &Project, entries: &[Ident]) -> Result<ProductSet, EvalError> {
  let mut evaluator = Evaluator::new(project);
  for entry in entries {
    evaluator.evaluate_entry(entry)?;
  }
  Ok(evaluator.into_products())
}
