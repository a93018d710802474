//! tessera-lib: graph flattening for parameterized build descriptions.
//!
//! Tessera turns Lua build descriptions into a concrete, deduplicated
//! build manifest for a Ninja-compatible executor. The pipeline:
//!
//! - [`loader`] evaluates the root description and every reachable
//!   package file, producing an abstract target graph in a [`project`].
//! - [`eval`] drives requested entry targets through the graph, threading
//!   immutable [`env`] environments via [`env::Delta`]s and memoizing on
//!   `(target, fingerprint)` task keys.
//! - [`ninja`] writes the deduplicated [`product`] set as `build.ninja`.
//!
//! Everything is synchronous and single-threaded: loading runs
//! user-authored description code against shared registries, and
//! evaluation is a memoized recursion whose memo is the only shared
//! state.

pub mod consts;
pub mod env;
pub mod eval;
pub mod ident;
pub mod interp;
pub mod loader;
pub mod lua;
pub mod ninja;
pub mod plugins;
pub mod product;
pub mod project;
pub mod target;

use thiserror::Error;

/// Umbrella error for a whole run, as the CLI consumes it.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Load(#[from] loader::LoadError),

  #[error(transparent)]
  Eval(#[from] eval::EvalError),

  #[error(transparent)]
  Emit(#[from] ninja::EmitError),

  #[error(transparent)]
  Ident(#[from] ident::IdentError),
}
