//! The Lua configuration surface.
//!
//! Description files are plain Lua, evaluated in a fresh interpreter per
//! file with a small set of globals: the root file sees `install`,
//! `define_key`, `environment` and `seed`; package files see the verbs
//! of every installed plugin. Everything the files produce flows into
//! shared loader state captured by the registered functions.

pub mod conv;
pub mod globals;
pub mod runtime;
