//! The downstream build manifest: ninja syntax and the emitter.

pub mod emit;
pub mod syntax;

pub use emit::{EmitError, EmitOptions, write_manifest};
pub use syntax::Writer;
