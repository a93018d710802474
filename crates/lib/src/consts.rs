//! Shared constants.

/// Number of hex characters of a fingerprint used in paths and display.
/// The full digest is always kept for equality checks.
pub const HASH_PREFIX_LEN: usize = 20;

/// Name of the project root description file.
pub const ROOT_FILE: &str = "BUILD.conf.lua";

/// Name of a package description file.
pub const PACKAGE_FILE: &str = "BUILD.lua";

/// Optional project variables file, read before the root description.
pub const VARS_FILE: &str = "BUILD.vars.toml";

/// Name of the emitted build manifest.
pub const MANIFEST_FILE: &str = "build.ninja";

/// Name of the manifest regeneration depfile.
pub const MANIFEST_DEPS_FILE: &str = "build.ninja.deps";

/// Base environment used for entry targets that do not name one.
pub const DEFAULT_ENV: &str = "default";

/// Evaluation recursion bound. Narrowed traversals of a static cycle keep
/// task keys distinct, so runaway recursion must be cut off explicitly
/// rather than left to exhaust the stack.
pub const RECURSION_LIMIT: usize = 512;
