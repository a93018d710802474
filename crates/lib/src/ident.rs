//! Target and product identifiers.
//!
//! An identifier names a target within a package:
//!
//! ```text
//! //lib/codec:decoder      absolute form
//! :decoder                 same-package form (needs a package context)
//! //lib/codec/decoder      shorthand, when the trailing path component
//!                          equals the target name (no colon allowed)
//! //lib/codec:decoder#gen/tables.c
//!                          product reference: a named output of the target
//! ```
//!
//! Parsing is purely syntactic. Whether the referenced target or output
//! exists is checked during evaluation, not here.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the identifier parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentError {
  #[error("bad identifier {text:?}: {reason}")]
  Syntax { text: String, reason: &'static str },
}

impl IdentError {
  fn new(text: &str, reason: &'static str) -> Self {
    IdentError::Syntax {
      text: text.to_string(),
      reason,
    }
  }
}

/// Canonical name of a target: a package path and a target name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ident {
  /// Project-relative, slash-delimited package path.
  pub package: String,
  /// Target name within the package.
  pub name: String,
}

impl Ident {
  pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
    Ident {
      package: package.into(),
      name: name.into(),
    }
  }

  /// Parse a textual reference.
  ///
  /// `context` is the package the reference appears in; it is required to
  /// resolve the `:name` form. References that are neither absolute nor
  /// package-relative are rejected.
  pub fn parse(text: &str, context: Option<&str>) -> Result<Ident, IdentError> {
    if let Some(rest) = text.strip_prefix("//") {
      let mut parts = rest.split(':');
      let package = parts.next().unwrap_or("");
      match (parts.next(), parts.next()) {
        (None, _) => {
          // Shorthand: the trailing path component doubles as the name.
          let name = package
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| IdentError::new(text, "empty package path"))?;
          Ok(Ident::new(package, name))
        }
        (Some(name), None) => {
          if name.is_empty() {
            return Err(IdentError::new(text, "empty target name"));
          }
          Ok(Ident::new(package, name))
        }
        (Some(_), Some(_)) => Err(IdentError::new(text, "too many colons")),
      }
    } else if let Some(name) = text.strip_prefix(':') {
      let package = context.ok_or_else(|| IdentError::new(text, "package-relative reference outside a package"))?;
      if name.is_empty() || name.contains(':') {
        return Err(IdentError::new(text, "malformed target name"));
      }
      Ok(Ident::new(package, name))
    } else {
      Err(IdentError::new(text, "expected '//' or ':' prefix"))
    }
  }
}

impl fmt::Display for Ident {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "//{}:{}", self.package, self.name)
  }
}

/// Reference to a named output of a target, `//pkg:name#rel/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductRef {
  pub target: Ident,
  /// Output path relative to the target's output directory.
  pub output: String,
}

impl fmt::Display for ProductRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.target, self.output)
  }
}

/// A dependency edge as written in a description file: either a plain
/// target reference or a product reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepRef {
  Target(Ident),
  Product(ProductRef),
}

impl DepRef {
  /// Parse a dependency reference in the context of `package`.
  pub fn parse(text: &str, package: &str) -> Result<DepRef, IdentError> {
    match text.split_once('#') {
      Some((head, output)) => {
        if !head.contains(':') {
          // The shorthand form is ambiguous in front of '#'; require the
          // colon form so the output path is unmistakable.
          return Err(IdentError::new(text, "product reference must use the colon form"));
        }
        if output.is_empty() {
          return Err(IdentError::new(text, "empty product path"));
        }
        let target = Ident::parse(head, Some(package))?;
        Ok(DepRef::Product(ProductRef {
          target,
          output: output.to_string(),
        }))
      }
      None => Ok(DepRef::Target(Ident::parse(text, Some(package))?)),
    }
  }

  /// The target this edge points at, regardless of form.
  pub fn target(&self) -> &Ident {
    match self {
      DepRef::Target(ident) => ident,
      DepRef::Product(r) => &r.target,
    }
  }
}
