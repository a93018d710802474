//! Ninja file syntax writer.
//!
//! Emits rules, build statements, variables, and comments with
//! ninja-style line wrapping and path escaping. Output is deterministic:
//! what you pass in is what lands in the file, in order.

use std::io::{self, Write as _};

const LINE_WIDTH: usize = 78;

/// Escape a path for use in a build statement.
pub fn escape_path(path: &str) -> String {
  path.replace('$', "$$").replace(' ', "$ ").replace(':', "$:")
}

pub struct Writer<W: io::Write> {
  out: W,
}

impl<W: io::Write> Writer<W> {
  pub fn new(out: W) -> Self {
    Writer { out }
  }

  pub fn newline(&mut self) -> io::Result<()> {
    writeln!(self.out)
  }

  pub fn comment(&mut self, text: &str) -> io::Result<()> {
    writeln!(self.out, "# {}", text)
  }

  pub fn variable(&mut self, key: &str, value: &str, indent: usize) -> io::Result<()> {
    if value.is_empty() {
      return Ok(());
    }
    self.line(&format!("{} = {}", key, value), indent)
  }

  pub fn rule(
    &mut self,
    name: &str,
    command: &str,
    description: Option<&str>,
    depfile: Option<&str>,
    restat: bool,
  ) -> io::Result<()> {
    self.line(&format!("rule {}", name), 0)?;
    self.variable("command", command, 1)?;
    if let Some(description) = description {
      self.variable("description", description, 1)?;
    }
    if let Some(depfile) = depfile {
      self.variable("depfile", depfile, 1)?;
    }
    if restat {
      self.variable("restat", "1", 1)?;
    }
    Ok(())
  }

  pub fn build(
    &mut self,
    outputs: &[String],
    rule: &str,
    inputs: &[String],
    implicit: &[String],
    order_only: &[String],
    variables: impl IntoIterator<Item = (String, String)>,
  ) -> io::Result<()> {
    let mut line = String::from("build ");
    line.push_str(
      &outputs
        .iter()
        .map(|o| escape_path(o))
        .collect::<Vec<_>>()
        .join(" "),
    );
    line.push_str(": ");
    line.push_str(rule);
    for input in inputs {
      line.push(' ');
      line.push_str(&escape_path(input));
    }
    if !implicit.is_empty() {
      line.push_str(" |");
      for path in implicit {
        line.push(' ');
        line.push_str(&escape_path(path));
      }
    }
    if !order_only.is_empty() {
      line.push_str(" ||");
      for path in order_only {
        line.push(' ');
        line.push_str(&escape_path(path));
      }
    }
    self.line(&line, 0)?;
    for (key, value) in variables {
      self.variable(&key, &value, 1)?;
    }
    Ok(())
  }

  /// Write a logical line, wrapping at [`LINE_WIDTH`] with `$`
  /// continuations. Wraps only at spaces that are not themselves
  /// escaped.
  fn line(&mut self, text: &str, indent: usize) -> io::Result<()> {
    let mut leading = "  ".repeat(indent);
    let mut rest = text;

    while leading.len() + rest.len() > LINE_WIDTH {
      // Find the last wrappable space within the width budget.
      let budget = LINE_WIDTH - leading.len() - 2; // room for " $"
      let mut split = None;
      for (i, _) in rest.match_indices(' ') {
        if i > budget {
          break;
        }
        if !is_escaped(rest, i) {
          split = Some(i);
        }
      }
      // Nothing fits: take the first wrappable space past the budget.
      if split.is_none() {
        split = rest.match_indices(' ').map(|(i, _)| i).find(|&i| !is_escaped(rest, i));
      }
      let Some(at) = split else { break };
      writeln!(self.out, "{}{} $", leading, &rest[..at])?;
      rest = &rest[at + 1..];
      leading = "  ".repeat(indent + 2);
    }

    writeln!(self.out, "{}{}", leading, rest)
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}

/// Whether the space at byte `at` is preceded by an odd number of `$`.
fn is_escaped(text: &str, at: usize) -> bool {
  let mut dollars = 0;
  for b in text[..at].bytes().rev() {
    if b == b'$' {
      dollars += 1;
    } else {
      break;
    }
  }
  dollars % 2 == 1
}

#[cfg(test)]
mod tests {
  use super::*;

  fn render(f: impl FnOnce(&mut Writer<Vec<u8>>)) -> String {
    let mut w = Writer::new(Vec::new());
    f(&mut w);
    String::from_utf8(w.into_inner()).unwrap()
  }

  #[test]
  fn escapes_paths() {
    assert_eq!(escape_path("a b"), "a$ b");
    assert_eq!(escape_path("c:d"), "c$:d");
    assert_eq!(escape_path("e$f"), "e$$f");
  }

  #[test]
  fn writes_a_rule() {
    let text = render(|w| {
      w.rule("copy_file", "cp $in $out", Some("copy $out"), None, false).unwrap();
    });
    assert_eq!(text, "rule copy_file\n  command = cp $in $out\n  description = copy $out\n");
  }

  #[test]
  fn writes_a_build_statement() {
    let text = render(|w| {
      w.build(
        &["out/a".to_string()],
        "copy_file",
        &["src/a".to_string()],
        &["gen/dep".to_string()],
        &[],
        [("cmd".to_string(), "x".to_string())],
      )
      .unwrap();
    });
    assert_eq!(text, "build out/a: copy_file src/a | gen/dep\n  cmd = x\n");
  }

  #[test]
  fn empty_variables_are_dropped() {
    let text = render(|w| {
      w.build(
        &["o".to_string()],
        "r",
        &[],
        &[],
        &[],
        [("empty".to_string(), String::new())],
      )
      .unwrap();
    });
    assert_eq!(text, "build o: r\n");
  }

  #[test]
  fn long_lines_wrap_with_continuations() {
    let inputs: Vec<String> = (0..12).map(|i| format!("some/fairly/long/input/path_{}.c", i)).collect();
    let text = render(|w| {
      w.build(&["out".to_string()], "link", &inputs, &[], &[], []).unwrap();
    });
    for line in text.lines() {
      assert!(line.len() <= LINE_WIDTH, "line too long: {:?}", line);
    }
    // Reassembling the wrapped line recovers every input.
    let logical = text.replace(" $\n    ", " ").replace(" $\n", " ");
    for input in &inputs {
      assert!(logical.contains(input));
    }
  }

  #[test]
  fn escaped_spaces_never_split() {
    let inputs: Vec<String> = (0..8).map(|i| format!("dir with spaces/file {}.c", i)).collect();
    let text = render(|w| {
      w.build(&["out".to_string()], "r", &inputs, &[], &[], []).unwrap();
    });
    for line in text.lines() {
      let trimmed = line.strip_suffix(" $").unwrap_or(line);
      // No line may end mid-escape: a trailing "$ " chunk would mean we
      // split an escaped space.
      assert!(!trimmed.ends_with("$"), "split inside an escape: {:?}", line);
    }
  }
}
