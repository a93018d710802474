//! tessera-cli: command-line driver for tessera.
//!
//! Subcommands:
//! - `tessera gen [TARGETS...]` - load the project, evaluate entries, and
//!   write `build.ninja` into the build directory
//! - `tessera targets` - list loadable targets
//! - `tessera dump TARGET` - evaluate one entry and print its products as
//!   JSON

mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(version, about = "Flatten parameterized build descriptions into a ninja manifest")]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Project root directory
  #[arg(long, global = true, default_value = ".")]
  root: PathBuf,

  /// Build output directory, relative to the project root unless
  /// absolute
  #[arg(long, global = true, default_value = "build")]
  build_dir: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Evaluate entry targets and write the build manifest
  Gen {
    /// Entry targets (e.g. //greet:hello); all concrete targets when
    /// omitted
    targets: Vec<String>,

    /// Dump each product's environment into the manifest as comments
    #[arg(long)]
    dump_env: bool,
  },

  /// List the targets of all loadable packages
  Targets,

  /// Evaluate one entry target and print its products as JSON
  Dump {
    /// The entry target to evaluate
    target: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
    .with_target(false)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  let build_dir = if cli.build_dir.is_absolute() {
    cli.build_dir.clone()
  } else {
    cli.root.join(&cli.build_dir)
  };

  match cli.command {
    Commands::Gen { targets, dump_env } => cmd::cmd_gen(&cli.root, &build_dir, &targets, dump_env),
    Commands::Targets => cmd::cmd_targets(&cli.root, &build_dir),
    Commands::Dump { target } => cmd::cmd_dump(&cli.root, &build_dir, &target),
  }
}
