use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use cmd::BuildArgs;
use output::{OutputFormat, print_error};

/// gcb - build container images on Cloud Build from a local source tree
#[derive(Parser)]
#[command(name = "gcb")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text", global = true)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Package SOURCE, upload it and run a build
  Build(BuildArgs),

  /// List recent builds of the current project
  List {
    /// Build service filter expression, e.g. status="FAILURE"
    #[arg(long)]
    filter: Option<String>,

    /// Maximum number of builds to return
    #[arg(long)]
    page_size: Option<u32>,
  },

  /// Show a build
  Get {
    /// Build ID
    id: String,
  },

  /// Cancel a running build
  Cancel {
    /// Build ID
    id: String,
  },

  /// Print the log of a finished build
  Log {
    /// Build ID
    id: String,
  },
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<()> {
  let output = cli.output;
  match cli.command {
    Commands::Build(args) => cmd::cmd_build(args, cli.verbose, output),
    Commands::List { filter, page_size } => cmd::cmd_list(filter.as_deref(), page_size, output),
    Commands::Get { id } => cmd::cmd_get(&id, output),
    Commands::Cancel { id } => cmd::cmd_cancel(&id, output),
    Commands::Log { id } => cmd::cmd_log(&id, output),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
