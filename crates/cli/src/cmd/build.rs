//! Implementation of the `gcb build` command.
//!
//! Packages a source directory, runs it through Cloud Build and narrates the
//! progress events of the build as they arrive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use gcbuild_lib::consts::IGNORE_FILE;
use gcbuild_lib::ignore::ignore_file_path;
use gcbuild_lib::spec::BuildOverrides;
use gcbuild_lib::{BuildError, BuildOptions, ProgressEvent};

use super::{connect, load_settings, runtime};
use crate::output::{
  OutputFormat, format_duration, print_info, print_json, print_stat, print_step, print_success, print_warning,
};

/// Rules written when the source tree has no ignore file.
pub const DEFAULT_IGNORE_RULES: &str = "\
# This file specifies files that are *not* uploaded to Google Cloud Build.
# It follows the same glob syntax as .gitignore.
.gcloudignore
.git
.gitignore
node_modules
";

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Directory with the sources to build (default: current directory)
  pub source: Option<PathBuf>,

  /// YAML or JSON build config (default: cloudbuild.yaml, cloudbuild.json or Dockerfile in SOURCE)
  #[arg(short, long)]
  pub config: Option<PathBuf>,

  /// Image tag for Dockerfile builds (default: name of SOURCE)
  #[arg(short, long)]
  pub tag: Option<String>,

  /// Substitution variable, KEY=VALUE (repeatable)
  #[arg(long = "substitution", short = 's', value_parser = parse_substitution)]
  pub substitutions: Vec<(String, String)>,

  /// Build timeout, e.g. 1200s, 20m or 1h
  #[arg(long)]
  pub timeout: Option<String>,

  /// Machine type for the build workers
  #[arg(long)]
  pub machine_type: Option<String>,

  /// How often to check on the build (e.g. "3s", "500ms")
  #[arg(long, value_parser = parse_poll_interval)]
  pub poll_interval: Option<Duration>,
}

fn parse_substitution(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
  }
}

fn parse_poll_interval(raw: &str) -> Result<Duration, String> {
  let interval = humantime::parse_duration(raw).map_err(|e| e.to_string())?;
  if interval.is_zero() {
    return Err("must be greater than zero".to_string());
  }
  Ok(interval)
}

impl BuildArgs {
  fn overrides(&self) -> BuildOverrides {
    BuildOverrides {
      tag: self.tag.clone(),
      substitutions: self.substitutions.iter().cloned().collect::<BTreeMap<_, _>>(),
      timeout: self.timeout.clone(),
      machine_type: self.machine_type.clone(),
    }
  }
}

/// Resolve SOURCE against the working directory.
fn resolve_source(source: Option<&Path>) -> Result<PathBuf> {
  let cwd = std::env::current_dir().context("Failed to read current directory")?;
  let path = match source {
    Some(p) if p.is_absolute() => p.to_path_buf(),
    Some(p) => cwd.join(p),
    None => cwd,
  };
  dunce::canonicalize(&path).with_context(|| format!("Source directory not found: {}", path.display()))
}

/// Write the default ignore file if `root` has none. Returns whether one was written.
fn ensure_ignore_file(root: &Path) -> Result<bool> {
  let path = ignore_file_path(root);
  if path.exists() {
    return Ok(false);
  }
  std::fs::write(&path, DEFAULT_IGNORE_RULES).with_context(|| format!("Failed to write {}", path.display()))?;
  Ok(true)
}

async fn narrate(mut rx: broadcast::Receiver<ProgressEvent>, start: Instant, verbose: bool) {
  loop {
    match rx.recv().await {
      Ok(ProgressEvent::CreatingBucket(bucket)) => print_step(&format!("Creating staging bucket {bucket}...")),
      Ok(ProgressEvent::Uploading) => {
        print_success("Source code packaged.");
        print_step("Uploading source...");
      }
      Ok(ProgressEvent::Building) => {
        print_success("Source uploaded to cloud.");
        print_step("Building container...");
      }
      Ok(ProgressEvent::Log(log)) => {
        if verbose {
          print!("{log}");
        }
      }
      Ok(ProgressEvent::Complete) => {
        print_success(&format!("Container built in {}.", format_duration(start.elapsed())));
      }
      Err(RecvError::Lagged(_)) => continue,
      Err(RecvError::Closed) => break,
    }
  }
}

pub fn cmd_build(args: BuildArgs, verbose: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let source = resolve_source(args.source.as_deref())?;
  debug!(source = %source.display(), "resolved source directory");

  if ensure_ignore_file(&source)? && !output.is_json() {
    print_info(&format!(
      "Generated a '{IGNORE_FILE}' file in {}. It lists glob patterns excluded from the upload, like a .gitignore.",
      source.display()
    ));
  }

  let mut settings = load_settings()?;
  if let Some(interval) = args.poll_interval {
    settings.poll_interval = interval;
  }

  let mut options = BuildOptions::new(&source).with_settings(&settings);
  options.config_path = args.config.clone();
  options.overrides = args.overrides();
  let builder = connect(&settings, options)?;

  let rt = runtime()?;
  rt.block_on(async move {
    let narrator = (!output.is_json()).then(|| tokio::spawn(narrate(builder.subscribe(), start, verbose)));

    let result = tokio::select! {
      result = builder.build() => result,
      _ = tokio::signal::ctrl_c() => {
        bail!("Interrupted. A build that was already submitted keeps running; use 'gcb cancel' to stop it.");
      }
    };
    drop(builder);
    if let Some(narrator) = narrator {
      let _ = narrator.await;
    }

    match result {
      Ok(handle) => {
        if output.is_json() {
          return print_json(&handle);
        }
        if let Some(id) = handle.id() {
          print_stat("Build", id);
        }
        if let Some(url) = &handle.metadata.build.log_url {
          print_stat("Logs", url);
        }
        Ok(())
      }
      Err(err) => {
        report_failure(&err, output)?;
        Err(err.into())
      }
    }
  })
}

fn report_failure(err: &BuildError, output: OutputFormat) -> Result<()> {
  let Some(failure) = err.failure() else {
    return Ok(());
  };
  if output.is_json() {
    return print_json(failure);
  }
  if let Some(log) = &failure.log {
    eprintln!("{log}");
  }
  if let Some(cause) = &failure.cause {
    print_warning(cause);
  }
  if let Some(suggestion) = &failure.suggestion {
    print_warning(suggestion);
  }
  Ok(())
}
