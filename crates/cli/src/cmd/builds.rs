//! Administrative commands: `list`, `get`, `cancel` and `log`.

use anyhow::{Context, Result};

use gcbuild_lib::spec::Build;
use gcbuild_lib::{BuildOptions, Builder};

use super::{connect, load_settings, runtime};
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};

fn admin() -> Result<(tokio::runtime::Runtime, Builder)> {
  let settings = load_settings()?;
  let builder = connect(&settings, BuildOptions::new(".").with_settings(&settings))?;
  Ok((runtime()?, builder))
}

fn status_of(build: &Build) -> String {
  build
    .status
    .map(|s| s.to_string())
    .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn print_build(build: &Build) {
  print_stat("ID", build.id.as_deref().unwrap_or("-"));
  print_stat("Status", &status_of(build));
  if let Some(detail) = &build.status_detail {
    print_stat("Detail", detail);
  }
  if let Some(created) = &build.create_time {
    print_stat("Created", created);
  }
  if let Some(finished) = &build.finish_time {
    print_stat("Finished", finished);
  }
  if let Some(step) = build.failed_step() {
    print_stat("Failed step", &step.name);
  }
  if !build.images.is_empty() {
    print_stat("Images", &build.images.join(", "));
  }
  if let Some(url) = &build.log_url {
    print_stat("Logs", url);
  }
}

pub fn cmd_list(filter: Option<&str>, page_size: Option<u32>, output: OutputFormat) -> Result<()> {
  let (rt, builder) = admin()?;
  let builds = rt
    .block_on(builder.list_builds(filter, page_size))
    .context("Failed to list builds")?;

  if output.is_json() {
    return print_json(&builds);
  }
  if builds.is_empty() {
    print_info("No builds found.");
    return Ok(());
  }
  for build in &builds {
    println!(
      "{:<38} {:<15} {}",
      build.id.as_deref().unwrap_or("-"),
      status_of(build),
      build.create_time.as_deref().unwrap_or("")
    );
  }
  Ok(())
}

pub fn cmd_get(id: &str, output: OutputFormat) -> Result<()> {
  let (rt, builder) = admin()?;
  let build = rt
    .block_on(builder.get_build(id))
    .with_context(|| format!("Failed to get build {id}"))?;

  if output.is_json() {
    return print_json(&build);
  }
  print_build(&build);
  Ok(())
}

pub fn cmd_cancel(id: &str, output: OutputFormat) -> Result<()> {
  let (rt, builder) = admin()?;
  let build = rt
    .block_on(builder.cancel_build(id))
    .with_context(|| format!("Failed to cancel build {id}"))?;

  if output.is_json() {
    return print_json(&build);
  }
  print_success(&format!("Build {id} is {}", status_of(&build)));
  Ok(())
}

pub fn cmd_log(id: &str, output: OutputFormat) -> Result<()> {
  let (rt, builder) = admin()?;
  let log = rt
    .block_on(builder.fetch_log(id))
    .with_context(|| format!("Failed to fetch log of build {id}"))?;

  if output.is_json() {
    return print_json(&serde_json::json!({ "id": id, "log": log }));
  }
  print!("{log}");
  Ok(())
}
