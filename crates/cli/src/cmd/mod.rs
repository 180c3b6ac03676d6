mod build;
mod builds;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;

use gcbuild_lib::auth::GcloudIdentity;
use gcbuild_lib::settings::Settings;
use gcbuild_lib::{BuildOptions, Builder, Services};

pub use build::{BuildArgs, cmd_build};
pub use builds::{cmd_cancel, cmd_get, cmd_list, cmd_log};

fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}

/// Builder wired to the services named in `settings`.
fn connect(settings: &Settings, options: BuildOptions) -> Result<Builder> {
  let identity = Arc::new(GcloudIdentity::new());
  let services = Services::from_settings(settings, identity).context("Failed to configure service clients")?;
  Ok(Builder::new(services, options))
}

fn load_settings() -> Result<Settings> {
  Settings::from_env().context("Invalid environment configuration")
}
