//! Build specifications: resource types, config loading and overrides.

pub mod load;
pub mod overrides;
pub mod types;

pub use load::{ConfigError, ConfigRequest, load_config, locate_config};
pub use overrides::{BuildOverrides, OverrideError, attach_source, parse_timeout};
pub use types::{Build, BuildSpec, BuildStatus, BuildStep, ExecutionOptions, Source, StorageSource};
