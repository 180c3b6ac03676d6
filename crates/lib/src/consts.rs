/// Application name used for user-agent strings and generated files.
pub const APP_NAME: &str = "gcbuild";

/// Name of the ignore file read from the source root.
pub const IGNORE_FILE: &str = ".gcloudignore";

/// Suffix appended to the project id to form the staging bucket name.
pub const STAGING_BUCKET_SUFFIX: &str = "-gcb-staging-bbq";

/// Objects in the staging bucket are deleted after this many days.
pub const STAGING_RETENTION_DAYS: u32 = 1;

/// Media type of uploaded source archives.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

/// OAuth scope requested for every call made during a build.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Scheme prefix of log bucket locations reported by the build service.
pub const GCS_SCHEME: &str = "gs://";

pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_CLOUDBUILD_ENDPOINT: &str = "https://cloudbuild.googleapis.com";
pub const DEFAULT_REGISTRY: &str = "gcr.io";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;

/// Builder image used when a Dockerfile stands in for a build config.
pub const DOCKER_BUILDER_IMAGE: &str = "gcr.io/cloud-builders/docker";
