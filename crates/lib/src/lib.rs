//! gcbuild-lib: build orchestration for Cloud Build
//!
//! This crate packages a local source tree, stages it in a Cloud Storage
//! bucket, submits it to Cloud Build and tracks the build to completion:
//! - `ignore`: `.gcloudignore` rules
//! - `archive`: streaming tar.gz packaging
//! - `storage`: object store client and the staging bucket workflow
//! - `service`: build service client
//! - `builder`: the orchestration engine, completion tracking and log retrieval
//! - `events`: per-builder progress notifications

pub mod archive;
pub mod auth;
pub mod builder;
pub mod consts;
pub mod events;
pub mod ignore;
pub mod service;
pub mod settings;
pub mod spec;
pub mod storage;
pub mod util;

pub use builder::{BuildError, BuildFailure, BuildHandle, BuildOptions, Builder, Services};
pub use events::{EventBus, ProgressEvent};
