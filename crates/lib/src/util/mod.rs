//! Shared utilities.

pub mod http;

#[cfg(test)]
pub mod testutil;
