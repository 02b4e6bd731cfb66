//! Offline storage engine for an HTTP object cache: span discovery, stripe metadata,
//! volume allocation and stripe hash-table construction.
#![allow(clippy::cargo_common_metadata)]

pub mod allocator;
pub mod cache;
pub mod config;
pub mod errata;
pub mod layout;
pub mod retention;

#[cfg(test)]
pub(crate) mod test_utils;
