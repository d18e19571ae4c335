//! Test fixtures for Greenplum clusters.
//!
//! A [`harness::Harness`] bundles the cluster configuration with a
//! [`database::SqlClient`] and a [`command::CommandRunner`]. The operation
//! modules extend it with catalog checks, DDL/DML fixtures, backup and restore
//! comparison, host management and polling for mirror state transitions.

pub mod backup;
pub mod catalog;
pub mod cluster;
pub mod command;
pub mod context;
pub mod database;
pub mod error;
pub mod extensions;
pub mod files;
pub mod fixtures;
pub mod harness;
pub mod hosts;
mod macros;
pub mod sql;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
