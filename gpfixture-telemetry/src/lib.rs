//! Logging setup for the fixture harness and its tests.

pub mod tracing;

pub use self::tracing::*;
