//! Configuration for the Greenplum fixture harness.
//!
//! Provides environment detection, configuration loading from YAML files and
//! environment variables, secret handling, and the shared configuration types
//! used by the fixture library and its binary.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
