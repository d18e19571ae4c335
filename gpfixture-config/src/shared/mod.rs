mod base;
mod connection;
mod harness;
mod poll;

pub use base::*;
pub use connection::*;
pub use harness::*;
pub use poll::*;
