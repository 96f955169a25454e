//! Command-line interface.

pub mod args;
pub mod optimize;
pub mod serve;

pub use args::{Cli, Commands};
