//! Command-line interface definitions.
//!
//! - `Cli`, `Commands`: CLI argument definitions via clap
//! - `Display`: Formatted terminal output with colors

mod commands;
mod display;

pub use commands::{Cli, Commands, ConfigAction, EventArg, OutputFormat, RangeArg};
pub use display::Display;
