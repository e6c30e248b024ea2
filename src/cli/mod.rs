//! Command-line interface definitions.
//!
//! Read-only inspection over the arena store plus config validation:
//! - `Cli`, `Commands`: CLI argument definitions via clap
//! - `Display`: Formatted terminal output with colors and status

mod commands;
mod display;

pub use commands::{Cli, Commands, OutputFormat};
pub use display::Display;
