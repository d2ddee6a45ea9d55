//! # Command-Line Interface
//!
//! The `plan` binary: loads a JSON plan and runs one engine operation on it.
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `schedule <plan.json>` | Enforce every constraint and print task dates |
//! | `critical-path <plan.json>` | Print the tasks without slack |
//! | `allocate <plan.json> --task <name> --hours <n>` | Allocate effort and print day assignments |
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug logs on stderr; `RUST_LOG` takes
//! precedence when set:
//! ```bash
//! plan --verbose schedule plan.json
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod commands;
mod output;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
