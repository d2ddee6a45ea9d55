//! # Storage Layer
//!
//! File inputs for the plan engine. Nothing computed here is persisted.
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Config | TOML | `--config`, `./plan.toml`, or the user config dir |
//! | Plan | JSON | path given on the command line |
//!
//! ## Key Types
//!
//! - [`EngineConfig`] - Scheduling, calendar and allocation defaults
//! - [`Plan`] - A plan file resolved into a task graph and resource registry

mod config;
mod plan;

pub use config::{AllocationConfig, CalendarConfig, ConfigError, EngineConfig, OutputFormat, SchedulingConfig};
pub use plan::{Plan, PlanError, PlanFile};
